//! The note: a durable, section-structured text document.
//!
//! The note survives frame pops and is only ever changed through
//! [`Document::apply_patch`]. A failed patch leaves the document untouched
//! because patches are applied to a working copy.

use crate::error::Result;
use crate::patch;
use serde::{Deserialize, Serialize};

/// Whether a line is a section heading (first non-blank character is `#`).
pub fn is_heading(line: &str) -> bool {
    line.trim_start().starts_with('#')
}

/// Owned, versioned note text.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct Document {
    text: String,
    /// Incremented by every successful patch.
    #[serde(default)]
    version: u64,
}

impl Document {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            version: 0,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Heading lines in document order.
    pub fn headings(&self) -> Vec<&str> {
        self.text.lines().filter(|l| is_heading(l)).collect()
    }

    /// Apply a patch, returning the patched document.
    ///
    /// `self` is not modified; callers swap the result in on success.
    pub fn apply_patch(&self, patch_text: &str) -> Result<Document> {
        let text = patch::apply(&self.text, patch_text)?;
        Ok(Document {
            text,
            version: self.version + 1,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heading_detection_ignores_leading_whitespace() {
        assert!(is_heading("# Plan"));
        assert!(is_heading("   ## Notes"));
        assert!(!is_heading("plan # not a heading"));
        assert!(!is_heading(""));
    }

    #[test]
    fn successful_patch_bumps_version_and_keeps_original() {
        let doc = Document::new("# Plan\n(empty)\n");
        let patched = doc
            .apply_patch("*** Begin Patch\n@@ # Plan\n-(empty)\n+step 1\n*** End Patch\n")
            .unwrap();
        assert_eq!(patched.version(), 1);
        assert_eq!(patched.text(), "# Plan\nstep 1");
        assert_eq!(doc.text(), "# Plan\n(empty)\n");
        assert_eq!(doc.version(), 0);
    }

    #[test]
    fn headings_in_order() {
        let doc = Document::new("# A\ntext\n## B\nmore\n# C");
        assert_eq!(doc.headings(), vec!["# A", "## B", "# C"]);
    }
}
