//! Line-based patch grammar for the note.
//!
//! ```text
//! *** Begin Patch
//! @@ # Plan
//! -(empty)
//! +step 1: gather info
//! *** End Patch
//! ```
//!
//! - [`parse`] turns patch text into a [`Patch`] of ordered [`Hunk`]s.
//!   Body lines without a recognised tag are read as context.
//! - [`apply()`] applies every hunk in order to a copy of the document,
//!   trying exact-block replace, then context-anchored insert, then
//!   header-relative append for pure insertions. The first hunk that cannot
//!   be placed fails the whole patch and nothing is committed.
//!
//! Matching is exact over lines (trailing whitespace aside). There is no
//! fuzzy matching.

pub mod apply;
pub mod parse;

pub use apply::apply;
pub use parse::parse;

pub const BEGIN_MARKER: &str = "*** Begin Patch";
pub const END_MARKER: &str = "*** End Patch";
pub const END_OF_FILE_MARKER: &str = "*** End of File";
pub const HUNK_MARKER: &str = "@@";

/// One tagged line of a hunk body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HunkLine {
    Context(String),
    Delete(String),
    Insert(String),
}

impl HunkLine {
    pub fn text(&self) -> &str {
        match self {
            HunkLine::Context(t) | HunkLine::Delete(t) | HunkLine::Insert(t) => t,
        }
    }
}

/// A contiguous edit, optionally anchored to a section heading.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Hunk {
    /// Exact text of the section heading this hunk targets.
    pub header: Option<String>,
    pub lines: Vec<HunkLine>,
}

impl Hunk {
    /// Lines that must already exist: context and deletions, in order.
    pub fn expected(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter(|l| !matches!(l, HunkLine::Insert(_)))
            .map(HunkLine::text)
            .collect()
    }

    /// Lines that replace the expected block: context and insertions, in order.
    pub fn replacement(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter(|l| !matches!(l, HunkLine::Delete(_)))
            .map(HunkLine::text)
            .collect()
    }

    pub fn context(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter(|l| matches!(l, HunkLine::Context(_)))
            .map(HunkLine::text)
            .collect()
    }

    pub fn inserts(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter(|l| matches!(l, HunkLine::Insert(_)))
            .map(HunkLine::text)
            .collect()
    }

    /// A hunk with no context or delete lines asserts nothing about the
    /// existing document.
    pub fn is_pure_insert(&self) -> bool {
        self.lines.iter().all(|l| matches!(l, HunkLine::Insert(_)))
    }
}

/// A parsed patch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Patch {
    pub hunks: Vec<Hunk>,
}
