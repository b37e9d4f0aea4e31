//! Hunk placement against the note.

use super::{Hunk, parse};
use crate::document::is_heading;
use crate::error::{Result, StackError};
use std::ops::Range;
use tracing::{debug, trace};

/// Apply `patch_text` to `document`, returning the new document text.
///
/// Hunks are applied in order to a working copy and each one sees the
/// result of the previous ones. If any hunk fails the error is returned and
/// no hunk is committed.
pub fn apply(document: &str, patch_text: &str) -> Result<String> {
    let patch = parse(patch_text)?;
    let mut lines: Vec<String> = document.lines().map(str::to_string).collect();

    for (index, hunk) in patch.hunks.iter().enumerate() {
        let placement = apply_hunk(&mut lines, hunk).ok_or_else(|| StackError::HunkMismatch {
            index,
            header: hunk.header.clone(),
        })?;
        debug!(
            "[patch] hunk {index} ({}) applied by {placement:?}",
            hunk.header.as_deref().unwrap_or("no header")
        );
    }

    Ok(finish(lines))
}

/// Which rule placed a hunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    Replace,
    ContextInsert,
    SectionAppend,
    NewSection,
    DocumentAppend,
}

fn apply_hunk(lines: &mut Vec<String>, hunk: &Hunk) -> Option<Placement> {
    let section = hunk
        .header
        .as_deref()
        .and_then(|header| find_section(lines, header));
    let window = match &section {
        Some(s) => s.body.clone(),
        None => 0..lines.len(),
    };
    trace!("[patch] search window {window:?}");

    let expected = hunk.expected();
    if !expected.is_empty()
        && let Some(at) = find_block(lines, &expected, window.clone())
    {
        let replacement: Vec<String> = hunk.replacement().into_iter().map(String::from).collect();
        lines.splice(at..at + expected.len(), replacement);
        return Some(Placement::Replace);
    }

    let context = hunk.context();
    if !context.is_empty()
        && let Some(at) = find_block(lines, &context, window)
    {
        let inserts: Vec<String> = hunk
            .inserts()
            .into_iter()
            .filter(|line| !context.contains(line))
            .map(String::from)
            .collect();
        let after = at + context.len();
        lines.splice(after..after, inserts);
        return Some(Placement::ContextInsert);
    }

    if !hunk.is_pure_insert() {
        return None;
    }

    let inserts = hunk.inserts().into_iter().map(String::from);
    match (&hunk.header, section) {
        (Some(_), Some(section)) => {
            let at = section_insert_point(lines, &section);
            lines.splice(at..at, inserts);
            Some(Placement::SectionAppend)
        }
        (Some(header), None) => {
            trim_trailing_blank(lines);
            if !lines.is_empty() {
                lines.push(String::new());
            }
            lines.push(header.clone());
            lines.extend(inserts);
            Some(Placement::NewSection)
        }
        (None, _) => {
            trim_trailing_blank(lines);
            lines.extend(inserts);
            Some(Placement::DocumentAppend)
        }
    }
}

/// A heading and the lines it owns.
struct Section {
    heading: usize,
    /// Lines strictly between the heading and the next heading.
    body: Range<usize>,
}

fn find_section(lines: &[String], header: &str) -> Option<Section> {
    let heading = lines
        .iter()
        .position(|l| is_heading(l) && l.trim() == header)?;
    let end = lines
        .iter()
        .enumerate()
        .skip(heading + 1)
        .find(|(_, l)| is_heading(l))
        .map_or(lines.len(), |(i, _)| i);
    Some(Section {
        heading,
        body: heading + 1..end,
    })
}

/// Insert position for appending to a section: after its last non-blank
/// line, so blank separators before the next heading stay in place.
fn section_insert_point(lines: &[String], section: &Section) -> usize {
    section
        .body
        .clone()
        .rev()
        .find(|&i| !lines[i].trim().is_empty())
        .map_or(section.heading + 1, |i| i + 1)
}

/// First index within `window` where `block` occurs contiguously.
fn find_block(lines: &[String], block: &[&str], window: Range<usize>) -> Option<usize> {
    if block.len() > window.len() {
        return None;
    }
    (window.start..=window.end - block.len()).find(|&start| {
        block
            .iter()
            .zip(&lines[start..start + block.len()])
            .all(|(want, have)| want.trim_end() == have.trim_end())
    })
}

fn trim_trailing_blank(lines: &mut Vec<String>) {
    while lines.last().is_some_and(|l| l.trim().is_empty()) {
        lines.pop();
    }
}

/// Only the end of the result is trimmed; lines keep their own whitespace.
fn finish(mut lines: Vec<String>) -> String {
    trim_trailing_blank(&mut lines);
    let mut text = lines.join("\n");
    text.truncate(text.trim_end().len());
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patch(body: &str) -> String {
        format!("*** Begin Patch\n{body}*** End Patch\n")
    }

    #[test]
    fn exact_replace_inside_section() {
        let out = apply(
            "# Plan\n(empty)\n",
            &patch("@@ # Plan\n-(empty)\n+step 1: gather info\n"),
        )
        .unwrap();
        assert_eq!(out, "# Plan\nstep 1: gather info");
    }

    #[test]
    fn exact_replace_is_not_idempotent() {
        let doc = "# Plan\n(empty)\n";
        let p = patch("@@ # Plan\n-(empty)\n+step 1: gather info\n");
        let once = apply(doc, &p).unwrap();
        let err = apply(&once, &p).unwrap_err();
        assert!(matches!(
            err,
            StackError::HunkMismatch { index: 0, header: Some(ref h) } if h == "# Plan"
        ));
    }

    #[test]
    fn replace_leaves_outside_span_untouched() {
        let doc = "# A\nkeep me\n# Plan\nold\ntail\n# C\nlast";
        let out = apply(doc, &patch("@@ # Plan\n-old\n+new\n")).unwrap();
        assert_eq!(out, "# A\nkeep me\n# Plan\nnew\ntail\n# C\nlast");
    }

    #[test]
    fn window_restricts_match_to_section() {
        let doc = "# A\ntodo\n# B\ntodo";
        let out = apply(doc, &patch("@@ # B\n-todo\n+done\n")).unwrap();
        assert_eq!(out, "# A\ntodo\n# B\ndone");
    }

    #[test]
    fn header_is_case_sensitive() {
        // "# plan" does not name "# Plan", so the whole document is searched.
        let out = apply("# Plan\nx", &patch("@@ # plan\n-x\n+y\n")).unwrap();
        assert_eq!(out, "# Plan\ny");
    }

    #[test]
    fn context_anchored_insert_skips_duplicates() {
        let doc = "# Plan\nstep 1\nstep 3";
        // Expected block (step 1, gone) does not exist, context (step 1) does.
        let out = apply(
            doc,
            &patch("@@ # Plan\n step 1\n-gone\n+step 2\n+step 1\n"),
        )
        .unwrap();
        assert_eq!(out, "# Plan\nstep 1\nstep 2\nstep 3");
    }

    #[test]
    fn unmatched_context_fails() {
        let err = apply("# Plan\nx", &patch("@@ # Plan\n nowhere\n+y\n")).unwrap_err();
        assert!(matches!(err, StackError::HunkMismatch { .. }));
    }

    #[test]
    fn pure_insert_into_missing_section_appends_heading() {
        let out = apply("# Plan\nstep 1", &patch("@@ ## Notes\n+fact: X\n")).unwrap();
        assert_eq!(out, "# Plan\nstep 1\n\n## Notes\nfact: X");
        assert_eq!(out.matches("## Notes").count(), 1);
    }

    #[test]
    fn pure_insert_into_existing_section_goes_before_next_heading() {
        let doc = "# Plan\nstep 1\n\n# Story\nonce";
        let out = apply(doc, &patch("@@ # Plan\n+step 2\n")).unwrap();
        assert_eq!(out, "# Plan\nstep 1\nstep 2\n\n# Story\nonce");
    }

    #[test]
    fn pure_insert_into_last_section_goes_to_end() {
        let out = apply("# Plan\nstep 1\n\n", &patch("@@ # Plan\n+step 2\n")).unwrap();
        assert_eq!(out, "# Plan\nstep 1\nstep 2");
    }

    #[test]
    fn pure_insert_without_header_appends_to_document() {
        let out = apply("# Plan\nstep 1", &patch("@@\n+loose line\n")).unwrap();
        assert_eq!(out, "# Plan\nstep 1\nloose line");
    }

    #[test]
    fn later_hunks_see_earlier_results() {
        let doc = "# Plan\n(empty)";
        let out = apply(
            doc,
            &patch("@@ # Plan\n-(empty)\n+step 1\n@@ # Plan\n step 1\n+step 2\n"),
        )
        .unwrap();
        assert_eq!(out, "# Plan\nstep 1\nstep 2");
    }

    #[test]
    fn failing_hunk_reports_its_index() {
        let doc = "# Plan\n(empty)";
        let err = apply(
            doc,
            &patch("@@ # Plan\n-(empty)\n+step 1\n@@ # Story\n-missing\n"),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            StackError::HunkMismatch { index: 1, header: Some(ref h) } if h == "# Story"
        ));
    }

    #[test]
    fn output_trims_only_the_end() {
        let out = apply("# Plan   \nstep 1\t\n\n\n", &patch("@@\n+x  \n")).unwrap();
        assert_eq!(out, "# Plan   \nstep 1\t\nx");
    }

    #[test]
    fn untouched_lines_keep_trailing_spaces() {
        let doc = "# A\nline one  \nline two\n# Plan\nold";
        let out = apply(doc, &patch("@@ # Plan\n-old\n+new\n")).unwrap();
        assert_eq!(out, "# A\nline one  \nline two\n# Plan\nnew");
    }

    #[test]
    fn padded_header_finds_existing_section() {
        let doc = "# Plan\nold\n# Other\nold";
        let out = apply(doc, &patch("@@  # Other  \n+added\n")).unwrap();
        assert_eq!(out, "# Plan\nold\n# Other\nold\nadded");
        assert_eq!(out.matches("# Other").count(), 1);
    }

    #[test]
    fn indented_heading_matches_trimmed_header() {
        let out = apply("# Plan\n  ## Notes\nfact", &patch("@@ ## Notes\n+more\n")).unwrap();
        assert_eq!(out, "# Plan\n  ## Notes\nfact\nmore");
    }

    #[test]
    fn empty_document_new_section_has_no_leading_blank() {
        let out = apply("", &patch("@@ # Plan\n+first\n")).unwrap();
        assert_eq!(out, "# Plan\nfirst");
    }
}
