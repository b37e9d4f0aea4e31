//! Patch text → [`Patch`].

use super::{BEGIN_MARKER, END_MARKER, END_OF_FILE_MARKER, HUNK_MARKER, Hunk, HunkLine, Patch};
use crate::error::{Result, StackError};

/// Parse patch text.
///
/// The first non-blank line must be `*** Begin Patch` and the last non-blank
/// line must be `*** End Patch`. Blank lines between hunks are ignored; any
/// other text before the first `@@` line is rejected.
pub fn parse(patch_text: &str) -> Result<Patch> {
    let lines: Vec<&str> = patch_text
        .lines()
        .map(|l| l.strip_suffix('\r').unwrap_or(l))
        .collect();

    let first = lines.iter().position(|l| !l.trim().is_empty());
    let last = lines.iter().rposition(|l| !l.trim().is_empty());
    let (first, last) = match (first, last) {
        (Some(f), Some(l)) => (f, l),
        _ => return Err(StackError::MalformedPatch("patch is empty".into())),
    };

    if lines[first].trim() != BEGIN_MARKER {
        return Err(StackError::MalformedPatch(format!(
            "expected '{BEGIN_MARKER}' on the first line"
        )));
    }
    if last == first || lines[last].trim() != END_MARKER {
        return Err(StackError::MalformedPatch(format!(
            "expected '{END_MARKER}' on the last line"
        )));
    }

    let mut hunks: Vec<Hunk> = Vec::new();
    for line in &lines[first + 1..last] {
        if let Some(rest) = line.strip_prefix(HUNK_MARKER) {
            hunks.push(Hunk {
                header: parse_header(rest),
                lines: Vec::new(),
            });
            continue;
        }

        let Some(hunk) = hunks.last_mut() else {
            if line.trim().is_empty() {
                continue;
            }
            return Err(StackError::MalformedPatch(format!(
                "line outside of a hunk: '{line}'"
            )));
        };

        if line.trim() == END_OF_FILE_MARKER {
            continue;
        }
        hunk.lines.push(classify(line));
    }

    // A trailing blank line before the end marker is formatting, not content.
    for hunk in &mut hunks {
        while matches!(hunk.lines.last(), Some(HunkLine::Context(t)) if t.trim().is_empty()) {
            hunk.lines.pop();
        }
    }

    Ok(Patch { hunks })
}

fn parse_header(rest: &str) -> Option<String> {
    let header = rest.trim();
    if header.is_empty() {
        None
    } else {
        Some(header.to_string())
    }
}

fn classify(line: &str) -> HunkLine {
    if let Some(t) = line.strip_prefix('+') {
        HunkLine::Insert(t.to_string())
    } else if let Some(t) = line.strip_prefix('-') {
        HunkLine::Delete(t.to_string())
    } else if let Some(t) = line.strip_prefix(' ') {
        HunkLine::Context(t.to_string())
    } else {
        // Untagged lines are lenient context.
        HunkLine::Context(line.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_header_and_tagged_lines() {
        let patch =
            parse("*** Begin Patch\n@@ # Plan\n (empty)\n-old\n+new\n*** End Patch\n").unwrap();
        assert_eq!(patch.hunks.len(), 1);
        let hunk = &patch.hunks[0];
        assert_eq!(hunk.header.as_deref(), Some("# Plan"));
        assert_eq!(
            hunk.lines,
            vec![
                HunkLine::Context("(empty)".into()),
                HunkLine::Delete("old".into()),
                HunkLine::Insert("new".into()),
            ]
        );
    }

    #[test]
    fn untagged_lines_are_context() {
        let patch = parse("*** Begin Patch\n@@\nanchor\n+added\n*** End Patch").unwrap();
        assert_eq!(patch.hunks[0].header, None);
        assert_eq!(patch.hunks[0].context(), vec!["anchor"]);
    }

    #[test]
    fn end_of_file_marker_is_ignored() {
        let patch =
            parse("*** Begin Patch\n@@ ## Notes\n+fact\n*** End of File\n*** End Patch\n").unwrap();
        assert_eq!(patch.hunks[0].lines, vec![HunkLine::Insert("fact".into())]);
    }

    #[test]
    fn multiple_hunks_keep_order() {
        let patch = parse(
            "*** Begin Patch\n@@ # A\n+one\n@@ # B\n+two\n*** End Patch\n",
        )
        .unwrap();
        let headers: Vec<_> = patch.hunks.iter().map(|h| h.header.clone()).collect();
        assert_eq!(headers, vec![Some("# A".into()), Some("# B".into())]);
    }

    #[test]
    fn missing_markers_are_malformed() {
        assert!(matches!(
            parse("@@ # Plan\n+x\n*** End Patch"),
            Err(StackError::MalformedPatch(_))
        ));
        assert!(matches!(
            parse("*** Begin Patch\n@@ # Plan\n+x\n"),
            Err(StackError::MalformedPatch(_))
        ));
        assert!(matches!(parse(""), Err(StackError::MalformedPatch(_))));
    }

    #[test]
    fn text_before_first_hunk_is_malformed() {
        let err = parse("*** Begin Patch\nstray\n@@\n+x\n*** End Patch").unwrap_err();
        assert!(err.to_string().contains("outside of a hunk"));
    }

    #[test]
    fn header_is_trimmed_on_both_sides() {
        let patch = parse("*** Begin Patch\n@@   # Other \t\n+x\n*** End Patch").unwrap();
        assert_eq!(patch.hunks[0].header.as_deref(), Some("# Other"));
    }

    #[test]
    fn crlf_input_is_accepted() {
        let patch = parse("*** Begin Patch\r\n@@ # Plan\r\n+x\r\n*** End Patch\r\n").unwrap();
        assert_eq!(patch.hunks[0].header.as_deref(), Some("# Plan"));
        assert_eq!(patch.hunks[0].inserts(), vec!["x"]);
    }
}
