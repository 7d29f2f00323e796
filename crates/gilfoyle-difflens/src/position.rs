use gilfoyle_core::{LinePosition, Side};

use crate::parser::{FileHunk, LineKind};

/// Look up the diff line that `(file_path, line, side)` refers to.
///
/// Only exact matches count: the line must be present in a parsed hunk of
/// that file on the requested side. Old-side lookups on a renamed file also
/// accept the pre-rename path. Returns `None` for anything else, which
/// callers treat as unplaceable.
///
/// # Examples
///
/// ```
/// use gilfoyle_core::Side;
/// use gilfoyle_difflens::{find_position, parser::resolve};
///
/// let hunks = resolve("--- a/a.py\n+++ b/a.py\n@@ -11,1 +11,2 @@\n x\n+y\n").unwrap();
///
/// let pos = find_position(&hunks, "a.py", 12, Side::New).unwrap();
/// assert_eq!(pos.line, 12);
/// assert_eq!(pos.paired_line, None);
///
/// // context line: both sides are reported
/// let ctx = find_position(&hunks, "a.py", 11, Side::Old).unwrap();
/// assert_eq!(ctx.paired_line, Some(11));
///
/// assert!(find_position(&hunks, "a.py", 13, Side::New).is_none());
/// ```
pub fn find_position(
    hunks: &[FileHunk],
    file_path: &str,
    line: u32,
    side: Side,
) -> Option<LinePosition> {
    hunks
        .iter()
        .filter(|h| {
            h.file_path == file_path || (side == Side::Old && h.old_path == file_path)
        })
        .find_map(|hunk| {
            let found = hunk.lines.iter().find(|l| match side {
                Side::New => l.new_line == Some(line),
                Side::Old => l.old_line == Some(line),
            })?;
            let paired_line = match (found.kind, side) {
                (LineKind::Context, Side::New) => found.old_line,
                (LineKind::Context, Side::Old) => found.new_line,
                _ => None,
            };
            Some(LinePosition {
                file_path: hunk.file_path.clone(),
                line,
                side,
                old_path: (hunk.old_path != hunk.file_path).then(|| hunk.old_path.clone()),
                paired_line,
            })
        })
}

/// Files touched by `hunks`, in first-seen order without repeats.
pub fn changed_paths(hunks: &[FileHunk]) -> Vec<&str> {
    let mut paths: Vec<&str> = Vec::new();
    for hunk in hunks {
        if !paths.contains(&hunk.file_path.as_str()) {
            paths.push(&hunk.file_path);
        }
    }
    paths
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::resolve;

    const TWO_HUNKS: &str = "\
diff --git a/src/app.py b/src/app.py
--- a/src/app.py
+++ b/src/app.py
@@ -1,3 +1,4 @@
 import os
+import sys

 def main():
@@ -20,4 +21,3 @@ def main():
     a = 1
-    b = 2
     c = 3
     return a
";

    #[test]
    fn second_hunk_uses_its_own_header() {
        let hunks = resolve(TWO_HUNKS).unwrap();
        // removed `b = 2` is old line 21; new side continues 21,22,23
        let removed = find_position(&hunks, "src/app.py", 21, Side::Old).unwrap();
        assert_eq!(removed.paired_line, None);
        let ctx = find_position(&hunks, "src/app.py", 22, Side::New).unwrap();
        assert_eq!(ctx.paired_line, Some(22));
        assert!(find_position(&hunks, "src/app.py", 24, Side::New).is_none());
    }

    #[test]
    fn lines_between_hunks_are_unplaceable() {
        let hunks = resolve(TWO_HUNKS).unwrap();
        for line in 5..=20 {
            assert!(find_position(&hunks, "src/app.py", line, Side::New).is_none());
        }
    }

    #[test]
    fn new_side_numbering_skips_removed_lines() {
        let hunks = resolve(TWO_HUNKS).unwrap();
        let new21 = find_position(&hunks, "src/app.py", 21, Side::New).unwrap();
        // new line 21 is the context line `a = 1`, old 20
        assert_eq!(new21.paired_line, Some(20));
    }

    #[test]
    fn unknown_file_is_unplaceable() {
        let hunks = resolve(TWO_HUNKS).unwrap();
        assert!(find_position(&hunks, "src/other.py", 2, Side::New).is_none());
        assert!(find_position(&hunks, "app.py", 2, Side::New).is_none());
    }

    #[test]
    fn renamed_file_lookup() {
        let diff = "\
diff --git a/old.rs b/new.rs
rename from old.rs
rename to new.rs
--- a/old.rs
+++ b/new.rs
@@ -3,2 +3,2 @@
-let a = 1;
+let a = 2;
 done();
";
        let hunks = resolve(diff).unwrap();
        let pos = find_position(&hunks, "old.rs", 3, Side::Old).unwrap();
        assert_eq!(pos.file_path, "new.rs");
        assert_eq!(pos.old_path.as_deref(), Some("old.rs"));
        assert!(find_position(&hunks, "old.rs", 3, Side::New).is_none());
        let new_pos = find_position(&hunks, "new.rs", 3, Side::New).unwrap();
        assert_eq!(new_pos.old_path.as_deref(), Some("old.rs"));
    }

    #[test]
    fn changed_paths_dedups() {
        let hunks = resolve(TWO_HUNKS).unwrap();
        assert_eq!(changed_paths(&hunks), vec!["src/app.py"]);
    }
}
