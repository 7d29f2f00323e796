use std::fmt;

use gilfoyle_core::GilfoyleError;
use serde::Serialize;

const DEV_NULL: &str = "/dev/null";

/// Kind of a line inside a hunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LineKind {
    /// Unchanged line, present on both sides.
    Context,
    /// Line only in the new version.
    Added,
    /// Line only in the old version.
    Removed,
}

impl LineKind {
    fn marker(self) -> char {
        match self {
            LineKind::Context => ' ',
            LineKind::Added => '+',
            LineKind::Removed => '-',
        }
    }
}

/// One line of a hunk with the line numbers it occupies on each side.
///
/// Added lines have no `old_line`, removed lines have no `new_line`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffLine {
    pub kind: LineKind,
    pub old_line: Option<u32>,
    pub new_line: Option<u32>,
    /// Line content without the leading marker.
    pub text: String,
}

impl fmt::Display for DiffLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let num = |n: Option<u32>| n.map(|n| n.to_string()).unwrap_or_default();
        write!(
            f,
            "{:>5} {:>5} {}{}",
            num(self.old_line),
            num(self.new_line),
            self.kind.marker(),
            self.text
        )
    }
}

/// A contiguous block of changes in one file.
///
/// # Examples
///
/// ```
/// use gilfoyle_difflens::parser::{parse_unified_diff, LineKind};
///
/// let diff = "--- a/app.py\n+++ b/app.py\n@@ -3,2 +3,3 @@\n x = 1\n+y = 2\n z = 3\n";
/// let files = parse_unified_diff(diff).unwrap();
/// let hunk = &files[0].hunks[0];
/// assert_eq!(hunk.file_path, "app.py");
/// assert_eq!(hunk.lines[1].kind, LineKind::Added);
/// assert_eq!(hunk.lines[1].new_line, Some(4));
/// assert_eq!(hunk.lines[1].old_line, None);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileHunk {
    /// Path used to address the file: the new path, or the old one for deletions.
    pub file_path: String,
    /// Pre-change path. Differs from `file_path` only for renames.
    pub old_path: String,
    pub old_start: u32,
    pub old_lines: u32,
    pub new_start: u32,
    pub new_lines: u32,
    pub lines: Vec<DiffLine>,
}

/// A complete diff for a single file, containing zero or more hunks.
///
/// # Examples
///
/// ```
/// use gilfoyle_difflens::parser::parse_unified_diff;
///
/// let diff = concat!(
///     "diff --git a/lib/old.rb b/lib/new.rb\n",
///     "rename from lib/old.rb\n",
///     "rename to lib/new.rb\n",
///     "--- a/lib/old.rb\n",
///     "+++ b/lib/new.rb\n",
///     "@@ -4,1 +4,1 @@\n",
///     "-  VERSION = 1\n",
///     "+  VERSION = 2\n",
/// );
/// let files = parse_unified_diff(diff).unwrap();
/// assert!(files[0].is_rename);
/// assert_eq!(files[0].display_path(), "lib/new.rb");
/// assert_eq!(files[0].hunks[0].old_path, "lib/old.rb");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDiff {
    /// Path in the old version (`/dev/null` for new files).
    pub old_path: String,
    /// Path in the new version (`/dev/null` for deleted files).
    pub new_path: String,
    pub hunks: Vec<FileHunk>,
    pub is_new_file: bool,
    pub is_deleted_file: bool,
    pub is_rename: bool,
}

impl FileDiff {
    fn empty() -> Self {
        Self {
            old_path: String::new(),
            new_path: String::new(),
            hunks: Vec::new(),
            is_new_file: false,
            is_deleted_file: false,
            is_rename: false,
        }
    }

    /// Path used to address lines of this file.
    pub fn display_path(&self) -> &str {
        if self.is_deleted_file || self.new_path == DEV_NULL || self.new_path.is_empty() {
            &self.old_path
        } else {
            &self.new_path
        }
    }

    fn addressing_paths(&self) -> (String, String) {
        let file_path = self.display_path().to_string();
        let old_path = if self.old_path.is_empty() || self.old_path == DEV_NULL {
            file_path.clone()
        } else {
            self.old_path.clone()
        };
        (file_path, old_path)
    }
}

impl fmt::Display for FileDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} hunks)", self.display_path(), self.hunks.len())
    }
}

/// A hunk still receiving body lines, with the next line number on each
/// side and how many lines each side is still owed.
struct OpenHunk {
    hunk: FileHunk,
    old_next: u32,
    new_next: u32,
    old_left: u32,
    new_left: u32,
}

impl OpenHunk {
    fn is_full(&self) -> bool {
        self.old_left == 0 && self.new_left == 0
    }

    fn push(&mut self, kind: LineKind, text: &str, lineno: usize) -> Result<(), GilfoyleError> {
        let (old_line, new_line) = match kind {
            LineKind::Context if self.old_left > 0 && self.new_left > 0 => {
                self.old_left -= 1;
                self.new_left -= 1;
                (Some(self.old_next), Some(self.new_next))
            }
            LineKind::Added if self.new_left > 0 => {
                self.new_left -= 1;
                (None, Some(self.new_next))
            }
            LineKind::Removed if self.old_left > 0 => {
                self.old_left -= 1;
                (Some(self.old_next), None)
            }
            _ => {
                return Err(GilfoyleError::Parse(format!(
                    "line {lineno}: hunk for {} at -{},{} +{},{} has more lines than its header declares",
                    self.hunk.file_path,
                    self.hunk.old_start,
                    self.hunk.old_lines,
                    self.hunk.new_start,
                    self.hunk.new_lines
                )))
            }
        };
        // parse_range guarantees every numbered line fits in u32; only the
        // position after the final line can overflow.
        if old_line.is_some() {
            self.old_next = self.old_next.saturating_add(1);
        }
        if new_line.is_some() {
            self.new_next = self.new_next.saturating_add(1);
        }
        self.hunk.lines.push(DiffLine {
            kind,
            old_line,
            new_line,
            text: text.to_string(),
        });
        Ok(())
    }
}

/// Parse a unified diff string (as produced by `git diff`) into structured [`FileDiff`] entries.
///
/// Handles new, deleted, renamed and binary files (binary files are skipped),
/// patches without a `diff --git` line, and the header-less hunks GitLab
/// returns once wrapped in `---`/`+++` lines. Line numbers restart from each
/// `@@ -a,b +c,d @@` header. A hunk that ends before its declared counts is
/// accepted as-is; a hunk with more lines than declared is an error.
///
/// # Errors
///
/// Returns [`GilfoyleError::Parse`] if a hunk header is malformed, a hunk
/// appears before any file header, or a hunk overruns its declared counts.
///
/// # Examples
///
/// ```
/// use gilfoyle_difflens::parser::parse_unified_diff;
///
/// let files = parse_unified_diff("").unwrap();
/// assert!(files.is_empty());
/// ```
pub fn parse_unified_diff(input: &str) -> Result<Vec<FileDiff>, GilfoyleError> {
    let mut files: Vec<FileDiff> = Vec::new();
    let mut current: Option<FileDiff> = None;
    let mut open: Option<OpenHunk> = None;
    let mut is_binary = false;

    for (idx, line) in input.lines().enumerate() {
        let lineno = idx + 1;

        if let Some(hunk) = open.as_mut() {
            if let Some((kind, text)) = body_line(line) {
                hunk.push(kind, text, lineno)?;
                if hunk.is_full() {
                    flush_hunk(&mut current, &mut open);
                }
                continue;
            }
            if line.starts_with('\\') {
                continue;
            }
            // Short hunk: the header promised more lines than arrived.
            flush_hunk(&mut current, &mut open);
        }

        if let Some(rest) = line.strip_prefix("diff --git ") {
            flush_file(&mut files, &mut current, is_binary);
            is_binary = false;
            let mut file = FileDiff::empty();
            if let Some((old, new)) = parse_git_header(rest) {
                file.old_path = old;
                file.new_path = new;
            }
            current = Some(file);
            continue;
        }

        // A `---` line with no current file, or after a file that already has
        // hunks, starts a new file in patches lacking `diff --git` lines.
        if line.starts_with("--- ") && current.as_ref().is_none_or(|f| !f.hunks.is_empty()) {
            flush_file(&mut files, &mut current, is_binary);
            is_binary = false;
            current = Some(FileDiff::empty());
        }

        if line.starts_with("@@ ") {
            let Some(file) = current.as_ref() else {
                return Err(GilfoyleError::Parse(format!(
                    "line {lineno}: hunk header before any file header"
                )));
            };
            let (old_start, old_lines, new_start, new_lines) = parse_hunk_header(line)?;
            let (file_path, old_path) = file.addressing_paths();
            let hunk = OpenHunk {
                hunk: FileHunk {
                    file_path,
                    old_path,
                    old_start,
                    old_lines,
                    new_start,
                    new_lines,
                    lines: Vec::new(),
                },
                old_next: old_start,
                new_next: new_start,
                old_left: old_lines,
                new_left: new_lines,
            };
            if hunk.is_full() {
                if let Some(file) = current.as_mut() {
                    file.hunks.push(hunk.hunk);
                }
            } else {
                open = Some(hunk);
            }
            continue;
        }

        let Some(file) = current.as_mut() else {
            continue;
        };

        if line.starts_with("Binary files ") && line.ends_with(" differ") {
            is_binary = true;
            continue;
        }

        if line.starts_with("new file mode") {
            file.is_new_file = true;
            file.old_path = DEV_NULL.into();
            continue;
        }

        if line.starts_with("deleted file mode") {
            file.is_deleted_file = true;
            continue;
        }

        if let Some(path) = line.strip_prefix("rename from ") {
            file.is_rename = true;
            file.old_path = unquote(path).to_string();
            continue;
        }

        if let Some(path) = line.strip_prefix("rename to ") {
            file.is_rename = true;
            file.new_path = unquote(path).to_string();
            continue;
        }

        if let Some(path) = line.strip_prefix("--- ") {
            file.old_path = parse_path(path);
            if file.old_path == DEV_NULL {
                file.is_new_file = true;
            }
            continue;
        }

        if let Some(path) = line.strip_prefix("+++ ") {
            file.new_path = parse_path(path);
            if file.new_path == DEV_NULL {
                file.is_deleted_file = true;
            }
            continue;
        }

        if !file.hunks.is_empty() && body_line(line).is_some_and(|_| !line.is_empty()) {
            return Err(GilfoyleError::Parse(format!(
                "line {lineno}: content after hunk for {} ended",
                file.display_path()
            )));
        }
    }

    flush_hunk(&mut current, &mut open);
    flush_file(&mut files, &mut current, is_binary);

    Ok(files)
}

/// Parse `diff` and return every hunk in file order.
///
/// # Errors
///
/// Same as [`parse_unified_diff`].
pub fn resolve(input: &str) -> Result<Vec<FileHunk>, GilfoyleError> {
    Ok(parse_unified_diff(input)?
        .into_iter()
        .flat_map(|file| file.hunks)
        .collect())
}

fn body_line(line: &str) -> Option<(LineKind, &str)> {
    if line.is_empty() {
        // Editors and mail clients strip the lone space of empty context lines.
        return Some((LineKind::Context, ""));
    }
    let mut chars = line.chars();
    let kind = match chars.next()? {
        ' ' => LineKind::Context,
        '+' => LineKind::Added,
        '-' => LineKind::Removed,
        _ => return None,
    };
    Some((kind, chars.as_str()))
}

fn flush_hunk(current: &mut Option<FileDiff>, open: &mut Option<OpenHunk>) {
    if let Some(h) = open.take() {
        if let Some(file) = current.as_mut() {
            file.hunks.push(h.hunk);
        }
    }
}

fn flush_file(files: &mut Vec<FileDiff>, current: &mut Option<FileDiff>, is_binary: bool) {
    if let Some(file) = current.take() {
        if !is_binary {
            files.push(file);
        }
    }
}

fn unquote(raw: &str) -> &str {
    raw.trim_matches('"')
}

fn parse_path(raw: &str) -> String {
    // git appends a tab and timestamp in some modes
    let raw = raw.split('\t').next().unwrap_or(raw);
    let normalized = unquote(raw);

    if normalized == DEV_NULL {
        return DEV_NULL.into();
    }

    normalized
        .strip_prefix("a/")
        .or_else(|| normalized.strip_prefix("b/"))
        .unwrap_or(normalized)
        .to_string()
}

fn parse_git_header(rest: &str) -> Option<(String, String)> {
    let rest = rest.trim();
    if rest.starts_with('"') {
        let mut parts = rest.split("\" \"");
        let old = parts.next()?;
        let new = parts.next()?;
        return Some((parse_path(old), parse_path(new)));
    }
    let split = rest.rfind(" b/")?;
    Some((parse_path(&rest[..split]), parse_path(&rest[split + 1..])))
}

fn parse_hunk_header(line: &str) -> Result<(u32, u32, u32, u32), GilfoyleError> {
    let inner = line
        .strip_prefix("@@ ")
        .and_then(|s| {
            let end = s.find(" @@")?;
            Some(&s[..end])
        })
        .ok_or_else(|| GilfoyleError::Parse(format!("invalid hunk header: {line}")))?;

    let parts: Vec<&str> = inner.split(' ').collect();
    if parts.len() != 2 {
        return Err(GilfoyleError::Parse(format!("invalid hunk header: {line}")));
    }

    let old = parts[0]
        .strip_prefix('-')
        .ok_or_else(|| GilfoyleError::Parse(format!("invalid old range in hunk: {line}")))?;
    let new = parts[1]
        .strip_prefix('+')
        .ok_or_else(|| GilfoyleError::Parse(format!("invalid new range in hunk: {line}")))?;

    let (old_start, old_lines) = parse_range(old, line)?;
    let (new_start, new_lines) = parse_range(new, line)?;

    Ok((old_start, old_lines, new_start, new_lines))
}

fn parse_range(range: &str, context: &str) -> Result<(u32, u32), GilfoyleError> {
    let number = |s: &str, what: &str| {
        s.parse::<u32>()
            .map_err(|_| GilfoyleError::Parse(format!("invalid range {what} in: {context}")))
    };
    let (start, count) = match range.split_once(',') {
        Some((start, count)) => (number(start, "number")?, number(count, "count")?),
        None => (number(range, "number")?, 1),
    };
    if count > 0 && start.checked_add(count - 1).is_none() {
        return Err(GilfoyleError::Parse(format!(
            "range {range} runs past the largest line number in: {context}"
        )));
    }
    Ok((start, count))
}
