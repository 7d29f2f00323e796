use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Severity attached to an inline review comment.
///
/// # Examples
///
/// ```
/// use gilfoyle_core::Severity;
///
/// let s: Severity = serde_json::from_str("\"warning\"").unwrap();
/// assert_eq!(s, Severity::Warning);
/// assert_eq!(s.prefix(), "**[WARNING]** :warning:");
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational observation.
    Info,
    /// An optional improvement.
    #[default]
    Suggestion,
    /// A potential issue worth investigating.
    Warning,
    /// A defect that should be fixed before merging.
    Error,
}

impl Severity {
    /// Markdown tag prepended to inline comment bodies.
    pub fn prefix(self) -> &'static str {
        match self {
            Severity::Info => "**[INFO]**",
            Severity::Suggestion => "**[SUGGESTION]**",
            Severity::Warning => "**[WARNING]** :warning:",
            Severity::Error => "**[ERROR]** :x:",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Suggestion => write!(f, "suggestion"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "suggestion" => Ok(Severity::Suggestion),
            "warning" => Ok(Severity::Warning),
            "error" => Ok(Severity::Error),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

/// Which side of a diff a line number refers to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// The pre-change file (removed and context lines).
    Old,
    /// The post-change file (added and context lines).
    #[default]
    New,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Old => write!(f, "old"),
            Side::New => write!(f, "new"),
        }
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "old" => Ok(Side::Old),
            "new" => Ok(Side::New),
            other => Err(format!("unknown diff side: {other}")),
        }
    }
}

/// A line that exists in a parsed diff and can carry an inline comment.
///
/// Positions that get posted come from `gilfoyle_difflens::find_position`,
/// never from the reasoner directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinePosition {
    /// Path of the file on the side being addressed.
    pub file_path: String,
    /// Line number on `side`.
    pub line: u32,
    /// Side of the diff `line` refers to.
    pub side: Side,
    /// Pre-change path when the file was renamed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_path: Option<String>,
    /// Line number on the opposite side, set for unchanged context lines.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paired_line: Option<u32>,
}

impl LinePosition {
    /// The `(old_line, new_line)` pair GitLab expects for this position.
    ///
    /// # Examples
    ///
    /// ```
    /// use gilfoyle_core::{LinePosition, Side};
    ///
    /// let added = LinePosition {
    ///     file_path: "src/a.py".into(),
    ///     line: 12,
    ///     side: Side::New,
    ///     old_path: None,
    ///     paired_line: None,
    /// };
    /// assert_eq!(added.line_pair(), (None, Some(12)));
    ///
    /// let context = LinePosition { paired_line: Some(11), ..added };
    /// assert_eq!(context.line_pair(), (Some(11), Some(12)));
    /// ```
    pub fn line_pair(&self) -> (Option<u32>, Option<u32>) {
        match self.side {
            Side::New => (self.paired_line, Some(self.line)),
            Side::Old => (Some(self.line), self.paired_line),
        }
    }

    /// Pre-change path, falling back to `file_path` when not renamed.
    pub fn old_path(&self) -> &str {
        self.old_path.as_deref().unwrap_or(&self.file_path)
    }
}

/// The revision triple GitLab requires to anchor an inline comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffRefs {
    pub base_sha: String,
    pub start_sha: String,
    pub head_sha: String,
}

/// Identity of one review run: a merge request at one head revision.
///
/// # Examples
///
/// ```
/// use gilfoyle_core::ReviewRunKey;
///
/// let key = ReviewRunKey::new(3, 7, "abc123");
/// assert_eq!(key.to_string(), "3!7@abc123");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRunKey {
    pub project_id: u64,
    pub mr_iid: u64,
    pub head_sha: String,
}

impl ReviewRunKey {
    pub fn new(project_id: u64, mr_iid: u64, head_sha: impl Into<String>) -> Self {
        Self {
            project_id,
            mr_iid,
            head_sha: head_sha.into(),
        }
    }
}

impl fmt::Display for ReviewRunKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}!{}@{}", self.project_id, self.mr_iid, self.head_sha)
    }
}

/// Overall assessment of a merge request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Assessment {
    Approved,
    #[default]
    NeedsChanges,
    NeedsDiscussion,
}

impl Assessment {
    /// Heading marker used in the summary comment.
    pub fn marker(self) -> &'static str {
        match self {
            Assessment::Approved => ":white_check_mark:",
            Assessment::NeedsChanges => ":x:",
            Assessment::NeedsDiscussion => ":speech_balloon:",
        }
    }

    /// Human label, e.g. `"Needs Changes"`.
    pub fn label(self) -> &'static str {
        match self {
            Assessment::Approved => "Approved",
            Assessment::NeedsChanges => "Needs Changes",
            Assessment::NeedsDiscussion => "Needs Discussion",
        }
    }
}

impl fmt::Display for Assessment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Assessment::Approved => write!(f, "approved"),
            Assessment::NeedsChanges => write!(f, "needs_changes"),
            Assessment::NeedsDiscussion => write!(f, "needs_discussion"),
        }
    }
}

/// A comment the reasoner wants attached to a specific diff line.
///
/// The position is what the reasoner asked for; it has not yet been checked
/// against the parsed diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineComment {
    pub position: LinePosition,
    pub severity: Severity,
    pub text: String,
}

impl InlineComment {
    /// Comment body with its severity tag.
    pub fn body(&self) -> String {
        format!("{} {}", self.severity.prefix(), self.text)
    }
}

/// Structured result of one reasoning pass over a merge request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewVerdict {
    pub summary: String,
    pub assessment: Assessment,
    #[serde(default)]
    pub inline_comments: Vec<InlineComment>,
    #[serde(default)]
    pub general_comments: Vec<String>,
    /// Coding-standard sections the reasoner cited.
    #[serde(default)]
    pub referenced_standards: Vec<String>,
    #[serde(default)]
    pub task_context_used: bool,
}

/// A Teamwork task id found in free text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskReference(pub u64);

impl fmt::Display for TaskReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Task details fetched from Teamwork.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDetail {
    pub id: u64,
    pub title: String,
    pub description: String,
    pub status: String,
    pub priority: Option<String>,
    pub project: Option<String>,
    pub responsible: Option<String>,
    pub due_date: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl TaskDetail {
    /// Render the task as a Markdown block for the reasoner.
    ///
    /// # Examples
    ///
    /// ```
    /// use gilfoyle_core::TaskDetail;
    ///
    /// let task = TaskDetail {
    ///     id: 42,
    ///     title: "Add login".into(),
    ///     status: "in progress".into(),
    ///     ..Default::default()
    /// };
    /// let md = task.format_context();
    /// assert!(md.starts_with("## Task #42: Add login"));
    /// assert!(md.contains("**Status:** in progress"));
    /// ```
    pub fn format_context(&self) -> String {
        let mut out = format!("## Task #{}: {}\n\n", self.id, self.title);
        out.push_str(&format!("**Status:** {}\n", self.status));
        if let Some(priority) = &self.priority {
            out.push_str(&format!("**Priority:** {priority}\n"));
        }
        if let Some(project) = &self.project {
            out.push_str(&format!("**Project:** {project}\n"));
        }
        if let Some(responsible) = &self.responsible {
            out.push_str(&format!("**Assigned to:** {responsible}\n"));
        }
        if let Some(due) = &self.due_date {
            out.push_str(&format!("**Due:** {due}\n"));
        }
        if !self.tags.is_empty() {
            out.push_str(&format!("**Tags:** {}\n", self.tags.join(", ")));
        }
        if !self.description.trim().is_empty() {
            out.push_str("\n### Description\n\n");
            out.push_str(self.description.trim());
            out.push('\n');
        }
        out
    }
}

/// Merge request metadata used to build review context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeRequest {
    pub iid: u64,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub source_branch: String,
    pub target_branch: String,
    pub author: String,
    #[serde(default)]
    pub web_url: String,
}

/// Output format for CLI subcommands.
///
/// Implements [`FromStr`] so it can be used directly with `clap` argument parsing.
///
/// # Examples
///
/// ```
/// use gilfoyle_core::OutputFormat;
///
/// let fmt: OutputFormat = "json".parse().unwrap();
/// assert_eq!(fmt, OutputFormat::Json);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable listing.
    #[default]
    Text,
    /// Machine-readable JSON with camelCase keys.
    Json,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            other => Err(format!("unknown output format: {other}")),
        }
    }
}
