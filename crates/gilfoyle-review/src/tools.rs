use std::sync::Arc;

use async_trait::async_trait;
use gilfoyle_core::{GilfoyleError, TaskDetail};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::OnceCell;

use crate::ports::GitLabApi;
use crate::retry::RetryPolicy;

/// Files checked, in order, for the project's coding standards.
pub const STANDARDS_FILES: &[&str] = &[
    "docs/CODING_STANDARDS.md",
    "docs/coding-standards.md",
    "docs/STYLE_GUIDE.md",
    "docs/style-guide.md",
    "CONTRIBUTING.md",
    ".github/CONTRIBUTING.md",
    "docs/CONTRIBUTING.md",
];

/// Directories checked, in order, for architecture decision records.
pub const ADR_DIRS: &[&str] = &["docs/adr", "docs/ADR", "adr", "ADR", "docs/decisions"];

/// A tool invocation requested by the reasoner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCall {
    GetCodingStandards,
    /// Details of one linked task, or of all of them when `task_id` is `None`.
    GetTaskContext {
        task_id: Option<u64>,
    },
    ListAdrs,
    GetAdr {
        name: String,
    },
}

#[derive(Deserialize)]
struct TaskArgs {
    task_id: Option<Value>,
}

#[derive(Deserialize)]
struct AdrArgs {
    name: String,
}

impl ToolCall {
    /// Parse a tool name and its JSON arguments.
    ///
    /// # Errors
    ///
    /// Returns a message suitable for sending back to the model when the name
    /// is unknown or the arguments do not fit.
    ///
    /// # Examples
    ///
    /// ```
    /// use gilfoyle_review::tools::ToolCall;
    ///
    /// let call = ToolCall::parse("get_adr", r#"{"name": "001-use-postgres.md"}"#).unwrap();
    /// assert_eq!(call, ToolCall::GetAdr { name: "001-use-postgres.md".into() });
    ///
    /// assert!(ToolCall::parse("rm_rf", "{}").is_err());
    /// ```
    pub fn parse(name: &str, arguments: &str) -> Result<Self, String> {
        let args = if arguments.trim().is_empty() {
            "{}"
        } else {
            arguments
        };
        match name {
            "get_coding_standards" => Ok(ToolCall::GetCodingStandards),
            "list_adrs" => Ok(ToolCall::ListAdrs),
            "get_task_context" => {
                let parsed: TaskArgs = serde_json::from_str(args)
                    .map_err(|e| format!("invalid arguments for {name}: {e}"))?;
                let task_id = match parsed.task_id {
                    None | Some(Value::Null) => None,
                    Some(Value::Number(n)) => n.as_u64(),
                    Some(Value::String(s)) => s.trim().trim_start_matches("TW-").parse().ok(),
                    Some(other) => return Err(format!("invalid task_id: {other}")),
                };
                Ok(ToolCall::GetTaskContext { task_id })
            }
            "get_adr" => {
                let parsed: AdrArgs = serde_json::from_str(args)
                    .map_err(|e| format!("invalid arguments for {name}: {e}"))?;
                Ok(ToolCall::GetAdr { name: parsed.name })
            }
            other => Err(format!("unknown tool: {other}")),
        }
    }
}

/// OpenAI-style function definitions for every [`ToolCall`].
pub fn definitions() -> Value {
    let function = |name: &str, description: &str, parameters: Value| {
        json!({
            "type": "function",
            "function": {
                "name": name,
                "description": description,
                "parameters": parameters,
            }
        })
    };
    let no_params = json!({ "type": "object", "properties": {} });
    json!([
        function(
            "get_coding_standards",
            "Read the project's coding standards document from the target branch.",
            no_params.clone(),
        ),
        function(
            "get_task_context",
            "Get details of the Teamwork tasks linked from the merge request.",
            json!({
                "type": "object",
                "properties": {
                    "task_id": {
                        "type": "integer",
                        "description": "A single task id; omit for all linked tasks"
                    }
                }
            }),
        ),
        function(
            "list_adrs",
            "List the architecture decision records in the repository.",
            no_params,
        ),
        function(
            "get_adr",
            "Read one architecture decision record by file name.",
            json!({
                "type": "object",
                "properties": {
                    "name": { "type": "string", "description": "e.g. 001-use-postgres.md" }
                },
                "required": ["name"]
            }),
        ),
    ])
}

/// The fixed capability set offered to the reasoner during a review.
#[async_trait]
pub trait ReviewTools: Send + Sync {
    /// Coding standards, prefixed with the file they came from.
    async fn coding_standards(&self) -> Option<String>;

    /// Formatted task details.
    async fn task_context(&self, task_id: Option<u64>) -> Option<String>;

    /// Listing of ADR file names.
    async fn list_adrs(&self) -> Option<String>;

    async fn adr(&self, name: &str) -> Option<String>;
}

/// Execute `call` and render the result as the text returned to the model.
pub async fn dispatch(tools: &dyn ReviewTools, call: &ToolCall) -> String {
    match call {
        ToolCall::GetCodingStandards => tools
            .coding_standards()
            .await
            .unwrap_or_else(|| "No coding standards document found in the repository.".into()),
        ToolCall::GetTaskContext { task_id } => {
            tools.task_context(*task_id).await.unwrap_or_else(|| match task_id {
                Some(id) => format!("Task {id} is not linked from this merge request."),
                None => "No Teamwork tasks are linked from this merge request.".into(),
            })
        }
        ToolCall::ListAdrs => tools
            .list_adrs()
            .await
            .unwrap_or_else(|| "No ADR directory found in the repository.".into()),
        ToolCall::GetAdr { name } => tools
            .adr(name)
            .await
            .unwrap_or_else(|| format!("ADR not found: {name}")),
    }
}

/// [`ReviewTools`] backed by GitLab reads on the merge request's target branch.
///
/// Task details are a snapshot taken before the reasoner runs. Standards and
/// the ADR listing are looked up once and reused.
pub struct GitLabReviewTools {
    gitlab: Arc<dyn GitLabApi>,
    project_id: u64,
    git_ref: String,
    tasks: Vec<TaskDetail>,
    retry: RetryPolicy,
    standards: OnceCell<Option<String>>,
    adr_index: OnceCell<Option<(String, Vec<String>)>>,
}

impl GitLabReviewTools {
    pub fn new(
        gitlab: Arc<dyn GitLabApi>,
        project_id: u64,
        git_ref: impl Into<String>,
        tasks: Vec<TaskDetail>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            gitlab,
            project_id,
            git_ref: git_ref.into(),
            tasks,
            retry,
            standards: OnceCell::new(),
            adr_index: OnceCell::new(),
        }
    }

    /// File content, or `None` when missing or unreadable.
    async fn read(&self, path: &str) -> Option<String> {
        let result = self
            .retry
            .run("get_file_content", || {
                self.gitlab
                    .get_file_content(self.project_id, path, &self.git_ref)
            })
            .await;
        match result {
            Ok(content) => Some(content),
            Err(GilfoyleError::NotFound { .. }) => None,
            Err(err) => {
                tracing::warn!(path, error = %err, "could not read repository file");
                None
            }
        }
    }

    async fn find_adrs(&self) -> Option<(String, Vec<String>)> {
        for dir in ADR_DIRS {
            let listing = self
                .retry
                .run("list_files", || {
                    self.gitlab.list_files(self.project_id, dir, &self.git_ref)
                })
                .await;
            let paths = match listing {
                Ok(paths) => paths,
                Err(GilfoyleError::NotFound { .. }) => continue,
                Err(err) => {
                    tracing::warn!(dir, error = %err, "could not list ADR directory");
                    continue;
                }
            };
            let names: Vec<String> = paths
                .iter()
                .filter_map(|p| p.rsplit('/').next())
                .filter(|name| name.ends_with(".md"))
                .map(str::to_string)
                .collect();
            if !names.is_empty() {
                return Some((dir.to_string(), names));
            }
        }
        None
    }
}

#[async_trait]
impl ReviewTools for GitLabReviewTools {
    async fn coding_standards(&self) -> Option<String> {
        self.standards
            .get_or_init(|| async move {
                for path in STANDARDS_FILES {
                    if let Some(content) = self.read(path).await {
                        return Some(format!("# Coding Standards from {path}\n\n{content}"));
                    }
                }
                None
            })
            .await
            .clone()
    }

    async fn task_context(&self, task_id: Option<u64>) -> Option<String> {
        let selected: Vec<&TaskDetail> = self
            .tasks
            .iter()
            .filter(|t| task_id.is_none_or(|id| t.id == id))
            .collect();
        if selected.is_empty() {
            return None;
        }
        Some(
            selected
                .iter()
                .map(|t| t.format_context())
                .collect::<Vec<_>>()
                .join("\n"),
        )
    }

    async fn list_adrs(&self) -> Option<String> {
        let (dir, names) = self
            .adr_index
            .get_or_init(|| self.find_adrs())
            .await
            .as_ref()?;
        let mut out = format!("## ADRs found in {dir}/\n\n");
        for name in names {
            out.push_str(&format!("- {name}\n"));
        }
        out.push_str("\nUse get_adr(name) to read a specific ADR.");
        Some(out)
    }

    async fn adr(&self, name: &str) -> Option<String> {
        if name.is_empty() || name.contains('/') || name.contains("..") {
            return None;
        }
        if let Some((dir, _)) = self.adr_index.get_or_init(|| self.find_adrs()).await {
            if let Some(content) = self.read(&format!("{dir}/{name}")).await {
                return Some(content);
            }
        }
        for dir in ADR_DIRS {
            if let Some(content) = self.read(&format!("{dir}/{name}")).await {
                return Some(content);
            }
        }
        None
    }
}
