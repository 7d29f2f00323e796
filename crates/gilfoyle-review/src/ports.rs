//! Contracts for the systems a review run depends on.

use async_trait::async_trait;
use gilfoyle_core::{
    DiffRefs, LinePosition, MergeRequest, Result, ReviewVerdict, TaskDetail, TaskReference,
};

use crate::tools::ReviewTools;

/// Diff text of a merge request together with the refs it was computed against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeRequestDiff {
    pub diff: String,
    pub refs: DiffRefs,
}

/// GitLab read and write operations used by a review run.
#[async_trait]
pub trait GitLabApi: Send + Sync {
    async fn get_merge_request(&self, project_id: u64, mr_iid: u64) -> Result<MergeRequest>;

    /// Unified diff of the merge request and its `diff_refs`.
    async fn get_diff(&self, project_id: u64, mr_iid: u64) -> Result<MergeRequestDiff>;

    /// Raw file content at `git_ref`. Missing files are `GilfoyleError::NotFound`.
    async fn get_file_content(&self, project_id: u64, path: &str, git_ref: &str)
        -> Result<String>;

    /// Paths of the files directly under `path` at `git_ref`.
    async fn list_files(&self, project_id: u64, path: &str, git_ref: &str) -> Result<Vec<String>>;

    async fn post_summary_comment(&self, project_id: u64, mr_iid: u64, body: &str) -> Result<()>;

    async fn post_inline_comment(
        &self,
        project_id: u64,
        mr_iid: u64,
        body: &str,
        position: &LinePosition,
        refs: &DiffRefs,
    ) -> Result<()>;
}

/// Task tracker lookups.
#[async_trait]
pub trait TaskTracker: Send + Sync {
    async fn get_task(&self, task: TaskReference) -> Result<TaskDetail>;
}

/// Everything the reasoner is handed up front.
#[derive(Debug, Clone, Default)]
pub struct ReviewContext {
    pub project_id: u64,
    pub merge_request: MergeRequest,
    /// Diff text, possibly truncated.
    pub diff: String,
    pub standards: Option<String>,
    /// Listing of architecture decision records.
    pub adrs: Option<String>,
    pub tasks: Vec<TaskDetail>,
}

/// Produces a verdict for a merge request, calling back into `tools` as needed.
#[async_trait]
pub trait Reasoner: Send + Sync {
    async fn review(&self, context: &ReviewContext, tools: &dyn ReviewTools)
        -> Result<ReviewVerdict>;
}
