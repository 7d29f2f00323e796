use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use gilfoyle_core::{
    extract_task_references, GilfoyleError, InlineComment, ReviewConfig, ReviewRunKey,
    ReviewVerdict, TaskDetail,
};
use gilfoyle_difflens::{find_position, resolve};
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::Instrument;

use crate::coordinator::{RunCoordinator, TerminalState};
use crate::ports::{GitLabApi, Reasoner, ReviewContext, TaskTracker};
use crate::prompt::truncate_diff;
use crate::retry::RetryPolicy;
use crate::summary::{format_partial_note, format_summary_comment, format_unplaced};
use crate::tools::{GitLabReviewTools, ReviewTools};

/// Statistics about a successful review run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub key: ReviewRunKey,
    /// Head revision the comments were anchored to. Differs from
    /// `key.head_sha` when the branch moved after the trigger.
    pub reviewed_sha: String,
    /// Verdict as posted; inline comments carry resolved positions.
    pub verdict: ReviewVerdict,
    pub inline_posted: usize,
    /// Inline comments that exhausted their retries.
    pub inline_failed: usize,
    /// Inline comments turned into general comments because their line is not in the diff.
    pub downgraded: usize,
    /// Non-fatal problems, such as task lookups that failed.
    pub warnings: Vec<String>,
}

/// Why a run ended without a posted review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    TransientCollaborator,
    PermanentCollaborator,
    Timeout,
    InvalidDiff,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::TransientCollaborator => write!(f, "transient_collaborator"),
            FailureReason::PermanentCollaborator => write!(f, "permanent_collaborator"),
            FailureReason::Timeout => write!(f, "timeout"),
            FailureReason::InvalidDiff => write!(f, "invalid_diff"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunFailure {
    pub reason: FailureReason,
    pub message: String,
}

impl From<GilfoyleError> for RunFailure {
    fn from(err: GilfoyleError) -> Self {
        let reason = match &err {
            GilfoyleError::TransientCollaborator { .. } => FailureReason::TransientCollaborator,
            GilfoyleError::Timeout(_) => FailureReason::Timeout,
            GilfoyleError::Parse(_) => FailureReason::InvalidDiff,
            _ => FailureReason::PermanentCollaborator,
        };
        Self {
            reason,
            message: err.to_string(),
        }
    }
}

/// Terminal result of [`ReviewOrchestrator::run`].
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Completed(RunReport),
    Failed(RunFailure),
}

impl RunOutcome {
    fn terminal_state(&self) -> TerminalState {
        match self {
            RunOutcome::Completed(_) => TerminalState::Completed,
            RunOutcome::Failed(_) => TerminalState::Failed,
        }
    }
}

/// Releases a run's registry slot as failed if the run is dropped, or
/// unwinds, before reporting an outcome.
struct SlotGuard<'a> {
    coordinator: &'a RunCoordinator,
    key: &'a ReviewRunKey,
    released: bool,
}

impl<'a> SlotGuard<'a> {
    fn new(coordinator: &'a RunCoordinator, key: &'a ReviewRunKey) -> Self {
        Self {
            coordinator,
            key,
            released: false,
        }
    }

    fn release(mut self, outcome: TerminalState) {
        self.released = true;
        self.coordinator.complete(self.key, outcome);
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        if !self.released {
            tracing::error!(key = %self.key, "review run aborted; releasing slot as failed");
            self.coordinator.complete(self.key, TerminalState::Failed);
        }
    }
}

/// Drives one review run from diff fetch to posted comments.
///
/// The orchestrator owns no per-run state; the run registry it reports to is
/// injected at construction and shared with whoever admits runs.
pub struct ReviewOrchestrator {
    gitlab: Arc<dyn GitLabApi>,
    tasks: Option<Arc<dyn TaskTracker>>,
    reasoner: Arc<dyn Reasoner>,
    coordinator: Arc<RunCoordinator>,
    permits: Arc<Semaphore>,
    retry: RetryPolicy,
    run_timeout: Duration,
    max_diff_lines: usize,
}

impl ReviewOrchestrator {
    pub fn new(
        gitlab: Arc<dyn GitLabApi>,
        reasoner: Arc<dyn Reasoner>,
        coordinator: Arc<RunCoordinator>,
        config: &ReviewConfig,
    ) -> Self {
        Self {
            gitlab,
            tasks: None,
            reasoner,
            coordinator,
            permits: Arc::new(Semaphore::new(config.max_concurrent_reviews.max(1))),
            retry: RetryPolicy::from_config(&config.retry),
            run_timeout: config.run_timeout(),
            max_diff_lines: config.max_diff_lines,
        }
    }

    /// Look up linked tasks through `tracker`.
    pub fn with_task_tracker(mut self, tracker: Arc<dyn TaskTracker>) -> Self {
        self.tasks = Some(tracker);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_run_timeout(mut self, run_timeout: Duration) -> Self {
        self.run_timeout = run_timeout;
        self
    }

    pub fn coordinator(&self) -> &Arc<RunCoordinator> {
        &self.coordinator
    }

    /// Current head revision of a merge request, read from its diff refs.
    ///
    /// # Errors
    ///
    /// Returns the GitLab error once retries are exhausted.
    pub async fn head_sha(&self, project_id: u64, mr_iid: u64) -> Result<String, GilfoyleError> {
        let gitlab = self.gitlab.as_ref();
        let diff = self
            .retry
            .run("get_diff", move || gitlab.get_diff(project_id, mr_iid))
            .await?;
        Ok(diff.refs.head_sha)
    }

    /// Execute an admitted run and release its slot.
    ///
    /// Never returns early without calling
    /// [`RunCoordinator::complete`] for `key`.
    pub async fn run(&self, key: &ReviewRunKey) -> RunOutcome {
        let span = tracing::info_span!("review_run", key = %key);
        let slot = SlotGuard::new(&self.coordinator, key);
        let outcome = self.run_limited(key).instrument(span.clone()).await;
        slot.release(outcome.terminal_state());

        if let RunOutcome::Completed(report) = &outcome {
            if report.reviewed_sha != key.head_sha {
                self.coordinator.record_completed(&ReviewRunKey::new(
                    key.project_id,
                    key.mr_iid,
                    report.reviewed_sha.clone(),
                ));
            }
        }

        span.in_scope(|| match &outcome {
            RunOutcome::Completed(report) => tracing::info!(
                assessment = %report.verdict.assessment,
                inline_posted = report.inline_posted,
                inline_failed = report.inline_failed,
                downgraded = report.downgraded,
                "review completed"
            ),
            RunOutcome::Failed(failure) => tracing::error!(
                reason = %failure.reason,
                message = %failure.message,
                "review failed"
            ),
        });
        outcome
    }

    async fn run_limited(&self, key: &ReviewRunKey) -> RunOutcome {
        let Ok(_permit) = self.permits.acquire().await else {
            return RunOutcome::Failed(RunFailure {
                reason: FailureReason::PermanentCollaborator,
                message: "review pool is shut down".into(),
            });
        };
        self.coordinator.start(key);
        tracing::info!("review started");

        match tokio::time::timeout(self.run_timeout, self.execute(key)).await {
            Ok(Ok(report)) => RunOutcome::Completed(report),
            Ok(Err(err)) => RunOutcome::Failed(err.into()),
            Err(_) => RunOutcome::Failed(GilfoyleError::Timeout(self.run_timeout).into()),
        }
    }

    async fn execute(&self, key: &ReviewRunKey) -> Result<RunReport, GilfoyleError> {
        let gitlab = self.gitlab.as_ref();
        let (project_id, mr_iid) = (key.project_id, key.mr_iid);

        let merge_request = self
            .retry
            .run("get_merge_request", move || {
                gitlab.get_merge_request(project_id, mr_iid)
            })
            .await?;
        let diff = self
            .retry
            .run("get_diff", move || gitlab.get_diff(project_id, mr_iid))
            .await?;
        if diff.refs.head_sha != key.head_sha {
            tracing::warn!(
                fetched = %diff.refs.head_sha,
                "head moved since the trigger; reviewing the fetched revision"
            );
        }

        let mut warnings = Vec::new();
        let tasks = self
            .snapshot_tasks(&merge_request.description, &mut warnings)
            .await;

        let hunks = resolve(&diff.diff)?;
        tracing::debug!(hunks = hunks.len(), "diff resolved");

        let tools = GitLabReviewTools::new(
            Arc::clone(&self.gitlab),
            project_id,
            merge_request.target_branch.clone(),
            tasks.clone(),
            self.retry.clone(),
        );
        let standards = tools.coding_standards().await;
        let adrs = tools.list_adrs().await;

        let context = ReviewContext {
            project_id,
            merge_request,
            diff: truncate_diff(&diff.diff, self.max_diff_lines),
            standards,
            adrs,
            tasks,
        };
        let reasoner = self.reasoner.as_ref();
        let (context_ref, tools_ref): (&ReviewContext, &dyn ReviewTools) = (&context, &tools);
        let mut verdict = self
            .retry
            .run("review", move || reasoner.review(context_ref, tools_ref))
            .await?;

        let requested = std::mem::take(&mut verdict.inline_comments);
        let mut downgraded = 0;
        for comment in requested {
            let position = &comment.position;
            match find_position(&hunks, &position.file_path, position.line, position.side) {
                Some(resolved) => verdict.inline_comments.push(InlineComment {
                    position: resolved,
                    ..comment
                }),
                None => {
                    tracing::warn!(
                        file = %position.file_path,
                        line = position.line,
                        side = %position.side,
                        "comment line not in diff, posting as general comment"
                    );
                    verdict.general_comments.push(format_unplaced(&comment));
                    downgraded += 1;
                }
            }
        }

        let refs = &diff.refs;
        let summary = format_summary_comment(&verdict, verdict.inline_comments.len());
        let summary_ref = summary.as_str();
        self.retry
            .run("post_summary_comment", move || {
                gitlab.post_summary_comment(project_id, mr_iid, summary_ref)
            })
            .await?;

        let mut inline_posted = 0;
        let mut inline_failed = 0;
        for comment in &verdict.inline_comments {
            let body = comment.body();
            let (body_ref, position) = (body.as_str(), &comment.position);
            let posted = self
                .retry
                .run("post_inline_comment", move || {
                    gitlab.post_inline_comment(project_id, mr_iid, body_ref, position, refs)
                })
                .await;
            match posted {
                Ok(()) => inline_posted += 1,
                Err(err) => {
                    tracing::warn!(
                        file = %position.file_path,
                        line = position.line,
                        error = %err,
                        "inline comment not posted"
                    );
                    inline_failed += 1;
                }
            }
        }

        if inline_failed > 0 {
            let note = format_partial_note(inline_failed, verdict.inline_comments.len());
            let note_ref = note.as_str();
            if let Err(err) = self
                .retry
                .run("post_partial_note", move || {
                    gitlab.post_summary_comment(project_id, mr_iid, note_ref)
                })
                .await
            {
                tracing::warn!(error = %err, "partial-review note not posted");
                warnings.push(format!("partial-review note not posted: {err}"));
            }
        }

        Ok(RunReport {
            key: key.clone(),
            reviewed_sha: diff.refs.head_sha.clone(),
            verdict,
            inline_posted,
            inline_failed,
            downgraded,
            warnings,
        })
    }

    /// Fetch every task referenced in `description`, once, before reasoning.
    async fn snapshot_tasks(&self, description: &str, warnings: &mut Vec<String>) -> Vec<TaskDetail> {
        let references = extract_task_references(description);
        if references.is_empty() {
            return Vec::new();
        }
        let Some(tracker) = self.tasks.as_deref() else {
            tracing::debug!(count = references.len(), "task tracker not configured");
            return Vec::new();
        };

        let mut tasks = Vec::with_capacity(references.len());
        for reference in references {
            match self
                .retry
                .run("get_task", move || tracker.get_task(reference))
                .await
            {
                Ok(task) => tasks.push(task),
                Err(err) => {
                    tracing::warn!(task = %reference, error = %err, "task lookup failed");
                    warnings.push(format!("task {reference}: {err}"));
                }
            }
        }
        tasks
    }
}

#[cfg(test)]
mod tests {
    use gilfoyle_core::Collaborator;

    use super::*;

    #[test]
    fn failure_reasons_follow_error_kind() {
        let transient = GilfoyleError::transport(Collaborator::Reasoner, "reset");
        assert_eq!(
            RunFailure::from(transient).reason,
            FailureReason::TransientCollaborator
        );
        let not_found = GilfoyleError::from_status(Collaborator::GitLab, 404, "mr");
        assert_eq!(
            RunFailure::from(not_found).reason,
            FailureReason::PermanentCollaborator
        );
        let timeout = GilfoyleError::Timeout(Duration::from_secs(1));
        assert_eq!(RunFailure::from(timeout).reason, FailureReason::Timeout);
        let parse = GilfoyleError::Parse("bad hunk".into());
        assert_eq!(RunFailure::from(parse).reason, FailureReason::InvalidDiff);
    }

    #[test]
    fn reasons_render_snake_case() {
        assert_eq!(
            FailureReason::TransientCollaborator.to_string(),
            "transient_collaborator"
        );
        assert_eq!(FailureReason::InvalidDiff.to_string(), "invalid_diff");
    }
}
