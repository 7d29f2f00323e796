use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use gilfoyle_core::{Collaborator, DiffRefs, GilfoyleError, LinePosition, MergeRequest};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::ports::{GitLabApi, MergeRequestDiff};

/// Characters escaped in a file path used as a single URL segment.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.');

/// GitLab REST v4 client authenticated with a personal access token.
///
/// # Examples
///
/// ```
/// use gilfoyle_review::gitlab::GitLabClient;
///
/// let client = GitLabClient::new("https://gitlab.example.com/", "glpat-xxxx").unwrap();
/// assert_eq!(client.api_base(), "https://gitlab.example.com/api/v4");
/// ```
pub struct GitLabClient {
    http: reqwest::Client,
    api_base: String,
    token: String,
}

#[derive(Deserialize)]
struct RawMergeRequest {
    iid: u64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    source_branch: String,
    #[serde(default)]
    target_branch: String,
    #[serde(default)]
    author: Option<RawUser>,
    #[serde(default)]
    web_url: String,
}

#[derive(Deserialize)]
struct RawUser {
    username: String,
}

#[derive(Deserialize)]
struct RawChanges {
    #[serde(default)]
    changes: Vec<ChangeEntry>,
    diff_refs: Option<DiffRefs>,
}

#[derive(Deserialize)]
struct TreeEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
}

/// One element of the `changes` array of a merge request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChangeEntry {
    pub old_path: String,
    pub new_path: String,
    #[serde(default)]
    pub new_file: bool,
    #[serde(default)]
    pub renamed_file: bool,
    #[serde(default)]
    pub deleted_file: bool,
    /// Hunks only; GitLab omits the file headers.
    #[serde(default)]
    pub diff: String,
}

impl GitLabClient {
    /// Create a client for the instance at `url`.
    ///
    /// # Errors
    ///
    /// Returns [`GilfoyleError::Config`] if the HTTP client cannot be built.
    pub fn new(url: &str, token: &str) -> Result<Self, GilfoyleError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("gilfoyle/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| GilfoyleError::Config(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            http,
            api_base: format!("{}/api/v4", url.trim_end_matches('/')),
            token: token.to_string(),
        })
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    fn mr_url(&self, project_id: u64, mr_iid: u64) -> String {
        format!(
            "{}/projects/{project_id}/merge_requests/{mr_iid}",
            self.api_base
        )
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        what: &str,
    ) -> Result<reqwest::Response, GilfoyleError> {
        let response = request
            .header("PRIVATE-TOKEN", &self.token)
            .send()
            .await
            .map_err(|e| GilfoyleError::transport(Collaborator::GitLab, e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(GilfoyleError::NotFound {
                collaborator: Collaborator::GitLab,
                what: what.to_string(),
            });
        }
        let body = response.text().await.unwrap_or_default();
        Err(GilfoyleError::from_status(
            Collaborator::GitLab,
            status.as_u16(),
            &body,
        ))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        what: &str,
    ) -> Result<T, GilfoyleError> {
        self.send(request, what)
            .await?
            .json()
            .await
            .map_err(|e| GilfoyleError::PermanentCollaborator {
                collaborator: Collaborator::GitLab,
                message: format!("unexpected {what} response: {e}"),
            })
    }
}

#[async_trait]
impl GitLabApi for GitLabClient {
    async fn get_merge_request(
        &self,
        project_id: u64,
        mr_iid: u64,
    ) -> Result<MergeRequest, GilfoyleError> {
        let what = format!("merge request {project_id}!{mr_iid}");
        let raw: RawMergeRequest = self
            .get_json(self.http.get(self.mr_url(project_id, mr_iid)), &what)
            .await?;
        Ok(MergeRequest {
            iid: raw.iid,
            title: raw.title,
            description: raw.description.unwrap_or_default(),
            source_branch: raw.source_branch,
            target_branch: raw.target_branch,
            author: raw.author.map(|a| a.username).unwrap_or_default(),
            web_url: raw.web_url,
        })
    }

    async fn get_diff(
        &self,
        project_id: u64,
        mr_iid: u64,
    ) -> Result<MergeRequestDiff, GilfoyleError> {
        let what = format!("changes of {project_id}!{mr_iid}");
        let url = format!("{}/changes", self.mr_url(project_id, mr_iid));
        let raw: RawChanges = self.get_json(self.http.get(url), &what).await?;
        // GitLab computes diff_refs asynchronously after a push.
        let refs = raw
            .diff_refs
            .ok_or_else(|| GilfoyleError::TransientCollaborator {
                collaborator: Collaborator::GitLab,
                message: format!("diff_refs of {project_id}!{mr_iid} not computed yet"),
            })?;
        Ok(MergeRequestDiff {
            diff: assemble_unified_diff(&raw.changes),
            refs,
        })
    }

    async fn get_file_content(
        &self,
        project_id: u64,
        path: &str,
        git_ref: &str,
    ) -> Result<String, GilfoyleError> {
        let url = format!(
            "{}/projects/{project_id}/repository/files/{}/raw",
            self.api_base,
            utf8_percent_encode(path, PATH_SEGMENT)
        );
        self.send(self.http.get(url).query(&[("ref", git_ref)]), path)
            .await?
            .text()
            .await
            .map_err(|e| GilfoyleError::transport(Collaborator::GitLab, e))
    }

    async fn list_files(
        &self,
        project_id: u64,
        path: &str,
        git_ref: &str,
    ) -> Result<Vec<String>, GilfoyleError> {
        let url = format!("{}/projects/{project_id}/repository/tree", self.api_base);
        let request = self
            .http
            .get(url)
            .query(&[("path", path), ("ref", git_ref), ("per_page", "100")]);
        let entries: Vec<TreeEntry> = self.get_json(request, path).await?;
        Ok(entries
            .into_iter()
            .filter(|e| e.kind == "blob")
            .map(|e| e.path)
            .collect())
    }

    async fn post_summary_comment(
        &self,
        project_id: u64,
        mr_iid: u64,
        body: &str,
    ) -> Result<(), GilfoyleError> {
        let url = format!("{}/notes", self.mr_url(project_id, mr_iid));
        let what = format!("merge request {project_id}!{mr_iid}");
        self.send(self.http.post(url).json(&json!({ "body": body })), &what)
            .await?;
        tracing::info!(project_id, mr_iid, "posted summary note");
        Ok(())
    }

    async fn post_inline_comment(
        &self,
        project_id: u64,
        mr_iid: u64,
        body: &str,
        position: &LinePosition,
        refs: &DiffRefs,
    ) -> Result<(), GilfoyleError> {
        let url = format!("{}/discussions", self.mr_url(project_id, mr_iid));
        let what = format!("merge request {project_id}!{mr_iid}");
        let payload = json!({
            "body": body,
            "position": inline_position_payload(position, refs),
        });
        self.send(self.http.post(url).json(&payload), &what).await?;
        tracing::debug!(
            project_id,
            mr_iid,
            file = %position.file_path,
            line = position.line,
            "posted inline comment"
        );
        Ok(())
    }
}

/// Rebuild a unified diff from the per-file `changes` of a merge request.
///
/// # Examples
///
/// ```
/// use gilfoyle_review::gitlab::{assemble_unified_diff, ChangeEntry};
///
/// let diff = assemble_unified_diff(&[ChangeEntry {
///     old_path: "a.rs".into(),
///     new_path: "a.rs".into(),
///     diff: "@@ -1 +1 @@\n-x\n+y\n".into(),
///     ..Default::default()
/// }]);
/// assert!(diff.starts_with("diff --git a/a.rs b/a.rs\n--- a/a.rs\n+++ b/a.rs\n@@"));
/// ```
pub fn assemble_unified_diff(changes: &[ChangeEntry]) -> String {
    let mut out = String::new();
    for change in changes {
        out.push_str(&format!(
            "diff --git a/{} b/{}\n",
            change.old_path, change.new_path
        ));
        if change.new_file {
            out.push_str("new file mode 100644\n");
        } else if change.deleted_file {
            out.push_str("deleted file mode 100644\n");
        }
        if change.renamed_file {
            out.push_str(&format!(
                "rename from {}\nrename to {}\n",
                change.old_path, change.new_path
            ));
        }
        if change.diff.is_empty() {
            continue;
        }
        if change.new_file {
            out.push_str("--- /dev/null\n");
        } else {
            out.push_str(&format!("--- a/{}\n", change.old_path));
        }
        if change.deleted_file {
            out.push_str("+++ /dev/null\n");
        } else {
            out.push_str(&format!("+++ b/{}\n", change.new_path));
        }
        out.push_str(&change.diff);
        if !change.diff.ends_with('\n') {
            out.push('\n');
        }
    }
    out
}

/// The `position` object of a GitLab diff discussion.
///
/// Added lines carry only `new_line`, removed lines only `old_line`, and
/// unchanged context lines carry both.
pub fn inline_position_payload(position: &LinePosition, refs: &DiffRefs) -> Value {
    let mut payload = json!({
        "base_sha": refs.base_sha,
        "start_sha": refs.start_sha,
        "head_sha": refs.head_sha,
        "position_type": "text",
        "old_path": position.old_path(),
        "new_path": position.file_path,
    });
    let (old_line, new_line) = position.line_pair();
    if let Some(line) = old_line {
        payload["old_line"] = Value::from(line);
    }
    if let Some(line) = new_line {
        payload["new_line"] = Value::from(line);
    }
    payload
}

/// A write the dry-run wrapper held back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeldWrite {
    Summary {
        body: String,
    },
    Inline {
        body: String,
        position: LinePosition,
    },
}

/// [`GitLabApi`] that performs reads and records writes instead of posting.
pub struct DryRunGitLab<G> {
    inner: G,
    writes: Mutex<Vec<HeldWrite>>,
}

impl<G> DryRunGitLab<G> {
    pub fn new(inner: G) -> Self {
        Self {
            inner,
            writes: Mutex::new(Vec::new()),
        }
    }

    /// Drain the recorded writes in posting order.
    pub fn take_writes(&self) -> Vec<HeldWrite> {
        let mut writes = self.writes.lock().unwrap_or_else(|p| p.into_inner());
        std::mem::take(&mut *writes)
    }

    fn hold(&self, write: HeldWrite) {
        self.writes
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(write);
    }
}

#[async_trait]
impl<G: GitLabApi> GitLabApi for DryRunGitLab<G> {
    async fn get_merge_request(
        &self,
        project_id: u64,
        mr_iid: u64,
    ) -> Result<MergeRequest, GilfoyleError> {
        self.inner.get_merge_request(project_id, mr_iid).await
    }

    async fn get_diff(
        &self,
        project_id: u64,
        mr_iid: u64,
    ) -> Result<MergeRequestDiff, GilfoyleError> {
        self.inner.get_diff(project_id, mr_iid).await
    }

    async fn get_file_content(
        &self,
        project_id: u64,
        path: &str,
        git_ref: &str,
    ) -> Result<String, GilfoyleError> {
        self.inner.get_file_content(project_id, path, git_ref).await
    }

    async fn list_files(
        &self,
        project_id: u64,
        path: &str,
        git_ref: &str,
    ) -> Result<Vec<String>, GilfoyleError> {
        self.inner.list_files(project_id, path, git_ref).await
    }

    async fn post_summary_comment(
        &self,
        _project_id: u64,
        _mr_iid: u64,
        body: &str,
    ) -> Result<(), GilfoyleError> {
        self.hold(HeldWrite::Summary {
            body: body.to_string(),
        });
        Ok(())
    }

    async fn post_inline_comment(
        &self,
        _project_id: u64,
        _mr_iid: u64,
        body: &str,
        position: &LinePosition,
        _refs: &DiffRefs,
    ) -> Result<(), GilfoyleError> {
        self.hold(HeldWrite::Inline {
            body: body.to_string(),
            position: position.clone(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use gilfoyle_core::Side;
    use gilfoyle_difflens::{find_position, resolve};

    use super::*;

    fn refs() -> DiffRefs {
        DiffRefs {
            base_sha: "base".into(),
            start_sha: "start".into(),
            head_sha: "abc123".into(),
        }
    }

    fn position(line: u32, side: Side, paired: Option<u32>) -> LinePosition {
        LinePosition {
            file_path: "src/a.py".into(),
            line,
            side,
            old_path: None,
            paired_line: paired,
        }
    }

    #[test]
    fn added_line_payload_has_only_new_line() {
        let payload = inline_position_payload(&position(12, Side::New, None), &refs());
        assert_eq!(payload["base_sha"], "base");
        assert_eq!(payload["start_sha"], "start");
        assert_eq!(payload["head_sha"], "abc123");
        assert_eq!(payload["position_type"], "text");
        assert_eq!(payload["old_path"], "src/a.py");
        assert_eq!(payload["new_path"], "src/a.py");
        assert_eq!(payload["new_line"], 12);
        assert!(payload.get("old_line").is_none());
    }

    #[test]
    fn removed_line_payload_has_only_old_line() {
        let payload = inline_position_payload(&position(4, Side::Old, None), &refs());
        assert_eq!(payload["old_line"], 4);
        assert!(payload.get("new_line").is_none());
    }

    #[test]
    fn context_line_payload_has_both_lines() {
        let payload = inline_position_payload(&position(10, Side::New, Some(10)), &refs());
        assert_eq!(payload["old_line"], 10);
        assert_eq!(payload["new_line"], 10);
    }

    #[test]
    fn renamed_payload_uses_both_paths() {
        let mut pos = position(1, Side::New, None);
        pos.file_path = "src/util_io.py".into();
        pos.old_path = Some("src/util.py".into());
        let payload = inline_position_payload(&pos, &refs());
        assert_eq!(payload["old_path"], "src/util.py");
        assert_eq!(payload["new_path"], "src/util_io.py");
    }

    #[test]
    fn assembled_changes_parse_back() {
        let changes = vec![
            ChangeEntry {
                old_path: "src/a.py".into(),
                new_path: "src/a.py".into(),
                diff: "@@ -10,3 +10,4 @@\n a\n+b\n c\n d\n".into(),
                ..Default::default()
            },
            ChangeEntry {
                old_path: "NEWS".into(),
                new_path: "NEWS".into(),
                new_file: true,
                diff: "@@ -0,0 +1 @@\n+hello".into(),
                ..Default::default()
            },
            ChangeEntry {
                old_path: "old.txt".into(),
                new_path: "new.txt".into(),
                renamed_file: true,
                ..Default::default()
            },
        ];
        let diff = assemble_unified_diff(&changes);
        assert!(diff.contains("new file mode 100644\n--- /dev/null\n+++ b/NEWS\n"));
        assert!(diff.contains("rename from old.txt\nrename to new.txt\n"));

        let hunks = resolve(&diff).unwrap();
        let pos = find_position(&hunks, "src/a.py", 11, Side::New).unwrap();
        assert_eq!(pos.paired_line, None);
        assert!(find_position(&hunks, "NEWS", 1, Side::New).is_some());
    }

    #[test]
    fn api_base_trims_slash() {
        let client = GitLabClient::new("https://gitlab.example.com///", "t").unwrap();
        assert_eq!(client.api_base(), "https://gitlab.example.com/api/v4");
    }

    #[test]
    fn path_segment_encoding() {
        let encoded = utf8_percent_encode("docs/adr/001 use pg.md", PATH_SEGMENT).to_string();
        assert_eq!(encoded, "docs%2Fadr%2F001%20use%20pg.md");
    }

    struct ReadOnly;

    #[async_trait]
    impl GitLabApi for ReadOnly {
        async fn get_merge_request(&self, _: u64, mr_iid: u64) -> Result<MergeRequest, GilfoyleError> {
            Ok(MergeRequest {
                iid: mr_iid,
                ..Default::default()
            })
        }
        async fn get_diff(&self, _: u64, _: u64) -> Result<MergeRequestDiff, GilfoyleError> {
            Ok(MergeRequestDiff {
                diff: String::new(),
                refs: refs(),
            })
        }
        async fn get_file_content(&self, _: u64, path: &str, _: &str) -> Result<String, GilfoyleError> {
            Err(GilfoyleError::NotFound {
                collaborator: Collaborator::GitLab,
                what: path.into(),
            })
        }
        async fn list_files(&self, _: u64, _: &str, _: &str) -> Result<Vec<String>, GilfoyleError> {
            Ok(Vec::new())
        }
        async fn post_summary_comment(&self, _: u64, _: u64, _: &str) -> Result<(), GilfoyleError> {
            panic!("dry run must not post")
        }
        async fn post_inline_comment(
            &self,
            _: u64,
            _: u64,
            _: &str,
            _: &LinePosition,
            _: &DiffRefs,
        ) -> Result<(), GilfoyleError> {
            panic!("dry run must not post")
        }
    }

    #[tokio::test]
    async fn dry_run_records_writes_in_order() {
        let gitlab = DryRunGitLab::new(ReadOnly);
        assert_eq!(gitlab.get_merge_request(3, 7).await.unwrap().iid, 7);
        gitlab.post_summary_comment(3, 7, "summary").await.unwrap();
        gitlab
            .post_inline_comment(3, 7, "inline", &position(12, Side::New, None), &refs())
            .await
            .unwrap();
        let writes = gitlab.take_writes();
        assert_eq!(writes.len(), 2);
        assert!(matches!(&writes[0], HeldWrite::Summary { body } if body == "summary"));
        assert!(matches!(&writes[1], HeldWrite::Inline { position, .. } if position.line == 12));
        assert!(gitlab.take_writes().is_empty());
    }
}
