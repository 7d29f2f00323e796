use std::time::Duration;

use async_trait::async_trait;
use gilfoyle_core::{Collaborator, GilfoyleError, TaskDetail, TaskReference};
use serde_json::Value;

use crate::ports::TaskTracker;

/// Teamwork Projects client.
///
/// Authenticates with the API key as the basic-auth user and an empty
/// password.
pub struct TeamworkClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl TeamworkClient {
    /// # Errors
    ///
    /// Returns [`GilfoyleError::Config`] if the HTTP client cannot be built.
    pub fn new(url: &str, api_key: &str) -> Result<Self, GilfoyleError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| GilfoyleError::Config(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl TaskTracker for TeamworkClient {
    async fn get_task(&self, task: TaskReference) -> Result<TaskDetail, GilfoyleError> {
        let url = format!("{}/tasks/{}.json", self.base_url, task.0);
        let response = self
            .http
            .get(&url)
            .basic_auth(&self.api_key, Some(""))
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| GilfoyleError::transport(Collaborator::Teamwork, e))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(GilfoyleError::NotFound {
                collaborator: Collaborator::Teamwork,
                what: format!("task {task}"),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GilfoyleError::from_status(
                Collaborator::Teamwork,
                status.as_u16(),
                &body,
            ));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| GilfoyleError::transport(Collaborator::Teamwork, e))?;
        parse_task(task, &body)
    }
}

/// Map a `GET /tasks/{id}.json` body onto a [`TaskDetail`].
///
/// # Errors
///
/// Returns [`GilfoyleError::PermanentCollaborator`] when the body has no
/// `todo-item` object.
///
/// # Examples
///
/// ```
/// use gilfoyle_core::TaskReference;
/// use gilfoyle_review::teamwork::parse_task;
///
/// let body = serde_json::json!({
///     "todo-item": { "id": 42, "content": "Fix login", "status": "new" }
/// });
/// let task = parse_task(TaskReference(42), &body).unwrap();
/// assert_eq!(task.title, "Fix login");
/// assert_eq!(task.priority, None);
/// ```
pub fn parse_task(task: TaskReference, body: &Value) -> Result<TaskDetail, GilfoyleError> {
    let item = body
        .get("todo-item")
        .filter(|v| v.is_object())
        .ok_or_else(|| GilfoyleError::PermanentCollaborator {
            collaborator: Collaborator::Teamwork,
            message: format!("task {task}: response has no todo-item"),
        })?;

    let text = |key: &str| {
        item.get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let id = match item.get("id") {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    }
    .unwrap_or(task.0);

    let tags = item
        .get("tags")
        .and_then(Value::as_array)
        .map(|tags| {
            tags.iter()
                .filter_map(|t| t.get("name").and_then(Value::as_str))
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Ok(TaskDetail {
        id,
        title: text("content").unwrap_or_default(),
        description: text("description").unwrap_or_default(),
        status: text("status").unwrap_or_default(),
        priority: text("priority"),
        project: text("project-name"),
        responsible: text("responsible-party-names"),
        due_date: text("due-date"),
        tags,
    })
}
