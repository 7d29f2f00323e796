use gilfoyle_core::GilfoyleError;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// What kind of GitLab event a delivery carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A note on a merge request.
    Comment,
    MergeRequestUpdate,
}

/// A webhook delivery that passed authentication and names a merge request.
#[derive(Debug, Clone)]
pub struct WebhookEvent {
    pub kind: EventKind,
    pub project_id: u64,
    pub mr_iid: u64,
    /// Head revision when the payload carries one.
    pub head_sha: Option<String>,
    pub raw: Value,
}

/// Whether an event should start a review, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TriggerDecision {
    pub should_trigger: bool,
    pub reason: String,
}

impl TriggerDecision {
    fn trigger(reason: impl Into<String>) -> Self {
        Self {
            should_trigger: true,
            reason: reason.into(),
        }
    }

    fn skip(reason: impl Into<String>) -> Self {
        Self {
            should_trigger: false,
            reason: reason.into(),
        }
    }
}

/// Result of [`classify`].
#[derive(Debug, Clone)]
pub enum Classification {
    Event {
        event: WebhookEvent,
        decision: TriggerDecision,
    },
    /// Authentic but irrelevant delivery, such as a pipeline event.
    Ignored { reason: String },
}

/// Compare the `X-Gitlab-Token` header against the configured secret.
///
/// Both values are hashed first so the comparison time does not depend on
/// where, or whether, their lengths differ.
///
/// # Errors
///
/// Returns [`GilfoyleError::Authentication`] when the token is missing or wrong.
pub fn verify_token(token: Option<&str>, secret: &str) -> Result<(), GilfoyleError> {
    let Some(token) = token else {
        return Err(GilfoyleError::Authentication(
            "missing X-Gitlab-Token header".into(),
        ));
    };
    if secret.is_empty() || !constant_time_eq(&Sha256::digest(token), &Sha256::digest(secret)) {
        return Err(GilfoyleError::Authentication("invalid X-Gitlab-Token".into()));
    }
    Ok(())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |diff, (x, y)| diff | (x ^ y)) == 0
}

/// Authenticate and classify one GitLab webhook delivery.
///
/// The token is checked before the body is looked at. Notes trigger when
/// their text contains `@{bot_username}` (case-sensitive substring); merge
/// request events trigger when the bot is in the payload's final reviewer
/// set and the merge request is still open.
///
/// # Errors
///
/// [`GilfoyleError::Authentication`] for a bad token, and
/// [`GilfoyleError::MalformedPayload`] when required fields are missing.
///
/// # Examples
///
/// ```
/// use gilfoyle_webhook::validator::{classify, Classification};
///
/// let body = br#"{
///     "object_kind": "note",
///     "project": {"id": 3},
///     "object_attributes": {"note": "@gilfoyle please review", "noteable_type": "MergeRequest"},
///     "merge_request": {"iid": 7, "last_commit": {"id": "abc123"}}
/// }"#;
/// let Classification::Event { event, decision } =
///     classify(body, Some("s3cret"), "s3cret", "gilfoyle").unwrap()
/// else {
///     panic!("expected an event");
/// };
/// assert!(decision.should_trigger);
/// assert_eq!((event.project_id, event.mr_iid), (3, 7));
/// assert_eq!(event.head_sha.as_deref(), Some("abc123"));
/// ```
pub fn classify(
    raw: &[u8],
    token: Option<&str>,
    secret: &str,
    bot_username: &str,
) -> Result<Classification, GilfoyleError> {
    verify_token(token, secret)?;

    let payload: Value = serde_json::from_slice(raw)
        .map_err(|e| GilfoyleError::MalformedPayload(format!("body is not JSON: {e}")))?;
    if !payload.is_object() {
        return Err(malformed("body must be a JSON object"));
    }
    let kind = payload
        .get("object_kind")
        .and_then(Value::as_str)
        .ok_or_else(|| malformed("missing object_kind"))?
        .to_string();

    match kind.as_str() {
        "note" => classify_note(payload, bot_username),
        "merge_request" => classify_merge_request(payload, bot_username),
        other => Ok(Classification::Ignored {
            reason: format!("unsupported event type: {other}"),
        }),
    }
}

fn classify_note(payload: Value, bot_username: &str) -> Result<Classification, GilfoyleError> {
    let project_id = project_id(&payload)?;
    let attributes = payload
        .get("object_attributes")
        .ok_or_else(|| malformed("missing object_attributes"))?;
    let note = attributes
        .get("note")
        .and_then(Value::as_str)
        .ok_or_else(|| malformed("missing object_attributes.note"))?;

    if attributes.get("noteable_type").and_then(Value::as_str) != Some("MergeRequest") {
        return Ok(Classification::Ignored {
            reason: "note is not on a merge request".into(),
        });
    }
    let merge_request = payload
        .get("merge_request")
        .ok_or_else(|| malformed("missing merge_request for merge request note"))?;
    let mr_iid = merge_request
        .get("iid")
        .and_then(Value::as_u64)
        .ok_or_else(|| malformed("missing merge_request.iid"))?;

    let mention = format!("@{bot_username}");
    let decision = if note.contains(&mention) {
        TriggerDecision::trigger(format!("{mention} mentioned"))
    } else {
        TriggerDecision::skip(format!("{mention} not mentioned"))
    };
    let head_sha = last_commit(merge_request);

    Ok(Classification::Event {
        event: WebhookEvent {
            kind: EventKind::Comment,
            project_id,
            mr_iid,
            head_sha,
            raw: payload,
        },
        decision,
    })
}

fn classify_merge_request(
    payload: Value,
    bot_username: &str,
) -> Result<Classification, GilfoyleError> {
    let project_id = project_id(&payload)?;
    let attributes = payload
        .get("object_attributes")
        .ok_or_else(|| malformed("missing object_attributes"))?;
    let mr_iid = attributes
        .get("iid")
        .and_then(Value::as_u64)
        .ok_or_else(|| malformed("missing object_attributes.iid"))?;

    let state = attributes.get("state").and_then(Value::as_str);
    let decision = if matches!(state, Some("closed" | "merged")) {
        TriggerDecision::skip(format!("merge request is {}", state.unwrap_or_default()))
    } else if final_reviewers(&payload).any(|name| name == bot_username) {
        TriggerDecision::trigger(format!("{bot_username} is a reviewer"))
    } else {
        TriggerDecision::skip(format!("{bot_username} is not a reviewer"))
    };
    let head_sha = last_commit(attributes);

    Ok(Classification::Event {
        event: WebhookEvent {
            kind: EventKind::MergeRequestUpdate,
            project_id,
            mr_iid,
            head_sha,
            raw: payload,
        },
        decision,
    })
}

/// Usernames in the top-level `reviewers` array, or in
/// `changes.reviewers.current` when the former is absent.
fn final_reviewers(payload: &Value) -> impl Iterator<Item = &str> {
    payload
        .get("reviewers")
        .or_else(|| payload.pointer("/changes/reviewers/current"))
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|r| r.get("username").and_then(Value::as_str))
}

fn project_id(payload: &Value) -> Result<u64, GilfoyleError> {
    payload
        .pointer("/project/id")
        .and_then(Value::as_u64)
        .ok_or_else(|| malformed("missing project.id"))
}

fn last_commit(object: &Value) -> Option<String> {
    object
        .pointer("/last_commit/id")
        .and_then(Value::as_str)
        .filter(|sha| !sha.is_empty())
        .map(str::to_string)
}

fn malformed(message: &str) -> GilfoyleError {
    GilfoyleError::MalformedPayload(message.to_string())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    const SECRET: &str = "s3cret";

    fn note(text: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "object_kind": "note",
            "project": { "id": 3 },
            "object_attributes": { "note": text, "noteable_type": "MergeRequest" },
            "merge_request": { "iid": 7, "last_commit": { "id": "abc123" } }
        }))
        .unwrap()
    }

    fn mr_event(reviewers: Value, state: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "object_kind": "merge_request",
            "project": { "id": 3 },
            "object_attributes": {
                "iid": 7,
                "state": state,
                "last_commit": { "id": "abc123" }
            },
            "reviewers": reviewers
        }))
        .unwrap()
    }

    fn decision(body: &[u8]) -> TriggerDecision {
        match classify(body, Some(SECRET), SECRET, "gilfoyle").unwrap() {
            Classification::Event { decision, .. } => decision,
            Classification::Ignored { reason } => panic!("ignored: {reason}"),
        }
    }

    #[test]
    fn mention_triggers_and_its_absence_does_not() {
        assert!(decision(&note("@gilfoyle take a look")).should_trigger);
        assert!(!decision(&note("looks good to me")).should_trigger);
    }

    #[test]
    fn mention_is_case_sensitive_substring() {
        assert!(decision(&note("cc:@gilfoyle-bot")).should_trigger);
        assert!(!decision(&note("@Gilfoyle review")).should_trigger);
    }

    #[test]
    fn wrong_or_missing_token_is_rejected_before_parsing() {
        for token in [None, Some("nope"), Some(""), Some("s3cret ")] {
            let err = classify(b"not even json", token, SECRET, "gilfoyle").unwrap_err();
            assert!(matches!(err, GilfoyleError::Authentication(_)), "{token:?}");
        }
    }

    #[test]
    fn empty_secret_rejects_everything() {
        let err = classify(&note("@gilfoyle"), Some(""), "", "gilfoyle").unwrap_err();
        assert!(matches!(err, GilfoyleError::Authentication(_)));
    }

    #[test]
    fn malformed_payloads() {
        let cases: Vec<Vec<u8>> = vec![
            b"{".to_vec(),
            b"[1, 2]".to_vec(),
            br#"{"project": {"id": 3}}"#.to_vec(),
            br#"{"object_kind": "note", "object_attributes": {"note": "x"}}"#.to_vec(),
            br#"{"object_kind": "note", "project": {"id": 3}, "object_attributes": {"noteable_type": "MergeRequest"}}"#.to_vec(),
            br#"{"object_kind": "merge_request", "project": {"id": 3}, "object_attributes": {}}"#.to_vec(),
            br#"{"object_kind": "note", "project": {"id": 3}, "object_attributes": {"note": "@gilfoyle", "noteable_type": "MergeRequest"}}"#.to_vec(),
        ];
        for body in cases {
            let err = classify(&body, Some(SECRET), SECRET, "gilfoyle").unwrap_err();
            assert!(
                matches!(err, GilfoyleError::MalformedPayload(_)),
                "{}",
                String::from_utf8_lossy(&body)
            );
        }
    }

    #[test]
    fn unsupported_kinds_and_issue_notes_are_ignored() {
        let pipeline = br#"{"object_kind": "pipeline", "project": {"id": 3}}"#;
        assert!(matches!(
            classify(pipeline, Some(SECRET), SECRET, "gilfoyle").unwrap(),
            Classification::Ignored { .. }
        ));
        let issue_note = serde_json::to_vec(&json!({
            "object_kind": "note",
            "project": { "id": 3 },
            "object_attributes": { "note": "@gilfoyle", "noteable_type": "Issue" }
        }))
        .unwrap();
        assert!(matches!(
            classify(&issue_note, Some(SECRET), SECRET, "gilfoyle").unwrap(),
            Classification::Ignored { .. }
        ));
    }

    #[test]
    fn reviewer_in_final_set_triggers() {
        let body = mr_event(json!([{ "username": "dinesh" }, { "username": "gilfoyle" }]), "opened");
        assert!(decision(&body).should_trigger);
        let body = mr_event(json!([{ "username": "dinesh" }]), "opened");
        assert!(!decision(&body).should_trigger);
    }

    #[test]
    fn added_then_removed_in_same_payload_does_not_trigger() {
        let body = serde_json::to_vec(&json!({
            "object_kind": "merge_request",
            "project": { "id": 3 },
            "object_attributes": { "iid": 7, "state": "opened" },
            "reviewers": [],
            "changes": { "reviewers": {
                "previous": [],
                "current": [{ "username": "gilfoyle" }]
            }}
        }))
        .unwrap();
        assert!(!decision(&body).should_trigger);
    }

    #[test]
    fn changes_reviewers_used_when_top_level_absent() {
        let body = serde_json::to_vec(&json!({
            "object_kind": "merge_request",
            "project": { "id": 3 },
            "object_attributes": { "iid": 7 },
            "changes": { "reviewers": { "current": [{ "username": "gilfoyle" }] } }
        }))
        .unwrap();
        let Classification::Event { event, decision } =
            classify(&body, Some(SECRET), SECRET, "gilfoyle").unwrap()
        else {
            panic!("expected event");
        };
        assert!(decision.should_trigger);
        assert_eq!(event.kind, EventKind::MergeRequestUpdate);
        assert_eq!(event.head_sha, None);
    }

    #[test]
    fn closed_or_merged_never_triggers() {
        for state in ["closed", "merged"] {
            let body = mr_event(json!([{ "username": "gilfoyle" }]), state);
            let decision = decision(&body);
            assert!(!decision.should_trigger);
            assert!(decision.reason.contains(state));
        }
    }

    #[test]
    fn constant_time_eq_works() {
        assert!(constant_time_eq(b"hello", b"hello"));
        assert!(!constant_time_eq(b"hello", b"world"));
        assert!(!constant_time_eq(b"short", b"longer"));
    }
}
