use std::fmt;
use std::time::Duration;

/// External system a review run talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collaborator {
    /// The GitLab REST API.
    GitLab,
    /// The Teamwork task tracker.
    Teamwork,
    /// The reasoning model that produces the verdict.
    Reasoner,
}

impl fmt::Display for Collaborator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Collaborator::GitLab => write!(f, "gitlab"),
            Collaborator::Teamwork => write!(f, "teamwork"),
            Collaborator::Reasoner => write!(f, "reasoner"),
        }
    }
}

/// Errors that can occur across the Gilfoyle service.
///
/// Library crates return this type directly; the binary reports it through
/// `miette` at the boundary.
///
/// # Examples
///
/// ```
/// use gilfoyle_core::{Collaborator, GilfoyleError};
///
/// let err = GilfoyleError::from_status(Collaborator::GitLab, 503, "unavailable");
/// assert!(err.is_transient());
///
/// let err = GilfoyleError::from_status(Collaborator::GitLab, 422, "bad position");
/// assert!(!err.is_transient());
/// ```
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum GilfoyleError {
    /// Webhook token did not match the configured secret.
    #[error("webhook authentication failed: {0}")]
    #[diagnostic(code(gilfoyle::authentication))]
    Authentication(String),

    /// Webhook body is not a usable GitLab event.
    #[error("malformed payload: {0}")]
    #[diagnostic(code(gilfoyle::malformed_payload))]
    MalformedPayload(String),

    /// Network failure, 5xx or rate limit from a collaborator. Retried.
    #[error("{collaborator} transient failure: {message}")]
    #[diagnostic(code(gilfoyle::transient))]
    TransientCollaborator {
        collaborator: Collaborator,
        message: String,
    },

    /// Non-retryable collaborator failure (4xx, bad response shape).
    #[error("{collaborator} request failed: {message}")]
    #[diagnostic(code(gilfoyle::permanent))]
    PermanentCollaborator {
        collaborator: Collaborator,
        message: String,
    },

    /// The collaborator answered 404.
    #[error("{collaborator}: {what} not found")]
    #[diagnostic(code(gilfoyle::not_found))]
    NotFound {
        collaborator: Collaborator,
        what: String,
    },

    /// The collaborator rejected our credentials.
    #[error("{collaborator} rejected credentials: {message}")]
    #[diagnostic(
        code(gilfoyle::collaborator_auth),
        help("check the token or API key configured for this service")
    )]
    CollaboratorAuth {
        collaborator: Collaborator,
        message: String,
    },

    /// A run exceeded its time budget.
    #[error("review run timed out after {}s", .0.as_secs())]
    #[diagnostic(code(gilfoyle::timeout))]
    Timeout(Duration),

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    #[diagnostic(code(gilfoyle::config), help("run `gilfoyle init` to create a template"))]
    Config(String),

    /// Unified diff could not be parsed.
    #[error("parse error: {0}")]
    #[diagnostic(code(gilfoyle::parse))]
    Parse(String),

    /// Filesystem I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML deserialization failure.
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl GilfoyleError {
    /// Classify a non-success HTTP status from `collaborator`.
    ///
    /// 5xx and 429 are transient, 401/403 are credential failures, 404 is
    /// not-found and any other status is permanent.
    pub fn from_status(collaborator: Collaborator, status: u16, body: &str) -> Self {
        let message = format!("HTTP {status}: {}", truncate(body, 300));
        match status {
            429 | 500..=599 => GilfoyleError::TransientCollaborator {
                collaborator,
                message,
            },
            401 | 403 => GilfoyleError::CollaboratorAuth {
                collaborator,
                message,
            },
            404 => GilfoyleError::NotFound {
                collaborator,
                what: truncate(body, 120).to_string(),
            },
            _ => GilfoyleError::PermanentCollaborator {
                collaborator,
                message,
            },
        }
    }

    /// Shorthand for a transport-level failure (connect, reset, timeout).
    pub fn transport(collaborator: Collaborator, err: impl fmt::Display) -> Self {
        GilfoyleError::TransientCollaborator {
            collaborator,
            message: err.to_string(),
        }
    }

    /// Returns `true` if retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, GilfoyleError::TransientCollaborator { .. })
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_converts() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: GilfoyleError = io_err.into();
        assert!(err.to_string().contains("gone"));
    }

    #[test]
    fn config_error_displays_message() {
        let err = GilfoyleError::Config("bad value".into());
        assert_eq!(err.to_string(), "configuration error: bad value");
    }

    #[test]
    fn status_classification() {
        let c = Collaborator::Teamwork;
        assert!(GilfoyleError::from_status(c, 500, "").is_transient());
        assert!(GilfoyleError::from_status(c, 502, "").is_transient());
        assert!(GilfoyleError::from_status(c, 429, "slow down").is_transient());
        assert!(matches!(
            GilfoyleError::from_status(c, 401, ""),
            GilfoyleError::CollaboratorAuth { .. }
        ));
        assert!(matches!(
            GilfoyleError::from_status(c, 403, ""),
            GilfoyleError::CollaboratorAuth { .. }
        ));
        assert!(matches!(
            GilfoyleError::from_status(c, 404, "task 9"),
            GilfoyleError::NotFound { .. }
        ));
        assert!(matches!(
            GilfoyleError::from_status(c, 400, ""),
            GilfoyleError::PermanentCollaborator { .. }
        ));
    }

    #[test]
    fn only_transient_variant_is_retryable() {
        assert!(GilfoyleError::transport(Collaborator::Reasoner, "reset").is_transient());
        assert!(!GilfoyleError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(!GilfoyleError::Authentication("x".into()).is_transient());
        assert!(!GilfoyleError::Parse("x".into()).is_transient());
    }

    #[test]
    fn long_bodies_are_truncated() {
        let body = "x".repeat(5000);
        let err = GilfoyleError::from_status(Collaborator::GitLab, 500, &body);
        assert!(err.to_string().len() < 400);
    }

    #[test]
    fn collaborator_named_in_message() {
        let err = GilfoyleError::from_status(Collaborator::GitLab, 422, "line_code invalid");
        assert_eq!(
            err.to_string(),
            "gitlab request failed: HTTP 422: line_code invalid"
        );
    }
}
