use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use gilfoyle_core::{GilfoyleError, ReviewRunKey};
use gilfoyle_review::coordinator::{Admission, RunCoordinator};
use gilfoyle_review::pipeline::ReviewOrchestrator;
use serde::Serialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::validator::{classify, Classification};

/// Header GitLab uses to send the webhook secret.
pub const TOKEN_HEADER: &str = "X-Gitlab-Token";

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<ReviewOrchestrator>,
    pub webhook_secret: Arc<str>,
    pub bot_username: Arc<str>,
}

impl AppState {
    pub fn new(orchestrator: Arc<ReviewOrchestrator>, webhook_secret: &str, bot_username: &str) -> Self {
        Self {
            orchestrator,
            webhook_secret: Arc::from(webhook_secret),
            bot_username: Arc::from(bot_username),
        }
    }

    fn coordinator(&self) -> &Arc<RunCoordinator> {
        self.orchestrator.coordinator()
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub code: &'static str,
    pub message: String,
}

pub fn map_error(err: &GilfoyleError) -> (StatusCode, Json<ErrorEnvelope>) {
    let (status, code) = match err {
        GilfoyleError::Authentication(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
        GilfoyleError::MalformedPayload(_) => (StatusCode::BAD_REQUEST, "malformed_payload"),
        _ => (StatusCode::BAD_GATEWAY, "upstream_unavailable"),
    };
    (
        status,
        Json(ErrorEnvelope {
            code,
            message: err.to_string(),
        }),
    )
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/webhook/gitlab", post(gitlab_webhook))
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/runs", get(runs))
        .with_state(state)
}

async fn gitlab_webhook(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let token = headers.get(TOKEN_HEADER).and_then(|v| v.to_str().ok());
    let classification = match classify(&body, token, &state.webhook_secret, &state.bot_username) {
        Ok(classification) => classification,
        Err(err) => {
            tracing::warn!(error = %err, "webhook rejected");
            return map_error(&err).into_response();
        }
    };

    let (event, decision) = match classification {
        Classification::Event { event, decision } => (event, decision),
        Classification::Ignored { reason } => {
            tracing::debug!(%reason, "webhook ignored");
            return Json(json!({ "status": "ignored", "reason": reason })).into_response();
        }
    };
    if !decision.should_trigger {
        tracing::debug!(
            project_id = event.project_id,
            mr_iid = event.mr_iid,
            reason = %decision.reason,
            "event does not trigger a review"
        );
        return Json(json!({ "status": "ignored", "reason": decision.reason })).into_response();
    }

    let head_sha = match event.head_sha {
        Some(sha) => sha,
        None => match state
            .orchestrator
            .head_sha(event.project_id, event.mr_iid)
            .await
        {
            Ok(sha) => sha,
            Err(err) => {
                tracing::error!(
                    project_id = event.project_id,
                    mr_iid = event.mr_iid,
                    error = %err,
                    "could not resolve head revision"
                );
                return map_error(&err).into_response();
            }
        },
    };

    let key = ReviewRunKey::new(event.project_id, event.mr_iid, head_sha);
    match state.coordinator().admit(&key) {
        Admission::Admitted => {
            tracing::info!(key = %key, kind = ?event.kind, reason = %decision.reason, "review admitted");
            let orchestrator = Arc::clone(&state.orchestrator);
            let spawned_key = key.clone();
            tokio::spawn(async move {
                orchestrator.run(&spawned_key).await;
            });
            Json(json!({ "status": "accepted", "key": key.to_string() })).into_response()
        }
        Admission::Rejected(reason) => {
            tracing::info!(key = %key, %reason, "duplicate trigger skipped");
            Json(json!({ "status": "skipped", "reason": reason, "key": key.to_string() }))
                .into_response()
        }
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "app": "gilfoyle",
    }))
}

async fn ready() -> Json<serde_json::Value> {
    Json(json!({ "status": "ready" }))
}

async fn runs(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "runs": state.coordinator().snapshot() }))
}

/// Periodically evict expired entries from the run registry.
pub fn spawn_sweeper(coordinator: Arc<RunCoordinator>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let evicted = coordinator.sweep();
            if evicted > 0 {
                tracing::debug!(evicted, "swept expired review runs");
            }
        }
    })
}

/// Bind `addr` and serve until Ctrl-C.
///
/// # Errors
///
/// Returns [`GilfoyleError::Io`] if the listener cannot be bound.
pub async fn serve(state: AppState, addr: SocketAddr) -> Result<(), GilfoyleError> {
    let retention = state.coordinator().retention();
    let sweeper = spawn_sweeper(
        Arc::clone(state.coordinator()),
        (retention / 4).max(Duration::from_secs(1)),
    );

    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening for GitLab webhooks");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await?;

    sweeper.abort();
    Ok(())
}
