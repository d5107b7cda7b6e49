//! Receiver for identity provider events.
//!
//! Each accepted event names a tenant, which is pushed to the tenant
//! controller as an out-of-band reconcile trigger.

use std::sync::Arc;

use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

pub const EVENTS_PATH: &str = "/tenant-webhook";
/// Buffered triggers before new events are dropped.
pub const TRIGGER_CAPACITY: usize = 10;

const REQUIRED_ACTION: &str = "access.CUSTOM_REQUIRED_ACTION";
const USER_UPDATE: &str = "admin.USER-UPDATE";

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum EventError {
    #[error("malformed event: {0}")]
    Malformed(String),
    #[error("event without username")]
    MissingUsername,
    #[error("unsupported event type {0:?}")]
    Unsupported(String),
}

impl IntoResponse for EventError {
    fn into_response(self) -> Response {
        (StatusCode::BAD_REQUEST, self.to_string()).into_response()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdpEvent {
    #[serde(rename = "type", default)]
    kind: String,
    auth_details: Option<AuthDetails>,
    /// JSON document encoded as a string
    representation: Option<String>,
}

#[derive(Deserialize)]
struct AuthDetails {
    #[serde(default)]
    username: String,
}

#[derive(Deserialize)]
struct UserRepresentation {
    #[serde(default)]
    username: String,
}

/// Extracts the tenant name an event refers to.
pub fn parse_event(body: &[u8]) -> Result<String, EventError> {
    let ev: IdpEvent =
        serde_json::from_slice(body).map_err(|e| EventError::Malformed(e.to_string()))?;
    let username = match ev.kind.as_str() {
        REQUIRED_ACTION => ev.auth_details.map(|a| a.username).unwrap_or_default(),
        USER_UPDATE => {
            let raw = ev.representation.unwrap_or_default();
            let user: UserRepresentation = serde_json::from_str(&raw)
                .map_err(|e| EventError::Malformed(format!("representation: {e}")))?;
            user.username
        }
        other => return Err(EventError::Unsupported(other.to_string())),
    };
    if username.is_empty() {
        return Err(EventError::MissingUsername);
    }
    Ok(username)
}

pub struct EventState {
    pub triggers: mpsc::Sender<String>,
}

async fn handle_event(
    State(state): State<Arc<EventState>>,
    body: Bytes,
) -> Result<StatusCode, EventError> {
    let tenant = parse_event(&body).inspect_err(|e| debug!(error = %e, "event rejected"))?;
    match state.triggers.try_send(tenant.clone()) {
        Ok(()) => info!(%tenant, "reconcile triggered by identity event"),
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!(%tenant, "trigger queue full, event dropped")
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            warn!(%tenant, "tenant controller gone, event dropped")
        }
    }
    Ok(StatusCode::OK)
}

pub fn router(state: Arc<EventState>) -> Router {
    Router::new()
        .route(EVENTS_PATH, post(handle_event))
        .route("/health", get(|| async { "ok" }))
        .route("/healthz", get(|| async { "ok" }))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
