//! HTTP handlers for the control and liveness server

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::AppState;
use crate::channels::ChannelError;
use crate::metrics;
use crate::models::{ControlRequest, Origin, PeerId};

// ============================================================================
// API Types
// ============================================================================

/// Body of `POST /control`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlBody {
    pub issuer: PeerId,

    /// Defaults to a private message
    #[serde(default = "default_origin")]
    pub origin: Origin,

    pub text: String,
}

fn default_origin() -> Origin {
    Origin::Private
}

/// Response of `POST /control`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlResponse {
    /// First reply to the request, `None` when it was ignored or is still
    /// running
    pub reply: Option<String>,

    /// The request is still being processed (for example a restore waiting
    /// for its upload)
    #[serde(default)]
    pub pending: bool,
}

/// Body of `POST /control/attachments`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentBody {
    pub issuer: PeerId,

    /// The uploaded document, either as a JSON string or inline JSON
    pub document: Value,
}

/// Simple error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: message.into(),
        }
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
}

// ============================================================================
// Router
// ============================================================================

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(liveness))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .route("/control", post(submit_command))
        .route("/control/attachments", post(submit_attachment))
        .with_state(state)
}

// ============================================================================
// Handlers
// ============================================================================

async fn liveness() -> &'static str {
    "relaycast is running"
}

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

async fn metrics_handler() -> impl IntoResponse {
    match metrics::encode_metrics() {
        Ok(text) => (StatusCode::OK, text),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {e}"),
        ),
    }
}

async fn submit_command(
    State(state): State<AppState>,
    Json(body): Json<ControlBody>,
) -> impl IntoResponse {
    let request = ControlRequest::new(body.issuer, body.origin, body.text);
    let id = request.id;

    let rx = match state.mailbox.submit(request).await {
        Ok(rx) => rx,
        Err(e) => {
            tracing::warn!(error = %e, "Control request refused");
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorResponse::new(e.to_string())),
            )
                .into_response();
        }
    };

    match tokio::time::timeout(state.reply_timeout, rx).await {
        Ok(Ok(reply)) => Json(ControlResponse {
            reply: Some(reply),
            pending: false,
        })
        .into_response(),
        // Dismissed without a reply
        Ok(Err(_)) => Json(ControlResponse {
            reply: None,
            pending: false,
        })
        .into_response(),
        Err(_) => {
            state.mailbox.forget(&id);
            (
                StatusCode::ACCEPTED,
                Json(ControlResponse {
                    reply: None,
                    pending: true,
                }),
            )
                .into_response()
        }
    }
}

async fn submit_attachment(
    State(state): State<AppState>,
    Json(body): Json<AttachmentBody>,
) -> impl IntoResponse {
    let contents = match body.document {
        Value::String(text) => text.into_bytes(),
        other => match serde_json::to_vec(&other) {
            Ok(bytes) => bytes,
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(ErrorResponse::new(e.to_string())),
                )
                    .into_response()
            }
        },
    };

    match state.mailbox.attach(body.issuer, contents) {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e @ ChannelError::UnexpectedAttachment { .. }) => {
            tracing::info!(issuer = body.issuer, "Upload refused, no restore waiting");
            (StatusCode::CONFLICT, Json(ErrorResponse::new(e.to_string()))).into_response()
        }
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse::new(e.to_string())),
        )
            .into_response(),
    }
}
