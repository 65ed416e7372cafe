//! Control and liveness HTTP server
//!
//! | Method | Path                   | Purpose                              |
//! |--------|------------------------|--------------------------------------|
//! | GET    | `/`                    | Static liveness text                 |
//! | GET    | `/health`              | JSON health with uptime              |
//! | GET    | `/metrics`             | Prometheus text format               |
//! | POST   | `/control`             | Submit a command, wait for the reply |
//! | POST   | `/control/attachments` | Upload a document for `!restore`     |

pub mod api;

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use axum::Router;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

use crate::channels::MailboxHandle;

pub use api::{create_router, AttachmentBody, ControlBody, ControlResponse};

// ============================================================================
// App State
// ============================================================================

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    /// Producer side of the control mailbox
    pub mailbox: MailboxHandle,

    /// How long `/control` waits for the first reply
    pub reply_timeout: Duration,

    /// Server start time
    pub start_time: Instant,
}

// ============================================================================
// Control Server
// ============================================================================

pub struct ControlServer {
    bind_address: SocketAddr,
    state: AppState,
}

impl ControlServer {
    pub fn new(bind_address: SocketAddr, mailbox: MailboxHandle, reply_timeout: Duration) -> Self {
        Self {
            bind_address,
            state: AppState {
                mailbox,
                reply_timeout,
                start_time: Instant::now(),
            },
        }
    }

    /// Build the router with all routes
    pub fn build_router(&self) -> Router {
        create_router(self.state.clone()).layer(TraceLayer::new_for_http())
    }

    /// Serve until `shutdown` flips to `true`
    pub async fn serve(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), ServerError> {
        let router = self.build_router();

        let listener = tokio::net::TcpListener::bind(self.bind_address)
            .await
            .map_err(|e| ServerError::BindError(e.to_string()))?;

        tracing::info!(address = %self.bind_address, "HTTP server listening");

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                while !*shutdown.borrow() {
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                }
            })
            .await
            .map_err(|e| ServerError::ServeError(e.to_string()))?;

        tracing::info!("HTTP server shutdown complete");
        Ok(())
    }
}

// ============================================================================
// Server Errors
// ============================================================================

/// Server errors
#[derive(Debug, Clone)]
pub enum ServerError {
    /// Failed to bind to address
    BindError(String),

    /// Server error
    ServeError(String),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BindError(msg) => write!(f, "Failed to bind: {}", msg),
            Self::ServeError(msg) => write!(f, "Server error: {}", msg),
        }
    }
}

impl std::error::Error for ServerError {}
