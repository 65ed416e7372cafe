//! Collaborators the scheduler talks to
//!
//! The scheduler never speaks a messaging protocol itself. It consumes three
//! seams, each an `async_trait`:
//!
//! - [`MessageSource`] - enumerates forwardable content
//! - [`Transport`] - forwards an item to a destination and lists groups
//! - [`ControlChannel`] - delivers administrative requests and carries replies
//!
//! [`Outbound`] is the small "send something to a user" capability the
//! control side needs for notices and snapshot documents.
//!
//! Concrete implementations:
//!
//! - [`gateway::GatewayClient`] - HTTP bridge to the messaging network
//! - [`mailbox::Mailbox`] - in-process control channel fed by the HTTP server

pub mod gateway;
pub mod mailbox;

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::models::{ContentItem, ControlRequest, PeerId};

pub use gateway::{GatewayClient, GatewayConfig};
pub use mailbox::{Mailbox, MailboxHandle};

/// Result type for channel operations
pub type ChannelResult<T> = Result<T, ChannelError>;

/// Errors that can occur while talking to a collaborator
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Invalid channel configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Remote side refused the operation
    #[error("Rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    /// Channel temporarily unavailable
    #[error("Channel temporarily unavailable: {0}")]
    Unavailable(String),

    /// Channel is closed for good
    #[error("Channel closed")]
    Closed,

    /// An attachment arrived while no restore from its sender was waiting
    #[error("No restore is waiting for an upload from {from}")]
    UnexpectedAttachment { from: PeerId },

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl ChannelError {
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::HttpError(_) | Self::Unavailable(_) => true,
            Self::Rejected { status, .. } => *status == 429 || *status >= 500,
            Self::InvalidConfig(_)
            | Self::Closed
            | Self::UnexpectedAttachment { .. }
            | Self::SerializationError(_) => false,
        }
    }
}

/// Source of forwardable content
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Fetch up to `limit` items, newest first. May return fewer.
    async fn fetch(&self, limit: usize) -> ChannelResult<Vec<ContentItem>>;
}

/// Delivery side of the messaging network
#[async_trait]
pub trait Transport: Send + Sync {
    /// Forward `item` to `destination`. No retry happens inside.
    async fn deliver(&self, destination: PeerId, item: &ContentItem) -> ChannelResult<()>;

    /// All groups the account currently belongs to
    async fn enumerate_groups(&self) -> ChannelResult<Vec<PeerId>>;
}

/// Direct messages to a single user
#[async_trait]
pub trait Outbound: Send + Sync {
    async fn send_text(&self, to: PeerId, text: &str) -> ChannelResult<()>;

    async fn send_document(&self, to: PeerId, name: &str, contents: &[u8]) -> ChannelResult<()>;
}

/// Administrative request stream
#[async_trait]
pub trait ControlChannel: Send + Sync {
    /// Next request, or `None` once the channel is closed
    async fn next_request(&self) -> Option<ControlRequest>;

    /// Reply to a request. May be called more than once per request.
    async fn reply(&self, request: &ControlRequest, text: &str) -> ChannelResult<()>;

    /// The request was handled without a reply
    async fn dismiss(&self, _request: &ControlRequest) {}

    /// Plain notice to a user outside any request
    async fn notify(&self, to: PeerId, text: &str) -> ChannelResult<()>;

    async fn send_document(&self, to: PeerId, name: &str, contents: Vec<u8>) -> ChannelResult<()>;

    /// Start accepting one attachment from `from`.
    ///
    /// Only attachments sent after this call reach the receiver. A second
    /// call for the same sender replaces the first, whose receiver then
    /// errors. Dropping the receiver stops accepting.
    fn expect_attachment(&self, from: PeerId) -> oneshot::Receiver<Vec<u8>>;
}
