//! Error types for the control surface

use thiserror::Error;

use crate::channels::ChannelError;
use crate::models::PeerId;
use crate::storage::StoreError;

/// Result type for control operations
pub type ControlResult<T> = Result<T, ControlError>;

/// A command was rejected before touching any state.
///
/// The `Display` text is sent back to the issuer verbatim.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Usage: {usage}")]
    Usage { usage: &'static str },

    #[error("Unknown command '{keyword}'. Send !help for the command list.")]
    Unknown { keyword: String },

    #[error("Destination {id} is already registered")]
    AlreadyRegistered { id: PeerId },

    #[error("Destination {id} is not registered")]
    NotRegistered { id: PeerId },

    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        field: &'static str,
        min: u32,
        max: u32,
        value: i64,
    },

    #[error("{id} is already an admin")]
    AlreadyAdmin { id: PeerId },

    #[error("This command only works inside a group")]
    NotInGroup,

    #[error("Invalid snapshot: {reason}")]
    InvalidSnapshot { reason: String },

    #[error("No snapshot received within {secs} seconds, restore cancelled")]
    ImportTimedOut { secs: u64 },

    #[error("Restore cancelled, a newer restore is waiting for the upload")]
    ImportSuperseded,
}

/// Anything that can go wrong while handling a command
#[derive(Debug, Error)]
pub enum ControlError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Failed to persist state: {0}")]
    Store(#[from] StoreError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),
}

impl ControlError {
    /// Whether the issuer caused the failure
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Text sent back to the issuer
    pub fn reply_text(&self) -> String {
        match self {
            Self::Validation(e) => e.to_string(),
            Self::Store(_) => "Internal error: state could not be saved, nothing was changed.".to_string(),
            Self::Channel(e) => format!("Internal error: {e}"),
        }
    }
}
