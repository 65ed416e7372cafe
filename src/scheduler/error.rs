//! Error types for the scheduler module

use std::fmt;

use crate::channels::ChannelError;
use crate::models::PeerId;
use crate::storage::StoreError;

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Scheduler-specific errors
#[derive(Debug)]
pub enum SchedulerError {
    /// The fetched content pool has nothing to select from
    EmptyPool,

    /// Content source could not be read
    SourceFetch {
        reason: String,
    },

    /// A single delivery failed
    Delivery {
        destination: PeerId,
        reason: String,
    },

    /// State could not be persisted
    Persist {
        reason: String,
    },

    /// Group enumeration failed in broadcast-all mode
    Enumeration {
        reason: String,
    },
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyPool => write!(f, "Content pool is empty"),
            Self::SourceFetch { reason } => {
                write!(f, "Failed to fetch content: {}", reason)
            }
            Self::Delivery {
                destination,
                reason,
            } => {
                write!(f, "Delivery to {} failed: {}", destination, reason)
            }
            Self::Persist { reason } => {
                write!(f, "Failed to persist state: {}", reason)
            }
            Self::Enumeration { reason } => {
                write!(f, "Failed to enumerate groups: {}", reason)
            }
        }
    }
}

impl std::error::Error for SchedulerError {}

impl From<StoreError> for SchedulerError {
    fn from(err: StoreError) -> Self {
        Self::Persist {
            reason: err.to_string(),
        }
    }
}

impl SchedulerError {
    /// Create a source fetch error
    pub fn source_fetch(err: &ChannelError) -> Self {
        Self::SourceFetch {
            reason: err.to_string(),
        }
    }

    /// Create a delivery error
    pub fn delivery(destination: PeerId, err: &ChannelError) -> Self {
        Self::Delivery {
            destination,
            reason: err.to_string(),
        }
    }

    /// Create a group enumeration error
    pub fn enumeration(err: &ChannelError) -> Self {
        Self::Enumeration {
            reason: err.to_string(),
        }
    }

    /// Check if the loop can simply carry on after this error
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::EmptyPool
                | Self::SourceFetch { .. }
                | Self::Delivery { .. }
                | Self::Enumeration { .. }
        )
    }
}
