//! Unified error handling for the relaycast crate
//!
//! This module provides a unified error type that consolidates all
//! domain-specific errors into a single `Error` enum, while keeping the
//! domain errors usable on their own.
//!
//! # Architecture
//!
//! - [`ClassifiedError`] - Common interface implemented by the unified error
//! - [`ErrorCategory`] - Classification of errors for handling strategies
//! - [`Error`] - Unified error enum wrapping all domain-specific errors

use thiserror::Error;

pub use crate::channels::ChannelError;
pub use crate::control::{ControlError, ValidationError};
pub use crate::scheduler::SchedulerError;
pub use crate::storage::StoreError;

/// Common classification interface
pub trait ClassifiedError: std::error::Error {
    /// Check if this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Messaging bridge and HTTP errors
    Network,
    /// State document errors
    Storage,
    /// Rejected administrative input
    Validation,
    /// Distribution loop errors
    Scheduler,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Storage => "storage",
            Self::Validation => "validation",
            Self::Scheduler => "scheduler",
        }
    }
}

/// Unified error type for the relaycast crate
#[derive(Error, Debug)]
pub enum Error {
    /// Messaging bridge errors
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// State document errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Distribution loop errors
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// Control surface errors
    #[error("Control error: {0}")]
    Control(#[from] ControlError),
}

impl ClassifiedError for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Channel(e) => e.is_recoverable(),
            Self::Store(e) => e.is_recoverable(),
            Self::Scheduler(e) => e.is_recoverable(),
            Self::Control(e) => match e {
                ControlError::Validation(_) => false,
                ControlError::Store(e) => e.is_recoverable(),
                ControlError::Channel(e) => e.is_recoverable(),
            },
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Channel(_) => ErrorCategory::Network,
            Self::Store(_) => ErrorCategory::Storage,
            Self::Scheduler(_) => ErrorCategory::Scheduler,
            Self::Control(e) => match e {
                ControlError::Validation(_) => ErrorCategory::Validation,
                ControlError::Store(_) => ErrorCategory::Storage,
                ControlError::Channel(_) => ErrorCategory::Network,
            },
        }
    }
}
