//! relaycast - Scheduled content redistribution with live admin control
//!
//! A distribution loop periodically picks an item from a content pool and
//! forwards it to a set of destinations, while an administrative control
//! surface reconfigures destinations, cadence and selection at any time.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`models`] - Core data structures and types
//! - [`storage`] - The persisted state document and its shared handle
//! - [`scheduler`] - Selection, rate gating and the distribution loop
//! - [`control`] - Administrative commands and their processor
//! - [`channels`] - Collaborator traits and the HTTP bridge client
//! - [`server`] - Control and liveness HTTP server
//! - [`metrics`] - Prometheus counters
//!
//! # Example
//!
//! ```no_run
//! use relaycast::config::Config;
//! use relaycast::storage::{SharedState, StateStore};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let store = StateStore::new(&config.store.path, config.control.bootstrap_admin);
//!     let (state, outcome) = SharedState::open(store)?;
//!     println!("{outcome:?}");
//!     Ok(())
//! }
//! ```

pub mod channels;
pub mod config;
pub mod control;
pub mod error;
pub mod metrics;
pub mod models;
pub mod scheduler;
pub mod server;
pub mod storage;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::channels::{ControlChannel, MessageSource, Outbound, Transport};
    pub use crate::config::Config;
    pub use crate::control::ControlSurface;
    pub use crate::error::{ClassifiedError, Error, ErrorCategory};
    pub use crate::models::{ContentItem, ControlRequest, LogEntry, Origin, PeerId, SelectionMode};
    pub use crate::scheduler::{DistributionConfig, Distributor, RateGate, SelectionPolicy};
    pub use crate::storage::{DistributionState, SharedState, StateStore};
}

// Direct re-exports for convenience
pub use models::{ContentItem, ControlRequest, Origin, PeerId, SelectionMode};
