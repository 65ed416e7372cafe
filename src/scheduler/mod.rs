//! Scheduled content distribution
//!
//! The scheduler is the stateful loop that decides *what* to send, *where*,
//! *how often*, and records every delivery so the next decision can be
//! rate-limited.
//!
//! # Overview
//!
//! Each cycle fetches a fresh content pool, walks the destination set and,
//! for every destination the [`RateGate`] admits, asks the
//! [`SelectionPolicy`] for an item and hands it to the transport. The
//! administrative control surface may reconfigure everything concurrently;
//! cadence changes take effect on the next cycle.
//!
//! # Modules
//!
//! - [`selection`] - Random and sequential item selection
//! - [`rate_gate`] - Cadence and daily-cap admission
//! - [`distribution`] - The fetch / distribute / sleep loop
//! - [`error`] - Scheduler error types
//!
//! # Example
//!
//! ```ignore
//! use relaycast::scheduler::{DistributionConfig, Distributor};
//!
//! let distributor = Distributor::new(state, source, transport, DistributionConfig::default());
//! let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! tokio::spawn(async move { distributor.run(shutdown_rx).await });
//! ```

pub mod distribution;
pub mod error;
pub mod rate_gate;
pub mod selection;

pub use distribution::{CycleReport, DistributionConfig, Distributor, LoopPhase};
pub use error::{SchedulerError, SchedulerResult};
pub use rate_gate::{Admission, RateGate, DEFAULT_DAILY_CAP};
pub use selection::{Selection, SelectionPolicy};
