//! Durable scheduler state
//!
//! This module owns the single JSON document that holds every piece of
//! scheduler state: the destination registry, cadence settings, selection
//! cursor, admin list and activity log.
//!
//! - [`document`] - The [`DistributionState`] aggregate
//! - [`migrate`] - Versioned loading and legacy upgrades
//! - [`store`] - Atomic file persistence with self-healing load
//! - [`shared`] - Lock-guarded handle shared by the loop and the control surface

pub mod document;
pub mod error;
pub mod migrate;
pub mod shared;
pub mod store;

pub use document::{
    DistributionState, DEFAULT_CADENCE_MINUTES, MAX_CADENCE_MINUTES, SCHEMA_VERSION,
};
pub use error::{StoreError, StoreResult};
pub use migrate::Normalized;
pub use shared::SharedState;
pub use store::{LoadOutcome, Loaded, StateStore};
