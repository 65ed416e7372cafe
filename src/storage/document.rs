//! The persisted distribution document
//!
//! [`DistributionState`] is the single root aggregate the process owns. It is
//! serialized as one JSON document (see [`super::StateStore`]) and every field
//! is written back after each mutation.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::models::{LogEntry, PeerId, SelectionMode};

/// Current document schema version
pub const SCHEMA_VERSION: u32 = 2;

/// Cycle period used when nothing else is configured
pub const DEFAULT_CADENCE_MINUTES: u32 = 15;

/// Upper bound accepted for any cadence (one week)
pub const MAX_CADENCE_MINUTES: u32 = 7 * 24 * 60;

/// Scheduler state, exactly as persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributionState {
    /// Schema version of the document
    pub version: u32,

    /// Registered destinations and their cadence override (`None` follows the
    /// global cadence)
    pub destinations: BTreeMap<PeerId, Option<u32>>,

    /// Per-destination daily cap overrides
    pub daily_caps: BTreeMap<PeerId, u32>,

    /// Distribute to every group the account is a member of
    pub broadcast_all: bool,

    /// Default cycle period in minutes
    pub global_cadence_minutes: u32,

    pub selection_mode: SelectionMode,

    /// Next index into the content pool in sequential mode
    pub sequential_cursor: usize,

    /// Users allowed to issue control commands
    pub admins: BTreeSet<PeerId>,

    /// Append-only record of successful deliveries
    pub activity_log: Vec<LogEntry>,
}

impl Default for DistributionState {
    fn default() -> Self {
        Self {
            version: SCHEMA_VERSION,
            destinations: BTreeMap::new(),
            daily_caps: BTreeMap::new(),
            broadcast_all: false,
            global_cadence_minutes: DEFAULT_CADENCE_MINUTES,
            selection_mode: SelectionMode::default(),
            sequential_cursor: 0,
            admins: BTreeSet::new(),
            activity_log: Vec::new(),
        }
    }
}

impl DistributionState {
    /// Fresh state with a single bootstrap admin
    pub fn with_bootstrap_admin(admin: PeerId) -> Self {
        let mut state = Self::default();
        state.admins.insert(admin);
        state
    }

    /// Re-add the bootstrap admin if the admin set is empty.
    ///
    /// Returns `true` when the state was changed.
    pub fn ensure_admin(&mut self, bootstrap: PeerId) -> bool {
        if self.admins.is_empty() {
            self.admins.insert(bootstrap);
            return true;
        }
        false
    }

    pub fn is_admin(&self, id: PeerId) -> bool {
        self.admins.contains(&id)
    }

    pub fn is_registered(&self, id: PeerId) -> bool {
        self.destinations.contains_key(&id)
    }

    /// Cadence that applies to a destination, in minutes
    pub fn effective_cadence(&self, id: PeerId) -> u32 {
        self.destinations
            .get(&id)
            .copied()
            .flatten()
            .unwrap_or(self.global_cadence_minutes)
    }

    /// Daily cap that applies to a destination
    pub fn daily_cap(&self, id: PeerId, default_cap: u32) -> u32 {
        self.daily_caps.get(&id).copied().unwrap_or(default_cap)
    }

    /// Time of the most recent logged delivery to a destination
    pub fn last_sent(&self, id: PeerId) -> Option<DateTime<Utc>> {
        self.activity_log
            .iter()
            .filter(|entry| entry.destination == id)
            .map(|entry| entry.timestamp)
            .max()
    }

    /// Number of deliveries to a destination strictly after `since`
    pub fn sends_since(&self, id: PeerId, since: DateTime<Utc>) -> usize {
        self.activity_log
            .iter()
            .filter(|entry| entry.destination == id && entry.timestamp > since)
            .count()
    }

    /// Log entries strictly after `since`, oldest first
    pub fn log_since(&self, since: DateTime<Utc>) -> impl Iterator<Item = &LogEntry> {
        self.activity_log
            .iter()
            .filter(move |entry| entry.timestamp > since)
    }

    /// Total deliveries in the trailing 24 hours
    pub fn sends_last_day(&self, now: DateTime<Utc>) -> usize {
        self.log_since(now - Duration::hours(24)).count()
    }

    pub fn record_send(&mut self, entry: LogEntry) {
        self.activity_log.push(entry);
    }

    /// Structural checks applied to imported or migrated documents
    pub fn validate(&self) -> Result<(), String> {
        if self.global_cadence_minutes == 0 || self.global_cadence_minutes > MAX_CADENCE_MINUTES {
            return Err(format!(
                "global_cadence_minutes must be between 1 and {MAX_CADENCE_MINUTES}, got {}",
                self.global_cadence_minutes
            ));
        }

        if let Some((id, _)) = self
            .destinations
            .iter()
            .find(|(_, cadence)| matches!(cadence, Some(0)))
        {
            return Err(format!("destination {id} has a zero cadence"));
        }

        if let Some((id, _)) = self.daily_caps.iter().find(|(_, cap)| **cap == 0) {
            return Err(format!("destination {id} has a zero daily cap"));
        }

        if self.admins.is_empty() {
            return Err("admins must not be empty".to_string());
        }

        Ok(())
    }
}
