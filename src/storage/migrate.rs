//! Versioned loading of the state document
//!
//! Every document goes through [`normalize`] before any business logic sees
//! it. Unversioned documents are treated as the legacy shape and rebuilt key by
//! key:
//!
//! | Legacy key            | Current field            |
//! |-----------------------|--------------------------|
//! | `groups` (list/map)   | `destinations`           |
//! | `per_group_freq`      | `destinations` overrides |
//! | `frequency`           | `global_cadence_minutes` |
//! | `mode` (`order`)      | `selection_mode`         |
//! | `last_sent_ad_index`  | `sequential_cursor`      |
//! | `allgroup`            | `broadcast_all`          |
//! | `log` `{time, group, msg_id}` | `activity_log`   |
//!
//! Missing keys are backfilled with defaults and an empty admin set gets the
//! bootstrap admin back. Legacy cadences outside `1..=MAX_CADENCE_MINUTES`
//! are dropped with a warning: a bad global cadence falls back to the
//! default, a bad override falls back to the global cadence.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

use super::document::{
    DistributionState, DEFAULT_CADENCE_MINUTES, MAX_CADENCE_MINUTES, SCHEMA_VERSION,
};
use super::error::{StoreError, StoreResult};
use crate::models::{LogEntry, PeerId, SelectionMode};

/// Result of normalizing a stored document
#[derive(Debug, Clone)]
pub struct Normalized {
    pub state: DistributionState,

    /// The document differed from the current canonical shape and should be
    /// written back
    pub upgraded: bool,
}

/// Decode raw bytes into a normalized state
pub fn decode(bytes: &[u8], bootstrap_admin: PeerId) -> StoreResult<Normalized> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| StoreError::corrupt(format!("invalid JSON: {e}")))?;
    normalize(value, bootstrap_admin)
}

/// Normalize any recognized document shape into the current state
pub fn normalize(value: Value, bootstrap_admin: PeerId) -> StoreResult<Normalized> {
    let Value::Object(object) = &value else {
        return Err(StoreError::corrupt("document root is not an object"));
    };

    let mut state = match object.get("version") {
        None => from_legacy(object)?,
        Some(version) => {
            let version = version
                .as_u64()
                .ok_or_else(|| StoreError::corrupt("version is not an unsigned integer"))?;
            if version != u64::from(SCHEMA_VERSION) {
                return Err(StoreError::UnsupportedVersion { version });
            }
            serde_json::from_value::<DistributionState>(value.clone())
                .map_err(|e| StoreError::corrupt(e.to_string()))?
        }
    };

    state.ensure_admin(bootstrap_admin);
    state.validate().map_err(StoreError::corrupt)?;

    let upgraded = serde_json::to_value(&state)? != value;
    Ok(Normalized { state, upgraded })
}

fn from_legacy(object: &Map<String, Value>) -> StoreResult<DistributionState> {
    let mut state = DistributionState::default();

    let cadence = match object.get("frequency").or(object.get("global_cadence_minutes")) {
        Some(v) => legacy_cadence(v, "frequency").unwrap_or(DEFAULT_CADENCE_MINUTES),
        None => DEFAULT_CADENCE_MINUTES,
    };
    state.global_cadence_minutes = cadence;

    if let Some(registry) = object.get("destinations").or(object.get("groups")) {
        state.destinations = legacy_registry(registry, cadence)?;
    }

    if let Some(Value::Object(overrides)) = object.get("per_group_freq") {
        for (key, minutes) in overrides {
            let id = parse_peer(key)?;
            match legacy_cadence(minutes, "per_group_freq") {
                Some(minutes) => {
                    state.destinations.insert(id, Some(minutes));
                }
                None => {
                    state.destinations.entry(id).or_insert(None);
                }
            }
        }
    }

    if let Some(mode) = object.get("mode").or(object.get("selection_mode")) {
        let name = mode
            .as_str()
            .ok_or_else(|| StoreError::corrupt("mode is not a string"))?;
        state.selection_mode = SelectionMode::parse(name)
            .ok_or_else(|| StoreError::corrupt(format!("unknown mode '{name}'")))?;
    }

    if let Some(cursor) = object
        .get("last_sent_ad_index")
        .or(object.get("sequential_cursor"))
    {
        state.sequential_cursor = cursor
            .as_u64()
            .ok_or_else(|| StoreError::corrupt("cursor is not an unsigned integer"))?
            as usize;
    }

    if let Some(flag) = object.get("allgroup").or(object.get("broadcast_all")) {
        state.broadcast_all = flag
            .as_bool()
            .ok_or_else(|| StoreError::corrupt("allgroup is not a boolean"))?;
    }

    if let Some(Value::Array(admins)) = object.get("admins") {
        state.admins = admins
            .iter()
            .map(as_peer)
            .collect::<StoreResult<BTreeSet<_>>>()?;
    }

    if let Some(Value::Array(entries)) = object.get("log").or(object.get("activity_log")) {
        let mut skipped = 0usize;
        for entry in entries {
            match legacy_log_entry(entry) {
                Some(entry) => state.activity_log.push(entry),
                None => skipped += 1,
            }
        }
        if skipped > 0 {
            tracing::warn!(skipped, "Dropped unreadable legacy log entries");
        }
    }

    Ok(state)
}

/// A registry given either as a bare id list or as an id → cadence map
fn legacy_registry(registry: &Value, cadence: u32) -> StoreResult<BTreeMap<PeerId, Option<u32>>> {
    match registry {
        Value::Array(ids) => ids
            .iter()
            .map(|id| Ok((as_peer(id)?, Some(cadence))))
            .collect(),
        Value::Object(map) => map
            .iter()
            .map(|(key, minutes)| {
                let minutes = match minutes {
                    Value::Null => None,
                    other => legacy_cadence(other, "destination cadence"),
                };
                Ok((parse_peer(key)?, minutes))
            })
            .collect(),
        _ => Err(StoreError::corrupt(
            "destination registry is neither a list nor a map",
        )),
    }
}

fn legacy_log_entry(entry: &Value) -> Option<LogEntry> {
    let destination = entry.get("group").or(entry.get("destination"))?;
    let destination = as_peer(destination).ok()?;
    let item_id = entry
        .get("msg_id")
        .or(entry.get("item_id"))
        .and_then(Value::as_i64)
        .unwrap_or_default();

    let timestamp = match entry.get("time").or(entry.get("timestamp"))? {
        Value::Number(secs) => {
            let secs = secs.as_f64()?;
            let whole = secs.trunc() as i64;
            let nanos = ((secs - secs.trunc()) * 1e9) as u32;
            DateTime::<Utc>::from_timestamp(whole, nanos)?
        }
        Value::String(text) => DateTime::parse_from_rfc3339(text).ok()?.with_timezone(&Utc),
        _ => return None,
    };

    Some(LogEntry::new(timestamp, destination, item_id))
}

fn as_peer(value: &Value) -> StoreResult<PeerId> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| StoreError::corrupt(format!("invalid id {n}"))),
        Value::String(s) => parse_peer(s),
        other => Err(StoreError::corrupt(format!("invalid id {other}"))),
    }
}

fn parse_peer(key: &str) -> StoreResult<PeerId> {
    key.trim()
        .parse()
        .map_err(|_| StoreError::corrupt(format!("invalid id '{key}'")))
}

/// A cadence in minutes, or `None` when it cannot be used
fn legacy_cadence(value: &Value, field: &str) -> Option<u32> {
    let minutes = value
        .as_u64()
        .and_then(|v| u32::try_from(v).ok())
        .filter(|m| (1..=MAX_CADENCE_MINUTES).contains(m));
    if minutes.is_none() {
        tracing::warn!(field, value = %value, "Ignoring unusable legacy cadence");
    }
    minutes
}
