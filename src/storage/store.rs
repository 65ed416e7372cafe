//! File-backed persistence for the distribution document
//!
//! # Features
//!
//! - Atomic full-document writes (temp file + rename)
//! - Single-writer lock around every save
//! - Self-healing load: a corrupt document is moved aside and replaced by
//!   defaults instead of blocking startup
//! - Transparent legacy migration, persisted before `load` returns

use chrono::Utc;
use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::document::DistributionState;
use super::error::{StoreError, StoreResult};
use super::migrate;
use crate::models::PeerId;

/// How the state returned by [`StateStore::load`] was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// No document existed; defaults were written
    Created,
    /// The document was already in the current shape
    Loaded,
    /// A legacy or incomplete document was upgraded and written back
    Migrated,
    /// The document was unreadable; defaults were written
    Reset,
}

/// State plus the way it was obtained
#[derive(Debug, Clone)]
pub struct Loaded {
    pub state: DistributionState,
    pub outcome: LoadOutcome,
}

/// Durable single-document store
pub struct StateStore {
    /// Location of the JSON document
    path: PathBuf,

    /// Admin re-inserted whenever a loaded document has none
    bootstrap_admin: PeerId,

    /// Serializes writers
    write_lock: Mutex<()>,
}

impl StateStore {
    /// Create a store for the document at `path`
    pub fn new(path: impl Into<PathBuf>, bootstrap_admin: PeerId) -> Self {
        Self {
            path: path.into(),
            bootstrap_admin,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bootstrap_admin(&self) -> PeerId {
        self.bootstrap_admin
    }

    /// Load the persisted state, creating, migrating or resetting it as needed.
    ///
    /// Only fails when the replacement document itself cannot be written.
    pub fn load(&self) -> StoreResult<Loaded> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                let state = DistributionState::with_bootstrap_admin(self.bootstrap_admin);
                self.save(&state)?;
                tracing::info!(path = %self.path.display(), "Created new state document");
                return Ok(Loaded {
                    state,
                    outcome: LoadOutcome::Created,
                });
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "State document unreadable");
                return self.reset(&e.to_string());
            }
        };

        match migrate::decode(&bytes, self.bootstrap_admin) {
            Ok(normalized) if normalized.upgraded => {
                self.save(&normalized.state)?;
                tracing::info!(path = %self.path.display(), "Upgraded state document");
                Ok(Loaded {
                    state: normalized.state,
                    outcome: LoadOutcome::Migrated,
                })
            }
            Ok(normalized) => {
                tracing::debug!(path = %self.path.display(), "State document loaded");
                Ok(Loaded {
                    state: normalized.state,
                    outcome: LoadOutcome::Loaded,
                })
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Resetting corrupt state document");
                self.quarantine();
                self.reset(&e.to_string())
            }
        }
    }

    /// Overwrite the document with `state`
    pub fn save(&self, state: &DistributionState) -> StoreResult<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| StoreError::io("create_dir", e))?;
        }

        // Write to temp file first, then rename (atomic)
        let temp_path = self.temp_path();
        let file = File::create(&temp_path).map_err(|e| StoreError::io("create_temp", e))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, state)?;
        writer
            .flush()
            .map_err(|e| StoreError::io("flush_temp", e))?;
        drop(writer);

        fs::rename(&temp_path, &self.path).map_err(|e| StoreError::io("rename", e))?;

        tracing::trace!(path = %self.path.display(), "State document saved");
        Ok(())
    }

    /// Serialize a state exactly as it would be written to disk
    pub fn encode(state: &DistributionState) -> StoreResult<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(state)?)
    }

    fn reset(&self, reason: &str) -> StoreResult<Loaded> {
        let state = DistributionState::with_bootstrap_admin(self.bootstrap_admin);
        self.save(&state)?;
        tracing::warn!(reason, "State reset to defaults");
        Ok(Loaded {
            state,
            outcome: LoadOutcome::Reset,
        })
    }

    /// Keep a copy of an unreadable document next to the live one
    fn quarantine(&self) {
        let backup = self.sibling(&format!("corrupt-{}", Utc::now().format("%Y%m%d%H%M%S")));
        if let Err(e) = fs::copy(&self.path, &backup) {
            tracing::warn!(error = %e, "Failed to keep a copy of the corrupt document");
        } else {
            tracing::info!(backup = %backup.display(), "Corrupt document copied aside");
        }
    }

    fn temp_path(&self) -> PathBuf {
        self.sibling("tmp")
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "state.json".into());
        name.push(format!(".{suffix}"));
        self.path.with_file_name(name)
    }
}
