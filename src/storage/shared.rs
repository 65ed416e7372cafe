//! Shared handle over the live state and its store
//!
//! Both long-running activities (the distribution loop and the control
//! surface) hold a clone of [`SharedState`]. All mutations go through
//! [`SharedState::mutate`], which runs under one lock, works on a draft copy
//! and only swaps the draft in after it has been persisted.

use std::sync::Arc;
use tokio::sync::Mutex;

use super::document::DistributionState;
use super::error::{StoreError, StoreResult};
use super::store::{LoadOutcome, StateStore};

struct Inner {
    state: Mutex<DistributionState>,
    store: StateStore,
}

/// Cloneable handle to the single owned [`DistributionState`]
#[derive(Clone)]
pub struct SharedState {
    inner: Arc<Inner>,
}

impl SharedState {
    /// Wrap an already loaded state
    pub fn new(store: StateStore, state: DistributionState) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                store,
            }),
        }
    }

    /// Load the state from `store` and wrap it
    pub fn open(store: StateStore) -> StoreResult<(Self, LoadOutcome)> {
        let loaded = store.load()?;
        Ok((Self::new(store, loaded.state), loaded.outcome))
    }

    pub fn store(&self) -> &StateStore {
        &self.inner.store
    }

    /// Consistent copy of the whole state
    pub async fn snapshot(&self) -> DistributionState {
        self.inner.state.lock().await.clone()
    }

    /// Run a read-only closure under the state lock
    pub async fn read<R>(&self, f: impl FnOnce(&DistributionState) -> R) -> R {
        let guard = self.inner.state.lock().await;
        f(&guard)
    }

    /// Read-modify-persist critical section.
    ///
    /// `f` mutates a draft. When it fails, or when the draft cannot be saved,
    /// the live state is left untouched.
    pub async fn mutate<R, E>(
        &self,
        f: impl FnOnce(&mut DistributionState) -> Result<R, E>,
    ) -> Result<R, E>
    where
        E: From<StoreError>,
    {
        let mut guard = self.inner.state.lock().await;
        let mut draft = guard.clone();
        let result = f(&mut draft)?;
        self.inner.store.save(&draft)?;
        *guard = draft;
        Ok(result)
    }

    /// Replace the whole state (snapshot import)
    pub async fn replace(&self, state: DistributionState) -> StoreResult<()> {
        let mut guard = self.inner.state.lock().await;
        self.inner.store.save(&state)?;
        *guard = state;
        Ok(())
    }
}
