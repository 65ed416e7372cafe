//! Common test utilities
//!
//! In-memory collaborators for the distribution loop and the control
//! surface, plus helpers that open a state document in a temp directory.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::sync::{oneshot, Notify};

use relaycast::channels::{
    ChannelError, ChannelResult, ControlChannel, MessageSource, Outbound, Transport,
};
use relaycast::models::{ContentItem, ControlRequest, Origin, PeerId};
use relaycast::storage::{DistributionState, SharedState, StateStore, StoreError};

/// Bootstrap admin used by every test
pub const ADMIN: PeerId = 9;

/// Create a pool of `n` text items with ids `100..100+n`
pub fn content_pool(n: usize) -> Vec<ContentItem> {
    (0..n)
        .map(|i| ContentItem::text(100 + i as i64, format!("item {i}")))
        .collect()
}

/// Open a fresh state document inside `dir`
pub fn open_state(dir: &TempDir) -> SharedState {
    let store = StateStore::new(dir.path().join("state.json"), ADMIN);
    SharedState::open(store).unwrap().0
}

/// Open a state document and apply `configure` to it before returning
pub async fn state_with(
    dir: &TempDir,
    configure: impl FnOnce(&mut DistributionState),
) -> SharedState {
    let state = open_state(dir);
    state
        .mutate(|s| {
            configure(s);
            Ok::<_, StoreError>(())
        })
        .await
        .unwrap();
    state
}

/// Private message from `issuer`
pub fn private(issuer: PeerId, text: &str) -> ControlRequest {
    ControlRequest::new(issuer, Origin::Private, text)
}

/// Message from `issuer` posted inside `group`
pub fn in_group(issuer: PeerId, group: PeerId, text: &str) -> ControlRequest {
    ControlRequest::new(issuer, Origin::Group(group), text)
}

// ============================================================================
// Source
// ============================================================================

/// Content source with a swappable pool
#[derive(Default)]
pub struct FakeSource {
    pool: Mutex<Vec<ContentItem>>,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl FakeSource {
    pub fn with_pool(pool: Vec<ContentItem>) -> Self {
        Self {
            pool: Mutex::new(pool),
            ..Default::default()
        }
    }

    pub fn set_pool(&self, pool: Vec<ContentItem>) {
        *self.pool.lock().unwrap() = pool;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageSource for FakeSource {
    async fn fetch(&self, limit: usize) -> ChannelResult<Vec<ContentItem>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(ChannelError::Unavailable("source offline".to_string()));
        }
        Ok(self.pool.lock().unwrap().iter().take(limit).cloned().collect())
    }
}

// ============================================================================
// Transport
// ============================================================================

/// A delivery that blocks until released
struct Hold {
    destination: PeerId,
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

/// Records deliveries and can fail or pause selected destinations
#[derive(Default)]
pub struct FakeTransport {
    delivered: Mutex<Vec<(PeerId, i64)>>,
    failing: Mutex<HashSet<PeerId>>,
    groups: Mutex<Vec<PeerId>>,
    hold: Mutex<Option<Hold>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_groups(groups: Vec<PeerId>) -> Self {
        Self {
            groups: Mutex::new(groups),
            ..Default::default()
        }
    }

    pub fn fail_for(&self, destination: PeerId) {
        self.failing.lock().unwrap().insert(destination);
    }

    /// Pause the next delivery to `destination`.
    ///
    /// Returns `(entered, release)`: `entered` fires once the delivery is in
    /// flight, and notifying `release` lets it complete.
    pub fn hold(&self, destination: PeerId) -> (Arc<Notify>, Arc<Notify>) {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        *self.hold.lock().unwrap() = Some(Hold {
            destination,
            entered: Arc::clone(&entered),
            release: Arc::clone(&release),
        });
        (entered, release)
    }

    pub fn delivered(&self) -> Vec<(PeerId, i64)> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn delivered_to(&self) -> Vec<PeerId> {
        self.delivered().into_iter().map(|(d, _)| d).collect()
    }

    pub fn delivered_items(&self) -> Vec<i64> {
        self.delivered().into_iter().map(|(_, id)| id).collect()
    }

    fn take_hold(&self, destination: PeerId) -> Option<Hold> {
        let mut hold = self.hold.lock().unwrap();
        match hold.as_ref() {
            Some(h) if h.destination == destination => hold.take(),
            _ => None,
        }
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn deliver(&self, destination: PeerId, item: &ContentItem) -> ChannelResult<()> {
        if let Some(hold) = self.take_hold(destination) {
            hold.entered.notify_one();
            hold.release.notified().await;
        }

        if self.failing.lock().unwrap().contains(&destination) {
            return Err(ChannelError::Rejected {
                status: 403,
                message: "bot is not a member".to_string(),
            });
        }
        self.delivered.lock().unwrap().push((destination, item.id));
        Ok(())
    }

    async fn enumerate_groups(&self) -> ChannelResult<Vec<PeerId>> {
        Ok(self.groups.lock().unwrap().clone())
    }
}

// ============================================================================
// Outbound
// ============================================================================

/// Records direct messages and documents
#[derive(Default)]
pub struct RecordingOutbound {
    pub texts: Mutex<Vec<(PeerId, String)>>,
    pub documents: Mutex<Vec<(PeerId, String, Vec<u8>)>>,
}

impl RecordingOutbound {
    pub fn texts(&self) -> Vec<(PeerId, String)> {
        self.texts.lock().unwrap().clone()
    }

    pub fn documents(&self) -> Vec<(PeerId, String, Vec<u8>)> {
        self.documents.lock().unwrap().clone()
    }
}

#[async_trait]
impl Outbound for RecordingOutbound {
    async fn send_text(&self, to: PeerId, text: &str) -> ChannelResult<()> {
        self.texts.lock().unwrap().push((to, text.to_string()));
        Ok(())
    }

    async fn send_document(&self, to: PeerId, name: &str, contents: &[u8]) -> ChannelResult<()> {
        self.documents
            .lock()
            .unwrap()
            .push((to, name.to_string(), contents.to_vec()));
        Ok(())
    }
}

// ============================================================================
// Control channel
// ============================================================================

/// Control channel driven directly by the test.
///
/// Requests are passed to `ControlSurface::handle`, so `next_request`
/// never yields anything.
#[derive(Default)]
pub struct RecordingChannel {
    replies: Mutex<Vec<(PeerId, String)>>,
    notices: Mutex<Vec<(PeerId, String)>>,
    documents: Mutex<Vec<(PeerId, String, Vec<u8>)>>,
    dismissed: AtomicUsize,
    expected: Mutex<HashMap<PeerId, oneshot::Sender<Vec<u8>>>>,
    replied: Notify,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replies(&self) -> Vec<(PeerId, String)> {
        self.replies.lock().unwrap().clone()
    }

    pub fn reply_texts(&self) -> Vec<String> {
        self.replies().into_iter().map(|(_, text)| text).collect()
    }

    pub fn notices(&self) -> Vec<(PeerId, String)> {
        self.notices.lock().unwrap().clone()
    }

    pub fn documents(&self) -> Vec<(PeerId, String, Vec<u8>)> {
        self.documents.lock().unwrap().clone()
    }

    pub fn dismissed(&self) -> usize {
        self.dismissed.load(Ordering::SeqCst)
    }

    /// Upload a document as if `from` had sent it.
    ///
    /// Returns whether a restore from `from` was waiting and took it.
    pub fn upload(&self, from: PeerId, contents: impl Into<Vec<u8>>) -> bool {
        let slot = self.expected.lock().unwrap().remove(&from);
        match slot {
            Some(tx) => tx.send(contents.into()).is_ok(),
            None => false,
        }
    }

    /// Wait until at least `count` replies were sent
    pub async fn wait_for_replies(&self, count: usize) {
        loop {
            let notified = self.replied.notified();
            if self.replies.lock().unwrap().len() >= count {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl ControlChannel for RecordingChannel {
    async fn next_request(&self) -> Option<ControlRequest> {
        None
    }

    async fn reply(&self, request: &ControlRequest, text: &str) -> ChannelResult<()> {
        self.replies
            .lock()
            .unwrap()
            .push((request.issuer, text.to_string()));
        self.replied.notify_waiters();
        Ok(())
    }

    async fn dismiss(&self, _request: &ControlRequest) {
        self.dismissed.fetch_add(1, Ordering::SeqCst);
    }

    async fn notify(&self, to: PeerId, text: &str) -> ChannelResult<()> {
        self.notices.lock().unwrap().push((to, text.to_string()));
        Ok(())
    }

    async fn send_document(&self, to: PeerId, name: &str, contents: Vec<u8>) -> ChannelResult<()> {
        self.documents
            .lock()
            .unwrap()
            .push((to, name.to_string(), contents));
        Ok(())
    }

    fn expect_attachment(&self, from: PeerId) -> oneshot::Receiver<Vec<u8>> {
        let (tx, rx) = oneshot::channel();
        self.expected.lock().unwrap().insert(from, tx);
        rx
    }
}
