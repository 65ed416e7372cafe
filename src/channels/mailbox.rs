//! In-process control channel
//!
//! The HTTP server pushes administrative requests and attachments into a
//! [`MailboxHandle`]; the control surface consumes them through the
//! [`ControlChannel`] implemented by [`Mailbox`].
//!
//! The first reply to a request is routed back to whoever submitted it
//! (usually a waiting HTTP handler). Later replies, and replies whose
//! submitter already gave up, are delivered as direct messages through the
//! [`Outbound`] gateway instead.
//!
//! An attachment is only accepted while a restore from the same issuer is
//! waiting for it. Anything else is refused at the handle, so an upload can
//! never be picked up by a later restore.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{mpsc, oneshot, Mutex};
use uuid::Uuid;

use super::{ChannelError, ChannelResult, ControlChannel, Outbound};
use crate::models::{ControlRequest, PeerId};

type Pending = Arc<StdMutex<HashMap<Uuid, oneshot::Sender<String>>>>;
type Expected = Arc<StdMutex<HashMap<PeerId, oneshot::Sender<Vec<u8>>>>>;

/// Consumer side, owned by the control surface
pub struct Mailbox {
    requests: Mutex<mpsc::Receiver<ControlRequest>>,
    pending: Pending,
    expected: Expected,
    outbound: Arc<dyn Outbound>,
}

/// Producer side, cloned into every HTTP handler
#[derive(Clone)]
pub struct MailboxHandle {
    requests: mpsc::Sender<ControlRequest>,
    pending: Pending,
    expected: Expected,
}

impl Mailbox {
    /// Create a connected mailbox and handle pair
    pub fn new(outbound: Arc<dyn Outbound>, capacity: usize) -> (Self, MailboxHandle) {
        let (request_tx, request_rx) = mpsc::channel(capacity.max(1));
        let pending: Pending = Arc::new(StdMutex::new(HashMap::new()));
        let expected: Expected = Arc::new(StdMutex::new(HashMap::new()));

        let mailbox = Self {
            requests: Mutex::new(request_rx),
            pending: Arc::clone(&pending),
            expected: Arc::clone(&expected),
            outbound,
        };
        let handle = MailboxHandle {
            requests: request_tx,
            pending,
            expected,
        };
        (mailbox, handle)
    }

    fn take_pending(&self, id: &Uuid) -> Option<oneshot::Sender<String>> {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id)
    }
}

impl MailboxHandle {
    /// Queue a request and get a receiver for its first reply
    pub async fn submit(&self, request: ControlRequest) -> ChannelResult<oneshot::Receiver<String>> {
        let (tx, rx) = oneshot::channel();
        let id = request.id;
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, tx);

        if self.requests.send(request).await.is_err() {
            self.forget(&id);
            return Err(ChannelError::Closed);
        }
        Ok(rx)
    }

    /// Hand an uploaded document to the restore waiting for it.
    ///
    /// Fails with [`ChannelError::UnexpectedAttachment`] when no restore
    /// from `from` is waiting.
    pub fn attach(&self, from: PeerId, contents: Vec<u8>) -> ChannelResult<()> {
        if self.requests.is_closed() {
            return Err(ChannelError::Closed);
        }

        let slot = self
            .expected
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&from);

        match slot {
            Some(tx) => tx
                .send(contents)
                .map_err(|_| ChannelError::UnexpectedAttachment { from }),
            None => Err(ChannelError::UnexpectedAttachment { from }),
        }
    }

    /// Drop the reply slot of a request whose submitter stopped waiting
    pub fn forget(&self, id: &Uuid) {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
    }
}

#[async_trait]
impl ControlChannel for Mailbox {
    async fn next_request(&self) -> Option<ControlRequest> {
        self.requests.lock().await.recv().await
    }

    async fn reply(&self, request: &ControlRequest, text: &str) -> ChannelResult<()> {
        if let Some(slot) = self.take_pending(&request.id) {
            match slot.send(text.to_string()) {
                Ok(()) => return Ok(()),
                Err(_) => {
                    tracing::debug!(request = %request.id, "Submitter gone, replying directly");
                }
            }
        }
        self.outbound.send_text(request.issuer, text).await
    }

    async fn dismiss(&self, request: &ControlRequest) {
        // Dropping the sender closes the submitter's receiver
        self.take_pending(&request.id);
    }

    async fn notify(&self, to: PeerId, text: &str) -> ChannelResult<()> {
        self.outbound.send_text(to, text).await
    }

    async fn send_document(&self, to: PeerId, name: &str, contents: Vec<u8>) -> ChannelResult<()> {
        self.outbound.send_document(to, name, &contents).await
    }

    fn expect_attachment(&self, from: PeerId) -> oneshot::Receiver<Vec<u8>> {
        let (tx, rx) = oneshot::channel();
        let replaced = self
            .expected
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(from, tx);
        if replaced.is_some_and(|earlier| !earlier.is_closed()) {
            tracing::debug!(issuer = from, "Earlier restore superseded");
        }
        rx
    }
}
