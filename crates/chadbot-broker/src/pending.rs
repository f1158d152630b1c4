//! Request/response correlation for in-flight skill invocations.
//!
//! The broker multiplexes many outstanding requests over one stream per
//! plugin. Each request gets an ID unique over the broker's lifetime and a
//! single-slot reply channel; the waiting task additionally selects over its
//! own deadline and cancellation signal.
//!
//! Each ID is resolved at most once: a second [`resolve`]
//! (PendingRequestMap::resolve) for the same ID returns false and the
//! response is dropped. Dropping a [`PendingReply`] without waiting (e.g.
//! the waiter timed out) removes the entry, so abandoned requests do not
//! accumulate.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use chadbot_core::chat::Attachment;
use chadbot_core::error::{BrokerError, BrokerResult};

/// A plugin's answer to a skill invocation.
#[derive(Debug, Clone, Default)]
pub struct SkillOutcome {
    pub success: bool,
    pub result: String,
    pub error: String,
    /// Auxiliary messages the skill wants displayed after the assistant
    /// reply.
    pub attachments: Vec<Attachment>,
}

struct PendingEntry {
    plugin_id: String,
    tx: oneshot::Sender<SkillOutcome>,
}

/// Correlates outstanding request IDs with reply slots.
#[derive(Default)]
pub struct PendingRequestMap {
    entries: Mutex<HashMap<String, PendingEntry>>,
    next_id: AtomicU64,
}

impl PendingRequestMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a request ID unique over the broker's lifetime.
    pub fn next_request_id(&self) -> String {
        format!("req-{}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Registers a reply slot for `id`, owned by `plugin_id`.
    pub fn register(self: &Arc<Self>, id: &str, plugin_id: &str) -> PendingReply {
        let (tx, rx) = oneshot::channel();
        self.entries.lock().insert(
            id.to_string(),
            PendingEntry {
                plugin_id: plugin_id.to_string(),
                tx,
            },
        );
        PendingReply {
            id: id.to_string(),
            map: Arc::clone(self),
            rx,
        }
    }

    /// Delivers a response. Returns false (and drops the response) when
    /// the ID is unknown, already resolved, or cancelled.
    pub fn resolve(&self, id: &str, outcome: SkillOutcome) -> bool {
        let entry = self.entries.lock().remove(id);
        match entry {
            Some(entry) => entry.tx.send(outcome).is_ok(),
            None => {
                debug!(request_id = %id, "Dropped response for unknown request");
                false
            }
        }
    }

    /// Invalidates the slot; a blocked waiter observes a cancellation.
    pub fn cancel(&self, id: &str) {
        self.entries.lock().remove(id);
    }

    /// Cancels every outstanding request issued to `plugin_id`. Returns how
    /// many were cancelled.
    pub fn cancel_for_plugin(&self, plugin_id: &str) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| e.plugin_id != plugin_id);
        before - entries.len()
    }

    /// Number of outstanding requests.
    pub fn outstanding(&self) -> usize {
        self.entries.lock().len()
    }
}

/// The waiter's half of one pending request.
///
/// Dropping it unregisters the request.
pub struct PendingReply {
    id: String,
    map: Arc<PendingRequestMap>,
    rx: oneshot::Receiver<SkillOutcome>,
}

impl PendingReply {
    /// Waits for the response. Ends with
    /// [`BrokerError::PluginDisconnected`] when the request was cancelled
    /// (owning plugin gone).
    pub async fn wait(mut self) -> BrokerResult<SkillOutcome> {
        let outcome = (&mut self.rx)
            .await
            .map_err(|_| BrokerError::PluginDisconnected);
        // Resolution already removed the entry; nothing left to clean up.
        self.map.entries.lock().remove(&self.id);
        outcome
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        self.map.entries.lock().remove(&self.id);
    }
}
