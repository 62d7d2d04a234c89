//! Pending request store.
//!
//! Maps request ids to the one-shot slots of callers waiting for a response.
//! Every slot is removed exactly once: by delivery, by cancellation after a
//! timeout, or when the channel fails all waiters. Removal happens under the
//! store lock, so delivery and cancellation never both succeed.

use crate::domain::error::ChannelError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Result delivered to a waiting caller.
pub type Delivery<T> = Result<T, ChannelError>;

struct PendingRequest<T> {
    sender: oneshot::Sender<Delivery<T>>,
    created_at: Instant,
}

/// Counters for the pending request store.
#[derive(Debug, Default)]
pub struct PendingStats {
    /// Slots registered
    pub total_registered: AtomicU64,
    /// Slots completed with a response or peer error
    pub total_completed: AtomicU64,
    /// Slots removed by their caller (timeout)
    pub total_cancelled: AtomicU64,
    /// Slots failed by channel teardown
    pub total_failed: AtomicU64,
}

/// Request id to response slot map.
pub struct PendingRequests<T> {
    pending: Mutex<HashMap<u32, PendingRequest<T>>>,
    stats: PendingStats,
}

impl<T> PendingRequests<T> {
    /// An empty store.
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            stats: PendingStats::default(),
        }
    }

    /// Register a slot for `request_id`.
    ///
    /// # Errors
    ///
    /// Returns `ChannelError::DuplicateRequestId` if a slot already exists.
    pub fn register(&self, request_id: u32) -> Result<oneshot::Receiver<Delivery<T>>, ChannelError> {
        let mut pending = self.pending.lock();
        if pending.contains_key(&request_id) {
            return Err(ChannelError::DuplicateRequestId(request_id));
        }

        let (sender, receiver) = oneshot::channel();
        pending.insert(
            request_id,
            PendingRequest {
                sender,
                created_at: Instant::now(),
            },
        );
        self.stats.total_registered.fetch_add(1, Ordering::Relaxed);
        debug!(request_id, "Registered pending request");

        Ok(receiver)
    }

    /// Deliver `result` to the slot for `request_id`.
    ///
    /// Returns the result back if no slot exists, so the caller can route it
    /// elsewhere.
    pub fn complete(&self, request_id: u32, result: Delivery<T>) -> Option<Delivery<T>> {
        let mut pending = self.pending.lock();
        let Some(request) = pending.remove(&request_id) else {
            return Some(result);
        };

        let elapsed_ms = request.created_at.elapsed().as_millis();
        // Sent under the lock so a concurrent `cancel` observes either the
        // slot or the delivered value.
        if request.sender.send(result).is_err() {
            debug!(request_id, "Pending request receiver dropped");
        } else {
            debug!(request_id, elapsed_ms, "Completed pending request");
        }
        self.stats.total_completed.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Remove the slot for `request_id`. Returns false if it was already gone.
    pub fn cancel(&self, request_id: u32) -> bool {
        let removed = self.pending.lock().remove(&request_id).is_some();
        if removed {
            self.stats.total_cancelled.fetch_add(1, Ordering::Relaxed);
            debug!(request_id, "Cancelled pending request");
        }
        removed
    }

    /// Fail every slot with `error`. Returns the number of slots notified.
    pub fn fail_all(&self, error: &ChannelError) -> usize {
        let drained: Vec<_> = self.pending.lock().drain().collect();
        let count = drained.len();
        for (request_id, request) in drained {
            if request.sender.send(Err(error.clone())).is_err() {
                debug!(request_id, "Pending request receiver dropped");
            }
        }
        if count > 0 {
            self.stats
                .total_failed
                .fetch_add(count as u64, Ordering::Relaxed);
            warn!(count, error = %error, "Failed all pending requests");
        }
        count
    }

    /// Whether a slot exists for `request_id`.
    pub fn contains(&self, request_id: u32) -> bool {
        self.pending.lock().contains_key(&request_id)
    }

    /// Number of open slots.
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// True when no slot is open.
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Store statistics.
    pub fn stats(&self) -> &PendingStats {
        &self.stats
    }
}

impl<T> Default for PendingRequests<T> {
    fn default() -> Self {
        Self::new()
    }
}
