//! The pending-request table: the unit of request/response correlation.
//!
//! Each in-flight request owns exactly one single-resolution slot, keyed by
//! its request id. The inbound dispatcher resolves slots as responses
//! arrive; closing the connection fails every remaining slot so no caller
//! waits forever.

use crate::core::{VerdictError, VerdictResult};
use crate::protocol::VerdictResponse;

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tokio::sync::oneshot;
use tokio::time::Instant;

/// What a resolved slot delivers to its waiter.
pub(crate) type SlotResult = VerdictResult<VerdictResponse>;

#[derive(Debug)]
struct Slot {
    sender: oneshot::Sender<SlotResult>,
    registered_at: Instant,
}

/// Concurrent map from request id to a single-resolution result slot.
///
/// Safe to call from any number of tasks; each operation holds the internal
/// lock only briefly and never across an await point.
#[derive(Debug, Default)]
pub(crate) struct PendingRequests {
    slots: Mutex<HashMap<String, Slot>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a slot for `request_id` and returns the receiver its
    /// resolution will arrive on.
    ///
    /// Registering an id that is already in flight is a caller error and
    /// leaves the existing slot untouched.
    pub fn register(&self, request_id: &str) -> VerdictResult<oneshot::Receiver<SlotResult>> {
        let mut slots = self.lock();
        if slots.contains_key(request_id) {
            return Err(VerdictError::duplicate_request(request_id));
        }
        let (sender, receiver) = oneshot::channel();
        slots.insert(
            request_id.to_string(),
            Slot {
                sender,
                registered_at: Instant::now(),
            },
        );
        Ok(receiver)
    }

    /// Removes the slot for `request_id` and completes it with `result`.
    ///
    /// A resolution for an id with no registered slot is silently dropped:
    /// the server answered a request nobody is waiting for anymore (already
    /// resolved, timed out, or from a previous connection).
    pub fn resolve(&self, request_id: &str, result: SlotResult) {
        let slot = self.lock().remove(request_id);
        match slot {
            Some(slot) => {
                let waited = slot.registered_at.elapsed();
                if slot.sender.send(result).is_err() {
                    // The waiter gave up (cancelled or timed out) between
                    // lookup and delivery.
                    tracing::trace!(request_id, ?waited, "waiter gone, dropping resolution");
                } else {
                    tracing::debug!(request_id, ?waited, "resolved pending request");
                }
            }
            None => {
                tracing::trace!(request_id, "no pending slot, dropping resolution");
            }
        }
    }

    /// Removes the slot for `request_id` without resolving it.
    ///
    /// Used when the waiter abandons the request (timeout, cancellation).
    /// Returns `true` if a slot was removed.
    pub fn remove(&self, request_id: &str) -> bool {
        self.lock().remove(request_id).is_some()
    }

    /// Drains the table, failing every outstanding slot with an error
    /// produced by `cause`.
    pub fn fail_all<F>(&self, cause: F)
    where
        F: Fn() -> VerdictError,
    {
        let drained: Vec<(String, Slot)> = self.lock().drain().collect();
        if drained.is_empty() {
            return;
        }
        tracing::debug!(count = drained.len(), "failing all pending requests");
        for (request_id, slot) in drained {
            if slot.sender.send(Err(cause())).is_err() {
                tracing::trace!(request_id, "waiter gone during fail_all");
            }
        }
    }

    /// Number of requests currently in flight.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if no requests are in flight.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
