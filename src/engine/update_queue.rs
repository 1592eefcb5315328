//! Update Queue - Pending updates shared by a node pair.
//!
//! A committed node and its paired buffer share ONE queue: appending through
//! either id makes the update visible to both, since the next pass may start
//! from either copy.
//!
//! # Lifecycle of an update
//!
//! ```text
//! create_update() → enqueue_update() → pending
//!                                         │ process_update_queue()
//!                                         ▼
//!                                     in flight ──abort──► front of pending
//!                                         │ commit_update_queue()
//!                                         ▼
//!                                 callback runs, record dropped
//! ```
//!
//! Records appended while a pass is in flight stay pending and are observed by
//! the next pass. Nothing is dropped; nothing is applied twice.

use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use crate::error::{ReconcilerError, Result};
use crate::host::HostConfig;
use crate::types::{Deadline, Element, NodeId};

use super::arena::WorkTree;

// =============================================================================
// Types
// =============================================================================

/// Payload of a root update. The field name `element` is what inspection
/// tools read.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdatePayload {
    pub element: Option<Rc<Element>>,
}

/// A callback argument as received from callers.
pub enum UpdateCallback {
    Callable(Box<dyn FnOnce()>),
    /// Something that is not a function, described for diagnostics.
    NotCallable(String),
}

impl UpdateCallback {
    pub fn new(callback: impl FnOnce() + 'static) -> Self {
        Self::Callable(Box::new(callback))
    }

    pub fn not_callable(description: impl Into<String>) -> Self {
        Self::NotCallable(description.into())
    }
}

impl fmt::Debug for UpdateCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Callable(_) => f.write_str("Callable"),
            Self::NotCallable(description) => write!(f, "NotCallable({description})"),
        }
    }
}

/// One requested change.
pub struct Update {
    pub expiration_time: Deadline,
    pub payload: Option<UpdatePayload>,
    pub callback: Option<Box<dyn FnOnce()>>,
    /// Insertion sequence within its queue, assigned on enqueue.
    seq: u64,
}

impl Update {
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

impl fmt::Debug for Update {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Update")
            .field("expiration_time", &self.expiration_time)
            .field("payload", &self.payload)
            .field("callback", &self.callback.is_some())
            .field("seq", &self.seq)
            .finish()
    }
}

/// Allocate an update with no payload or callback.
pub fn create_update(expiration_time: Deadline) -> Update {
    Update {
        expiration_time,
        payload: None,
        callback: None,
        seq: 0,
    }
}

/// What a pass sees of an update it processed.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedUpdate {
    pub seq: u64,
    pub expiration_time: Deadline,
    pub payload: Option<UpdatePayload>,
    pub has_callback: bool,
}

#[derive(Debug, Default)]
pub(crate) struct UpdateQueue {
    pending: VecDeque<Update>,
    in_flight: Vec<Update>,
    next_seq: u64,
}

impl UpdateQueue {
    fn earliest_pending(&self) -> Option<Deadline> {
        self.pending.iter().map(|update| update.expiration_time).min()
    }
}

// =============================================================================
// Queue Operations
// =============================================================================

impl<H: HostConfig> WorkTree<H> {
    /// Append `update` to the queue shared by `node` and its pair.
    ///
    /// Returns the sequence number assigned to the update.
    pub fn enqueue_update(&mut self, node: NodeId, mut update: Update) -> Result<u64> {
        if !self.contains(node) {
            return Err(ReconcilerError::invariant(format!(
                "enqueue_update: target node {node:?} does not exist"
            )));
        }
        let queue_id = self.ensure_queue(node)?;
        let queue = self.queue_mut(queue_id)?;
        update.seq = queue.next_seq;
        queue.next_seq += 1;
        let seq = update.seq;
        queue.pending.push_back(update);
        Ok(seq)
    }

    /// Move every pending update at least as urgent as `render` in flight.
    ///
    /// Returns them in insertion order. Less urgent updates stay pending, and
    /// `node.expiration_time` is set to the most urgent of them.
    pub fn process_update_queue(
        &mut self,
        node: NodeId,
        render: Deadline,
    ) -> Result<Vec<ProcessedUpdate>> {
        let Some(queue_id) = self.get(node)?.update_queue else {
            return Ok(Vec::new());
        };
        let queue = self.queue_mut(queue_id)?;

        let mut processed = Vec::new();
        let mut skipped = VecDeque::new();
        while let Some(update) = queue.pending.pop_front() {
            if update.expiration_time.is_satisfied_by(render) {
                processed.push(ProcessedUpdate {
                    seq: update.seq,
                    expiration_time: update.expiration_time,
                    payload: update.payload.clone(),
                    has_callback: update.callback.is_some(),
                });
                queue.in_flight.push(update);
            } else {
                skipped.push_back(update);
            }
        }
        queue.pending = skipped;
        let remaining = queue.earliest_pending();

        self.get_mut(node)?.expiration_time = remaining;
        Ok(processed)
    }

    /// Finish the in-flight updates of `node`'s queue: run their callbacks in
    /// order and drop them. Returns how many were committed.
    pub fn commit_update_queue(&mut self, node: NodeId) -> Result<usize> {
        let Some(queue_id) = self.get(node)?.update_queue else {
            return Ok(0);
        };
        let committed = std::mem::take(&mut self.queue_mut(queue_id)?.in_flight);
        let count = committed.len();
        for update in committed {
            if let Some(callback) = update.callback {
                callback();
            }
        }
        Ok(count)
    }

    /// Return in-flight updates of `node`'s queue to the front of the queue.
    pub fn abort_update_queue(&mut self, node: NodeId) -> Result<()> {
        let Some(queue_id) = self.get(node)?.update_queue else {
            return Ok(());
        };
        let queue = self.queue_mut(queue_id)?;
        Self::requeue_in_flight(queue);
        Ok(())
    }

    /// Abort every pass left in flight in this tree.
    pub(crate) fn abort_all_in_flight(&mut self) {
        for queue in self.queues.iter_mut().flatten() {
            Self::requeue_in_flight(queue);
        }
    }

    fn requeue_in_flight(queue: &mut UpdateQueue) {
        for update in queue.in_flight.drain(..).rev() {
            queue.pending.push_front(update);
        }
    }

    /// Pending (not in flight) updates of `node`'s queue as (seq, deadline).
    pub fn pending_updates(&self, node: NodeId) -> Vec<(u64, Deadline)> {
        self.node(node)
            .and_then(|node| node.update_queue)
            .and_then(|queue_id| self.queues.get(queue_id)?.as_ref())
            .map(|queue| {
                queue
                    .pending
                    .iter()
                    .map(|update| (update.seq, update.expiration_time))
                    .collect()
            })
            .unwrap_or_default()
    }

    // =========================================================================
    // Storage
    // =========================================================================

    fn ensure_queue(&mut self, node: NodeId) -> Result<usize> {
        if let Some(queue_id) = self.get(node)?.update_queue {
            return Ok(queue_id);
        }

        let queue_id = match self.free_queues.pop() {
            Some(queue_id) => {
                self.queues[queue_id] = Some(UpdateQueue::default());
                queue_id
            }
            None => {
                self.queues.push(Some(UpdateQueue::default()));
                self.queues.len() - 1
            }
        };

        // Both copies of the pair share the queue
        self.get_mut(node)?.update_queue = Some(queue_id);
        if let Some(pair) = self.alternate(node) {
            self.get_mut(pair)?.update_queue = Some(queue_id);
        }
        Ok(queue_id)
    }

    fn queue_mut(&mut self, queue_id: usize) -> Result<&mut UpdateQueue> {
        self.queues
            .get_mut(queue_id)
            .and_then(Option::as_mut)
            .ok_or_else(|| ReconcilerError::invariant(format!("update queue {queue_id} is missing")))
    }

    pub(crate) fn free_queue(&mut self, queue_id: usize) {
        if let Some(slot) = self.queues.get_mut(queue_id) {
            if slot.take().is_some() {
                self.free_queues.push(queue_id);
            }
        }
    }
}
