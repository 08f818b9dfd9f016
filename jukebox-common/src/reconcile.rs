//! Optimistic client state with last-snapshot-wins reconciliation
//!
//! Clients may apply a speculative mutation the moment a user acts (e.g. a
//! kiosk showing its request at the end of the queue). Each speculative
//! mutation is tagged with a monotonic request id. When an authoritative
//! snapshot newer than the one held arrives, it replaces local state
//! wholesale and every pending speculation is discarded unconditionally.
//! There is no diffing or merging.

use std::collections::BTreeMap;

/// Monotonic id of a speculative mutation
pub type RequestId = u64;

type Mutation<T> = Box<dyn Fn(&mut T) + Send + Sync>;

/// Authoritative snapshot plus pending speculative mutations
pub struct OptimisticView<T: Clone> {
    authoritative: T,
    revision: Option<i64>,
    pending: BTreeMap<RequestId, Mutation<T>>,
    next_request_id: RequestId,
}

impl<T: Clone> OptimisticView<T> {
    /// Start from a locally constructed initial value (revision unknown)
    pub fn new(initial: T) -> Self {
        Self {
            authoritative: initial,
            revision: None,
            pending: BTreeMap::new(),
            next_request_id: 1,
        }
    }

    /// Apply a speculative mutation on top of the authoritative state
    pub fn apply_speculative<F>(&mut self, mutation: F) -> RequestId
    where
        F: Fn(&mut T) + Send + Sync + 'static,
    {
        let id = self.next_request_id;
        self.next_request_id += 1;
        self.pending.insert(id, Box::new(mutation));
        id
    }

    /// Drop one speculative mutation (its request failed)
    pub fn discard(&mut self, request_id: RequestId) -> bool {
        self.pending.remove(&request_id).is_some()
    }

    /// Accept an authoritative snapshot
    ///
    /// Snapshots with a revision not newer than the one held are stale
    /// (at-least-once delivery, reconnect replays) and are ignored.
    /// Returns true when the snapshot was accepted.
    pub fn apply_snapshot(&mut self, revision: i64, snapshot: T) -> bool {
        if let Some(current) = self.revision {
            if revision <= current {
                return false;
            }
        }
        self.authoritative = snapshot;
        self.revision = Some(revision);
        self.pending.clear();
        true
    }

    /// Authoritative state with pending speculation applied in request order
    pub fn current(&self) -> T {
        let mut view = self.authoritative.clone();
        for mutation in self.pending.values() {
            mutation(&mut view);
        }
        view
    }

    /// Last accepted authoritative state, ignoring speculation
    pub fn authoritative(&self) -> &T {
        &self.authoritative
    }

    pub fn revision(&self) -> Option<i64> {
        self.revision
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
