//! Pending set: identifiers waiting to be processed.
//!
//! Insertion ordered and deduplicated. The persistence scheduler uses one to
//! batch writes and the dispatch loop uses another to batch broadcasts.

use crate::model::Mmsi;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};

#[derive(Debug, Default)]
struct Inner {
    order: VecDeque<Mmsi>,
    members: HashSet<Mmsi>,
}

/// FIFO set of vessel identifiers.
///
/// Marking an identifier that is already pending is a no-op, so a vessel
/// updated many times between two drains is drained once.
#[derive(Debug, Default)]
pub struct PendingSet {
    inner: Mutex<Inner>,
}

impl PendingSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark an identifier as pending. Returns `true` if it was newly added.
    pub fn mark(&self, id: Mmsi) -> bool {
        let mut inner = self.inner.lock();
        if inner.members.insert(id) {
            inner.order.push_back(id);
            true
        } else {
            false
        }
    }

    /// Mark several identifiers, keeping their relative order.
    pub fn mark_all<I>(&self, ids: I)
    where
        I: IntoIterator<Item = Mmsi>,
    {
        let mut inner = self.inner.lock();
        for id in ids {
            if inner.members.insert(id) {
                inner.order.push_back(id);
            }
        }
    }

    /// Put identifiers back ahead of everything pending, keeping their order.
    ///
    /// An identifier marked again since it was drained moves up to its
    /// requeued slot instead of appearing twice.
    pub fn requeue_front<I>(&self, ids: I)
    where
        I: IntoIterator<Item = Mmsi>,
    {
        let mut seen = HashSet::new();
        let front: Vec<Mmsi> = ids.into_iter().filter(|id| seen.insert(*id)).collect();
        if front.is_empty() {
            return;
        }
        let mut inner = self.inner.lock();
        inner.order.retain(|id| !seen.contains(id));
        for id in front.into_iter().rev() {
            inner.members.insert(id);
            inner.order.push_front(id);
        }
    }

    /// Remove and return up to `max` identifiers, oldest first.
    pub fn drain(&self, max: usize) -> Vec<Mmsi> {
        let mut inner = self.inner.lock();
        let count = max.min(inner.order.len());
        let batch: Vec<Mmsi> = inner.order.drain(..count).collect();
        for id in &batch {
            inner.members.remove(id);
        }
        batch
    }

    pub fn contains(&self, id: &Mmsi) -> bool {
        self.inner.lock().members.contains(id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
