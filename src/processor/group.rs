//! The processor group: shared registry of live connection handlers.
//!
//! Session tasks add and remove themselves while the control task enumerates
//! and targets members, so this is the one object locked across all of them.
//! Membership is an insertion-ordered Vec rather than a keyed map: the
//! dominant operations are enumerate-all and append/remove-one, identity
//! lookup is a linear scan over a small live set, and ordering keeps listing
//! output deterministic.

use std::sync::Arc;

use tokio::sync::{RwLock, RwLockWriteGuard};
use tracing::debug;

use super::PduProcessor;

type Members = Vec<Arc<dyn PduProcessor>>;

/// Thread-safe, insertion-ordered collection of active processors.
///
/// Every operation is linearizable against every other via one internal
/// lock. For multi-step read-modify sequences (stop-everything, broadcast)
/// use [`ProcessorGroup::exclusive`] so membership cannot shift between
/// steps.
pub struct ProcessorGroup {
    members: RwLock<Members>,
}

impl ProcessorGroup {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            members: RwLock::new(Vec::new()),
        })
    }

    /// Append a processor unless already present. Returns false on duplicate.
    pub async fn add(&self, proc: Arc<dyn PduProcessor>) -> bool {
        let mut members = self.members.write().await;
        if members.iter().any(|m| Arc::ptr_eq(m, &proc)) {
            return false;
        }
        members.push(proc);
        debug!(count = members.len(), "processor added to group");
        true
    }

    /// Remove a processor if present, preserving the order of the rest.
    /// Absence is a no-op, not an error.
    pub async fn remove(&self, proc: &Arc<dyn PduProcessor>) -> bool {
        let mut members = self.members.write().await;
        let before = members.len();
        members.retain(|m| !Arc::ptr_eq(m, proc));
        let removed = members.len() != before;
        if removed {
            debug!(count = members.len(), "processor removed from group");
        }
        removed
    }

    /// Current membership size.
    pub async fn count(&self) -> usize {
        self.members.read().await.len()
    }

    /// Indexed access. Only stable relative to `count` inside an exclusive
    /// section; use [`ProcessorGroup::exclusive`] for iteration patterns.
    pub async fn get(&self, index: usize) -> Option<Arc<dyn PduProcessor>> {
        self.members.read().await.get(index).cloned()
    }

    /// Linear scan for a member bound with the given system id.
    pub async fn find(&self, system_id: &str) -> Option<Arc<dyn PduProcessor>> {
        self.members
            .read()
            .await
            .iter()
            .find(|m| m.core().system_id().as_deref() == Some(system_id))
            .cloned()
    }

    /// Clone of the current membership, in order.
    pub async fn snapshot(&self) -> Members {
        self.members.read().await.clone()
    }

    /// Scoped exclusive access for multi-step sequences. `add`/`remove` from
    /// other tasks block until the guard drops.
    pub async fn exclusive(&self) -> GroupGuard<'_> {
        GroupGuard {
            members: self.members.write().await,
        }
    }
}

/// Exclusive view over a group's membership.
///
/// Holding this guard pins membership: indexes observed via `count` stay
/// valid for `at` until the guard is dropped.
pub struct GroupGuard<'a> {
    members: RwLockWriteGuard<'a, Members>,
}

impl GroupGuard<'_> {
    pub fn count(&self) -> usize {
        self.members.len()
    }

    pub fn at(&self, index: usize) -> Option<&Arc<dyn PduProcessor>> {
        self.members.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn PduProcessor>> {
        self.members.iter()
    }

    /// Remove and return every member. Used by coordinated shutdown, which
    /// owns the matching back-reference cleanup.
    pub fn drain(&mut self) -> Members {
        self.members.drain(..).collect()
    }
}
