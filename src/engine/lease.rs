//! Per-record mutual exclusion across overlapping cycles

use dashmap::DashSet;
use std::sync::Arc;
use tracing::trace;
use uuid::Uuid;

/// Set of record ids currently owned by a resolver
#[derive(Clone, Default)]
pub struct RecordLeases {
    held: Arc<DashSet<Uuid>>,
}

impl RecordLeases {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` if another resolver already holds `id`
    pub fn try_acquire(&self, id: Uuid) -> Option<LeaseGuard> {
        if self.held.insert(id) {
            trace!("Lease acquired for {}", id);
            Some(LeaseGuard {
                id,
                held: self.held.clone(),
            })
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.held.len()
    }
}

/// Releases the lease on drop
pub struct LeaseGuard {
    id: Uuid,
    held: Arc<DashSet<Uuid>>,
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        self.held.remove(&self.id);
        trace!("Lease released for {}", self.id);
    }
}
