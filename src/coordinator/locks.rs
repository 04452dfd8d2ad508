use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::session::ActorId;

/// One async mutex per actor. Holding an actor's guard is the only way to
/// read-modify-write that actor's session; different actors never contend.
#[derive(Debug, Default)]
pub struct ActorLocks {
    locks: DashMap<ActorId, Arc<Mutex<()>>>,
}

impl ActorLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, actor: &ActorId) -> OwnedMutexGuard<()> {
        let mutex = self
            .locks
            .entry(actor.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();
        mutex.lock_owned().await
    }

    /// Forget locks nobody holds or waits on.
    pub fn prune(&self) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
        before - self.locks.len()
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
