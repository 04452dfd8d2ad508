use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

use crate::session::ActorId;

#[derive(Debug, Clone, Copy)]
struct Watermark {
    seq: u64,
    touched: Instant,
}

/// Highest sequence number seen per actor. Anything at or below it is a
/// duplicate or a stale redelivery. Sequence numbers start at 1.
#[derive(Debug, Default)]
pub struct SequenceTracker {
    last_seen: DashMap<ActorId, Watermark>,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `seq` for `actor`. Returns false when it was already covered.
    pub fn observe(&self, actor: &ActorId, seq: u64) -> bool {
        let mut mark = self.entry(actor);
        mark.touched = Instant::now();
        if seq <= mark.seq {
            return false;
        }
        mark.seq = seq;
        true
    }

    /// Raise the watermark without treating `seq` as new, e.g. from a
    /// persisted session after a restart.
    pub fn advance_to(&self, actor: &ActorId, seq: u64) {
        let mut mark = self.entry(actor);
        mark.touched = Instant::now();
        if seq > mark.seq {
            mark.seq = seq;
        }
    }

    pub fn last(&self, actor: &ActorId) -> Option<u64> {
        self.last_seen.get(actor).map(|m| m.seq)
    }

    /// Actors that sent nothing for at least `min_idle`.
    pub fn idle_for(&self, min_idle: Duration) -> Vec<ActorId> {
        self.last_seen
            .iter()
            .filter(|m| m.touched.elapsed() >= min_idle)
            .map(|m| m.key().clone())
            .collect()
    }

    /// Drop `actor`'s watermark unless it was touched within `min_idle`.
    pub fn forget_if_idle(&self, actor: &ActorId, min_idle: Duration) -> bool {
        self.last_seen
            .remove_if(actor, |_, m| m.touched.elapsed() >= min_idle)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.last_seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_seen.is_empty()
    }

    fn entry(&self, actor: &ActorId) -> dashmap::mapref::one::RefMut<'_, ActorId, Watermark> {
        self.last_seen.entry(actor.clone()).or_insert(Watermark {
            seq: 0,
            touched: Instant::now(),
        })
    }
}
