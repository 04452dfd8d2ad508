use dashmap::DashMap;
use serde_json::Value;

use crate::session::ActorId;

/// Volatile overlay used while the primary backend is unreachable.
///
/// `Some(record)` shadows the primary with a newer write; `None` is a
/// tombstone for a clear the primary never saw. An entry is forgotten once
/// the primary accepts a write for that actor again.
#[derive(Debug, Default)]
pub struct FallbackStore {
    entries: DashMap<ActorId, Option<Value>>,
}

impl FallbackStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, actor: &ActorId) -> Option<Option<Value>> {
        self.entries.get(actor).map(|entry| entry.value().clone())
    }

    pub fn put(&self, actor: &ActorId, record: Value) {
        self.entries.insert(actor.clone(), Some(record));
    }

    pub fn tombstone(&self, actor: &ActorId) {
        self.entries.insert(actor.clone(), None);
    }

    pub fn forget(&self, actor: &ActorId) {
        self.entries.remove(actor);
    }

    pub fn live_entries(&self) -> Vec<(ActorId, Value)> {
        self.entries
            .iter()
            .filter_map(|entry| {
                entry
                    .value()
                    .as_ref()
                    .map(|record| (entry.key().clone(), record.clone()))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
