use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use super::{SessionBackend, StoreError};
use crate::session::ActorId;

/// Volatile backend. Loses everything on restart; used for tests, demos and
/// deployments that accept that.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    records: DashMap<ActorId, Value>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn load(&self, actor: &ActorId) -> Result<Option<Value>, StoreError> {
        Ok(self.records.get(actor).map(|r| r.value().clone()))
    }

    async fn save(&self, actor: &ActorId, record: &Value) -> Result<(), StoreError> {
        self.records.insert(actor.clone(), record.clone());
        Ok(())
    }

    async fn remove(&self, actor: &ActorId) -> Result<(), StoreError> {
        self.records.remove(actor);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<(ActorId, Value)>, StoreError> {
        Ok(self
            .records
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect())
    }
}
