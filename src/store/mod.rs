//! Durable per-actor session storage.
//!
//! `StateStore` is the only entry point the coordinator uses. It wraps one
//! injected `SessionBackend` and degrades to an in-process fallback whenever
//! the backend is unreachable, so an interaction is never blocked or failed
//! by storage problems.

pub mod fallback;
pub mod file;
pub mod memory;
#[cfg(feature = "database")]
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[cfg(any(test, feature = "testing"))]
use mockall::automock;

use crate::config::{StoreBackendKind, StoreConfig};
use crate::observability::flow_metrics;
use crate::session::{ActorId, ActorSession};
use crate::workflows::{Step, WorkflowRegistry};

pub use fallback::FallbackStore;
pub use file::FileBackend;
pub use memory::MemoryBackend;
#[cfg(feature = "database")]
pub use sqlite::SqliteBackend;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("backing store unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("stored record for {actor} is corrupt: {reason}")]
    Corrupt { actor: ActorId, reason: String },

    #[cfg(feature = "database")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Raw keyed storage for encoded sessions. Implementations do not interpret
/// the records; decoding and integrity checks happen in `StateStore`.
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait SessionBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn load(&self, actor: &ActorId) -> Result<Option<Value>, StoreError>;

    async fn save(&self, actor: &ActorId, record: &Value) -> Result<(), StoreError>;

    async fn remove(&self, actor: &ActorId) -> Result<(), StoreError>;

    async fn list(&self) -> Result<Vec<(ActorId, Value)>, StoreError>;
}

/// Result of reading an actor's session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionLookup {
    Idle,
    Active(ActorSession),
    /// The session outlived its expiry and has been cleared.
    Expired(ActorSession),
    /// The stored record could not be used and has been cleared.
    Corrupt { reason: String },
}

impl SessionLookup {
    pub fn active(self) -> Option<ActorSession> {
        match self {
            SessionLookup::Active(session) => Some(session),
            _ => None,
        }
    }
}

pub struct StateStore {
    primary: Arc<dyn SessionBackend>,
    fallback: FallbackStore,
    registry: WorkflowRegistry,
    degraded: AtomicBool,
}

impl StateStore {
    pub fn new(primary: Arc<dyn SessionBackend>, registry: WorkflowRegistry) -> Self {
        Self {
            primary,
            fallback: FallbackStore::new(),
            registry,
            degraded: AtomicBool::new(false),
        }
    }

    pub fn in_memory(registry: WorkflowRegistry) -> Self {
        Self::new(Arc::new(MemoryBackend::new()), registry)
    }

    /// Build the store selected by configuration.
    pub async fn from_config(
        config: &StoreConfig,
        registry: WorkflowRegistry,
    ) -> Result<Self, StoreError> {
        let backend: Arc<dyn SessionBackend> = match config.backend {
            StoreBackendKind::Memory => Arc::new(MemoryBackend::new()),
            StoreBackendKind::File => Arc::new(FileBackend::open(&config.path).await?),
            #[cfg(feature = "database")]
            StoreBackendKind::Sqlite => {
                Arc::new(SqliteBackend::connect(&config.url, config.max_connections).await?)
            }
            #[cfg(not(feature = "database"))]
            StoreBackendKind::Sqlite => {
                return Err(StoreError::Unavailable(
                    "sqlite backend requires the `database` feature".to_string(),
                ))
            }
        };
        info!(backend = backend.name(), "session store ready");
        Ok(Self::new(backend, registry))
    }

    pub fn backend_name(&self) -> &'static str {
        self.primary.name()
    }

    /// Whether the most recent backend call failed.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    pub async fn get(&self, actor: &ActorId) -> SessionLookup {
        self.get_at(actor, Utc::now()).await
    }

    pub async fn get_at(&self, actor: &ActorId, now: DateTime<Utc>) -> SessionLookup {
        let record = match self.fallback.get(actor) {
            Some(Some(record)) => Some(record),
            Some(None) => None,
            None => match self.primary.load(actor).await {
                Ok(record) => {
                    self.mark_healthy();
                    record
                }
                Err(StoreError::Corrupt { reason, .. }) => {
                    return self.discard_corrupt(actor, reason).await;
                }
                Err(e) => {
                    self.mark_degraded("load", actor, &e);
                    None
                }
            },
        };

        let Some(record) = record else {
            return SessionLookup::Idle;
        };

        let session = match self.decode(actor, record) {
            Ok(session) => session,
            Err(reason) => return self.discard_corrupt(actor, reason).await,
        };

        if session.is_expired(now) {
            debug!(actor_id = %actor, state = %session.state, "session expired lazily");
            self.clear(actor).await;
            return SessionLookup::Expired(session);
        }

        SessionLookup::Active(session)
    }

    pub async fn set(&self, session: &ActorSession) {
        let actor = &session.actor_id;
        let record = match serde_json::to_value(session) {
            Ok(record) => record,
            Err(e) => {
                error!(
                    actor_id = %actor,
                    workflow = %session.workflow,
                    state = %session.state,
                    data = %session.data.redacted(),
                    error = %e,
                    "failed to encode session"
                );
                return;
            }
        };

        match self.primary.save(actor, &record).await {
            Ok(()) => {
                self.mark_healthy();
                self.fallback.forget(actor);
            }
            Err(e) => {
                self.mark_degraded("save", actor, &e);
                self.fallback.put(actor, record);
            }
        }
    }

    /// Arm `session.expires_at` from `ttl` and persist it.
    pub async fn set_with_ttl(&self, session: &mut ActorSession, ttl: Duration) {
        session.arm_expiry(Utc::now(), ttl);
        self.set(session).await;
    }

    pub async fn clear(&self, actor: &ActorId) {
        match self.primary.remove(actor).await {
            Ok(()) => {
                self.mark_healthy();
                self.fallback.forget(actor);
            }
            Err(e) => {
                self.mark_degraded("remove", actor, &e);
                self.fallback.tombstone(actor);
            }
        }
    }

    /// Actors currently parked at `state`. Undecodable records are skipped.
    pub async fn list_by_state(&self, state: Step) -> Vec<ActorId> {
        self.list_sessions()
            .await
            .into_iter()
            .filter(|s| s.state == state)
            .map(|s| s.actor_id)
            .collect()
    }

    /// Every decodable stored session, fallback entries taking precedence.
    pub async fn list_sessions(&self) -> Vec<ActorSession> {
        let mut records: Vec<(ActorId, Value)> = match self.primary.list().await {
            Ok(records) => {
                self.mark_healthy();
                records
            }
            Err(e) => {
                warn!(error = %e, "listing sessions from fallback only");
                self.degraded.store(true, Ordering::Relaxed);
                Vec::new()
            }
        };

        records.retain(|(actor, _)| self.fallback.get(actor).is_none());
        records.extend(self.fallback.live_entries());

        let mut sessions: Vec<ActorSession> = records
            .into_iter()
            .filter_map(|(actor, record)| self.decode(&actor, record).ok())
            .collect();
        sessions.sort_by(|a, b| a.actor_id.cmp(&b.actor_id));
        sessions
    }

    fn decode(&self, actor: &ActorId, record: Value) -> Result<ActorSession, String> {
        let session: ActorSession =
            serde_json::from_value(record).map_err(|e| format!("undecodable session: {e}"))?;

        if &session.actor_id != actor {
            return Err(format!("record belongs to {}", session.actor_id));
        }
        if !self.registry.contains(session.workflow, session.state) {
            return Err(format!(
                "state {} is not part of workflow {}",
                session.state, session.workflow
            ));
        }
        Ok(session)
    }

    async fn discard_corrupt(&self, actor: &ActorId, reason: String) -> SessionLookup {
        error!(actor_id = %actor, reason = %reason, "discarding corrupt session");
        self.clear(actor).await;
        SessionLookup::Corrupt { reason }
    }

    fn mark_healthy(&self) {
        if self.degraded.swap(false, Ordering::Relaxed) {
            info!(backend = self.primary.name(), "session store recovered");
        }
    }

    fn mark_degraded(&self, operation: &str, actor: &ActorId, e: &StoreError) {
        flow_metrics().record_store_degradation();
        self.degraded.store(true, Ordering::Relaxed);
        warn!(
            backend = self.primary.name(),
            operation,
            actor_id = %actor,
            error = %e,
            "session store unavailable, using volatile fallback"
        );
    }
}
