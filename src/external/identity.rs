//! Identity lookup: who an actor is and which workflows they may enter.

use async_trait::async_trait;
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[cfg(any(test, feature = "testing"))]
use mockall::automock;

use crate::config::IdentityConfig;
use crate::session::ActorId;
use crate::workflows::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorStatus {
    Active,
    /// Registered, waiting for approval.
    Pending,
    Blocked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorProfile {
    pub actor_id: ActorId,
    pub roles: Vec<Role>,
    pub display_name: String,
    pub status: ActorStatus,
}

impl ActorProfile {
    pub fn has_role(&self, role: Role) -> bool {
        self.status == ActorStatus::Active && self.roles.contains(&role)
    }
}

#[derive(Debug, Clone, Error)]
pub enum IdentityError {
    #[error("unknown actor: {0}")]
    NotFound(ActorId),
    #[error("identity service unavailable: {0}")]
    Unavailable(String),
}

#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait IdentityLookup: Send + Sync {
    async fn get_actor_profile(&self, actor: &ActorId) -> Result<ActorProfile, IdentityError>;

    /// Actors entitled to resolve registration approvals.
    async fn list_supervisors(&self) -> Result<Vec<ActorId>, IdentityError>;
}

/// Caches profiles for a short TTL in front of another lookup.
pub struct CachedIdentity {
    inner: Arc<dyn IdentityLookup>,
    cache: Cache<ActorId, ActorProfile>,
}

impl CachedIdentity {
    pub fn new(inner: Arc<dyn IdentityLookup>, config: &IdentityConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.cache_capacity)
            .time_to_live(Duration::from_secs(config.cache_ttl_secs))
            .build();
        Self { inner, cache }
    }

    /// Drop a cached profile, e.g. after the actor's status changed.
    pub async fn invalidate(&self, actor: &ActorId) {
        self.cache.invalidate(actor).await;
    }
}

#[async_trait]
impl IdentityLookup for CachedIdentity {
    async fn get_actor_profile(&self, actor: &ActorId) -> Result<ActorProfile, IdentityError> {
        if let Some(profile) = self.cache.get(actor).await {
            debug!(actor_id = %actor, "identity cache hit");
            return Ok(profile);
        }

        let profile = self.inner.get_actor_profile(actor).await?;
        self.cache.insert(actor.clone(), profile.clone()).await;
        Ok(profile)
    }

    async fn list_supervisors(&self) -> Result<Vec<ActorId>, IdentityError> {
        self.inner.list_supervisors().await
    }
}
