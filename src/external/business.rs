//! Business-entity API. Reached only from the side-effect dispatcher.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[cfg(any(test, feature = "testing"))]
use mockall::automock;

use crate::session::{ActorId, IdempotencyKey};
use crate::workflows::{BunkerReading, StopVisit};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BusinessError {
    /// Worth retrying: timeouts, 5xx, throttling.
    #[error("transient business API failure: {0}")]
    Transient(String),
    #[error("{entity} {id} not found")]
    NotFound { entity: String, id: String },
    #[error("request rejected: {0}")]
    Rejected(String),
}

impl BusinessError {
    pub fn is_transient(&self) -> bool {
        matches!(self, BusinessError::Transient(_))
    }
}

/// Acknowledgment of a committed call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub reference: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRef {
    pub item_id: String,
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockMovement {
    pub item_id: String,
    pub quantity: f64,
    pub confirmation_photo_url: String,
    pub received_by: ActorId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemainsAdjustment {
    pub machine_id: String,
    pub bunkers: Vec<BunkerReading>,
    pub adjusted_by: ActorId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteCompletion {
    pub route_id: Option<String>,
    pub driver: ActorId,
    pub start_mileage: f64,
    pub stops: Vec<StopVisit>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    pub machine_id: Option<String>,
    pub description: String,
    pub photo_url: String,
    pub reported_by: ActorId,
}

#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait BusinessApi: Send + Sync {
    /// Look up an inventory item by the code an actor typed.
    async fn resolve_item(&self, code: &str) -> Result<ItemRef, BusinessError>;

    async fn record_stock_movement(
        &self,
        key: &IdempotencyKey,
        movement: &StockMovement,
    ) -> Result<Receipt, BusinessError>;

    /// Apply every bunker reading of one machine as a single batch.
    async fn adjust_remains(
        &self,
        key: &IdempotencyKey,
        adjustment: &RemainsAdjustment,
    ) -> Result<Receipt, BusinessError>;

    async fn complete_route(
        &self,
        key: &IdempotencyKey,
        completion: &RouteCompletion,
    ) -> Result<Receipt, BusinessError>;

    async fn create_task(&self, key: &IdempotencyKey, task: &NewTask)
        -> Result<Receipt, BusinessError>;

    async fn activate_user(
        &self,
        key: &IdempotencyKey,
        actor: &ActorId,
        phone: &str,
    ) -> Result<Receipt, BusinessError>;

    async fn reject_registration(
        &self,
        key: &IdempotencyKey,
        actor: &ActorId,
    ) -> Result<Receipt, BusinessError>;
}
