//! In-process collaborators for tests and the console demo.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

use super::business::{
    BusinessApi, BusinessError, ItemRef, NewTask, Receipt, RemainsAdjustment, RouteCompletion,
    StockMovement,
};
use super::identity::{ActorProfile, ActorStatus, IdentityError, IdentityLookup};
use super::media::{MediaError, MediaIngestion};
use super::transport::{Transport, TransportError};
use crate::session::{ActorId, IdempotencyKey, InboundMessage, OutboundMessage};
use crate::workflows::{GeoPoint, PhotoRef, Role};

#[derive(Debug, Default)]
pub struct MemoryIdentity {
    profiles: DashMap<ActorId, ActorProfile>,
}

impl MemoryIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_actor(self, id: &str, name: &str, roles: &[Role]) -> Self {
        self.upsert(ActorProfile {
            actor_id: ActorId::new(id),
            roles: roles.to_vec(),
            display_name: name.to_string(),
            status: ActorStatus::Active,
        });
        self
    }

    pub fn upsert(&self, profile: ActorProfile) {
        self.profiles.insert(profile.actor_id.clone(), profile);
    }
}

#[async_trait]
impl IdentityLookup for MemoryIdentity {
    async fn get_actor_profile(&self, actor: &ActorId) -> Result<ActorProfile, IdentityError> {
        self.profiles
            .get(actor)
            .map(|p| p.value().clone())
            .ok_or_else(|| IdentityError::NotFound(actor.clone()))
    }

    async fn list_supervisors(&self) -> Result<Vec<ActorId>, IdentityError> {
        let mut supervisors: Vec<ActorId> = self
            .profiles
            .iter()
            .filter(|p| p.has_role(Role::Supervisor))
            .map(|p| p.key().clone())
            .collect();
        supervisors.sort();
        Ok(supervisors)
    }
}

/// One committed call, as the business API saw it.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCall {
    StockMovement(IdempotencyKey, StockMovement),
    RemainsAdjustment(IdempotencyKey, RemainsAdjustment),
    RouteCompletion(IdempotencyKey, RouteCompletion),
    Task(IdempotencyKey, NewTask),
    Activation(IdempotencyKey, ActorId, String),
    Rejection(IdempotencyKey, ActorId),
}

/// Business API double. Failures queued with `fail_next` are returned, in
/// order, by the next mutating calls before anything is recorded.
#[derive(Debug, Default)]
pub struct MemoryBusiness {
    items: DashMap<String, ItemRef>,
    calls: Mutex<Vec<RecordedCall>>,
    failures: Mutex<VecDeque<BusinessError>>,
    lookup_failures: Mutex<VecDeque<BusinessError>>,
    attempts: AtomicU64,
    receipts: AtomicU64,
}

impl MemoryBusiness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_item(self, code: &str, item_id: &str, name: &str) -> Self {
        self.items.insert(
            code.to_uppercase(),
            ItemRef {
                item_id: item_id.to_string(),
                code: code.to_uppercase(),
                name: name.to_string(),
            },
        );
        self
    }

    pub fn fail_next(&self, error: BusinessError) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.push_back(error);
        }
    }

    /// Fail the next item lookup. Lookups are not counted as attempts.
    pub fn fail_next_lookup(&self, error: BusinessError) {
        if let Ok(mut failures) = self.lookup_failures.lock() {
            failures.push_back(error);
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Mutating calls made, including failed ones.
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    fn commit(&self, call: RecordedCall) -> Result<Receipt, BusinessError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.failures.lock().ok().and_then(|mut f| f.pop_front()) {
            return Err(error);
        }
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
        let n = self.receipts.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Receipt {
            reference: format!("rcpt-{n}"),
        })
    }
}

#[async_trait]
impl BusinessApi for MemoryBusiness {
    async fn resolve_item(&self, code: &str) -> Result<ItemRef, BusinessError> {
        if let Some(error) = self.lookup_failures.lock().ok().and_then(|mut f| f.pop_front()) {
            return Err(error);
        }
        self.items
            .get(&code.to_uppercase())
            .map(|i| i.value().clone())
            .ok_or_else(|| BusinessError::NotFound {
                entity: "item".to_string(),
                id: code.to_string(),
            })
    }

    async fn record_stock_movement(
        &self,
        key: &IdempotencyKey,
        movement: &StockMovement,
    ) -> Result<Receipt, BusinessError> {
        self.commit(RecordedCall::StockMovement(key.clone(), movement.clone()))
    }

    async fn adjust_remains(
        &self,
        key: &IdempotencyKey,
        adjustment: &RemainsAdjustment,
    ) -> Result<Receipt, BusinessError> {
        self.commit(RecordedCall::RemainsAdjustment(key.clone(), adjustment.clone()))
    }

    async fn complete_route(
        &self,
        key: &IdempotencyKey,
        completion: &RouteCompletion,
    ) -> Result<Receipt, BusinessError> {
        self.commit(RecordedCall::RouteCompletion(key.clone(), completion.clone()))
    }

    async fn create_task(
        &self,
        key: &IdempotencyKey,
        task: &NewTask,
    ) -> Result<Receipt, BusinessError> {
        self.commit(RecordedCall::Task(key.clone(), task.clone()))
    }

    async fn activate_user(
        &self,
        key: &IdempotencyKey,
        actor: &ActorId,
        phone: &str,
    ) -> Result<Receipt, BusinessError> {
        self.commit(RecordedCall::Activation(
            key.clone(),
            actor.clone(),
            phone.to_string(),
        ))
    }

    async fn reject_registration(
        &self,
        key: &IdempotencyKey,
        actor: &ActorId,
    ) -> Result<Receipt, BusinessError> {
        self.commit(RecordedCall::Rejection(key.clone(), actor.clone()))
    }
}

/// Resolves every attachment to a URL under `base_url`, except ids marked
/// missing.
#[derive(Debug)]
pub struct MemoryMedia {
    base_url: String,
    missing: DashMap<String, ()>,
}

impl Default for MemoryMedia {
    fn default() -> Self {
        Self::new("https://media.local")
    }
}

impl MemoryMedia {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            missing: DashMap::new(),
        }
    }

    pub fn mark_missing(&self, attachment_id: &str) {
        self.missing.insert(attachment_id.to_string(), ());
    }

    pub fn url_for(&self, attachment_id: &str) -> String {
        format!("{}/{}", self.base_url, attachment_id)
    }
}

#[async_trait]
impl MediaIngestion for MemoryMedia {
    async fn resolve_photo(&self, attachment_id: &str) -> Result<PhotoRef, MediaError> {
        if attachment_id.is_empty() {
            return Err(MediaError::Invalid("empty attachment id".to_string()));
        }
        if self.missing.contains_key(attachment_id) {
            return Err(MediaError::NotFound(attachment_id.to_string()));
        }
        Ok(PhotoRef {
            attachment_id: attachment_id.to_string(),
            url: self.url_for(attachment_id),
        })
    }

    async fn resolve_location(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<GeoPoint, MediaError> {
        let point = GeoPoint {
            latitude,
            longitude,
        };
        if !point.is_valid() {
            return Err(MediaError::Invalid(format!(
                "coordinates out of range: {latitude},{longitude}"
            )));
        }
        Ok(point)
    }
}

/// Transport double: inbound messages are pushed through `sender()`,
/// outbound prompts are collected for inspection. `next_seq` numbers inputs
/// per actor the way a real transport would.
pub struct MemoryTransport {
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<InboundMessage>>,
    sender: mpsc::UnboundedSender<InboundMessage>,
    outbox: Mutex<Vec<OutboundMessage>>,
    sequences: DashMap<ActorId, u64>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            inbound: tokio::sync::Mutex::new(receiver),
            sender,
            outbox: Mutex::new(Vec::new()),
            sequences: DashMap::new(),
        }
    }

    pub fn next_seq(&self, actor: &ActorId) -> u64 {
        let mut seq = self.sequences.entry(actor.clone()).or_insert(0);
        *seq += 1;
        *seq
    }

    pub fn sender(&self) -> mpsc::UnboundedSender<InboundMessage> {
        self.sender.clone()
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.outbox.lock().map(|o| o.clone()).unwrap_or_default()
    }

    pub fn sent_to(&self, actor: &ActorId) -> Vec<OutboundMessage> {
        self.sent()
            .into_iter()
            .filter(|m| &m.to == actor)
            .collect()
    }

    pub fn last_to(&self, actor: &ActorId) -> Option<OutboundMessage> {
        self.sent_to(actor).pop()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, message: &OutboundMessage) -> Result<(), TransportError> {
        self.outbox
            .lock()
            .map_err(|_| TransportError::Delivery {
                to: message.to.clone(),
                reason: "outbox poisoned".to_string(),
            })?
            .push(message.clone());
        Ok(())
    }

    async fn next_input(&self) -> Result<Option<InboundMessage>, TransportError> {
        Ok(self.inbound.lock().await.recv().await)
    }

    fn resume_after(&self, actor: &ActorId, last_seq: u64) {
        let mut seq = self.sequences.entry(actor.clone()).or_insert(0);
        *seq = (*seq).max(last_seq);
    }
}
