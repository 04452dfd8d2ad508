//! Shared harness for coordinator integration tests: a coordinator wired to
//! in-memory collaborators, with helpers to drive actors and inspect replies.
#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use fieldflow::external::{MemoryBusiness, MemoryIdentity, MemoryMedia, MemoryTransport};
use fieldflow::store::MemoryBackend;
use fieldflow::{
    ActorId, ActorSession, Collaborators, Coordinator, FieldflowConfig, FlowError, InboundMessage,
    RawInput, Role, SessionBackend, StateStore, StoreError, WorkflowRegistry,
};

pub const DRIVER: &str = "driver-1";
pub const WAREHOUSE: &str = "ware-1";
pub const OPERATOR: &str = "op-1";
pub const SUPERVISOR_A: &str = "sup-a1";
pub const SUPERVISOR_B: &str = "sup-a2";

/// Configuration with near-instant dispatch retries and no rate limiting to
/// speak of.
pub fn fast_config() -> FieldflowConfig {
    let mut config = FieldflowConfig::default();
    config.dispatch.base_delay_ms = 1;
    config.dispatch.max_delay_ms = 5;
    config.dispatch.jitter = false;
    config.dispatch.requests_per_second = 1_000;
    config
}

pub const ALREADY_PROCESSED: &str = "That message was already processed.";

pub fn staff() -> MemoryIdentity {
    MemoryIdentity::new()
        .with_actor(DRIVER, "Dana", &[Role::Driver])
        .with_actor(WAREHOUSE, "Wes", &[Role::Warehouse])
        .with_actor(OPERATOR, "Oli", &[Role::Operator])
        .with_actor(SUPERVISOR_A, "Sam", &[Role::Supervisor])
        .with_actor(SUPERVISOR_B, "Sky", &[Role::Supervisor])
}

pub fn catalog() -> MemoryBusiness {
    MemoryBusiness::new()
        .with_item("SKU-7", "item-7", "Cola 0.5l")
        .with_item("SKU-9", "item-9", "Crisps 40g")
}

pub struct Harness {
    pub coordinator: Arc<Coordinator>,
    pub store: Arc<StateStore>,
    pub business: Arc<MemoryBusiness>,
    pub identity: Arc<MemoryIdentity>,
    pub media: Arc<MemoryMedia>,
    pub transport: Arc<MemoryTransport>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(fast_config())
    }

    pub fn with_config(config: FieldflowConfig) -> Self {
        let store = Arc::new(StateStore::in_memory(WorkflowRegistry::standard()));
        Self::build(config, store)
    }

    pub fn with_backend(backend: Arc<dyn SessionBackend>) -> Self {
        Self::with_backend_and_config(backend, fast_config())
    }

    pub fn with_backend_and_config(backend: Arc<dyn SessionBackend>, config: FieldflowConfig) -> Self {
        let store = Arc::new(StateStore::new(backend, WorkflowRegistry::standard()));
        Self::build(config, store)
    }

    fn build(config: FieldflowConfig, store: Arc<StateStore>) -> Self {
        let business = Arc::new(catalog());
        let identity = Arc::new(staff());
        let media = Arc::new(MemoryMedia::default());
        let transport = Arc::new(MemoryTransport::new());

        let coordinator = Arc::new(Coordinator::new(
            store.clone(),
            Collaborators {
                identity: identity.clone(),
                business: business.clone(),
                media: media.clone(),
                transport: transport.clone(),
            },
            &config,
        ));

        Self {
            coordinator,
            store,
            business,
            identity,
            media,
            transport,
        }
    }

    /// Deliver `input` from `actor` with the transport's next sequence number.
    pub async fn send(&self, actor: &str, input: RawInput) -> Result<(), FlowError> {
        let actor = ActorId::new(actor);
        let seq = self.transport.next_seq(&actor);
        self.coordinator
            .handle_message(InboundMessage::new(actor, seq, input))
            .await
    }

    /// Deliver `input` with an explicit sequence number, e.g. a redelivery.
    pub async fn send_seq(&self, actor: &str, seq: u64, input: RawInput) -> Result<(), FlowError> {
        self.coordinator
            .handle_message(InboundMessage::new(ActorId::new(actor), seq, input))
            .await
    }

    pub async fn text(&self, actor: &str, text: &str) {
        self.send(actor, RawInput::text(text))
            .await
            .expect("input handled");
    }

    pub async fn choose(&self, actor: &str, key: &str) {
        self.send(actor, RawInput::choice(key))
            .await
            .expect("input handled");
    }

    pub async fn photo(&self, actor: &str, attachment_id: &str) {
        self.send(actor, RawInput::photo(attachment_id))
            .await
            .expect("input handled");
    }

    pub async fn session(&self, actor: &str) -> Option<ActorSession> {
        self.store.get(&ActorId::new(actor)).await.active()
    }

    pub fn replies(&self, actor: &str) -> Vec<String> {
        self.transport
            .sent_to(&ActorId::new(actor))
            .into_iter()
            .map(|m| m.prompt.text)
            .collect()
    }

    pub fn last_reply(&self, actor: &str) -> String {
        self.replies(actor).pop().unwrap_or_default()
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.coordinator.shutdown();
    }
}

/// Backend that can be switched off, fully or for writes only, to simulate
/// an unreachable store.
#[derive(Default)]
pub struct SwitchableBackend {
    inner: MemoryBackend,
    down: AtomicBool,
    read_only: AtomicBool,
}

impl SwitchableBackend {
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }

    fn check_write(&self) -> Result<(), StoreError> {
        self.check()?;
        if self.read_only.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("read-only replica".to_string()));
        }
        Ok(())
    }

    pub async fn stored(&self, actor: &str) -> Option<Value> {
        self.inner.load(&ActorId::new(actor)).await.ok().flatten()
    }
}

#[async_trait]
impl SessionBackend for SwitchableBackend {
    fn name(&self) -> &'static str {
        "switchable"
    }

    async fn load(&self, actor: &ActorId) -> Result<Option<Value>, StoreError> {
        self.check()?;
        self.inner.load(actor).await
    }

    async fn save(&self, actor: &ActorId, record: &Value) -> Result<(), StoreError> {
        self.check_write()?;
        self.inner.save(actor, record).await
    }

    async fn remove(&self, actor: &ActorId) -> Result<(), StoreError> {
        self.check_write()?;
        self.inner.remove(actor).await
    }

    async fn list(&self) -> Result<Vec<(ActorId, Value)>, StoreError> {
        self.check()?;
        self.inner.list().await
    }
}
