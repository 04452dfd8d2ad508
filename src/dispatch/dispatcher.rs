use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use moka::future::Cache;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::effects::{EffectRequest, SideEffect};
use super::retry::RetryPolicy;
use super::DispatchError;
use crate::config::DispatchConfig;
use crate::external::{
    BusinessApi, NewTask, Receipt, RemainsAdjustment, RouteCompletion, StockMovement,
};
use crate::observability::flow_metrics;
use crate::session::IdempotencyKey;

const LEDGER_CAPACITY: u64 = 100_000;
const LEDGER_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Committed(Receipt),
    /// The key was already committed; no external call was made.
    Replayed(Receipt),
}

impl DispatchOutcome {
    pub fn receipt(&self) -> &Receipt {
        match self {
            DispatchOutcome::Committed(r) | DispatchOutcome::Replayed(r) => r,
        }
    }
}

/// Performs the external calls implied by terminal states, at most once per
/// idempotency key, throttled and with bounded retry.
pub struct Dispatcher {
    business: Arc<dyn BusinessApi>,
    limiter: Arc<DefaultDirectRateLimiter>,
    retry: RetryPolicy,
    ledger: Cache<IdempotencyKey, Receipt>,
}

impl Dispatcher {
    pub fn new(business: Arc<dyn BusinessApi>, config: &DispatchConfig) -> Self {
        let rps = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let limiter = Arc::new(RateLimiter::direct(Quota::per_second(rps)));

        let ledger = Cache::builder()
            .max_capacity(LEDGER_CAPACITY)
            .time_to_live(LEDGER_TTL)
            .build();

        Self {
            business,
            limiter,
            retry: RetryPolicy::from_config(config),
            ledger,
        }
    }

    pub async fn is_committed(&self, key: &IdempotencyKey) -> bool {
        self.ledger.contains_key(key)
    }

    pub async fn dispatch(&self, request: &EffectRequest) -> Result<DispatchOutcome, DispatchError> {
        if let Some(receipt) = self.ledger.get(&request.key).await {
            flow_metrics().record_dispatch_replay();
            info!(
                actor_id = %request.actor,
                key = %request.key,
                effect = request.effect.name(),
                "side effect already committed, replaying receipt"
            );
            return Ok(DispatchOutcome::Replayed(receipt));
        }

        match self.execute(request).await {
            Ok(receipt) => {
                self.ledger.insert(request.key.clone(), receipt.clone()).await;
                flow_metrics().record_dispatch_success();
                info!(
                    actor_id = %request.actor,
                    workflow = %request.workflow,
                    key = %request.key,
                    effect = request.effect.name(),
                    reference = %receipt.reference,
                    "side effect committed"
                );
                Ok(DispatchOutcome::Committed(receipt))
            }
            Err(e) => {
                flow_metrics().record_dispatch_failure();
                warn!(
                    actor_id = %request.actor,
                    workflow = %request.workflow,
                    key = %request.key,
                    effect = request.effect.name(),
                    error = %e,
                    "side effect failed"
                );
                Err(e)
            }
        }
    }

    async fn execute(&self, request: &EffectRequest) -> Result<Receipt, DispatchError> {
        let business = self.business.as_ref();
        let limiter = self.limiter.as_ref();
        let key = &request.key;
        let actor = &request.actor;
        let name = request.effect.name();

        match &request.effect {
            SideEffect::ActivateRegistrant { phone } => {
                self.retry
                    .run(name, move || async move {
                        limiter.until_ready().await;
                        business.activate_user(key, actor, phone).await
                    })
                    .await
            }
            SideEffect::RejectRegistrant => {
                self.retry
                    .run(name, move || async move {
                        limiter.until_ready().await;
                        business.reject_registration(key, actor).await
                    })
                    .await
            }
            SideEffect::CompleteRoute {
                route_id,
                start_mileage,
                stops,
            } => {
                let completion = RouteCompletion {
                    route_id: route_id.clone(),
                    driver: actor.clone(),
                    start_mileage: *start_mileage,
                    stops: stops.clone(),
                };
                let completion = &completion;
                self.retry
                    .run(name, move || async move {
                        limiter.until_ready().await;
                        business.complete_route(key, completion).await
                    })
                    .await
            }
            SideEffect::ReceiveStock {
                item_code,
                quantity,
                confirmation_photo,
            } => {
                let item = self
                    .retry
                    .run("resolve_item", move || async move {
                        limiter.until_ready().await;
                        business.resolve_item(item_code).await
                    })
                    .await?;

                let movement = StockMovement {
                    item_id: item.item_id,
                    quantity: *quantity,
                    confirmation_photo_url: confirmation_photo.url.clone(),
                    received_by: actor.clone(),
                };
                let movement = &movement;
                self.retry
                    .run(name, move || async move {
                        limiter.until_ready().await;
                        business.record_stock_movement(key, movement).await
                    })
                    .await
            }
            SideEffect::AdjustRemains {
                machine_id,
                bunkers,
            } => {
                let adjustment = RemainsAdjustment {
                    machine_id: machine_id.clone(),
                    bunkers: bunkers.clone(),
                    adjusted_by: actor.clone(),
                };
                let adjustment = &adjustment;
                self.retry
                    .run(name, move || async move {
                        limiter.until_ready().await;
                        business.adjust_remains(key, adjustment).await
                    })
                    .await
            }
            SideEffect::CreateTask {
                machine_id,
                description,
                photo,
            } => {
                let task = NewTask {
                    machine_id: machine_id.clone(),
                    description: description.clone(),
                    photo_url: photo.url.clone(),
                    reported_by: actor.clone(),
                };
                let task = &task;
                self.retry
                    .run(name, move || async move {
                        limiter.until_ready().await;
                        business.create_task(key, task).await
                    })
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::{BusinessError, MemoryBusiness, RecordedCall};
    use crate::session::ActorId;
    use crate::workflows::{ClearPolicy, PhotoRef, Workflow};
    use chrono::Utc;

    fn fast_config() -> DispatchConfig {
        DispatchConfig {
            max_attempts: 3,
            base_delay_ms: 10,
            max_delay_ms: 50,
            jitter: false,
            requests_per_second: 1000,
        }
    }

    fn receive_request() -> EffectRequest {
        let actor = ActorId::new("w-1");
        EffectRequest {
            key: IdempotencyKey::derive(&actor, Workflow::WarehouseReceive, Utc::now()),
            actor,
            workflow: Workflow::WarehouseReceive,
            policy: ClearPolicy::BeforeDispatch,
            effect: SideEffect::ReceiveStock {
                item_code: "SKU-7".to_string(),
                quantity: 12.0,
                confirmation_photo: PhotoRef {
                    attachment_id: "att-1".to_string(),
                    url: "https://media.local/att-1".to_string(),
                },
            },
        }
    }

    #[tokio::test]
    async fn test_receive_resolves_item_and_records_movement() {
        let business = Arc::new(MemoryBusiness::new().with_item("SKU-7", "item-42", "Cups"));
        let dispatcher = Dispatcher::new(business.clone(), &fast_config());
        let request = receive_request();

        let outcome = dispatcher.dispatch(&request).await.unwrap();
        assert!(matches!(outcome, DispatchOutcome::Committed(_)));

        let calls = business.calls();
        assert_eq!(calls.len(), 1);
        match &calls[0] {
            RecordedCall::StockMovement(key, movement) => {
                assert_eq!(key, &request.key);
                assert_eq!(movement.item_id, "item-42");
                assert_eq!(movement.quantity, 12.0);
                assert_eq!(movement.confirmation_photo_url, "https://media.local/att-1");
            }
            other => panic!("unexpected call {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_same_key_is_committed_once() {
        let business = Arc::new(MemoryBusiness::new().with_item("SKU-7", "item-42", "Cups"));
        let dispatcher = Dispatcher::new(business.clone(), &fast_config());
        let request = receive_request();

        dispatcher.dispatch(&request).await.unwrap();
        let second = dispatcher.dispatch(&request).await.unwrap();

        assert!(matches!(second, DispatchOutcome::Replayed(_)));
        assert_eq!(business.calls().len(), 1);
        assert!(dispatcher.is_committed(&request.key).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let business = Arc::new(MemoryBusiness::new().with_item("SKU-7", "item-42", "Cups"));
        business.fail_next(BusinessError::Transient("503".into()));
        business.fail_next(BusinessError::Transient("503".into()));
        let dispatcher = Dispatcher::new(business.clone(), &fast_config());

        assert!(dispatcher.dispatch(&receive_request()).await.is_ok());
        assert_eq!(business.attempts(), 3);
        assert_eq!(business.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_are_transient_error() {
        let business = Arc::new(MemoryBusiness::new().with_item("SKU-7", "item-42", "Cups"));
        for _ in 0..3 {
            business.fail_next(BusinessError::Transient("503".into()));
        }
        let dispatcher = Dispatcher::new(business.clone(), &fast_config());
        let request = receive_request();

        assert!(matches!(
            dispatcher.dispatch(&request).await,
            Err(DispatchError::Transient { attempts: 3, .. })
        ));
        assert!(!dispatcher.is_committed(&request.key).await);
    }

    #[tokio::test]
    async fn test_unknown_item_is_permanent() {
        let business = Arc::new(MemoryBusiness::new());
        let dispatcher = Dispatcher::new(business.clone(), &fast_config());

        assert!(matches!(
            dispatcher.dispatch(&receive_request()).await,
            Err(DispatchError::Permanent(_))
        ));
        assert_eq!(business.attempts(), 0);
    }
}
