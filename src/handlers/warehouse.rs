use async_trait::async_trait;
use tracing::warn;

use super::{advance, media_retry, wrong_class, StepContext, StepHandler, StepInput, StepOutcome};
use crate::external::BusinessError;
use crate::session::ActorSession;
use crate::workflows::registry::{ITEM_CODE, QUANTITY};
use crate::workflows::{
    fill_once, ReceiveData, RetryReason, SessionData, Step, TransitionContext, Trigger, Workflow,
};

/// Warehouse receiving: item code, quantity, confirmation photo.
pub struct WarehouseReceiveHandler;

#[async_trait]
impl StepHandler for WarehouseReceiveHandler {
    fn workflow(&self) -> Workflow {
        Workflow::WarehouseReceive
    }

    async fn handle(
        &self,
        ctx: &StepContext<'_>,
        session: &ActorSession,
        input: &StepInput,
    ) -> StepOutcome {
        let mut receive = match &session.data {
            SessionData::WarehouseReceive(d) => d.clone(),
            _ => ReceiveData::default(),
        };

        let trigger = match (session.state, input) {
            (Step::AwaitingItemIdentifier, StepInput::Text(text)) => {
                let code = match ITEM_CODE.check_text(text) {
                    Ok(code) => code,
                    Err(reason) => return StepOutcome::Retry(reason),
                };
                match ctx.catalog.resolve_item(&code).await {
                    Ok(_) => {}
                    // The dispatcher resolves the code again at commit time.
                    Err(BusinessError::Transient(e)) => {
                        warn!(actor_id = %session.actor_id, item_code = %code, error = %e, "item lookup unavailable");
                    }
                    Err(_) => return StepOutcome::Retry(RetryReason::UnknownItem { code }),
                }
                fill_once(&mut receive.item_code, code);
                Trigger::FreeText
            }
            (Step::AwaitingQuantity, StepInput::Text(text)) => {
                match QUANTITY.parse_number(text) {
                    Ok(quantity) => fill_once(&mut receive.quantity, quantity),
                    Err(reason) => return StepOutcome::Retry(reason),
                };
                Trigger::Numeric
            }
            (Step::AwaitingConfirmationPhoto, StepInput::Photo(attachment_id)) => {
                match ctx.media.resolve_photo(attachment_id).await {
                    Ok(photo) => fill_once(&mut receive.confirmation_photo, photo),
                    Err(e) => return media_retry(e),
                };
                Trigger::Photo
            }
            _ => return wrong_class(ctx, session),
        };

        advance(
            ctx,
            session,
            trigger,
            TransitionContext::default(),
            SessionData::WarehouseReceive(receive),
            None,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::dispatch::SideEffect;
    use crate::session::RawInput;

    #[tokio::test]
    async fn test_negative_quantity_leaves_session_untouched() {
        let harness = Harness::new();
        let mut session = harness.session(
            Workflow::WarehouseReceive,
            Step::AwaitingItemIdentifier,
            SessionData::empty_for(Workflow::WarehouseReceive),
        );
        harness.step(&mut session, RawInput::text("sku-7")).await;
        let before = session.clone();

        let outcome = harness.step(&mut session, RawInput::text("-3")).await;
        assert!(matches!(outcome, StepOutcome::Retry(RetryReason::OutOfRange { .. })));
        assert_eq!(session, before);
    }

    #[tokio::test]
    async fn test_receive_reaches_terminal_with_effect() {
        let harness = Harness::new();
        let mut session = harness.session(
            Workflow::WarehouseReceive,
            Step::AwaitingItemIdentifier,
            SessionData::empty_for(Workflow::WarehouseReceive),
        );
        harness.step(&mut session, RawInput::text("sku-7")).await;
        harness.step(&mut session, RawInput::text("12")).await;
        assert_eq!(session.state, Step::AwaitingConfirmationPhoto);

        let outcome = harness.step(&mut session, RawInput::photo("att-1")).await;
        let accepted = accepted(&outcome);
        assert_eq!(accepted.next_state, Step::ReceiveComplete);
        match &accepted.side_effect {
            Some(SideEffect::ReceiveStock {
                item_code,
                quantity,
                confirmation_photo,
            }) => {
                assert_eq!(item_code, "SKU-7");
                assert_eq!(*quantity, 12.0);
                assert_eq!(confirmation_photo.url, "https://media.local/att-1");
            }
            other => panic!("unexpected effect {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_item_code_is_refused_before_the_quantity() {
        let harness = Harness::new();
        let mut session = harness.session(
            Workflow::WarehouseReceive,
            Step::AwaitingItemIdentifier,
            SessionData::empty_for(Workflow::WarehouseReceive),
        );
        let before = session.clone();

        let outcome = harness.step(&mut session, RawInput::text("SKU-404")).await;
        match outcome {
            StepOutcome::Retry(RetryReason::UnknownItem { code }) => assert_eq!(code, "SKU-404"),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(session, before);
    }

    #[tokio::test]
    async fn test_item_code_is_kept_when_the_catalog_is_unreachable() {
        let harness = Harness::new();
        harness.catalog.fail_next_lookup(BusinessError::Transient("503".into()));
        let mut session = harness.session(
            Workflow::WarehouseReceive,
            Step::AwaitingItemIdentifier,
            SessionData::empty_for(Workflow::WarehouseReceive),
        );

        harness.step(&mut session, RawInput::text("SKU-404")).await;
        assert_eq!(session.state, Step::AwaitingQuantity);
    }

    #[tokio::test]
    async fn test_missing_media_is_retried() {
        let harness = Harness::new();
        harness.media.mark_missing("lost");
        let session = harness.session(
            Workflow::WarehouseReceive,
            Step::AwaitingConfirmationPhoto,
            SessionData::empty_for(Workflow::WarehouseReceive),
        );
        assert!(matches!(
            harness.handle(&session, RawInput::photo("lost")).await,
            StepOutcome::Retry(RetryReason::MediaUnavailable { .. })
        ));
    }
}
