//! AwaitingRetryConfirmation: the collected data is kept after a dispatch
//! ran out of retries; confirming re-enters the terminal state and rebuilds
//! the same side effect.

use super::{advance, StepContext, StepInput, StepOutcome};
use crate::session::ActorSession;
use crate::workflows::registry::RETRY;
use crate::workflows::{RetryReason, TransitionContext, Trigger};

pub fn handle(ctx: &StepContext<'_>, session: &ActorSession, input: &StepInput) -> StepOutcome {
    if !input.selects(RETRY) {
        return StepOutcome::Retry(RetryReason::UnknownOption {
            choice: input.menu_key().unwrap_or("attachment").to_string(),
        });
    }

    let guard = TransitionContext {
        pending_terminal: session.pending_terminal,
        ..Default::default()
    };
    advance(
        ctx,
        session,
        Trigger::Menu(RETRY),
        guard,
        session.data.clone(),
        None,
    )
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::dispatch::SideEffect;
    use crate::session::RawInput;
    use crate::workflows::{PhotoRef, ReceiveData, SessionData, Step, Workflow};

    fn parked_receive(harness: &Harness) -> ActorSession {
        let mut session = harness.session(
            Workflow::WarehouseReceive,
            Step::AwaitingRetryConfirmation,
            SessionData::WarehouseReceive(ReceiveData {
                item_code: Some("SKU-7".to_string()),
                quantity: Some(12.0),
                confirmation_photo: Some(PhotoRef {
                    attachment_id: "att-1".to_string(),
                    url: "https://media.local/att-1".to_string(),
                }),
            }),
        );
        session.pending_terminal = Some(Step::ReceiveComplete);
        session
    }

    #[tokio::test]
    async fn test_retry_rebuilds_the_same_effect() {
        let harness = Harness::new();
        let session = parked_receive(&harness);

        let outcome = harness.handle(&session, RawInput::choice(RETRY)).await;
        let accepted = accepted(&outcome);
        assert_eq!(accepted.next_state, Step::ReceiveComplete);
        assert!(matches!(
            accepted.side_effect,
            Some(SideEffect::ReceiveStock { .. })
        ));
    }

    #[tokio::test]
    async fn test_other_input_is_refused() {
        let harness = Harness::new();
        let session = parked_receive(&harness);
        assert!(matches!(
            harness.handle(&session, RawInput::text("maybe")).await,
            StepOutcome::Retry(RetryReason::UnknownOption { .. })
        ));
    }

    #[tokio::test]
    async fn test_retry_without_pending_terminal_is_refused() {
        let harness = Harness::new();
        let mut session = parked_receive(&harness);
        session.pending_terminal = None;
        assert!(matches!(
            harness.handle(&session, RawInput::choice(RETRY)).await,
            StepOutcome::Retry(RetryReason::WrongInputClass { .. })
        ));
    }
}
