use async_trait::async_trait;

use super::{advance, wrong_class, StepContext, StepHandler, StepInput, StepOutcome};
use crate::session::ActorSession;
use crate::workflows::registry::PHONE;
use crate::workflows::{
    fill_once, Decision, RetryReason, SessionData, Step, TransitionContext, Trigger, Workflow,
};

/// New-registrant onboarding: phone number, then a supervisor decision.
pub struct RegistrationHandler;

#[async_trait]
impl StepHandler for RegistrationHandler {
    fn workflow(&self) -> Workflow {
        Workflow::Registration
    }

    async fn handle(
        &self,
        ctx: &StepContext<'_>,
        session: &ActorSession,
        input: &StepInput,
    ) -> StepOutcome {
        match (session.state, input) {
            (Step::AwaitingPhone, StepInput::Text(text)) => {
                let phone = match PHONE.check_text(text) {
                    Ok(phone) => phone,
                    Err(reason) => return StepOutcome::Retry(reason),
                };
                let mut data = session.data.clone();
                if let SessionData::Registration(d) = &mut data {
                    fill_once(&mut d.phone, phone);
                }
                advance(
                    ctx,
                    session,
                    Trigger::FreeText,
                    TransitionContext::default(),
                    data,
                    None,
                )
            }
            // Only a supervisor can move the subject on from here.
            (Step::AwaitingApproval, _) => StepOutcome::Retry(RetryReason::AwaitingExternalDecision),
            _ => wrong_class(ctx, session),
        }
    }
}

/// Apply a supervisor's decision to a subject parked at AwaitingApproval.
pub fn decide(ctx: &StepContext<'_>, session: &ActorSession, decision: Decision) -> StepOutcome {
    if session.state != Step::AwaitingApproval {
        return StepOutcome::Retry(RetryReason::UnknownOption {
            choice: decision.to_string(),
        });
    }
    advance(
        ctx,
        session,
        Trigger::Decision(decision),
        TransitionContext::default(),
        session.data.clone(),
        None,
    )
}
