use async_trait::async_trait;

use super::{advance, wrong_class, StepContext, StepHandler, StepInput, StepOutcome};
use crate::session::ActorSession;
use crate::workflows::registry::NEW_QUANTITY;
use crate::workflows::{
    fill_once, BunkerReading, RemainsData, RetryReason, SessionData, Step, TransitionContext,
    Trigger, Workflow,
};

/// Operator remains adjustment: one reading per bunker of a machine, then a
/// single batched commit.
pub struct RemainsHandler;

impl RemainsHandler {
    /// Seed data for a machine's bunker snapshot.
    pub fn seed(machine_id: &str, bunkers: &[(String, f64)]) -> SessionData {
        SessionData::RemainsAdjustment(RemainsData {
            machine_id: machine_id.to_string(),
            bunkers: bunkers
                .iter()
                .map(|(bunker_id, old_quantity)| BunkerReading {
                    bunker_id: bunker_id.clone(),
                    old_quantity: *old_quantity,
                    new_quantity: None,
                })
                .collect(),
        })
    }
}

#[async_trait]
impl StepHandler for RemainsHandler {
    fn workflow(&self) -> Workflow {
        Workflow::RemainsAdjustment
    }

    async fn handle(
        &self,
        ctx: &StepContext<'_>,
        session: &ActorSession,
        input: &StepInput,
    ) -> StepOutcome {
        let (Step::AwaitingRemainsForBunker, StepInput::Text(text)) = (session.state, input) else {
            return wrong_class(ctx, session);
        };

        let mut remains = match &session.data {
            SessionData::RemainsAdjustment(d) => d.clone(),
            _ => RemainsData::default(),
        };
        let Some(index) = remains.current_index() else {
            return StepOutcome::Retry(RetryReason::MissingFields {
                fields: vec!["bunkers".to_string()],
            });
        };

        let value = match NEW_QUANTITY.parse_number(text) {
            Ok(value) => value,
            Err(reason) => return StepOutcome::Retry(reason),
        };
        let bunker = &mut remains.bunkers[index];
        fill_once(&mut bunker.new_quantity, value);
        let ack = format!(
            "Bunker {}: {} -> {}.",
            bunker.bunker_id, bunker.old_quantity, value
        );

        let remaining = remains.bunkers[index + 1..]
            .iter()
            .filter(|b| b.new_quantity.is_none())
            .count();
        let guard = TransitionContext {
            remaining_after_current: Some(remaining),
            ..Default::default()
        };

        advance(
            ctx,
            session,
            Trigger::Numeric,
            guard,
            SessionData::RemainsAdjustment(remains),
            Some(ack),
        )
    }
}
