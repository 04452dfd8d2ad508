//! Step handlers
//!
//! One handler per workflow validates an input against the actor's current
//! state, merges accepted fields into the session data and asks the registry
//! for the next state. Handlers never perform side effects: a handler that
//! reaches a terminal state returns the side-effect descriptor and the
//! coordinator hands it to the dispatcher.

pub mod driver_route;
pub mod input;
pub mod registration;
pub mod remains;
pub mod retry;
pub mod task_report;
pub mod warehouse;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;

use crate::dispatch::{build_effect, SideEffect};
use crate::external::{BusinessApi, MediaError, MediaIngestion};
use crate::session::{ActorSession, RawInput};
use crate::workflows::{
    EffectKind, Prompt, RetryReason, SessionData, Step, TransitionContext, Trigger, Workflow,
    WorkflowRegistry,
};

pub use driver_route::DriverRouteHandler;
pub use input::StepInput;
pub use registration::RegistrationHandler;
pub use remains::RemainsHandler;
pub use task_report::TaskReportHandler;
pub use warehouse::WarehouseReceiveHandler;

/// Read-only collaborators a handler may consult. `catalog` is used for
/// lookups only; commits go through the dispatcher.
pub struct StepContext<'a> {
    pub registry: &'a WorkflowRegistry,
    pub media: &'a dyn MediaIngestion,
    pub catalog: &'a dyn BusinessApi,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Accepted {
    pub next_state: Step,
    pub data: SessionData,
    pub reply: Prompt,
    /// Present only when `next_state` is terminal and commits something.
    pub side_effect: Option<SideEffect>,
    /// The new state waits for a supervisor decision.
    pub request_approval: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Accepted(Accepted),
    /// Input refused; the session stays exactly as it was.
    Retry(RetryReason),
    Cancelled,
}

#[async_trait]
pub trait StepHandler: Send + Sync {
    fn workflow(&self) -> Workflow;

    async fn handle(
        &self,
        ctx: &StepContext<'_>,
        session: &ActorSession,
        input: &StepInput,
    ) -> StepOutcome;
}

/// Routes an input to the handler owning the session's workflow. Inputs
/// common to every workflow (cancellation, retry confirmation) are handled
/// here.
pub struct HandlerSet {
    handlers: HashMap<Workflow, Arc<dyn StepHandler>>,
}

impl Default for HandlerSet {
    fn default() -> Self {
        Self::standard()
    }
}

impl HandlerSet {
    pub fn standard() -> Self {
        let handlers: [Arc<dyn StepHandler>; 5] = [
            Arc::new(RegistrationHandler),
            Arc::new(DriverRouteHandler),
            Arc::new(WarehouseReceiveHandler),
            Arc::new(RemainsHandler),
            Arc::new(TaskReportHandler),
        ];
        Self {
            handlers: handlers.into_iter().map(|h| (h.workflow(), h)).collect(),
        }
    }

    pub async fn handle(
        &self,
        ctx: &StepContext<'_>,
        session: &ActorSession,
        raw: &RawInput,
    ) -> StepOutcome {
        let input = StepInput::from_raw(raw);

        if input == StepInput::Cancel {
            return match ctx
                .registry
                .transition(session.workflow, session.state, Trigger::Cancel)
            {
                Ok(_) => StepOutcome::Cancelled,
                Err(_) => wrong_class(ctx, session),
            };
        }

        if session.state == Step::AwaitingRetryConfirmation {
            return retry::handle(ctx, session, &input);
        }

        match self.handlers.get(&session.workflow) {
            Some(handler) => handler.handle(ctx, session, &input).await,
            None => wrong_class(ctx, session),
        }
    }
}

/// Retry reply naming what the current state accepts.
pub(crate) fn wrong_class(ctx: &StepContext<'_>, session: &ActorSession) -> StepOutcome {
    StepOutcome::Retry(RetryReason::WrongInputClass {
        expected: ctx.registry.expected_classes(session.workflow, session.state),
    })
}

pub(crate) fn media_retry(e: MediaError) -> StepOutcome {
    StepOutcome::Retry(RetryReason::MediaUnavailable {
        detail: e.to_string(),
    })
}

/// Follow `trigger` from the session's state with the updated `data`.
/// Reaching a terminal state builds its side effect from the checklist.
pub(crate) fn advance(
    ctx: &StepContext<'_>,
    session: &ActorSession,
    trigger: Trigger,
    guard: TransitionContext,
    data: SessionData,
    ack: Option<String>,
) -> StepOutcome {
    let next = match ctx
        .registry
        .transition_with(session.workflow, session.state, trigger, &guard)
    {
        Ok(next) => next,
        Err(_) => return wrong_class(ctx, session),
    };

    let mut accepted = match ctx.registry.terminal(session.workflow, next) {
        Some(terminal) => match build_effect(&data, terminal) {
            Ok(side_effect) => {
                let reply = completion_prompt(terminal.effect, &data);
                Accepted {
                    next_state: next,
                    data,
                    reply,
                    side_effect,
                    request_approval: false,
                }
            }
            Err(missing) => {
                return StepOutcome::Retry(RetryReason::MissingFields {
                    fields: missing.iter().map(|f| f.replace('_', " ")).collect(),
                })
            }
        },
        None => {
            let reply = ctx
                .registry
                .describe_with(session.workflow, next, &prompt_vars(&data));
            Accepted {
                next_state: next,
                data,
                reply,
                side_effect: None,
                request_approval: next == Step::AwaitingApproval,
            }
        }
    };

    if let Some(ack) = ack {
        accepted.reply = accepted.reply.prefixed(ack);
    }
    StepOutcome::Accepted(accepted)
}

/// Placeholder values for prompt templates.
pub fn prompt_vars(data: &SessionData) -> HashMap<&'static str, String> {
    let mut vars = HashMap::new();
    match data {
        SessionData::Empty | SessionData::Registration(_) => {}
        SessionData::DriverRoute(d) => {
            if let Some(mileage) = d.start_mileage {
                vars.insert("start_mileage", mileage.to_string());
            }
            vars.insert("stop_number", (d.stops.len() + 1).to_string());
        }
        SessionData::WarehouseReceive(d) => {
            if let Some(code) = &d.item_code {
                vars.insert("item_code", code.clone());
            }
            if let Some(quantity) = d.quantity {
                vars.insert("quantity", quantity.to_string());
            }
        }
        SessionData::RemainsAdjustment(d) => {
            vars.insert("machine_id", d.machine_id.clone());
            vars.insert("total", d.bunkers.len().to_string());
            if let Some(index) = d.current_index() {
                let bunker = &d.bunkers[index];
                vars.insert("position", (index + 1).to_string());
                vars.insert("bunker_id", bunker.bunker_id.clone());
                vars.insert("old_quantity", bunker.old_quantity.to_string());
            }
        }
        SessionData::TaskReport(d) => {
            if let Some(machine) = &d.machine_id {
                vars.insert("machine_id", machine.clone());
            }
        }
    }
    vars
}

/// Message sent when a terminal state is reached and its commit succeeds.
pub fn completion_prompt(effect: EffectKind, data: &SessionData) -> Prompt {
    let text = match (effect, data) {
        (EffectKind::None, _) => "Cancelled. Nothing was saved.".to_string(),
        (EffectKind::ActivateRegistrant, _) => {
            "Your registration was approved. Welcome aboard!".to_string()
        }
        (EffectKind::RejectRegistrant, _) => "Your registration was declined.".to_string(),
        (EffectKind::CompleteRoute, SessionData::DriverRoute(d)) => {
            format!("Route complete: {} stop(s) recorded.", d.stops.len())
        }
        (EffectKind::ReceiveStock, SessionData::WarehouseReceive(d)) => format!(
            "Received {} x {}. Thank you!",
            d.quantity.unwrap_or_default(),
            d.item_code.as_deref().unwrap_or_default()
        ),
        (EffectKind::AdjustRemains, SessionData::RemainsAdjustment(d)) => format!(
            "Remains for machine {} submitted ({} bunker(s)).",
            d.machine_id,
            d.bunkers.len()
        ),
        (EffectKind::CreateTask, _) => "Problem reported. A task has been created.".to_string(),
        _ => "Done.".to_string(),
    };
    Prompt::text(text)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::external::{MemoryBusiness, MemoryMedia};
    use crate::session::ActorId;

    pub struct Harness {
        pub registry: WorkflowRegistry,
        pub media: MemoryMedia,
        pub catalog: MemoryBusiness,
        pub handlers: HandlerSet,
    }

    impl Harness {
        pub fn new() -> Self {
            Self {
                registry: WorkflowRegistry::standard(),
                media: MemoryMedia::default(),
                catalog: MemoryBusiness::new().with_item("SKU-7", "item-7", "Cola 0.5l"),
                handlers: HandlerSet::standard(),
            }
        }

        pub fn ctx(&self) -> StepContext<'_> {
            StepContext {
                registry: &self.registry,
                media: &self.media,
                catalog: &self.catalog,
                now: Utc::now(),
            }
        }

        pub fn session(&self, workflow: Workflow, state: Step, data: SessionData) -> ActorSession {
            ActorSession::start(
                ActorId::new("actor-1"),
                workflow.role(),
                workflow,
                state,
                data,
                Utc::now(),
            )
        }

        pub async fn handle(&self, session: &ActorSession, raw: RawInput) -> StepOutcome {
            self.handlers.handle(&self.ctx(), session, &raw).await
        }

        /// Feed `raw` and apply an accepted outcome to `session`.
        pub async fn step(&self, session: &mut ActorSession, raw: RawInput) -> StepOutcome {
            let outcome = self.handle(session, raw).await;
            if let StepOutcome::Accepted(accepted) = &outcome {
                session.advance(accepted.next_state, accepted.data.clone());
            }
            outcome
        }
    }

    pub fn accepted(outcome: &StepOutcome) -> &Accepted {
        match outcome {
            StepOutcome::Accepted(accepted) => accepted,
            other => panic!("expected acceptance, got {other:?}"),
        }
    }
}
