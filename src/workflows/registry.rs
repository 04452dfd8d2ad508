//! Static per-workflow tables of states, transitions and terminal states.
//!
//! The registry is pure data: no handler, store or collaborator is reachable
//! from here. Handlers consult it to decide where an accepted input leads and
//! the coordinator consults it to decide what a terminal state dispatches.

use std::collections::HashMap;
use thiserror::Error;

use super::fields::{FieldSpec, Validator};
use super::model::{Decision, InputClass, Role, Step, Trigger, Workflow};
use super::prompts::{Prompt, PromptTemplate};

pub const START: &str = "start";
pub const NEXT_STOP: &str = "next_stop";
pub const STOP_DONE: &str = "stop_done";
pub const FINISH_ROUTE: &str = "finish_route";
pub const RETRY: &str = "retry";
pub const CANCEL: &str = "cancel";

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransitionError {
    #[error("state {state} is not part of workflow {workflow}")]
    UnknownState { workflow: Workflow, state: Step },
    #[error("{trigger:?} is not allowed in {workflow}/{state}")]
    NotAllowed {
        workflow: Workflow,
        state: Step,
        trigger: Trigger,
    },
}

/// Condition attached to an edge, evaluated against facts the handler supplies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guard {
    Always,
    /// More items of a repeated field remain after the current one.
    MoreRemaining,
    /// The current item is the last one.
    NoneRemaining,
    /// Re-entering the terminal state whose dispatch is being retried.
    RetryOf,
}

/// Facts used to evaluate guards. Defaults satisfy only `Guard::Always`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransitionContext {
    pub remaining_after_current: Option<usize>,
    pub pending_terminal: Option<Step>,
}

impl Guard {
    fn holds(&self, to: Step, ctx: &TransitionContext) -> bool {
        match self {
            Guard::Always => true,
            Guard::MoreRemaining => ctx.remaining_after_current.is_some_and(|n| n > 0),
            Guard::NoneRemaining => ctx.remaining_after_current == Some(0),
            Guard::RetryOf => ctx.pending_terminal == Some(to),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: Step,
    pub on: Trigger,
    pub to: Step,
    pub guard: Guard,
}

const fn edge(from: Step, on: Trigger, to: Step) -> Transition {
    Transition {
        from,
        on,
        to,
        guard: Guard::Always,
    }
}

const fn guarded(from: Step, on: Trigger, to: Step, guard: Guard) -> Transition {
    Transition { from, on, to, guard }
}

/// External call a terminal state commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectKind {
    None,
    ActivateRegistrant,
    RejectRegistrant,
    CompleteRoute,
    ReceiveStock,
    AdjustRemains,
    CreateTask,
}

/// When the session is cleared relative to the external call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClearPolicy {
    /// Safe, re-entrant effects: clear first, then call.
    BeforeDispatch,
    /// Non-idempotent effects: clear only after the call is acknowledged.
    AfterAcknowledgment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalSpec {
    pub state: Step,
    pub effect: EffectKind,
    pub policy: ClearPolicy,
    pub checklist: &'static [FieldSpec],
}

#[derive(Debug)]
pub struct WorkflowDefinition {
    pub workflow: Workflow,
    pub role: Role,
    pub entry: Step,
    pub states: &'static [Step],
    pub transitions: &'static [Transition],
    pub terminals: &'static [TerminalSpec],
    pub fields: &'static [FieldSpec],
    pub prompts: &'static [(Step, PromptTemplate)],
}

impl WorkflowDefinition {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn terminal(&self, state: Step) -> Option<&TerminalSpec> {
        self.terminals.iter().find(|t| t.state == state)
    }
}

// Field checklists

pub const PHONE: FieldSpec = FieldSpec::new("phone", InputClass::FreeText, Validator::PhoneNumber);

pub const START_MILEAGE: FieldSpec =
    FieldSpec::new("start_mileage", InputClass::Numeric, Validator::PositiveNumber);
pub const ARRIVAL_LOCATION: FieldSpec =
    FieldSpec::new("arrival_location", InputClass::GeoCoordinate, Validator::AnyLocation);
pub const STOP_PHOTO: FieldSpec =
    FieldSpec::new("stop_photo", InputClass::PhotoAttachment, Validator::AnyPhoto);
pub const STOPS: FieldSpec = FieldSpec::new("stops", InputClass::GeoCoordinate, Validator::AnyLocation);

pub const ITEM_CODE: FieldSpec = FieldSpec::new("item_code", InputClass::FreeText, Validator::ItemCode);
pub const QUANTITY: FieldSpec =
    FieldSpec::new("quantity", InputClass::Numeric, Validator::PositiveNumber);
pub const CONFIRMATION_PHOTO: FieldSpec =
    FieldSpec::new("confirmation_photo", InputClass::PhotoAttachment, Validator::AnyPhoto);

pub const MACHINE_ID: FieldSpec = FieldSpec::new(
    "machine_id",
    InputClass::MenuSelection,
    Validator::Text { max_len: 64 },
);
pub const NEW_QUANTITY: FieldSpec =
    FieldSpec::new("new_quantity", InputClass::Numeric, Validator::NonNegativeNumber);

pub const DESCRIPTION: FieldSpec = FieldSpec::new(
    "description",
    InputClass::FreeText,
    Validator::Text { max_len: 1000 },
);
pub const PROBLEM_PHOTO: FieldSpec =
    FieldSpec::new("photo", InputClass::PhotoAttachment, Validator::AnyPhoto);

const CANCELLED: TerminalSpec = TerminalSpec {
    state: Step::Cancelled,
    effect: EffectKind::None,
    policy: ClearPolicy::BeforeDispatch,
    checklist: &[],
};

const RETRY_PROMPT: (Step, PromptTemplate) = (
    Step::AwaitingRetryConfirmation,
    PromptTemplate::with_choices(
        "We could not save your submission. Your answers are kept; try again?",
        &[(RETRY, "Try again")],
    ),
);

static REGISTRATION: WorkflowDefinition = WorkflowDefinition {
    workflow: Workflow::Registration,
    role: Role::Registrant,
    entry: Step::AwaitingPhone,
    states: &[
        Step::Idle,
        Step::AwaitingPhone,
        Step::AwaitingApproval,
        Step::Approved,
        Step::Rejected,
        Step::AwaitingRetryConfirmation,
        Step::Cancelled,
    ],
    transitions: &[
        edge(Step::Idle, Trigger::Menu(START), Step::AwaitingPhone),
        edge(Step::AwaitingPhone, Trigger::FreeText, Step::AwaitingApproval),
        edge(Step::AwaitingPhone, Trigger::Cancel, Step::Cancelled),
        edge(
            Step::AwaitingApproval,
            Trigger::Decision(Decision::Approve),
            Step::Approved,
        ),
        edge(
            Step::AwaitingApproval,
            Trigger::Decision(Decision::Reject),
            Step::Rejected,
        ),
        edge(Step::AwaitingApproval, Trigger::Cancel, Step::Cancelled),
        guarded(
            Step::AwaitingRetryConfirmation,
            Trigger::Menu(RETRY),
            Step::Approved,
            Guard::RetryOf,
        ),
        guarded(
            Step::AwaitingRetryConfirmation,
            Trigger::Menu(RETRY),
            Step::Rejected,
            Guard::RetryOf,
        ),
        edge(Step::AwaitingRetryConfirmation, Trigger::Cancel, Step::Cancelled),
    ],
    terminals: &[
        TerminalSpec {
            state: Step::Approved,
            effect: EffectKind::ActivateRegistrant,
            policy: ClearPolicy::BeforeDispatch,
            checklist: &[PHONE],
        },
        TerminalSpec {
            state: Step::Rejected,
            effect: EffectKind::RejectRegistrant,
            policy: ClearPolicy::BeforeDispatch,
            checklist: &[PHONE],
        },
        CANCELLED,
    ],
    fields: &[PHONE],
    prompts: &[
        (
            Step::AwaitingPhone,
            PromptTemplate::new("Welcome! Please send your phone number to register."),
        ),
        (
            Step::AwaitingApproval,
            PromptTemplate::new(
                "Thanks. Your registration is waiting for a supervisor's approval.",
            ),
        ),
        RETRY_PROMPT,
    ],
};

static DRIVER_ROUTE: WorkflowDefinition = WorkflowDefinition {
    workflow: Workflow::DriverRoute,
    role: Role::Driver,
    entry: Step::AwaitingMileage,
    states: &[
        Step::Idle,
        Step::AwaitingMileage,
        Step::RouteActive,
        Step::AwaitingArrivalLocation,
        Step::AwaitingStopCompletion,
        Step::RouteComplete,
        Step::AwaitingRetryConfirmation,
        Step::Cancelled,
    ],
    transitions: &[
        edge(Step::Idle, Trigger::Menu(START), Step::AwaitingMileage),
        edge(Step::AwaitingMileage, Trigger::Numeric, Step::RouteActive),
        edge(Step::AwaitingMileage, Trigger::Cancel, Step::Cancelled),
        edge(
            Step::RouteActive,
            Trigger::Menu(NEXT_STOP),
            Step::AwaitingArrivalLocation,
        ),
        edge(Step::RouteActive, Trigger::Menu(FINISH_ROUTE), Step::RouteComplete),
        edge(Step::RouteActive, Trigger::Cancel, Step::Cancelled),
        edge(
            Step::AwaitingArrivalLocation,
            Trigger::Geo,
            Step::AwaitingStopCompletion,
        ),
        edge(Step::AwaitingArrivalLocation, Trigger::Cancel, Step::Cancelled),
        edge(
            Step::AwaitingStopCompletion,
            Trigger::Photo,
            Step::AwaitingStopCompletion,
        ),
        edge(
            Step::AwaitingStopCompletion,
            Trigger::Menu(STOP_DONE),
            Step::AwaitingArrivalLocation,
        ),
        edge(
            Step::AwaitingStopCompletion,
            Trigger::Menu(FINISH_ROUTE),
            Step::RouteComplete,
        ),
        edge(Step::AwaitingStopCompletion, Trigger::Cancel, Step::Cancelled),
        guarded(
            Step::AwaitingRetryConfirmation,
            Trigger::Menu(RETRY),
            Step::RouteComplete,
            Guard::RetryOf,
        ),
        edge(Step::AwaitingRetryConfirmation, Trigger::Cancel, Step::Cancelled),
    ],
    terminals: &[
        TerminalSpec {
            state: Step::RouteComplete,
            effect: EffectKind::CompleteRoute,
            policy: ClearPolicy::AfterAcknowledgment,
            checklist: &[START_MILEAGE, STOPS],
        },
        CANCELLED,
    ],
    fields: &[START_MILEAGE, ARRIVAL_LOCATION, STOP_PHOTO, STOPS],
    prompts: &[
        (
            Step::AwaitingMileage,
            PromptTemplate::new("Starting a route. Send the current odometer reading."),
        ),
        (
            Step::RouteActive,
            PromptTemplate::with_choices(
                "Route started at {start_mileage}. Head to your first stop.",
                &[(NEXT_STOP, "Arriving at a stop"), (FINISH_ROUTE, "Finish route")],
            ),
        ),
        (
            Step::AwaitingArrivalLocation,
            PromptTemplate::new("Share your location when you arrive at the stop."),
        ),
        (
            Step::AwaitingStopCompletion,
            PromptTemplate::with_choices(
                "At stop {stop_number}. Send photos if needed, then mark the stop done.",
                &[(STOP_DONE, "Stop done, next stop"), (FINISH_ROUTE, "Stop done, finish route")],
            ),
        ),
        RETRY_PROMPT,
    ],
};

static WAREHOUSE_RECEIVE: WorkflowDefinition = WorkflowDefinition {
    workflow: Workflow::WarehouseReceive,
    role: Role::Warehouse,
    entry: Step::AwaitingItemIdentifier,
    states: &[
        Step::Idle,
        Step::AwaitingItemIdentifier,
        Step::AwaitingQuantity,
        Step::AwaitingConfirmationPhoto,
        Step::ReceiveComplete,
        Step::AwaitingRetryConfirmation,
        Step::Cancelled,
    ],
    transitions: &[
        edge(Step::Idle, Trigger::Menu(START), Step::AwaitingItemIdentifier),
        edge(
            Step::AwaitingItemIdentifier,
            Trigger::FreeText,
            Step::AwaitingQuantity,
        ),
        edge(Step::AwaitingItemIdentifier, Trigger::Cancel, Step::Cancelled),
        edge(
            Step::AwaitingQuantity,
            Trigger::Numeric,
            Step::AwaitingConfirmationPhoto,
        ),
        edge(Step::AwaitingQuantity, Trigger::Cancel, Step::Cancelled),
        edge(
            Step::AwaitingConfirmationPhoto,
            Trigger::Photo,
            Step::ReceiveComplete,
        ),
        edge(Step::AwaitingConfirmationPhoto, Trigger::Cancel, Step::Cancelled),
        guarded(
            Step::AwaitingRetryConfirmation,
            Trigger::Menu(RETRY),
            Step::ReceiveComplete,
            Guard::RetryOf,
        ),
        edge(Step::AwaitingRetryConfirmation, Trigger::Cancel, Step::Cancelled),
    ],
    terminals: &[
        TerminalSpec {
            state: Step::ReceiveComplete,
            effect: EffectKind::ReceiveStock,
            policy: ClearPolicy::BeforeDispatch,
            checklist: &[ITEM_CODE, QUANTITY, CONFIRMATION_PHOTO],
        },
        CANCELLED,
    ],
    fields: &[ITEM_CODE, QUANTITY, CONFIRMATION_PHOTO],
    prompts: &[
        (
            Step::AwaitingItemIdentifier,
            PromptTemplate::new("Receiving stock. Send the item code."),
        ),
        (
            Step::AwaitingQuantity,
            PromptTemplate::new("How many units of {item_code} arrived?"),
        ),
        (
            Step::AwaitingConfirmationPhoto,
            PromptTemplate::new("Send a photo of the received {quantity} x {item_code}."),
        ),
        RETRY_PROMPT,
    ],
};

static REMAINS_ADJUSTMENT: WorkflowDefinition = WorkflowDefinition {
    workflow: Workflow::RemainsAdjustment,
    role: Role::Operator,
    entry: Step::AwaitingRemainsForBunker,
    states: &[
        Step::Idle,
        Step::AwaitingRemainsForBunker,
        Step::RemainsAdjusted,
        Step::AwaitingRetryConfirmation,
        Step::Cancelled,
    ],
    transitions: &[
        edge(Step::Idle, Trigger::Menu(START), Step::AwaitingRemainsForBunker),
        guarded(
            Step::AwaitingRemainsForBunker,
            Trigger::Numeric,
            Step::AwaitingRemainsForBunker,
            Guard::MoreRemaining,
        ),
        guarded(
            Step::AwaitingRemainsForBunker,
            Trigger::Numeric,
            Step::RemainsAdjusted,
            Guard::NoneRemaining,
        ),
        edge(Step::AwaitingRemainsForBunker, Trigger::Cancel, Step::Cancelled),
        guarded(
            Step::AwaitingRetryConfirmation,
            Trigger::Menu(RETRY),
            Step::RemainsAdjusted,
            Guard::RetryOf,
        ),
        edge(Step::AwaitingRetryConfirmation, Trigger::Cancel, Step::Cancelled),
    ],
    terminals: &[
        TerminalSpec {
            state: Step::RemainsAdjusted,
            effect: EffectKind::AdjustRemains,
            policy: ClearPolicy::BeforeDispatch,
            checklist: &[MACHINE_ID, NEW_QUANTITY],
        },
        CANCELLED,
    ],
    fields: &[MACHINE_ID, NEW_QUANTITY],
    prompts: &[
        (
            Step::AwaitingRemainsForBunker,
            PromptTemplate::new(
                "Machine {machine_id}, bunker {bunker_id} ({position} of {total}). \
                 Recorded remains: {old_quantity}. Send the actual remains.",
            ),
        ),
        RETRY_PROMPT,
    ],
};

static TASK_REPORT: WorkflowDefinition = WorkflowDefinition {
    workflow: Workflow::TaskReport,
    role: Role::Operator,
    entry: Step::AwaitingProblemDescription,
    states: &[
        Step::Idle,
        Step::AwaitingProblemDescription,
        Step::AwaitingProblemPhoto,
        Step::ProblemReported,
        Step::AwaitingRetryConfirmation,
        Step::Cancelled,
    ],
    transitions: &[
        edge(Step::Idle, Trigger::Menu(START), Step::AwaitingProblemDescription),
        edge(
            Step::AwaitingProblemDescription,
            Trigger::FreeText,
            Step::AwaitingProblemPhoto,
        ),
        edge(Step::AwaitingProblemDescription, Trigger::Cancel, Step::Cancelled),
        edge(Step::AwaitingProblemPhoto, Trigger::Photo, Step::ProblemReported),
        edge(Step::AwaitingProblemPhoto, Trigger::Cancel, Step::Cancelled),
        guarded(
            Step::AwaitingRetryConfirmation,
            Trigger::Menu(RETRY),
            Step::ProblemReported,
            Guard::RetryOf,
        ),
        edge(Step::AwaitingRetryConfirmation, Trigger::Cancel, Step::Cancelled),
    ],
    terminals: &[
        TerminalSpec {
            state: Step::ProblemReported,
            effect: EffectKind::CreateTask,
            policy: ClearPolicy::AfterAcknowledgment,
            checklist: &[DESCRIPTION, PROBLEM_PHOTO],
        },
        CANCELLED,
    ],
    fields: &[DESCRIPTION, PROBLEM_PHOTO],
    prompts: &[
        (
            Step::AwaitingProblemDescription,
            PromptTemplate::new("Describe the problem."),
        ),
        (
            Step::AwaitingProblemPhoto,
            PromptTemplate::new("Send a photo of the problem."),
        ),
        RETRY_PROMPT,
    ],
};

/// Immutable lookup over all workflow definitions, built once at startup.
#[derive(Debug, Clone)]
pub struct WorkflowRegistry {
    definitions: HashMap<Workflow, &'static WorkflowDefinition>,
}

impl Default for WorkflowRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl WorkflowRegistry {
    pub fn standard() -> Self {
        let definitions = [
            &REGISTRATION,
            &DRIVER_ROUTE,
            &WAREHOUSE_RECEIVE,
            &REMAINS_ADJUSTMENT,
            &TASK_REPORT,
        ]
        .into_iter()
        .map(|d| (d.workflow, d))
        .collect();
        Self { definitions }
    }

    pub fn definition(&self, workflow: Workflow) -> &'static WorkflowDefinition {
        // Every Workflow variant is registered by `standard()`.
        self.definitions[&workflow]
    }

    pub fn contains(&self, workflow: Workflow, state: Step) -> bool {
        self.definition(workflow).states.contains(&state)
    }

    pub fn is_terminal(&self, workflow: Workflow, state: Step) -> bool {
        self.definition(workflow).terminal(state).is_some()
    }

    pub fn terminal(&self, workflow: Workflow, state: Step) -> Option<&'static TerminalSpec> {
        self.definition(workflow).terminal(state)
    }

    /// Next state for an unguarded edge.
    pub fn transition(
        &self,
        workflow: Workflow,
        state: Step,
        trigger: Trigger,
    ) -> Result<Step, TransitionError> {
        self.transition_with(workflow, state, trigger, &TransitionContext::default())
    }

    /// Next state, evaluating edge guards against `ctx`.
    pub fn transition_with(
        &self,
        workflow: Workflow,
        state: Step,
        trigger: Trigger,
        ctx: &TransitionContext,
    ) -> Result<Step, TransitionError> {
        if !self.contains(workflow, state) {
            return Err(TransitionError::UnknownState { workflow, state });
        }

        self.definition(workflow)
            .transitions
            .iter()
            .find(|t| t.from == state && t.on == trigger && t.guard.holds(t.to, ctx))
            .map(|t| t.to)
            .ok_or(TransitionError::NotAllowed {
                workflow,
                state,
                trigger,
            })
    }

    /// Triggers with at least one outgoing edge from `state`, in table order.
    pub fn expected_triggers(&self, workflow: Workflow, state: Step) -> Vec<Trigger> {
        let mut triggers = Vec::new();
        for t in self.definition(workflow).transitions {
            if t.from == state && !triggers.contains(&t.on) {
                triggers.push(t.on);
            }
        }
        triggers
    }

    pub fn expected_classes(&self, workflow: Workflow, state: Step) -> Vec<InputClass> {
        let mut classes = Vec::new();
        for trigger in self.expected_triggers(workflow, state) {
            if matches!(trigger, Trigger::Decision(_)) {
                continue;
            }
            let class = trigger.class();
            if !classes.contains(&class) {
                classes.push(class);
            }
        }
        classes
    }

    /// Prompt template for a state. Text only; a cancel option is appended for
    /// every state that accepts cancellation.
    pub fn describe(&self, workflow: Workflow, state: Step) -> Prompt {
        self.describe_with(workflow, state, &HashMap::new())
    }

    pub fn describe_with(
        &self,
        workflow: Workflow,
        state: Step,
        vars: &HashMap<&str, String>,
    ) -> Prompt {
        let definition = self.definition(workflow);
        let mut prompt = definition
            .prompts
            .iter()
            .find(|(s, _)| *s == state)
            .map(|(_, template)| template.render(vars))
            .unwrap_or_else(|| Prompt::text(format!("{workflow}: {state}")));

        if self.accepts_cancel(workflow, state) && !prompt.has_choice(CANCEL) {
            prompt = prompt.with_choice(CANCEL, "Cancel");
        }
        prompt
    }

    pub fn accepts_cancel(&self, workflow: Workflow, state: Step) -> bool {
        self.definition(workflow)
            .transitions
            .iter()
            .any(|t| t.from == state && t.on == Trigger::Cancel)
    }

    /// Structural checks run once at startup.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut problems = Vec::new();

        for workflow in Workflow::ALL {
            let Some(definition) = self.definitions.get(&workflow) else {
                problems.push(format!("{workflow}: not registered"));
                continue;
            };

            if workflow.role() != definition.role {
                problems.push(format!("{workflow}: role mismatch"));
            }

            for t in definition.transitions {
                if !definition.states.contains(&t.from) || !definition.states.contains(&t.to) {
                    problems.push(format!("{workflow}: edge {} -> {} leaves the graph", t.from, t.to));
                }
                if definition.terminal(t.from).is_some() {
                    problems.push(format!("{workflow}: terminal {} has outgoing edges", t.from));
                }
            }

            for state in definition.states {
                let terminal = definition.terminal(*state).is_some();
                if *state == Step::Idle || terminal {
                    continue;
                }
                if !self.accepts_cancel(workflow, *state) {
                    problems.push(format!("{workflow}: {state} does not accept cancellation"));
                }
            }

            for terminal in definition.terminals {
                for field in terminal.checklist {
                    if definition.field(field.name).is_none() {
                        problems.push(format!(
                            "{workflow}: checklist of {} names undeclared field {}",
                            terminal.state, field.name
                        ));
                    }
                }
            }

            if self
                .transition(workflow, Step::Idle, Trigger::Menu(START))
                .ok()
                != Some(definition.entry)
            {
                problems.push(format!("{workflow}: start does not lead to the entry state"));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }
}
