// Workflow definitions: roles, states, field checklists and the static
// transition tables that tie them together.

pub mod data;
pub mod fields;
pub mod model;
pub mod prompts;
pub mod registry;

pub use data::{
    fill_once, BunkerReading, GeoPoint, PhotoRef, ReceiveData, RegistrationData, RemainsData,
    RouteData, SessionData, StopVisit, TaskReportData,
};
pub use fields::{parse_decimal, FieldSpec, RetryReason, Validator};
pub use model::{Decision, InputClass, Role, Step, Trigger, Workflow};
pub use prompts::{Choice, Prompt, PromptTemplate};
pub use registry::{
    ClearPolicy, EffectKind, Guard, TerminalSpec, Transition, TransitionContext, TransitionError,
    WorkflowDefinition, WorkflowRegistry,
};
