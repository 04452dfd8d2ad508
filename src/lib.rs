// Fieldflow Library - conversational multi-step field workflows
// This exposes the core components for testing and integration

pub mod approvals;
pub mod config;
pub mod coordinator;
pub mod dispatch;
pub mod errors;
pub mod external;
pub mod handlers;
pub mod observability;
pub mod runtime;
pub mod session;
pub mod shutdown;
pub mod store;
pub mod supervisor;
pub mod telemetry;
pub mod workflows;

// Re-export key types for easy access
pub use approvals::{ApprovalBroadcast, ApprovalError, PendingApproval, Resolution};
pub use config::{config, FieldflowConfig};
pub use coordinator::{Collaborators, Coordinator, HousekeepingReport, RecoveryReport, StartRequest};
pub use dispatch::{DispatchError, DispatchOutcome, Dispatcher, EffectRequest, SideEffect};
pub use errors::FlowError;
pub use handlers::{HandlerSet, StepContext, StepHandler, StepOutcome};
pub use observability::{flow_metrics, FlowMetrics, OperationTimer};
pub use runtime::InputRouter;
pub use session::{ActorId, ActorSession, InboundMessage, OutboundMessage, RawInput};
pub use shutdown::ShutdownCoordinator;
pub use store::{SessionBackend, SessionLookup, StateStore, StoreError};
pub use supervisor::{ArmedPosition, TimeoutSupervisor};
pub use telemetry::{create_actor_span, generate_correlation_id, init_telemetry, shutdown_telemetry};
pub use workflows::{Decision, Prompt, Role, Step, Workflow, WorkflowRegistry};
