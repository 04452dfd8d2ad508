use thiserror::Error;

use crate::approvals::ApprovalError;
use crate::dispatch::DispatchError;
use crate::external::{IdentityError, TransportError};
use crate::session::ActorId;
use crate::store::StoreError;
use crate::workflows::{RetryReason, Step, TransitionError, Workflow};

/// Failures surfaced by the coordinator's public operations.
///
/// Input validation is listed for completeness: handlers report it as
/// `StepOutcome::Retry` and it only becomes an error when a caller outside
/// the conversation (e.g. `start_workflow`) supplies bad input.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("input refused: {0}")]
    InputValidation(RetryReason),

    #[error("session of {actor} is unusable: {detail}")]
    StateIntegrity { actor: ActorId, detail: String },

    #[error("external call failed after {attempts} attempts: {reason}")]
    DispatchTransient { attempts: u32, reason: String },

    #[error("external call refused: {0}")]
    DispatchPermanent(String),

    #[error("session store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    #[error("{actor} already has an active {workflow} session at {state}")]
    SessionActive {
        actor: ActorId,
        workflow: Workflow,
        state: Step,
    },

    #[error("{actor} may not start {workflow}")]
    NotPermitted { actor: ActorId, workflow: Workflow },

    #[error("identity lookup failed: {0}")]
    Identity(#[from] IdentityError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("approval error: {0}")]
    Approval(#[from] ApprovalError),

    #[error("transition error: {0}")]
    Transition(#[from] TransitionError),
}

impl From<DispatchError> for FlowError {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::Transient { attempts, reason } => {
                FlowError::DispatchTransient { attempts, reason }
            }
            DispatchError::Permanent(reason) => FlowError::DispatchPermanent(reason),
        }
    }
}

impl FlowError {
    /// Short category name used in logs.
    pub fn category(&self) -> &'static str {
        match self {
            FlowError::InputValidation(_) => "input_validation",
            FlowError::StateIntegrity { .. } => "state_integrity",
            FlowError::DispatchTransient { .. } => "dispatch_transient",
            FlowError::DispatchPermanent(_) => "dispatch_permanent",
            FlowError::StoreUnavailable(_) => "store_unavailable",
            FlowError::SessionActive { .. } | FlowError::NotPermitted { .. } => "rejected",
            FlowError::Identity(_) => "identity",
            FlowError::Transport(_) => "transport",
            FlowError::Approval(_) => "approval",
            FlowError::Transition(_) => "transition",
        }
    }

    /// Whether repeating the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FlowError::DispatchTransient { .. }
                | FlowError::StoreUnavailable(_)
                | FlowError::Identity(IdentityError::Unavailable(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::Decision;

    #[test]
    fn test_dispatch_errors_keep_their_category() {
        let transient: FlowError = DispatchError::Transient {
            attempts: 3,
            reason: "timeout".to_string(),
        }
        .into();
        assert_eq!(transient.category(), "dispatch_transient");
        assert!(transient.is_retryable());

        let permanent: FlowError = DispatchError::Permanent("item gone".to_string()).into();
        assert_eq!(permanent.category(), "dispatch_permanent");
        assert!(!permanent.is_retryable());
    }

    #[test]
    fn test_approval_loss_reads_naturally() {
        let e: FlowError = ApprovalError::AlreadyResolved {
            by: ActorId::new("a-1"),
            decision: Decision::Approve,
        }
        .into();
        assert!(e.to_string().contains("already resolved by a-1"));
    }
}
