// Side-effect dispatch: turning completed workflows into external commits.

pub mod dispatcher;
pub mod effects;
pub mod retry;

use thiserror::Error;

pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use effects::{build_effect, EffectRequest, SideEffect};
pub use retry::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DispatchError {
    /// Retryable failure that outlasted the retry budget.
    #[error("external call failed after {attempts} attempts: {reason}")]
    Transient { attempts: u32, reason: String },
    /// The referenced entity is gone or the call was refused; never retried.
    #[error("external call refused: {0}")]
    Permanent(String),
}
