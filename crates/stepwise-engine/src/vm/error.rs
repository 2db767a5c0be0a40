//! Runtime errors

use super::value::ExceptionRef;
use crate::compiler::error::LowerError;

/// VM execution error
#[derive(Debug, Clone, thiserror::Error)]
pub enum VmError {
    /// A user exception escaped the machine; the reference is the thrown object
    #[error("uncaught exception: {0}")]
    Thrown(ExceptionRef),

    /// Resume bookkeeping reached an inconsistent state
    #[error("interpreter failed to transition: {0}")]
    InvalidTransition(String),

    /// The machine already returned, threw or hit `yield break`
    #[error("machine has already completed")]
    AlreadyCompleted,

    /// A suspend point was reached where suspension is impossible
    #[error("cannot suspend: {0}")]
    CannotSuspend(String),

    /// A variable was read or assigned without a binding in scope
    #[error("variable `{0}` is not bound in any scope")]
    UnboundVariable(String),

    /// Wrong number of arguments to a lambda or closure
    #[error("expected {expected} argument(s), got {found}")]
    Arity {
        /// Declared parameters
        expected: usize,
        /// Supplied arguments
        found: usize,
    },

    /// The step budget for one resumption was exhausted
    #[error("step limit of {0} exceeded")]
    StepLimitExceeded(u64),

    /// Construction error surfaced while preparing execution
    #[error(transparent)]
    Lower(#[from] LowerError),
}

/// VM result
pub type VmResult<T> = Result<T, VmError>;

impl From<ExceptionRef> for VmError {
    fn from(exception: ExceptionRef) -> Self {
        VmError::Thrown(exception)
    }
}

impl VmError {
    /// The thrown exception, if this is a user exception
    pub fn exception(&self) -> Option<&ExceptionRef> {
        match self {
            VmError::Thrown(e) => Some(e),
            _ => None,
        }
    }
}
