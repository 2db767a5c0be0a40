//! Machine host
//!
//! The durable fields a compiled machine keeps between resumptions: the
//! state id, the variable scope, the generator's current value and the
//! awaiter handed out on suspension.

use std::sync::Arc;

use super::scope::{Forker, ScopeChain};
use super::task::Continuation;
use super::value::{ExceptionRef, Value};
use crate::compiler::AwaitBinder;
use crate::defaults::STATE_START;

/// Awaiter a suspended machine waits on, with the binder that understands it
#[derive(Debug, Clone)]
pub struct Suspension {
    /// The awaiter
    pub awaiter: Value,
    /// Binder for the awaiter's type
    pub binder: Arc<dyn AwaitBinder>,
}

impl Suspension {
    /// Copy whose awaiter went through `forker`
    pub fn fork_with(&self, forker: &mut Forker) -> Self {
        Self {
            awaiter: forker.value(&self.awaiter),
            binder: self.binder.clone(),
        }
    }

    /// Register the continuation that resumes the machine
    pub fn on_completed(&self, continuation: Continuation) -> Result<(), ExceptionRef> {
        self.binder.on_completed(&self.awaiter, continuation)
    }
}

/// Durable state of a compiled machine
#[derive(Debug, Clone)]
pub struct MachineHost {
    /// Resume id to dispatch on, or one of the start/done sentinels
    pub state: i64,
    /// Parameters, hoisted variables and temporaries
    pub scopes: ScopeChain,
    /// Generator's current value
    pub current: Value,
    /// Whether the last resumption produced a value
    pub success: bool,
    /// Awaiter registered by the last suspension
    pub suspension: Option<Suspension>,
}

impl MachineHost {
    /// Fresh host over a scope chain
    pub fn new(scopes: ScopeChain) -> Self {
        Self {
            state: STATE_START,
            scopes,
            current: Value::Unit,
            success: false,
            suspension: None,
        }
    }

    /// Independent copy; later assignments in either host are not seen by the
    /// other, including assignments made through closures
    pub fn fork(&self) -> Self {
        let mut forker = Forker::new();
        Self {
            state: self.state,
            scopes: forker.chain(&self.scopes),
            current: forker.value(&self.current),
            success: self.success,
            suspension: self.suspension.as_ref().map(|s| s.fork_with(&mut forker)),
        }
    }
}
