//! Interpreter context
//!
//! Everything an interpreted machine needs to resume: the frame stack, the
//! results stack, the scope chain, the control transfer in flight and the
//! generator's current value. A context can be forked into an independent
//! copy, which is how interpreted machines are cloned.

use std::sync::Arc;

use super::phase::{FrameKind, Pending};
use super::reduced::{GotoRoute, NodeId, ReducedTree};
use crate::tree::LabelId;
use crate::vm::host::Suspension;
use crate::vm::scope::{Forker, ScopeChain};
use crate::vm::value::{ExceptionRef, Value};

/// A goto travelling up the frame stack towards its ancestor
#[derive(Debug, Clone)]
pub struct PendingTransition {
    /// Tree the goto belongs to
    pub tree: Arc<ReducedTree>,
    /// Target label
    pub label: LabelId,
    /// Pre-computed route
    pub route: GotoRoute,
    /// Value delivered to the label
    pub value: Value,
}

impl PendingTransition {
    fn fork_with(&self, forker: &mut Forker) -> Self {
        Self {
            value: forker.value(&self.value),
            ..self.clone()
        }
    }
}

/// Abrupt completion being propagated
#[derive(Debug, Clone, Default)]
pub enum Control {
    /// Nothing in flight
    #[default]
    None,
    /// A goto looking for its ancestor
    Transition(PendingTransition),
    /// An exception looking for a handler
    Throw(ExceptionRef),
    /// `yield break`
    Exit(Value),
}

impl Control {
    /// Whether nothing is propagating
    pub fn is_none(&self) -> bool {
        matches!(self, Control::None)
    }

    fn fork_with(&self, forker: &mut Forker) -> Self {
        match self {
            Control::Transition(transition) => Control::Transition(transition.fork_with(forker)),
            Control::Exit(value) => Control::Exit(forker.value(value)),
            other => other.clone(),
        }
    }
}

impl FrameKind {
    fn fork_with(&self, forker: &mut Forker) -> Self {
        let mut kind = self.clone();
        match &mut kind {
            FrameKind::Try {
                pending: Some(pending),
                ..
            } => match pending {
                Pending::Value(value) | Pending::Exit(value) => *value = forker.value(value),
                Pending::Transition(transition) => *transition = transition.fork_with(forker),
                Pending::Throw(_) => {}
            },
            FrameKind::Await {
                awaiter: Some(awaiter),
                ..
            } => *awaiter = forker.value(awaiter),
            _ => {}
        }
        kind
    }
}

/// One node being evaluated
#[derive(Debug, Clone)]
pub struct Frame {
    /// Tree the node belongs to
    pub tree: Arc<ReducedTree>,
    /// The node
    pub node: NodeId,
    /// Phase and per-kind state
    pub kind: FrameKind,
    /// Results stack height when the frame was pushed
    pub results_base: usize,
    /// Scope chain depth when the frame was pushed
    pub scope_depth: usize,
    /// Whole chain to restore on pop (closure calls replace the chain)
    pub saved_scopes: Option<ScopeChain>,
}

/// Resumable interpreter state
#[derive(Debug, Clone, Default)]
pub struct Context {
    /// Active scope chain
    pub scopes: ScopeChain,
    /// Values produced by finished children
    pub results: Vec<Value>,
    /// Frames, innermost last
    pub frames: Vec<Frame>,
    /// Abrupt completion in flight
    pub control: Control,
    /// Generator's current value
    pub current: Value,
    /// Awaiter handed to the host on suspension
    pub suspension: Option<Suspension>,
    /// Steps taken in the current resumption
    pub steps: u64,
}

impl Context {
    /// Context over a scope chain
    pub fn new(scopes: ScopeChain) -> Self {
        Self {
            scopes,
            ..Self::default()
        }
    }

    /// Independent deep copy; scopes shared between frames or captured by
    /// closures stay shared in the copy
    pub fn fork(&self) -> Context {
        let mut forker = Forker::new();
        let scopes = forker.chain(&self.scopes);
        let frames = self
            .frames
            .iter()
            .map(|frame| Frame {
                tree: frame.tree.clone(),
                node: frame.node,
                kind: frame.kind.fork_with(&mut forker),
                results_base: frame.results_base,
                scope_depth: frame.scope_depth,
                saved_scopes: frame.saved_scopes.as_ref().map(|chain| forker.chain(chain)),
            })
            .collect();
        Context {
            scopes,
            results: self.results.iter().map(|value| forker.value(value)).collect(),
            frames,
            control: self.control.fork_with(&mut forker),
            current: forker.value(&self.current),
            suspension: self
                .suspension
                .as_ref()
                .map(|suspension| suspension.fork_with(&mut forker)),
            steps: self.steps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::Var;
    use crate::vm::scope::Scope;

    #[test]
    fn test_fork_is_independent() {
        let x = Var::new(0, "x");
        let scope = Arc::new(Scope::with_vars([&x]));
        scope.set(x.id, Value::from(1));
        let ctx = Context::new(ScopeChain::from_scope(scope));

        let copy = ctx.fork();
        copy.scopes.assign(x.id, Value::from(2));
        assert_eq!(ctx.scopes.lookup(x.id), Some(Value::from(1)));
        assert_eq!(copy.scopes.lookup(x.id), Some(Value::from(2)));
    }

    #[test]
    fn test_fork_copies_results_and_current() {
        let x = Var::new(0, "x");
        let scope = Arc::new(Scope::with_vars([&x]));
        let mut ctx = Context::new(ScopeChain::from_scope(scope));
        ctx.results.push(Value::from(3));
        ctx.current = Value::from(4);
        ctx.control = Control::Exit(Value::from(5));

        let copy = ctx.fork();
        assert_eq!(copy.results, vec![Value::from(3)]);
        assert_eq!(copy.current, Value::from(4));
        assert!(matches!(copy.control, Control::Exit(ref v) if *v == Value::from(5)));
        copy.scopes.assign(x.id, Value::from(9));
        assert_eq!(ctx.scopes.lookup(x.id), Some(Value::Unit));
    }
}
