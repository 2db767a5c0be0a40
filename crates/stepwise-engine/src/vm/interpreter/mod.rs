//! Tree interpreter
//!
//! Runs a lambda directly over its reduced tree instead of lowering it. The
//! interpreter keeps an explicit frame stack, so suspending is returning from
//! `resume` and resuming is stepping the same context again. The compiled
//! machine uses the same loop, in synchronous mode, for the pass-through
//! fragments of its states.

pub mod context;
pub mod exec_loop;
pub mod ops;
pub mod phase;
pub mod reduced;

use std::sync::Arc;

use tracing::debug;

use self::context::Context;
use self::exec_loop::{Env, Mode, Step};
use self::reduced::ReducedTree;
use super::error::{VmError, VmResult};
use super::execution::{MachineStatus, Resumable};
use super::host::Suspension;
use super::scope::{Scope, ScopeChain};
use super::{FunctionTable, Value};
use crate::compiler::{BinderRegistry, LowerResult};
use crate::options::EngineOptions;
use crate::tree::analysis::analyze_lambda;
use crate::tree::{LabelId, LambdaExpr, LambdaKind, Var};

/// Interpreter entry point
pub struct Interpreter {
    binders: Arc<BinderRegistry>,
    options: EngineOptions,
}

impl Interpreter {
    /// Interpreter over a binder registry
    pub fn new(binders: Arc<BinderRegistry>) -> Self {
        Self {
            binders,
            options: EngineOptions::default(),
        }
    }

    /// Replace the options
    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    /// Check a lambda and reduce its body
    pub fn prepare(&self, lambda: &LambdaExpr) -> LowerResult<PreparedLambda> {
        analyze_lambda(lambda)?;
        let tree = ReducedTree::build(&lambda.body, &self.binders, false)?;
        debug!(
            target: "stepwise::interpreter",
            lambda = lambda.display_name(),
            nodes = tree.len(),
            "prepared lambda"
        );
        Ok(PreparedLambda {
            name: lambda.display_name().to_string(),
            kind: lambda.kind,
            params: lambda.params.clone(),
            tree: Arc::new(tree),
        })
    }

    /// Bind arguments and create a machine that has not run yet
    pub fn start(
        &self,
        prepared: &PreparedLambda,
        args: Vec<Value>,
        functions: Arc<FunctionTable>,
    ) -> VmResult<InterpretedMachine> {
        if args.len() != prepared.params.len() {
            return Err(VmError::Arity {
                expected: prepared.params.len(),
                found: args.len(),
            });
        }
        let scope = Scope::new();
        for (param, value) in prepared.params.iter().zip(args) {
            scope.declare(param.id, value);
        }
        Ok(InterpretedMachine {
            name: prepared.name.clone(),
            kind: prepared.kind,
            tree: prepared.tree.clone(),
            ctx: Context::new(ScopeChain::from_scope(Arc::new(scope))),
            functions,
            step_limit: self.options.step_limit,
            started: false,
            completed: false,
        })
    }

    /// Prepare and start in one step; construction errors surface as `VmError::Lower`
    pub fn launch(
        &self,
        lambda: &LambdaExpr,
        args: Vec<Value>,
        functions: Arc<FunctionTable>,
    ) -> VmResult<InterpretedMachine> {
        let prepared = self.prepare(lambda)?;
        self.start(&prepared, args, functions)
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new(BinderRegistry::global())
    }
}

/// A checked, reduced lambda ready to start
#[derive(Debug, Clone)]
pub struct PreparedLambda {
    /// Display name
    pub name: String,
    /// Sync, async or generator
    pub kind: LambdaKind,
    /// Parameters
    pub params: Vec<Var>,
    /// Reduced body
    pub tree: Arc<ReducedTree>,
}

/// An interpreted lambda invocation
#[derive(Debug)]
pub struct InterpretedMachine {
    name: String,
    kind: LambdaKind,
    tree: Arc<ReducedTree>,
    ctx: Context,
    functions: Arc<FunctionTable>,
    step_limit: Option<u64>,
    started: bool,
    completed: bool,
}

impl InterpretedMachine {
    /// Display name of the lambda
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Last value produced by `yield return`
    pub fn current(&self) -> &Value {
        &self.ctx.current
    }

    fn mode(&self) -> Mode {
        match self.kind {
            LambdaKind::Sync => Mode::Sync,
            LambdaKind::Async => Mode::Async,
            LambdaKind::Generator => Mode::Generator,
        }
    }
}

/// Cloning forks the whole context, including suspended frames and scopes
impl Clone for InterpretedMachine {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            kind: self.kind,
            tree: self.tree.clone(),
            ctx: self.ctx.fork(),
            functions: self.functions.clone(),
            step_limit: self.step_limit,
            started: self.started,
            completed: self.completed,
        }
    }
}

impl Resumable for InterpretedMachine {
    fn resume(&mut self) -> VmResult<MachineStatus> {
        if self.completed {
            return Err(VmError::AlreadyCompleted);
        }
        let env = Env {
            functions: &self.functions,
            mode: self.mode(),
            step_limit: self.step_limit,
        };
        let outcome = if self.started {
            exec_loop::run(&mut self.ctx, &env)
        } else {
            self.started = true;
            exec_loop::enter(&mut self.ctx, &env, &self.tree, self.tree.root())
                .and_then(|()| exec_loop::run(&mut self.ctx, &env))
        };

        let status = match outcome {
            Ok(Step::Suspended) => return Ok(MachineStatus::Suspended),
            Ok(Step::Yielded) => return Ok(MachineStatus::Yielded(self.ctx.current.clone())),
            Ok(Step::Done(value)) => Ok(MachineStatus::Completed(match self.kind {
                LambdaKind::Generator => Value::Unit,
                _ => value,
            })),
            Ok(Step::Escaped(label, _)) => Err(VmError::InvalidTransition(format!(
                "goto L{} left the lambda",
                label.0
            ))),
            Ok(Step::Continue) => Err(VmError::InvalidTransition(
                "step loop stopped without an outcome".to_string(),
            )),
            Err(err) => Err(err),
        };
        self.completed = true;
        debug!(
            target: "stepwise::interpreter",
            lambda = %self.name,
            ok = status.is_ok(),
            "machine completed"
        );
        status
    }

    fn take_suspension(&mut self) -> Option<Suspension> {
        self.ctx.suspension.take()
    }

    fn is_completed(&self) -> bool {
        self.completed
    }
}

/// Result of evaluating a tree synchronously
#[derive(Debug)]
pub enum Evaluation {
    /// The tree produced a value
    Value(Value),
    /// A goto left the tree towards a label the caller owns
    Escape(LabelId, Value),
}

/// Evaluate a reduced tree to completion over an existing scope chain
///
/// Assignments land in the chain's scopes, so the caller observes them.
pub fn evaluate(
    tree: &Arc<ReducedTree>,
    scopes: &ScopeChain,
    functions: &FunctionTable,
    step_limit: Option<u64>,
) -> VmResult<Evaluation> {
    let env = Env {
        functions,
        mode: Mode::Sync,
        step_limit,
    };
    let mut ctx = Context::new(scopes.clone());
    exec_loop::enter(&mut ctx, &env, tree, tree.root())?;
    match exec_loop::run(&mut ctx, &env)? {
        Step::Done(value) => Ok(Evaluation::Value(value)),
        Step::Escaped(label, value) => Ok(Evaluation::Escape(label, value)),
        Step::Suspended | Step::Yielded | Step::Continue => Err(VmError::CannotSuspend(
            "pass-through expression suspended".to_string(),
        )),
    }
}
