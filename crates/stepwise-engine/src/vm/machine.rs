//! Compiled machine
//!
//! Executes a `LinearBody`. Each resumption starts at the top block's jump
//! table, which routes the durable state to the state label (resetting the
//! state) or, for a state inside a try region, to the region's re-entry
//! label so the region's own table finishes the routing. Jumps to labels a
//! block does not contain leave the block; the enclosing `TryRegion` turns
//! them into exit codes.

use std::sync::Arc;

use tracing::{debug, trace};

use super::error::{VmError, VmResult};
use super::execution::{MachineStatus, Resumable};
use super::host::{MachineHost, Suspension};
use super::interpreter::{evaluate, Evaluation};
use super::scope::{Scope, ScopeChain};
use super::{FunctionTable, Value};
use crate::compiler::linear::{CompiledExpr, LinearBlock, LinearLabel, SuspendKind, TryRegion};
use crate::compiler::{LinearBody, LinearInstr};
use crate::defaults::{STATE_DONE, STATE_START, TRY_STATE_UNHANDLED};
use crate::tree::{LambdaKind, Var};

/// How a block stopped
#[derive(Debug)]
enum Flow {
    Suspend(SuspendKind),
    Complete(Value),
    /// Jump to a label outside the block
    Leave(LinearLabel),
}

enum Next {
    Advance,
    Jump(LinearLabel),
    Stop(Flow),
}

enum Evaluated {
    Value(Value),
    Jump(LinearLabel),
}

/// Evaluate an expression, or jump if a goto escaped it
macro_rules! eval_or_jump {
    ($machine:expr, $expr:expr) => {
        match $machine.eval($expr)? {
            Evaluated::Value(value) => value,
            Evaluated::Jump(label) => return Ok(Next::Jump(label)),
        }
    };
}

/// A lambda invocation running its compiled form
#[derive(Debug)]
pub struct CompiledMachine {
    body: Arc<LinearBody>,
    host: MachineHost,
    functions: Arc<FunctionTable>,
    step_limit: Option<u64>,
    steps: u64,
}

impl CompiledMachine {
    /// Bind arguments; the machine runs on the first `resume`
    pub fn new(
        body: Arc<LinearBody>,
        args: Vec<Value>,
        functions: Arc<FunctionTable>,
        step_limit: Option<u64>,
    ) -> VmResult<Self> {
        if args.len() != body.params.len() {
            return Err(VmError::Arity {
                expected: body.params.len(),
                found: args.len(),
            });
        }
        let scope = Scope::with_vars(&body.variables);
        for (param, value) in body.params.iter().zip(args) {
            scope.declare(param.id, value);
        }
        Ok(Self {
            host: MachineHost::new(ScopeChain::from_scope(Arc::new(scope))),
            body,
            functions,
            step_limit,
            steps: 0,
        })
    }

    /// Durable fields
    pub fn host(&self) -> &MachineHost {
        &self.host
    }

    /// Current durable state id
    pub fn state(&self) -> i64 {
        self.host.state
    }

    /// Overwrite the durable state, as a host restoring a persisted machine does
    pub fn set_state(&mut self, state: i64) {
        self.host.state = state;
    }

    /// Last value produced by `yield return`
    pub fn current(&self) -> &Value {
        &self.host.current
    }

    /// Linear form being run
    pub fn body(&self) -> &Arc<LinearBody> {
        &self.body
    }

    fn read(&self, var: &Var) -> VmResult<Value> {
        self.host
            .scopes
            .lookup(var.id)
            .ok_or_else(|| VmError::UnboundVariable(var.name.clone()))
    }

    fn write(&self, var: &Var, value: Value) -> VmResult<()> {
        if self.host.scopes.assign(var.id, value) {
            Ok(())
        } else {
            Err(VmError::UnboundVariable(var.name.clone()))
        }
    }

    fn eval(&self, expr: &CompiledExpr) -> VmResult<Evaluated> {
        match evaluate(&expr.tree, &self.host.scopes, &self.functions, self.step_limit)? {
            Evaluation::Value(value) => Ok(Evaluated::Value(value)),
            Evaluation::Escape(label, value) => {
                let slot = self.body.labels.get(&label).ok_or_else(|| {
                    VmError::InvalidTransition(format!("goto L{} has no target state", label.0))
                })?;
                if let Some(var) = &slot.variable {
                    self.write(var, value)?;
                }
                Ok(Evaluated::Jump(slot.label))
            }
        }
    }

    /// Where a block starts for the current durable state
    fn entry_point(&mut self, block: &LinearBlock) -> VmResult<usize> {
        let state = self.host.state;
        if state == STATE_START {
            return Ok(0);
        }
        let entry = block.table.lookup(state).ok_or_else(|| {
            VmError::InvalidTransition(format!("no resume point for state {}", state))
        })?;
        if !entry.nested {
            self.host.state = STATE_START;
        }
        block.position(entry.label).ok_or_else(|| {
            VmError::InvalidTransition(format!("resume label {} is not in its block", entry.label))
        })
    }

    fn run_block(&mut self, block: &LinearBlock) -> VmResult<Flow> {
        let mut pc = self.entry_point(block)?;
        loop {
            let instr = block.instrs.get(pc).ok_or_else(|| {
                VmError::InvalidTransition("control ran past the end of a block".to_string())
            })?;
            if let Some(limit) = self.step_limit {
                if self.steps >= limit {
                    return Err(VmError::StepLimitExceeded(limit));
                }
            }
            self.steps += 1;

            match self.exec(instr)? {
                Next::Advance => pc += 1,
                Next::Jump(label) => match block.position(label) {
                    Some(position) => pc = position,
                    None => return Ok(Flow::Leave(label)),
                },
                Next::Stop(flow) => return Ok(flow),
            }
        }
    }

    fn exec(&mut self, instr: &LinearInstr) -> VmResult<Next> {
        match instr {
            LinearInstr::Label(_) => {}
            LinearInstr::Eval(expr) => {
                eval_or_jump!(self, expr);
            }
            LinearInstr::Assign { target, value } => {
                let value = eval_or_jump!(self, value);
                self.write(target, value)?;
            }
            LinearInstr::Goto(label) => return Ok(Next::Jump(*label)),
            LinearInstr::GotoIf { test, target } => {
                if eval_or_jump!(self, test).is_truthy() {
                    return Ok(Next::Jump(*target));
                }
            }
            LinearInstr::Switch {
                value,
                cases,
                default,
            } => {
                let value = eval_or_jump!(self, value);
                for (tests, target) in cases {
                    for test in tests {
                        if eval_or_jump!(self, test) == value {
                            return Ok(Next::Jump(*target));
                        }
                    }
                }
                return Ok(Next::Jump(*default));
            }
            LinearInstr::SetState(state) => self.host.state = *state,
            LinearInstr::GetAwaiter {
                awaitable,
                awaiter,
                binder,
                configure_await,
            } => {
                let awaitable = eval_or_jump!(self, awaitable);
                let value = binder.get_awaiter(awaitable, *configure_await)?;
                self.write(awaiter, value)?;
            }
            LinearInstr::GotoIfCompleted {
                awaiter,
                binder,
                target,
            } => {
                if binder.is_completed(&self.read(awaiter)?)? {
                    return Ok(Next::Jump(*target));
                }
            }
            LinearInstr::RegisterContinuation { awaiter, binder } => {
                self.host.suspension = Some(Suspension {
                    awaiter: self.read(awaiter)?,
                    binder: binder.clone(),
                });
            }
            LinearInstr::Suspend(kind) => return Ok(Next::Stop(Flow::Suspend(*kind))),
            LinearInstr::GetResult {
                awaiter,
                binder,
                target,
            } => {
                let result = binder.get_result(&self.read(awaiter)?)?;
                self.write(awaiter, Value::Unit)?;
                if let Some(target) = target {
                    self.write(target, result)?;
                }
            }
            LinearInstr::SetCurrent(value) => {
                self.host.current = eval_or_jump!(self, value);
                self.host.success = true;
            }
            LinearInstr::YieldBreak => {
                self.host.success = false;
                return Ok(Next::Stop(Flow::Complete(Value::Unit)));
            }
            LinearInstr::Return(value) => {
                let value = match value {
                    Some(value) => eval_or_jump!(self, value),
                    None => Value::Unit,
                };
                return Ok(Next::Stop(Flow::Complete(value)));
            }
            LinearInstr::TryRegion(region) => return self.run_region(region),
            LinearInstr::DispatchTryState {
                try_state,
                exception,
                cases,
                rethrow_unhandled,
                default,
            } => {
                let code = self.read(try_state)?.as_int().unwrap_or_default();
                if *rethrow_unhandled && code == TRY_STATE_UNHANDLED {
                    let stored = self.read(exception)?;
                    trace!(target: "stepwise::machine", "rethrowing after finally");
                    return Err(VmError::Thrown(stored.into_exception()));
                }
                let target = cases
                    .iter()
                    .find(|(case, _)| *case == code)
                    .map_or(*default, |(_, label)| *label);
                return Ok(Next::Jump(target));
            }
        }
        Ok(Next::Advance)
    }

    /// Run a protected region and record how it was left in its try-state
    fn run_region(&mut self, region: &TryRegion) -> VmResult<Next> {
        match self.run_block(&region.block) {
            Ok(Flow::Leave(label)) => match region.exit_code(label) {
                Some(code) => {
                    self.write(&region.try_state, Value::Int(code))?;
                    Ok(Next::Advance)
                }
                None => Ok(Next::Stop(Flow::Leave(label))),
            },
            Ok(flow) => Ok(Next::Stop(flow)),
            Err(VmError::Thrown(exception)) => {
                let code = region
                    .handlers
                    .iter()
                    .find(|(filter, _)| filter.matches(&exception))
                    .map(|(_, code)| *code)
                    .or(region.catch_all.then_some(TRY_STATE_UNHANDLED));
                match code {
                    Some(code) => {
                        trace!(
                            target: "stepwise::machine",
                            owner = %region.owner,
                            code,
                            "caught {}",
                            exception
                        );
                        self.write(&region.exception, Value::Exception(exception))?;
                        self.write(&region.try_state, Value::Int(code))?;
                        Ok(Next::Advance)
                    }
                    None => Err(VmError::Thrown(exception)),
                }
            }
            Err(err) => Err(err),
        }
    }
}

/// Cloning forks the durable fields; the copy resumes independently
impl Clone for CompiledMachine {
    fn clone(&self) -> Self {
        Self {
            body: self.body.clone(),
            host: self.host.fork(),
            functions: self.functions.clone(),
            step_limit: self.step_limit,
            steps: 0,
        }
    }
}

impl Resumable for CompiledMachine {
    fn resume(&mut self) -> VmResult<MachineStatus> {
        if self.host.state == STATE_DONE {
            return Err(VmError::AlreadyCompleted);
        }
        self.steps = 0;
        self.host.success = false;
        let body = self.body.clone();
        let result = match self.run_block(&body.entry) {
            Ok(Flow::Suspend(SuspendKind::Await)) => return Ok(MachineStatus::Suspended),
            Ok(Flow::Suspend(SuspendKind::Yield)) => {
                return Ok(MachineStatus::Yielded(self.host.current.clone()))
            }
            Ok(Flow::Complete(value)) => Ok(MachineStatus::Completed(match body.kind {
                LambdaKind::Generator => Value::Unit,
                _ => value,
            })),
            Ok(Flow::Leave(label)) => Err(VmError::InvalidTransition(format!(
                "jump to {} left the machine",
                label
            ))),
            Err(err) => Err(err),
        };
        self.host.state = STATE_DONE;
        debug!(
            target: "stepwise::machine",
            lambda = %body.name,
            ok = result.is_ok(),
            steps = self.steps,
            "machine completed"
        );
        result
    }

    fn take_suspension(&mut self) -> Option<Suspension> {
        self.host.suspension.take()
    }

    fn is_completed(&self) -> bool {
        self.host.state == STATE_DONE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::Compiler;
    use crate::tree::{BinaryOp, CatchBlock, Expr, LambdaExpr};
    use crate::vm::{Exception, TaskHandle};

    fn machine(lambda: LambdaExpr, functions: FunctionTable) -> CompiledMachine {
        Compiler::default()
            .compile(&lambda)
            .unwrap()
            .instantiate(vec![], Arc::new(functions))
            .unwrap()
    }

    #[test]
    fn test_state_resets_after_dispatch() {
        let task = TaskHandle::pending();
        let functions = FunctionTable::new().with("T", {
            let task = task.clone();
            move |_| Ok(Value::Task(task.clone()))
        });
        let lambda = LambdaExpr::asynchronous(
            vec![],
            Expr::binary(
                BinaryOp::Add,
                Expr::await_task(Expr::call("T", vec![])),
                Expr::constant(1i64),
            ),
        );
        let mut machine = machine(lambda, functions);
        assert_eq!(machine.state(), STATE_START);
        assert_eq!(machine.resume().unwrap(), MachineStatus::Suspended);
        assert!(machine.state() >= 0);
        assert!(machine.take_suspension().is_some());

        task.complete(Value::from(1i64));
        assert_eq!(
            machine.resume().unwrap(),
            MachineStatus::Completed(Value::from(2i64))
        );
        assert_eq!(machine.state(), STATE_DONE);
        assert!(matches!(machine.resume(), Err(VmError::AlreadyCompleted)));
    }

    #[test]
    fn test_faulted_await_is_caught() {
        let functions = FunctionTable::new().with("T", |_| {
            Ok(Value::Task(TaskHandle::faulted(Exception::new("Io", "gone"))))
        });
        let ex = Var::new(0, "ex");
        let lambda = LambdaExpr::asynchronous(
            vec![],
            Expr::try_catch(
                Expr::await_task(Expr::call("T", vec![])),
                vec![CatchBlock::kind("Io", Some(ex.clone()), Expr::constant("handled"))],
            ),
        );
        let mut machine = machine(lambda, functions);
        assert_eq!(
            machine.resume().unwrap(),
            MachineStatus::Completed(Value::from("handled"))
        );
    }

    #[test]
    fn test_unhandled_exception_completes_machine() {
        let lambda = LambdaExpr::asynchronous(
            vec![],
            Expr::throw(Expr::constant(Value::Exception(Exception::new("Boom", "x")))),
        );
        let mut machine = machine(lambda, FunctionTable::new());
        let err = machine.resume().unwrap_err();
        assert_eq!(err.exception().unwrap().kind, "Boom");
        assert!(machine.is_completed());
    }

    #[test]
    fn test_arity_is_checked() {
        let compiled = Compiler::default()
            .compile(&LambdaExpr::sync(vec![Var::new(0, "a")], Expr::unit()))
            .unwrap();
        assert!(matches!(
            compiled.instantiate(vec![], Arc::new(FunctionTable::new())),
            Err(VmError::Arity {
                expected: 1,
                found: 0
            })
        ));
    }
}
