//! Interpreter step loop
//!
//! `step` advances the innermost frame by one phase. Abrupt completions
//! (gotos, throws and `yield break`) are parked in `Context::control` and
//! handed to `unwind`, which walks them outwards one frame per step: the
//! goto's common ancestor lands it, a try with a finally body defers it, and
//! a matching catch handler absorbs a throw.

use std::sync::Arc;

use tracing::trace;

use super::context::{Context, Control, Frame, PendingTransition};
use super::ops;
use super::phase::{
    AwaitPhase, BlockPhase, ConditionPhase, FrameKind, InvokePhase, LoopPhase, Pending,
    ShortCircuitPhase, SwitchPhase, TryPhase, YieldPhase,
};
use super::reduced::{GotoRoute, NodeId, NodeKind, ReducedTree, RouteKind};
use crate::tree::{BinaryOp, LabelId};
use crate::vm::error::{VmError, VmResult};
use crate::vm::host::Suspension;
use crate::vm::scope::Scope;
use crate::vm::value::{Closure, Exception, ExceptionRef, Value};
use crate::vm::FunctionTable;

/// What kind of lambda the loop is running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// No suspension allowed
    Sync,
    /// `await` may suspend
    Async,
    /// `yield return` / `yield break` allowed
    Generator,
}

/// Per-run inputs of the loop
pub struct Env<'a> {
    /// Host functions for `Call` nodes
    pub functions: &'a FunctionTable,
    /// Suspension rules
    pub mode: Mode,
    /// Step budget for one resumption
    pub step_limit: Option<u64>,
}

/// Outcome of one step
#[derive(Debug)]
pub enum Step {
    /// More work to do
    Continue,
    /// Suspended on an incomplete awaiter
    Suspended,
    /// Produced `Context::current`
    Yielded,
    /// Frame stack emptied with a value
    Done(Value),
    /// A goto left the tree towards a label its evaluator owns
    Escaped(LabelId, Value),
}

/// Step until the machine suspends, yields or finishes
pub fn run(ctx: &mut Context, env: &Env<'_>) -> VmResult<Step> {
    ctx.steps = 0;
    loop {
        match step(ctx, env)? {
            Step::Continue => {}
            other => return Ok(other),
        }
    }
}

/// Start evaluating `id`; leaves produce their value immediately
pub fn enter(ctx: &mut Context, env: &Env<'_>, tree: &Arc<ReducedTree>, id: NodeId) -> VmResult<()> {
    let scope_depth = ctx.scopes.depth();
    let kind = match &tree.node(id).kind {
        NodeKind::Constant(value) => {
            ctx.results.push(value.clone());
            return Ok(());
        }
        NodeKind::Variable(var) => {
            let value = ctx
                .scopes
                .lookup(var.id)
                .ok_or_else(|| VmError::UnboundVariable(var.name.clone()))?;
            ctx.results.push(value);
            return Ok(());
        }
        NodeKind::Lambda(template) => {
            ctx.results.push(Value::Closure(Arc::new(Closure {
                template: template.clone(),
                captured: ctx.scopes.clone(),
            })));
            return Ok(());
        }
        NodeKind::Rethrow => {
            let exception = active_exception(ctx).ok_or_else(|| {
                VmError::InvalidTransition("rethrow outside a catch handler".to_string())
            })?;
            ctx.control = Control::Throw(exception);
            return Ok(());
        }
        NodeKind::YieldBreak => {
            if env.mode != Mode::Generator {
                return Err(VmError::CannotSuspend(
                    "yield break outside a generator".to_string(),
                ));
            }
            ctx.control = Control::Exit(Value::Unit);
            return Ok(());
        }
        NodeKind::Block { variables } => {
            let scoped = !variables.is_empty();
            if scoped {
                ctx.scopes.push(Arc::new(Scope::with_vars(variables)));
            }
            FrameKind::Block {
                phase: BlockPhase::Run,
                index: 0,
                scoped,
            }
        }
        NodeKind::Binary(op) if op.is_short_circuit() => {
            FrameKind::ShortCircuit(ShortCircuitPhase::Left)
        }
        NodeKind::Condition { .. } => FrameKind::Condition(ConditionPhase::Test),
        NodeKind::Switch(_) => FrameKind::Switch {
            phase: SwitchPhase::Value,
            case: 0,
            test: 0,
        },
        NodeKind::Loop => FrameKind::Loop(LoopPhase::Body),
        NodeKind::Try(_) => FrameKind::Try {
            phase: TryPhase::Body,
            handler: 0,
            exception: None,
            pending: None,
        },
        NodeKind::Await { .. } => FrameKind::Await {
            phase: AwaitPhase::Operand,
            awaiter: None,
        },
        NodeKind::YieldReturn => FrameKind::Yield(YieldPhase::Operand),
        _ => FrameKind::Operands { next: 0 },
    };
    ctx.frames.push(Frame {
        tree: tree.clone(),
        node: id,
        kind,
        results_base: ctx.results.len(),
        scope_depth,
        saved_scopes: None,
    });
    Ok(())
}

/// Advance the machine by one phase
pub fn step(ctx: &mut Context, env: &Env<'_>) -> VmResult<Step> {
    if let Some(limit) = env.step_limit {
        if ctx.steps >= limit {
            return Err(VmError::StepLimitExceeded(limit));
        }
    }
    ctx.steps += 1;

    if !ctx.control.is_none() {
        return unwind(ctx, env);
    }
    let Some(frame) = ctx.frames.last() else {
        return Ok(Step::Done(pop_result(ctx)));
    };
    let tree = frame.tree.clone();
    let id = frame.node;
    let base = frame.results_base;
    let kind = frame.kind.clone();
    let node = tree.node(id);

    match kind {
        FrameKind::Operands { next } => {
            if next < node.children.len() {
                set_kind(ctx, FrameKind::Operands { next: next + 1 });
                enter(ctx, env, &tree, node.children[next])?;
            } else {
                let args = ctx.results.split_off(base);
                apply(ctx, env, &tree, id, args)?;
            }
        }

        FrameKind::ShortCircuit(phase) => match phase {
            ShortCircuitPhase::Left => {
                set_kind(ctx, FrameKind::ShortCircuit(ShortCircuitPhase::HandleLeft));
                enter(ctx, env, &tree, tree.child(id, 0)?)?;
            }
            ShortCircuitPhase::HandleLeft => {
                let left = pop_result(ctx).is_truthy();
                let and = matches!(node.kind, NodeKind::Binary(BinaryOp::AndAlso));
                if and != left {
                    complete(ctx, Value::Bool(left));
                } else {
                    set_kind(ctx, FrameKind::ShortCircuit(ShortCircuitPhase::HandleRight));
                    enter(ctx, env, &tree, tree.child(id, 1)?)?;
                }
            }
            ShortCircuitPhase::HandleRight => {
                let right = pop_result(ctx).is_truthy();
                complete(ctx, Value::Bool(right));
            }
        },

        FrameKind::Block {
            phase,
            index,
            scoped,
        } => match phase {
            BlockPhase::Run if index >= node.children.len() => complete(ctx, Value::Unit),
            BlockPhase::Run => {
                set_kind(
                    ctx,
                    FrameKind::Block {
                        phase: BlockPhase::HandleChild,
                        index,
                        scoped,
                    },
                );
                enter(ctx, env, &tree, node.children[index])?;
            }
            BlockPhase::HandleChild => {
                let value = pop_result(ctx);
                if index + 1 >= node.children.len() {
                    complete(ctx, value);
                } else {
                    set_kind(
                        ctx,
                        FrameKind::Block {
                            phase: BlockPhase::Run,
                            index: index + 1,
                            scoped,
                        },
                    );
                }
            }
        },

        FrameKind::Condition(phase) => match phase {
            ConditionPhase::Test => {
                set_kind(ctx, FrameKind::Condition(ConditionPhase::HandleTest));
                enter(ctx, env, &tree, tree.child(id, 0)?)?;
            }
            ConditionPhase::HandleTest => {
                let test = pop_result(ctx).is_truthy();
                let has_else = matches!(node.kind, NodeKind::Condition { has_else: true });
                if test || has_else {
                    set_kind(ctx, FrameKind::Condition(ConditionPhase::Complete));
                    let slot = if test { 1 } else { 2 };
                    enter(ctx, env, &tree, tree.child(id, slot)?)?;
                } else {
                    complete(ctx, Value::Unit);
                }
            }
            ConditionPhase::Complete => {
                let value = pop_result(ctx);
                complete(ctx, value);
            }
        },

        FrameKind::Switch { phase, case, test } => {
            let NodeKind::Switch(layout) = &node.kind else {
                return Err(mismatched_frame(&node.kind));
            };
            match phase {
                SwitchPhase::Value => {
                    set_kind(
                        ctx,
                        FrameKind::Switch {
                            phase: SwitchPhase::Test,
                            case: 0,
                            test: 0,
                        },
                    );
                    enter(ctx, env, &tree, tree.child(id, 0)?)?;
                }
                SwitchPhase::Test => match layout.cases.get(case) {
                    None => match layout.default {
                        Some(slot) => {
                            set_kind(
                                ctx,
                                FrameKind::Switch {
                                    phase: SwitchPhase::Complete,
                                    case,
                                    test,
                                },
                            );
                            enter(ctx, env, &tree, tree.child(id, slot)?)?;
                        }
                        None => complete(ctx, Value::Unit),
                    },
                    Some(layout_case) => match layout_case.tests.get(test) {
                        None => set_kind(
                            ctx,
                            FrameKind::Switch {
                                phase: SwitchPhase::Test,
                                case: case + 1,
                                test: 0,
                            },
                        ),
                        Some(&slot) => {
                            set_kind(
                                ctx,
                                FrameKind::Switch {
                                    phase: SwitchPhase::HandleTest,
                                    case,
                                    test,
                                },
                            );
                            enter(ctx, env, &tree, tree.child(id, slot)?)?;
                        }
                    },
                },
                SwitchPhase::HandleTest => {
                    let candidate = pop_result(ctx);
                    let value = ctx.results.get(base).cloned().unwrap_or_default();
                    if candidate == value {
                        set_kind(
                            ctx,
                            FrameKind::Switch {
                                phase: SwitchPhase::Complete,
                                case,
                                test,
                            },
                        );
                        enter(ctx, env, &tree, tree.child(id, layout.cases[case].body)?)?;
                    } else {
                        set_kind(
                            ctx,
                            FrameKind::Switch {
                                phase: SwitchPhase::Test,
                                case,
                                test: test + 1,
                            },
                        );
                    }
                }
                SwitchPhase::Complete => {
                    let value = pop_result(ctx);
                    complete(ctx, value);
                }
            }
        }

        FrameKind::Loop(phase) => match phase {
            LoopPhase::Body => {
                set_kind(ctx, FrameKind::Loop(LoopPhase::HandleBody));
                enter(ctx, env, &tree, tree.child(id, 0)?)?;
            }
            LoopPhase::HandleBody => {
                pop_result(ctx);
                set_kind(ctx, FrameKind::Loop(LoopPhase::Body));
            }
        },

        FrameKind::Try { phase, pending, .. } => {
            let NodeKind::Try(layout) = &node.kind else {
                return Err(mismatched_frame(&node.kind));
            };
            match phase {
                TryPhase::Body => {
                    set_kind(
                        ctx,
                        FrameKind::Try {
                            phase: TryPhase::HandleBody,
                            handler: 0,
                            exception: None,
                            pending: None,
                        },
                    );
                    enter(ctx, env, &tree, tree.child(id, 0)?)?;
                }
                TryPhase::HandleBody | TryPhase::HandleHandler => {
                    let value = pop_result(ctx);
                    match layout.finally {
                        Some(slot) => start_finally(ctx, env, slot, Pending::Value(value))?,
                        None => complete(ctx, value),
                    }
                }
                TryPhase::HandleFinally => {
                    pop_result(ctx);
                    match pending {
                        None => complete(ctx, Value::Unit),
                        Some(Pending::Value(value)) => complete(ctx, value),
                        Some(Pending::Transition(transition)) => {
                            pop_frame(ctx);
                            ctx.control = Control::Transition(transition);
                        }
                        Some(Pending::Throw(exception)) => {
                            pop_frame(ctx);
                            ctx.control = Control::Throw(exception);
                        }
                        Some(Pending::Exit(value)) => {
                            pop_frame(ctx);
                            ctx.control = Control::Exit(value);
                        }
                    }
                }
            }
        }

        FrameKind::Await { phase, awaiter } => {
            let NodeKind::Await {
                binder,
                configure_await,
            } = &node.kind
            else {
                return Err(mismatched_frame(&node.kind));
            };
            match phase {
                AwaitPhase::Operand => {
                    set_kind(
                        ctx,
                        FrameKind::Await {
                            phase: AwaitPhase::Check,
                            awaiter: None,
                        },
                    );
                    enter(ctx, env, &tree, tree.child(id, 0)?)?;
                }
                AwaitPhase::Check => {
                    let awaitable = pop_result(ctx);
                    let awaiter = match binder.get_awaiter(awaitable, *configure_await) {
                        Ok(awaiter) => awaiter,
                        Err(exception) => {
                            throw(ctx, exception);
                            return Ok(Step::Continue);
                        }
                    };
                    match binder.is_completed(&awaiter) {
                        Err(exception) => throw(ctx, exception),
                        Ok(true) => finish(ctx, binder.get_result(&awaiter)),
                        Ok(false) => {
                            if env.mode != Mode::Async {
                                return Err(VmError::CannotSuspend(
                                    "await on an incomplete awaiter outside an async lambda"
                                        .to_string(),
                                ));
                            }
                            set_kind(
                                ctx,
                                FrameKind::Await {
                                    phase: AwaitPhase::Resume,
                                    awaiter: Some(awaiter.clone()),
                                },
                            );
                            ctx.suspension = Some(Suspension {
                                awaiter,
                                binder: binder.clone(),
                            });
                            trace!(target: "stepwise::interpreter", frames = ctx.frames.len(), "suspended");
                            return Ok(Step::Suspended);
                        }
                    }
                }
                AwaitPhase::Resume => {
                    let awaiter = awaiter.unwrap_or_default();
                    finish(ctx, binder.get_result(&awaiter));
                }
            }
        }

        FrameKind::Yield(phase) => match phase {
            YieldPhase::Operand => {
                set_kind(ctx, FrameKind::Yield(YieldPhase::Emit));
                enter(ctx, env, &tree, tree.child(id, 0)?)?;
            }
            YieldPhase::Emit => {
                if env.mode != Mode::Generator {
                    return Err(VmError::CannotSuspend(
                        "yield return outside a generator".to_string(),
                    ));
                }
                ctx.current = pop_result(ctx);
                set_kind(ctx, FrameKind::Yield(YieldPhase::Resume));
                return Ok(Step::Yielded);
            }
            YieldPhase::Resume => complete(ctx, Value::Unit),
        },

        FrameKind::Invoke(InvokePhase::Return) => {
            let value = pop_result(ctx);
            complete(ctx, value);
        }
    }
    Ok(Step::Continue)
}

/// Apply a node whose operands are all evaluated
fn apply(
    ctx: &mut Context,
    env: &Env<'_>,
    tree: &Arc<ReducedTree>,
    id: NodeId,
    args: Vec<Value>,
) -> VmResult<()> {
    let arg = |index: usize| args.get(index).cloned().unwrap_or_default();
    match &tree.node(id).kind {
        NodeKind::Assign(var) => {
            let value = arg(0);
            if !ctx.scopes.assign(var.id, value.clone()) {
                return Err(VmError::UnboundVariable(var.name.clone()));
            }
            complete(ctx, value);
        }
        NodeKind::Binary(op) => finish(ctx, ops::binary(*op, &arg(0), &arg(1))),
        NodeKind::Unary(op) => finish(ctx, ops::unary(*op, &arg(0))),
        NodeKind::Call(name) => finish(ctx, env.functions.call(name, &args)),
        NodeKind::Throw => throw(ctx, arg(0).into_exception()),
        NodeKind::Goto {
            label,
            route,
            has_value,
        } => {
            let value = if *has_value { arg(0) } else { Value::Unit };
            ctx.control = Control::Transition(PendingTransition {
                tree: tree.clone(),
                label: *label,
                route: route.clone(),
                value,
            });
        }
        NodeKind::Label { .. } => complete(ctx, arg(0)),
        NodeKind::Invoke => invoke(ctx, env, args)?,
        other => return Err(mismatched_frame(other)),
    }
    Ok(())
}

/// Call a closure: swap in its captured chain plus a parameter scope
fn invoke(ctx: &mut Context, env: &Env<'_>, args: Vec<Value>) -> VmResult<()> {
    let mut args = args.into_iter();
    let target = args.next().unwrap_or_default();
    let Value::Closure(closure) = target else {
        throw(
            ctx,
            Exception::type_error(format!("{} is not callable", target.type_name())),
        );
        return Ok(());
    };
    let args: Vec<Value> = args.collect();
    let params = &closure.template.params;
    if params.len() != args.len() {
        return Err(VmError::Arity {
            expected: params.len(),
            found: args.len(),
        });
    }

    let scope = Scope::new();
    for (param, value) in params.iter().zip(args) {
        scope.declare(param.id, value);
    }
    let mut chain = closure.captured.clone();
    chain.push(Arc::new(scope));
    let saved = std::mem::replace(&mut ctx.scopes, chain);
    if let Some(frame) = ctx.frames.last_mut() {
        frame.kind = FrameKind::Invoke(InvokePhase::Return);
        frame.saved_scopes = Some(saved);
    }
    let body = closure.template.tree.clone();
    enter(ctx, env, &body, body.root())
}

/// Propagate the control transfer in flight by one frame
fn unwind(ctx: &mut Context, env: &Env<'_>) -> VmResult<Step> {
    let control = std::mem::take(&mut ctx.control);
    let Some(frame) = ctx.frames.last() else {
        return match control {
            Control::None => Ok(Step::Continue),
            Control::Transition(transition) => match transition.route {
                GotoRoute::Escape => Ok(Step::Escaped(transition.label, transition.value)),
                GotoRoute::Local { .. } => Err(VmError::InvalidTransition(format!(
                    "goto L{} never reached its target",
                    transition.label.0
                ))),
            },
            Control::Throw(exception) => Err(VmError::Thrown(exception)),
            Control::Exit(value) => Ok(Step::Done(value)),
        };
    };
    let tree = frame.tree.clone();
    let id = frame.node;
    let try_phase = match &frame.kind {
        FrameKind::Try { phase, .. } => Some(*phase),
        _ => None,
    };
    let guarded = matches!(
        try_phase,
        Some(TryPhase::HandleBody) | Some(TryPhase::HandleHandler)
    );
    let layout = match &tree.node(id).kind {
        NodeKind::Try(layout) => Some(layout),
        _ => None,
    };
    let finally = layout.and_then(|layout| layout.finally).filter(|_| guarded);

    match control {
        Control::None => {}
        Control::Transition(transition) => {
            let lands_here = matches!(
                &transition.route,
                GotoRoute::Local { ancestor, .. }
                    if *ancestor == id && Arc::ptr_eq(&transition.tree, &tree)
            );
            if lands_here {
                land(ctx, env, transition)?;
            } else if let Some(slot) = finally {
                start_finally(ctx, env, slot, Pending::Transition(transition))?;
            } else {
                pop_frame(ctx);
                ctx.control = Control::Transition(transition);
            }
        }
        Control::Throw(exception) => {
            let handler = layout
                .filter(|_| try_phase == Some(TryPhase::HandleBody))
                .and_then(|layout| {
                    layout
                        .handlers
                        .iter()
                        .position(|handler| handler.filter.matches(&exception))
                });
            if let Some(index) = handler {
                start_handler(ctx, env, index, exception)?;
            } else if let Some(slot) = finally {
                start_finally(ctx, env, slot, Pending::Throw(exception))?;
            } else {
                pop_frame(ctx);
                ctx.control = Control::Throw(exception);
            }
        }
        Control::Exit(value) => {
            if let Some(slot) = finally {
                start_finally(ctx, env, slot, Pending::Exit(value))?;
            } else {
                pop_frame(ctx);
                ctx.control = Control::Exit(value);
            }
        }
    }
    Ok(Step::Continue)
}

/// Deliver a goto at its common ancestor
fn land(ctx: &mut Context, env: &Env<'_>, transition: PendingTransition) -> VmResult<()> {
    let GotoRoute::Local { path, kind, .. } = &transition.route else {
        return Err(VmError::InvalidTransition(
            "escaping goto has no ancestor".to_string(),
        ));
    };
    let Some(frame) = ctx.frames.last() else {
        return Err(VmError::InvalidTransition(format!(
            "goto L{} landed on an empty stack",
            transition.label.0
        )));
    };
    let tree = frame.tree.clone();
    let id = frame.node;
    let base = frame.results_base;
    let depth = frame.scope_depth;
    let frame_kind = frame.kind.clone();

    match (frame_kind, kind) {
        (FrameKind::Loop(_), RouteKind::Break) => complete(ctx, transition.value),
        (FrameKind::Loop(_), RouteKind::Continue) => {
            ctx.results.truncate(base);
            ctx.scopes.truncate(depth);
            set_kind(ctx, FrameKind::Loop(LoopPhase::Body));
        }
        (FrameKind::Block { scoped, .. }, RouteKind::Label) => {
            ctx.results.truncate(base);
            ctx.scopes.truncate(depth + usize::from(scoped));
            let Some((&slot, rest)) = path.split_first() else {
                return Err(VmError::InvalidTransition(format!(
                    "goto L{} has an empty route",
                    transition.label.0
                )));
            };
            let children = tree.node(id).children.len();
            if !rest.is_empty() {
                set_kind(
                    ctx,
                    FrameKind::Block {
                        phase: BlockPhase::HandleChild,
                        index: slot,
                        scoped,
                    },
                );
                let child = tree.child(id, slot)?;
                enter(ctx, env, &tree, child)?;
                ctx.control = Control::Transition(PendingTransition {
                    route: GotoRoute::Local {
                        ancestor: child,
                        path: rest.to_vec(),
                        kind: RouteKind::Label,
                    },
                    ..transition
                });
            } else if slot + 1 >= children {
                complete(ctx, transition.value);
            } else {
                set_kind(
                    ctx,
                    FrameKind::Block {
                        phase: BlockPhase::Run,
                        index: slot + 1,
                        scoped,
                    },
                );
            }
        }
        (_, _) => {
            return Err(VmError::InvalidTransition(format!(
                "goto L{} reached a node that cannot receive it",
                transition.label.0
            )))
        }
    }
    Ok(())
}

/// Run the handler at `index` for `exception`
fn start_handler(
    ctx: &mut Context,
    env: &Env<'_>,
    index: usize,
    exception: ExceptionRef,
) -> VmResult<()> {
    let (tree, id) = reset_top(ctx)?;
    let NodeKind::Try(layout) = &tree.node(id).kind else {
        return Err(mismatched_frame(&tree.node(id).kind));
    };
    let handler = &layout.handlers[index];
    set_kind(
        ctx,
        FrameKind::Try {
            phase: TryPhase::HandleHandler,
            handler: index,
            exception: Some(exception.clone()),
            pending: None,
        },
    );
    if let Some(var) = &handler.variable {
        let scope = Scope::new();
        scope.declare(var.id, Value::Exception(exception));
        ctx.scopes.push(Arc::new(scope));
    }
    enter(ctx, env, &tree, tree.child(id, handler.body)?)
}

/// Run the finally body at `slot`, deferring `pending` until it completes
fn start_finally(ctx: &mut Context, env: &Env<'_>, slot: usize, pending: Pending) -> VmResult<()> {
    let (tree, id) = reset_top(ctx)?;
    set_kind(
        ctx,
        FrameKind::Try {
            phase: TryPhase::HandleFinally,
            handler: 0,
            exception: None,
            pending: Some(pending),
        },
    );
    enter(ctx, env, &tree, tree.child(id, slot)?)
}

/// Drop whatever the top frame's children left behind
fn reset_top(ctx: &mut Context) -> VmResult<(Arc<ReducedTree>, NodeId)> {
    let frame = ctx
        .frames
        .last()
        .ok_or_else(|| VmError::InvalidTransition("no frame to reset".to_string()))?;
    let tree = frame.tree.clone();
    let id = frame.node;
    ctx.results.truncate(frame.results_base);
    ctx.scopes.truncate(frame.scope_depth);
    Ok((tree, id))
}

/// Exception of the innermost running catch handler
fn active_exception(ctx: &Context) -> Option<ExceptionRef> {
    ctx.frames.iter().rev().find_map(|frame| match &frame.kind {
        FrameKind::Try {
            phase: TryPhase::HandleHandler,
            exception,
            ..
        } => exception.clone(),
        _ => None,
    })
}

fn mismatched_frame(kind: &NodeKind) -> VmError {
    VmError::InvalidTransition(format!("frame does not match its {} node", kind.name()))
}

fn set_kind(ctx: &mut Context, kind: FrameKind) {
    if let Some(frame) = ctx.frames.last_mut() {
        frame.kind = kind;
    }
}

fn pop_result(ctx: &mut Context) -> Value {
    ctx.results.pop().unwrap_or_default()
}

fn pop_frame(ctx: &mut Context) -> Option<Frame> {
    let mut frame = ctx.frames.pop()?;
    ctx.results.truncate(frame.results_base);
    match frame.saved_scopes.take() {
        Some(saved) => ctx.scopes = saved,
        None => ctx.scopes.truncate(frame.scope_depth),
    }
    Some(frame)
}

/// Finish the top frame with `value`
fn complete(ctx: &mut Context, value: Value) {
    pop_frame(ctx);
    ctx.results.push(value);
}

fn finish(ctx: &mut Context, outcome: Result<Value, ExceptionRef>) {
    match outcome {
        Ok(value) => complete(ctx, value),
        Err(exception) => throw(ctx, exception),
    }
}

fn throw(ctx: &mut Context, exception: ExceptionRef) {
    ctx.control = Control::Throw(exception);
}
