//! Lowering visitor
//!
//! Walks a lambda body and splits it into states at every suspend point.
//! `visit` returns the expression that produces the node's value in the
//! current state. Subtrees without suspend points come back unchanged and
//! are evaluated whole; suspending constructs are broken into states joined
//! by transitions, and their value is left in a temporary.
//!
//! Invariants kept while walking:
//! - `current` is always an open state (no transition yet)
//! - an expression returned by `visit` must be consumed before anything else
//!   is emitted, so operands that precede a suspending sibling are spilled
//!   into temporaries
//! - labels and loop targets are bound before the body that jumps to them is
//!   visited

use tracing::{debug, trace};

use super::binder::BinderRegistry;
use super::control_flow::{TryContext, TryPart, TryStack};
use super::error::{LowerError, LowerResult};
use super::graph::{LabelBinding, ScopeKind, StateGraph, StateId, StateResult};
use super::transition::{
    AwaitResultTransition, AwaitTransition, CatchTransition, FinallyExitTransition,
    SwitchCaseTransition, SwitchTransition, Transition, TryTransition,
};
use crate::tree::analysis::{analyze_lambda, first_suspend, requires_lowering};
use crate::tree::{
    BinaryOp, CatchBlock, Expr, LabelTarget, LambdaExpr, LambdaKind, SwitchCase, UnaryOp, Var,
};

/// Lower a lambda into a sealed, validated state graph
pub fn lower_lambda(lambda: &LambdaExpr, binders: &BinderRegistry) -> LowerResult<StateGraph> {
    let info = analyze_lambda(lambda)?;
    let mut lowerer = Lowerer::new(lambda, binders, info.max_var_id + 1);
    lowerer.lower_body(&lambda.body)?;

    let mut graph = lowerer.graph;
    graph.seal()?;
    graph.validate()?;

    debug!(
        target: "stepwise::lower",
        lambda = lambda.display_name(),
        states = graph.states.len(),
        suspend_points = info.suspend_points,
        "lowered lambda"
    );
    Ok(graph)
}

/// The lowering visitor
pub struct Lowerer<'a> {
    graph: StateGraph,
    binders: &'a BinderRegistry,
    current: StateId,
    tries: TryStack,
    next_var: u32,
    generator_exit: Option<StateId>,
}

impl<'a> Lowerer<'a> {
    /// Lowerer for `lambda`; temporaries are numbered from `first_temp`
    pub fn new(lambda: &LambdaExpr, binders: &'a BinderRegistry, first_temp: u32) -> Self {
        let graph = StateGraph::new(lambda.display_name(), lambda.kind, lambda.params.clone());
        let current = graph.entry;
        Self {
            graph,
            binders,
            current,
            tries: TryStack::new(),
            next_var: first_temp,
            generator_exit: None,
        }
    }

    /// Lower the lambda body and close the graph with its final transition
    pub fn lower_body(&mut self, body: &Expr) -> LowerResult<()> {
        if self.graph.kind == LambdaKind::Generator {
            let exit = self.new_state();
            self.graph.set_transition(exit, Transition::YieldBreak);
            self.generator_exit = Some(exit);
        }

        let value = self.visit(body)?;

        match (self.graph.kind, self.generator_exit) {
            (LambdaKind::Generator, Some(exit)) => {
                self.emit(value);
                self.goto(self.current, exit);
            }
            _ => {
                self.graph
                    .set_transition(self.current, Transition::Final { value: Some(value) });
            }
        }
        Ok(())
    }

    // ========================================================================
    // Graph helpers
    // ========================================================================

    fn new_state(&mut self) -> StateId {
        let id = self.graph.add_state();
        trace!(target: "stepwise::lower", state = %id, "new state");
        id
    }

    fn temp(&mut self, prefix: &str) -> Var {
        let var = Var::new(self.next_var, format!("${}{}", prefix, self.next_var));
        self.next_var += 1;
        self.graph.declare_variable(&var);
        var
    }

    fn goto(&mut self, from: StateId, to: StateId) {
        self.graph.set_transition(from, Transition::Goto { target: to });
    }

    /// Append an expression to the current state; pure leaves are dropped
    fn emit(&mut self, expr: Expr) {
        if !expr.is_pure_leaf() {
            self.graph.push_expression(self.current, expr);
        }
    }

    /// Capture a construct's value at the end of the current state
    fn emit_result(&mut self, variable: &Var, value: Expr) {
        if value.is_jump() {
            self.emit(value);
            return;
        }
        let state = self.graph.state_mut(self.current);
        if state.result.is_none() {
            state.result = Some(StateResult {
                variable: variable.clone(),
                value,
            });
        } else {
            self.emit(Expr::assign(variable, value));
        }
    }

    /// Evaluate `value` now into a temporary so later emissions cannot reorder it
    fn spill(&mut self, value: Expr) -> Expr {
        match value {
            Expr::Constant(_) => value,
            value => {
                let temp = self.temp("spill");
                self.emit(Expr::assign(&temp, value));
                Expr::var(&temp)
            }
        }
    }

    // ========================================================================
    // Visitor
    // ========================================================================

    /// Lower `expr`, returning the expression that yields its value
    pub fn visit(&mut self, expr: &Expr) -> LowerResult<Expr> {
        if let Expr::Label { target, default } = expr {
            return self.visit_label(target, default.as_deref());
        }
        if !requires_lowering(expr) {
            return Ok(expr.clone());
        }

        match expr {
            Expr::Assign { target, value } => {
                let value = self.visit(value)?;
                Ok(Expr::assign(target, value))
            }
            Expr::Binary { op, left, right } => self.visit_binary(*op, left, right),
            Expr::Unary { op, operand } => {
                let operand = self.visit(operand)?;
                Ok(Expr::unary(*op, operand))
            }
            Expr::Call { function, args } => {
                let args = self.visit_operands(args.iter().collect())?;
                Ok(Expr::call(function.clone(), args))
            }
            Expr::Invoke { target, args } => {
                let mut operands = vec![target.as_ref()];
                operands.extend(args.iter());
                let mut values = self.visit_operands(operands)?;
                let target = values.remove(0);
                Ok(Expr::invoke(target, values))
            }
            Expr::Block { variables, body } => self.visit_block(variables, body),
            Expr::Condition {
                test,
                if_true,
                if_false,
            } => self.visit_condition(test, if_true, if_false.as_deref()),
            Expr::Switch {
                value,
                cases,
                default,
            } => self.visit_switch(value, cases, default.as_deref()),
            Expr::Loop {
                body,
                break_label,
                continue_label,
            } => self.visit_loop(body, break_label.as_ref(), continue_label.as_ref()),
            Expr::Goto {
                kind,
                target,
                value,
            } => {
                let value = match value {
                    Some(value) => Some(Box::new(self.visit(value)?)),
                    None => None,
                };
                Ok(Expr::Goto {
                    kind: *kind,
                    target: target.clone(),
                    value,
                })
            }
            Expr::Try {
                body,
                handlers,
                finally,
            } => self.visit_try(body, handlers, finally.as_deref()),
            Expr::Throw(Some(value)) => {
                let value = self.visit(value)?;
                Ok(Expr::throw(value))
            }
            Expr::Await {
                awaitable,
                awaitable_type,
                configure_await,
            } => self.visit_await(awaitable, awaitable_type, *configure_await),
            Expr::YieldReturn(value) => self.visit_yield_return(expr, value),
            Expr::YieldBreak => self.visit_yield_break(expr),
            Expr::Constant(_)
            | Expr::Variable(_)
            | Expr::Lambda(_)
            | Expr::Throw(None)
            | Expr::Label { .. } => Ok(expr.clone()),
        }
    }

    /// Operands left to right; each one followed by a suspending sibling is spilled
    fn visit_operands(&mut self, operands: Vec<&Expr>) -> LowerResult<Vec<Expr>> {
        let mut values = Vec::with_capacity(operands.len());
        for (index, operand) in operands.iter().enumerate() {
            let value = self.visit(operand)?;
            let later_suspends = operands[index + 1..].iter().any(|e| requires_lowering(e));
            values.push(if later_suspends {
                self.spill(value)
            } else {
                value
            });
        }
        Ok(values)
    }

    fn visit_binary(&mut self, op: BinaryOp, left: &Expr, right: &Expr) -> LowerResult<Expr> {
        if op.is_short_circuit() && requires_lowering(right) {
            // `!!right` keeps the boolean result of the operator
            let right_bool = Expr::unary(UnaryOp::Not, Expr::unary(UnaryOp::Not, right.clone()));
            let rewritten = if op == BinaryOp::AndAlso {
                Expr::condition(left.clone(), right_bool, Expr::constant(false))
            } else {
                Expr::condition(left.clone(), Expr::constant(true), right_bool)
            };
            return self.visit(&rewritten);
        }

        let mut left_value = self.visit(left)?;
        if requires_lowering(right) {
            left_value = self.spill(left_value);
        }
        let right_value = self.visit(right)?;
        Ok(Expr::binary(op, left_value, right_value))
    }

    fn visit_block(&mut self, variables: &[Var], body: &[Expr]) -> LowerResult<Expr> {
        for var in variables {
            self.graph.declare_variable(var);
            self.emit(Expr::assign(var, Expr::unit()));
        }

        let Some(last) = body.len().checked_sub(1) else {
            return Ok(Expr::unit());
        };
        for (index, child) in body.iter().enumerate() {
            let value = self.visit(child)?;
            if index == last {
                return Ok(value);
            }
            self.emit(value);
        }
        Ok(Expr::unit())
    }

    fn visit_label(&mut self, target: &LabelTarget, default: Option<&Expr>) -> LowerResult<Expr> {
        let result = self.temp("label");
        let value = match default {
            Some(default) => self.visit(default)?,
            None => Expr::unit(),
        };
        self.emit_result(&result, value);

        let landing = self.new_state();
        self.goto(self.current, landing);
        self.current = landing;
        self.graph.bind_label(
            target.id,
            LabelBinding {
                state: landing,
                variable: Some(result.clone()),
            },
        )?;
        Ok(Expr::var(&result))
    }

    fn visit_condition(
        &mut self,
        test: &Expr,
        if_true: &Expr,
        if_false: Option<&Expr>,
    ) -> LowerResult<Expr> {
        let test = self.visit(test)?;
        let branches_suspend =
            requires_lowering(if_true) || if_false.map_or(false, requires_lowering);
        if !branches_suspend {
            return Ok(Expr::Condition {
                test: Box::new(test),
                if_true: Box::new(if_true.clone()),
                if_false: if_false.map(|e| Box::new(e.clone())),
            });
        }

        let result = self.temp("if");
        let from = self.current;
        let on_true = self.new_state();
        let on_false = if_false.map(|_| self.new_state());
        let join = self.new_state();
        if on_false.is_none() {
            self.emit(Expr::assign(&result, Expr::unit()));
        }
        self.graph.set_transition(
            from,
            Transition::Conditional {
                test,
                if_true: on_true,
                if_false: on_false.unwrap_or(join),
            },
        );

        self.current = on_true;
        let value = self.visit(if_true)?;
        self.emit_result(&result, value);
        self.goto(self.current, join);

        if let (Some(state), Some(branch)) = (on_false, if_false) {
            self.current = state;
            let value = self.visit(branch)?;
            self.emit_result(&result, value);
            self.goto(self.current, join);
        }

        self.current = join;
        Ok(Expr::var(&result))
    }

    fn visit_switch(
        &mut self,
        value: &Expr,
        cases: &[SwitchCase],
        default: Option<&Expr>,
    ) -> LowerResult<Expr> {
        for case in cases {
            if let Some(node) = case.test_values.iter().find_map(first_suspend) {
                return Err(LowerError::unsupported("in a switch case test value", node));
            }
        }

        let value = self.visit(value)?;
        let arms_suspend = cases.iter().any(|c| requires_lowering(&c.body))
            || default.map_or(false, requires_lowering);
        if !arms_suspend {
            return Ok(Expr::Switch {
                value: Box::new(value),
                cases: cases.to_vec(),
                default: default.map(|d| Box::new(d.clone())),
            });
        }

        let result = self.temp("switch");
        let from = self.current;
        if default.is_none() {
            self.emit(Expr::assign(&result, Expr::unit()));
        }
        let heads: Vec<StateId> = cases.iter().map(|_| self.new_state()).collect();
        let default_head = default.map(|_| self.new_state());
        let join = self.new_state();

        self.graph.set_transition(
            from,
            Transition::Switch(SwitchTransition {
                value,
                cases: cases
                    .iter()
                    .zip(&heads)
                    .map(|(case, head)| SwitchCaseTransition {
                        test_values: case.test_values.clone(),
                        body: *head,
                    })
                    .collect(),
                default: default_head.unwrap_or(join),
            }),
        );

        for (case, head) in cases.iter().zip(heads) {
            self.current = head;
            let value = self.visit(&case.body)?;
            self.emit_result(&result, value);
            self.goto(self.current, join);
        }
        if let (Some(head), Some(body)) = (default_head, default) {
            self.current = head;
            let value = self.visit(body)?;
            self.emit_result(&result, value);
            self.goto(self.current, join);
        }

        self.current = join;
        Ok(Expr::var(&result))
    }

    fn visit_loop(
        &mut self,
        body: &Expr,
        break_label: Option<&LabelTarget>,
        continue_label: Option<&LabelTarget>,
    ) -> LowerResult<Expr> {
        let result = self.temp("loop");
        self.emit(Expr::assign(&result, Expr::unit()));
        let join = self.new_state();

        self.graph.enter_scope(ScopeKind::Loop);
        let head = self.new_state();
        let entry = self.new_state();
        if let Some(label) = break_label {
            self.graph.bind_label(
                label.id,
                LabelBinding {
                    state: join,
                    variable: Some(result.clone()),
                },
            )?;
        }
        if let Some(label) = continue_label {
            self.graph.bind_label(
                label.id,
                LabelBinding {
                    state: head,
                    variable: None,
                },
            )?;
        }

        self.goto(self.current, head);
        self.graph
            .set_transition(head, Transition::Loop { body: entry });
        self.current = entry;
        let value = self.visit(body)?;
        self.emit(value);
        self.goto(self.current, head);
        self.graph.exit_scope();

        self.current = join;
        Ok(Expr::var(&result))
    }

    fn visit_try(
        &mut self,
        body: &Expr,
        handlers: &[CatchBlock],
        finally: Option<&Expr>,
    ) -> LowerResult<Expr> {
        if !handlers.is_empty() && finally.is_some() {
            let inner = Expr::try_catch(body.clone(), handlers.to_vec());
            return self.visit_try(&inner, &[], finally);
        }

        let result = self.temp("try");
        let try_state = self.temp("try_state");
        let exception = self.temp("exception");
        let from = self.current;
        let join = self.new_state();

        // Protected body: its own region
        let region = self.graph.enter_scope(ScopeKind::TryBody);
        self.graph.set_owner(region, from);
        let body_head = self.new_state();
        self.current = body_head;
        let part = if finally.is_some() {
            TryPart::FinallyBody
        } else {
            TryPart::CatchBody
        };
        self.tries.push(TryContext::new(part, exception.clone()));
        let value = self.visit(body)?;
        self.tries.pop();
        self.emit_result(&result, value);
        self.goto(self.current, join);
        self.graph.exit_scope();

        // Handlers run outside the region
        let mut catches = Vec::with_capacity(handlers.len());
        for (index, handler) in handlers.iter().enumerate() {
            self.graph.enter_scope(ScopeKind::Catch);
            let head = self.new_state();
            self.current = head;
            if let Some(var) = &handler.variable {
                self.graph.declare_variable(var);
                self.emit(Expr::assign(var, Expr::var(&exception)));
            }
            let handler_body = rewrite_rethrow(&handler.body, &exception);
            self.tries
                .push(TryContext::new(TryPart::Handler, exception.clone()));
            let value = self.visit(&handler_body)?;
            self.tries.pop();
            self.emit_result(&result, value);
            self.goto(self.current, join);
            self.graph.exit_scope();

            catches.push(CatchTransition {
                filter: handler.filter.clone(),
                body: head,
                code: index as i64 + 1,
            });
        }

        let finally_head = match finally {
            Some(finally) => {
                self.graph.enter_scope(ScopeKind::Finally);
                let head = self.new_state();
                self.current = head;
                self.tries
                    .push(TryContext::new(TryPart::Finally, exception.clone()));
                let value = self.visit(finally)?;
                self.tries.pop();
                self.emit(value);
                self.graph.set_transition(
                    self.current,
                    Transition::FinallyExit(FinallyExitTransition {
                        region,
                        try_state: try_state.clone(),
                        exception: exception.clone(),
                        join,
                    }),
                );
                self.graph.exit_scope();
                Some(head)
            }
            None => None,
        };

        self.graph.set_transition(
            from,
            Transition::TryCatch(TryTransition {
                region,
                body: body_head,
                try_state,
                exception,
                handlers: catches,
                finally: finally_head,
                join,
            }),
        );
        self.current = join;
        Ok(Expr::var(&result))
    }

    fn visit_await(
        &mut self,
        awaitable: &Expr,
        awaitable_type: &str,
        configure_await: bool,
    ) -> LowerResult<Expr> {
        let binder = self.binders.resolve(awaitable_type)?;
        let operand = self.visit(awaitable)?;
        let awaiter = self.temp("awaiter");
        let result = self.temp("await");
        let completion = self.new_state();
        let next = self.new_state();

        self.graph.set_transition(
            self.current,
            Transition::Await(AwaitTransition {
                awaitable: operand,
                awaiter: awaiter.clone(),
                binder: binder.clone(),
                configure_await,
                completion,
            }),
        );
        self.graph.set_transition(
            completion,
            Transition::AwaitResult(AwaitResultTransition {
                awaiter,
                result: Some(result.clone()),
                binder,
                target: next,
            }),
        );
        self.current = next;
        Ok(Expr::var(&result))
    }

    fn visit_yield_return(&mut self, node: &Expr, value: &Expr) -> LowerResult<Expr> {
        if let Some(context) = self.tries.yield_restriction() {
            return Err(LowerError::unsupported(context, node));
        }
        let value = self.visit(value)?;
        let resume = self.new_state();
        self.graph
            .set_transition(self.current, Transition::YieldReturn { value, resume });
        self.current = resume;
        Ok(Expr::unit())
    }

    fn visit_yield_break(&mut self, node: &Expr) -> LowerResult<Expr> {
        if self.tries.is_in_finally() {
            return Err(LowerError::unsupported("inside a finally body", node));
        }
        let exit = self
            .generator_exit
            .ok_or_else(|| LowerError::unsupported("outside a generator", node))?;
        self.goto(self.current, exit);
        // Anything after `yield break` is unreachable
        self.current = self.new_state();
        Ok(Expr::unit())
    }
}

/// Make operand-less throws in a handler body rethrow the caught exception
/// through its variable. Nested handlers and lambdas keep their own rethrows.
fn rewrite_rethrow(expr: &Expr, exception: &Var) -> Expr {
    match expr {
        Expr::Throw(None) => Expr::throw(Expr::var(exception)),
        Expr::Lambda(_) => expr.clone(),
        Expr::Try {
            body,
            handlers,
            finally,
        } => Expr::Try {
            body: Box::new(rewrite_rethrow(body, exception)),
            handlers: handlers.clone(),
            finally: finally
                .as_ref()
                .map(|f| Box::new(rewrite_rethrow(f, exception))),
        },
        _ => expr.map_children(&mut |child| rewrite_rethrow(child, exception)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{CatchBlock, LabelTarget};

    fn lower(lambda: &LambdaExpr) -> StateGraph {
        lower_lambda(lambda, &BinderRegistry::new()).unwrap()
    }

    fn count(graph: &StateGraph, kind: &str) -> usize {
        graph
            .states
            .iter()
            .filter(|s| s.transition.as_ref().map(|t| t.kind_name()) == Some(kind))
            .count()
    }

    #[test]
    fn test_no_suspend_is_single_state() {
        let lambda = LambdaExpr::sync(
            vec![],
            Expr::seq(vec![Expr::call("f", vec![]), Expr::constant(1i64)]),
        );
        let graph = lower(&lambda);
        assert_eq!(graph.states.len(), 1);
        assert_eq!(count(&graph, "final"), 1);
    }

    #[test]
    fn test_await_splits_state() {
        let lambda = LambdaExpr::asynchronous(
            vec![],
            Expr::seq(vec![
                Expr::call("before", vec![]),
                Expr::await_task(Expr::call("A", vec![])),
                Expr::call("after", vec![]),
            ]),
        );
        let graph = lower(&lambda);
        assert_eq!(count(&graph, "await"), 1);
        assert_eq!(count(&graph, "await-result"), 1);
        assert_eq!(graph.resume_states().len(), 1);
        let entry = graph.state(graph.entry);
        assert_eq!(entry.expressions.len(), 1);
    }

    #[test]
    fn test_operands_before_suspend_are_spilled() {
        let lambda = LambdaExpr::asynchronous(
            vec![],
            Expr::call(
                "f",
                vec![
                    Expr::call("g", vec![]),
                    Expr::await_task(Expr::call("A", vec![])),
                ],
            ),
        );
        let graph = lower(&lambda);
        let entry = graph.state(graph.entry);
        assert_eq!(entry.expressions.len(), 1);
        assert!(entry.expressions[0].to_string().starts_with("$spill"));
    }

    #[test]
    fn test_loop_targets_bound_before_body() {
        let brk = LabelTarget::named(0, "brk");
        let cont = LabelTarget::named(1, "cont");
        let lambda = LambdaExpr::asynchronous(
            vec![],
            Expr::loop_with(
                Expr::seq(vec![
                    Expr::await_task(Expr::call("tick", vec![])),
                    Expr::if_then(Expr::call("done", vec![]), Expr::break_to(&brk)),
                    Expr::continue_to(&cont),
                ]),
                Some(brk.clone()),
                Some(cont.clone()),
            ),
        );
        let graph = lower(&lambda);
        let head = graph.labels[&cont.id].state;
        assert!(matches!(
            graph.state(head).transition,
            Some(Transition::Loop { .. })
        ));
        assert!(graph.labels[&brk.id].variable.is_some());
    }

    #[test]
    fn test_try_catch_finally_is_nested() {
        let e = Var::new(0, "e");
        let lambda = LambdaExpr::asynchronous(
            vec![],
            Expr::try_catch_finally(
                Expr::await_task(Expr::call("A", vec![])),
                vec![CatchBlock::any(Some(e), Expr::constant(0i64))],
                Expr::call("cleanup", vec![]),
            ),
        );
        let graph = lower(&lambda);
        assert_eq!(count(&graph, "try"), 2);
        assert_eq!(count(&graph, "finally-exit"), 1);
        assert_eq!(graph.regions().len(), 3);
    }

    #[test]
    fn test_yield_in_catch_body_is_rejected() {
        let lambda = LambdaExpr::generator(
            vec![],
            Expr::try_catch(
                Expr::yield_return(Expr::constant(1i64)),
                vec![CatchBlock::any(None, Expr::unit())],
            ),
        );
        let err = lower_lambda(&lambda, &BinderRegistry::new()).unwrap_err();
        assert!(matches!(
            err,
            LowerError::UnsupportedSuspend {
                context: "inside the body of a try with catch handlers",
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_awaitable_type() {
        let lambda = LambdaExpr::asynchronous(
            vec![],
            Expr::await_of(Expr::call("A", vec![]), "Stream"),
        );
        assert_eq!(
            lower_lambda(&lambda, &BinderRegistry::new()).unwrap_err(),
            LowerError::NotAwaitable {
                type_name: "Stream".into()
            }
        );
    }

    #[test]
    fn test_switch_test_value_cannot_suspend() {
        let lambda = LambdaExpr::asynchronous(
            vec![],
            Expr::switch(
                Expr::constant(1i64),
                vec![SwitchCase::new(
                    vec![Expr::await_task(Expr::call("A", vec![]))],
                    Expr::unit(),
                )],
                None,
            ),
        );
        assert!(matches!(
            lower_lambda(&lambda, &BinderRegistry::new()),
            Err(LowerError::UnsupportedSuspend {
                context: "in a switch case test value",
                ..
            })
        ));
    }

    #[test]
    fn test_rewrite_rethrow_skips_nested_handlers() {
        let ex = Var::new(9, "ex");
        let expr = Expr::seq(vec![
            Expr::rethrow(),
            Expr::try_catch(Expr::unit(), vec![CatchBlock::any(None, Expr::rethrow())]),
        ]);
        let rewritten = rewrite_rethrow(&expr, &ex);
        assert_eq!(
            rewritten.to_string(),
            "{ throw ex; try () catch (*) rethrow }"
        );
    }
}
