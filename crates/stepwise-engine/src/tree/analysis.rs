//! Pre-lowering analysis
//!
//! Answers the questions lowering asks about a subtree (does it contain a
//! suspend point?) and runs the construction checks that must hold before a
//! lambda is lowered or interpreted:
//!
//! - every variable reference resolves to a parameter, block variable or
//!   catch variable in scope (free-variable analysis; references that cross
//!   into a nested lambda are recorded as captures)
//! - suspend points match the lambda kind and never sit behind a nested
//!   lambda boundary
//! - every goto names a label defined in the same lambda, and no label is
//!   defined twice
//! - rethrow only appears inside a catch handler

use rustc_hash::FxHashSet;

use super::{Expr, LabelId, LabelTarget, LambdaExpr, LambdaKind, Var, VarId};
use crate::compiler::error::{LowerError, LowerResult};

/// Whether `expr` contains an await or yield, not counting nested lambdas
pub fn requires_lowering(expr: &Expr) -> bool {
    match expr {
        Expr::Await { .. } | Expr::YieldReturn(_) | Expr::YieldBreak => true,
        Expr::Lambda(_) => false,
        _ => expr.children().into_iter().any(requires_lowering),
    }
}

/// First suspend point in evaluation order, not counting nested lambdas
pub fn first_suspend(expr: &Expr) -> Option<&Expr> {
    match expr {
        Expr::Await { .. } | Expr::YieldReturn(_) | Expr::YieldBreak => Some(expr),
        Expr::Lambda(_) => None,
        _ => expr.children().into_iter().find_map(first_suspend),
    }
}

/// Number of suspend points, not counting nested lambdas
pub fn count_suspend_points(expr: &Expr) -> usize {
    match expr {
        Expr::Await { awaitable, .. } => 1 + count_suspend_points(awaitable),
        Expr::YieldReturn(value) => 1 + count_suspend_points(value),
        Expr::YieldBreak => 1,
        Expr::Lambda(_) => 0,
        _ => expr.children().into_iter().map(count_suspend_points).sum(),
    }
}

/// Labels defined inside `expr` (label nodes and loop labels), nested lambdas excluded
pub fn defined_labels(expr: &Expr) -> FxHashSet<LabelId> {
    fn collect(expr: &Expr, out: &mut FxHashSet<LabelId>) {
        match expr {
            Expr::Lambda(_) => return,
            Expr::Label { target, .. } => {
                out.insert(target.id);
            }
            Expr::Loop {
                break_label,
                continue_label,
                ..
            } => {
                out.extend(break_label.iter().map(|l| l.id));
                out.extend(continue_label.iter().map(|l| l.id));
            }
            _ => {}
        }
        for child in expr.children() {
            collect(child, out);
        }
    }
    let mut out = FxHashSet::default();
    collect(expr, &mut out);
    out
}

/// Goto targets inside `expr` that `expr` does not itself define
pub fn escaping_gotos(expr: &Expr) -> Vec<LabelTarget> {
    fn collect(expr: &Expr, out: &mut Vec<LabelTarget>) {
        match expr {
            Expr::Lambda(_) => return,
            Expr::Goto { target, .. } => {
                if !out.contains(target) {
                    out.push(target.clone());
                }
            }
            _ => {}
        }
        for child in expr.children() {
            collect(child, out);
        }
    }
    let defined = defined_labels(expr);
    let mut out = Vec::new();
    collect(expr, &mut out);
    out.retain(|target| !defined.contains(&target.id));
    out
}

/// Facts gathered about a lambda by `analyze_lambda`
#[derive(Debug, Clone, Default)]
pub struct LambdaInfo {
    /// Number of await/yield points in the lambda's own body
    pub suspend_points: usize,
    /// Largest variable id used anywhere in the tree
    pub max_var_id: u32,
    /// Largest label id used anywhere in the tree
    pub max_label_id: u32,
    /// Variables referenced from a nested lambda but declared outside it
    pub captured: Vec<Var>,
}

/// Run the construction checks on a lambda
pub fn analyze_lambda(lambda: &LambdaExpr) -> LowerResult<LambdaInfo> {
    let mut checker = Checker {
        root_kind: lambda.kind,
        scopes: Vec::new(),
        lambda_floors: Vec::new(),
        handler_depth: 0,
        labels: Vec::new(),
        captured: FxHashSet::default(),
        info: LambdaInfo::default(),
    };
    checker.check_lambda(lambda)?;
    Ok(checker.info)
}

struct LabelScope {
    defined: FxHashSet<LabelId>,
    targeted: Vec<LabelTarget>,
}

struct Checker {
    root_kind: LambdaKind,
    /// Declared variables, innermost last
    scopes: Vec<FxHashSet<VarId>>,
    /// Index into `scopes` where each open lambda starts
    lambda_floors: Vec<usize>,
    handler_depth: usize,
    labels: Vec<LabelScope>,
    captured: FxHashSet<VarId>,
    info: LambdaInfo,
}

impl Checker {
    fn check_lambda(&mut self, lambda: &LambdaExpr) -> LowerResult<()> {
        let saved_handlers = std::mem::replace(&mut self.handler_depth, 0);
        self.lambda_floors.push(self.scopes.len());
        self.labels.push(LabelScope {
            defined: FxHashSet::default(),
            targeted: Vec::new(),
        });
        self.declare(&lambda.params);

        self.check(&lambda.body)?;

        self.scopes.pop();
        self.lambda_floors.pop();
        self.handler_depth = saved_handlers;

        let labels = self.labels.pop().unwrap_or(LabelScope {
            defined: FxHashSet::default(),
            targeted: Vec::new(),
        });
        if let Some(missing) = labels
            .targeted
            .iter()
            .find(|target| !labels.defined.contains(&target.id))
        {
            return Err(LowerError::UnresolvedLabel {
                label: missing.to_string(),
            });
        }
        Ok(())
    }

    fn declare(&mut self, vars: &[Var]) {
        for var in vars {
            self.info.max_var_id = self.info.max_var_id.max(var.id.0);
        }
        self.scopes.push(vars.iter().map(|v| v.id).collect());
    }

    fn is_nested(&self) -> bool {
        self.lambda_floors.len() > 1
    }

    fn reference(&mut self, var: &Var) -> LowerResult<()> {
        self.info.max_var_id = self.info.max_var_id.max(var.id.0);
        let floor = self.lambda_floors.last().copied().unwrap_or(0);
        let position = self
            .scopes
            .iter()
            .rposition(|scope| scope.contains(&var.id))
            .ok_or_else(|| LowerError::UnboundVariable {
                name: var.name.clone(),
            })?;
        if position < floor && self.captured.insert(var.id) {
            self.info.captured.push(var.clone());
        }
        Ok(())
    }

    fn define_label(&mut self, target: &LabelTarget) -> LowerResult<()> {
        self.info.max_label_id = self.info.max_label_id.max(target.id.0);
        if let Some(scope) = self.labels.last_mut() {
            if !scope.defined.insert(target.id) {
                return Err(LowerError::DuplicateLabel {
                    label: target.to_string(),
                });
            }
        }
        Ok(())
    }

    fn check_suspend(&mut self, expr: &Expr) -> LowerResult<()> {
        if self.is_nested() {
            return Err(LowerError::unsupported("inside a nested lambda body", expr));
        }
        let allowed = match expr {
            Expr::Await { .. } => self.root_kind == LambdaKind::Async,
            _ => self.root_kind == LambdaKind::Generator,
        };
        if !allowed {
            let context = match self.root_kind {
                LambdaKind::Sync => "in a synchronous lambda",
                LambdaKind::Async => "in an async lambda",
                LambdaKind::Generator => "in a generator",
            };
            return Err(LowerError::unsupported(context, expr));
        }
        self.info.suspend_points += 1;
        Ok(())
    }

    fn check(&mut self, expr: &Expr) -> LowerResult<()> {
        match expr {
            Expr::Variable(var) => self.reference(var),
            Expr::Assign { target, value } => {
                self.reference(target)?;
                self.check(value)
            }
            Expr::Block { variables, body } => {
                self.declare(variables);
                for child in body {
                    self.check(child)?;
                }
                self.scopes.pop();
                Ok(())
            }
            Expr::Lambda(lambda) => {
                if lambda.kind != LambdaKind::Sync {
                    return Err(LowerError::unsupported(
                        "as a nested async or generator lambda",
                        expr,
                    ));
                }
                if let Some(node) = first_suspend(&lambda.body) {
                    return Err(LowerError::unsupported("inside a nested lambda body", node));
                }
                self.check_lambda(lambda)
            }
            Expr::Loop {
                body,
                break_label,
                continue_label,
            } => {
                if let Some(label) = break_label {
                    self.define_label(label)?;
                }
                if let Some(label) = continue_label {
                    self.define_label(label)?;
                }
                self.check(body)
            }
            Expr::Label { target, default } => {
                self.define_label(target)?;
                match default {
                    Some(default) => self.check(default),
                    None => Ok(()),
                }
            }
            Expr::Goto { target, value, .. } => {
                self.info.max_label_id = self.info.max_label_id.max(target.id.0);
                if let Some(scope) = self.labels.last_mut() {
                    scope.targeted.push(target.clone());
                }
                match value {
                    Some(value) => self.check(value),
                    None => Ok(()),
                }
            }
            Expr::Try {
                body,
                handlers,
                finally,
            } => {
                self.check(body)?;
                for handler in handlers {
                    let declared: Vec<Var> = handler.variable.iter().cloned().collect();
                    self.declare(&declared);
                    self.handler_depth += 1;
                    let result = self.check(&handler.body);
                    self.handler_depth -= 1;
                    self.scopes.pop();
                    result?;
                }
                match finally {
                    Some(finally) => self.check(finally),
                    None => Ok(()),
                }
            }
            Expr::Throw(None) => {
                if self.handler_depth == 0 {
                    return Err(LowerError::RethrowOutsideCatch);
                }
                Ok(())
            }
            Expr::Await { awaitable, .. } => {
                self.check_suspend(expr)?;
                self.check(awaitable)
            }
            Expr::YieldReturn(value) => {
                self.check_suspend(expr)?;
                self.check(value)
            }
            Expr::YieldBreak => self.check_suspend(expr),
            _ => {
                for child in expr.children() {
                    self.check(child)?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{CatchBlock, Expr, LambdaExpr, LabelTarget, Var};

    #[test]
    fn test_requires_lowering_ignores_nested_lambdas() {
        let x = Var::new(0, "x");
        let plain = Expr::seq(vec![Expr::call("f", vec![]), Expr::constant(1i64)]);
        assert!(!requires_lowering(&plain));

        let suspending = Expr::seq(vec![Expr::await_task(Expr::call("f", vec![]))]);
        assert!(requires_lowering(&suspending));

        let nested = Expr::lambda(LambdaExpr::sync(vec![x.clone()], Expr::var(&x)));
        assert!(!requires_lowering(&nested));
    }

    #[test]
    fn test_count_suspend_points() {
        let expr = Expr::seq(vec![
            Expr::await_task(Expr::await_task(Expr::call("f", vec![]))),
            Expr::if_then(Expr::constant(true), Expr::await_task(Expr::call("g", vec![]))),
        ]);
        assert_eq!(count_suspend_points(&expr), 3);
    }

    #[test]
    fn test_unbound_variable() {
        let x = Var::new(0, "x");
        let lambda = LambdaExpr::asynchronous(vec![], Expr::var(&x));
        assert_eq!(
            analyze_lambda(&lambda).unwrap_err(),
            LowerError::UnboundVariable { name: "x".into() }
        );
    }

    #[test]
    fn test_captured_variables() {
        let x = Var::new(0, "x");
        let y = Var::new(1, "y");
        let inner = LambdaExpr::sync(vec![y.clone()], Expr::binary(
            crate::tree::BinaryOp::Add,
            Expr::var(&x),
            Expr::var(&y),
        ));
        let lambda = LambdaExpr::sync(
            vec![],
            Expr::block(vec![x.clone()], vec![Expr::lambda(inner)]),
        );
        let info = analyze_lambda(&lambda).unwrap();
        assert_eq!(info.captured, vec![x]);
        assert_eq!(info.max_var_id, 1);
    }

    #[test]
    fn test_suspend_behind_lambda_boundary() {
        let inner = LambdaExpr::sync(vec![], Expr::await_task(Expr::call("f", vec![])));
        let lambda = LambdaExpr::asynchronous(vec![], Expr::lambda(inner));
        assert!(matches!(
            analyze_lambda(&lambda),
            Err(LowerError::UnsupportedSuspend {
                context: "inside a nested lambda body",
                ..
            })
        ));
    }

    #[test]
    fn test_suspend_kind_mismatch() {
        let lambda = LambdaExpr::asynchronous(vec![], Expr::yield_return(Expr::constant(1i64)));
        assert!(matches!(
            analyze_lambda(&lambda),
            Err(LowerError::UnsupportedSuspend {
                context: "in an async lambda",
                ..
            })
        ));
        let lambda = LambdaExpr::generator(vec![], Expr::await_task(Expr::call("f", vec![])));
        assert!(matches!(
            analyze_lambda(&lambda),
            Err(LowerError::UnsupportedSuspend {
                context: "in a generator",
                ..
            })
        ));
    }

    #[test]
    fn test_unresolved_and_duplicate_labels() {
        let l = LabelTarget::named(0, "missing");
        let lambda = LambdaExpr::sync(vec![], Expr::goto(&l));
        assert_eq!(
            analyze_lambda(&lambda).unwrap_err(),
            LowerError::UnresolvedLabel {
                label: "missing".into()
            }
        );

        let l = LabelTarget::named(1, "twice");
        let lambda = LambdaExpr::sync(
            vec![],
            Expr::seq(vec![Expr::label(&l, None), Expr::label(&l, None)]),
        );
        assert_eq!(
            analyze_lambda(&lambda).unwrap_err(),
            LowerError::DuplicateLabel {
                label: "twice".into()
            }
        );
    }

    #[test]
    fn test_rethrow_placement() {
        let lambda = LambdaExpr::sync(vec![], Expr::rethrow());
        assert_eq!(
            analyze_lambda(&lambda).unwrap_err(),
            LowerError::RethrowOutsideCatch
        );

        let lambda = LambdaExpr::sync(
            vec![],
            Expr::try_catch(Expr::unit(), vec![CatchBlock::any(None, Expr::rethrow())]),
        );
        assert!(analyze_lambda(&lambda).is_ok());
    }

    #[test]
    fn test_escaping_gotos() {
        let inner = LabelTarget::new(0);
        let outer = LabelTarget::new(1);
        let expr = Expr::seq(vec![
            Expr::goto(&inner),
            Expr::goto(&outer),
            Expr::label(&inner, None),
        ]);
        assert_eq!(escaping_gotos(&expr), vec![outer]);
    }
}
