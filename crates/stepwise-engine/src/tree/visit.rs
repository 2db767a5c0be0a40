//! Tree traversal
//!
//! A `Visitor` with overridable hooks and `walk_*` functions that perform the
//! default recursion. Nested lambda bodies are reached through
//! `visit_lambda`, so analyses that must stop at lambda boundaries override
//! that one hook.

use super::{Expr, LambdaExpr};

/// Read-only tree visitor
pub trait Visitor {
    /// Visit an expression
    fn visit_expr(&mut self, expr: &Expr) {
        walk_expr(self, expr);
    }

    /// Visit a nested lambda
    fn visit_lambda(&mut self, lambda: &LambdaExpr) {
        walk_lambda(self, lambda);
    }
}

/// Visit every direct child of `expr`
pub fn walk_expr<V: Visitor + ?Sized>(visitor: &mut V, expr: &Expr) {
    match expr {
        Expr::Lambda(lambda) => visitor.visit_lambda(lambda),
        _ => {
            for child in expr.children() {
                visitor.visit_expr(child);
            }
        }
    }
}

/// Visit the body of a lambda
pub fn walk_lambda<V: Visitor + ?Sized>(visitor: &mut V, lambda: &LambdaExpr) {
    visitor.visit_expr(&lambda.body);
}

impl Expr {
    /// Direct children in evaluation order; a nested lambda has none
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Constant(_)
            | Expr::Variable(_)
            | Expr::Lambda(_)
            | Expr::YieldBreak
            | Expr::Throw(None) => Vec::new(),
            Expr::Assign { value, .. } => vec![value.as_ref()],
            Expr::Binary { left, right, .. } => vec![left.as_ref(), right.as_ref()],
            Expr::Unary { operand, .. } => vec![operand.as_ref()],
            Expr::Call { args, .. } => args.iter().collect(),
            Expr::Invoke { target, args } => {
                let mut children = vec![target.as_ref()];
                children.extend(args.iter());
                children
            }
            Expr::Block { body, .. } => body.iter().collect(),
            Expr::Condition {
                test,
                if_true,
                if_false,
            } => {
                let mut children = vec![test.as_ref(), if_true.as_ref()];
                if let Some(if_false) = if_false {
                    children.push(if_false);
                }
                children
            }
            Expr::Switch {
                value,
                cases,
                default,
            } => {
                let mut children = vec![value.as_ref()];
                for case in cases {
                    children.extend(case.test_values.iter());
                    children.push(&case.body);
                }
                if let Some(default) = default {
                    children.push(default);
                }
                children
            }
            Expr::Loop { body, .. } => vec![body.as_ref()],
            Expr::Goto { value, .. } => value.iter().map(|v| v.as_ref()).collect(),
            Expr::Label { default, .. } => default.iter().map(|v| v.as_ref()).collect(),
            Expr::Try {
                body,
                handlers,
                finally,
            } => {
                let mut children = vec![body.as_ref()];
                children.extend(handlers.iter().map(|h| &h.body));
                if let Some(finally) = finally {
                    children.push(finally);
                }
                children
            }
            Expr::Throw(Some(value)) => vec![value.as_ref()],
            Expr::Await { awaitable, .. } => vec![awaitable.as_ref()],
            Expr::YieldReturn(value) => vec![value.as_ref()],
        }
    }

    /// Rebuild the node with every direct child replaced by `f(child)`
    pub fn map_children(&self, f: &mut impl FnMut(&Expr) -> Expr) -> Expr {
        let mut boxed = |e: &Expr| Box::new(f(e));
        match self {
            Expr::Constant(_)
            | Expr::Variable(_)
            | Expr::Lambda(_)
            | Expr::YieldBreak
            | Expr::Throw(None) => self.clone(),
            Expr::Assign { target, value } => Expr::Assign {
                target: target.clone(),
                value: boxed(value),
            },
            Expr::Binary { op, left, right } => Expr::Binary {
                op: *op,
                left: boxed(left),
                right: boxed(right),
            },
            Expr::Unary { op, operand } => Expr::Unary {
                op: *op,
                operand: boxed(operand),
            },
            Expr::Call { function, args } => Expr::Call {
                function: function.clone(),
                args: args.iter().map(|a| *boxed(a)).collect(),
            },
            Expr::Invoke { target, args } => Expr::Invoke {
                target: boxed(target),
                args: args.iter().map(|a| *boxed(a)).collect(),
            },
            Expr::Block { variables, body } => Expr::Block {
                variables: variables.clone(),
                body: body.iter().map(|e| *boxed(e)).collect(),
            },
            Expr::Condition {
                test,
                if_true,
                if_false,
            } => Expr::Condition {
                test: boxed(test),
                if_true: boxed(if_true),
                if_false: if_false.as_ref().map(|e| boxed(e)),
            },
            Expr::Switch {
                value,
                cases,
                default,
            } => Expr::Switch {
                value: boxed(value),
                cases: cases
                    .iter()
                    .map(|c| super::SwitchCase {
                        test_values: c.test_values.iter().map(|t| *boxed(t)).collect(),
                        body: *boxed(&c.body),
                    })
                    .collect(),
                default: default.as_ref().map(|e| boxed(e)),
            },
            Expr::Loop {
                body,
                break_label,
                continue_label,
            } => Expr::Loop {
                body: boxed(body),
                break_label: break_label.clone(),
                continue_label: continue_label.clone(),
            },
            Expr::Goto {
                kind,
                target,
                value,
            } => Expr::Goto {
                kind: *kind,
                target: target.clone(),
                value: value.as_ref().map(|e| boxed(e)),
            },
            Expr::Label { target, default } => Expr::Label {
                target: target.clone(),
                default: default.as_ref().map(|e| boxed(e)),
            },
            Expr::Try {
                body,
                handlers,
                finally,
            } => Expr::Try {
                body: boxed(body),
                handlers: handlers
                    .iter()
                    .map(|h| super::CatchBlock {
                        filter: h.filter.clone(),
                        variable: h.variable.clone(),
                        body: *boxed(&h.body),
                    })
                    .collect(),
                finally: finally.as_ref().map(|e| boxed(e)),
            },
            Expr::Throw(Some(value)) => Expr::Throw(Some(boxed(value))),
            Expr::Await {
                awaitable,
                awaitable_type,
                configure_await,
            } => Expr::Await {
                awaitable: boxed(awaitable),
                awaitable_type: awaitable_type.clone(),
                configure_await: *configure_await,
            },
            Expr::YieldReturn(value) => Expr::YieldReturn(boxed(value)),
        }
    }
}
