//! Single-line rendering of expressions, used by the pretty printers and
//! in diagnostics.

use std::fmt;

use super::{CatchFilter, Expr, GotoKind, UnaryOp, Var};
use crate::vm::Value;

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[Expr], separator: &str) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, "{}", separator)?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Constant(Value::Str(s)) => write!(f, "{:?}", s.as_ref()),
            Expr::Constant(value) => write!(f, "{}", value),
            Expr::Variable(var) => write!(f, "{}", var),
            Expr::Assign { target, value } => write!(f, "{} = {}", target, value),
            Expr::Binary { op, left, right } => {
                write!(f, "({} {} {})", left, op.symbol(), right)
            }
            Expr::Unary { op, operand } => match op {
                UnaryOp::Not => write!(f, "!{}", operand),
                UnaryOp::Negate => write!(f, "-{}", operand),
            },
            Expr::Call { function, args } => {
                write!(f, "{}(", function)?;
                write_list(f, args, ", ")?;
                write!(f, ")")
            }
            Expr::Invoke { target, args } => {
                write!(f, "({})(", target)?;
                write_list(f, args, ", ")?;
                write!(f, ")")
            }
            Expr::Lambda(lambda) => {
                write!(f, "|")?;
                for (i, param) in lambda.params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", param)?;
                }
                write!(f, "| {}", lambda.body)
            }
            Expr::Block { variables, body } => {
                write!(f, "{{ ")?;
                if !variables.is_empty() {
                    write!(f, "var ")?;
                    for (i, var) in variables.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{}", var)?;
                    }
                    write!(f, "; ")?;
                }
                write_list(f, body, "; ")?;
                write!(f, " }}")
            }
            Expr::Condition {
                test,
                if_true,
                if_false,
            } => {
                write!(f, "if ({}) {}", test, if_true)?;
                if let Some(if_false) = if_false {
                    write!(f, " else {}", if_false)?;
                }
                Ok(())
            }
            Expr::Switch {
                value,
                cases,
                default,
            } => {
                write!(f, "switch ({}) {{ ", value)?;
                for case in cases {
                    write!(f, "case ")?;
                    write_list(f, &case.test_values, ", ")?;
                    write!(f, ": {}; ", case.body)?;
                }
                if let Some(default) = default {
                    write!(f, "default: {}; ", default)?;
                }
                write!(f, "}}")
            }
            Expr::Loop { body, .. } => write!(f, "loop {}", body),
            Expr::Goto {
                kind,
                target,
                value,
            } => {
                let keyword = match kind {
                    GotoKind::Goto => "goto",
                    GotoKind::Break => "break",
                    GotoKind::Continue => "continue",
                    GotoKind::Return => "return",
                };
                write!(f, "{} {}", keyword, target)?;
                if let Some(value) = value {
                    write!(f, " {}", value)?;
                }
                Ok(())
            }
            Expr::Label { target, default } => {
                write!(f, "{}:", target)?;
                if let Some(default) = default {
                    write!(f, " {}", default)?;
                }
                Ok(())
            }
            Expr::Try {
                body,
                handlers,
                finally,
            } => {
                write!(f, "try {}", body)?;
                for handler in handlers {
                    write!(f, " catch (")?;
                    match &handler.filter {
                        CatchFilter::Any => write!(f, "*")?,
                        CatchFilter::Kind(kind) => write!(f, "{}", kind)?,
                    }
                    if let Some(var) = &handler.variable {
                        write!(f, " {}", var)?;
                    }
                    write!(f, ") {}", handler.body)?;
                }
                if let Some(finally) = finally {
                    write!(f, " finally {}", finally)?;
                }
                Ok(())
            }
            Expr::Throw(Some(value)) => write!(f, "throw {}", value),
            Expr::Throw(None) => write!(f, "rethrow"),
            Expr::Await { awaitable, .. } => write!(f, "await {}", awaitable),
            Expr::YieldReturn(value) => write!(f, "yield return {}", value),
            Expr::YieldBreak => write!(f, "yield break"),
        }
    }
}
