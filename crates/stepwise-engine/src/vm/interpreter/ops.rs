//! Operator semantics
//!
//! Operand mismatches throw a `TypeError` exception into the program rather
//! than failing the machine, so user code can catch them.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::tree::{BinaryOp, UnaryOp};
use crate::vm::value::{Exception, ExceptionRef, Value};

/// Arithmetic errors thrown into the program
const ARITHMETIC_ERROR: &str = "ArithmeticError";

fn mismatch(op: BinaryOp, left: &Value, right: &Value) -> ExceptionRef {
    Exception::type_error(format!(
        "operator `{}` cannot be applied to {} and {}",
        op.symbol(),
        left.type_name(),
        right.type_name()
    ))
}

fn as_float(value: &Value) -> Option<f64> {
    match value {
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        _ => None,
    }
}

fn int_arith(op: BinaryOp, a: i64, b: i64) -> Result<Value, ExceptionRef> {
    let result = match op {
        BinaryOp::Add => a.checked_add(b),
        BinaryOp::Subtract => a.checked_sub(b),
        BinaryOp::Multiply => a.checked_mul(b),
        BinaryOp::Divide | BinaryOp::Modulo if b == 0 => {
            return Err(Exception::new(ARITHMETIC_ERROR, "division by zero"));
        }
        BinaryOp::Divide => a.checked_div(b),
        BinaryOp::Modulo => a.checked_rem(b),
        _ => None,
    };
    result
        .map(Value::Int)
        .ok_or_else(|| Exception::new(ARITHMETIC_ERROR, "integer overflow"))
}

fn float_arith(op: BinaryOp, a: f64, b: f64) -> Value {
    Value::Float(match op {
        BinaryOp::Add => a + b,
        BinaryOp::Subtract => a - b,
        BinaryOp::Multiply => a * b,
        BinaryOp::Divide => a / b,
        _ => a % b,
    })
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => as_float(left)?.partial_cmp(&as_float(right)?),
    }
}

/// Apply a binary operator to evaluated operands
pub fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, ExceptionRef> {
    match op {
        BinaryOp::Add => match (left, right) {
            (Value::Str(a), b) => Ok(Value::Str(Arc::from(format!("{}{}", a, b)))),
            (a, Value::Str(b)) => Ok(Value::Str(Arc::from(format!("{}{}", a, b)))),
            _ => arith(op, left, right),
        },
        BinaryOp::Subtract | BinaryOp::Multiply | BinaryOp::Divide | BinaryOp::Modulo => {
            arith(op, left, right)
        }
        BinaryOp::Equal => Ok(Value::Bool(left == right)),
        BinaryOp::NotEqual => Ok(Value::Bool(left != right)),
        BinaryOp::LessThan
        | BinaryOp::LessThanOrEqual
        | BinaryOp::GreaterThan
        | BinaryOp::GreaterThanOrEqual => {
            let ordering = compare(left, right).ok_or_else(|| mismatch(op, left, right))?;
            Ok(Value::Bool(match op {
                BinaryOp::LessThan => ordering == Ordering::Less,
                BinaryOp::LessThanOrEqual => ordering != Ordering::Greater,
                BinaryOp::GreaterThan => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            }))
        }
        BinaryOp::And => match (left, right) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a & b)),
            _ => Ok(Value::Bool(left.is_truthy() & right.is_truthy())),
        },
        BinaryOp::Or => match (left, right) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a | b)),
            _ => Ok(Value::Bool(left.is_truthy() | right.is_truthy())),
        },
        BinaryOp::AndAlso => Ok(Value::Bool(left.is_truthy() && right.is_truthy())),
        BinaryOp::OrElse => Ok(Value::Bool(left.is_truthy() || right.is_truthy())),
    }
}

fn arith(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, ExceptionRef> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => int_arith(op, *a, *b),
        _ => match (as_float(left), as_float(right)) {
            (Some(a), Some(b)) => Ok(float_arith(op, a, b)),
            _ => Err(mismatch(op, left, right)),
        },
    }
}

/// Apply a unary operator
pub fn unary(op: UnaryOp, operand: &Value) -> Result<Value, ExceptionRef> {
    match op {
        UnaryOp::Not => Ok(Value::Bool(!operand.is_truthy())),
        UnaryOp::Negate => match operand {
            Value::Int(i) => i
                .checked_neg()
                .map(Value::Int)
                .ok_or_else(|| Exception::new(ARITHMETIC_ERROR, "integer overflow")),
            Value::Float(f) => Ok(Value::Float(-f)),
            other => Err(Exception::type_error(format!(
                "operator `-` cannot be applied to {}",
                other.type_name()
            ))),
        },
    }
}
