//! Runtime values
//!
//! `Value` is what expressions evaluate to and what durable host fields hold.
//! Exceptions are reference counted so a rethrow hands the handler's caller
//! the very same allocation that was thrown.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::interpreter::reduced::LambdaTemplate;
use super::scope::ScopeChain;
use super::task::TaskHandle;
use crate::defaults::TYPE_ERROR;

/// A thrown exception
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exception {
    /// Kind, matched by catch filters
    pub kind: String,
    /// Human-readable message
    pub message: String,
}

/// Shared exception reference; identity survives rethrow and suspension
pub type ExceptionRef = Arc<Exception>;

impl Exception {
    /// Create an exception
    #[allow(clippy::new_ret_no_self)]
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> ExceptionRef {
        Arc::new(Exception {
            kind: kind.into(),
            message: message.into(),
        })
    }

    /// Create a `TypeError`
    pub fn type_error(message: impl Into<String>) -> ExceptionRef {
        Self::new(TYPE_ERROR, message)
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// A closure produced by evaluating a nested lambda
pub struct Closure {
    /// Reduced body and parameters
    pub template: Arc<LambdaTemplate>,
    /// Scope chain captured at creation
    pub captured: ScopeChain,
}

impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Closure")
            .field("name", &self.template.name)
            .field("params", &self.template.params.len())
            .finish()
    }
}

/// Runtime value
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// No value
    #[default]
    Unit,
    /// Boolean
    Bool(bool),
    /// Integer
    Int(i64),
    /// Float
    Float(f64),
    /// String
    Str(Arc<str>),
    /// Exception object
    Exception(ExceptionRef),
    /// Awaitable task
    #[serde(skip)]
    Task(TaskHandle),
    /// Closure
    #[serde(skip)]
    Closure(Arc<Closure>),
}

impl Value {
    /// Truthiness used by conditionals and logical operators
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Unit => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Exception(_) | Value::Task(_) | Value::Closure(_) => true,
        }
    }

    /// Type name used in diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Unit => "unit",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Exception(_) => "exception",
            Value::Task(_) => "task",
            Value::Closure(_) => "closure",
        }
    }

    /// Integer payload
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Exception payload
    pub fn as_exception(&self) -> Option<&ExceptionRef> {
        match self {
            Value::Exception(e) => Some(e),
            _ => None,
        }
    }

    /// Task payload
    pub fn as_task(&self) -> Option<&TaskHandle> {
        match self {
            Value::Task(t) => Some(t),
            _ => None,
        }
    }

    /// Convert a thrown value into an exception, keeping identity for exception values
    pub fn into_exception(self) -> ExceptionRef {
        match self {
            Value::Exception(e) => e,
            other => Exception::new("Error", other.to_string()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Unit, Value::Unit) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => *a as f64 == *b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Exception(a), Value::Exception(b)) => Arc::ptr_eq(a, b),
            (Value::Task(a), Value::Task(b)) => a.ptr_eq(b),
            (Value::Closure(a), Value::Closure(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unit => write!(f, "()"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => write!(f, "{}", s),
            Value::Exception(e) => write!(f, "{}", e),
            Value::Task(t) => write!(f, "<task #{}>", t.id()),
            Value::Closure(c) => write!(f, "<closure {}>", c.template.name),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl From<TaskHandle> for Value {
    fn from(t: TaskHandle) -> Self {
        Value::Task(t)
    }
}

impl From<ExceptionRef> for Value {
    fn from(e: ExceptionRef) -> Self {
        Value::Exception(e)
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Unit
    }
}
