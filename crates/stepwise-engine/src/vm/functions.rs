//! Host function table
//!
//! `Call` nodes name a function that is looked up here at run time.

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use super::value::{Exception, ExceptionRef, Value};
use crate::defaults::REFERENCE_ERROR;

/// A host function
pub type HostFunction = Arc<dyn Fn(&[Value]) -> Result<Value, ExceptionRef> + Send + Sync>;

/// Functions callable from expression trees, by name
#[derive(Clone, Default)]
pub struct FunctionTable {
    functions: FxHashMap<String, HostFunction>,
}

impl FunctionTable {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a function, replacing any previous one with the same name
    pub fn register<F>(&mut self, name: impl Into<String>, function: F)
    where
        F: Fn(&[Value]) -> Result<Value, ExceptionRef> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(function));
    }

    /// Builder form of `register`
    pub fn with<F>(mut self, name: impl Into<String>, function: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, ExceptionRef> + Send + Sync + 'static,
    {
        self.register(name, function);
        self
    }

    /// Look a function up
    pub fn get(&self, name: &str) -> Option<&HostFunction> {
        self.functions.get(name)
    }

    /// Call a function; an unknown name throws a `ReferenceError`
    pub fn call(&self, name: &str, args: &[Value]) -> Result<Value, ExceptionRef> {
        match self.functions.get(name) {
            Some(function) => function(args),
            None => Err(Exception::new(
                REFERENCE_ERROR,
                format!("function `{}` is not defined", name),
            )),
        }
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for FunctionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionTable")
            .field("functions", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_registered_function() {
        let table = FunctionTable::new().with("add", |args| match args {
            [Value::Int(a), Value::Int(b)] => Ok(Value::Int(a + b)),
            _ => Err(Exception::type_error("add expects two ints")),
        });
        assert_eq!(
            table.call("add", &[Value::from(2), Value::from(3)]).unwrap(),
            Value::from(5)
        );
        assert_eq!(table.names(), vec!["add"]);
    }

    #[test]
    fn test_missing_function_is_reference_error() {
        let err = FunctionTable::new().call("nope", &[]).unwrap_err();
        assert_eq!(err.kind, REFERENCE_ERROR);
        assert!(err.message.contains("nope"));
    }
}
