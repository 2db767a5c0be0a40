//! Scope chains
//!
//! A scope is a shared, lockable variable map. Closures capture the chain by
//! reference, so an assignment through a closure is visible to the frame
//! that created it. `fork` produces a chain that shares nothing with the
//! original; a `Forker` extends that to every value of a machine, rebinding
//! closures to the copied scopes.

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use super::value::{Closure, Value};
use crate::tree::{Var, VarId};

/// One level of variable bindings
#[derive(Debug, Default)]
pub struct Scope {
    values: RwLock<FxHashMap<VarId, Value>>,
}

impl Scope {
    /// Empty scope
    pub fn new() -> Self {
        Self::default()
    }

    /// Scope with each variable bound to unit
    pub fn with_vars<'a>(vars: impl IntoIterator<Item = &'a Var>) -> Self {
        let scope = Self::new();
        for var in vars {
            scope.declare(var.id, Value::Unit);
        }
        scope
    }

    /// Bind or rebind a variable in this scope
    pub fn declare(&self, id: VarId, value: Value) {
        self.values.write().insert(id, value);
    }

    /// Read a variable bound in this scope
    pub fn get(&self, id: VarId) -> Option<Value> {
        self.values.read().get(&id).cloned()
    }

    /// Assign a variable bound in this scope; false if it is not bound here
    pub fn set(&self, id: VarId, value: Value) -> bool {
        match self.values.write().get_mut(&id) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Whether the variable is bound in this scope
    pub fn contains(&self, id: VarId) -> bool {
        self.values.read().contains_key(&id)
    }
}

/// Chain of scopes, innermost last
#[derive(Debug, Clone, Default)]
pub struct ScopeChain {
    frames: Vec<Arc<Scope>>,
}

impl ScopeChain {
    /// Empty chain
    pub fn new() -> Self {
        Self::default()
    }

    /// Chain with a single scope
    pub fn from_scope(scope: Arc<Scope>) -> Self {
        Self {
            frames: vec![scope],
        }
    }

    /// Push a scope
    pub fn push(&mut self, scope: Arc<Scope>) {
        self.frames.push(scope);
    }

    /// Pop the innermost scope
    pub fn pop(&mut self) -> Option<Arc<Scope>> {
        self.frames.pop()
    }

    /// Number of scopes
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Drop scopes above `depth`
    pub fn truncate(&mut self, depth: usize) {
        self.frames.truncate(depth);
    }

    /// Innermost scope
    pub fn innermost(&self) -> Option<&Arc<Scope>> {
        self.frames.last()
    }

    /// Look a variable up from the innermost scope outwards
    pub fn lookup(&self, id: VarId) -> Option<Value> {
        self.frames.iter().rev().find_map(|scope| scope.get(id))
    }

    /// Assign the innermost binding of a variable; false if unbound
    pub fn assign(&self, id: VarId, value: Value) -> bool {
        match self.frames.iter().rev().find(|scope| scope.contains(id)) {
            Some(scope) => scope.set(id, value),
            None => false,
        }
    }

    /// Deep copy every scope; scopes shared within the chain stay shared in the copy
    pub fn fork(&self) -> ScopeChain {
        Forker::new().chain(self)
    }
}

/// Deep copier for one fork of a machine
///
/// Each original scope is copied once, so chains, closures and values copied
/// through the same forker keep sharing exactly what the originals shared.
#[derive(Default)]
pub struct Forker {
    scopes: FxHashMap<*const Scope, Arc<Scope>>,
    closures: FxHashMap<*const Closure, Arc<Closure>>,
}

impl Forker {
    /// Fresh forker
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy a chain
    pub fn chain(&mut self, chain: &ScopeChain) -> ScopeChain {
        let frames = chain.frames.iter().map(|scope| self.scope(scope)).collect();
        ScopeChain { frames }
    }

    /// Copy a scope and the values bound in it
    pub fn scope(&mut self, scope: &Arc<Scope>) -> Arc<Scope> {
        if let Some(copy) = self.scopes.get(&Arc::as_ptr(scope)) {
            return copy.clone();
        }
        // Registered before its values are copied: a closure stored in a scope
        // usually captures that same scope.
        let copy = Arc::new(Scope::new());
        self.scopes.insert(Arc::as_ptr(scope), copy.clone());

        let bindings: Vec<(VarId, Value)> = scope
            .values
            .read()
            .iter()
            .map(|(id, value)| (*id, value.clone()))
            .collect();
        let copied: FxHashMap<VarId, Value> = bindings
            .into_iter()
            .map(|(id, value)| (id, self.value(&value)))
            .collect();
        *copy.values.write() = copied;
        copy
    }

    /// Copy a value; closures are rebound to copied scopes
    pub fn value(&mut self, value: &Value) -> Value {
        match value {
            Value::Closure(closure) => Value::Closure(self.closure(closure)),
            other => other.clone(),
        }
    }

    fn closure(&mut self, closure: &Arc<Closure>) -> Arc<Closure> {
        if let Some(copy) = self.closures.get(&Arc::as_ptr(closure)) {
            return copy.clone();
        }
        let copy = Arc::new(Closure {
            template: closure.template.clone(),
            captured: self.chain(&closure.captured),
        });
        self.closures.insert(Arc::as_ptr(closure), copy.clone());
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::binder::BinderRegistry;
    use crate::tree::Expr;
    use crate::vm::interpreter::reduced::{LambdaTemplate, ReducedTree};

    #[test]
    fn test_lookup_and_shadowing() {
        let x = Var::new(0, "x");
        let mut chain = ScopeChain::new();
        chain.push(Arc::new(Scope::with_vars([&x])));
        chain.assign(x.id, Value::from(1));
        let inner = Arc::new(Scope::new());
        inner.declare(x.id, Value::from(2));
        chain.push(inner);
        assert_eq!(chain.lookup(x.id), Some(Value::from(2)));
        chain.pop();
        assert_eq!(chain.lookup(x.id), Some(Value::from(1)));
    }

    #[test]
    fn test_assign_unbound_fails() {
        let chain = ScopeChain::from_scope(Arc::new(Scope::new()));
        assert!(!chain.assign(VarId(9), Value::Unit));
    }

    #[test]
    fn test_fork_is_isolated() {
        let x = Var::new(0, "x");
        let chain = ScopeChain::from_scope(Arc::new(Scope::with_vars([&x])));
        let copy = chain.fork();
        copy.assign(x.id, Value::from(5));
        assert_eq!(chain.lookup(x.id), Some(Value::Unit));
        assert_eq!(copy.lookup(x.id), Some(Value::from(5)));
    }

    #[test]
    fn test_fork_rebinds_closures() {
        let x = Var::new(0, "x");
        let f = Var::new(1, "f");
        let scope = Arc::new(Scope::with_vars([&x, &f]));
        let chain = ScopeChain::from_scope(scope.clone());
        let tree = ReducedTree::build(&Expr::constant(0i64), &BinderRegistry::new(), false)
            .unwrap();
        let template = Arc::new(LambdaTemplate {
            name: "f".to_string(),
            params: Vec::new(),
            tree: Arc::new(tree),
        });
        scope.set(
            f.id,
            Value::Closure(Arc::new(Closure {
                template,
                captured: chain.clone(),
            })),
        );

        let copy = chain.fork();
        let Some(Value::Closure(closure)) = copy.lookup(f.id) else {
            panic!("closure was not copied");
        };
        closure.captured.assign(x.id, Value::from(7));
        assert_eq!(copy.lookup(x.id), Some(Value::from(7)));
        assert_eq!(chain.lookup(x.id), Some(Value::Unit));
    }
}
