//! Await binders
//!
//! An await binder is the capability descriptor for one awaitable type: it
//! turns an awaitable into an awaiter, reports completion, hands out the
//! result and registers continuations. Lowering resolves the binder for every
//! await node once, through a registry that caches resolutions per type name.

use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use super::error::{LowerError, LowerResult};
use crate::defaults::{INVALID_OPERATION, TASK_TYPE, VALUE_TYPE};
use crate::vm::task::Continuation;
use crate::vm::{Exception, ExceptionRef, Value};

/// Awaiter protocol for one awaitable type
pub trait AwaitBinder: Send + Sync + fmt::Debug {
    /// Type name this binder serves
    fn type_name(&self) -> &str;

    /// Obtain an awaiter for `awaitable`
    fn get_awaiter(&self, awaitable: Value, configure_await: bool) -> Result<Value, ExceptionRef>;

    /// Whether the awaiter's result is available
    fn is_completed(&self, awaiter: &Value) -> Result<bool, ExceptionRef>;

    /// Retrieve the result; a faulted awaitable throws its exception
    fn get_result(&self, awaiter: &Value) -> Result<Value, ExceptionRef>;

    /// Run `continuation` once the awaiter completes
    fn on_completed(&self, awaiter: &Value, continuation: Continuation) -> Result<(), ExceptionRef>;
}

/// Builds a binder for a type name the registry has no explicit entry for
pub type BinderFactory = Arc<dyn Fn(&str) -> Option<Arc<dyn AwaitBinder>> + Send + Sync>;

// ============================================================================
// Built-in binders
// ============================================================================

/// Binder for `TaskHandle` values; the awaiter is the task itself
#[derive(Debug, Clone)]
pub struct TaskBinder {
    type_name: String,
}

impl TaskBinder {
    /// Binder serving `type_name`
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
        }
    }

    fn task<'a>(&self, awaiter: &'a Value) -> Result<&'a crate::vm::TaskHandle, ExceptionRef> {
        awaiter.as_task().ok_or_else(|| {
            Exception::type_error(format!(
                "`{}` awaiter must be a task, got {}",
                self.type_name,
                awaiter.type_name()
            ))
        })
    }
}

impl Default for TaskBinder {
    fn default() -> Self {
        Self::new(TASK_TYPE)
    }
}

impl AwaitBinder for TaskBinder {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn get_awaiter(&self, awaitable: Value, _configure_await: bool) -> Result<Value, ExceptionRef> {
        self.task(&awaitable)?;
        Ok(awaitable)
    }

    fn is_completed(&self, awaiter: &Value) -> Result<bool, ExceptionRef> {
        Ok(self.task(awaiter)?.is_completed())
    }

    fn get_result(&self, awaiter: &Value) -> Result<Value, ExceptionRef> {
        match self.task(awaiter)?.outcome() {
            Some(outcome) => outcome,
            None => Err(Exception::new(
                INVALID_OPERATION,
                "result requested before the task completed",
            )),
        }
    }

    fn on_completed(&self, awaiter: &Value, continuation: Continuation) -> Result<(), ExceptionRef> {
        self.task(awaiter)?.on_completed(continuation);
        Ok(())
    }
}

/// Binder for plain values, which are complete the moment they are awaited
#[derive(Debug, Clone, Default)]
pub struct ImmediateBinder;

impl AwaitBinder for ImmediateBinder {
    fn type_name(&self) -> &str {
        VALUE_TYPE
    }

    fn get_awaiter(&self, awaitable: Value, _configure_await: bool) -> Result<Value, ExceptionRef> {
        Ok(awaitable)
    }

    fn is_completed(&self, _awaiter: &Value) -> Result<bool, ExceptionRef> {
        Ok(true)
    }

    fn get_result(&self, awaiter: &Value) -> Result<Value, ExceptionRef> {
        Ok(awaiter.clone())
    }

    fn on_completed(&self, _awaiter: &Value, continuation: Continuation) -> Result<(), ExceptionRef> {
        continuation();
        Ok(())
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Resolves await binders by type name
pub struct BinderRegistry {
    registered: RwLock<FxHashMap<String, Arc<dyn AwaitBinder>>>,
    factories: RwLock<Vec<BinderFactory>>,
    cache: RwLock<FxHashMap<String, Arc<dyn AwaitBinder>>>,
}

static GLOBAL: Lazy<Arc<BinderRegistry>> = Lazy::new(|| Arc::new(BinderRegistry::new()));

impl BinderRegistry {
    /// Registry with the built-in `Task` and `Value` binders, and a factory
    /// serving generic `Task<..>` names with the task binder
    pub fn new() -> Self {
        let registry = Self::empty();
        registry.register(Arc::new(TaskBinder::default()));
        registry.register(Arc::new(ImmediateBinder));
        registry.add_factory(Arc::new(|name: &str| {
            if name.starts_with("Task<") && name.ends_with('>') {
                Some(Arc::new(TaskBinder::new(name)) as Arc<dyn AwaitBinder>)
            } else {
                None
            }
        }));
        registry
    }

    /// Registry with no binders at all
    pub fn empty() -> Self {
        Self {
            registered: RwLock::new(FxHashMap::default()),
            factories: RwLock::new(Vec::new()),
            cache: RwLock::new(FxHashMap::default()),
        }
    }

    /// Shared default registry
    pub fn global() -> Arc<BinderRegistry> {
        GLOBAL.clone()
    }

    /// Register a binder under its type name
    pub fn register(&self, binder: Arc<dyn AwaitBinder>) {
        let name = binder.type_name().to_string();
        self.cache.write().remove(&name);
        self.registered.write().insert(name, binder);
    }

    /// Add a fallback factory consulted for unregistered type names
    pub fn add_factory(&self, factory: BinderFactory) {
        self.factories.write().push(factory);
    }

    /// Resolve the binder for an awaitable type
    pub fn resolve(&self, type_name: &str) -> LowerResult<Arc<dyn AwaitBinder>> {
        if let Some(binder) = self.cache.read().get(type_name) {
            return Ok(binder.clone());
        }

        let binder = match self.registered.read().get(type_name) {
            Some(binder) => Some(binder.clone()),
            None => self
                .factories
                .read()
                .iter()
                .find_map(|factory| factory(type_name)),
        };

        match binder {
            Some(binder) => {
                tracing::trace!(target: "stepwise::lower", type_name, "resolved await binder");
                self.cache
                    .write()
                    .insert(type_name.to_string(), binder.clone());
                Ok(binder)
            }
            None => Err(LowerError::NotAwaitable {
                type_name: type_name.to_string(),
            }),
        }
    }

    /// Number of cached resolutions
    pub fn cached_len(&self) -> usize {
        self.cache.read().len()
    }
}

impl Default for BinderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BinderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<String> = self.registered.read().keys().cloned().collect();
        names.sort();
        f.debug_struct("BinderRegistry")
            .field("registered", &names)
            .field("factories", &self.factories.read().len())
            .field("cached", &self.cached_len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::TaskHandle;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_resolve_builtin_and_cache() {
        let registry = BinderRegistry::new();
        assert_eq!(registry.cached_len(), 0);
        let first = registry.resolve(TASK_TYPE).unwrap();
        let second = registry.resolve(TASK_TYPE).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.cached_len(), 1);
    }

    #[test]
    fn test_factory_fallback() {
        let registry = BinderRegistry::new();
        let binder = registry.resolve("Task<int>").unwrap();
        assert_eq!(binder.type_name(), "Task<int>");
    }

    #[test]
    fn test_not_awaitable() {
        let registry = BinderRegistry::empty();
        assert_eq!(
            registry.resolve("Stream").unwrap_err(),
            LowerError::NotAwaitable {
                type_name: "Stream".into()
            }
        );
    }

    #[test]
    fn test_task_binder_protocol() {
        let binder = TaskBinder::default();
        let task = TaskHandle::pending();
        let awaiter = binder.get_awaiter(task.clone().into(), true).unwrap();
        assert!(!binder.is_completed(&awaiter).unwrap());
        assert_eq!(
            binder.get_result(&awaiter).unwrap_err().kind,
            INVALID_OPERATION
        );

        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        binder
            .on_completed(
                &awaiter,
                Box::new(move || flag.store(true, Ordering::SeqCst)),
            )
            .unwrap();
        task.complete(Value::from(3));
        assert!(fired.load(Ordering::SeqCst));
        assert_eq!(binder.get_result(&awaiter).unwrap(), Value::from(3));
    }

    #[test]
    fn test_task_binder_rejects_non_tasks() {
        let err = TaskBinder::default()
            .get_awaiter(Value::from(1), true)
            .unwrap_err();
        assert_eq!(err.kind, crate::defaults::TYPE_ERROR);
    }

    #[test]
    fn test_faulted_task_rethrows_same_exception() {
        let exception = Exception::new("Boom", "bad");
        let binder = TaskBinder::default();
        let awaiter = Value::from(TaskHandle::faulted(exception.clone()));
        let thrown = binder.get_result(&awaiter).unwrap_err();
        assert!(Arc::ptr_eq(&exception, &thrown));
    }
}
