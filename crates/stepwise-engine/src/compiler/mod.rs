//! Stepwise Compiler - expression trees to resumable state machines
//!
//! The pipeline is:
//! 1. analysis: construction checks (`tree::analysis`)
//! 2. lowering: tree to state graph (`lower`)
//! 3. optimization: no-op collapse, pruning and layout (`optimize`)
//! 4. assembly: state graph to the linear resumable form (`assemble`)

pub mod assemble;
pub mod binder;
pub mod control_flow;
pub mod error;
pub mod graph;
pub mod linear;
pub mod lower;
pub mod optimize;
pub mod pretty;
pub mod transition;

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

pub use binder::{AwaitBinder, BinderRegistry, ImmediateBinder, TaskBinder};
pub use error::{LowerError, LowerResult};
pub use graph::{ScopeId, ScopeKind, State, StateGraph, StateId};
pub use linear::{LinearBody, LinearInstr, LinearLabel};
pub use optimize::OptimizeStats;
pub use pretty::PrettyPrint;
pub use transition::Transition;

use crate::options::EngineOptions;
use crate::tree::LambdaExpr;
use crate::vm::{CompiledMachine, FunctionTable, Value, VmResult};

/// Main compiler entry point
pub struct Compiler {
    binders: Arc<BinderRegistry>,
    options: EngineOptions,
    cache: DashMap<usize, (Arc<LambdaExpr>, Arc<CompiledLambda>)>,
}

impl Compiler {
    /// Compiler over a binder registry
    pub fn new(binders: Arc<BinderRegistry>) -> Self {
        Self {
            binders,
            options: EngineOptions::default(),
            cache: DashMap::new(),
        }
    }

    /// Replace the options
    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    /// Binder registry used to resolve awaitable types
    pub fn binders(&self) -> &Arc<BinderRegistry> {
        &self.binders
    }

    /// Active options
    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Lower a lambda without optimizing it
    pub fn lower(&self, lambda: &LambdaExpr) -> LowerResult<StateGraph> {
        lower::lower_lambda(lambda, &self.binders)
    }

    /// Lower, optimize and assemble a lambda
    pub fn compile(&self, lambda: &LambdaExpr) -> LowerResult<CompiledLambda> {
        let mut graph = self.lower(lambda)?;
        optimize::optimize(&mut graph, &self.options);
        let body = assemble::assemble(&graph, &self.binders, &self.options)?;
        Ok(CompiledLambda {
            graph,
            body: Arc::new(body),
            step_limit: self.options.step_limit,
        })
    }

    /// Compile and bind arguments in one step; construction errors surface as
    /// `VmError::Lower`
    pub fn instantiate(
        &self,
        lambda: &LambdaExpr,
        args: Vec<Value>,
        functions: Arc<FunctionTable>,
    ) -> VmResult<CompiledMachine> {
        self.compile(lambda)?.instantiate(args, functions)
    }

    /// Compile once per lambda allocation; later calls with the same `Arc` reuse the result
    ///
    /// Concurrent calls for the same lambda wait on one compilation. Cached
    /// lambdas stay alive until `clear_cache` or until the compiler is dropped.
    pub fn compile_cached(&self, lambda: &Arc<LambdaExpr>) -> LowerResult<Arc<CompiledLambda>> {
        if !self.options.cache_lowering {
            return self.compile(lambda).map(Arc::new);
        }
        let key = Arc::as_ptr(lambda) as usize;
        match self.cache.entry(key) {
            Entry::Occupied(entry) => {
                debug!(target: "stepwise::lower", lambda = lambda.display_name(), "lowering cache hit");
                Ok(entry.get().1.clone())
            }
            Entry::Vacant(entry) => {
                let compiled = Arc::new(self.compile(lambda)?);
                // The cached Arc keeps the address from being reused by another lambda
                entry.insert((lambda.clone(), compiled.clone()));
                Ok(compiled)
            }
        }
    }

    /// Number of cached compilations
    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    /// Drop every cached compilation and release the lambdas it pinned
    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new(BinderRegistry::global())
    }
}

/// A compiled lambda: its optimized graph and linear form
#[derive(Debug, Clone)]
pub struct CompiledLambda {
    /// Optimized state graph
    pub graph: StateGraph,
    /// Linear resumable form
    pub body: Arc<LinearBody>,
    /// Instruction limit per resumption
    pub step_limit: Option<u64>,
}

impl CompiledLambda {
    /// Create a runnable machine with bound arguments
    pub fn instantiate(
        &self,
        args: Vec<Value>,
        functions: Arc<FunctionTable>,
    ) -> VmResult<CompiledMachine> {
        CompiledMachine::new(self.body.clone(), args, functions, self.step_limit)
    }

    /// Resume ids the machine can be suspended at
    pub fn resume_points(&self) -> &[i64] {
        &self.body.resume_points
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::Expr;

    #[test]
    fn test_compile_cached_reuses_result() {
        let compiler = Compiler::default();
        let lambda = Arc::new(LambdaExpr::asynchronous(
            vec![],
            Expr::await_task(Expr::call("A", vec![])),
        ));
        let first = compiler.compile_cached(&lambda).unwrap();
        let second = compiler.compile_cached(&lambda).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(compiler.cached_len(), 1);

        let other = Arc::new(LambdaExpr::asynchronous(
            vec![],
            Expr::await_task(Expr::call("A", vec![])),
        ));
        compiler.compile_cached(&other).unwrap();
        assert_eq!(compiler.cached_len(), 2);
    }

    #[test]
    fn test_instantiate_reports_construction_error() {
        let compiler = Compiler::default();
        let lambda = LambdaExpr::sync(vec![], Expr::rethrow());
        let err = compiler
            .instantiate(&lambda, vec![], Arc::new(FunctionTable::new()))
            .unwrap_err();
        assert!(matches!(
            err,
            crate::vm::VmError::Lower(LowerError::RethrowOutsideCatch)
        ));
    }

    #[test]
    fn test_cache_disabled() {
        let compiler = Compiler::default().with_options(EngineOptions {
            cache_lowering: false,
            ..EngineOptions::default()
        });
        let lambda = Arc::new(LambdaExpr::sync(vec![], Expr::constant(1i64)));
        compiler.compile_cached(&lambda).unwrap();
        assert_eq!(compiler.cached_len(), 0);
    }

    #[test]
    fn test_compile_cached_concurrent_callers_share_result() {
        let compiler = Compiler::default();
        let lambda = Arc::new(LambdaExpr::asynchronous(
            vec![],
            Expr::await_task(Expr::call("A", vec![])),
        ));
        let results: Vec<Arc<CompiledLambda>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| compiler.compile_cached(&lambda).unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert!(results.iter().all(|r| Arc::ptr_eq(r, &results[0])));
        assert_eq!(compiler.cached_len(), 1);
    }

    #[test]
    fn test_clear_cache_releases_lambdas() {
        let compiler = Compiler::default();
        let lambda = Arc::new(LambdaExpr::sync(vec![], Expr::constant(1i64)));
        let first = compiler.compile_cached(&lambda).unwrap();
        assert_eq!(Arc::strong_count(&lambda), 2);

        compiler.clear_cache();
        assert_eq!(compiler.cached_len(), 0);
        assert_eq!(Arc::strong_count(&lambda), 1);

        let second = compiler.compile_cached(&lambda).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }
}
