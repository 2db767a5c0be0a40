//! Stepwise Engine
//!
//! This crate lowers structured control flow into resumable state machines:
//! - **Tree**: the expression-tree model and its pre-lowering analysis (`tree` module)
//! - **Compiler**: lowering visitor, state graph, optimizer and dispatch assembler (`compiler` module)
//! - **VM**: the linear-form runner, the tree-walking interpreter and the executor (`vm` module)
//!
//! # Example
//!
//! ```rust,ignore
//! use stepwise_engine::{Compiler, Executor, Expr, FunctionTable, LambdaExpr, TaskHandle};
//!
//! let lambda = LambdaExpr::asynchronous(vec![], Expr::await_task(Expr::call("fetch", vec![])));
//!
//! // Lower, optimize and assemble
//! let compiled = Compiler::default().compile(&lambda).unwrap();
//!
//! // Execute
//! let functions = FunctionTable::new().with("fetch", |_| Ok(TaskHandle::ready(42i64).into()));
//! let mut machine = compiled.instantiate(vec![], functions.into()).unwrap();
//! let value = Executor::default().block_on(&mut machine).unwrap();
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![allow(clippy::new_without_default)]
#![allow(clippy::large_enum_variant)]

// ============================================================================
// Core Modules
// ============================================================================

/// Tree module: expression nodes, visitors and analysis
pub mod tree;

/// Compiler module: lowering, optimization and assembly of state graphs
pub mod compiler;

/// VM module: runners for the linear form and the interpreter
pub mod vm;

/// Engine options
pub mod options;

/// Default constants and durable-field sentinels
pub mod defaults;

// ============================================================================
// Re-exports from Tree
// ============================================================================

pub use tree::{
    BinaryOp, CatchBlock, CatchFilter, Expr, GotoKind, LabelId, LabelTarget, LambdaExpr,
    LambdaKind, SwitchCase, UnaryOp, Var, VarId,
};

// ============================================================================
// Re-exports from Compiler
// ============================================================================

pub use compiler::{
    // Binders
    AwaitBinder, BinderRegistry,
    // Pipeline
    CompiledLambda, Compiler,
    // Errors
    LowerError, LowerResult,
    // Graph and linear form
    LinearBody, PrettyPrint, StateGraph, StateId, Transition,
};

// ============================================================================
// Re-exports from VM
// ============================================================================

pub use vm::{
    CompiledMachine, Exception, ExceptionRef, Executor, FunctionTable, GeneratorIter,
    InterpretedMachine, Interpreter, MachineStatus, Resumable, TaskHandle, Value, VmError,
    VmResult,
};

pub use options::EngineOptions;
