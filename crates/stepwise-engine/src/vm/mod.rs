//! Stepwise VM - runs lowered and interpreted machines
//!
//! Two ways to run a lambda share one protocol (`Resumable`):
//! - `CompiledMachine` executes the linear form produced by the compiler
//! - `InterpretedMachine` walks the reduced tree with an explicit frame stack

pub mod error;
pub mod execution;
pub mod executor;
pub mod functions;
pub mod host;
pub mod interpreter;
pub mod machine;
pub mod scope;
pub mod task;
pub mod value;

pub use error::{VmError, VmResult};
pub use execution::{GeneratorIter, MachineStatus, Resumable};
pub use executor::Executor;
pub use functions::{FunctionTable, HostFunction};
pub use host::{MachineHost, Suspension};
pub use interpreter::{InterpretedMachine, Interpreter, PreparedLambda};
pub use machine::CompiledMachine;
pub use scope::{Forker, Scope, ScopeChain};
pub use task::{Continuation, TaskHandle, TaskOutcome};
pub use value::{Closure, Exception, ExceptionRef, Value};
