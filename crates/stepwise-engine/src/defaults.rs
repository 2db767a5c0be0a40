//! Default constants for engine configuration.
//!
//! Also holds the sentinel values stored in durable host fields, shared by the
//! dispatch assembler (which emits them) and the runners (which test them).

/// State id stored in a fresh machine and reset after every resume dispatch.
pub const STATE_START: i64 = -1;

/// State id stored once a machine has returned, thrown or hit `yield break`.
pub const STATE_DONE: i64 = -2;

/// Try-state value before a region has exited.
pub const TRY_STATE_NONE: i64 = 0;

/// Try-state value recorded when a try/finally region caught an exception
/// that must be rethrown once the finally body has run.
pub const TRY_STATE_UNHANDLED: i64 = -1;

/// Awaitable type name served by the built-in task binder.
pub const TASK_TYPE: &str = "Task";

/// Awaitable type name served by the built-in completed-value binder.
pub const VALUE_TYPE: &str = "Value";

/// Exception kind raised when a host function cannot be found.
pub const REFERENCE_ERROR: &str = "ReferenceError";

/// Exception kind raised for operand type mismatches.
pub const TYPE_ERROR: &str = "TypeError";

/// Exception kind raised for invalid awaiter usage.
pub const INVALID_OPERATION: &str = "InvalidOperation";

/// Default number of worker threads for `Executor::run_all` (0 = one per CPU).
pub const DEFAULT_WORKER_THREADS: usize = 0;
