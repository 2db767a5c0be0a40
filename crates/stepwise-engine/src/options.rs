//! Engine options
//!
//! A single serde-deserializable options struct shared by the compiler and
//! both executors. Every field has a default so a partial TOML table works.

use serde::{Deserialize, Serialize};

use crate::defaults::DEFAULT_WORKER_THREADS;

/// Options controlling lowering, assembly and execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    /// Collapse no-op states after lowering.
    pub optimize: bool,

    /// Drop states that no transition, resume point or label can reach.
    pub prune_unreachable: bool,

    /// Omit explicit jumps to the state emitted immediately next.
    pub fallthrough_elision: bool,

    /// Reuse compiled lambdas keyed by lambda identity in `Compiler::compile_cached`.
    pub cache_lowering: bool,

    /// Maximum interpreter steps or linear instructions per resumption.
    pub step_limit: Option<u64>,

    /// Worker threads for `Executor::run_all` (0 = one per CPU).
    pub worker_threads: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            optimize: true,
            prune_unreachable: true,
            fallthrough_elision: true,
            cache_lowering: true,
            step_limit: None,
            worker_threads: DEFAULT_WORKER_THREADS,
        }
    }
}

impl EngineOptions {
    /// Options with every optimization disabled, useful when inspecting raw lowering output.
    pub fn unoptimized() -> Self {
        Self {
            optimize: false,
            prune_unreachable: false,
            fallthrough_elision: false,
            ..Self::default()
        }
    }

    /// Set the step limit.
    pub fn with_step_limit(mut self, limit: u64) -> Self {
        self.step_limit = Some(limit);
        self
    }
}
