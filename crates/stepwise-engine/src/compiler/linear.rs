//! Linear resumable form
//!
//! The output of the dispatch assembler: a block per region, each starting
//! with a jump table on the durable state field followed by the rendered
//! states in emission order. Nested regions appear as `TryRegion`
//! instructions inside their parent's block.

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use super::binder::AwaitBinder;
use super::graph::{ScopeId, StateId};
use crate::tree::{CatchFilter, Expr, LabelId, LambdaKind, Var};
use crate::vm::interpreter::reduced::ReducedTree;

/// Jump target in the linear form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinearLabel {
    /// Start of a state
    State(StateId),
    /// Re-entry point of the try region owned by a state
    TryEntry(StateId),
}

impl fmt::Display for LinearLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinearLabel::State(id) => write!(f, "{}", id),
            LinearLabel::TryEntry(id) => write!(f, "TRY_{:04}", id.0),
        }
    }
}

/// An expression prepared for evaluation
#[derive(Debug, Clone)]
pub struct CompiledExpr {
    /// Source expression
    pub source: Expr,
    /// Reduced form run by the evaluator
    pub tree: Arc<ReducedTree>,
}

impl fmt::Display for CompiledExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

/// One jump-table entry
#[derive(Debug, Clone)]
pub struct JumpEntry {
    /// Durable state value
    pub state: i64,
    /// Where to go
    pub label: LinearLabel,
    /// The entry re-enters a nested region; the state value is kept for its table
    pub nested: bool,
}

/// Jump table at the head of a block
#[derive(Debug, Clone, Default)]
pub struct JumpTable {
    /// Entries in ascending state order
    pub entries: Vec<JumpEntry>,
}

impl JumpTable {
    /// Entry for a durable state value
    pub fn lookup(&self, state: i64) -> Option<&JumpEntry> {
        self.entries.iter().find(|e| e.state == state)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// How a region is left when a jump targets a label outside it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionExit {
    /// Value stored in the region's try-state variable
    pub code: i64,
    /// Final destination
    pub label: LinearLabel,
}

/// A protected region
#[derive(Debug, Clone)]
pub struct TryRegion {
    /// State whose transition enters the region
    pub owner: StateId,
    /// Region body
    pub block: LinearBlock,
    /// Try-state variable
    pub try_state: Var,
    /// Variable receiving a caught exception
    pub exception: Var,
    /// Catch filters and the try-state code each one records
    pub handlers: Vec<(CatchFilter, i64)>,
    /// Unmatched exceptions are stored for the finally body instead of propagating
    pub catch_all: bool,
    /// Codes for jumps that leave the region
    pub exits: Vec<RegionExit>,
}

impl TryRegion {
    /// Exit code for a label outside the region
    pub fn exit_code(&self, label: LinearLabel) -> Option<i64> {
        self.exits.iter().find(|e| e.label == label).map(|e| e.code)
    }
}

/// Why a machine returns control to its caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspendKind {
    /// Waiting on an awaiter
    Await,
    /// Produced a generator value
    Yield,
}

/// Linear instruction
#[derive(Debug, Clone)]
pub enum LinearInstr {
    /// Jump target
    Label(LinearLabel),
    /// Evaluate for side effects
    Eval(CompiledExpr),
    /// Evaluate and store
    Assign {
        /// Destination
        target: Var,
        /// Value
        value: CompiledExpr,
    },
    /// Unconditional jump
    Goto(LinearLabel),
    /// Jump when the test is truthy
    GotoIf {
        /// Test
        test: CompiledExpr,
        /// Destination
        target: LinearLabel,
    },
    /// Multi-way jump on the first matching test value
    Switch {
        /// Switch value
        value: CompiledExpr,
        /// Test values and destinations, in order
        cases: Vec<(Vec<CompiledExpr>, LinearLabel)>,
        /// Destination when nothing matches
        default: LinearLabel,
    },
    /// Store a resume id in the durable state field
    SetState(i64),
    /// Obtain an awaiter through a binder
    GetAwaiter {
        /// Awaitable operand
        awaitable: CompiledExpr,
        /// Durable awaiter variable
        awaiter: Var,
        /// Resolved binder
        binder: Arc<dyn AwaitBinder>,
        /// Capture the current context for the continuation
        configure_await: bool,
    },
    /// Jump when the awaiter has completed
    GotoIfCompleted {
        /// Awaiter variable
        awaiter: Var,
        /// Resolved binder
        binder: Arc<dyn AwaitBinder>,
        /// Destination
        target: LinearLabel,
    },
    /// Hand the awaiter to the host for continuation registration
    RegisterContinuation {
        /// Awaiter variable
        awaiter: Var,
        /// Resolved binder
        binder: Arc<dyn AwaitBinder>,
    },
    /// Return control to the caller
    Suspend(SuspendKind),
    /// Retrieve an awaiter's result
    GetResult {
        /// Awaiter variable
        awaiter: Var,
        /// Resolved binder
        binder: Arc<dyn AwaitBinder>,
        /// Destination variable
        target: Option<Var>,
    },
    /// Store the generator's current value and mark success
    SetCurrent(CompiledExpr),
    /// End the generator
    YieldBreak,
    /// Complete the machine
    Return(Option<CompiledExpr>),
    /// Run a protected region
    TryRegion(Box<TryRegion>),
    /// Route on a region's try-state after it was left
    DispatchTryState {
        /// Try-state variable
        try_state: Var,
        /// Stored exception
        exception: Var,
        /// Code to destination
        cases: Vec<(i64, LinearLabel)>,
        /// Rethrow the stored exception when the try-state records an unhandled one
        rethrow_unhandled: bool,
        /// Destination for any other code
        default: LinearLabel,
    },
}

/// A region's emitted body
#[derive(Debug, Clone)]
pub struct LinearBlock {
    /// Region rendered
    pub region: ScopeId,
    /// Leading jump table
    pub table: JumpTable,
    /// Instructions
    pub instrs: Vec<LinearInstr>,
    /// Label positions within `instrs`
    pub positions: FxHashMap<LinearLabel, usize>,
}

impl LinearBlock {
    /// Instruction index of a label local to this block
    pub fn position(&self, label: LinearLabel) -> Option<usize> {
        self.positions.get(&label).copied()
    }
}

/// Label reachable from a goto inside an evaluated expression
#[derive(Debug, Clone)]
pub struct LabelSlot {
    /// Destination
    pub label: LinearLabel,
    /// Variable receiving the goto's value
    pub variable: Option<Var>,
}

/// The linear resumable form of a lambda
#[derive(Debug, Clone)]
pub struct LinearBody {
    /// Lambda display name
    pub name: String,
    /// Lambda kind
    pub kind: LambdaKind,
    /// Parameters
    pub params: Vec<Var>,
    /// Durable variables (hoisted and temporary)
    pub variables: Vec<Var>,
    /// Top block
    pub entry: LinearBlock,
    /// Label bindings for gotos that escape evaluated expressions
    pub labels: FxHashMap<LabelId, LabelSlot>,
    /// Every resume id, ascending
    pub resume_points: Vec<i64>,
}

impl LinearBody {
    /// Total instruction count across nested blocks
    pub fn instruction_count(&self) -> usize {
        fn count(block: &LinearBlock) -> usize {
            block
                .instrs
                .iter()
                .map(|instr| match instr {
                    LinearInstr::TryRegion(region) => 1 + count(&region.block),
                    _ => 1,
                })
                .sum()
        }
        count(&self.entry)
    }
}
