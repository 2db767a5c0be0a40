//! Frame phases
//!
//! Every compound node being evaluated owns a frame whose phase says what
//! the frame does on its next step. Child values are pushed to the shared
//! results stack and popped by the phase that follows the child.

use super::context::PendingTransition;
use crate::vm::value::{ExceptionRef, Value};

/// Block progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockPhase {
    /// Start the child at `index`
    Run,
    /// Child at `index` finished; its value is on the results stack
    HandleChild,
}

/// Conditional progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionPhase {
    /// Evaluate the test
    Test,
    /// Pick a branch from the test value
    HandleTest,
    /// The branch ran; its value completes the node
    Complete,
}

/// Switch progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchPhase {
    /// Evaluate the switch value
    Value,
    /// Evaluate the next test value
    Test,
    /// Compare the test value just produced
    HandleTest,
    /// An arm ran; pop its value
    Complete,
}

/// Loop progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPhase {
    /// Start the next iteration
    Body,
    /// Discard the iteration's value
    HandleBody,
}

/// Try progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryPhase {
    /// Start the protected body
    Body,
    /// Protected body running
    HandleBody,
    /// A handler running
    HandleHandler,
    /// The finally body running; the frame holds what happens afterwards
    HandleFinally,
}

/// Await progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AwaitPhase {
    /// Evaluate the awaitable
    Operand,
    /// Obtain the awaiter and check completion
    Check,
    /// Resumed after suspension
    Resume,
}

/// Yield progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YieldPhase {
    /// Evaluate the yielded value
    Operand,
    /// Publish the value and suspend
    Emit,
    /// Resumed by the next move-next
    Resume,
}

/// Invoke progress after its operands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvokePhase {
    /// Closure body running; its value completes the invoke
    Return,
}

/// `&&` / `||` progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShortCircuitPhase {
    /// Evaluate the left operand
    Left,
    /// Finish early or go on to the right operand
    HandleLeft,
    /// The right operand decides the result
    HandleRight,
}

/// What a finally body resumes once it completes
#[derive(Debug, Clone)]
pub enum Pending {
    /// The try completed normally with a value
    Value(Value),
    /// A goto is leaving the try
    Transition(PendingTransition),
    /// An exception is propagating
    Throw(ExceptionRef),
    /// The generator is ending
    Exit(Value),
}

/// Frame state
#[derive(Debug, Clone)]
pub enum FrameKind {
    /// Evaluate children left to right, then apply the node
    Operands {
        /// Next child slot
        next: usize,
    },
    /// `&&` or `||`
    ShortCircuit(ShortCircuitPhase),
    /// Sequence of children, optionally with its own scope
    Block {
        /// Progress
        phase: BlockPhase,
        /// Current child
        index: usize,
        /// Whether the block pushed a scope for its variables
        scoped: bool,
    },
    /// Conditional
    Condition(ConditionPhase),
    /// Switch over case tests
    Switch {
        /// Progress
        phase: SwitchPhase,
        /// Current case
        case: usize,
        /// Current test within the case
        test: usize,
    },
    /// Loop body repeated until a goto leaves it
    Loop(LoopPhase),
    /// Protected body with handlers and a finally body
    Try {
        /// Progress
        phase: TryPhase,
        /// Handler running, for `HandleHandler`
        handler: usize,
        /// Exception being handled
        exception: Option<ExceptionRef>,
        /// Completion deferred behind the finally body
        pending: Option<Pending>,
    },
    /// Await on a task or value
    Await {
        /// Progress
        phase: AwaitPhase,
        /// Awaiter held across suspension
        awaiter: Option<Value>,
    },
    /// `yield return`
    Yield(YieldPhase),
    /// Closure call waiting for its body
    Invoke(InvokePhase),
}
