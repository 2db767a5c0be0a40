//! Control Flow Lowering Utilities
//!
//! Helper structures for tracking the try constructs enclosing the node being
//! lowered.

use crate::tree::Var;

/// Which part of a try construct is being lowered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryPart {
    /// Protected body of a try with catch handlers
    CatchBody,
    /// Protected body of a try/finally
    FinallyBody,
    /// A catch handler
    Handler,
    /// A finally body
    Finally,
}

/// Context for one enclosing try construct
#[derive(Debug, Clone)]
pub struct TryContext {
    /// Part being lowered
    pub part: TryPart,
    /// Variable holding the caught or pending exception
    pub exception: Var,
}

impl TryContext {
    /// Create a try context
    pub fn new(part: TryPart, exception: Var) -> Self {
        Self { part, exception }
    }
}

/// Stack of enclosing try contexts
#[derive(Debug, Default)]
pub struct TryStack {
    stack: Vec<TryContext>,
}

impl TryStack {
    /// Create a new empty try stack
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a try context
    pub fn push(&mut self, ctx: TryContext) {
        self.stack.push(ctx);
    }

    /// Pop the current try context
    pub fn pop(&mut self) -> Option<TryContext> {
        self.stack.pop()
    }

    /// Get the current (innermost) try context
    pub fn current(&self) -> Option<&TryContext> {
        self.stack.last()
    }

    /// Check if we're inside any try construct
    pub fn is_in_try(&self) -> bool {
        !self.stack.is_empty()
    }

    /// Whether any enclosing context is a finally body
    pub fn is_in_finally(&self) -> bool {
        self.stack.iter().any(|ctx| ctx.part == TryPart::Finally)
    }

    /// Why a yield cannot appear here, if it cannot
    pub fn yield_restriction(&self) -> Option<&'static str> {
        self.stack.iter().rev().find_map(|ctx| match ctx.part {
            TryPart::CatchBody => Some("inside the body of a try with catch handlers"),
            TryPart::Handler => Some("inside a catch handler"),
            TryPart::Finally => Some("inside a finally body"),
            TryPart::FinallyBody => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_stack() {
        let mut stack = TryStack::new();
        assert!(!stack.is_in_try());
        stack.push(TryContext::new(TryPart::FinallyBody, Var::new(0, "ex")));
        assert!(stack.yield_restriction().is_none());
        stack.push(TryContext::new(TryPart::Handler, Var::new(1, "ex2")));
        assert_eq!(stack.yield_restriction(), Some("inside a catch handler"));
        assert_eq!(stack.current().unwrap().exception.name, "ex2");
        stack.pop();
        assert!(stack.yield_restriction().is_none());
    }
}
