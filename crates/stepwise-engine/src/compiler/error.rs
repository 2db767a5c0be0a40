//! Construction errors
//!
//! Everything that can go wrong while analyzing, lowering, reducing or
//! assembling a tree. These are raised before any code runs.

/// Lowering error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LowerError {
    /// A goto names a label that no reachable scope defines
    #[error("goto targets label `{label}` which is not defined in a reachable scope")]
    UnresolvedLabel {
        /// Label name
        label: String,
    },

    /// Two label nodes define the same label
    #[error("label `{label}` is defined more than once")]
    DuplicateLabel {
        /// Label name
        label: String,
    },

    /// A suspend point appears where lowering cannot split the tree
    #[error("suspend point `{node}` is not supported {context}")]
    UnsupportedSuspend {
        /// Where the suspend point was found
        context: &'static str,
        /// The offending node
        node: String,
    },

    /// No await binder is registered for an awaitable type
    #[error("type `{type_name}` is not awaitable: no await binder is registered")]
    NotAwaitable {
        /// Awaitable type descriptor
        type_name: String,
    },

    /// A variable is used without a declaration in scope
    #[error("variable `{name}` is referenced but never declared")]
    UnboundVariable {
        /// Variable name
        name: String,
    },

    /// `throw` without an operand outside any catch handler
    #[error("rethrow is only valid inside a catch handler")]
    RethrowOutsideCatch,

    /// A jump enters a try region from outside it
    #[error("jump to `{label}` enters a try region from outside")]
    JumpIntoTry {
        /// Label name
        label: String,
    },

    /// A jump lands in the middle of an expression
    #[error("jump to `{label}` enters the middle of an expression")]
    JumpIntoExpression {
        /// Label name
        label: String,
    },

    /// A transition references a state missing from the graph
    #[error("transition of {from} references {to} which is not in the graph")]
    DanglingTarget {
        /// Source state
        from: String,
        /// Missing target
        to: String,
    },

    /// Child-traversal bookkeeping asked for a child that does not exist
    #[error("no child at index {index} of {node}")]
    ChildIndex {
        /// Parent node
        node: String,
        /// Requested index
        index: usize,
    },
}

/// Lowering result
pub type LowerResult<T> = Result<T, LowerError>;

impl LowerError {
    /// Build an `UnsupportedSuspend` for a node
    pub fn unsupported(context: &'static str, node: &crate::tree::Expr) -> Self {
        LowerError::UnsupportedSuspend {
            context,
            node: node.describe(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::Expr;

    #[test]
    fn test_error_messages_name_the_node() {
        let node = Expr::yield_return(Expr::constant(1i64));
        let err = LowerError::unsupported("inside a nested lambda body", &node);
        assert_eq!(
            err.to_string(),
            "suspend point `yield return 1` is not supported inside a nested lambda body"
        );
        assert_eq!(
            LowerError::NotAwaitable {
                type_name: "Stream".into()
            }
            .to_string(),
            "type `Stream` is not awaitable: no await binder is registered"
        );
    }
}
