//! Expression tree model
//!
//! This module defines the structured control-flow trees the engine consumes:
//! - Values, variables and operators
//! - Blocks, conditionals, switches and loops
//! - Labels and gotos (break, continue and return are gotos)
//! - Try/catch/finally and throw
//! - Suspend points: await, yield return and yield break
//!
//! Trees are plain data. Variables and labels are identified by their numeric
//! id; names only matter for diagnostics.

pub mod analysis;
mod display;
pub mod visit;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::defaults::{TASK_TYPE, VALUE_TYPE};
use crate::vm::{Exception, Value};

// ============================================================================
// Variables and labels
// ============================================================================

/// Variable identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VarId(pub u32);

/// A variable reference or declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Var {
    /// Identity of the variable
    pub id: VarId,
    /// Display name
    pub name: String,
}

impl Var {
    /// Create a variable
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Self {
            id: VarId(id),
            name: name.into(),
        }
    }
}

impl PartialEq for Var {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Var {}

impl std::hash::Hash for Var {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Label identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelId(pub u32);

/// A jump target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelTarget {
    /// Identity of the label
    pub id: LabelId,
    /// Optional display name
    #[serde(default)]
    pub name: Option<String>,
}

impl LabelTarget {
    /// Create an anonymous label
    pub fn new(id: u32) -> Self {
        Self {
            id: LabelId(id),
            name: None,
        }
    }

    /// Create a named label
    pub fn named(id: u32, name: impl Into<String>) -> Self {
        Self {
            id: LabelId(id),
            name: Some(name.into()),
        }
    }
}

impl PartialEq for LabelTarget {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for LabelTarget {}

impl fmt::Display for LabelTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}", name),
            None => write!(f, "L{}", self.id.0),
        }
    }
}

// ============================================================================
// Operators
// ============================================================================

/// Binary operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    /// a + b (numbers, or string concatenation)
    Add,
    /// a - b
    Subtract,
    /// a * b
    Multiply,
    /// a / b
    Divide,
    /// a % b
    Modulo,
    /// a == b
    Equal,
    /// a != b
    NotEqual,
    /// a < b
    LessThan,
    /// a <= b
    LessThanOrEqual,
    /// a > b
    GreaterThan,
    /// a >= b
    GreaterThanOrEqual,
    /// a & b (both operands evaluated)
    And,
    /// a | b (both operands evaluated)
    Or,
    /// a && b
    AndAlso,
    /// a || b
    OrElse,
}

impl BinaryOp {
    /// Whether the right operand is only evaluated on demand
    pub fn is_short_circuit(self) -> bool {
        matches!(self, BinaryOp::AndAlso | BinaryOp::OrElse)
    }

    /// Source symbol
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::LessThan => "<",
            BinaryOp::LessThanOrEqual => "<=",
            BinaryOp::GreaterThan => ">",
            BinaryOp::GreaterThanOrEqual => ">=",
            BinaryOp::And => "&",
            BinaryOp::Or => "|",
            BinaryOp::AndAlso => "&&",
            BinaryOp::OrElse => "||",
        }
    }
}

/// Unary operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    /// !x
    Not,
    /// -x
    Negate,
}

/// Flavor of a goto; informational, all kinds jump the same way
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GotoKind {
    /// Plain goto
    #[default]
    Goto,
    /// Jump to a loop's break label
    Break,
    /// Jump to a loop's continue label
    Continue,
    /// Jump to the lambda's return label
    Return,
}

// ============================================================================
// Structured pieces
// ============================================================================

/// One `case` arm of a switch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchCase {
    /// Values compared against the switch value, in order
    pub test_values: Vec<Expr>,
    /// Arm body
    pub body: Expr,
}

/// Which exceptions a catch handler accepts
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatchFilter {
    /// Catch everything
    #[default]
    Any,
    /// Catch exceptions of one kind
    Kind(String),
}

impl CatchFilter {
    /// Check whether the handler accepts an exception
    pub fn matches(&self, exception: &Exception) -> bool {
        match self {
            CatchFilter::Any => true,
            CatchFilter::Kind(kind) => exception.kind == *kind,
        }
    }
}

/// A catch handler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatchBlock {
    /// Exception filter
    #[serde(default)]
    pub filter: CatchFilter,
    /// Variable bound to the caught exception
    #[serde(default)]
    pub variable: Option<Var>,
    /// Handler body
    pub body: Expr,
}

/// How a lambda runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LambdaKind {
    /// Ordinary function; may not suspend
    #[default]
    Sync,
    /// May contain `await`; completes with a value
    Async,
    /// May contain `yield return` / `yield break`; produces a sequence
    Generator,
}

/// A lambda: parameters plus a body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LambdaExpr {
    /// Display name
    #[serde(default)]
    pub name: Option<String>,
    /// Sync, async or generator
    #[serde(default)]
    pub kind: LambdaKind,
    /// Parameters, bound positionally
    #[serde(default)]
    pub params: Vec<Var>,
    /// Body; its value is the lambda's result
    pub body: Box<Expr>,
}

impl LambdaExpr {
    /// Create a lambda
    pub fn new(kind: LambdaKind, params: Vec<Var>, body: Expr) -> Self {
        Self {
            name: None,
            kind,
            params,
            body: Box::new(body),
        }
    }

    /// Create an async lambda
    pub fn asynchronous(params: Vec<Var>, body: Expr) -> Self {
        Self::new(LambdaKind::Async, params, body)
    }

    /// Create a generator lambda
    pub fn generator(params: Vec<Var>, body: Expr) -> Self {
        Self::new(LambdaKind::Generator, params, body)
    }

    /// Create a synchronous lambda
    pub fn sync(params: Vec<Var>, body: Expr) -> Self {
        Self::new(LambdaKind::Sync, params, body)
    }

    /// Attach a display name
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Display name, or `<lambda>`
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<lambda>")
    }
}

// ============================================================================
// Expressions
// ============================================================================

/// Expression node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    /// Literal value: 42, "hi", true
    Constant(Value),

    /// Variable read: x
    Variable(Var),

    /// Assignment: x = value (evaluates to value)
    Assign {
        /// Assigned variable
        target: Var,
        /// Assigned value
        value: Box<Expr>,
    },

    /// Binary operation: a + b
    Binary {
        /// Operator
        op: BinaryOp,
        /// Left operand
        left: Box<Expr>,
        /// Right operand
        right: Box<Expr>,
    },

    /// Unary operation: !x
    Unary {
        /// Operator
        op: UnaryOp,
        /// Operand
        operand: Box<Expr>,
    },

    /// Host function call: f(a, b)
    Call {
        /// Function name, resolved at run time
        function: String,
        /// Arguments
        #[serde(default)]
        args: Vec<Expr>,
    },

    /// Closure invocation: (target)(a, b)
    Invoke {
        /// Expression producing a closure
        target: Box<Expr>,
        /// Arguments
        #[serde(default)]
        args: Vec<Expr>,
    },

    /// Nested lambda; evaluates to a closure over the enclosing scopes
    Lambda(Arc<LambdaExpr>),

    /// Sequential block: { var x; a; b } (evaluates to the last expression)
    Block {
        /// Block-local variables, initialized to unit on entry
        #[serde(default)]
        variables: Vec<Var>,
        /// Statements
        body: Vec<Expr>,
    },

    /// Conditional: if (test) a else b
    Condition {
        /// Test
        test: Box<Expr>,
        /// Taken when the test is truthy
        if_true: Box<Expr>,
        /// Taken otherwise
        #[serde(default)]
        if_false: Option<Box<Expr>>,
    },

    /// Switch: switch (value) { case 1: a; default: b }
    Switch {
        /// Value compared against each case
        value: Box<Expr>,
        /// Cases in order
        cases: Vec<SwitchCase>,
        /// Default arm
        #[serde(default)]
        default: Option<Box<Expr>>,
    },

    /// Infinite loop left through its break label
    Loop {
        /// Body
        body: Box<Expr>,
        /// Target placed after the loop
        #[serde(default)]
        break_label: Option<LabelTarget>,
        /// Target that re-enters the body
        #[serde(default)]
        continue_label: Option<LabelTarget>,
    },

    /// Jump: goto L, break, continue, return value
    Goto {
        /// Flavor
        #[serde(default)]
        kind: GotoKind,
        /// Destination
        target: LabelTarget,
        /// Value delivered to the label
        #[serde(default)]
        value: Option<Box<Expr>>,
    },

    /// Label definition: L: (evaluates to the delivered value or the default)
    Label {
        /// Label defined here
        target: LabelTarget,
        /// Value when reached by falling through
        #[serde(default)]
        default: Option<Box<Expr>>,
    },

    /// try { } catch { } finally { }
    Try {
        /// Protected body
        body: Box<Expr>,
        /// Handlers, tried in order
        #[serde(default)]
        handlers: Vec<CatchBlock>,
        /// Runs on every exit
        #[serde(default)]
        finally: Option<Box<Expr>>,
    },

    /// throw value; `None` rethrows the exception being handled
    Throw(Option<Box<Expr>>),

    /// Suspend until an awaitable completes: await task
    Await {
        /// Awaitable operand
        awaitable: Box<Expr>,
        /// Type descriptor used to resolve the await binder
        #[serde(default = "default_awaitable_type")]
        awaitable_type: String,
        /// Whether the continuation captures the current context
        #[serde(default = "default_configure_await")]
        configure_await: bool,
    },

    /// Produce one value of a generator: yield return value
    YieldReturn(Box<Expr>),

    /// End a generator: yield break
    YieldBreak,
}

fn default_awaitable_type() -> String {
    TASK_TYPE.to_string()
}

fn default_configure_await() -> bool {
    true
}

impl Expr {
    /// Literal
    pub fn constant(value: impl Into<Value>) -> Self {
        Expr::Constant(value.into())
    }

    /// Unit literal
    pub fn unit() -> Self {
        Expr::Constant(Value::Unit)
    }

    /// Variable read
    pub fn var(var: &Var) -> Self {
        Expr::Variable(var.clone())
    }

    /// Assignment
    pub fn assign(target: &Var, value: Expr) -> Self {
        Expr::Assign {
            target: target.clone(),
            value: Box::new(value),
        }
    }

    /// Binary operation
    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Unary operation
    pub fn unary(op: UnaryOp, operand: Expr) -> Self {
        Expr::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    /// Host function call
    pub fn call(function: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Call {
            function: function.into(),
            args,
        }
    }

    /// Closure invocation
    pub fn invoke(target: Expr, args: Vec<Expr>) -> Self {
        Expr::Invoke {
            target: Box::new(target),
            args,
        }
    }

    /// Nested lambda
    pub fn lambda(lambda: LambdaExpr) -> Self {
        Expr::Lambda(Arc::new(lambda))
    }

    /// Block with declared variables
    pub fn block(variables: Vec<Var>, body: Vec<Expr>) -> Self {
        Expr::Block { variables, body }
    }

    /// Block without declarations
    pub fn seq(body: Vec<Expr>) -> Self {
        Expr::Block {
            variables: Vec::new(),
            body,
        }
    }

    /// if / else
    pub fn condition(test: Expr, if_true: Expr, if_false: Expr) -> Self {
        Expr::Condition {
            test: Box::new(test),
            if_true: Box::new(if_true),
            if_false: Some(Box::new(if_false)),
        }
    }

    /// if without else
    pub fn if_then(test: Expr, if_true: Expr) -> Self {
        Expr::Condition {
            test: Box::new(test),
            if_true: Box::new(if_true),
            if_false: None,
        }
    }

    /// Switch
    pub fn switch(value: Expr, cases: Vec<SwitchCase>, default: Option<Expr>) -> Self {
        Expr::Switch {
            value: Box::new(value),
            cases,
            default: default.map(Box::new),
        }
    }

    /// Loop with optional break and continue labels
    pub fn loop_with(
        body: Expr,
        break_label: Option<LabelTarget>,
        continue_label: Option<LabelTarget>,
    ) -> Self {
        Expr::Loop {
            body: Box::new(body),
            break_label,
            continue_label,
        }
    }

    /// goto L
    pub fn goto(target: &LabelTarget) -> Self {
        Expr::Goto {
            kind: GotoKind::Goto,
            target: target.clone(),
            value: None,
        }
    }

    /// break to a loop's break label
    pub fn break_to(target: &LabelTarget) -> Self {
        Expr::Goto {
            kind: GotoKind::Break,
            target: target.clone(),
            value: None,
        }
    }

    /// continue to a loop's continue label
    pub fn continue_to(target: &LabelTarget) -> Self {
        Expr::Goto {
            kind: GotoKind::Continue,
            target: target.clone(),
            value: None,
        }
    }

    /// return a value through the return label
    pub fn return_to(target: &LabelTarget, value: Expr) -> Self {
        Expr::Goto {
            kind: GotoKind::Return,
            target: target.clone(),
            value: Some(Box::new(value)),
        }
    }

    /// Label definition
    pub fn label(target: &LabelTarget, default: Option<Expr>) -> Self {
        Expr::Label {
            target: target.clone(),
            default: default.map(Box::new),
        }
    }

    /// try / catch
    pub fn try_catch(body: Expr, handlers: Vec<CatchBlock>) -> Self {
        Expr::Try {
            body: Box::new(body),
            handlers,
            finally: None,
        }
    }

    /// try / finally
    pub fn try_finally(body: Expr, finally: Expr) -> Self {
        Expr::Try {
            body: Box::new(body),
            handlers: Vec::new(),
            finally: Some(Box::new(finally)),
        }
    }

    /// try / catch / finally
    pub fn try_catch_finally(body: Expr, handlers: Vec<CatchBlock>, finally: Expr) -> Self {
        Expr::Try {
            body: Box::new(body),
            handlers,
            finally: Some(Box::new(finally)),
        }
    }

    /// throw value
    pub fn throw(value: Expr) -> Self {
        Expr::Throw(Some(Box::new(value)))
    }

    /// Rethrow the exception being handled
    pub fn rethrow() -> Self {
        Expr::Throw(None)
    }

    /// await on a task
    pub fn await_task(awaitable: Expr) -> Self {
        Self::await_of(awaitable, TASK_TYPE)
    }

    /// await on a plain value (completes synchronously)
    pub fn await_value(awaitable: Expr) -> Self {
        Self::await_of(awaitable, VALUE_TYPE)
    }

    /// await using the binder registered for `awaitable_type`
    pub fn await_of(awaitable: Expr, awaitable_type: impl Into<String>) -> Self {
        Expr::Await {
            awaitable: Box::new(awaitable),
            awaitable_type: awaitable_type.into(),
            configure_await: true,
        }
    }

    /// yield return value
    pub fn yield_return(value: Expr) -> Self {
        Expr::YieldReturn(Box::new(value))
    }

    /// yield break
    pub fn yield_break() -> Self {
        Expr::YieldBreak
    }

    /// Short node kind name for diagnostics
    pub fn kind_name(&self) -> &'static str {
        match self {
            Expr::Constant(_) => "constant",
            Expr::Variable(_) => "variable",
            Expr::Assign { .. } => "assign",
            Expr::Binary { .. } => "binary",
            Expr::Unary { .. } => "unary",
            Expr::Call { .. } => "call",
            Expr::Invoke { .. } => "invoke",
            Expr::Lambda(_) => "lambda",
            Expr::Block { .. } => "block",
            Expr::Condition { .. } => "condition",
            Expr::Switch { .. } => "switch",
            Expr::Loop { .. } => "loop",
            Expr::Goto { .. } => "goto",
            Expr::Label { .. } => "label",
            Expr::Try { .. } => "try",
            Expr::Throw(_) => "throw",
            Expr::Await { .. } => "await",
            Expr::YieldReturn(_) => "yield return",
            Expr::YieldBreak => "yield break",
        }
    }

    /// One-line rendering truncated for error messages
    pub fn describe(&self) -> String {
        const LIMIT: usize = 60;
        let text = self.to_string();
        if text.chars().count() <= LIMIT {
            text
        } else {
            let cut: String = text.chars().take(LIMIT).collect();
            format!("{}...", cut)
        }
    }

    /// Whether evaluating the node can have no side effects
    pub fn is_pure_leaf(&self) -> bool {
        matches!(self, Expr::Constant(_) | Expr::Variable(_))
    }

    /// Whether the node never completes normally (it always jumps or throws)
    pub fn is_jump(&self) -> bool {
        matches!(self, Expr::Goto { .. } | Expr::Throw(_))
    }
}

impl SwitchCase {
    /// Create a case
    pub fn new(test_values: Vec<Expr>, body: Expr) -> Self {
        Self { test_values, body }
    }
}

impl CatchBlock {
    /// Catch everything, binding the exception to `variable`
    pub fn any(variable: Option<Var>, body: Expr) -> Self {
        Self {
            filter: CatchFilter::Any,
            variable,
            body,
        }
    }

    /// Catch one exception kind
    pub fn kind(kind: impl Into<String>, variable: Option<Var>, body: Expr) -> Self {
        Self {
            filter: CatchFilter::Kind(kind.into()),
            variable,
            body,
        }
    }
}
