//! Reduced trees
//!
//! The flattened, pre-resolved form of an expression that the interpreter
//! walks. Nodes live in an arena and know their parent and their slot in the
//! parent, so a goto can be routed ahead of time: every goto records the
//! nearest common ancestor it shares with its label and the child slots
//! leading from that ancestor down to the label. Gotos whose label is not in
//! the tree escape to the caller (the state machine that owns the
//! expression).
//!
//! Await binders are resolved here too, once per node.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::compiler::binder::{AwaitBinder, BinderRegistry};
use crate::compiler::error::{LowerError, LowerResult};
use crate::tree::{BinaryOp, CatchFilter, Expr, LabelId, UnaryOp, Var};
use crate::vm::value::Value;

/// Node index within a reduced tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u32);

/// A nested lambda, reduced once and instantiated as a closure at runtime
#[derive(Debug)]
pub struct LambdaTemplate {
    /// Display name
    pub name: String,
    /// Parameters, bound positionally
    pub params: Vec<Var>,
    /// Reduced body
    pub tree: Arc<ReducedTree>,
}

/// What a goto's ancestor does when the transition reaches it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
    /// Seek a label inside a block
    Label,
    /// Leave a loop
    Break,
    /// Restart a loop body
    Continue,
}

/// Pre-computed route of a goto
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GotoRoute {
    /// The label is in the same tree
    Local {
        /// Nearest common ancestor of the goto and its label (the loop for break/continue)
        ancestor: NodeId,
        /// Child slots from the ancestor down to the label
        path: Vec<usize>,
        /// How the ancestor handles the transition
        kind: RouteKind,
    },
    /// The label belongs to whoever evaluates the tree
    Escape,
}

/// Child slots of one switch case
#[derive(Debug, Clone)]
pub struct CaseLayout {
    /// Test value slots
    pub tests: Vec<usize>,
    /// Body slot
    pub body: usize,
}

/// Child slots of a switch
#[derive(Debug, Clone)]
pub struct SwitchLayout {
    /// Cases in order
    pub cases: Vec<CaseLayout>,
    /// Default body slot
    pub default: Option<usize>,
}

/// One catch handler of a try node
#[derive(Debug, Clone)]
pub struct HandlerLayout {
    /// Exception filter
    pub filter: CatchFilter,
    /// Variable bound to the exception
    pub variable: Option<Var>,
    /// Body slot
    pub body: usize,
}

/// Child slots of a try (the body is always slot 0)
#[derive(Debug, Clone)]
pub struct TryLayout {
    /// Handlers in order
    pub handlers: Vec<HandlerLayout>,
    /// Finally slot
    pub finally: Option<usize>,
}

/// Node payload
#[derive(Debug, Clone)]
pub enum NodeKind {
    /// Literal value
    Constant(Value),
    /// Variable read
    Variable(Var),
    /// Assignment of slot 0 to the variable
    Assign(Var),
    /// Binary operator over slots 0 and 1
    Binary(BinaryOp),
    /// Unary operator over slot 0
    Unary(UnaryOp),
    /// Host function call by name; every slot is an argument
    Call(String),
    /// Closure call; slot 0 is the target, the rest are arguments
    Invoke,
    /// Closure creation over the current scope chain
    Lambda(Arc<LambdaTemplate>),
    /// Sequence of children
    Block {
        /// Variables scoped to the block
        variables: Vec<Var>,
    },
    /// Test in slot 0, branches in slots 1 and 2
    Condition {
        /// Whether slot 2 exists
        has_else: bool,
    },
    /// Switch over case tests
    Switch(SwitchLayout),
    /// Endless loop over slot 0
    Loop,
    /// Jump to a label
    Goto {
        /// Target label
        label: LabelId,
        /// Resolved route
        route: GotoRoute,
        /// Whether slot 0 carries a value
        has_value: bool,
    },
    /// Jump target; slot 0, if present, is the fallthrough value
    Label {
        /// Label defined here
        label: LabelId,
    },
    /// Protected body with handlers and finally
    Try(TryLayout),
    /// Throw the exception in slot 0
    Throw,
    /// Throw the exception being handled
    Rethrow,
    /// Await on slot 0
    Await {
        /// Resolved binder
        binder: Arc<dyn AwaitBinder>,
        /// Capture the current context for the continuation
        configure_await: bool,
    },
    /// Yield slot 0 from a generator
    YieldReturn,
    /// End a generator
    YieldBreak,
}

impl NodeKind {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            NodeKind::Constant(_) => "constant",
            NodeKind::Variable(_) => "variable",
            NodeKind::Assign(_) => "assign",
            NodeKind::Binary(_) => "binary",
            NodeKind::Unary(_) => "unary",
            NodeKind::Call(_) => "call",
            NodeKind::Invoke => "invoke",
            NodeKind::Lambda(_) => "lambda",
            NodeKind::Block { .. } => "block",
            NodeKind::Condition { .. } => "condition",
            NodeKind::Switch(_) => "switch",
            NodeKind::Loop => "loop",
            NodeKind::Goto { .. } => "goto",
            NodeKind::Label { .. } => "label",
            NodeKind::Try(_) => "try",
            NodeKind::Throw => "throw",
            NodeKind::Rethrow => "rethrow",
            NodeKind::Await { .. } => "await",
            NodeKind::YieldReturn => "yield return",
            NodeKind::YieldBreak => "yield break",
        }
    }
}

/// A node of a reduced tree
#[derive(Debug, Clone)]
pub struct ReducedNode {
    /// Parent node (none for the root)
    pub parent: Option<NodeId>,
    /// Index among the parent's children
    pub slot: usize,
    /// Children in evaluation order
    pub children: Vec<NodeId>,
    /// Payload
    pub kind: NodeKind,
}

/// Arena of reduced nodes
#[derive(Debug)]
pub struct ReducedTree {
    nodes: Vec<ReducedNode>,
    root: NodeId,
    escapes: Vec<LabelId>,
}

#[derive(Clone, Copy)]
enum LabelSite {
    Label(NodeId),
    Break(NodeId),
    Continue(NodeId),
}

struct Builder<'a> {
    binders: &'a BinderRegistry,
    nodes: Vec<ReducedNode>,
    sites: FxHashMap<LabelId, LabelSite>,
    gotos: Vec<(NodeId, LabelId)>,
}

impl Builder<'_> {
    fn add(&mut self, expr: &Expr, parent: Option<NodeId>, slot: usize) -> LowerResult<NodeId> {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(ReducedNode {
            parent,
            slot,
            children: Vec::new(),
            kind: NodeKind::Loop,
        });

        let kind = match expr {
            Expr::Constant(value) => NodeKind::Constant(value.clone()),
            Expr::Variable(var) => NodeKind::Variable(var.clone()),
            Expr::Assign { target, value } => {
                self.child(id, value)?;
                NodeKind::Assign(target.clone())
            }
            Expr::Binary { op, left, right } => {
                self.child(id, left)?;
                self.child(id, right)?;
                NodeKind::Binary(*op)
            }
            Expr::Unary { op, operand } => {
                self.child(id, operand)?;
                NodeKind::Unary(*op)
            }
            Expr::Call { function, args } => {
                for arg in args {
                    self.child(id, arg)?;
                }
                NodeKind::Call(function.clone())
            }
            Expr::Invoke { target, args } => {
                self.child(id, target)?;
                for arg in args {
                    self.child(id, arg)?;
                }
                NodeKind::Invoke
            }
            Expr::Lambda(lambda) => NodeKind::Lambda(Arc::new(LambdaTemplate {
                name: lambda.display_name().to_string(),
                params: lambda.params.clone(),
                tree: Arc::new(ReducedTree::build(&lambda.body, self.binders, false)?),
            })),
            Expr::Block { variables, body } => {
                for child in body {
                    self.child(id, child)?;
                }
                NodeKind::Block {
                    variables: variables.clone(),
                }
            }
            Expr::Condition {
                test,
                if_true,
                if_false,
            } => {
                self.child(id, test)?;
                self.child(id, if_true)?;
                if let Some(if_false) = if_false {
                    self.child(id, if_false)?;
                }
                NodeKind::Condition {
                    has_else: if_false.is_some(),
                }
            }
            Expr::Switch {
                value,
                cases,
                default,
            } => {
                self.child(id, value)?;
                let mut layout = SwitchLayout {
                    cases: Vec::with_capacity(cases.len()),
                    default: None,
                };
                for case in cases {
                    let mut tests = Vec::with_capacity(case.test_values.len());
                    for test in &case.test_values {
                        tests.push(self.child(id, test)?);
                    }
                    let body = self.child(id, &case.body)?;
                    layout.cases.push(CaseLayout { tests, body });
                }
                if let Some(default) = default {
                    layout.default = Some(self.child(id, default)?);
                }
                NodeKind::Switch(layout)
            }
            Expr::Loop {
                body,
                break_label,
                continue_label,
            } => {
                if let Some(label) = break_label {
                    self.sites.insert(label.id, LabelSite::Break(id));
                }
                if let Some(label) = continue_label {
                    self.sites.insert(label.id, LabelSite::Continue(id));
                }
                self.child(id, body)?;
                NodeKind::Loop
            }
            Expr::Goto { target, value, .. } => {
                if let Some(value) = value {
                    self.child(id, value)?;
                }
                self.gotos.push((id, target.id));
                NodeKind::Goto {
                    label: target.id,
                    route: GotoRoute::Escape,
                    has_value: value.is_some(),
                }
            }
            Expr::Label { target, default } => {
                if let Some(default) = default {
                    self.child(id, default)?;
                }
                self.sites.insert(target.id, LabelSite::Label(id));
                NodeKind::Label { label: target.id }
            }
            Expr::Try {
                body,
                handlers,
                finally,
            } => {
                self.child(id, body)?;
                let mut layout = TryLayout {
                    handlers: Vec::with_capacity(handlers.len()),
                    finally: None,
                };
                for handler in handlers {
                    let body = self.child(id, &handler.body)?;
                    layout.handlers.push(HandlerLayout {
                        filter: handler.filter.clone(),
                        variable: handler.variable.clone(),
                        body,
                    });
                }
                if let Some(finally) = finally {
                    layout.finally = Some(self.child(id, finally)?);
                }
                NodeKind::Try(layout)
            }
            Expr::Throw(Some(value)) => {
                self.child(id, value)?;
                NodeKind::Throw
            }
            Expr::Throw(None) => NodeKind::Rethrow,
            Expr::Await {
                awaitable,
                awaitable_type,
                configure_await,
            } => {
                self.child(id, awaitable)?;
                NodeKind::Await {
                    binder: self.binders.resolve(awaitable_type)?,
                    configure_await: *configure_await,
                }
            }
            Expr::YieldReturn(value) => {
                self.child(id, value)?;
                NodeKind::YieldReturn
            }
            Expr::YieldBreak => NodeKind::YieldBreak,
        };
        self.nodes[id.0 as usize].kind = kind;
        Ok(id)
    }

    /// Add `expr` as the next child of `parent`, returning its slot
    fn child(&mut self, parent: NodeId, expr: &Expr) -> LowerResult<usize> {
        let slot = self.nodes[parent.0 as usize].children.len();
        let id = self.add(expr, Some(parent), slot)?;
        self.nodes[parent.0 as usize].children.push(id);
        Ok(slot)
    }
}

impl ReducedTree {
    /// Reduce an expression. With `allow_escape`, gotos to labels outside the
    /// expression escape to the caller; otherwise they are errors.
    pub fn build(expr: &Expr, binders: &BinderRegistry, allow_escape: bool) -> LowerResult<Self> {
        let mut builder = Builder {
            binders,
            nodes: Vec::new(),
            sites: FxHashMap::default(),
            gotos: Vec::new(),
        };
        let root = builder.add(expr, None, 0)?;
        let Builder {
            nodes,
            sites,
            gotos,
            ..
        } = builder;

        let mut tree = ReducedTree {
            nodes,
            root,
            escapes: Vec::new(),
        };
        for (goto, label) in gotos {
            let route = tree.route(goto, label, sites.get(&label).copied(), allow_escape)?;
            if route == GotoRoute::Escape && !tree.escapes.contains(&label) {
                tree.escapes.push(label);
            }
            if let NodeKind::Goto { route: slot, .. } = &mut tree.nodes[goto.0 as usize].kind {
                *slot = route;
            }
        }
        Ok(tree)
    }

    /// Root node
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Node by id
    pub fn node(&self, id: NodeId) -> &ReducedNode {
        &self.nodes[id.0 as usize]
    }

    /// Child of `node` at `index`
    pub fn child(&self, node: NodeId, index: usize) -> LowerResult<NodeId> {
        self.node(node)
            .children
            .get(index)
            .copied()
            .ok_or_else(|| LowerError::ChildIndex {
                node: format!("{} #{}", self.node(node).kind.name(), node.0),
                index,
            })
    }

    /// Labels targeted from inside the tree but defined outside it
    pub fn escapes(&self) -> &[LabelId] {
        &self.escapes
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the tree is empty (never true for a built tree)
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn route(
        &self,
        goto: NodeId,
        label: LabelId,
        site: Option<LabelSite>,
        allow_escape: bool,
    ) -> LowerResult<GotoRoute> {
        let name = format!("L{}", label.0);
        match site {
            None if allow_escape => Ok(GotoRoute::Escape),
            None => Err(LowerError::UnresolvedLabel { label: name }),
            Some(LabelSite::Break(loop_node)) | Some(LabelSite::Continue(loop_node))
                if !self.is_ancestor(loop_node, goto) =>
            {
                Err(LowerError::JumpIntoExpression { label: name })
            }
            Some(LabelSite::Break(loop_node)) => Ok(GotoRoute::Local {
                ancestor: loop_node,
                path: Vec::new(),
                kind: RouteKind::Break,
            }),
            Some(LabelSite::Continue(loop_node)) => Ok(GotoRoute::Local {
                ancestor: loop_node,
                path: Vec::new(),
                kind: RouteKind::Continue,
            }),
            Some(LabelSite::Label(target)) => {
                let ancestor = self.common_ancestor(goto, target);
                let mut path = Vec::new();
                let mut crossed = Vec::new();
                let mut cursor = target;
                while cursor != ancestor {
                    let node = self.node(cursor);
                    path.push(node.slot);
                    match node.parent {
                        Some(parent) => cursor = parent,
                        None => return Err(LowerError::JumpIntoExpression { label: name }),
                    }
                    if cursor != ancestor {
                        crossed.push(cursor);
                    }
                }
                path.reverse();
                if path.is_empty() {
                    return Err(LowerError::JumpIntoExpression { label: name });
                }
                for node in std::iter::once(ancestor).chain(crossed) {
                    match self.node(node).kind {
                        NodeKind::Block { .. } => {}
                        NodeKind::Try(_) => return Err(LowerError::JumpIntoTry { label: name }),
                        _ => return Err(LowerError::JumpIntoExpression { label: name }),
                    }
                }
                Ok(GotoRoute::Local {
                    ancestor,
                    path,
                    kind: RouteKind::Label,
                })
            }
        }
    }

    fn is_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut cursor = Some(node);
        while let Some(id) = cursor {
            if id == ancestor {
                return true;
            }
            cursor = self.node(id).parent;
        }
        false
    }

    fn common_ancestor(&self, a: NodeId, b: NodeId) -> NodeId {
        let mut cursor = Some(b);
        while let Some(id) = cursor {
            if self.is_ancestor(id, a) {
                return id;
            }
            cursor = self.node(id).parent;
        }
        self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{CatchBlock, LabelTarget, LambdaExpr};

    fn build(expr: &Expr, allow_escape: bool) -> LowerResult<ReducedTree> {
        ReducedTree::build(expr, &BinderRegistry::new(), allow_escape)
    }

    fn goto_route(tree: &ReducedTree) -> GotoRoute {
        (0..tree.len())
            .find_map(|i| match &tree.node(NodeId(i as u32)).kind {
                NodeKind::Goto { route, .. } => Some(route.clone()),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn test_forward_goto_into_sibling_block() {
        let l = LabelTarget::new(0);
        let expr = Expr::seq(vec![
            Expr::goto(&l),
            Expr::call("skipped", vec![]),
            Expr::seq(vec![Expr::call("also_skipped", vec![]), Expr::label(&l, None)]),
        ]);
        let tree = build(&expr, false).unwrap();
        assert_eq!(
            goto_route(&tree),
            GotoRoute::Local {
                ancestor: tree.root(),
                path: vec![2, 1],
                kind: RouteKind::Label,
            }
        );
    }

    #[test]
    fn test_break_routes_to_loop() {
        let brk = LabelTarget::new(3);
        let expr = Expr::loop_with(
            Expr::if_then(Expr::constant(true), Expr::break_to(&brk)),
            Some(brk.clone()),
            None,
        );
        let tree = build(&expr, false).unwrap();
        assert!(matches!(
            goto_route(&tree),
            GotoRoute::Local {
                kind: RouteKind::Break,
                ..
            }
        ));
    }

    #[test]
    fn test_escape() {
        let outside = LabelTarget::new(7);
        let expr = Expr::call("f", vec![Expr::goto(&outside)]);
        let tree = build(&expr, true).unwrap();
        assert_eq!(goto_route(&tree), GotoRoute::Escape);
        assert_eq!(tree.escapes(), &[LabelId(7)]);
        assert_eq!(
            build(&expr, false).unwrap_err(),
            LowerError::UnresolvedLabel { label: "L7".into() }
        );
    }

    #[test]
    fn test_jump_into_try_and_expression() {
        let l = LabelTarget::new(0);
        let into_try = Expr::seq(vec![
            Expr::goto(&l),
            Expr::try_catch(
                Expr::seq(vec![Expr::label(&l, None)]),
                vec![CatchBlock::any(None, Expr::unit())],
            ),
        ]);
        assert_eq!(
            build(&into_try, false).unwrap_err(),
            LowerError::JumpIntoTry { label: "L0".into() }
        );

        let into_call = Expr::seq(vec![
            Expr::goto(&l),
            Expr::call("f", vec![Expr::label(&l, None)]),
        ]);
        assert_eq!(
            build(&into_call, false).unwrap_err(),
            LowerError::JumpIntoExpression { label: "L0".into() }
        );
    }

    #[test]
    fn test_nested_lambda_is_reduced_separately() {
        let x = crate::tree::Var::new(0, "x");
        let expr = Expr::lambda(LambdaExpr::sync(vec![x.clone()], Expr::var(&x)).named("id"));
        let tree = build(&expr, true).unwrap();
        match &tree.node(tree.root()).kind {
            NodeKind::Lambda(template) => {
                assert_eq!(template.name, "id");
                assert_eq!(template.tree.len(), 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_child_index_error() {
        let tree = build(&Expr::constant(1i64), false).unwrap();
        assert!(matches!(
            tree.child(tree.root(), 0),
            Err(LowerError::ChildIndex { index: 0, .. })
        ));
    }
}
