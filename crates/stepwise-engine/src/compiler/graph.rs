//! State graph
//!
//! The state container built by lowering: an arena of states addressed by
//! `StateId`, grouped into scopes that mirror the structured constructs they
//! came from. Transitions refer to states by id, so loop back-edges are plain
//! indices.
//!
//! Scopes open and close with the constructs being lowered. When an inline
//! scope (loop body, catch handler, finally body) closes, its states are
//! spliced into the parent scope. A try body scope keeps its states: it is a
//! *region*, emitted as its own block with its own jump table. The top scope
//! is the outermost region.

use std::fmt;

use rustc_hash::FxHashMap;

use super::error::{LowerError, LowerResult};
use super::transition::Transition;
use crate::tree::{Expr, LabelId, LambdaKind, Var};

// ============================================================================
// Identifiers
// ============================================================================

/// State identifier, unique within a graph; also the resume id stored in the
/// durable state field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateId(pub u32);

impl StateId {
    /// Value stored in the durable state field to resume here
    pub fn resume_id(self) -> i64 {
        self.0 as i64
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ST_{:04}", self.0)
    }
}

/// Scope identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(pub u32);

/// Structured construct a scope belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    /// Lambda body
    Top,
    /// Loop body
    Loop,
    /// Protected body of a try
    TryBody,
    /// Catch handler body
    Catch,
    /// Finally body
    Finally,
}

impl ScopeKind {
    /// Whether the scope is emitted as its own block
    pub fn is_region(self) -> bool {
        matches!(self, ScopeKind::Top | ScopeKind::TryBody)
    }
}

// ============================================================================
// States and scopes
// ============================================================================

/// Value captured at the end of a state
#[derive(Debug, Clone)]
pub struct StateResult {
    /// Variable receiving the value
    pub variable: Var,
    /// Value expression, evaluated after the state's expressions
    pub value: Expr,
}

/// A resumable segment of the lowered program
#[derive(Debug, Clone)]
pub struct State {
    /// Identity
    pub id: StateId,
    /// Innermost scope at creation
    pub scope: ScopeId,
    /// Region the state is emitted in
    pub region: ScopeId,
    /// Position within its region's emission order
    pub order: u32,
    /// Side-effecting expressions, free of suspend points
    pub expressions: Vec<Expr>,
    /// Optional captured value
    pub result: Option<StateResult>,
    /// How control leaves the state
    pub transition: Option<Transition>,
    /// Removed from emission by the optimizer
    pub pruned: bool,
}

impl State {
    /// No expressions, no result and a plain goto
    pub fn is_noop(&self) -> bool {
        self.expressions.is_empty()
            && self.result.is_none()
            && matches!(self.transition, Some(Transition::Goto { .. }))
    }
}

/// A group of states for one construct
#[derive(Debug, Clone)]
pub struct Scope {
    /// Identity
    pub id: ScopeId,
    /// Construct kind
    pub kind: ScopeKind,
    /// Enclosing scope
    pub parent: Option<ScopeId>,
    /// Region this scope emits into (itself for regions)
    pub region: ScopeId,
    /// States in creation order, including spliced child scopes
    pub nodes: Vec<StateId>,
    /// For try bodies, the state whose transition enters the region
    pub owner: Option<StateId>,
}

/// Where a label lands
#[derive(Debug, Clone)]
pub struct LabelBinding {
    /// Target state
    pub state: StateId,
    /// Variable receiving a goto's value
    pub variable: Option<Var>,
}

// ============================================================================
// Graph
// ============================================================================

/// The state container
#[derive(Debug, Clone)]
pub struct StateGraph {
    /// Lambda display name
    pub name: String,
    /// Lambda kind
    pub kind: LambdaKind,
    /// Lambda parameters
    pub params: Vec<Var>,
    /// State arena, indexed by `StateId`
    pub states: Vec<State>,
    /// Scope arena, indexed by `ScopeId`
    pub scopes: Vec<Scope>,
    /// First state executed
    pub entry: StateId,
    /// Labels bound to states
    pub labels: FxHashMap<LabelId, LabelBinding>,
    /// Hoisted block variables and lowering temporaries
    pub variables: Vec<Var>,
    stack: Vec<ScopeId>,
}

impl StateGraph {
    /// Graph with a top scope holding one empty entry state
    pub fn new(name: impl Into<String>, kind: LambdaKind, params: Vec<Var>) -> Self {
        let mut graph = StateGraph {
            name: name.into(),
            kind,
            params,
            states: Vec::new(),
            scopes: vec![Scope {
                id: ScopeId(0),
                kind: ScopeKind::Top,
                parent: None,
                region: ScopeId(0),
                nodes: Vec::new(),
                owner: None,
            }],
            entry: StateId(0),
            labels: FxHashMap::default(),
            variables: Vec::new(),
            stack: vec![ScopeId(0)],
        };
        graph.entry = graph.add_state();
        graph
    }

    /// The top scope
    pub fn top(&self) -> ScopeId {
        ScopeId(0)
    }

    /// Innermost open scope
    pub fn current_scope(&self) -> ScopeId {
        self.stack.last().copied().unwrap_or(ScopeId(0))
    }

    /// Open a scope nested in the current one
    pub fn enter_scope(&mut self, kind: ScopeKind) -> ScopeId {
        let parent = self.current_scope();
        let id = ScopeId(self.scopes.len() as u32);
        let region = if kind.is_region() {
            id
        } else {
            self.scopes[parent.0 as usize].region
        };
        self.scopes.push(Scope {
            id,
            kind,
            parent: Some(parent),
            region,
            nodes: Vec::new(),
            owner: None,
        });
        self.stack.push(id);
        id
    }

    /// Close the current scope, splicing inline scopes into their parent
    pub fn exit_scope(&mut self) -> ScopeId {
        let Some(id) = self.stack.pop() else {
            return ScopeId(0);
        };
        let scope = &self.scopes[id.0 as usize];
        if let (false, Some(parent)) = (scope.kind.is_region(), scope.parent) {
            let nodes = scope.nodes.clone();
            self.scopes[parent.0 as usize].nodes.extend(nodes);
        }
        id
    }

    /// Create an empty state in the current scope
    pub fn add_state(&mut self) -> StateId {
        let scope = self.current_scope();
        let id = StateId(self.states.len() as u32);
        let region = self.scopes[scope.0 as usize].region;
        self.states.push(State {
            id,
            scope,
            region,
            order: 0,
            expressions: Vec::new(),
            result: None,
            transition: None,
            pruned: false,
        });
        self.scopes[scope.0 as usize].nodes.push(id);
        id
    }

    /// State by id
    pub fn state(&self, id: StateId) -> &State {
        &self.states[id.0 as usize]
    }

    /// Mutable state by id
    pub fn state_mut(&mut self, id: StateId) -> &mut State {
        &mut self.states[id.0 as usize]
    }

    /// Scope by id
    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.0 as usize]
    }

    /// Set a state's transition
    pub fn set_transition(&mut self, id: StateId, transition: Transition) {
        self.state_mut(id).transition = Some(transition);
    }

    /// Append an expression to a state
    pub fn push_expression(&mut self, id: StateId, expr: Expr) {
        self.state_mut(id).expressions.push(expr);
    }

    /// Bind a label to a state
    pub fn bind_label(&mut self, label: LabelId, binding: LabelBinding) -> LowerResult<()> {
        if self.labels.contains_key(&label) {
            return Err(LowerError::DuplicateLabel {
                label: format!("L{}", label.0),
            });
        }
        self.labels.insert(label, binding);
        Ok(())
    }

    /// Register a hoisted variable
    pub fn declare_variable(&mut self, var: &Var) {
        if !self.variables.contains(var) {
            self.variables.push(var.clone());
        }
    }

    /// Mark a try body scope as entered by `owner`
    pub fn set_owner(&mut self, region: ScopeId, owner: StateId) {
        self.scopes[region.0 as usize].owner = Some(owner);
    }

    /// Region scopes, top first
    pub fn regions(&self) -> Vec<ScopeId> {
        self.scopes
            .iter()
            .filter(|s| s.kind.is_region())
            .map(|s| s.id)
            .collect()
    }

    /// Region enclosing a region (none for the top scope)
    pub fn parent_region(&self, region: ScopeId) -> Option<ScopeId> {
        self.scope(region)
            .parent
            .map(|parent| self.scope(parent).region)
    }

    /// Whether `ancestor` is `region` or encloses it
    pub fn region_encloses(&self, ancestor: ScopeId, region: ScopeId) -> bool {
        let mut current = Some(region);
        while let Some(r) = current {
            if r == ancestor {
                return true;
            }
            current = self.parent_region(r);
        }
        false
    }

    /// Nesting depth of a region (top is 0)
    pub fn region_depth(&self, region: ScopeId) -> usize {
        let mut depth = 0;
        let mut current = self.parent_region(region);
        while let Some(r) = current {
            depth += 1;
            current = self.parent_region(r);
        }
        depth
    }

    /// First state executed when a region is entered normally
    pub fn region_entry(&self, region: ScopeId) -> Option<StateId> {
        if region == self.top() {
            return Some(self.entry);
        }
        let owner = self.scope(region).owner?;
        match &self.state(owner).transition {
            Some(Transition::TryCatch(t)) => Some(t.body),
            _ => None,
        }
    }

    /// Live states of a region in emission order
    pub fn region_nodes(&self, region: ScopeId) -> Vec<StateId> {
        let mut nodes: Vec<StateId> = self
            .scope(region)
            .nodes
            .iter()
            .copied()
            .filter(|id| !self.state(*id).pruned)
            .collect();
        nodes.sort_by_key(|id| self.state(*id).order);
        nodes
    }

    /// States that a suspended machine resumes at
    pub fn resume_states(&self) -> Vec<StateId> {
        let mut states: Vec<StateId> = self
            .states
            .iter()
            .filter(|s| !s.pruned)
            .filter_map(|s| s.transition.as_ref().and_then(Transition::resume_target))
            .collect();
        states.sort();
        states.dedup();
        states
    }

    /// Live state count
    pub fn live_states(&self) -> usize {
        self.states.iter().filter(|s| !s.pruned).count()
    }

    /// Give every open-ended state an explicit goto to the next state of its scope
    pub fn seal(&mut self) -> LowerResult<()> {
        for scope in 0..self.scopes.len() {
            let nodes = self.scopes[scope].nodes.clone();
            for pair in nodes.windows(2) {
                if self.state(pair[0]).transition.is_none() {
                    self.set_transition(pair[0], Transition::Goto { target: pair[1] });
                }
            }
            if let Some(last) = nodes.last() {
                if self.state(*last).transition.is_none() {
                    return Err(LowerError::DanglingTarget {
                        from: last.to_string(),
                        to: "<end of scope>".to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Check that every transition target exists and is live
    pub fn validate(&self) -> LowerResult<()> {
        for state in self.states.iter().filter(|s| !s.pruned) {
            let Some(transition) = &state.transition else {
                return Err(LowerError::DanglingTarget {
                    from: state.id.to_string(),
                    to: "<no transition>".to_string(),
                });
            };
            for target in transition.references() {
                let live = self
                    .states
                    .get(target.0 as usize)
                    .map(|s| !s.pruned)
                    .unwrap_or(false);
                if !live {
                    return Err(LowerError::DanglingTarget {
                        from: state.id.to_string(),
                        to: target.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}
