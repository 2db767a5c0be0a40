//! Transitions
//!
//! The closed set of ways a state hands off control. Every variant can list
//! the states it references, rewrite those references, report the state it
//! falls through to, and render itself into linear instructions.

use std::sync::Arc;

use super::assemble::BlockEmitter;
use super::binder::AwaitBinder;
use super::error::LowerResult;
use super::graph::{ScopeId, StateId};
use super::linear::{LinearInstr, LinearLabel, SuspendKind, TryRegion};
use crate::defaults::TRY_STATE_NONE;
use crate::tree::{CatchFilter, Expr, Var};

/// One switch arm
#[derive(Debug, Clone)]
pub struct SwitchCaseTransition {
    /// Values compared against the switch value
    pub test_values: Vec<Expr>,
    /// Arm head
    pub body: StateId,
}

/// Multi-way branch
#[derive(Debug, Clone)]
pub struct SwitchTransition {
    /// Switch value
    pub value: Expr,
    /// Arms in order
    pub cases: Vec<SwitchCaseTransition>,
    /// Taken when no arm matches (the join state when there is no default)
    pub default: StateId,
}

/// One catch handler of a try transition
#[derive(Debug, Clone)]
pub struct CatchTransition {
    /// Exception filter
    pub filter: CatchFilter,
    /// Handler head
    pub body: StateId,
    /// Try-state code recorded when this handler is selected
    pub code: i64,
}

/// Entry into a protected region
#[derive(Debug, Clone)]
pub struct TryTransition {
    /// Try body scope
    pub region: ScopeId,
    /// First state of the try body
    pub body: StateId,
    /// Try-state variable
    pub try_state: Var,
    /// Caught-exception variable
    pub exception: Var,
    /// Catch handlers
    pub handlers: Vec<CatchTransition>,
    /// Finally head
    pub finally: Option<StateId>,
    /// State after the whole construct
    pub join: StateId,
}

/// End of a finally body
#[derive(Debug, Clone)]
pub struct FinallyExitTransition {
    /// Region the finally body protects
    pub region: ScopeId,
    /// Try-state variable of that region
    pub try_state: Var,
    /// Stored-exception variable of that region
    pub exception: Var,
    /// State after the construct
    pub join: StateId,
}

/// Suspend on an awaiter unless it already completed
#[derive(Clone)]
pub struct AwaitTransition {
    /// Awaitable operand
    pub awaitable: Expr,
    /// Durable awaiter variable
    pub awaiter: Var,
    /// Resolved binder
    pub binder: Arc<dyn AwaitBinder>,
    /// Capture the current context for the continuation
    pub configure_await: bool,
    /// Resume state that retrieves the result
    pub completion: StateId,
}

impl std::fmt::Debug for AwaitTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwaitTransition")
            .field("awaitable", &self.awaitable.describe())
            .field("awaiter", &self.awaiter.name)
            .field("binder", &self.binder.type_name())
            .field("completion", &self.completion)
            .finish()
    }
}

/// Retrieve an awaiter's result after resumption
#[derive(Debug, Clone)]
pub struct AwaitResultTransition {
    /// Awaiter variable
    pub awaiter: Var,
    /// Variable receiving the result
    pub result: Option<Var>,
    /// Resolved binder
    pub binder: Arc<dyn AwaitBinder>,
    /// State after the await
    pub target: StateId,
}

/// How control leaves a state
#[derive(Debug, Clone)]
pub enum Transition {
    /// Unconditional jump
    Goto {
        /// Destination
        target: StateId,
    },
    /// Two-way branch
    Conditional {
        /// Test, evaluated after the state's expressions
        test: Expr,
        /// Taken when truthy
        if_true: StateId,
        /// Taken otherwise
        if_false: StateId,
    },
    /// Multi-way branch
    Switch(SwitchTransition),
    /// Loop head; never collapsed even when the body is empty
    Loop {
        /// Body head
        body: StateId,
    },
    /// Enter a protected region
    TryCatch(TryTransition),
    /// Route on the try-state after a finally body
    FinallyExit(FinallyExitTransition),
    /// Suspend on an awaiter
    Await(AwaitTransition),
    /// Retrieve an await result
    AwaitResult(AwaitResultTransition),
    /// Produce a generator value and suspend
    YieldReturn {
        /// Produced value
        value: Expr,
        /// Resume state
        resume: StateId,
    },
    /// End a generator
    YieldBreak,
    /// Complete the machine
    Final {
        /// Result
        value: Option<Expr>,
    },
}

impl Transition {
    /// Referenced states
    pub fn references(&self) -> Vec<StateId> {
        let mut refs = Vec::new();
        let mut this = self.clone();
        this.for_each_reference_mut(|id| refs.push(*id));
        refs
    }

    /// Visit every referenced state mutably
    pub fn for_each_reference_mut(&mut self, mut f: impl FnMut(&mut StateId)) {
        match self {
            Transition::Goto { target } => f(target),
            Transition::Conditional {
                if_true, if_false, ..
            } => {
                f(if_true);
                f(if_false);
            }
            Transition::Switch(s) => {
                for case in &mut s.cases {
                    f(&mut case.body);
                }
                f(&mut s.default);
            }
            Transition::Loop { body } => f(body),
            Transition::TryCatch(t) => {
                f(&mut t.body);
                for handler in &mut t.handlers {
                    f(&mut handler.body);
                }
                if let Some(finally) = &mut t.finally {
                    f(finally);
                }
                f(&mut t.join);
            }
            Transition::FinallyExit(e) => f(&mut e.join),
            Transition::Await(a) => f(&mut a.completion),
            Transition::AwaitResult(a) => f(&mut a.target),
            Transition::YieldReturn { resume, .. } => f(resume),
            Transition::YieldBreak | Transition::Final { .. } => {}
        }
    }

    /// State reached without an explicit jump when it is emitted next
    pub fn fallthrough(&self) -> Option<StateId> {
        match self {
            Transition::Goto { target } => Some(*target),
            Transition::Loop { body } => Some(*body),
            Transition::Conditional { if_false, .. } => Some(*if_false),
            Transition::AwaitResult(a) => Some(a.target),
            Transition::TryCatch(t) => t.finally,
            _ => None,
        }
    }

    /// State a suspended machine resumes at
    pub fn resume_target(&self) -> Option<StateId> {
        match self {
            Transition::Await(a) => Some(a.completion),
            Transition::YieldReturn { resume, .. } => Some(*resume),
            _ => None,
        }
    }

    /// Preferred successor for emission layout
    pub fn layout_hint(&self) -> Option<StateId> {
        self.fallthrough().or_else(|| self.resume_target())
    }

    /// Short variant name
    pub fn kind_name(&self) -> &'static str {
        match self {
            Transition::Goto { .. } => "goto",
            Transition::Conditional { .. } => "conditional",
            Transition::Switch(_) => "switch",
            Transition::Loop { .. } => "loop",
            Transition::TryCatch(_) => "try",
            Transition::FinallyExit(_) => "finally-exit",
            Transition::Await(_) => "await",
            Transition::AwaitResult(_) => "await-result",
            Transition::YieldReturn { .. } => "yield",
            Transition::YieldBreak => "yield-break",
            Transition::Final { .. } => "final",
        }
    }

    /// Render into linear instructions for the state `source`
    pub fn render(&self, source: StateId, out: &mut BlockEmitter<'_>) -> LowerResult<()> {
        match self {
            Transition::Goto { target } | Transition::Loop { body: target } => {
                out.jump(*target);
            }
            Transition::Conditional {
                test,
                if_true,
                if_false,
            } => {
                let test = out.compile(test)?;
                out.push(LinearInstr::GotoIf {
                    test,
                    target: LinearLabel::State(*if_true),
                });
                out.jump(*if_false);
            }
            Transition::Switch(s) => {
                let value = out.compile(&s.value)?;
                let mut cases = Vec::with_capacity(s.cases.len());
                for case in &s.cases {
                    let tests = case
                        .test_values
                        .iter()
                        .map(|t| out.compile(t))
                        .collect::<LowerResult<Vec<_>>>()?;
                    cases.push((tests, LinearLabel::State(case.body)));
                }
                out.push(LinearInstr::Switch {
                    value,
                    cases,
                    default: LinearLabel::State(s.default),
                });
            }
            Transition::TryCatch(t) => {
                let reset = out.compile(&Expr::constant(TRY_STATE_NONE))?;
                out.push(LinearInstr::Assign {
                    target: t.try_state.clone(),
                    value: reset,
                });
                out.push(LinearInstr::Label(LinearLabel::TryEntry(source)));

                let (block, exits) = out.take_region(t.region)?;
                let handlers = t
                    .handlers
                    .iter()
                    .map(|h| (h.filter.clone(), h.code))
                    .collect();
                out.push(LinearInstr::TryRegion(Box::new(TryRegion {
                    owner: source,
                    block,
                    try_state: t.try_state.clone(),
                    exception: t.exception.clone(),
                    handlers,
                    catch_all: t.finally.is_some(),
                    exits: exits.clone(),
                })));

                match t.finally {
                    Some(finally) => out.jump(finally),
                    None => {
                        let mut cases: Vec<(i64, LinearLabel)> = t
                            .handlers
                            .iter()
                            .map(|h| (h.code, LinearLabel::State(h.body)))
                            .collect();
                        cases.extend(exits.iter().map(|e| (e.code, e.label)));
                        out.push(LinearInstr::DispatchTryState {
                            try_state: t.try_state.clone(),
                            exception: t.exception.clone(),
                            cases,
                            rethrow_unhandled: false,
                            default: LinearLabel::State(t.join),
                        });
                    }
                }
            }
            Transition::FinallyExit(e) => {
                let cases = out
                    .region_exits(e.region)?
                    .into_iter()
                    .map(|exit| (exit.code, exit.label))
                    .collect();
                out.push(LinearInstr::DispatchTryState {
                    try_state: e.try_state.clone(),
                    exception: e.exception.clone(),
                    cases,
                    rethrow_unhandled: true,
                    default: LinearLabel::State(e.join),
                });
            }
            Transition::Await(a) => {
                let awaitable = out.compile(&a.awaitable)?;
                out.push(LinearInstr::GetAwaiter {
                    awaitable,
                    awaiter: a.awaiter.clone(),
                    binder: a.binder.clone(),
                    configure_await: a.configure_await,
                });
                out.push(LinearInstr::GotoIfCompleted {
                    awaiter: a.awaiter.clone(),
                    binder: a.binder.clone(),
                    target: LinearLabel::State(a.completion),
                });
                out.push(LinearInstr::SetState(a.completion.resume_id()));
                out.push(LinearInstr::RegisterContinuation {
                    awaiter: a.awaiter.clone(),
                    binder: a.binder.clone(),
                });
                out.push(LinearInstr::Suspend(SuspendKind::Await));
            }
            Transition::AwaitResult(a) => {
                out.push(LinearInstr::GetResult {
                    awaiter: a.awaiter.clone(),
                    binder: a.binder.clone(),
                    target: a.result.clone(),
                });
                out.jump(a.target);
            }
            Transition::YieldReturn { value, resume } => {
                let value = out.compile(value)?;
                out.push(LinearInstr::SetCurrent(value));
                out.push(LinearInstr::SetState(resume.resume_id()));
                out.push(LinearInstr::Suspend(SuspendKind::Yield));
            }
            Transition::YieldBreak => out.push(LinearInstr::YieldBreak),
            Transition::Final { value } => {
                let value = match value {
                    Some(value) => Some(out.compile(value)?),
                    None => None,
                };
                out.push(LinearInstr::Return(value));
            }
        }
        Ok(())
    }

    /// One-line description for dumps
    pub fn describe(&self) -> String {
        match self {
            Transition::Goto { target } => format!("goto {}", target),
            Transition::Conditional {
                test,
                if_true,
                if_false,
            } => format!("if ({}) {} else {}", test, if_true, if_false),
            Transition::Switch(s) => {
                let arms: Vec<String> = s
                    .cases
                    .iter()
                    .map(|c| {
                        let tests: Vec<String> =
                            c.test_values.iter().map(|t| t.to_string()).collect();
                        format!("{} => {}", tests.join(" | "), c.body)
                    })
                    .collect();
                format!(
                    "switch ({}) {{ {}; default => {} }}",
                    s.value,
                    arms.join("; "),
                    s.default
                )
            }
            Transition::Loop { body } => format!("loop {}", body),
            Transition::TryCatch(t) => {
                let mut text = format!("try {}", t.body);
                for h in &t.handlers {
                    let filter = match &h.filter {
                        CatchFilter::Any => "*".to_string(),
                        CatchFilter::Kind(kind) => kind.clone(),
                    };
                    text.push_str(&format!(" catch({}) #{} {}", filter, h.code, h.body));
                }
                if let Some(f) = t.finally {
                    text.push_str(&format!(" finally {}", f));
                }
                text.push_str(&format!(" join {}", t.join));
                text
            }
            Transition::FinallyExit(e) => format!("end finally ({}) join {}", e.try_state, e.join),
            Transition::Await(a) => format!(
                "await<{}> {} -> {} resume {}",
                a.binder.type_name(),
                a.awaitable,
                a.awaiter,
                a.completion
            ),
            Transition::AwaitResult(a) => match &a.result {
                Some(result) => format!("{} = result({}); goto {}", result, a.awaiter, a.target),
                None => format!("result({}); goto {}", a.awaiter, a.target),
            },
            Transition::YieldReturn { value, resume } => {
                format!("yield return {} resume {}", value, resume)
            }
            Transition::YieldBreak => "yield break".to_string(),
            Transition::Final { value: Some(v) } => format!("return {}", v),
            Transition::Final { value: None } => "return".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_references_and_remap() {
        let mut t = Transition::Conditional {
            test: Expr::constant(true),
            if_true: StateId(1),
            if_false: StateId(2),
        };
        assert_eq!(t.references(), vec![StateId(1), StateId(2)]);
        t.for_each_reference_mut(|id| id.0 += 10);
        assert_eq!(t.references(), vec![StateId(11), StateId(12)]);
        assert_eq!(t.fallthrough(), Some(StateId(12)));
    }

    #[test]
    fn test_resume_targets() {
        let y = Transition::YieldReturn {
            value: Expr::constant(1i64),
            resume: StateId(4),
        };
        assert_eq!(y.resume_target(), Some(StateId(4)));
        assert_eq!(y.fallthrough(), None);
        assert_eq!(y.layout_hint(), Some(StateId(4)));
        assert!(Transition::YieldBreak.references().is_empty());
    }
}
