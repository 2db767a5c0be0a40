//! Dispatch assembler
//!
//! Turns an optimized state graph into the linear resumable form. Each
//! region becomes a block: a jump table on the durable state field, then its
//! states in emission order. Regions are rendered deepest first so a parent
//! can embed its children as `TryRegion` instructions.
//!
//! Jump tables only route resume ids into their own block. A resume point
//! inside a nested region is routed to the re-entry label of the try that
//! owns the child region on the path; the state value is kept so the child's
//! table finishes the dispatch. Jumps out of a region become exit codes in
//! the region's try-state variable and are routed by the dispatch that
//! follows the region in its parent.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use super::binder::BinderRegistry;
use super::error::{LowerError, LowerResult};
use super::graph::{ScopeId, State, StateGraph, StateId};
use super::linear::{
    CompiledExpr, JumpEntry, JumpTable, LabelSlot, LinearBlock, LinearBody, LinearInstr,
    LinearLabel, RegionExit,
};
use super::transition::Transition;
use crate::options::EngineOptions;
use crate::tree::{Expr, LabelId};
use crate::vm::interpreter::reduced::ReducedTree;

/// Assemble the linear form of an optimized graph
pub fn assemble(
    graph: &StateGraph,
    binders: &BinderRegistry,
    options: &EngineOptions,
) -> LowerResult<LinearBody> {
    let mut assembler = Assembler {
        graph,
        binders,
        options,
        blocks: FxHashMap::default(),
        exits: FxHashMap::default(),
    };

    let mut regions: Vec<ScopeId> = graph
        .regions()
        .into_iter()
        .filter(|region| assembler.is_live_region(*region))
        .collect();
    regions.sort_by_key(|region| std::cmp::Reverse(graph.region_depth(*region)));
    for region in regions {
        assembler.render_region(region)?;
    }

    let top = graph.top();
    let entry = assembler
        .blocks
        .remove(&top)
        .ok_or_else(|| LowerError::DanglingTarget {
            from: graph.name.clone(),
            to: "<top block>".to_string(),
        })?;

    let labels = graph
        .labels
        .iter()
        .filter(|(_, binding)| !graph.state(binding.state).pruned)
        .map(|(id, binding)| {
            (
                *id,
                LabelSlot {
                    label: LinearLabel::State(binding.state),
                    variable: binding.variable.clone(),
                },
            )
        })
        .collect();

    let body = LinearBody {
        name: graph.name.clone(),
        kind: graph.kind,
        params: graph.params.clone(),
        variables: graph.variables.clone(),
        entry,
        labels,
        resume_points: graph
            .resume_states()
            .into_iter()
            .map(StateId::resume_id)
            .collect(),
    };

    debug!(
        target: "stepwise::assemble",
        lambda = %body.name,
        instructions = body.instruction_count(),
        resume_points = body.resume_points.len(),
        "assembled linear body"
    );
    Ok(body)
}

struct Assembler<'a> {
    graph: &'a StateGraph,
    binders: &'a BinderRegistry,
    options: &'a EngineOptions,
    blocks: FxHashMap<ScopeId, LinearBlock>,
    exits: FxHashMap<ScopeId, Vec<RegionExit>>,
}

impl Assembler<'_> {
    fn is_live_region(&self, region: ScopeId) -> bool {
        if region == self.graph.top() {
            return true;
        }
        match self.graph.scope(region).owner {
            Some(owner) => {
                !self.graph.state(owner).pruned && self.graph.region_entry(region).is_some()
            }
            None => false,
        }
    }

    fn render_region(&mut self, region: ScopeId) -> LowerResult<()> {
        let nodes = self.graph.region_nodes(region);
        let mut emitter = BlockEmitter {
            binders: self.binders,
            region,
            instrs: Vec::new(),
            next: None,
            elide: self.options.fallthrough_elision,
            blocks: &mut self.blocks,
            exits: &self.exits,
            escapes: Vec::new(),
        };
        for (index, id) in nodes.iter().enumerate() {
            emitter.next = nodes.get(index + 1).copied();
            emit_state(&mut emitter, self.graph.state(*id))?;
        }
        let BlockEmitter {
            instrs, escapes, ..
        } = emitter;

        let positions: FxHashMap<LinearLabel, usize> = instrs
            .iter()
            .enumerate()
            .filter_map(|(index, instr)| match instr {
                LinearInstr::Label(label) => Some((*label, index)),
                _ => None,
            })
            .collect();

        let exits = self.collect_exits(region, &instrs, &positions, &escapes)?;
        let table = self.jump_table(region);
        trace!(
            target: "stepwise::assemble",
            region = region.0,
            states = nodes.len(),
            table = table.len(),
            exits = exits.len(),
            "rendered region"
        );

        self.blocks.insert(
            region,
            LinearBlock {
                region,
                table,
                instrs,
                positions,
            },
        );
        self.exits.insert(region, exits);
        Ok(())
    }

    /// Labels jumped to from this block that live in an enclosing region
    fn collect_exits(
        &self,
        region: ScopeId,
        instrs: &[LinearInstr],
        positions: &FxHashMap<LinearLabel, usize>,
        escapes: &[LabelId],
    ) -> LowerResult<Vec<RegionExit>> {
        let mut targets: Vec<(LinearLabel, String)> = Vec::new();
        let mut note = |label: LinearLabel, name: String| {
            if !positions.contains_key(&label) && !targets.iter().any(|(l, _)| *l == label) {
                targets.push((label, name));
            }
        };

        for instr in instrs {
            for label in jump_targets(instr) {
                note(label, label.to_string());
            }
        }
        for label in escapes {
            let name = format!("L{}", label.0);
            let binding = self
                .graph
                .labels
                .get(label)
                .ok_or_else(|| LowerError::JumpIntoExpression {
                    label: name.clone(),
                })?;
            note(LinearLabel::State(binding.state), name);
        }

        let base = self.handler_count(region) as i64 + 1;
        let mut exits = Vec::with_capacity(targets.len());
        for (index, (label, name)) in targets.into_iter().enumerate() {
            let LinearLabel::State(state) = label else {
                return Err(LowerError::DanglingTarget {
                    from: format!("region {}", region.0),
                    to: name,
                });
            };
            let target = self.graph.state(state);
            if target.pruned || target.region == region {
                return Err(LowerError::DanglingTarget {
                    from: format!("region {}", region.0),
                    to: name,
                });
            }
            if !self.graph.region_encloses(target.region, region) {
                return Err(LowerError::JumpIntoTry { label: name });
            }
            exits.push(RegionExit {
                code: base + index as i64,
                label,
            });
        }
        Ok(exits)
    }

    fn handler_count(&self, region: ScopeId) -> usize {
        let Some(owner) = self.graph.scope(region).owner else {
            return 0;
        };
        match &self.graph.state(owner).transition {
            Some(Transition::TryCatch(t)) => t.handlers.len(),
            _ => 0,
        }
    }

    fn jump_table(&self, region: ScopeId) -> JumpTable {
        let mut entries = Vec::new();
        for id in self.graph.resume_states() {
            let state = self.graph.state(id);
            if state.region == region {
                entries.push(JumpEntry {
                    state: id.resume_id(),
                    label: LinearLabel::State(id),
                    nested: false,
                });
            } else if self.graph.region_encloses(region, state.region) {
                let mut child = state.region;
                while let Some(parent) = self.graph.parent_region(child) {
                    if parent == region {
                        break;
                    }
                    child = parent;
                }
                if let Some(owner) = self.graph.scope(child).owner {
                    entries.push(JumpEntry {
                        state: id.resume_id(),
                        label: LinearLabel::TryEntry(owner),
                        nested: true,
                    });
                }
            }
        }
        JumpTable { entries }
    }
}

fn emit_state(out: &mut BlockEmitter<'_>, state: &State) -> LowerResult<()> {
    out.push(LinearInstr::Label(LinearLabel::State(state.id)));
    for expr in &state.expressions {
        let expr = out.compile(expr)?;
        out.push(LinearInstr::Eval(expr));
    }
    if let Some(result) = &state.result {
        let value = out.compile(&result.value)?;
        out.push(LinearInstr::Assign {
            target: result.variable.clone(),
            value,
        });
    }
    match &state.transition {
        Some(transition) => transition.render(state.id, out),
        None => Err(LowerError::DanglingTarget {
            from: state.id.to_string(),
            to: "<no transition>".to_string(),
        }),
    }
}

/// Labels an instruction may jump to
fn jump_targets(instr: &LinearInstr) -> Vec<LinearLabel> {
    match instr {
        LinearInstr::Goto(label) => vec![*label],
        LinearInstr::GotoIf { target, .. } | LinearInstr::GotoIfCompleted { target, .. } => {
            vec![*target]
        }
        LinearInstr::Switch { cases, default, .. } => cases
            .iter()
            .map(|(_, label)| *label)
            .chain(std::iter::once(*default))
            .collect(),
        LinearInstr::DispatchTryState { cases, default, .. } => cases
            .iter()
            .map(|(_, label)| *label)
            .chain(std::iter::once(*default))
            .collect(),
        _ => Vec::new(),
    }
}

/// Instruction sink for one region, handed to `Transition::render`
pub struct BlockEmitter<'a> {
    binders: &'a BinderRegistry,
    region: ScopeId,
    instrs: Vec<LinearInstr>,
    next: Option<StateId>,
    elide: bool,
    blocks: &'a mut FxHashMap<ScopeId, LinearBlock>,
    exits: &'a FxHashMap<ScopeId, Vec<RegionExit>>,
    escapes: Vec<LabelId>,
}

impl BlockEmitter<'_> {
    /// Append an instruction
    pub fn push(&mut self, instr: LinearInstr) {
        self.instrs.push(instr);
    }

    /// Jump to a state, omitted when the state is emitted next
    pub fn jump(&mut self, target: StateId) {
        if self.elide && self.next == Some(target) {
            return;
        }
        self.push(LinearInstr::Goto(LinearLabel::State(target)));
    }

    /// Prepare an expression for evaluation
    pub fn compile(&mut self, expr: &Expr) -> LowerResult<CompiledExpr> {
        let tree = ReducedTree::build(expr, self.binders, true)?;
        for label in tree.escapes() {
            if !self.escapes.contains(label) {
                self.escapes.push(*label);
            }
        }
        Ok(CompiledExpr {
            source: expr.clone(),
            tree: Arc::new(tree),
        })
    }

    /// Take the rendered block of a child region along with its exits
    pub fn take_region(&mut self, region: ScopeId) -> LowerResult<(LinearBlock, Vec<RegionExit>)> {
        let block = self
            .blocks
            .remove(&region)
            .ok_or_else(|| self.missing_region(region))?;
        Ok((block, self.region_exits(region)?))
    }

    /// Exits of a rendered child region
    pub fn region_exits(&self, region: ScopeId) -> LowerResult<Vec<RegionExit>> {
        self.exits
            .get(&region)
            .cloned()
            .ok_or_else(|| self.missing_region(region))
    }

    fn missing_region(&self, region: ScopeId) -> LowerError {
        LowerError::DanglingTarget {
            from: format!("region {}", self.region.0),
            to: format!("region {}", region.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::lower::lower_lambda;
    use crate::compiler::optimize::optimize;
    use crate::tree::{CatchBlock, LabelTarget, LambdaExpr};

    fn build(lambda: &LambdaExpr, options: &EngineOptions) -> LowerResult<LinearBody> {
        let binders = BinderRegistry::new();
        let mut graph = lower_lambda(lambda, &binders)?;
        optimize(&mut graph, options);
        assemble(&graph, &binders, options)
    }

    fn try_regions(block: &LinearBlock) -> Vec<&super::super::linear::TryRegion> {
        block
            .instrs
            .iter()
            .filter_map(|instr| match instr {
                LinearInstr::TryRegion(region) => Some(region.as_ref()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_jump_table_lists_resume_points() {
        let lambda = LambdaExpr::asynchronous(
            vec![],
            Expr::seq(vec![
                Expr::await_task(Expr::call("A", vec![])),
                Expr::await_task(Expr::call("B", vec![])),
            ]),
        );
        let body = build(&lambda, &EngineOptions::default()).unwrap();
        assert_eq!(body.entry.table.len(), 2);
        assert!(body.entry.table.entries.iter().all(|e| !e.nested));
        assert_eq!(body.resume_points.len(), 2);
    }

    #[test]
    fn test_nested_resume_routes_through_try_entry() {
        let lambda = LambdaExpr::asynchronous(
            vec![],
            Expr::try_finally(
                Expr::await_task(Expr::call("A", vec![])),
                Expr::call("cleanup", vec![]),
            ),
        );
        let body = build(&lambda, &EngineOptions::default()).unwrap();
        let entry = &body.entry.table.entries[0];
        assert!(entry.nested);
        assert!(matches!(entry.label, LinearLabel::TryEntry(_)));
        assert!(body.entry.position(entry.label).is_some());

        let regions = try_regions(&body.entry);
        assert_eq!(regions.len(), 1);
        let inner = &regions[0].block.table.entries[0];
        assert!(!inner.nested);
        assert_eq!(inner.state, entry.state);
    }

    #[test]
    fn test_goto_out_of_try_becomes_exit_code() {
        let out = LabelTarget::named(0, "out");
        let e = crate::tree::Var::new(1, "e");
        let lambda = LambdaExpr::asynchronous(
            vec![],
            Expr::seq(vec![
                Expr::try_catch(
                    Expr::seq(vec![
                        Expr::await_task(Expr::call("A", vec![])),
                        Expr::goto(&out),
                    ]),
                    vec![CatchBlock::any(Some(e), Expr::unit())],
                ),
                Expr::call("skipped", vec![]),
                Expr::label(&out, None),
            ]),
        );
        let body = build(&lambda, &EngineOptions::default()).unwrap();
        let region = try_regions(&body.entry)[0];
        // the join after the try and the `out` label; code 1 belongs to the handler
        let codes: Vec<i64> = region.exits.iter().map(|e| e.code).collect();
        assert_eq!(codes, vec![2, 3]);
        let landing = body.labels[&out.id].label;
        assert_eq!(region.exit_code(landing), Some(3));
    }

    #[test]
    fn test_jump_into_try_is_rejected() {
        let inside = LabelTarget::named(0, "inside");
        let lambda = LambdaExpr::asynchronous(
            vec![],
            Expr::seq(vec![
                Expr::goto(&inside),
                Expr::try_finally(
                    Expr::seq(vec![
                        Expr::await_task(Expr::call("A", vec![])),
                        Expr::label(&inside, None),
                    ]),
                    Expr::unit(),
                ),
            ]),
        );
        assert!(matches!(
            build(&lambda, &EngineOptions::default()),
            Err(LowerError::JumpIntoTry { .. })
        ));
    }

    #[test]
    fn test_fallthrough_elision() {
        let lambda = LambdaExpr::asynchronous(
            vec![],
            Expr::seq(vec![
                Expr::await_task(Expr::call("A", vec![])),
                Expr::call("after", vec![]),
            ]),
        );
        let gotos = |body: &LinearBody| {
            body.entry
                .instrs
                .iter()
                .filter(|i| matches!(i, LinearInstr::Goto(_)))
                .count()
        };
        let elided = build(&lambda, &EngineOptions::default()).unwrap();
        let explicit = build(
            &lambda,
            &EngineOptions {
                fallthrough_elision: false,
                ..EngineOptions::default()
            },
        )
        .unwrap();
        assert!(gotos(&elided) < gotos(&explicit));
    }
}
