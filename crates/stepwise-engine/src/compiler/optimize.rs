//! State optimizer
//!
//! Runs between lowering and assembly:
//! - collapses states that do nothing but jump, retargeting every reference
//!   to the end of the no-op chain (chains never cross a region boundary,
//!   and a cycle made only of no-ops keeps one member as a self-loop)
//! - optionally prunes states nothing can reach
//! - assigns the emission order of each region so that a state's
//!   fallthrough successor is placed right after it when possible
//!
//! Every pass depends only on the graph's structure, so optimizing an
//! optimized graph changes nothing.

use std::collections::VecDeque;

use rustc_hash::FxHashSet;
use tracing::debug;

use super::graph::{StateGraph, StateId};
use super::transition::Transition;
use crate::options::EngineOptions;

/// What an optimization run changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OptimizeStats {
    /// No-op states bypassed
    pub collapsed: usize,
    /// Unreachable states removed
    pub pruned: usize,
}

/// Optimize a graph in place
pub fn optimize(graph: &mut StateGraph, options: &EngineOptions) -> OptimizeStats {
    let mut stats = OptimizeStats::default();
    if options.optimize {
        stats.collapsed = collapse_noops(graph);
    }
    if options.prune_unreachable {
        stats.pruned = prune_unreachable(graph);
    }
    layout(graph);

    debug!(
        target: "stepwise::optimize",
        graph = %graph.name,
        collapsed = stats.collapsed,
        pruned = stats.pruned,
        live = graph.live_states(),
        "optimized state graph"
    );
    stats
}

/// Follow the no-op goto chain starting at `id`
fn resolve(graph: &StateGraph, id: StateId, memo: &mut [Option<StateId>]) -> StateId {
    let mut chain = Vec::new();
    let mut cursor = id;
    let end = loop {
        if let Some(end) = memo[cursor.0 as usize] {
            break end;
        }
        if chain.contains(&cursor) {
            break cursor;
        }
        let state = graph.state(cursor);
        match &state.transition {
            Some(Transition::Goto { target })
                if !state.pruned
                    && state.is_noop()
                    && graph.state(*target).region == state.region =>
            {
                chain.push(cursor);
                cursor = *target;
            }
            _ => break cursor,
        }
    };
    for member in chain {
        memo[member.0 as usize] = Some(end);
    }
    memo[id.0 as usize] = Some(end);
    end
}

/// Retarget references past no-op states; returns how many were bypassed
pub fn collapse_noops(graph: &mut StateGraph) -> usize {
    let mut memo = vec![None; graph.states.len()];
    let resolved: Vec<StateId> = (0..graph.states.len())
        .map(|i| resolve(graph, StateId(i as u32), &mut memo))
        .collect();
    let remap = |id: StateId| resolved[id.0 as usize];

    for state in graph.states.iter_mut().filter(|s| !s.pruned) {
        if let Some(transition) = &mut state.transition {
            transition.for_each_reference_mut(|target| *target = remap(*target));
        }
    }
    graph.entry = remap(graph.entry);
    for binding in graph.labels.values_mut() {
        binding.state = remap(binding.state);
    }

    let mut collapsed = 0;
    for state in graph.states.iter_mut() {
        if !state.pruned && resolved[state.id.0 as usize] != state.id {
            state.pruned = true;
            collapsed += 1;
        }
    }
    collapsed
}

/// Remove states unreachable from the entry and label landings
pub fn prune_unreachable(graph: &mut StateGraph) -> usize {
    let mut reachable = vec![false; graph.states.len()];
    let mut queue: VecDeque<StateId> = VecDeque::new();
    queue.push_back(graph.entry);
    queue.extend(graph.labels.values().map(|binding| binding.state));

    while let Some(id) = queue.pop_front() {
        let index = id.0 as usize;
        if reachable[index] || graph.state(id).pruned {
            continue;
        }
        reachable[index] = true;
        if let Some(transition) = &graph.state(id).transition {
            queue.extend(transition.references());
        }
    }

    let mut pruned = 0;
    for state in graph.states.iter_mut() {
        if !state.pruned && !reachable[state.id.0 as usize] {
            state.pruned = true;
            pruned += 1;
        }
    }
    pruned
}

/// Assign emission order within every region
pub fn layout(graph: &mut StateGraph) {
    for region in graph.regions() {
        let Some(start) = graph.region_entry(region) else {
            continue;
        };
        let live: Vec<StateId> = graph
            .scope(region)
            .nodes
            .iter()
            .copied()
            .filter(|id| !graph.state(*id).pruned)
            .collect();
        let members: FxHashSet<StateId> = live.iter().copied().collect();
        let mut placed: FxHashSet<StateId> = FxHashSet::default();
        let mut order = 0u32;
        let mut cursor = Some(start);

        loop {
            let next = cursor
                .filter(|id| members.contains(id) && !placed.contains(id))
                .or_else(|| live.iter().copied().find(|id| !placed.contains(id)));
            let Some(id) = next else {
                break;
            };
            graph.state_mut(id).order = order;
            order += 1;
            placed.insert(id);
            cursor = graph
                .state(id)
                .transition
                .as_ref()
                .and_then(Transition::layout_hint);
        }
    }
}
