//! The path search engine every reachability predicate is built on.
//!
//! A search walks one edge family ([`GraphToFollow`]) from a start node,
//! consults a caller supplied stop predicate at every node (including the
//! start) and records how each explored path ended as a [`SearchPath`]. The
//! resulting [`SearchResult`] is what the predicates in
//! [`reach`](crate::algo::reach) fold into a [`QueryTree`](crate::QueryTree).
//!
//! The traversal is a depth first search over [`PathState`]s. A state that
//! was already reached is never expanded a second time, whether we come back
//! to it around a cycle or through a join, which bounds the work by the
//! number of distinct states. Paths are kept as a tree of frames with parent
//! pointers and only materialized when a path ends.
//!
//! Skipping revisited states is only sound if the revisited state leads
//! somewhere. After an exhaustive search every revisit whose target cannot
//! reach any final outcome (the value circles forever without being
//! consumed) is reclassified as [`PathOutcome::Cycle`], which fails must
//! queries.

use cpg_facade::{Direction, GraphToFollow, GraphView, HashMap, NodeId, SearchDirection};
use serde::{Deserialize, Serialize};

use super::sensitivity::{PathState, Policies, Sensitivities, Sensitivity};
use crate::QueryError;

/// What the stop predicate decided for a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StopDecision {
    /// Not a target, keep exploring past this node.
    Continue,
    /// The path ends here and fulfills the requirement.
    Satisfied,
    /// The path ends here and is discarded. It neither fulfills nor violates
    /// the requirement.
    Rejected,
}

impl From<bool> for StopDecision {
    fn from(value: bool) -> Self {
        if value {
            StopDecision::Satisfied
        } else {
            StopDecision::Continue
        }
    }
}

/// How an explored path ended.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, strum::AsRefStr, strum::EnumIs,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PathOutcome {
    /// The stop predicate was satisfied at the last node.
    Satisfied,
    /// The last node has no admissible successor.
    Failed,
    /// The stop predicate or the early termination predicate discarded the
    /// last node.
    Rejected,
    /// The last node was already reached on another (or the same) path.
    Revisit,
    /// Like [`Self::Revisit`], but no path from the revisited state ever
    /// ends. The value is trapped in a loop and never reaches a target.
    Cycle,
    /// The interprocedural budget ran out before the last edge could be
    /// taken.
    Truncated,
}

/// How far a search may cross function boundaries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisScope {
    /// Never take an edge that crosses a call or return.
    Intraprocedural,
    /// Take at most `max_steps` call or return edges, counted over the whole
    /// search.
    Interprocedural {
        /// Remaining budget at the start of the search
        max_steps: u32,
    },
}

impl Default for AnalysisScope {
    fn default() -> Self {
        AnalysisScope::Interprocedural { max_steps: 16 }
    }
}

impl AnalysisScope {
    fn budget(self) -> Option<u32> {
        match self {
            AnalysisScope::Intraprocedural => None,
            AnalysisScope::Interprocedural { max_steps } => Some(max_steps),
        }
    }
}

/// Everything that parameterizes a single search.
#[derive(Clone, Copy, Debug)]
pub struct SearchParams {
    /// Which edges to walk
    pub graph: GraphToFollow,
    /// In which orientation
    pub direction: SearchDirection,
    /// How far to cross function boundaries
    pub scope: AnalysisScope,
    /// Precision policies
    pub sensitivities: Sensitivities,
    /// Keep exploring after the first satisfied path
    pub find_all: bool,
    /// Also branch into nodes that received copies of a value. Only
    /// consulted when walking forward.
    pub follow_value_copies: bool,
    /// Bound of the field stack under [`Sensitivity::FieldSensitive`]
    pub max_field_depth: usize,
    /// Bound of the call stack under [`Sensitivity::ContextSensitive`]
    pub max_context_depth: usize,
}

impl SearchParams {
    /// Exhaustive forward data flow search with the given scope and no
    /// sensitivities.
    pub fn new(graph: GraphToFollow, scope: AnalysisScope) -> Self {
        Self {
            graph,
            direction: SearchDirection::Forward,
            scope,
            sensitivities: Sensitivities::empty(),
            find_all: true,
            follow_value_copies: false,
            max_field_depth: 8,
            max_context_depth: 8,
        }
    }

    fn policies(&self) -> Policies {
        Policies {
            sensitivities: self.sensitivities,
            max_field_depth: self.max_field_depth,
            max_context_depth: self.max_context_depth,
        }
    }
}

/// One explored path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SearchPath {
    /// Nodes from the start node to the last node, in traversal order
    pub nodes: Vec<NodeId>,
    /// How the path ended
    pub outcome: PathOutcome,
}

impl SearchPath {
    /// The node the path ended at.
    pub fn end(&self) -> Option<NodeId> {
        self.nodes.last().copied()
    }
}

/// The outcome of a search.
#[derive(Clone, Debug, Default, Serialize)]
pub struct SearchResult {
    /// Did at least one path end [`PathOutcome::Satisfied`]?
    pub matched: bool,
    /// Every explored path, in the order it ended
    pub paths: Vec<SearchPath>,
    /// Did the interprocedural budget cut off any path?
    pub truncated: bool,
    /// Number of distinct states that were reached
    pub visited_states: usize,
    /// How many boundary crossings were spent from the budget
    pub steps_used: u32,
}

impl SearchResult {
    /// Paths with the given outcome.
    pub fn paths_with(&self, outcome: PathOutcome) -> impl Iterator<Item = &SearchPath> {
        self.paths.iter().filter(move |p| p.outcome == outcome)
    }

    /// How many paths ended with this outcome?
    pub fn count(&self, outcome: PathOutcome) -> usize {
        self.paths_with(outcome).count()
    }

    /// The "every path" reading of this result: at least one path is
    /// satisfied and no path failed, got trapped in a cycle or was cut off by
    /// the budget.
    pub fn holds_on_all_paths(&self) -> bool {
        self.matched
            && self.count(PathOutcome::Failed) == 0
            && self.count(PathOutcome::Cycle) == 0
            && !self.truncated
    }
}

/// Make sure a search can be answered before running it.
pub(crate) fn check_preconditions<G: GraphView + ?Sized>(
    graph: &G,
    start: NodeId,
    params: &SearchParams,
    query: &'static str,
) -> Result<(), QueryError> {
    if !graph.contains(start) {
        return Err(QueryError::UnknownNode(start));
    }
    if !graph.provides(params.graph) {
        return Err(QueryError::MissingEdges {
            graph: params.graph,
            query,
        });
    }
    if params.graph.is_control_flow_order() {
        for s in [Sensitivity::FieldSensitive, Sensitivity::TrackImplicitFlows] {
            if params.sensitivities.contains(s) {
                return Err(QueryError::IncompatibleSensitivity {
                    sensitivity: s,
                    graph: params.graph,
                });
            }
        }
    }
    if params.max_field_depth == 0 || params.max_context_depth == 0 {
        return Err(QueryError::InvalidConfig(
            "stack depth bounds must be at least 1".to_owned(),
        ));
    }
    Ok(())
}

struct Frame {
    state: PathState,
    parent: Option<usize>,
    /// Some path has a final outcome at this frame
    ended: bool,
}

/// A [`PathOutcome::Revisit`] path, kept for reclassification.
struct RevisitEdge {
    path: usize,
    from: usize,
    target: usize,
}

/// A candidate successor of an expanded state.
struct Step {
    state: PathState,
    crosses_boundary: bool,
}

struct Search<'g, G: ?Sized> {
    graph: &'g G,
    params: SearchParams,
    policies: Policies,
    frames: Vec<Frame>,
    /// Maps each reached state to its frame
    visited: HashMap<PathState, usize>,
    revisits: Vec<RevisitEdge>,
    remaining: Option<u32>,
    result: SearchResult,
}

/// Run a search from `start`.
///
/// `stop` is consulted for every reached node, the start node included. For
/// a node where `early_termination` returns `true` the path is discarded as
/// [`PathOutcome::Rejected`] without consulting `stop`.
///
/// Returns an error (before exploring anything) if `start` is not in the
/// graph, the graph has no edges of the requested family or a sensitivity
/// does not apply to that family.
pub fn search<G, D>(
    graph: &G,
    start: NodeId,
    params: &SearchParams,
    stop: impl FnMut(NodeId) -> D,
    early_termination: impl FnMut(NodeId) -> bool,
) -> Result<SearchResult, QueryError>
where
    G: GraphView + ?Sized,
    D: Into<StopDecision>,
{
    check_preconditions(graph, start, params, "search")?;
    Ok(search_unchecked(
        graph,
        start,
        params,
        stop,
        early_termination,
    ))
}

/// [`search`] for callers that already ran [`check_preconditions`].
pub(crate) fn search_unchecked<G, D>(
    graph: &G,
    start: NodeId,
    params: &SearchParams,
    mut stop: impl FnMut(NodeId) -> D,
    mut early_termination: impl FnMut(NodeId) -> bool,
) -> SearchResult
where
    G: GraphView + ?Sized,
    D: Into<StopDecision>,
{
    let mut search = Search {
        graph,
        params: *params,
        policies: params.policies(),
        frames: vec![],
        visited: HashMap::new(),
        revisits: vec![],
        remaining: params.scope.budget(),
        result: SearchResult::default(),
    };
    search.run(
        start,
        &mut |n| -> StopDecision { stop(n).into() },
        &mut early_termination,
    );
    log::debug!(
        "Search from {start} over {} edges: {} paths, matched: {}, truncated: {}, {} states",
        params.graph.as_ref(),
        search.result.paths.len(),
        search.result.matched,
        search.result.truncated,
        search.result.visited_states,
    );
    search.result
}

impl<'g, G: GraphView + ?Sized> Search<'g, G> {
    fn run(
        &mut self,
        start: NodeId,
        stop: &mut dyn FnMut(NodeId) -> StopDecision,
        early_termination: &mut dyn FnMut(NodeId) -> bool,
    ) {
        let initial = PathState::start(start);
        self.visited.insert(initial.clone(), 0);
        self.frames.push(Frame {
            state: initial,
            parent: None,
            ended: false,
        });
        let mut stack = vec![0];
        let mut exhaustive = true;

        while let Some(idx) = stack.pop() {
            let node = self.frames[idx].state.node;
            if early_termination(node) {
                self.finish(idx, None, PathOutcome::Rejected);
                continue;
            }
            match stop(node) {
                StopDecision::Satisfied => {
                    self.result.matched = true;
                    self.finish(idx, None, PathOutcome::Satisfied);
                    if !self.params.find_all {
                        exhaustive = false;
                        break;
                    }
                    continue;
                }
                StopDecision::Rejected => {
                    self.finish(idx, None, PathOutcome::Rejected);
                    continue;
                }
                StopDecision::Continue => (),
            }

            let steps = self.expand(idx);
            if steps.is_empty() {
                self.finish(idx, None, PathOutcome::Failed);
                continue;
            }
            let first_new = self.frames.len();
            for step in steps {
                if let Some(&target) = self.visited.get(&step.state) {
                    self.revisits.push(RevisitEdge {
                        path: self.result.paths.len(),
                        from: idx,
                        target,
                    });
                    self.finish(idx, Some(step.state.node), PathOutcome::Revisit);
                    continue;
                }
                if step.crosses_boundary {
                    match &mut self.remaining {
                        Some(0) => {
                            self.result.truncated = true;
                            self.finish(idx, Some(step.state.node), PathOutcome::Truncated);
                            continue;
                        }
                        Some(budget) => {
                            *budget -= 1;
                            self.result.steps_used += 1;
                        }
                        None => (),
                    }
                }
                self.visited.insert(step.state.clone(), self.frames.len());
                self.frames.push(Frame {
                    state: step.state,
                    parent: Some(idx),
                    ended: false,
                });
            }
            // Reversed so the first neighbor is explored first
            stack.extend((first_new..self.frames.len()).rev());
        }
        if exhaustive {
            self.close_cycles();
        }
        self.result.visited_states = self.visited.len();
    }

    /// Reclassify revisits into states from which no path ever ends.
    ///
    /// A frame "ends" if a path has a final outcome at it, one of its
    /// children ends or it revisits a frame that ends. Propagated to a fixed
    /// point because revisit edges can point anywhere in the frame tree.
    fn close_cycles(&mut self) {
        if self.revisits.is_empty() {
            return;
        }
        let mut ends = self.frames.iter().map(|f| f.ended).collect::<Vec<_>>();
        let mut changed = true;
        while changed {
            changed = false;
            // Children always have larger indices than their parents
            for i in (1..self.frames.len()).rev() {
                if let Some(parent) = self.frames[i].parent {
                    if ends[i] && !ends[parent] {
                        ends[parent] = true;
                        changed = true;
                    }
                }
            }
            for r in &self.revisits {
                if ends[r.target] && !ends[r.from] {
                    ends[r.from] = true;
                    changed = true;
                }
            }
        }
        for r in &self.revisits {
            if !ends[r.target] {
                self.result.paths[r.path].outcome = PathOutcome::Cycle;
            }
        }
    }

    /// All admissible successors of a frame, in adjacency order.
    fn expand(&self, idx: usize) -> Vec<Step> {
        let state = &self.frames[idx].state;
        let node = state.node;
        let intraprocedural = self.params.scope == AnalysisScope::Intraprocedural;
        let implicit = self.params.graph.is_data_flow()
            && self
                .params
                .sensitivities
                .contains(Sensitivity::TrackImplicitFlows);
        let mut steps = vec![];
        for &direction in self.params.direction.directions() {
            let mut edges = self.params.graph.neighbors(self.graph, node, direction);
            if implicit {
                edges.extend(self.graph.control_dependence_neighbors(node, direction));
            }
            if self.params.follow_value_copies && direction == Direction::Outgoing {
                edges.extend(self.graph.value_copies(node));
            }
            for edge in edges {
                let crosses_boundary = edge.info.crosses_boundary();
                if crosses_boundary && intraprocedural {
                    continue;
                }
                if let Some(next) = self.policies.step(state, &edge.info, edge.target, direction) {
                    steps.push(Step {
                        state: next,
                        crosses_boundary,
                    });
                }
            }
        }
        steps
    }

    /// Record the path that leads to frame `idx`, optionally extended by one
    /// more node that was not given a frame of its own.
    fn finish(&mut self, idx: usize, extra: Option<NodeId>, outcome: PathOutcome) {
        if outcome != PathOutcome::Revisit {
            self.frames[idx].ended = true;
        }
        let mut nodes = extra.into_iter().collect::<Vec<_>>();
        let mut cur = Some(idx);
        while let Some(i) = cur {
            nodes.push(self.frames[i].state.node);
            cur = self.frames[i].parent;
        }
        nodes.reverse();
        self.result.paths.push(SearchPath { nodes, outcome });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpg_facade::{CallBoundary, NodeKind, ProgramGraph};

    fn params() -> SearchParams {
        SearchParams::new(GraphToFollow::DataFlow, AnalysisScope::default())
    }

    #[test]
    fn stop_is_consulted_at_the_start() {
        let mut g = ProgramGraph::new();
        let a = g.add_named("a", NodeKind::Variable);
        let b = g.add_named("b", NodeKind::Variable);
        g.add_data_flow(a, b);
        let res = search(&g, a, &params(), |n| n == a, |_| false).unwrap();
        assert!(res.matched);
        assert_eq!(res.paths.len(), 1);
        assert_eq!(res.paths[0].nodes, vec![a]);
    }

    #[test]
    fn diamond_is_explored_once() {
        let mut g = ProgramGraph::new();
        let [a, b, c, d] = ["a", "b", "c", "d"].map(|n| g.add_named(n, NodeKind::Variable));
        g.add_data_flow(a, b);
        g.add_data_flow(a, c);
        g.add_data_flow(b, d);
        g.add_data_flow(c, d);
        let res = search(&g, a, &params(), |_| false, |_| false).unwrap();
        assert_eq!(res.visited_states, 4);
        assert_eq!(res.count(PathOutcome::Failed), 1);
        assert_eq!(res.count(PathOutcome::Revisit), 1);
        let failed = res.paths_with(PathOutcome::Failed).next().unwrap();
        assert_eq!(failed.nodes, vec![a, b, d]);
    }

    #[test]
    fn early_termination_wins_over_stop() {
        let mut g = ProgramGraph::new();
        let a = g.add_named("a", NodeKind::Variable);
        let b = g.add_named("b", NodeKind::Variable);
        g.add_data_flow(a, b);
        let res = search(&g, a, &params(), |n| n == b, |n| n == b).unwrap();
        assert!(!res.matched);
        assert_eq!(res.count(PathOutcome::Rejected), 1);
    }

    #[test]
    fn first_match_stops_the_search() {
        let mut g = ProgramGraph::new();
        let [a, b, c] = ["a", "b", "c"].map(|n| g.add_named(n, NodeKind::Variable));
        g.add_data_flow(a, b);
        g.add_data_flow(a, c);
        let mut p = params();
        p.find_all = false;
        let res = search(&g, a, &p, |n| n != a, |_| false).unwrap();
        assert_eq!(res.paths.len(), 1);
        assert_eq!(res.paths[0].nodes, vec![a, b]);
        p.find_all = true;
        let res = search(&g, a, &p, |n| n != a, |_| false).unwrap();
        assert_eq!(res.count(PathOutcome::Satisfied), 2);
    }

    #[test]
    fn budget_is_shared_and_exhaustion_truncates() {
        let mut g = ProgramGraph::new();
        let [a, b, c] = ["a", "b", "c"].map(|n| g.add_named(n, NodeKind::Variable));
        let cs = g.add_named("call", NodeKind::Call);
        g.add_boundary_flow(a, b, CallBoundary::Call(cs));
        g.add_boundary_flow(b, c, CallBoundary::Call(cs));
        let mut p = params();
        p.scope = AnalysisScope::Interprocedural { max_steps: 1 };
        let res = search(&g, a, &p, |n| n == c, |_| false).unwrap();
        assert!(!res.matched);
        assert!(res.truncated);
        assert_eq!(res.steps_used, 1);
        assert_eq!(res.paths[0].outcome, PathOutcome::Truncated);
        assert_eq!(res.paths[0].nodes, vec![a, b, c]);

        p.scope = AnalysisScope::Intraprocedural;
        let res = search(&g, a, &p, |n| n == c, |_| false).unwrap();
        assert!(!res.truncated);
        assert_eq!(res.paths[0].outcome, PathOutcome::Failed);
        assert_eq!(res.paths[0].nodes, vec![a]);
    }

    #[test]
    fn loop_without_exit_is_a_cycle() {
        let mut g = ProgramGraph::new();
        let [a, clear, acc, acc2] =
            ["a", "clear", "acc", "acc2"].map(|n| g.add_named(n, NodeKind::Variable));
        g.add_data_flow(a, clear);
        g.add_data_flow(a, acc);
        g.add_data_flow(acc, acc2);
        g.add_data_flow(acc2, acc);
        let res = search(&g, a, &params(), |n| n == clear, |_| false).unwrap();
        assert!(res.matched);
        assert!(!res.holds_on_all_paths());
        assert_eq!(res.count(PathOutcome::Revisit), 0);
        let cycle = res.paths_with(PathOutcome::Cycle).collect::<Vec<_>>();
        assert_eq!(cycle.len(), 1);
        assert_eq!(cycle[0].nodes, vec![a, acc, acc2, acc]);
    }

    #[test]
    fn loop_with_exit_still_holds() {
        let mut g = ProgramGraph::new();
        let [a, b, sink] = ["a", "b", "sink"].map(|n| g.add_named(n, NodeKind::Variable));
        g.add_data_flow(a, b);
        g.add_data_flow(b, a);
        g.add_data_flow(b, sink);
        let res = search(&g, a, &params(), |n| n == sink, |_| false).unwrap();
        assert!(res.holds_on_all_paths());
        assert_eq!(res.count(PathOutcome::Revisit), 1);
        assert_eq!(res.count(PathOutcome::Cycle), 0);

        // The exit is only known after the inner loop closed
        let mut g = ProgramGraph::new();
        let [a, b, c, sink] = ["a", "b", "c", "sink"].map(|n| g.add_named(n, NodeKind::Variable));
        g.add_data_flow(a, b);
        g.add_data_flow(b, c);
        g.add_data_flow(c, b);
        g.add_data_flow(c, a);
        g.add_data_flow(a, sink);
        let res = search(&g, a, &params(), |n| n == sink, |_| false).unwrap();
        assert!(res.holds_on_all_paths());
        assert_eq!(res.count(PathOutcome::Cycle), 0);
    }

    #[test]
    fn misuse_is_reported_before_searching() {
        let mut g = ProgramGraph::new();
        let a = g.add_named("a", NodeKind::Variable);
        let b = g.add_named("b", NodeKind::Variable);
        g.add_data_flow(a, b);
        assert!(matches!(
            search(&g, NodeId::new(9), &params(), |_| false, |_| false),
            Err(QueryError::UnknownNode(_))
        ));
        let mut eog = SearchParams::new(GraphToFollow::ControlFlowOrder, AnalysisScope::default());
        let mut partial = g.clone();
        partial.omit(GraphToFollow::ControlFlowOrder);
        assert!(matches!(
            search(&partial, a, &eog, |_| false, |_| false),
            Err(QueryError::MissingEdges { .. })
        ));
        // Provided but empty is an ordinary graph
        let res = search(&g, a, &eog, |n| n == b, |_| false).unwrap();
        assert!(!res.matched);
        assert_eq!(res.paths[0].outcome, PathOutcome::Failed);

        eog.sensitivities = Sensitivity::FieldSensitive.into();
        assert!(matches!(
            search(&g, a, &eog, |_| false, |_| false),
            Err(QueryError::IncompatibleSensitivity { .. })
        ));
    }
}
