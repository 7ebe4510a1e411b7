//! Reachability predicates over the [`Context`].
//!
//! These wrap [`search`](super::search) and fold the [`SearchResult`] into an
//! explainable [`QueryTree`]. The two flavors are
//!
//! - [`AnalysisType::May`]: holds if *some* path reaches a node the predicate
//!   accepts. The search stops at the first such path. Use this for
//!   prohibitions ("a secret may never reach a log call").
//! - [`AnalysisType::Must`]: holds if at least one path reaches an accepted
//!   node and no path dead-ends, loops forever or is cut off before it.
//!   Every path is explored. Use this for obligations ("every secret must be cleared").
//!
//! The evidence children of the returned tree are the satisfied, failed,
//! cycling and truncated paths, in the order they were found. Paths a
//! predicate rejected and paths that ran into already explored states are
//! counted in the explanation but not attached.

use cpg_facade::{GraphToFollow, NodeId, SearchDirection};
use serde::{Deserialize, Serialize};

use super::search::{
    check_preconditions, search_unchecked, AnalysisScope, PathOutcome, SearchParams, SearchPath,
    SearchResult, StopDecision,
};
use super::sensitivity::{Sensitivities, Sensitivity};
use crate::{
    query_tree::{Operator, Value},
    AssumptionKind, Context, QueryError, QueryTree, TraceLevel,
};

/// Existential or universal reachability.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, strum::AsRefStr, strum::EnumIs,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AnalysisType {
    /// At least one path reaches the target.
    May,
    /// Every explored path reaches the target.
    Must,
}

/// How a reachability predicate searches.
///
/// Start from [`Context::flow_query`] to pick up the configured defaults, or
/// from [`FlowQuery::may`]/[`FlowQuery::must`] to ignore them.
///
/// ```
/// use cpg_query::algo::{FlowQuery, Sensitivity};
/// let q = FlowQuery::must()
///     .backward()
///     .interprocedural(4)
///     .with(Sensitivity::ContextSensitive);
/// assert!(q.sensitivities.contains(Sensitivity::ContextSensitive));
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlowQuery {
    /// May or must
    pub analysis: AnalysisType,
    /// Orientation of the traversal
    pub direction: SearchDirection,
    /// How far the search may cross function boundaries
    pub scope: AnalysisScope,
    /// Precision policies
    pub sensitivities: Sensitivities,
}

impl FlowQuery {
    /// A forward query with the default scope and no sensitivities.
    pub fn new(analysis: AnalysisType) -> Self {
        Self {
            analysis,
            direction: SearchDirection::Forward,
            scope: AnalysisScope::default(),
            sensitivities: Sensitivities::empty(),
        }
    }

    /// `FlowQuery::new(AnalysisType::May)`
    pub fn may() -> Self {
        Self::new(AnalysisType::May)
    }

    /// `FlowQuery::new(AnalysisType::Must)`
    pub fn must() -> Self {
        Self::new(AnalysisType::Must)
    }

    /// Follow edges from source to target.
    pub fn forward(mut self) -> Self {
        self.direction = SearchDirection::Forward;
        self
    }

    /// Follow edges from target to source.
    pub fn backward(mut self) -> Self {
        self.direction = SearchDirection::Backward;
        self
    }

    /// Follow edges in both orientations.
    pub fn bidirectional(mut self) -> Self {
        self.direction = SearchDirection::Bidirectional;
        self
    }

    /// Allow at most `max_steps` call or return crossings.
    pub fn interprocedural(self, max_steps: u32) -> Self {
        self.scope(AnalysisScope::Interprocedural { max_steps })
    }

    /// Stay inside the function of the start node.
    pub fn intraprocedural(self) -> Self {
        self.scope(AnalysisScope::Intraprocedural)
    }

    /// Set the scope.
    pub fn scope(mut self, scope: AnalysisScope) -> Self {
        self.scope = scope;
        self
    }

    /// Enable one more sensitivity.
    pub fn with(mut self, sensitivity: Sensitivity) -> Self {
        self.sensitivities = self.sensitivities.with(sensitivity);
        self
    }

    /// Replace the sensitivities.
    pub fn sensitivities(mut self, sensitivities: Sensitivities) -> Self {
        self.sensitivities = sensitivities;
        self
    }
}

impl Context {
    /// A forward query seeded with the configured scope and sensitivities.
    pub fn flow_query(&self, analysis: AnalysisType) -> FlowQuery {
        FlowQuery::new(analysis)
            .scope(self.config.default_scope)
            .sensitivities(self.config.default_sensitivities)
    }

    /// Does data from `start` reach a node accepted by `predicate`?
    ///
    /// The predicate is also consulted for `start` itself. Returns an error
    /// only if the query cannot be answered, e.g. because `start` is not in
    /// the graph.
    pub fn data_flow<D: Into<StopDecision>>(
        &self,
        start: NodeId,
        query: FlowQuery,
        predicate: impl FnMut(NodeId) -> D,
    ) -> Result<QueryTree<bool>, QueryError> {
        self.data_flow_until(start, query, predicate, |_| false)
    }

    /// [`Self::data_flow`] that discards every path at a node for which
    /// `early_termination` holds, before the predicate sees it.
    ///
    /// Use this to stop chasing a value once it no longer is what the
    /// requirement is about, e.g. after a secret was encrypted.
    pub fn data_flow_until<D: Into<StopDecision>>(
        &self,
        start: NodeId,
        query: FlowQuery,
        predicate: impl FnMut(NodeId) -> D,
        early_termination: impl FnMut(NodeId) -> bool,
    ) -> Result<QueryTree<bool>, QueryError> {
        let params = self.search_params(GraphToFollow::DataFlow, &query);
        self.reach(start, "data_flow", &params, query.analysis, predicate, early_termination)
    }

    /// Does execution starting at `start` reach a node accepted by
    /// `predicate`?
    ///
    /// Walks evaluation order edges. This is the predicate for ordering
    /// requirements ("a check must happen before every write").
    pub fn execution_path<D: Into<StopDecision>>(
        &self,
        start: NodeId,
        query: FlowQuery,
        predicate: impl FnMut(NodeId) -> D,
    ) -> Result<QueryTree<bool>, QueryError> {
        self.execution_path_until(start, query, predicate, |_| false)
    }

    /// [`Self::execution_path`] with an early termination predicate, see
    /// [`Self::data_flow_until`].
    pub fn execution_path_until<D: Into<StopDecision>>(
        &self,
        start: NodeId,
        query: FlowQuery,
        predicate: impl FnMut(NodeId) -> D,
        early_termination: impl FnMut(NodeId) -> bool,
    ) -> Result<QueryTree<bool>, QueryError> {
        let params = self.search_params(GraphToFollow::ControlFlowOrder, &query);
        self.reach(
            start,
            "execution_path",
            &params,
            query.analysis,
            predicate,
            early_termination,
        )
    }

    /// Is the value of `start` consumed by a node accepted by `predicate` on
    /// every forward path?
    ///
    /// Where the value is duplicated (e.g. copied into a new container) every
    /// copy is followed and has to reach an accepted node on its own.
    pub fn always_flows_to<D: Into<StopDecision>>(
        &self,
        start: NodeId,
        scope: AnalysisScope,
        sensitivities: Sensitivities,
        predicate: impl FnMut(NodeId) -> D,
    ) -> Result<QueryTree<bool>, QueryError> {
        let query = FlowQuery::must()
            .forward()
            .scope(scope)
            .sensitivities(sensitivities);
        let mut params = self.search_params(GraphToFollow::DataFlow, &query);
        params.follow_value_copies = true;
        self.reach(
            start,
            "always_flows_to",
            &params,
            AnalysisType::Must,
            predicate,
            |_| false,
        )
    }

    fn search_params(&self, graph: GraphToFollow, query: &FlowQuery) -> SearchParams {
        let mut params = SearchParams::new(graph, query.scope);
        params.direction = query.direction;
        params.sensitivities = query.sensitivities;
        params.find_all = query.analysis.is_must();
        params.max_field_depth = self.config.max_field_depth;
        params.max_context_depth = self.config.max_context_depth;
        params
    }

    fn reach<D: Into<StopDecision>>(
        &self,
        start: NodeId,
        query_name: &'static str,
        params: &SearchParams,
        analysis: AnalysisType,
        predicate: impl FnMut(NodeId) -> D,
        early_termination: impl FnMut(NodeId) -> bool,
    ) -> Result<QueryTree<bool>, QueryError> {
        check_preconditions(self.graph(), start, params, query_name)?;
        let result = search_unchecked(self.graph(), start, params, predicate, early_termination);
        if result.truncated {
            log::warn!(
                "{query_name} from {} was truncated after {} boundary crossings",
                self.describe_node(start),
                result.steps_used
            );
        }
        Ok(self.reach_evidence(start, analysis, &result))
    }

    fn reach_evidence(
        &self,
        start: NodeId,
        analysis: AnalysisType,
        result: &SearchResult,
    ) -> QueryTree<bool> {
        let value = match analysis {
            AnalysisType::May => result.matched,
            AnalysisType::Must => result.holds_on_all_paths(),
        };
        let children = result
            .paths
            .iter()
            .filter(|p| {
                matches!(
                    p.outcome,
                    PathOutcome::Satisfied
                        | PathOutcome::Failed
                        | PathOutcome::Cycle
                        | PathOutcome::Truncated
                )
            })
            .map(|p| self.path_evidence(p))
            .collect();

        let satisfied = result.count(PathOutcome::Satisfied);
        let mut explanation = match analysis {
            AnalysisType::May if result.matched => {
                format!("a path from {} reaches the target", self.describe_node(start))
            }
            AnalysisType::May => format!(
                "none of the {} paths from {} reaches the target",
                result.paths.len(),
                self.describe_node(start)
            ),
            AnalysisType::Must => format!(
                "{satisfied} paths from {} reach the target, {} end before it, {} loop without reaching it, {} were rejected",
                self.describe_node(start),
                result.count(PathOutcome::Failed),
                result.count(PathOutcome::Cycle),
                result.count(PathOutcome::Rejected),
            ),
        };
        let mut tree = QueryTree::new(value, Operator::Reach(analysis), children).about(start);
        if result.truncated {
            explanation.push_str(&format!(
                ", {} paths were cut off by the interprocedural budget so this verdict may be an under-approximation",
                result.count(PathOutcome::Truncated)
            ));
            tree = tree.assume(
                AssumptionKind::BoundedExploration,
                format!(
                    "exploration stopped after {} boundary crossings",
                    result.steps_used
                ),
            );
        }
        tree.with_explanation(explanation)
    }

    fn path_evidence(&self, path: &SearchPath) -> QueryTree<Value> {
        let trace = match self.config.path_tracing {
            TraceLevel::Full => path.nodes.clone(),
            TraceLevel::StartAndEnd => match path.nodes.as_slice() {
                [] => vec![],
                [only] => vec![*only],
                [first, .., last] => vec![*first, *last],
            },
            TraceLevel::None => vec![],
        };
        let explanation = format!(
            "{} path {}",
            path.outcome.as_ref(),
            self.describe_path(&path.nodes)
        );
        let mut tree = QueryTree::new(
            Value::Bool(path.outcome.is_satisfied()),
            Operator::Path(path.outcome),
            vec![],
        )
        .with_path(trace)
        .with_explanation(explanation);
        if let Some(end) = path.end() {
            tree = tree.about(end);
        }
        tree
    }
}

#[cfg(test)]
mod tests {
    use cpg_facade::{NodeKind, ProgramGraph};

    use super::*;
    use crate::test_utils::{branching, linear_chain};
    use crate::Config;

    #[test]
    fn single_path_agrees_for_may_and_must() {
        let (ctx, [a, b, c]) = linear_chain();
        for q in [FlowQuery::may(), FlowQuery::must()] {
            let tree = ctx.data_flow(a, q, |n| n == c).unwrap();
            assert!(tree.holds());
            assert_eq!(tree.children().len(), 1);
            assert_eq!(tree.children()[0].path(), &[a, b, c]);
            assert_eq!(tree.node(), Some(a));
        }
    }

    #[test]
    fn must_fails_on_a_dead_end() {
        let (ctx, [a, _, c, _]) = branching();
        let tree = ctx.data_flow(a, FlowQuery::must(), |n| n == c).unwrap();
        assert!(!tree.holds());
        let values = tree
            .children()
            .iter()
            .map(|c| c.value().as_bool().unwrap())
            .collect::<Vec<_>>();
        assert_eq!(values, vec![true, false]);
        assert!(ctx.data_flow(a, FlowQuery::may(), |n| n == c).unwrap().holds());
    }

    #[test]
    fn rejected_paths_do_not_count_against_must() {
        let (ctx, [a, _, c, d]) = branching();
        let tree = ctx
            .data_flow(a, FlowQuery::must(), |n| {
                if n == c {
                    StopDecision::Satisfied
                } else if n == d {
                    StopDecision::Rejected
                } else {
                    StopDecision::Continue
                }
            })
            .unwrap();
        assert!(tree.holds());
        assert_eq!(tree.children().len(), 1);
        assert!(tree.explanation().unwrap().contains("1 were rejected"));
    }

    #[test]
    fn trace_level_trims_evidence() {
        let (ctx, [a, _, c]) = linear_chain();
        let tree = ctx.data_flow(a, FlowQuery::may(), |n| n == c).unwrap();
        assert!(tree.children()[0].explanation().unwrap().contains("secret -> tmp -> send"));
        let graph = crate::test_utils::linear_chain_graph();
        for (level, expected) in [
            (TraceLevel::StartAndEnd, vec![a, c]),
            (TraceLevel::None, vec![]),
        ] {
            let ctx = Context::new(
                graph.clone(),
                Config {
                    path_tracing: level,
                    ..Config::default()
                },
            );
            let tree = ctx.data_flow(a, FlowQuery::may(), |n| n == c).unwrap();
            assert_eq!(tree.children()[0].path(), expected.as_slice());
        }
    }

    #[test]
    fn unconsumed_loop_is_evidence_against_must() {
        let mut g = ProgramGraph::new();
        let [a, clear, acc, acc2] =
            ["a", "clear", "acc", "acc2"].map(|n| g.add_named(n, NodeKind::Variable));
        g.add_data_flow(a, clear);
        g.add_data_flow(a, acc);
        g.add_data_flow(acc, acc2);
        g.add_data_flow(acc2, acc);
        let ctx = Context::new(g, Config::default());
        let tree = ctx.data_flow(a, FlowQuery::must(), |n| n == clear).unwrap();
        assert!(!tree.holds());
        let outcomes = tree
            .children()
            .iter()
            .map(|c| (c.operator(), c.value().clone()))
            .collect::<Vec<_>>();
        assert_eq!(
            outcomes,
            vec![
                (Operator::Path(PathOutcome::Satisfied), Value::Bool(true)),
                (Operator::Path(PathOutcome::Cycle), Value::Bool(false)),
            ]
        );
        assert!(tree.explanation().unwrap().contains("1 loop without reaching it"));
    }

    #[test]
    fn execution_path_requires_control_flow() {
        let mut g = crate::test_utils::linear_chain_graph();
        g.omit(GraphToFollow::ControlFlowOrder);
        let [a, c] = ["secret", "send"].map(|n| g.nodes_named(n).next().unwrap());
        let ctx = Context::new(g, Config::default());
        let err = ctx
            .execution_path(a, FlowQuery::may(), |n| n == c)
            .unwrap_err();
        assert!(matches!(
            err,
            QueryError::MissingEdges {
                query: "execution_path",
                ..
            }
        ));
    }
}
