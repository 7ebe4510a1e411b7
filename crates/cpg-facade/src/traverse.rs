//! Selectors for traversing a [`GraphView`](crate::GraphView)

use std::collections::HashSet;

use petgraph::Direction;
use serde::{Deserialize, Serialize};

use crate::{Edge, GraphView, NodeId};

/// Which family of edges a traversal follows
#[derive(
    Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize, strum::EnumIs, strum::AsRefStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum GraphToFollow {
    /// Follow [`EdgeKind::Data`](crate::EdgeKind::Data) edges
    DataFlow,
    /// Follow [`EdgeKind::ControlFlow`](crate::EdgeKind::ControlFlow) edges
    ControlFlowOrder,
}

impl GraphToFollow {
    /// The neighbors of `node` along this edge family.
    pub fn neighbors<G: GraphView + ?Sized>(
        self,
        graph: &G,
        node: NodeId,
        direction: Direction,
    ) -> Vec<Edge> {
        match self {
            GraphToFollow::DataFlow => graph.data_flow_neighbors(node, direction),
            GraphToFollow::ControlFlowOrder => graph.control_flow_neighbors(node, direction),
        }
    }
}

/// Which orientation of edges a traversal follows
#[derive(
    Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize, Default, strum::EnumIs,
)]
pub enum SearchDirection {
    /// Follow edges from source to target
    #[default]
    Forward,
    /// Follow edges from target to source
    Backward,
    /// Follow edges in both orientations
    Bidirectional,
}

impl SearchDirection {
    /// The petgraph directions this selection expands, in expansion order.
    pub fn directions(self) -> &'static [Direction] {
        match self {
            SearchDirection::Forward => &[Direction::Outgoing],
            SearchDirection::Backward => &[Direction::Incoming],
            SearchDirection::Bidirectional => &[Direction::Outgoing, Direction::Incoming],
        }
    }
}

/// A primitive that queries whether we can reach from one set of nodes to
/// another, ignoring all sensitivities and boundaries.
///
/// This is the cheap "is there any connection at all" check. Use the search
/// engine in `cpg-query` for anything that needs paths or must-semantics.
pub fn generic_flows_to<G: GraphView + ?Sized>(
    from: impl IntoIterator<Item = NodeId>,
    graph_kind: GraphToFollow,
    graph: &G,
    other: impl IntoIterator<Item = NodeId>,
) -> bool {
    let targets = other.into_iter().collect::<HashSet<_>>();
    let mut stack = from.into_iter().collect::<Vec<_>>();
    if stack.is_empty() || targets.is_empty() {
        return false;
    }
    let mut seen = stack.iter().copied().collect::<HashSet<_>>();
    while let Some(n) = stack.pop() {
        for e in graph_kind.neighbors(graph, n, Direction::Outgoing) {
            if targets.contains(&e.target) {
                return true;
            }
            if seen.insert(e.target) {
                stack.push(e.target);
            }
        }
    }
    false
}
