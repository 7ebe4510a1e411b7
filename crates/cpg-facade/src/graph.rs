use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};

use crate::{
    CallBoundary, Edge, EdgeInfo, EdgeKind, FieldAccess, GraphToFollow, GraphView, Identifier,
    Label, NodeId, NodeInfo, NodeKind,
};

/// The in-memory graph implementation.
///
/// Nodes live in an arena and are referred to with stable [`NodeId`]
/// handles, so cycles in the data or control flow do not create ownership
/// cycles.
///
/// The mutating methods are meant for whoever *produces* the graph (a
/// deserializer, a labeling pass or a test). Once the graph is handed to a
/// query context it is only ever read.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgramGraph {
    graph: DiGraph<NodeInfo, EdgeInfo>,
    /// Edge families the exporter did not produce
    #[serde(default)]
    omitted: Vec<GraphToFollow>,
}

impl ProgramGraph {
    /// An empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of edges of all kinds.
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Record that this graph was exported without the given edge family.
    ///
    /// Searches along an omitted family are refused instead of reporting
    /// every path as a dead end. A family that is provided but has no edges
    /// is an ordinary (empty) graph.
    pub fn omit(&mut self, family: GraphToFollow) {
        if !self.omitted.contains(&family) {
            self.omitted.push(family);
        }
    }

    /// Insert a node.
    pub fn add_node(&mut self, info: NodeInfo) -> NodeId {
        self.graph.add_node(info).into()
    }

    /// Shorthand for a node with only a name and kind.
    pub fn add_named(&mut self, name: &str, kind: NodeKind) -> NodeId {
        self.add_node(NodeInfo::new(name, kind))
    }

    /// Insert an edge.
    pub fn add_edge(&mut self, from: NodeId, to: NodeId, info: EdgeInfo) {
        self.graph.add_edge(from.into(), to.into(), info);
    }

    /// Insert a plain data flow edge.
    pub fn add_data_flow(&mut self, from: NodeId, to: NodeId) {
        self.add_edge(from, to, EdgeInfo::data())
    }

    /// Insert a data flow edge that stores into or loads from a field.
    pub fn add_field_flow(&mut self, from: NodeId, to: NodeId, access: FieldAccess) {
        self.add_edge(from, to, EdgeInfo::data().with_field(access))
    }

    /// Insert a data flow edge that crosses a call or return.
    pub fn add_boundary_flow(&mut self, from: NodeId, to: NodeId, boundary: CallBoundary) {
        self.add_edge(from, to, EdgeInfo::data().with_boundary(boundary))
    }

    /// Insert an evaluation order edge.
    pub fn add_control_flow(&mut self, from: NodeId, to: NodeId) {
        self.add_edge(from, to, EdgeInfo::control_flow())
    }

    /// Insert a control dependence edge.
    pub fn add_control_dependence(&mut self, from: NodeId, to: NodeId) {
        self.add_edge(from, to, EdgeInfo::new(EdgeKind::ControlDependence))
    }

    /// Record that `to` holds a duplicate of the value of `from`.
    pub fn add_value_copy(&mut self, from: NodeId, to: NodeId) {
        self.add_edge(from, to, EdgeInfo::new(EdgeKind::Copy))
    }

    /// Record that `parent` is the syntactic parent of `child`.
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) {
        self.add_edge(parent, child, EdgeInfo::new(EdgeKind::Ast))
    }

    /// Record that the call `call` resolves to `callee`.
    pub fn add_call_target(&mut self, call: NodeId, callee: NodeId) {
        self.add_edge(call, callee, EdgeInfo::new(EdgeKind::Invokes))
    }

    /// Attach a label. Attaching the same label twice has no effect.
    ///
    /// # Panics
    ///
    /// If the node does not exist.
    pub fn add_label(&mut self, node: NodeId, label: impl Into<Label>) {
        let label = label.into();
        let labels = &mut self.graph[NodeIndex::from(node)].labels;
        if !labels.contains(&label) {
            labels.push(label);
        }
    }

    /// Mark every outgoing evaluation order edge of `node` that leads to
    /// `target` as unreachable.
    ///
    /// This is the entry point for an external reachability oracle.
    pub fn mark_unreachable(&mut self, node: NodeId, target: NodeId) {
        let ids = self
            .graph
            .edges_connecting(node.into(), target.into())
            .map(|e| e.id())
            .collect::<Vec<_>>();
        for id in ids {
            self.graph[id].unreachable = true;
        }
    }

    /// Find all nodes with this name. Mostly useful in tests.
    pub fn nodes_named(&self, name: impl Into<Identifier>) -> impl Iterator<Item = NodeId> + '_ {
        let name = name.into();
        self.graph
            .node_indices()
            .filter(move |i| self.graph[*i].name == name)
            .map(NodeId::from)
    }

    fn edges_of_kind(&self, node: NodeId, direction: Direction, kind: EdgeKind) -> Vec<Edge> {
        if !self.contains(node) {
            return vec![];
        }
        let mut edges = self
            .graph
            .edges_directed(node.into(), direction)
            .filter(|e| e.weight().kind == kind)
            .map(|e| Edge {
                target: match direction {
                    Direction::Outgoing => e.target(),
                    Direction::Incoming => e.source(),
                }
                .into(),
                info: *e.weight(),
            })
            .collect::<Vec<_>>();
        // petgraph iterates adjacency most-recent-first, we want insertion order
        edges.reverse();
        edges
    }
}

impl GraphView for ProgramGraph {
    fn node_ids(&self) -> Box<dyn Iterator<Item = NodeId> + '_> {
        Box::new(self.graph.node_indices().map(NodeId::from))
    }

    fn contains(&self, node: NodeId) -> bool {
        node.index() < self.graph.node_count()
    }

    fn node_info(&self, node: NodeId) -> Option<&NodeInfo> {
        self.graph.node_weight(node.into())
    }

    fn data_flow_neighbors(&self, node: NodeId, direction: Direction) -> Vec<Edge> {
        self.edges_of_kind(node, direction, EdgeKind::Data)
    }

    fn control_flow_neighbors(&self, node: NodeId, direction: Direction) -> Vec<Edge> {
        self.edges_of_kind(node, direction, EdgeKind::ControlFlow)
    }

    fn control_dependence_neighbors(&self, node: NodeId, direction: Direction) -> Vec<Edge> {
        self.edges_of_kind(node, direction, EdgeKind::ControlDependence)
    }

    fn value_copies(&self, node: NodeId) -> Vec<Edge> {
        self.edges_of_kind(node, Direction::Outgoing, EdgeKind::Copy)
    }

    fn structural_parent(&self, node: NodeId) -> Option<NodeId> {
        self.edges_of_kind(node, Direction::Incoming, EdgeKind::Ast)
            .first()
            .map(|e| e.target)
    }

    fn call_targets(&self, node: NodeId) -> Vec<NodeId> {
        self.edges_of_kind(node, Direction::Outgoing, EdgeKind::Invokes)
            .into_iter()
            .map(|e| e.target)
            .collect()
    }

    fn provides(&self, graph: GraphToFollow) -> bool {
        !self.omitted.contains(&graph)
    }
}
