//! The graph representation consumed by the query engine in `cpg-query`.
//!
//! Everything in this crate is a *read-only* view over a code property graph
//! (CPG) that was built elsewhere. A graph is a set of nodes with stable
//! [`NodeId`] handles, a set of semantic [`Label`]s per node, and several
//! families of edges:
//!
//! - data flow edges ([`EdgeKind::Data`]) meaning "the value produced at the
//!   source is consumed at the target",
//! - evaluation order edges ([`EdgeKind::ControlFlow`]) meaning "execution
//!   proceeds from the source to the target",
//! - control dependence edges ([`EdgeKind::ControlDependence`]) for implicit
//!   flows,
//! - value copy edges ([`EdgeKind::Copy`]) for values duplicated into new
//!   containers,
//! - structural ([`EdgeKind::Ast`]) and call target ([`EdgeKind::Invokes`])
//!   relationships.
//!
//! The query engine only ever talks to a graph through the [`GraphView`]
//! trait. [`ProgramGraph`] is the in-memory implementation used when a graph
//! is loaded from a file or assembled by hand (e.g. in tests).

#![warn(missing_docs)]

mod graph;
pub mod ser;
pub mod traverse;
pub mod utils;

use internment::Intern;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use graph::ProgramGraph;
pub use petgraph::Direction;
pub use std::collections::{HashMap, HashSet};
pub use traverse::{GraphToFollow, SearchDirection};

/// An interned string, used for labels, field names and node names.
#[derive(Hash, Eq, PartialEq, Ord, Debug, PartialOrd, Clone, Serialize, Deserialize, Copy)]
pub struct Identifier(Intern<String>);

impl Identifier {
    /// View the interned string.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Intern a new identifier.
    pub fn new_intern(s: &str) -> Self {
        Identifier(Intern::from_ref(s))
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self.0.as_str(), f)
    }
}

impl From<&str> for Identifier {
    fn from(value: &str) -> Self {
        Self::new_intern(value)
    }
}

/// A semantic tag attached to a node by an external labeling pass, e.g.
/// `Secret`, `GetSecret` or `HttpEndpoint`.
///
/// Labels form an open taxonomy. Asking "is this node an X" is a containment
/// check on the node's label set.
pub type Label = Identifier;

/// Stable handle of a node in a graph.
#[derive(Hash, Eq, PartialEq, Ord, PartialOrd, Clone, Copy, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(u32);

impl NodeId {
    /// Construct a handle from a raw index.
    ///
    /// The handle is only meaningful for the graph it was issued by.
    pub fn new(index: usize) -> Self {
        NodeId(index as u32)
    }

    /// The raw arena index of this handle.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl From<petgraph::graph::NodeIndex> for NodeId {
    fn from(value: petgraph::graph::NodeIndex) -> Self {
        NodeId(value.index() as u32)
    }
}

impl From<NodeId> for petgraph::graph::NodeIndex {
    fn from(value: NodeId) -> Self {
        petgraph::graph::NodeIndex::new(value.index())
    }
}

/// The syntactic shape of a node, as far as queries care about it.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Default,
    strum::AsRefStr,
    strum::EnumIs,
)]
#[strum(serialize_all = "snake_case")]
pub enum NodeKind {
    /// A function or method declaration
    Function,
    /// A formal parameter of a function
    Parameter,
    /// A call expression
    Call,
    /// A return statement
    Return,
    /// A reference to a variable or field
    Reference,
    /// A literal value
    Literal,
    /// A declaration of a local or global variable
    Variable,
    /// Any other statement or expression
    #[default]
    Other,
}

/// Where in the analyzed source code a node comes from.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLocation {
    /// Path of the file, as it should be shown to a user
    pub file: String,
    /// 1-based line
    pub line: u32,
    /// 1-based column
    pub col: u32,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.col)
    }
}

/// Metadata about a node.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Human readable name, e.g. the called function or the variable name
    pub name: Identifier,
    /// Syntactic kind
    #[serde(default)]
    pub kind: NodeKind,
    /// The source code this node was created from, if known
    #[serde(default)]
    pub code: Option<String>,
    /// Source location, if known
    #[serde(default)]
    pub location: Option<SourceLocation>,
    /// Semantic labels attached by labeling passes. Kept free of duplicates.
    #[serde(default)]
    pub labels: Vec<Label>,
}

impl NodeInfo {
    /// A node with a name and a kind and nothing else.
    pub fn new(name: impl Into<Identifier>, kind: NodeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            code: None,
            location: None,
            labels: vec![],
        }
    }

    /// Attach source code.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Attach a source location.
    pub fn with_location(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }
}

/// The relationship an edge represents.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, strum::AsRefStr, strum::EnumIs,
)]
#[strum(serialize_all = "snake_case")]
pub enum EdgeKind {
    /// The value produced at the source is consumed at the target (DFG).
    Data,
    /// Execution proceeds from the source to the target (EOG).
    ControlFlow,
    /// Whether the target executes depends on the value of the source.
    ControlDependence,
    /// The target holds a duplicate of the source's value, e.g. because the
    /// value was copied into a new container.
    Copy,
    /// The source is the syntactic parent of the target.
    Ast,
    /// The source (a call) invokes the target (a function).
    Invokes,
}

/// Access to a sub-field of a composite value along a data flow edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldAccess {
    /// The source value is written into field `.0` of the target.
    Store(Identifier),
    /// The target is the result of reading field `.0` of the source.
    Load(Identifier),
}

/// Marks edges that cross a function boundary. The payload is the node of
/// the call site, which identifies the calling context.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallBoundary {
    /// From a call site (argument) into the callee (parameter/entry).
    Call(NodeId),
    /// From the callee (return value/exit) back to the call site.
    Return(NodeId),
}

impl CallBoundary {
    /// The call site this boundary belongs to.
    pub fn call_site(self) -> NodeId {
        match self {
            CallBoundary::Call(n) | CallBoundary::Return(n) => n,
        }
    }
}

/// Payload of an edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EdgeInfo {
    /// What relationship this edge represents
    pub kind: EdgeKind,
    /// Sub-field accessed along this edge (data flow edges only)
    #[serde(default)]
    pub field: Option<FieldAccess>,
    /// Set if this edge crosses a call or return
    #[serde(default)]
    pub boundary: Option<CallBoundary>,
    /// Set by an external reachability oracle if the edge leads into code that
    /// can never execute.
    #[serde(default)]
    pub unreachable: bool,
}

impl EdgeInfo {
    /// A plain edge of this kind.
    pub fn new(kind: EdgeKind) -> Self {
        Self {
            kind,
            field: None,
            boundary: None,
            unreachable: false,
        }
    }

    /// A plain data flow edge.
    pub fn data() -> Self {
        Self::new(EdgeKind::Data)
    }

    /// A plain evaluation order edge.
    pub fn control_flow() -> Self {
        Self::new(EdgeKind::ControlFlow)
    }

    /// Record a field access along this edge.
    pub fn with_field(mut self, field: FieldAccess) -> Self {
        self.field = Some(field);
        self
    }

    /// Record that this edge crosses a function boundary.
    pub fn with_boundary(mut self, boundary: CallBoundary) -> Self {
        self.boundary = Some(boundary);
        self
    }

    /// Mark this edge as leading into statically dead code.
    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    /// Is this an interprocedural edge?
    pub fn crosses_boundary(&self) -> bool {
        self.boundary.is_some()
    }
}

/// A neighbor as seen from the node whose adjacency was requested.
///
/// For [`Direction::Outgoing`] `target` is the head of the edge, for
/// [`Direction::Incoming`] it is the tail. The [`EdgeInfo`] is reported as
/// stored, i.e. not flipped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Edge {
    /// The neighbor
    pub target: NodeId,
    /// The edge payload
    pub info: EdgeInfo,
}

/// Minimal read-only interface over a code property graph.
///
/// Adjacency is returned in a stable order. The engine relies on this for
/// deterministic results.
pub trait GraphView {
    /// All nodes, in arena order.
    fn node_ids(&self) -> Box<dyn Iterator<Item = NodeId> + '_>;

    /// Does this node exist in the graph?
    fn contains(&self, node: NodeId) -> bool;

    /// Metadata about the node, `None` if it does not exist.
    fn node_info(&self, node: NodeId) -> Option<&NodeInfo>;

    /// Labels attached to this node.
    fn labels(&self, node: NodeId) -> &[Label] {
        self.node_info(node).map_or(&[], |i| i.labels.as_slice())
    }

    /// Does the node carry this label?
    fn has_label(&self, node: NodeId, label: Label) -> bool {
        self.labels(node).contains(&label)
    }

    /// Data flow neighbors in the given direction.
    fn data_flow_neighbors(&self, node: NodeId, direction: Direction) -> Vec<Edge>;

    /// Evaluation order neighbors in the given direction.
    fn control_flow_neighbors(&self, node: NodeId, direction: Direction) -> Vec<Edge>;

    /// Control dependence neighbors (implicit flows) in the given direction.
    fn control_dependence_neighbors(&self, _node: NodeId, _direction: Direction) -> Vec<Edge> {
        vec![]
    }

    /// Nodes that received a duplicate of this node's value.
    fn value_copies(&self, _node: NodeId) -> Vec<Edge> {
        vec![]
    }

    /// The syntactic parent, if any.
    fn structural_parent(&self, node: NodeId) -> Option<NodeId>;

    /// Resolved callees of a call-like node.
    fn call_targets(&self, node: NodeId) -> Vec<NodeId>;

    /// Is this node of the given syntactic kind?
    fn is_node_of_kind(&self, node: NodeId, kind: NodeKind) -> bool {
        self.node_info(node).is_some_and(|i| i.kind == kind)
    }

    /// Was this view built with the requested edge family?
    ///
    /// This is a capability of the export, not a statement about edge
    /// counts: a provided family may well have no edges (a program without
    /// any data flow). Searches along a family that is not provided are
    /// rejected.
    fn provides(&self, graph: GraphToFollow) -> bool;
}

impl<G: GraphView + ?Sized> GraphView for &'_ G {
    fn node_ids(&self) -> Box<dyn Iterator<Item = NodeId> + '_> {
        (**self).node_ids()
    }
    fn contains(&self, node: NodeId) -> bool {
        (**self).contains(node)
    }
    fn node_info(&self, node: NodeId) -> Option<&NodeInfo> {
        (**self).node_info(node)
    }
    fn labels(&self, node: NodeId) -> &[Label] {
        (**self).labels(node)
    }
    fn data_flow_neighbors(&self, node: NodeId, direction: Direction) -> Vec<Edge> {
        (**self).data_flow_neighbors(node, direction)
    }
    fn control_flow_neighbors(&self, node: NodeId, direction: Direction) -> Vec<Edge> {
        (**self).control_flow_neighbors(node, direction)
    }
    fn control_dependence_neighbors(&self, node: NodeId, direction: Direction) -> Vec<Edge> {
        (**self).control_dependence_neighbors(node, direction)
    }
    fn value_copies(&self, node: NodeId) -> Vec<Edge> {
        (**self).value_copies(node)
    }
    fn structural_parent(&self, node: NodeId) -> Option<NodeId> {
        (**self).structural_parent(node)
    }
    fn call_targets(&self, node: NodeId) -> Vec<NodeId> {
        (**self).call_targets(node)
    }
    fn is_node_of_kind(&self, node: NodeId, kind: NodeKind) -> bool {
        (**self).is_node_of_kind(node, kind)
    }
    fn provides(&self, graph: GraphToFollow) -> bool {
        (**self).provides(graph)
    }
}

/// Pretty printer for a node that uses its name and source code if known.
pub struct DisplayNode<'a> {
    node: NodeId,
    info: Option<&'a NodeInfo>,
}

impl<'a> DisplayNode<'a> {
    /// Look up the node in a graph for printing.
    pub fn pretty(node: NodeId, graph: &'a (impl GraphView + ?Sized)) -> Self {
        Self {
            node,
            info: graph.node_info(node),
        }
    }
}

impl fmt::Display for DisplayNode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.info {
            None => write!(f, "{}", self.node),
            Some(info) => {
                write!(f, "`{}` ({} {})", info.name, info.kind.as_ref(), self.node)
            }
        }
    }
}
