use std::{io::Write, process::exit, sync::Arc};

use anyhow::Result;
use cpg_facade::{
    traverse::generic_flows_to,
    utils::DisplayPath,
    DisplayNode, GraphToFollow, GraphView, HashMap, Identifier, Label, NodeId, NodeInfo,
};
use itertools::Itertools;

use crate::{assert_warning, diagnostics::DiagnosticsRecorder, Config};

type LabelIndex = HashMap<Label, Vec<NodeId>>;

/// A graph view that can be shared with the worker threads evaluating
/// requirements.
pub type SharedGraph = dyn GraphView + Send + Sync;

/// Interface for defining requirements.
///
/// Holds the graph under analysis and an index from labels to the nodes that
/// carry them. All predicates ([`Self::data_flow`], [`Self::execution_path`],
/// [`Self::always_flows_to`]) and quantifiers ([`Self::all`],
/// [`Self::exists`]) are methods on this type.
///
/// The context also records diagnostics. The methods of
/// [`Diagnostics`](crate::diagnostics::Diagnostics) only queue the messages.
/// To emit them (and potentially terminate the program if a requirement does
/// not hold) use [`Self::emit_diagnostics`]. If you used
/// [`GraphLocation::with_context`](crate::GraphLocation::with_context) this is
/// done for you.
pub struct Context {
    graph: Box<SharedGraph>,
    label_index: LabelIndex,
    pub(crate) diagnostics: DiagnosticsRecorder,
    pub(crate) config: Arc<Config>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("labels", &self.label_index.len())
            .field("diagnostics", &self.diagnostics)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Context {
    /// Construct a [`Context`] over a graph.
    ///
    /// This also precomputes an index over labels.
    pub fn new(graph: impl GraphView + Send + Sync + 'static, config: Config) -> Self {
        let label_index = Self::build_index_on_labels(&graph);
        Context {
            graph: Box::new(graph),
            label_index,
            diagnostics: Default::default(),
            config: Arc::new(config),
        }
    }

    fn build_index_on_labels(graph: &SharedGraph) -> LabelIndex {
        graph
            .node_ids()
            .flat_map(move |n| graph.labels(n).iter().map(move |l| (*l, n)))
            .into_group_map()
    }

    /// The graph under analysis.
    pub fn graph(&self) -> &SharedGraph {
        self.graph.as_ref()
    }

    /// The configuration this context was built with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// All nodes carrying this label, in graph order.
    ///
    /// Emits a warning if no node in the graph carries the label, which
    /// usually means the label is misspelled or the labeling pass did not
    /// run.
    pub fn nodes_with_label(&self, label: impl Into<Label>) -> &[NodeId] {
        let label = label.into();
        self.report_label_if_absent(label);
        self.label_index.get(&label).map_or(&[], Vec::as_slice)
    }

    /// Does this node carry the label?
    pub fn has_label(&self, node: NodeId, label: impl Into<Label>) -> bool {
        self.graph.has_label(node, label.into())
    }

    /// All nodes with this name, in graph order.
    pub fn nodes_named(&self, name: impl Into<Identifier>) -> impl Iterator<Item = NodeId> + '_ {
        let name = name.into();
        self.graph
            .node_ids()
            .filter(move |n| self.graph.node_info(*n).is_some_and(|i| i.name == name))
    }

    /// Metadata of a node, `None` for handles from another graph.
    pub fn node_info(&self, node: NodeId) -> Option<&NodeInfo> {
        self.graph.node_info(node)
    }

    /// Pretty print the node with its name and kind.
    pub fn describe_node(&self, node: NodeId) -> DisplayNode<'_> {
        DisplayNode::pretty(node, self.graph())
    }

    /// Pretty print a path as `a -> b -> c`.
    pub fn describe_path<'a>(&'a self, path: &'a [NodeId]) -> DisplayPath<'a, SharedGraph> {
        DisplayPath::new(path, self.graph())
    }

    /// Returns whether any of `src` reaches any of `sink` along `edge_type`
    /// edges.
    ///
    /// This ignores scopes and sensitivities and builds no evidence. Nodes do
    /// not flow to themselves unless they sit on a cycle. Use the predicates
    /// for anything that needs to be explained.
    pub fn flows_to(
        &self,
        src: impl IntoIterator<Item = NodeId>,
        sink: impl IntoIterator<Item = NodeId>,
        edge_type: GraphToFollow,
    ) -> bool {
        generic_flows_to(src, edge_type, self.graph(), sink)
    }

    /// The first pair of a source and a sink such that the source reaches
    /// the sink, if any.
    pub fn any_flows(
        &self,
        srcs: &[NodeId],
        sinks: &[NodeId],
        edge_type: GraphToFollow,
    ) -> Option<(NodeId, NodeId)> {
        srcs.iter()
            .cartesian_product(sinks)
            .find(|(src, sink)| self.flows_to([**src], [**sink], edge_type))
            .map(|(src, sink)| (*src, *sink))
    }

    /// Dispatch and drain all queued diagnostics, aborts the program if any of
    /// them demand failure.
    pub fn emit_diagnostics_may_exit(&self, w: impl Write) -> Result<()> {
        if !self.diagnostics.emit(w)? {
            exit(1)
        }
        Ok(())
    }

    /// Dispatch and drain all queued diagnostics without aborting the program.
    ///
    /// Returns `false` if any of them was an error.
    pub fn emit_diagnostics(&self, w: impl Write) -> std::io::Result<bool> {
        self.diagnostics.emit(w)
    }

    /// Emit a warning if no node carries this label.
    pub fn report_label_if_absent(&self, label: Label) {
        assert_warning!(
            *self,
            self.label_index.contains_key(&label),
            format!("Label {label} is mentioned in a requirement but not attached to any node")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::linear_chain;

    #[test]
    fn label_index_is_in_graph_order() {
        let (ctx, [a, _, c]) = linear_chain();
        assert_eq!(ctx.nodes_with_label("Secret"), &[a]);
        assert_eq!(ctx.nodes_with_label("Sink"), &[c]);
        assert!(ctx.has_label(c, "Sink"));
        assert_eq!(ctx.diagnostics.len(), 0);
        assert!(ctx.nodes_with_label("Unknown").is_empty());
        assert_eq!(ctx.diagnostics.len(), 1);
    }

    #[test]
    fn cheap_reachability() {
        let (ctx, [a, b, c]) = linear_chain();
        assert!(ctx.flows_to([a], [c], GraphToFollow::DataFlow));
        assert!(!ctx.flows_to([c], [a], GraphToFollow::DataFlow));
        assert!(!ctx.flows_to([b], [b], GraphToFollow::DataFlow));
        assert_eq!(
            ctx.any_flows(&[c, b], &[a, c], GraphToFollow::DataFlow),
            Some((b, c))
        );
        assert_eq!(ctx.describe_path(&[a, b, c]).to_string(), "secret -> tmp -> send");
        assert_eq!(ctx.nodes_named("tmp").collect::<Vec<_>>(), vec![b]);
    }
}
