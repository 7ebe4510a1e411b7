//! Engine misuse errors.
//!
//! A query that merely does not hold is *not* an error, it is a
//! [`QueryTree`](crate::QueryTree) with a `false` value. The variants here
//! describe queries that could not be answered at all, because the caller
//! handed the engine something it cannot work with. They are raised before
//! any traversal begins.

use cpg_facade::{GraphToFollow, Identifier, NodeId};

use crate::algo::Sensitivity;

/// Reasons a query could not be evaluated.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// The start node of a search is not part of the graph.
    #[error("node {0} is not part of the analyzed graph")]
    UnknownNode(NodeId),
    /// The graph view was built without the edge family the query walks.
    #[error("cannot run `{query}`: the graph was exported without {} edges", .graph.as_ref())]
    MissingEdges {
        /// The edge family that was requested
        graph: GraphToFollow,
        /// Name of the predicate that was invoked
        query: &'static str,
    },
    /// A sensitivity was requested for a traversal it cannot apply to.
    #[error("`{}` cannot be used when following {} edges", .sensitivity.as_ref(), .graph.as_ref())]
    IncompatibleSensitivity {
        /// The offending sensitivity
        sensitivity: Sensitivity,
        /// The edge family of the traversal
        graph: GraphToFollow,
    },
    /// A configuration value is out of its permitted range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Two requirements were registered under the same name.
    #[error("requirement `{0}` is defined more than once")]
    DuplicateRequirement(Identifier),
}
