//! Formatting helpers shared by the graph and query crates.

use std::fmt;

use crate::{DisplayNode, GraphView, NodeId};

/// Write the elements of `it` with `sep` between them, formatting each with
/// `f`.
pub fn write_sep<
    E,
    I: IntoIterator<Item = E>,
    F: FnMut(E, &mut fmt::Formatter<'_>) -> fmt::Result,
>(
    fmt: &mut fmt::Formatter<'_>,
    sep: &str,
    it: I,
    mut f: F,
) -> fmt::Result {
    let mut first = true;
    for e in it {
        if first {
            first = false;
        } else {
            fmt.write_str(sep)?;
        }
        f(e, fmt)?;
    }
    Ok(())
}

/// Displays a path of nodes as `a -> b -> c` using node names.
pub struct DisplayPath<'a, G: ?Sized> {
    path: &'a [NodeId],
    graph: &'a G,
}

impl<'a, G: GraphView + ?Sized> DisplayPath<'a, G> {
    /// Prepare `path` for printing.
    pub fn new(path: &'a [NodeId], graph: &'a G) -> Self {
        Self { path, graph }
    }
}

impl<G: GraphView + ?Sized> fmt::Display for DisplayPath<'_, G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_sep(f, " -> ", self.path, |n, f| {
            match self.graph.node_info(*n) {
                Some(info) => f.write_str(info.name.as_str()),
                None => write!(f, "{n}"),
            }
        })
    }
}

impl<G: GraphView + ?Sized> fmt::Debug for DisplayPath<'_, G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_sep(f, " -> ", self.path, |n, f| {
            write!(f, "{}", DisplayNode::pretty(*n, self.graph))
        })
    }
}
