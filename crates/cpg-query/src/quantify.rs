//! Quantification over labeled nodes.
//!
//! [`Context::all_extended`] and [`Context::exists_extended`] apply a
//! per-node requirement to every node that carries a label and combine the
//! results. The children of the returned tree are the per-node results in
//! graph order, each pointing at its node.
//!
//! Over an empty selection `all` is vacuously true and `exists` vacuously
//! false. Because a requirement that passes on nothing is rarely what its
//! author intended, the vacuous case is called out in the explanation and, if
//! [`Config::warn_on_vacuous`](crate::Config::warn_on_vacuous) is set, with a
//! warning diagnostic.

use cpg_facade::{Label, NodeId};

use crate::{
    combinators::{all_of, any_of},
    AssumptionKind, Context, QueryError, QueryTree,
};

impl Context {
    /// Does `must_satisfy` hold for every node carrying `label` that
    /// `select` accepts?
    ///
    /// A requirement that cannot be checked for one node (e.g. an expected
    /// node is missing) should return a `false` tree for that node. An `Err`
    /// from `must_satisfy` signals a misuse and aborts the whole
    /// quantification.
    pub fn all_extended(
        &self,
        label: impl Into<Label>,
        select: impl FnMut(NodeId) -> bool,
        must_satisfy: impl FnMut(NodeId) -> Result<QueryTree<bool>, QueryError>,
    ) -> Result<QueryTree<bool>, QueryError> {
        let label = label.into();
        let children = self.quantify(label, select, must_satisfy)?;
        if children.is_empty() {
            self.warn_vacuous(label, "all");
        }
        Ok(all_of(children).assume(
            AssumptionKind::ExhaustiveEnumeration,
            format!("every relevant node is labeled {label}"),
        ))
    }

    /// Does `must_satisfy` hold for some node carrying `label` that `select`
    /// accepts?
    ///
    /// See [`Self::all_extended`] for how errors are treated.
    pub fn exists_extended(
        &self,
        label: impl Into<Label>,
        select: impl FnMut(NodeId) -> bool,
        must_satisfy: impl FnMut(NodeId) -> Result<QueryTree<bool>, QueryError>,
    ) -> Result<QueryTree<bool>, QueryError> {
        let label = label.into();
        let children = self.quantify(label, select, must_satisfy)?;
        if children.is_empty() {
            self.warn_vacuous(label, "exists");
        }
        Ok(any_of(children))
    }

    /// [`Self::all_extended`] over every node with the label.
    pub fn all(
        &self,
        label: impl Into<Label>,
        must_satisfy: impl FnMut(NodeId) -> Result<QueryTree<bool>, QueryError>,
    ) -> Result<QueryTree<bool>, QueryError> {
        self.all_extended(label, |_| true, must_satisfy)
    }

    /// [`Self::exists_extended`] over every node with the label.
    pub fn exists(
        &self,
        label: impl Into<Label>,
        must_satisfy: impl FnMut(NodeId) -> Result<QueryTree<bool>, QueryError>,
    ) -> Result<QueryTree<bool>, QueryError> {
        self.exists_extended(label, |_| true, must_satisfy)
    }

    fn quantify(
        &self,
        label: Label,
        mut select: impl FnMut(NodeId) -> bool,
        mut must_satisfy: impl FnMut(NodeId) -> Result<QueryTree<bool>, QueryError>,
    ) -> Result<Vec<QueryTree<bool>>, QueryError> {
        self.nodes_with_label(label)
            .iter()
            .copied()
            .filter(|n| select(*n))
            .map(|n| {
                let tree = must_satisfy(n)?;
                Ok(if tree.node().is_none() {
                    tree.about(n)
                } else {
                    tree
                })
            })
            .collect()
    }

    fn warn_vacuous(&self, label: Label, quantifier: &str) {
        log::debug!("`{quantifier}` over label {label} selected no nodes");
        if self.config.warn_on_vacuous {
            assert_warning!(
                *self,
                false,
                "`{}` over label {} selected no nodes, the result is vacuous",
                quantifier,
                label
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::test_utils::branching;
    use crate::{algo::FlowQuery, Config, Context};

    #[test]
    fn per_node_results_are_children_in_graph_order() {
        let (ctx, [a, b, c, d]) = branching();
        let tree = ctx
            .all("Value", |n| Ok(crate::QueryTree::leaf(n != d)))
            .unwrap();
        assert!(!tree.holds());
        let nodes = tree.children().iter().map(|c| c.node()).collect::<Vec<_>>();
        assert_eq!(nodes, vec![Some(a), Some(b), Some(c), Some(d)]);

        let tree = ctx
            .exists_extended(
                "Value",
                |n| n != a,
                |n| ctx.data_flow(n, FlowQuery::may(), |m| m == c),
            )
            .unwrap();
        assert!(tree.holds());
        assert_eq!(tree.children().len(), 3);
    }

    #[test]
    fn vacuous_results_warn() {
        let (ctx, _) = branching();
        let all = ctx.all("Nothing", |_| unreachable!()).unwrap();
        assert!(all.holds());
        assert!(all.children().is_empty());
        let exists = ctx.exists("Nothing", |_| unreachable!()).unwrap();
        assert!(!exists.holds());
        let mut out = vec![];
        assert!(ctx.emit_diagnostics(&mut out).unwrap());
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("`all` over label Nothing selected no nodes"));
        assert!(out.contains("`exists` over label Nothing selected no nodes"));

        let quiet = Context::new(
            crate::test_utils::branching_graph(),
            Config {
                warn_on_vacuous: false,
                ..Config::default()
            },
        );
        quiet.all_extended("Value", |_| false, |_| unreachable!()).unwrap();
        assert_eq!(quiet.diagnostics.len(), 0);
    }
}
