//! Overriding results with known false positives or negatives.
//!
//! A [`Suppression`] pairs a matcher over tree nodes with the boolean value
//! the matched node should have instead. [`Suppressions::apply`] walks a
//! finished [`QueryTree`] bottom-up: every node is first recomputed from its
//! (possibly overridden) children, then the first matching suppression, in
//! registration order, replaces its value. Overrides therefore propagate to
//! all ancestors.
//!
//! Nothing is silently dropped. An overridden node keeps an
//! [`OverrideRecord`] with the value it had before, every override is logged
//! and the [`SuppressionReport`] lists all of them with their position.

use std::fmt;

use cpg_facade::NodeId;
use serde::{Deserialize, Serialize};

use crate::query_tree::{QueryNodeRef, QueryTree, TreeValue, Value};

type Matcher = Box<dyn Fn(&QueryNodeRef<'_>) -> bool + Send + Sync>;

/// A rule that overrides the value of matching tree nodes.
pub struct Suppression {
    matcher: Matcher,
    value: bool,
    reason: String,
}

impl fmt::Debug for Suppression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Suppression")
            .field("value", &self.value)
            .field("reason", &self.reason)
            .finish_non_exhaustive()
    }
}

impl Suppression {
    /// Override every node `matcher` accepts with `value`.
    pub fn new(
        matcher: impl Fn(&QueryNodeRef<'_>) -> bool + Send + Sync + 'static,
        value: bool,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            matcher: Box::new(matcher),
            value,
            reason: reason.into(),
        }
    }

    /// Override results about this graph node, e.g. the path ending at it or
    /// the quantifier branch for it.
    pub fn for_node(node: NodeId, value: bool, reason: impl Into<String>) -> Self {
        Self::new(move |n| n.node == Some(node), value, reason)
    }

    /// The value matched nodes are forced to.
    pub fn value(&self) -> bool {
        self.value
    }

    /// Why this suppression exists.
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// The value a node had before a suppression replaced it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OverrideRecord {
    /// Value computed by the query
    pub original: bool,
    /// Value after the override
    pub overridden: bool,
    /// Reason given by the suppression
    pub reason: String,
}

/// One override that was applied.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AppliedOverride {
    /// Child indices from the root to the overridden node
    pub position: Vec<usize>,
    /// The graph node the overridden result is about
    pub node: Option<NodeId>,
    /// What changed
    pub record: OverrideRecord,
}

/// All overrides applied to one tree.
#[derive(Clone, Debug, Default, Serialize)]
pub struct SuppressionReport {
    /// In the order they were applied (post-order)
    pub applied: Vec<AppliedOverride>,
}

impl SuppressionReport {
    /// Did no suppression apply?
    pub fn is_empty(&self) -> bool {
        self.applied.is_empty()
    }
}

impl fmt::Display for SuppressionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for a in &self.applied {
            write!(f, "at {:?}", a.position)?;
            if let Some(n) = a.node {
                write!(f, " ({n})")?;
            }
            writeln!(
                f,
                ": {} -> {} because {}",
                a.record.original, a.record.overridden, a.record.reason
            )?;
        }
        Ok(())
    }
}

/// An ordered collection of [`Suppression`]s.
#[derive(Debug, Default)]
pub struct Suppressions(Vec<Suppression>);

impl Suppressions {
    /// No suppressions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a suppression, builder style.
    pub fn with(mut self, suppression: Suppression) -> Self {
        self.push(suppression);
        self
    }

    /// Add a suppression.
    pub fn push(&mut self, suppression: Suppression) {
        self.0.push(suppression)
    }

    /// How many suppressions are registered.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Are there no suppressions?
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Apply all suppressions to `tree`.
    ///
    /// See the [module level documentation](self).
    pub fn apply<T: TreeValue>(&self, tree: &mut QueryTree<T>) -> SuppressionReport {
        let mut report = SuppressionReport::default();
        if !self.is_empty() {
            self.apply_at(tree, &mut vec![], &mut report);
        }
        report
    }

    /// Returns whether the value of `tree` changed.
    fn apply_at<T: TreeValue>(
        &self,
        tree: &mut QueryTree<T>,
        position: &mut Vec<usize>,
        report: &mut SuppressionReport,
    ) -> bool {
        let before = tree.value.to_value();
        let mut children_changed = false;
        for (i, child) in tree.children.iter_mut().enumerate() {
            position.push(i);
            children_changed |= self.apply_at(child, position, report);
            position.pop();
        }
        if children_changed {
            if let Some(v) = tree
                .operator()
                .recompute(&tree.children)
                .and_then(T::from_value)
            {
                tree.value = v;
            }
        }

        let Some(current) = tree.value.to_value().as_bool() else {
            return tree.value.to_value() != before;
        };
        let hit = self
            .0
            .iter()
            .find(|s| (s.matcher)(&QueryNodeRef::from_tree(tree)));
        if let Some(s) = hit {
            if let Some(v) = T::from_value(Value::Bool(s.value)) {
                tree.value = v;
            }
            let record = OverrideRecord {
                original: current,
                overridden: s.value,
                reason: s.reason.clone(),
            };
            log::info!(
                "Suppression at {position:?} changed {current} to {}: {}",
                s.value,
                s.reason
            );
            report.applied.push(AppliedOverride {
                position: position.clone(),
                node: tree.node(),
                record: record.clone(),
            });
            tree.override_record = Some(record);
        }
        tree.value.to_value() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{all_of, and, AssumptionKind};

    #[test]
    fn override_propagates_to_ancestors() {
        let bad = QueryTree::leaf(false).about(NodeId::new(3));
        let good = QueryTree::leaf(true).about(NodeId::new(4));
        let mut tree = and(all_of([good, bad]), QueryTree::leaf(true));
        assert!(!tree.holds());

        let report = Suppressions::new()
            .with(Suppression::for_node(NodeId::new(3), true, "sanitized upstream"))
            .apply(&mut tree);
        assert!(tree.holds());
        assert_eq!(report.applied.len(), 1);
        assert_eq!(report.applied[0].position, vec![0, 1]);
        let leaf = &tree.children()[0].children()[1];
        assert_eq!(leaf.value(), &Value::Bool(true));
        let record = leaf.override_record().unwrap();
        assert!(!record.original);
        assert_eq!(record.reason, "sanitized upstream");
        // The ancestors were recomputed, not overridden
        assert!(tree.override_record().is_none());
    }

    #[test]
    fn first_matching_suppression_wins() {
        let mut tree = QueryTree::leaf(true).assume(AssumptionKind::SoundnessCaveat, "x");
        let report = Suppressions::new()
            .with(Suppression::new(|n| n.num_children == 0, false, "first"))
            .with(Suppression::new(|_| true, true, "second"))
            .apply(&mut tree);
        assert!(!tree.holds());
        assert_eq!(report.applied.len(), 1);
        assert_eq!(tree.override_record().unwrap().reason, "first");
    }

    #[test]
    fn non_boolean_nodes_are_not_overridden() {
        let mut tree = crate::constant(3_i64).lt(crate::constant(5_i64));
        let report = Suppressions::new()
            .with(Suppression::new(
                |n| n.value.as_bool().is_none(),
                false,
                "never",
            ))
            .apply(&mut tree);
        assert!(report.is_empty());
        assert!(tree.holds());
    }
}
