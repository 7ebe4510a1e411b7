//! Turning a finished [`QueryTree`] into diagnostics.

use crate::{
    diagnostics::{Diagnostics, HasDiagnosticsBase},
    query_tree::{Operator, Value},
    QueryTree,
};

/// Find the nodes responsible for a subtree not having the `expected` value.
///
/// Descends into children that also miss their expectation (flipped below a
/// `not`). A mismatching node without mismatching boolean children is a
/// culprit itself.
fn culprits<'a>(tree: &'a QueryTree<Value>, expected: bool, out: &mut Vec<&'a QueryTree<Value>>) {
    if tree.value().as_bool() == Some(expected) {
        return;
    }
    let child_expectation = if tree.operator() == Operator::Not {
        !expected
    } else {
        expected
    };
    let before = out.len();
    if !matches!(tree.operator(), Operator::Compare(_) | Operator::In) {
        for child in tree.children() {
            if child.value().as_bool().is_some() {
                culprits(child, child_expectation, out);
            }
        }
    }
    if out.len() == before {
        out.push(tree);
    }
}

impl QueryTree<bool> {
    /// Record diagnostics for this result.
    ///
    /// A failing tree yields one error per culprit, the deepest results that
    /// contradict the verdict, with the evidence path as notes. Recorded
    /// assumptions, overrides and truncation are attached as a separate note,
    /// also for trees that hold.
    pub fn report<D: HasDiagnosticsBase + ?Sized>(&self, ctx: &D) {
        if !self.holds() {
            let erased = self.clone().erase();
            let mut found = vec![];
            culprits(&erased, true, &mut found);
            for culprit in found {
                let msg = culprit
                    .explanation()
                    .map_or_else(|| "requirement does not hold".to_owned(), str::to_owned);
                let mut diag = match culprit.node() {
                    Some(node) => ctx.struct_node_error(node, msg),
                    None => ctx.struct_error(msg),
                };
                let path = culprit.path();
                for (i, node) in path.iter().enumerate() {
                    diag.with_node_note(*node, format!("step {} of {}", i + 1, path.len()));
                }
                diag.emit();
            }
        }
        self.report_caveats(ctx);
    }

    fn report_caveats<D: HasDiagnosticsBase + ?Sized>(&self, ctx: &D) {
        let assumptions = self.all_assumptions();
        let mut overrides = vec![];
        self.visit(&mut |pos, n| {
            if let Some(o) = n.override_record {
                overrides.push((pos.to_vec(), n.node, o.clone()));
            }
        });
        let truncated = self.truncated();
        if assumptions.is_empty() && overrides.is_empty() && !truncated {
            return;
        }
        let verdict = if self.holds() { "holds" } else { "does not hold" };
        let mut diag = ctx.struct_note(format!("the result ({verdict}) depends on these caveats"));
        for a in assumptions {
            diag.with_note(format!("assuming {a}"));
        }
        for (pos, node, o) in overrides {
            let at = node.map_or_else(|| format!("{pos:?}"), |n| format!("{pos:?} ({n})"));
            diag.with_help(format!(
                "result at {at} was overridden from {} to {}: {}",
                o.original, o.overridden, o.reason
            ));
        }
        if truncated {
            diag.with_help(
                "exploration was cut off by the interprocedural budget, raise `max_steps` for a complete result",
            );
        }
        diag.emit();
    }
}
