//! Combining [`QueryTree`]s.
//!
//! All combinators keep every operand as a child, even where the result
//! would be determined by the first one. `and(false, x)` still shows `x` in
//! the report, so a reader sees everything that went into a verdict.
//!
//! ```
//! use cpg_query::{and, not, QueryTree};
//! let t = and(QueryTree::leaf(true), not(QueryTree::leaf(true)));
//! assert!(!t.holds());
//! assert_eq!(t.children().len(), 2);
//! ```

use crate::query_tree::{CompareOp, Operator, QueryTree, TreeValue};

fn verdict(b: bool) -> &'static str {
    if b {
        "holds"
    } else {
        "does not hold"
    }
}

/// Conjunction.
pub fn and(left: QueryTree<bool>, right: QueryTree<bool>) -> QueryTree<bool> {
    let (l, r) = (*left.value(), *right.value());
    let explanation = match (l, r) {
        (true, true) => "both operands hold",
        (false, true) => "the left operand does not hold",
        (true, false) => "the right operand does not hold",
        (false, false) => "neither operand holds",
    };
    QueryTree::new(l && r, Operator::And, vec![left.erase(), right.erase()])
        .with_explanation(explanation)
}

/// Disjunction.
pub fn or(left: QueryTree<bool>, right: QueryTree<bool>) -> QueryTree<bool> {
    let (l, r) = (*left.value(), *right.value());
    let explanation = match (l, r) {
        (true, true) => "both operands hold",
        (true, false) => "the left operand holds",
        (false, true) => "the right operand holds",
        (false, false) => "neither operand holds",
    };
    QueryTree::new(l || r, Operator::Or, vec![left.erase(), right.erase()])
        .with_explanation(explanation)
}

/// Negation.
pub fn not(inner: QueryTree<bool>) -> QueryTree<bool> {
    let v = *inner.value();
    QueryTree::new(!v, Operator::Not, vec![inner.erase()])
        .with_explanation(format!("negation of a result that {}", verdict(v)))
}

/// Holds if every tree holds, and over an empty collection.
pub fn all_of(trees: impl IntoIterator<Item = QueryTree<bool>>) -> QueryTree<bool> {
    let children = trees.into_iter().map(QueryTree::erase).collect::<Vec<_>>();
    let failing = children
        .iter()
        .filter(|c| c.value().as_bool() != Some(true))
        .count();
    let explanation = if children.is_empty() {
        "vacuously true, there was nothing to check".to_owned()
    } else {
        format!("{failing} of {} operands do not hold", children.len())
    };
    QueryTree::new(failing == 0, Operator::All, children).with_explanation(explanation)
}

/// Holds if some tree holds, fails over an empty collection.
pub fn any_of(trees: impl IntoIterator<Item = QueryTree<bool>>) -> QueryTree<bool> {
    let children = trees.into_iter().map(QueryTree::erase).collect::<Vec<_>>();
    let holding = children
        .iter()
        .filter(|c| c.value().as_bool() == Some(true))
        .count();
    let explanation = if children.is_empty() {
        "vacuously false, there was nothing to check".to_owned()
    } else {
        format!("{holding} of {} operands hold", children.len())
    };
    QueryTree::new(holding > 0, Operator::Any, children).with_explanation(explanation)
}

/// Fold an iterator of results with [`all_of`] or [`any_of`].
pub trait MergeTrees: Iterator<Item = QueryTree<bool>> + Sized {
    /// See [`all_of`]
    fn merge_with_all(self) -> QueryTree<bool> {
        all_of(self)
    }

    /// See [`any_of`]
    fn merge_with_any(self) -> QueryTree<bool> {
        any_of(self)
    }
}

impl<I: Iterator<Item = QueryTree<bool>>> MergeTrees for I {}

impl std::ops::BitAnd for QueryTree<bool> {
    type Output = QueryTree<bool>;
    fn bitand(self, rhs: Self) -> Self::Output {
        and(self, rhs)
    }
}

impl std::ops::BitOr for QueryTree<bool> {
    type Output = QueryTree<bool>;
    fn bitor(self, rhs: Self) -> Self::Output {
        or(self, rhs)
    }
}

impl std::ops::Not for QueryTree<bool> {
    type Output = QueryTree<bool>;
    fn not(self) -> Self::Output {
        not(self)
    }
}

fn compare<T: TreeValue, U: TreeValue>(
    left: QueryTree<T>,
    op: CompareOp,
    right: QueryTree<U>,
) -> QueryTree<bool> {
    let (l, r) = (left.value().to_value(), right.value().to_value());
    let result = op.eval(&l, &r);
    QueryTree::new(
        result,
        Operator::Compare(op),
        vec![left.erase(), right.erase()],
    )
    .with_explanation(format!("{l} {} {r}", op.as_ref()))
}

#[allow(clippy::should_implement_trait)]
impl<T: TreeValue> QueryTree<T> {
    /// `self == other`
    pub fn eq<U: TreeValue>(self, other: QueryTree<U>) -> QueryTree<bool> {
        compare(self, CompareOp::Eq, other)
    }

    /// `self != other`
    pub fn ne<U: TreeValue>(self, other: QueryTree<U>) -> QueryTree<bool> {
        compare(self, CompareOp::Ne, other)
    }

    /// `self > other`
    pub fn gt<U: TreeValue>(self, other: QueryTree<U>) -> QueryTree<bool> {
        compare(self, CompareOp::Gt, other)
    }

    /// `self >= other`
    pub fn ge<U: TreeValue>(self, other: QueryTree<U>) -> QueryTree<bool> {
        compare(self, CompareOp::Ge, other)
    }

    /// `self < other`
    pub fn lt<U: TreeValue>(self, other: QueryTree<U>) -> QueryTree<bool> {
        compare(self, CompareOp::Lt, other)
    }

    /// `self <= other`
    pub fn le<U: TreeValue>(self, other: QueryTree<U>) -> QueryTree<bool> {
        compare(self, CompareOp::Le, other)
    }

    /// Is this value an element of `collection`?
    pub fn is_in<U: TreeValue>(self, collection: QueryTree<U>) -> QueryTree<bool> {
        let (needle, hay) = (self.value().to_value(), collection.value().to_value());
        let result = hay.contains(&needle);
        QueryTree::new(result, Operator::In, vec![self.erase(), collection.erase()])
            .with_explanation(format!("{needle} in {hay}"))
    }
}

/// Lift a plain value into a leaf, for use as a comparison operand.
pub fn constant<T: TreeValue>(value: T) -> QueryTree<T> {
    QueryTree::leaf(value)
}
