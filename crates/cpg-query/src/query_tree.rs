//! Explainable query results.
//!
//! Every predicate and combinator in this crate returns a [`QueryTree`]
//! instead of a plain value. The tree carries the value together with the
//! evidence it was computed from: the operator that combined the children,
//! the graph node and path the result is about, a human readable
//! explanation, recorded [`Assumption`]s and, if a suppression applied, an
//! [`OverrideRecord`].
//!
//! Trees are built bottom-up and are immutable from the outside. The only
//! thing that changes a finished tree is
//! [`Suppressions::apply`](crate::Suppressions::apply).
//!
//! Children are stored type erased as `QueryTree<Value>`, so that e.g. a
//! comparison over two integer valued trees can sit inside a boolean
//! conjunction.

use std::{cmp::Ordering, fmt};

use cpg_facade::NodeId;
use itertools::Itertools;
use serde::Serialize;

use crate::algo::{AnalysisType, PathOutcome};
use crate::assumption::{Assumption, AssumptionKind};
use crate::suppression::OverrideRecord;

/// A type erased result value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    /// A truth value
    Bool(bool),
    /// An integer
    Int(i64),
    /// A string
    Str(String),
    /// A graph node
    Node(NodeId),
    /// A list (e.g. a node set)
    List(Vec<Value>),
}

impl Value {
    /// The truth value, if this is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Order two values of the same shape. Lists are only comparable for
    /// equality. Values of different shapes are incomparable.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            (Value::Node(a), Value::Node(b)) => Some(a.cmp(b)),
            (Value::List(a), Value::List(b)) if a == b => Some(Ordering::Equal),
            _ => None,
        }
    }

    /// Membership: an element of a list or a substring of a string.
    pub fn contains(&self, needle: &Value) -> bool {
        match (self, needle) {
            (Value::List(items), _) => items.contains(needle),
            (Value::Str(hay), Value::Str(n)) => hay.contains(n.as_str()),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => fmt::Display::fmt(b, f),
            Value::Int(i) => fmt::Display::fmt(i, f),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Node(n) => fmt::Display::fmt(n, f),
            Value::List(l) => write!(f, "[{}]", l.iter().format(", ")),
        }
    }
}

/// Values that can be the result of a [`QueryTree`].
pub trait TreeValue: Clone + fmt::Debug + Serialize {
    /// Erase the type.
    fn to_value(&self) -> Value;
    /// Recover the typed value, `None` if the shape does not match.
    fn from_value(value: Value) -> Option<Self>;
}

macro_rules! tree_value {
    ($t:ty, $variant:ident) => {
        impl TreeValue for $t {
            fn to_value(&self) -> Value {
                Value::$variant(self.clone())
            }
            fn from_value(value: Value) -> Option<Self> {
                match value {
                    Value::$variant(v) => Some(v),
                    _ => None,
                }
            }
        }
    };
}

tree_value!(bool, Bool);
tree_value!(i64, Int);
tree_value!(String, Str);
tree_value!(NodeId, Node);

impl TreeValue for Value {
    fn to_value(&self) -> Value {
        self.clone()
    }
    fn from_value(value: Value) -> Option<Self> {
        Some(value)
    }
}

impl<T: TreeValue> TreeValue for Vec<T> {
    fn to_value(&self) -> Value {
        Value::List(self.iter().map(T::to_value).collect())
    }
    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::List(items) => items.into_iter().map(T::from_value).collect(),
            _ => None,
        }
    }
}

/// A relational comparison.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, strum::AsRefStr)]
pub enum CompareOp {
    /// `==`
    #[strum(serialize = "==")]
    Eq,
    /// `!=`
    #[strum(serialize = "!=")]
    Ne,
    /// `>`
    #[strum(serialize = ">")]
    Gt,
    /// `>=`
    #[strum(serialize = ">=")]
    Ge,
    /// `<`
    #[strum(serialize = "<")]
    Lt,
    /// `<=`
    #[strum(serialize = "<=")]
    Le,
}

impl CompareOp {
    /// Evaluate the comparison. Incomparable values only satisfy `!=`.
    pub fn eval(self, left: &Value, right: &Value) -> bool {
        let Some(ord) = left.compare(right) else {
            return self == CompareOp::Ne;
        };
        match self {
            CompareOp::Eq => ord.is_eq(),
            CompareOp::Ne => ord.is_ne(),
            CompareOp::Gt => ord.is_gt(),
            CompareOp::Ge => ord.is_ge(),
            CompareOp::Lt => ord.is_lt(),
            CompareOp::Le => ord.is_le(),
        }
    }
}

/// How a tree node derived its value from its children.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    /// A value that was computed directly
    Leaf,
    /// Conjunction of two results
    And,
    /// Disjunction of two results
    Or,
    /// Negation of one result
    Not,
    /// Universal quantification, holds over zero children
    All,
    /// Existential quantification, fails over zero children
    Any,
    /// A reachability predicate, one child per relevant path
    Reach(AnalysisType),
    /// One explored path
    Path(PathOutcome),
    /// Comparison of two values
    Compare(CompareOp),
    /// Membership of the first child's value in the second's
    In,
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operator::Leaf => f.write_str("leaf"),
            Operator::And => f.write_str("and"),
            Operator::Or => f.write_str("or"),
            Operator::Not => f.write_str("not"),
            Operator::All => f.write_str("all"),
            Operator::Any => f.write_str("any"),
            Operator::Reach(a) => write!(f, "{} reach", a.as_ref()),
            Operator::Path(o) => write!(f, "path ({})", o.as_ref()),
            Operator::Compare(c) => f.write_str(c.as_ref()),
            Operator::In => f.write_str("in"),
        }
    }
}

impl Operator {
    /// Compute the value this operator yields for these children.
    ///
    /// `None` for operators whose value does not derive from children
    /// ([`Self::Leaf`], [`Self::Path`]) and for children of the wrong shape.
    pub(crate) fn recompute(self, children: &[QueryTree<Value>]) -> Option<Value> {
        let bools = || {
            children
                .iter()
                .map(|c| c.value().as_bool())
                .collect::<Option<Vec<_>>>()
        };
        let b = match self {
            Operator::Leaf | Operator::Path(_) => return None,
            Operator::And | Operator::All => bools()?.into_iter().all(|b| b),
            Operator::Or | Operator::Any | Operator::Reach(AnalysisType::May) => {
                bools()?.into_iter().any(|b| b)
            }
            Operator::Reach(AnalysisType::Must) => {
                let bs = bools()?;
                !bs.is_empty() && bs.into_iter().all(|b| b)
            }
            Operator::Not => !children.first()?.value().as_bool()?,
            Operator::Compare(op) => {
                let [l, r] = children else { return None };
                op.eval(l.value(), r.value())
            }
            Operator::In => {
                let [needle, hay] = children else { return None };
                hay.value().contains(needle.value())
            }
        };
        Some(Value::Bool(b))
    }
}

/// An explainable result.
///
/// See the [module level documentation](self).
#[derive(Clone, Debug, Serialize)]
pub struct QueryTree<T = bool> {
    pub(crate) value: T,
    operator: Operator,
    #[serde(skip_serializing_if = "Option::is_none")]
    node: Option<NodeId>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    path: Vec<NodeId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    explanation: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    assumptions: Vec<Assumption>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) override_record: Option<OverrideRecord>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub(crate) children: Vec<QueryTree<Value>>,
}

impl<T: TreeValue> From<T> for QueryTree<T> {
    fn from(value: T) -> Self {
        QueryTree::leaf(value)
    }
}

impl<T: TreeValue> QueryTree<T> {
    /// A directly computed value without children.
    pub fn leaf(value: T) -> Self {
        Self::new(value, Operator::Leaf, vec![])
    }

    /// A value derived from `children` with `operator`.
    pub fn new(value: T, operator: Operator, children: Vec<QueryTree<Value>>) -> Self {
        Self {
            value,
            operator,
            node: None,
            path: vec![],
            explanation: None,
            assumptions: vec![],
            override_record: None,
            children,
        }
    }

    /// Attach an explanation.
    pub fn with_explanation(mut self, explanation: impl Into<String>) -> Self {
        self.explanation = Some(explanation.into());
        self
    }

    /// Record which graph node this result is about.
    pub fn about(mut self, node: NodeId) -> Self {
        self.node = Some(node);
        self
    }

    /// Attach the path that serves as evidence.
    pub fn with_path(mut self, path: Vec<NodeId>) -> Self {
        self.path = path;
        self
    }

    /// Record a caveat this result depends on.
    pub fn assume(mut self, kind: AssumptionKind, justification: impl Into<String>) -> Self {
        self.assumptions.push(Assumption::new(kind, justification));
        self
    }

    /// The result.
    pub fn value(&self) -> &T {
        &self.value
    }

    /// Take the result out of the tree.
    pub fn into_value(self) -> T {
        self.value
    }

    /// How the result was derived.
    pub fn operator(&self) -> Operator {
        self.operator
    }

    /// The graph node this result is about.
    pub fn node(&self) -> Option<NodeId> {
        self.node
    }

    /// The evidence path, empty if there is none or tracing is disabled.
    pub fn path(&self) -> &[NodeId] {
        &self.path
    }

    /// The human readable explanation.
    pub fn explanation(&self) -> Option<&str> {
        self.explanation.as_deref()
    }

    /// Caveats recorded on this node (not its descendants).
    pub fn assumptions(&self) -> &[Assumption] {
        &self.assumptions
    }

    /// The sub-results.
    pub fn children(&self) -> &[QueryTree<Value>] {
        &self.children
    }

    /// Set if a suppression changed the value of this node.
    pub fn override_record(&self) -> Option<&OverrideRecord> {
        self.override_record.as_ref()
    }

    /// Every assumption recorded in this tree, in pre-order, without
    /// duplicates.
    pub fn all_assumptions(&self) -> Vec<&Assumption> {
        let mut all = vec![];
        self.visit(&mut |_, n| all.extend(n.assumptions()));
        all.into_iter().unique().collect()
    }

    /// Was any part of this result cut off by the interprocedural budget?
    pub fn truncated(&self) -> bool {
        self.operator == Operator::Path(PathOutcome::Truncated)
            || self.children.iter().any(QueryTree::truncated)
    }

    /// Erase the value type.
    pub fn erase(self) -> QueryTree<Value> {
        QueryTree {
            value: self.value.to_value(),
            operator: self.operator,
            node: self.node,
            path: self.path,
            explanation: self.explanation,
            assumptions: self.assumptions,
            override_record: self.override_record,
            children: self.children,
        }
    }

    /// Call `f` for this node and all descendants in pre-order. The slice is
    /// the position of the node, as child indices from the root.
    pub fn visit<'a>(&'a self, f: &mut dyn FnMut(&[usize], &QueryNodeRef<'a>)) {
        let mut position = vec![];
        self.visit_at(&mut position, f)
    }

    fn visit_at<'a>(
        &'a self,
        position: &mut Vec<usize>,
        f: &mut dyn FnMut(&[usize], &QueryNodeRef<'a>),
    ) {
        f(position, &QueryNodeRef::from_tree(self));
        for (i, child) in self.children.iter().enumerate() {
            position.push(i);
            child.visit_at(position, f);
            position.pop();
        }
    }
}

impl QueryTree<bool> {
    /// Shorthand for the value of a boolean tree.
    pub fn holds(&self) -> bool {
        self.value
    }

    /// Fails if [`Self::holds`] is false, with the rendered tree as message.
    pub fn assert_holds(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.holds(), "Query does not hold:\n{self}");
        Ok(())
    }
}

/// A borrowed, type erased view of one tree node, handed to visitors and
/// suppression matchers.
#[derive(Debug, Clone)]
pub struct QueryNodeRef<'a> {
    /// The node's value
    pub value: Value,
    /// How it was derived
    pub operator: Operator,
    /// Graph node the result is about
    pub node: Option<NodeId>,
    /// Evidence path
    pub path: &'a [NodeId],
    /// Explanation
    pub explanation: Option<&'a str>,
    /// Caveats recorded on this node
    pub assumptions: &'a [Assumption],
    /// Override, if one applied
    pub override_record: Option<&'a OverrideRecord>,
    /// Number of children
    pub num_children: usize,
}

impl<'a> QueryNodeRef<'a> {
    pub(crate) fn from_tree<T: TreeValue>(tree: &'a QueryTree<T>) -> Self {
        Self {
            value: tree.value.to_value(),
            operator: tree.operator,
            node: tree.node,
            path: &tree.path,
            explanation: tree.explanation.as_deref(),
            assumptions: &tree.assumptions,
            override_record: tree.override_record.as_ref(),
            num_children: tree.children.len(),
        }
    }

    /// Caveats recorded on this node.
    pub fn assumptions(&self) -> &'a [Assumption] {
        self.assumptions
    }
}

impl<T: TreeValue> fmt::Display for QueryTree<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut result = Ok(());
        self.visit(&mut |pos, n| {
            if result.is_err() {
                return;
            }
            result = write_node_line(f, pos.len(), n);
        });
        result
    }
}

fn write_node_line(f: &mut fmt::Formatter<'_>, depth: usize, n: &QueryNodeRef) -> fmt::Result {
    write!(f, "{:indent$}", "", indent = depth * 2)?;
    match n.value.as_bool() {
        Some(true) => f.write_str("✓")?,
        Some(false) => f.write_str("✗")?,
        None => write!(f, "{}", n.value)?,
    }
    write!(f, " {}", n.operator)?;
    if let Some(node) = n.node {
        write!(f, " @{node}")?;
    }
    if let Some(e) = n.explanation {
        write!(f, ": {e}")?;
    }
    if let Some(o) = n.override_record {
        write!(f, " (overridden from {}: {})", o.original, o.reason)?;
    }
    writeln!(f)
}
