//! Caveats a result depends on.
//!
//! A query can only be as sound as the graph it runs on. When a predicate
//! relies on something the engine cannot check (the label set being complete,
//! a call target being resolved the right way) it records an [`Assumption`]
//! on the tree node it produces via
//! [`QueryTree::assume`](crate::QueryTree::assume). Assumptions travel with
//! the tree, are collected with
//! [`QueryTree::all_assumptions`](crate::QueryTree::all_assumptions) and are
//! printed as notes when the tree is reported.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The category of an [`Assumption`].
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, strum::AsRefStr, strum::EnumIter,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AssumptionKind {
    /// The nodes a quantifier ranged over are all the nodes that matter, e.g.
    /// the labeling pass found every secret.
    ExhaustiveEnumeration,
    /// The node the search started from is the right one to start from.
    InferenceStartPoint,
    /// An ambiguous call or type was resolved the way the query expects.
    AmbiguousResolution,
    /// The exploration stopped early (e.g. at a budget), results beyond that
    /// point were not inspected.
    BoundedExploration,
    /// Anything else that affects soundness.
    SoundnessCaveat,
}

/// One recorded caveat.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Assumption {
    /// What kind of caveat this is
    pub kind: AssumptionKind,
    /// Why it is believed to be fine
    pub justification: String,
}

impl Assumption {
    /// Construct a new assumption.
    pub fn new(kind: AssumptionKind, justification: impl Into<String>) -> Self {
        Self {
            kind,
            justification: justification.into(),
        }
    }
}

impl fmt::Display for Assumption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind.as_ref(), self.justification)
    }
}
