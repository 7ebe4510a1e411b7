//! Precision knobs of the path search and the state they track.
//!
//! Each [`Sensitivity`] is an independent policy that decides whether an edge
//! may be taken given the abstract state accumulated so far on the path. The
//! state ([`PathState`]) is also what the search deduplicates on, so a node
//! reached under two different calling contexts is explored twice when
//! [`Sensitivity::ContextSensitive`] is set, and only once otherwise.

use std::fmt;

use cpg_facade::{CallBoundary, Direction, EdgeInfo, FieldAccess, Identifier, NodeId};
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;

/// A precision policy applied to every edge the search considers.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::EnumIter,
    strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
pub enum Sensitivity {
    /// Distinguish sub-fields of composite values. A value stored into `x.a`
    /// does not come back out of a load of `x.b`.
    FieldSensitive,
    /// Match calls with returns. A flow entering a function from call site 1
    /// only leaves it towards call site 1.
    ContextSensitive,
    /// Skip evaluation order edges that an external oracle marked as leading
    /// into dead code.
    FilterUnreachableControlFlow,
    /// Also follow control dependences when following data flow.
    TrackImplicitFlows,
}

impl Sensitivity {
    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

/// A set of [`Sensitivity`] policies.
///
/// Composes with `|`:
///
/// ```
/// use cpg_query::algo::{Sensitivities, Sensitivity};
/// let s = Sensitivity::FieldSensitive | Sensitivity::ContextSensitive;
/// assert!(s.contains(Sensitivity::ContextSensitive));
/// assert!(!s.contains(Sensitivity::TrackImplicitFlows));
/// ```
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Vec<Sensitivity>", into = "Vec<Sensitivity>")]
pub struct Sensitivities(u8);

impl Sensitivities {
    /// No policy, the most permissive search.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Every policy.
    pub fn all() -> Self {
        Sensitivity::iter().collect()
    }

    /// Is this policy part of the set?
    pub fn contains(self, s: Sensitivity) -> bool {
        self.0 & s.bit() != 0
    }

    /// Add a policy.
    pub fn with(self, s: Sensitivity) -> Self {
        Self(self.0 | s.bit())
    }

    /// Remove a policy.
    pub fn without(self, s: Sensitivity) -> Self {
        Self(self.0 & !s.bit())
    }

    /// Is the set empty?
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// The contained policies in declaration order.
    pub fn iter(self) -> impl Iterator<Item = Sensitivity> {
        Sensitivity::iter().filter(move |s| self.contains(*s))
    }
}

impl fmt::Debug for Sensitivities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl FromIterator<Sensitivity> for Sensitivities {
    fn from_iter<T: IntoIterator<Item = Sensitivity>>(iter: T) -> Self {
        iter.into_iter().fold(Self::empty(), Self::with)
    }
}

impl From<Vec<Sensitivity>> for Sensitivities {
    fn from(value: Vec<Sensitivity>) -> Self {
        value.into_iter().collect()
    }
}

impl From<Sensitivities> for Vec<Sensitivity> {
    fn from(value: Sensitivities) -> Self {
        value.iter().collect()
    }
}

impl From<Sensitivity> for Sensitivities {
    fn from(value: Sensitivity) -> Self {
        Self::empty().with(value)
    }
}

impl std::ops::BitOr for Sensitivities {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOr<Sensitivity> for Sensitivities {
    type Output = Self;
    fn bitor(self, rhs: Sensitivity) -> Self::Output {
        self.with(rhs)
    }
}

impl std::ops::BitOr for Sensitivity {
    type Output = Sensitivities;
    fn bitor(self, rhs: Self) -> Self::Output {
        Sensitivities::from(self).with(rhs)
    }
}

/// The abstract state of a search at one node.
///
/// `context` and `fields` stay empty unless the corresponding sensitivity is
/// enabled. Their top is the last element.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct PathState {
    pub(crate) node: NodeId,
    pub(crate) context: Vec<NodeId>,
    pub(crate) fields: Vec<Identifier>,
}

impl PathState {
    pub(crate) fn start(node: NodeId) -> Self {
        Self {
            node,
            context: vec![],
            fields: vec![],
        }
    }
}

/// The sensitivities of one search together with their stack bounds.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Policies {
    pub(crate) sensitivities: Sensitivities,
    pub(crate) max_field_depth: usize,
    pub(crate) max_context_depth: usize,
}

/// Whether following an access goes "into" a container (push) or back "out
/// of" it (pop).
enum StackOp<T> {
    Push(T),
    Pop(T),
}

impl Policies {
    /// Compute the state after taking `edge` from `from` in `direction`, or
    /// `None` if a policy forbids the edge.
    pub(crate) fn step(
        &self,
        from: &PathState,
        edge: &EdgeInfo,
        to: NodeId,
        direction: Direction,
    ) -> Option<PathState> {
        if self
            .sensitivities
            .contains(Sensitivity::FilterUnreachableControlFlow)
            && edge.unreachable
        {
            return None;
        }
        let context = if self.sensitivities.contains(Sensitivity::ContextSensitive) {
            match edge.boundary {
                Some(b) => apply(&from.context, context_op(b, direction), self.max_context_depth)?,
                None => from.context.clone(),
            }
        } else {
            vec![]
        };
        let fields = if self.sensitivities.contains(Sensitivity::FieldSensitive) {
            match edge.field {
                Some(f) => apply(&from.fields, field_op(f, direction), self.max_field_depth)?,
                None => from.fields.clone(),
            }
        } else {
            vec![]
        };
        Some(PathState {
            node: to,
            context,
            fields,
        })
    }
}

fn context_op(boundary: CallBoundary, direction: Direction) -> StackOp<NodeId> {
    let site = boundary.call_site();
    match (boundary, direction) {
        (CallBoundary::Call(_), Direction::Outgoing)
        | (CallBoundary::Return(_), Direction::Incoming) => StackOp::Push(site),
        (CallBoundary::Return(_), Direction::Outgoing)
        | (CallBoundary::Call(_), Direction::Incoming) => StackOp::Pop(site),
    }
}

fn field_op(access: FieldAccess, direction: Direction) -> StackOp<Identifier> {
    match (access, direction) {
        (FieldAccess::Store(f), Direction::Outgoing)
        | (FieldAccess::Load(f), Direction::Incoming) => StackOp::Push(f),
        (FieldAccess::Load(f), Direction::Outgoing)
        | (FieldAccess::Store(f), Direction::Incoming) => StackOp::Pop(f),
    }
}

/// Apply a push or pop to a k-limited stack.
///
/// Pushing onto a full stack forgets the oldest entry. Popping a mismatching
/// entry refuses the edge. Popping an empty stack is allowed, the path simply
/// started inside the container (or callee) it is now leaving.
fn apply<T: Copy + PartialEq>(stack: &[T], op: StackOp<T>, limit: usize) -> Option<Vec<T>> {
    let mut stack = stack.to_vec();
    match op {
        StackOp::Push(t) => {
            if stack.len() >= limit && !stack.is_empty() {
                stack.remove(0);
            }
            stack.push(t);
        }
        StackOp::Pop(t) => match stack.last() {
            None => (),
            Some(top) if *top == t => {
                stack.pop();
            }
            Some(_) => return None,
        },
    }
    Some(stack)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policies(s: impl Into<Sensitivities>) -> Policies {
        Policies {
            sensitivities: s.into(),
            max_field_depth: 2,
            max_context_depth: 2,
        }
    }

    #[test]
    fn sensitivities_compose() {
        let s = Sensitivity::FieldSensitive | Sensitivity::TrackImplicitFlows;
        assert!(s.contains(Sensitivity::FieldSensitive));
        assert!(!s.contains(Sensitivity::ContextSensitive));
        assert_eq!(s.without(Sensitivity::FieldSensitive).iter().count(), 1);
        assert_eq!(Sensitivities::all().iter().count(), 4);
        assert!(Sensitivities::empty().is_empty());
    }

    #[test]
    fn context_matches_calls_with_returns() {
        let p = policies(Sensitivity::ContextSensitive);
        let cs1 = NodeId::new(10);
        let cs2 = NodeId::new(11);
        let start = PathState::start(NodeId::new(0));
        let call = EdgeInfo::data().with_boundary(CallBoundary::Call(cs1));
        let inside = p
            .step(&start, &call, NodeId::new(1), Direction::Outgoing)
            .unwrap();
        assert_eq!(inside.context, vec![cs1]);

        let wrong = EdgeInfo::data().with_boundary(CallBoundary::Return(cs2));
        assert!(p
            .step(&inside, &wrong, NodeId::new(2), Direction::Outgoing)
            .is_none());
        let right = EdgeInfo::data().with_boundary(CallBoundary::Return(cs1));
        let back = p
            .step(&inside, &right, NodeId::new(2), Direction::Outgoing)
            .unwrap();
        assert!(back.context.is_empty());
        // unbalanced return from the start context
        assert!(p
            .step(&start, &wrong, NodeId::new(2), Direction::Outgoing)
            .is_some());
    }

    #[test]
    fn backward_inverts_the_stack_discipline() {
        let p = policies(Sensitivity::ContextSensitive);
        let cs = NodeId::new(7);
        let start = PathState::start(NodeId::new(0));
        let ret = EdgeInfo::data().with_boundary(CallBoundary::Return(cs));
        let inside = p
            .step(&start, &ret, NodeId::new(1), Direction::Incoming)
            .unwrap();
        assert_eq!(inside.context, vec![cs]);
        let call = EdgeInfo::data().with_boundary(CallBoundary::Call(NodeId::new(8)));
        assert!(p
            .step(&inside, &call, NodeId::new(2), Direction::Incoming)
            .is_none());
    }

    #[test]
    fn field_stack_is_bounded() {
        let p = policies(Sensitivity::FieldSensitive);
        let mut state = PathState::start(NodeId::new(0));
        for f in ["a", "b", "c"] {
            let e = EdgeInfo::data().with_field(FieldAccess::Store(f.into()));
            state = p
                .step(&state, &e, NodeId::new(1), Direction::Outgoing)
                .unwrap();
        }
        assert_eq!(state.fields, vec!["b".into(), "c".into()]);
        let load_b = EdgeInfo::data().with_field(FieldAccess::Load("b".into()));
        assert!(p
            .step(&state, &load_b, NodeId::new(2), Direction::Outgoing)
            .is_none());
    }

    #[test]
    fn insensitive_search_ignores_annotations() {
        let p = policies(Sensitivities::empty());
        let start = PathState::start(NodeId::new(0));
        let e = EdgeInfo::data()
            .with_field(FieldAccess::Load("x".into()))
            .with_boundary(CallBoundary::Return(NodeId::new(3)))
            .unreachable();
        let next = p
            .step(&start, &e, NodeId::new(1), Direction::Outgoing)
            .unwrap();
        assert_eq!(next, PathState::start(NodeId::new(1)));
        assert!(policies(Sensitivity::FilterUnreachableControlFlow)
            .step(&start, &e, NodeId::new(1), Direction::Outgoing)
            .is_none());
    }
}
