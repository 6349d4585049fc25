//! Policies deciding whether an attribute change must be persisted.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::value::AttributeValue;

/// Decides whether replacing `old` with `new` makes a session dirty.
///
/// Any `Fn(Option<&AttributeValue>, Option<&AttributeValue>) -> bool` closure
/// is a predicate.
pub trait IsDirtyPredicate: Send + Sync {
    /// Whether the change from `old` to `new` needs to be persisted.
    fn is_dirty(&self, old: Option<&AttributeValue>, new: Option<&AttributeValue>) -> bool;

    /// Dirty only when both this predicate and `other` say so.
    fn and_then<P>(self, other: P) -> AndThen<Self, P>
    where
        Self: Sized,
        P: IsDirtyPredicate,
    {
        AndThen(self, other)
    }

    /// Dirty when either this predicate or `other` says so.
    fn or_else<P>(self, other: P) -> OrElse<Self, P>
    where
        Self: Sized,
        P: IsDirtyPredicate,
    {
        OrElse(self, other)
    }
}

impl<F> IsDirtyPredicate for F
where
    F: Fn(Option<&AttributeValue>, Option<&AttributeValue>) -> bool + Send + Sync,
{
    fn is_dirty(&self, old: Option<&AttributeValue>, new: Option<&AttributeValue>) -> bool {
        self(old, new)
    }
}

/// Shared predicate handle, as stored by sessions and repositories.
pub type SharedDirtyPredicate = Arc<dyn IsDirtyPredicate>;

/// Every change is dirty.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysDirty;

impl IsDirtyPredicate for AlwaysDirty {
    fn is_dirty(&self, _old: Option<&AttributeValue>, _new: Option<&AttributeValue>) -> bool {
        true
    }
}

/// No change is dirty.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverDirty;

impl IsDirtyPredicate for NeverDirty {
    fn is_dirty(&self, _old: Option<&AttributeValue>, _new: Option<&AttributeValue>) -> bool {
        false
    }
}

/// Dirty when the new value is absent or not equal to the old one.
#[derive(Debug, Clone, Copy, Default)]
pub struct EqualsDirty;

impl IsDirtyPredicate for EqualsDirty {
    fn is_dirty(&self, old: Option<&AttributeValue>, new: Option<&AttributeValue>) -> bool {
        match new {
            None => true,
            Some(new) => old != Some(new),
        }
    }
}

/// Dirty when the new value is not the very same value as the old one.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityDirty;

impl IsDirtyPredicate for IdentityDirty {
    fn is_dirty(&self, old: Option<&AttributeValue>, new: Option<&AttributeValue>) -> bool {
        !same_value(old, new)
    }
}

/// Default policy.
///
/// A different value is always dirty. Re-setting the same value is dirty
/// unless the value tracks its own changes, in which case its
/// [`DeltaAware::has_delta`](crate::value::DeltaAware::has_delta) decides.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeltaAwareDirty;

impl IsDirtyPredicate for DeltaAwareDirty {
    fn is_dirty(&self, old: Option<&AttributeValue>, new: Option<&AttributeValue>) -> bool {
        if !same_value(old, new) {
            return true;
        }
        new.and_then(AttributeValue::as_delta_aware)
            .is_none_or(|delta| delta.has_delta())
    }
}

/// Conjunction of two predicates.
#[derive(Debug, Clone, Copy)]
pub struct AndThen<A, B>(A, B);

impl<A: IsDirtyPredicate, B: IsDirtyPredicate> IsDirtyPredicate for AndThen<A, B> {
    fn is_dirty(&self, old: Option<&AttributeValue>, new: Option<&AttributeValue>) -> bool {
        self.0.is_dirty(old, new) && self.1.is_dirty(old, new)
    }
}

/// Disjunction of two predicates.
#[derive(Debug, Clone, Copy)]
pub struct OrElse<A, B>(A, B);

impl<A: IsDirtyPredicate, B: IsDirtyPredicate> IsDirtyPredicate for OrElse<A, B> {
    fn is_dirty(&self, old: Option<&AttributeValue>, new: Option<&AttributeValue>) -> bool {
        self.0.is_dirty(old, new) || self.1.is_dirty(old, new)
    }
}

fn same_value(old: Option<&AttributeValue>, new: Option<&AttributeValue>) -> bool {
    match (old, new) {
        (Some(old), Some(new)) => old.ptr_eq(new),
        (None, None) => true,
        _ => false,
    }
}

/// Built-in predicates, selectable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirtyPredicateKind {
    /// [`AlwaysDirty`].
    Always,
    /// [`NeverDirty`].
    Never,
    /// [`EqualsDirty`].
    Equals,
    /// [`IdentityDirty`].
    Identity,
    /// [`DeltaAwareDirty`].
    #[default]
    DeltaAware,
}

impl DirtyPredicateKind {
    /// Instantiate the predicate.
    pub fn predicate(self) -> SharedDirtyPredicate {
        match self {
            DirtyPredicateKind::Always => Arc::new(AlwaysDirty),
            DirtyPredicateKind::Never => Arc::new(NeverDirty),
            DirtyPredicateKind::Equals => Arc::new(EqualsDirty),
            DirtyPredicateKind::Identity => Arc::new(IdentityDirty),
            DirtyPredicateKind::DeltaAware => Arc::new(DeltaAwareDirty),
        }
    }
}

impl fmt::Display for DirtyPredicateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirtyPredicateKind::Always => write!(f, "always"),
            DirtyPredicateKind::Never => write!(f, "never"),
            DirtyPredicateKind::Equals => write!(f, "equals"),
            DirtyPredicateKind::Identity => write!(f, "identity"),
            DirtyPredicateKind::DeltaAware => write!(f, "delta_aware"),
        }
    }
}

/// The predicate used when none is configured.
pub fn default_dirty_predicate() -> SharedDirtyPredicate {
    Arc::new(DeltaAwareDirty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::testing::Tracked;

    fn value(s: &str) -> AttributeValue {
        AttributeValue::from(s)
    }

    #[test]
    fn test_always_and_never() {
        let v = value("a");
        assert!(AlwaysDirty.is_dirty(Some(&v), Some(&v)));
        assert!(AlwaysDirty.is_dirty(None, None));
        assert!(!NeverDirty.is_dirty(None, Some(&v)));
        assert!(!NeverDirty.is_dirty(Some(&v), None));
    }

    #[test]
    fn test_equals_dirty() {
        let a = value("a");
        let same_contents = value("a");
        let b = value("b");

        assert!(!EqualsDirty.is_dirty(Some(&a), Some(&same_contents)));
        assert!(EqualsDirty.is_dirty(Some(&a), Some(&b)));
        assert!(EqualsDirty.is_dirty(None, Some(&a)));
        assert!(EqualsDirty.is_dirty(Some(&a), None));
    }

    #[test]
    fn test_identity_dirty() {
        let a = value("a");
        let same_contents = value("a");

        assert!(!IdentityDirty.is_dirty(Some(&a), Some(&a.clone())));
        assert!(IdentityDirty.is_dirty(Some(&a), Some(&same_contents)));
        assert!(IdentityDirty.is_dirty(None, Some(&a)));
    }

    #[test]
    fn test_delta_aware_dirty() {
        let plain = value("a");
        assert!(DeltaAwareDirty.is_dirty(Some(&plain), Some(&plain)));
        assert!(DeltaAwareDirty.is_dirty(None, Some(&plain)));

        let tracked = AttributeValue::new(Tracked::default());
        assert!(!DeltaAwareDirty.is_dirty(Some(&tracked), Some(&tracked)));

        tracked.downcast_ref::<Tracked>().unwrap().touch();
        assert!(DeltaAwareDirty.is_dirty(Some(&tracked), Some(&tracked)));

        let other = AttributeValue::new(Tracked::default());
        assert!(DeltaAwareDirty.is_dirty(Some(&tracked), Some(&other)));
    }

    #[test]
    fn test_combinators() {
        let a = value("a");
        let b = value("b");

        let both = AlwaysDirty.and_then(EqualsDirty);
        assert!(!both.is_dirty(Some(&a), Some(&a.clone())));
        assert!(both.is_dirty(Some(&a), Some(&b)));

        let either = NeverDirty.or_else(EqualsDirty);
        assert!(either.is_dirty(Some(&a), Some(&b)));
        assert!(!either.is_dirty(Some(&a), Some(&a)));
    }

    #[test]
    fn test_closure_predicate() {
        let only_removals =
            |_old: Option<&AttributeValue>, new: Option<&AttributeValue>| new.is_none();
        assert!(only_removals.is_dirty(Some(&value("a")), None));
        assert!(!only_removals.is_dirty(None, Some(&value("a"))));
    }

    #[test]
    fn test_kind_round_trips_through_serde() {
        let kind: DirtyPredicateKind = serde_json::from_str("\"delta_aware\"").unwrap();
        assert_eq!(kind, DirtyPredicateKind::DeltaAware);
        assert_eq!(DirtyPredicateKind::Equals.to_string(), "equals");

        let predicate = DirtyPredicateKind::Never.predicate();
        assert!(!predicate.is_dirty(None, Some(&value("a"))));
    }
}
