//! Session attribute container with dirty and delta bookkeeping.
//!
//! The container itself is not synchronized. A [`Session`](crate::Session)
//! owns it inside the same mutex that guards the session's own fields, so
//! attribute and session mutations always serialize on one lock.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use crate::codec::SerializationStrategy;
use crate::dirty::{SharedDirtyPredicate, default_dirty_predicate};
use crate::value::AttributeValue;

/// How changes are remembered between persists.
#[derive(Debug, Clone)]
enum ChangeTracking {
    /// One flag for the whole container.
    Full,
    /// The names of every changed attribute.
    Delta(BTreeSet<String>),
}

/// Name to value mapping that knows whether it holds unsaved changes.
#[derive(Clone)]
pub struct SessionAttributes {
    values: HashMap<String, AttributeValue>,
    dirty: bool,
    tracking: ChangeTracking,
    predicate: SharedDirtyPredicate,
}

impl SessionAttributes {
    /// Create an empty container tracking changes per `strategy`.
    pub fn new(strategy: SerializationStrategy) -> Self {
        let tracking = match strategy {
            SerializationStrategy::Full => ChangeTracking::Full,
            SerializationStrategy::Delta => ChangeTracking::Delta(BTreeSet::new()),
        };

        Self {
            values: HashMap::new(),
            dirty: false,
            tracking,
            predicate: default_dirty_predicate(),
        }
    }

    /// Replace the dirty predicate.
    pub fn configure_with(&mut self, predicate: SharedDirtyPredicate) {
        self.predicate = predicate;
    }

    /// The dirty predicate in use.
    pub fn dirty_predicate(&self) -> &SharedDirtyPredicate {
        &self.predicate
    }

    /// Whether changed names are tracked individually.
    pub fn is_delta_tracking(&self) -> bool {
        matches!(self.tracking, ChangeTracking::Delta(_))
    }

    /// Set `name` to `value`, or remove it when `value` is `None`.
    ///
    /// Returns the previous value.
    pub fn set_attribute(
        &mut self,
        name: impl Into<String>,
        value: Option<AttributeValue>,
    ) -> Option<AttributeValue> {
        let name = name.into();
        let Some(value) = value else {
            return self.remove_attribute(&name);
        };

        let previous = self.values.insert(name.clone(), value.clone());
        if self.predicate.is_dirty(previous.as_ref(), Some(&value)) && self.intercept(&name) {
            self.dirty = true;
        }
        previous
    }

    /// Remove `name`, returning its value.
    pub fn remove_attribute(&mut self, name: &str) -> Option<AttributeValue> {
        if self.values.contains_key(name) && self.intercept(name) {
            self.dirty = true;
        }
        self.values.remove(name)
    }

    /// Look up `name`.
    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.values.get(name)
    }

    /// Names of all attributes, sorted.
    pub fn attribute_names(&self) -> BTreeSet<String> {
        self.values.keys().cloned().collect()
    }

    /// Iterate over all attributes.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &AttributeValue)> {
        self.values.iter()
    }

    /// Number of attributes.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether there are no attributes.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Whether there are unsaved changes.
    pub fn has_delta(&self) -> bool {
        match &self.tracking {
            ChangeTracking::Full => self.dirty,
            ChangeTracking::Delta(changed) => !changed.is_empty(),
        }
    }

    /// Forget all unsaved changes.
    ///
    /// Call exactly once after every successful persist. Committing without
    /// a write makes later saves skip changes that were never stored.
    pub fn commit(&mut self) {
        self.dirty = false;
        if let ChangeTracking::Delta(changed) = &mut self.tracking {
            changed.clear();
        }
    }

    /// Copy every attribute of `other` into this container.
    pub fn copy_from(&mut self, other: &SessionAttributes) {
        for (name, value) in &other.values {
            self.set_attribute(name.clone(), Some(value.clone()));
        }
    }

    /// Copy every entry of `map` into this container.
    pub fn copy_from_map<I, K>(&mut self, map: I)
    where
        I: IntoIterator<Item = (K, AttributeValue)>,
        K: Into<String>,
    {
        for (name, value) in map {
            self.set_attribute(name, Some(value));
        }
    }

    /// Changed attributes with their current value; removed ones carry `None`.
    ///
    /// Empty unless the container tracks changes by name.
    pub fn changed_attributes(&self) -> Vec<(String, Option<AttributeValue>)> {
        match &self.tracking {
            ChangeTracking::Full => Vec::new(),
            ChangeTracking::Delta(changed) => changed
                .iter()
                .map(|name| (name.clone(), self.values.get(name).cloned()))
                .collect(),
        }
    }

    /// Apply changes received from another member.
    ///
    /// Each applied name is cleared from the changed set, since the sender
    /// already persisted it.
    pub fn apply_changes<I>(&mut self, changes: I)
    where
        I: IntoIterator<Item = (String, Option<AttributeValue>)>,
    {
        for (name, value) in changes {
            self.set_attribute(name.clone(), value);
            if let ChangeTracking::Delta(changed) = &mut self.tracking {
                changed.remove(&name);
            }
        }
    }

    fn intercept(&mut self, name: &str) -> bool {
        if let ChangeTracking::Delta(changed) = &mut self.tracking {
            changed.insert(name.to_string());
        }
        true
    }
}

impl fmt::Debug for SessionAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.values.iter()).finish()
    }
}
