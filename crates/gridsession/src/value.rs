//! Attribute values stored in a session.
//!
//! Plain data is carried as [`serde_json::Value`]. Application objects can
//! implement [`SessionValue`] directly to expose typed capabilities such as
//! their own delta check ([`DeltaAware`]) or an authenticated principal
//! ([`HasPrincipalName`]).

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A value that tracks its own unsaved changes.
pub trait DeltaAware {
    /// Whether the value changed since it was last persisted.
    fn has_delta(&self) -> bool;
}

/// A value that knows the name of an authenticated principal.
pub trait HasPrincipalName {
    /// The principal name, if one is known.
    fn principal_name(&self) -> Option<String>;
}

/// Behaviour required of anything stored as a session attribute.
pub trait SessionValue: fmt::Debug + Send + Sync + 'static {
    /// Access to the concrete type for downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Value equality against another stored value.
    fn equals(&self, other: &dyn SessionValue) -> bool;

    /// Render the value for the session codecs.
    ///
    /// Returns `None` when the value has no serialized form.
    fn to_json(&self) -> Option<serde_json::Value>;

    /// The value's own delta check, if it has one.
    fn as_delta_aware(&self) -> Option<&dyn DeltaAware> {
        None
    }

    /// The value's principal, if it carries one.
    fn as_principal(&self) -> Option<&dyn HasPrincipalName> {
        None
    }

    /// Name of the concrete type, used in error messages.
    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

impl SessionValue for serde_json::Value {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn equals(&self, other: &dyn SessionValue) -> bool {
        other
            .as_any()
            .downcast_ref::<serde_json::Value>()
            .is_some_and(|other| self == other)
    }

    fn to_json(&self) -> Option<serde_json::Value> {
        Some(self.clone())
    }
}

/// Shared handle to a session attribute value.
///
/// Cloning the handle shares the underlying value, so two handles are
/// *identical* when they came from the same `AttributeValue::new` call and
/// merely *equal* when their contents compare equal.
#[derive(Clone)]
pub struct AttributeValue(Arc<dyn SessionValue>);

impl AttributeValue {
    /// Wrap an application value.
    pub fn new<V: SessionValue>(value: V) -> Self {
        Self(Arc::new(value))
    }

    /// Wrap an already shared value.
    pub fn from_arc(value: Arc<dyn SessionValue>) -> Self {
        Self(value)
    }

    /// Whether both handles point at the same value.
    pub fn ptr_eq(&self, other: &AttributeValue) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.0), Arc::as_ptr(&other.0))
    }

    /// Borrow the value as a concrete type.
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.0.as_any().downcast_ref::<T>()
    }

    /// Borrow the value as JSON, if it is plain data.
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        self.downcast_ref::<serde_json::Value>()
    }

    /// Borrow the value as a string, if it is a JSON string.
    pub fn as_str(&self) -> Option<&str> {
        self.as_json().and_then(serde_json::Value::as_str)
    }

    /// The value's own delta check, if it has one.
    pub fn as_delta_aware(&self) -> Option<&dyn DeltaAware> {
        self.0.as_delta_aware()
    }

    /// The value's principal capability, if it has one.
    pub fn as_principal(&self) -> Option<&dyn HasPrincipalName> {
        self.0.as_principal()
    }

    /// Render the value for the session codecs.
    pub fn to_json(&self) -> Option<serde_json::Value> {
        self.0.to_json()
    }

    /// Name of the concrete type.
    pub fn type_name(&self) -> &'static str {
        self.0.type_name()
    }
}

impl PartialEq for AttributeValue {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.0.equals(other.0.as_ref())
    }
}

impl fmt::Debug for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl From<serde_json::Value> for AttributeValue {
    fn from(value: serde_json::Value) -> Self {
        Self::new(value)
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::new(serde_json::Value::String(value))
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::new(serde_json::Value::String(value.to_string()))
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::new(serde_json::Value::from(value))
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::new(serde_json::Value::Bool(value))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Authentication context exposing a principal name.
    #[derive(Debug, PartialEq)]
    pub struct SecurityContext {
        pub name: Option<String>,
    }

    impl SessionValue for SecurityContext {
        fn as_any(&self) -> &dyn Any {
            self
        }

        fn equals(&self, other: &dyn SessionValue) -> bool {
            other
                .as_any()
                .downcast_ref::<SecurityContext>()
                .is_some_and(|other| self == other)
        }

        fn to_json(&self) -> Option<serde_json::Value> {
            Some(serde_json::json!({ "authentication": { "name": self.name } }))
        }

        fn as_principal(&self) -> Option<&dyn HasPrincipalName> {
            Some(self)
        }
    }

    impl HasPrincipalName for SecurityContext {
        fn principal_name(&self) -> Option<String> {
            self.name.clone()
        }
    }

    /// Value with its own dirty tracking.
    #[derive(Debug, Default)]
    pub struct Tracked {
        pub changed: AtomicBool,
    }

    impl Tracked {
        pub fn touch(&self) {
            self.changed.store(true, Ordering::SeqCst);
        }
    }

    impl SessionValue for Tracked {
        fn as_any(&self) -> &dyn Any {
            self
        }

        fn equals(&self, other: &dyn SessionValue) -> bool {
            std::ptr::addr_eq(self as *const Self, other.as_any() as *const dyn Any)
        }

        fn to_json(&self) -> Option<serde_json::Value> {
            Some(serde_json::Value::Bool(self.changed.load(Ordering::SeqCst)))
        }

        fn as_delta_aware(&self) -> Option<&dyn DeltaAware> {
            Some(self)
        }
    }

    impl DeltaAware for Tracked {
        fn has_delta(&self) -> bool {
            self.changed.load(Ordering::SeqCst)
        }
    }

    /// Value with no serialized form.
    #[derive(Debug)]
    pub struct Opaque;

    impl SessionValue for Opaque {
        fn as_any(&self) -> &dyn Any {
            self
        }

        fn equals(&self, _other: &dyn SessionValue) -> bool {
            false
        }

        fn to_json(&self) -> Option<serde_json::Value> {
            None
        }
    }
}
