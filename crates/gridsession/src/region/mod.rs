//! The cache region collaborator.
//!
//! A region is the external data-grid map that holds sessions by id. The
//! repository reads and writes through [`SessionRegion`]; the region calls
//! back into the registered [`EntryWriter`] before an entry is created and
//! into every [`EntryListener`] after an entry changed, on its own thread.

mod memory;

pub use memory::InMemoryRegion;

use std::fmt;
use std::sync::Arc;

use crate::codec::SerializationStrategy;
use crate::error::Result;
use crate::session::{PRINCIPAL_NAME_INDEX_NAME, Session};

/// What caused an entry event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// An application-level create.
    Create,
    /// Hydration of a local copy from another member. Never a genuine create.
    LocalLoadCreate,
    /// An update of an existing entry.
    Update,
    /// The cache time-boxed the entry out.
    Invalidate,
    /// Explicit removal.
    Destroy,
}

impl Operation {
    /// Whether the event only synchronizes cache state.
    pub fn is_local_load(&self) -> bool {
        matches!(self, Operation::LocalLoadCreate)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Create => write!(f, "create"),
            Operation::LocalLoadCreate => write!(f, "local-load-create"),
            Operation::Update => write!(f, "update"),
            Operation::Invalidate => write!(f, "invalidate"),
            Operation::Destroy => write!(f, "destroy"),
        }
    }
}

/// A value held by a region entry.
#[derive(Debug, Clone)]
pub enum EntryValue {
    /// A session.
    Session(Arc<Session>),
    /// Removal marker left behind by the cache.
    Tombstone,
}

impl EntryValue {
    /// The session, unless this is a tombstone.
    pub fn session(&self) -> Option<&Arc<Session>> {
        match self {
            EntryValue::Session(session) => Some(session),
            EntryValue::Tombstone => None,
        }
    }
}

impl From<Session> for EntryValue {
    fn from(session: Session) -> Self {
        EntryValue::Session(Arc::new(session))
    }
}

/// Notification passed to the lifecycle hooks.
#[derive(Debug, Clone)]
pub struct EntryEvent {
    /// What caused the event.
    pub operation: Operation,
    /// Entry key, the session id.
    pub key: String,
    /// Value before the operation.
    pub old_value: Option<EntryValue>,
    /// Value after the operation.
    pub new_value: Option<EntryValue>,
}

impl EntryEvent {
    /// Create an event without values.
    pub fn new(operation: Operation, key: impl Into<String>) -> Self {
        Self {
            operation,
            key: key.into(),
            old_value: None,
            new_value: None,
        }
    }

    /// Attach the previous value.
    pub fn with_old_value(mut self, value: impl Into<EntryValue>) -> Self {
        self.old_value = Some(value.into());
        self
    }

    /// Attach the new value.
    pub fn with_new_value(mut self, value: impl Into<EntryValue>) -> Self {
        self.new_value = Some(value.into());
        self
    }

    /// The previous session, if the old value is one.
    pub fn old_session(&self) -> Option<&Arc<Session>> {
        self.old_value.as_ref().and_then(EntryValue::session)
    }

    /// The new session, if the new value is one.
    pub fn new_session(&self) -> Option<&Arc<Session>> {
        self.new_value.as_ref().and_then(EntryValue::session)
    }
}

/// Hook invoked before an entry is durably created.
///
/// Returning an error aborts the create.
pub trait EntryWriter: Send + Sync {
    /// Called before `event.key` is created.
    fn before_create(&self, event: &EntryEvent) -> Result<()>;
}

/// Hooks invoked after an entry changed.
pub trait EntryListener: Send + Sync {
    /// An existing entry was replaced.
    fn after_update(&self, _event: &EntryEvent) -> Result<()> {
        Ok(())
    }

    /// The cache time-boxed the entry out.
    fn after_invalidate(&self, _event: &EntryEvent) -> Result<()> {
        Ok(())
    }

    /// The entry was removed.
    fn after_destroy(&self, _event: &EntryEvent) -> Result<()> {
        Ok(())
    }
}

/// Field matched by an index query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexField {
    /// The derived principal name.
    Principal,
    /// A named attribute.
    Attribute(String),
}

/// Equality query over an indexed field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexQuery {
    /// Field compared.
    pub field: IndexField,
    /// Value the field must equal.
    pub value: String,
}

impl IndexQuery {
    /// Sessions whose principal name equals `value`.
    pub fn principal(value: impl Into<String>) -> Self {
        Self {
            field: IndexField::Principal,
            value: value.into(),
        }
    }

    /// Sessions whose attribute `name` equals `value`.
    pub fn attribute(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: IndexField::Attribute(name.into()),
            value: value.into(),
        }
    }

    /// Query for a repository index name; the principal index name maps to
    /// the derived principal field.
    pub fn for_index(index_name: &str, value: impl Into<String>) -> Self {
        if index_name == PRINCIPAL_NAME_INDEX_NAME {
            Self::principal(value)
        } else {
            Self::attribute(index_name, value)
        }
    }

    /// Render as OQL against `region_path`, with the value bound to `$1`.
    pub fn to_oql(&self, region_path: &str) -> String {
        match &self.field {
            IndexField::Principal => {
                format!("SELECT s FROM {region_path} s WHERE s.principalName = $1")
            }
            IndexField::Attribute(name) => {
                format!("SELECT s FROM {region_path} s WHERE s.attributes['{name}'] = $1")
            }
        }
    }

    /// Whether `session` satisfies the query.
    pub fn matches(&self, session: &Session) -> bool {
        match &self.field {
            IndexField::Principal => {
                session.principal_name().as_deref() == Some(self.value.as_str())
            }
            IndexField::Attribute(name) => session.attribute(name).is_some_and(|value| {
                match value.as_json() {
                    Some(serde_json::Value::String(s)) => *s == self.value,
                    Some(other) => other.to_string() == self.value,
                    None => false,
                }
            }),
        }
    }
}

/// The cache region holding sessions by id.
///
/// Errors are reported as [`Error::DataAccess`](crate::Error::DataAccess)
/// and reach repository callers unchanged.
pub trait SessionRegion: Send + Sync {
    /// Full path of the region, used in queries.
    fn full_path(&self) -> String;

    /// Decode stored sessions for the given strategy. Called once by the
    /// repository at construction.
    fn configure_serialization(&self, _strategy: SerializationStrategy) {}

    /// Fetch the session stored under `id`.
    fn get(&self, id: &str) -> Result<Option<Session>>;

    /// Store `session` under `id`, returning the previous value.
    fn put(&self, id: &str, session: &Session) -> Result<Option<Session>>;

    /// Remove `id`, returning the previous value.
    fn remove(&self, id: &str) -> Result<Option<Session>>;

    /// Sessions matching an equality query.
    fn query(&self, query: &IndexQuery) -> Result<Vec<Session>>;

    /// Install the hook called before entries are created.
    fn set_entry_writer(&self, writer: Arc<dyn EntryWriter>);

    /// Add a hook called after entries change.
    fn add_entry_listener(&self, listener: Arc<dyn EntryListener>);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::SerializationStrategy;

    #[test]
    fn test_for_index_maps_principal() {
        assert_eq!(
            IndexQuery::for_index(PRINCIPAL_NAME_INDEX_NAME, "alice").field,
            IndexField::Principal
        );
        assert_eq!(
            IndexQuery::for_index("team", "blue").field,
            IndexField::Attribute("team".into())
        );
    }

    #[test]
    fn test_to_oql() {
        assert_eq!(
            IndexQuery::principal("x").to_oql("/Sessions"),
            "SELECT s FROM /Sessions s WHERE s.principalName = $1"
        );
        assert_eq!(
            IndexQuery::attribute("team", "x").to_oql("/Sessions"),
            "SELECT s FROM /Sessions s WHERE s.attributes['team'] = $1"
        );
    }

    #[test]
    fn test_matches() {
        let session = Session::create(SerializationStrategy::Full);
        session.set_principal_name("alice");
        session.set_attribute("team", "blue");
        session.set_attribute("level", 7i64);

        assert!(IndexQuery::principal("alice").matches(&session));
        assert!(!IndexQuery::principal("bob").matches(&session));
        assert!(IndexQuery::attribute("team", "blue").matches(&session));
        assert!(IndexQuery::attribute("level", "7").matches(&session));
        assert!(!IndexQuery::attribute("missing", "blue").matches(&session));
    }

    #[test]
    fn test_entry_event_accessors() {
        let session = Session::create(SerializationStrategy::Full);
        let id = session.id();
        let event = EntryEvent::new(Operation::Destroy, id.clone())
            .with_old_value(EntryValue::Tombstone)
            .with_new_value(session);

        assert!(event.old_session().is_none());
        assert_eq!(event.new_session().map(|s| s.id()), Some(id));
        assert!(Operation::LocalLoadCreate.is_local_load());
        assert!(!Operation::Create.is_local_load());
    }
}
