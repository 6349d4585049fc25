//! The session entity.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::attributes::SessionAttributes;
use crate::codec::SerializationStrategy;
use crate::dirty::SharedDirtyPredicate;
use crate::error::{Error, Result};
use crate::value::AttributeValue;

/// Attribute holding the principal name explicitly.
pub const PRINCIPAL_NAME_INDEX_NAME: &str = "PRINCIPAL_NAME_INDEX_NAME";

/// Attribute holding the authentication context, consulted when no explicit
/// principal name is stored.
pub const SECURITY_CONTEXT: &str = "SECURITY_CONTEXT";

/// Read access to a session, native or not.
///
/// Foreign session types implement this to be stored by a repository. They
/// are always considered dirty when saved.
pub trait SessionView: Send + Sync {
    /// Session id.
    fn id(&self) -> String;

    /// When the session was created.
    fn creation_time(&self) -> DateTime<Utc>;

    /// When the session was last accessed.
    fn last_accessed_time(&self) -> DateTime<Utc>;

    /// Idle interval after which the session expires; zero or negative
    /// disables expiration.
    fn max_inactive_interval(&self) -> Duration;

    /// Names of all attributes.
    fn attribute_names(&self) -> BTreeSet<String>;

    /// Value of one attribute.
    fn attribute(&self, name: &str) -> Option<AttributeValue>;

    /// Whether the session idled longer than its interval.
    fn is_expired(&self) -> bool {
        idle_expired(
            self.last_accessed_time(),
            self.max_inactive_interval(),
            Utc::now(),
        )
    }

    /// The native session, when this is one.
    fn as_native(&self) -> Option<&Session> {
        None
    }
}

/// Lazy idle-expiration rule shared by every session type.
pub(crate) fn idle_expired(
    last_accessed_time: DateTime<Utc>,
    max_inactive_interval: Duration,
    now: DateTime<Utc>,
) -> bool {
    max_inactive_interval > Duration::zero()
        && now.signed_duration_since(last_accessed_time) > max_inactive_interval
}

fn validate_session_id(id: impl Into<String>) -> Result<String> {
    let id = id.into();
    if id.trim().is_empty() {
        return Err(Error::InvalidSessionId(id));
    }
    Ok(id)
}

fn generate_session_id() -> String {
    Uuid::new_v4().to_string()
}

/// Fields guarded by the session mutex.
pub(crate) struct SessionState {
    pub(crate) id: String,
    pub(crate) creation_time: DateTime<Utc>,
    pub(crate) last_accessed_time: DateTime<Utc>,
    pub(crate) max_inactive_interval: Duration,
    pub(crate) dirty: bool,
    pub(crate) attributes: SessionAttributes,
}

impl SessionState {
    fn set_last_accessed_time(&mut self, time: DateTime<Utc>) {
        self.dirty |= self.last_accessed_time != time;
        self.last_accessed_time = time;
    }

    fn set_max_inactive_interval(&mut self, interval: Duration) {
        self.dirty |= self.max_inactive_interval != interval;
        self.max_inactive_interval = interval;
    }

    pub(crate) fn principal_name(&self) -> Option<String> {
        if let Some(name) = self
            .attributes
            .attribute(PRINCIPAL_NAME_INDEX_NAME)
            .and_then(AttributeValue::as_str)
        {
            return Some(name.to_string());
        }

        self.attributes
            .attribute(SECURITY_CONTEXT)
            .and_then(AttributeValue::as_principal)
            .and_then(|principal| principal.principal_name())
    }
}

/// An HTTP session stored in the cache.
///
/// Every accessor locks the session's single mutex, which also guards the
/// attribute container. Instances are not shared between `find_by_id`
/// calls: each lookup yields an independent copy with its own lock.
///
/// Equality and hashing consider the id only. Use
/// [`Session::cmp_by_creation_time`] to order sessions.
pub struct Session {
    state: Mutex<SessionState>,
}

impl Session {
    /// Create a new session with a random id.
    pub fn create(strategy: SerializationStrategy) -> Self {
        Self::new_unchecked(generate_session_id(), Utc::now(), strategy)
    }

    /// Create a new session with the given id.
    pub fn with_id(id: impl Into<String>, strategy: SerializationStrategy) -> Result<Self> {
        Ok(Self::new_unchecked(
            validate_session_id(id)?,
            Utc::now(),
            strategy,
        ))
    }

    /// A minimal session carrying only `id`, used when an event must be
    /// published without the real session.
    pub fn placeholder(id: impl Into<String>) -> Result<Self> {
        Self::with_id(id, SerializationStrategy::Full)
    }

    /// Copy any session into a native one.
    ///
    /// The copy is dirty until its first commit.
    pub fn copy_from<V: SessionView + ?Sized>(
        view: &V,
        strategy: SerializationStrategy,
    ) -> Result<Self> {
        let session = Self::restore(
            view.id(),
            view.creation_time(),
            view.last_accessed_time(),
            view.max_inactive_interval(),
            strategy,
        )?;

        {
            let mut state = session.state.lock();
            for name in view.attribute_names() {
                let value = view.attribute(&name);
                state.attributes.set_attribute(name, value);
            }
        }

        Ok(session)
    }

    /// Rebuild a session from stored fields. The result is dirty.
    pub(crate) fn restore(
        id: String,
        creation_time: DateTime<Utc>,
        last_accessed_time: DateTime<Utc>,
        max_inactive_interval: Duration,
        strategy: SerializationStrategy,
    ) -> Result<Self> {
        let session = Self::new_unchecked(validate_session_id(id)?, creation_time, strategy);
        {
            let mut state = session.state.lock();
            state.last_accessed_time = last_accessed_time;
            state.max_inactive_interval = max_inactive_interval;
        }
        Ok(session)
    }

    fn new_unchecked(id: String, now: DateTime<Utc>, strategy: SerializationStrategy) -> Self {
        Self {
            state: Mutex::new(SessionState {
                id,
                creation_time: now,
                last_accessed_time: now,
                max_inactive_interval: Duration::zero(),
                dirty: true,
                attributes: SessionAttributes::new(strategy),
            }),
        }
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock()
    }

    /// Session id.
    pub fn id(&self) -> String {
        self.state.lock().id.clone()
    }

    /// Replace the id.
    pub fn set_id(&self, id: impl Into<String>) -> Result<()> {
        let id = validate_session_id(id)?;
        self.state.lock().id = id;
        Ok(())
    }

    /// Assign a fresh random id and return it.
    pub fn change_session_id(&self) -> String {
        let mut state = self.state.lock();
        state.id = generate_session_id();
        state.dirty = true;
        state.id.clone()
    }

    /// When the session was created.
    pub fn creation_time(&self) -> DateTime<Utc> {
        self.state.lock().creation_time
    }

    /// When the session was last accessed.
    pub fn last_accessed_time(&self) -> DateTime<Utc> {
        self.state.lock().last_accessed_time
    }

    /// Record an access. `None` leaves the session untouched.
    pub fn set_last_accessed_time(&self, time: Option<DateTime<Utc>>) {
        if let Some(time) = time {
            self.state.lock().set_last_accessed_time(time);
        }
    }

    /// Record an access now.
    pub fn touch(&self) {
        self.set_last_accessed_time(Some(Utc::now()));
    }

    /// Idle interval after which the session expires.
    pub fn max_inactive_interval(&self) -> Duration {
        self.state.lock().max_inactive_interval
    }

    /// Change the idle interval; zero or negative disables expiration.
    pub fn set_max_inactive_interval(&self, interval: Duration) {
        self.state.lock().set_max_inactive_interval(interval);
    }

    /// Whether the session idled longer than its interval.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Whether the session idled longer than its interval as of `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        let state = self.state.lock();
        idle_expired(state.last_accessed_time, state.max_inactive_interval, now)
    }

    /// Value of one attribute.
    pub fn attribute(&self, name: &str) -> Option<AttributeValue> {
        self.state.lock().attributes.attribute(name).cloned()
    }

    /// Names of all attributes.
    pub fn attribute_names(&self) -> BTreeSet<String> {
        self.state.lock().attributes.attribute_names()
    }

    /// Set an attribute, returning its previous value.
    pub fn set_attribute(
        &self,
        name: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> Option<AttributeValue> {
        self.state
            .lock()
            .attributes
            .set_attribute(name, Some(value.into()))
    }

    /// Remove an attribute, returning its value.
    pub fn remove_attribute(&self, name: &str) -> Option<AttributeValue> {
        self.state.lock().attributes.remove_attribute(name)
    }

    /// Run `f` with exclusive access to the attribute container.
    pub fn with_attributes<R>(&self, f: impl FnOnce(&mut SessionAttributes) -> R) -> R {
        f(&mut self.state.lock().attributes)
    }

    /// The authenticated principal, if known.
    ///
    /// Reads the [`PRINCIPAL_NAME_INDEX_NAME`] attribute, falling back to the
    /// principal exposed by the [`SECURITY_CONTEXT`] attribute.
    pub fn principal_name(&self) -> Option<String> {
        self.state.lock().principal_name()
    }

    /// Store the principal name explicitly.
    pub fn set_principal_name(&self, name: impl Into<String>) {
        let name: String = name.into();
        self.set_attribute(PRINCIPAL_NAME_INDEX_NAME, name);
    }

    /// Whether the session has changes that were not persisted.
    pub fn has_delta(&self) -> bool {
        let state = self.state.lock();
        state.dirty || state.attributes.has_delta()
    }

    /// Forget unsaved changes after a successful persist.
    pub fn commit(&self) {
        let mut state = self.state.lock();
        state.dirty = false;
        state.attributes.commit();
    }

    /// Apply the repository's idle interval.
    pub fn configure_with_interval(&self, interval: Duration) {
        self.set_max_inactive_interval(interval);
    }

    /// Apply the repository's dirty predicate to the attributes.
    pub fn configure_with_predicate(&self, predicate: SharedDirtyPredicate) {
        self.state.lock().attributes.configure_with(predicate);
    }

    /// Order sessions by creation time.
    pub fn cmp_by_creation_time(&self, other: &Session) -> Ordering {
        if std::ptr::eq(self, other) {
            return Ordering::Equal;
        }
        self.creation_time().cmp(&other.creation_time())
    }
}

impl SessionView for Session {
    fn id(&self) -> String {
        Session::id(self)
    }

    fn creation_time(&self) -> DateTime<Utc> {
        Session::creation_time(self)
    }

    fn last_accessed_time(&self) -> DateTime<Utc> {
        Session::last_accessed_time(self)
    }

    fn max_inactive_interval(&self) -> Duration {
        Session::max_inactive_interval(self)
    }

    fn attribute_names(&self) -> BTreeSet<String> {
        Session::attribute_names(self)
    }

    fn attribute(&self, name: &str) -> Option<AttributeValue> {
        Session::attribute(self, name)
    }

    fn is_expired(&self) -> bool {
        Session::is_expired(self)
    }

    fn as_native(&self) -> Option<&Session> {
        Some(self)
    }
}

impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other) || self.id() == other.id()
    }
}

impl Eq for Session {}

impl Hash for Session {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Session")
            .field("id", &state.id)
            .field("creation_time", &state.creation_time)
            .field("last_accessed_time", &state.last_accessed_time)
            .field("max_inactive_interval", &state.max_inactive_interval)
            .field("dirty", &state.dirty)
            .field("attributes", &state.attributes)
            .finish()
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        write!(
            f,
            "{{ id = {}, creationTime = {}, lastAccessedTime = {}, maxInactiveInterval = {}s, principalName = {} }}",
            state.id,
            state.creation_time.to_rfc3339(),
            state.last_accessed_time.to_rfc3339(),
            state.max_inactive_interval.num_seconds(),
            state.principal_name().as_deref().unwrap_or("null"),
        )
    }
}
