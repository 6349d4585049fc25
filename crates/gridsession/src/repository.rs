//! Session repository backed by a cache region.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Duration;
use parking_lot::RwLock;
use tracing::debug;

use crate::codec::SerializationStrategy;
use crate::config::SessionConfig;
use crate::dirty::SharedDirtyPredicate;
use crate::error::{Error, Result};
use crate::events::{EventDispatcher, NoopPublisher, SessionEventPublisher};
use crate::handler::{SessionCreationWriter, SessionLifecycleListener};
use crate::region::{IndexQuery, SessionRegion};
use crate::ring::BoundedRingHashSet;
use crate::session::{PRINCIPAL_NAME_INDEX_NAME, Session, SessionView};

/// Create, look up, persist and delete sessions.
pub trait SessionRepository: Send + Sync {
    /// Session type handed out by the repository.
    type Session: SessionView;

    /// A new, unsaved session.
    fn create_session(&self) -> Self::Session;

    /// The live session stored under `id`.
    ///
    /// Expired sessions are deleted and reported as absent.
    fn find_by_id(&self, id: &str) -> Result<Option<Self::Session>>;

    /// Persist `session` if it has unsaved changes.
    fn save(&self, session: &dyn SessionView) -> Result<()>;

    /// Remove the session stored under `id`.
    fn delete_by_id(&self, id: &str) -> Result<()>;
}

/// A repository that can look sessions up by indexed value.
pub trait IndexedSessionRepository: SessionRepository {
    /// Sessions whose `index_name` equals `index_value`, keyed by id.
    fn find_by_index_name_and_index_value(
        &self,
        index_name: &str,
        index_value: &str,
    ) -> Result<HashMap<String, Self::Session>>;

    /// Sessions of the given principal, keyed by id.
    fn find_by_principal_name(
        &self,
        principal_name: &str,
    ) -> Result<HashMap<String, Self::Session>> {
        self.find_by_index_name_and_index_value(PRINCIPAL_NAME_INDEX_NAME, principal_name)
    }
}

/// Builder for [`RegionSessionRepository`].
#[derive(Default)]
pub struct RegionSessionRepositoryBuilder {
    region: Option<Arc<dyn SessionRegion>>,
    config: SessionConfig,
    publisher: Option<Arc<dyn SessionEventPublisher>>,
    dirty_predicate: Option<SharedDirtyPredicate>,
}

impl RegionSessionRepositoryBuilder {
    /// The region holding the sessions. Required.
    pub fn region(mut self, region: Arc<dyn SessionRegion>) -> Self {
        self.region = Some(region);
        self
    }

    /// Start from `config`.
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Receiver of session lifecycle events. Defaults to [`NoopPublisher`].
    pub fn publisher(mut self, publisher: Arc<dyn SessionEventPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Custom dirty predicate, overriding the configured kind.
    pub fn dirty_predicate(mut self, predicate: SharedDirtyPredicate) -> Self {
        self.dirty_predicate = Some(predicate);
        self
    }

    /// Idle interval applied to sessions.
    pub fn max_inactive_interval(mut self, interval: Duration) -> Self {
        self.config = self.config.with_max_inactive_interval(interval);
        self
    }

    /// What is shipped to the region on save.
    pub fn serialization(mut self, strategy: SerializationStrategy) -> Self {
        self.config = self.config.with_serialization(strategy);
        self
    }

    /// Build the repository and register its hooks on the region.
    ///
    /// Fails with [`Error::MissingRegion`] when no region was given, in which
    /// case nothing is registered.
    pub fn build(self) -> Result<RegionSessionRepository> {
        let region = self.region.ok_or(Error::MissingRegion)?;
        let created = Arc::new(BoundedRingHashSet::new(self.config.ring_capacity)?);

        let publisher = self.publisher.unwrap_or_else(|| Arc::new(NoopPublisher));
        let dispatcher = Arc::new(EventDispatcher::new(region.full_path(), publisher));
        let lifecycle = Arc::new(SessionLifecycleListener::new(
            Arc::clone(&dispatcher),
            Arc::clone(&created),
        ));

        let strategy = self.config.serialization;
        region.configure_serialization(strategy);
        region.set_entry_writer(Arc::new(SessionCreationWriter::new(
            Arc::clone(&dispatcher),
            Arc::clone(&created),
        )));
        region.add_entry_listener(lifecycle.clone());

        let dirty_predicate = self
            .dirty_predicate
            .unwrap_or_else(|| self.config.dirty_predicate.predicate());

        debug!(
            region = %region.full_path(),
            strategy = ?strategy,
            ring_capacity = created.capacity(),
            "Session repository initialized"
        );

        Ok(RegionSessionRepository {
            region,
            strategy,
            max_inactive_interval: RwLock::new(self.config.max_inactive_interval()),
            dirty_predicate: RwLock::new(dirty_predicate),
            dispatcher,
            lifecycle,
            created,
        })
    }
}

/// [`SessionRepository`] storing sessions in a [`SessionRegion`].
///
/// Lifecycle events are published from the hooks registered on the region,
/// except Deleted and repository-detected Expired events, which the
/// repository publishes itself after removing the entry.
pub struct RegionSessionRepository {
    region: Arc<dyn SessionRegion>,
    strategy: SerializationStrategy,
    max_inactive_interval: RwLock<Duration>,
    dirty_predicate: RwLock<SharedDirtyPredicate>,
    dispatcher: Arc<EventDispatcher>,
    lifecycle: Arc<SessionLifecycleListener>,
    created: Arc<BoundedRingHashSet>,
}

impl RegionSessionRepository {
    /// Start building a repository.
    pub fn builder() -> RegionSessionRepositoryBuilder {
        RegionSessionRepositoryBuilder::default()
    }

    /// Full path of the sessions region.
    pub fn region_name(&self) -> String {
        self.region.full_path()
    }

    /// What is shipped to the region on save.
    pub fn serialization_strategy(&self) -> SerializationStrategy {
        self.strategy
    }

    /// Idle interval applied to sessions.
    pub fn max_inactive_interval(&self) -> Duration {
        *self.max_inactive_interval.read()
    }

    /// Change the idle interval applied to sessions from now on.
    pub fn set_max_inactive_interval(&self, interval: Duration) {
        *self.max_inactive_interval.write() = interval;
    }

    /// The dirty predicate applied to sessions.
    pub fn dirty_predicate(&self) -> SharedDirtyPredicate {
        Arc::clone(&self.dirty_predicate.read())
    }

    /// Change the dirty predicate applied to sessions from now on.
    pub fn set_dirty_predicate(&self, predicate: SharedDirtyPredicate) {
        *self.dirty_predicate.write() = predicate;
    }

    /// Replace the receiver of lifecycle events.
    pub fn set_event_publisher(&self, publisher: Arc<dyn SessionEventPublisher>) {
        self.dispatcher.set_publisher(publisher);
    }

    /// Ids of recently created sessions, shared with the region hooks.
    pub fn created_session_ids(&self) -> &Arc<BoundedRingHashSet> {
        &self.created
    }

    fn configure(&self, session: &Session) {
        session.configure_with_interval(self.max_inactive_interval());
        session.configure_with_predicate(self.dirty_predicate());
    }

    fn prepare(&self, session: Session) -> Session {
        self.configure(&session);
        session.commit();
        session.touch();
        session
    }
}

impl SessionRepository for RegionSessionRepository {
    type Session = Session;

    fn create_session(&self) -> Session {
        let session = Session::create(self.strategy);
        self.configure(&session);
        session
    }

    fn find_by_id(&self, id: &str) -> Result<Option<Session>> {
        let Some(session) = self.region.get(id)? else {
            return Ok(None);
        };

        if session.is_expired() {
            debug!(session_id = %id, "Session expired on read");
            self.delete_by_id(id)?;
            return Ok(None);
        }

        Ok(Some(self.prepare(session)))
    }

    fn save(&self, session: &dyn SessionView) -> Result<()> {
        let Some(native) = session.as_native() else {
            let copy = Session::copy_from(session, self.strategy)?;
            debug!(session_id = %copy.id(), "Saving foreign session");
            self.region.put(&copy.id(), &copy)?;
            return Ok(());
        };

        if !native.has_delta() {
            return Ok(());
        }

        let id = native.id();
        debug!(session_id = %id, "Saving session");
        self.region.put(&id, native)?;
        native.commit();
        Ok(())
    }

    fn delete_by_id(&self, id: &str) -> Result<()> {
        let before_removal = self.region.get(id).unwrap_or_else(|e| {
            debug!(session_id = %id, error = %e, "Could not read session before removal");
            None
        });
        let removed = self.region.remove(id)?;
        let session = removed.or(before_removal).map(Arc::new);

        match session {
            Some(session) if session.is_expired() => {
                self.lifecycle.after_expired(id, Some(session))
            }
            session => self.lifecycle.after_delete(id, session),
        }
    }
}

impl IndexedSessionRepository for RegionSessionRepository {
    fn find_by_index_name_and_index_value(
        &self,
        index_name: &str,
        index_value: &str,
    ) -> Result<HashMap<String, Session>> {
        let query = IndexQuery::for_index(index_name, index_value);
        let results = self.region.query(&query)?;

        Ok(results
            .into_iter()
            .map(|session| {
                let session = self.prepare(session);
                (session.id(), session)
            })
            .collect())
    }
}

impl std::fmt::Debug for RegionSessionRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegionSessionRepository")
            .field("region", &self.region.full_path())
            .field("strategy", &self.strategy)
            .field("max_inactive_interval", &self.max_inactive_interval())
            .finish_non_exhaustive()
    }
}
