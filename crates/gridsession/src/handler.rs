//! Translation of region entry hooks into session lifecycle events.
//!
//! The region calls these hooks on its own control path. Both hooks share
//! the repository's [`BoundedRingHashSet`] of recently created ids, which
//! keeps a creation that reaches the region through more than one path from
//! being announced twice.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::error::Result;
use crate::events::{EventDispatcher, PublishOutcome, SessionEventKind};
use crate::region::{EntryEvent, EntryListener, EntryWriter};
use crate::ring::{BoundedRingHashSet, hash_session_id};
use crate::session::Session;

/// Hooks complete even when the publisher rejected the event. The
/// dispatcher has already logged the failure.
fn settle(outcome: PublishOutcome, kind: SessionEventKind, session_id: &str) {
    if let PublishOutcome::Failed(e) = outcome {
        debug!(%kind, %session_id, error = %e, "Continuing hook after undelivered event");
    }
}

/// Pre-create hook publishing Created events.
///
/// This is the only place Created events come from.
#[derive(Debug, Clone)]
pub struct SessionCreationWriter {
    dispatcher: Arc<EventDispatcher>,
    created: Arc<BoundedRingHashSet>,
}

impl SessionCreationWriter {
    /// Create a writer recording created ids in `created`.
    pub fn new(dispatcher: Arc<EventDispatcher>, created: Arc<BoundedRingHashSet>) -> Self {
        Self {
            dispatcher,
            created,
        }
    }
}

impl EntryWriter for SessionCreationWriter {
    fn before_create(&self, event: &EntryEvent) -> Result<()> {
        let Some(session) = event.new_session() else {
            trace!(key = %event.key, "Ignoring create of a non-session value");
            return Ok(());
        };

        let hash = hash_session_id(&event.key);

        if event.operation.is_local_load() {
            trace!(session_id = %event.key, "Recording locally loaded session");
            self.created.add(hash);
            return Ok(());
        }

        if self.created.contains(hash) {
            trace!(session_id = %event.key, "Session creation already announced");
            return Ok(());
        }

        let outcome = self.dispatcher.publish(
            SessionEventKind::Created,
            Some(Arc::clone(session)),
            Some(event.key.as_str()),
        )?;
        settle(outcome, SessionEventKind::Created, &event.key);
        self.created.add(hash);
        Ok(())
    }
}

/// Post-mutation hooks publishing Changed, Expired, Deleted and Destroyed
/// events.
#[derive(Debug, Clone)]
pub struct SessionLifecycleListener {
    dispatcher: Arc<EventDispatcher>,
    created: Arc<BoundedRingHashSet>,
}

impl SessionLifecycleListener {
    /// Create a listener forgetting ids from `created` once they are gone.
    pub fn new(dispatcher: Arc<EventDispatcher>, created: Arc<BoundedRingHashSet>) -> Self {
        Self {
            dispatcher,
            created,
        }
    }

    /// A session was deleted through the repository.
    pub fn after_delete(&self, session_id: &str, session: Option<Arc<Session>>) -> Result<()> {
        self.publish_removal(SessionEventKind::Deleted, session_id, session)
    }

    /// A session was found expired through the repository.
    pub fn after_expired(&self, session_id: &str, session: Option<Arc<Session>>) -> Result<()> {
        self.publish_removal(SessionEventKind::Expired, session_id, session)
    }

    fn publish_removal(
        &self,
        kind: SessionEventKind,
        session_id: &str,
        session: Option<Arc<Session>>,
    ) -> Result<()> {
        let outcome = self.dispatcher.publish(kind, session, Some(session_id))?;
        settle(outcome, kind, session_id);
        self.created.remove(hash_session_id(session_id));
        Ok(())
    }
}

impl EntryListener for SessionLifecycleListener {
    fn after_update(&self, event: &EntryEvent) -> Result<()> {
        let outcome = self.dispatcher.publish(
            SessionEventKind::Changed,
            event.new_session().cloned(),
            Some(event.key.as_str()),
        )?;
        settle(outcome, SessionEventKind::Changed, &event.key);
        Ok(())
    }

    fn after_invalidate(&self, event: &EntryEvent) -> Result<()> {
        self.publish_removal(
            SessionEventKind::Expired,
            &event.key,
            event.old_session().cloned(),
        )
    }

    fn after_destroy(&self, event: &EntryEvent) -> Result<()> {
        self.publish_removal(
            SessionEventKind::Destroyed,
            &event.key,
            event.old_session().cloned(),
        )
    }
}
