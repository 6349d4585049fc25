//! Session lifecycle events and their publication.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{error, trace};

use crate::error::{Error, Result};
use crate::session::Session;

/// Default buffer of [`BroadcastPublisher`].
pub const DEFAULT_BROADCAST_CAPACITY: usize = 1024;

/// Kind of session lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionEventKind {
    /// A session was created.
    Created,
    /// A stored session was updated.
    Changed,
    /// A session expired, lazily on read or by the cache.
    Expired,
    /// A session was deleted through the repository.
    Deleted,
    /// A session entry was destroyed in the cache.
    Destroyed,
}

impl fmt::Display for SessionEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionEventKind::Created => write!(f, "created"),
            SessionEventKind::Changed => write!(f, "changed"),
            SessionEventKind::Expired => write!(f, "expired"),
            SessionEventKind::Deleted => write!(f, "deleted"),
            SessionEventKind::Destroyed => write!(f, "destroyed"),
        }
    }
}

/// A session lifecycle event.
#[derive(Debug, Clone)]
pub struct SessionEvent {
    /// What happened.
    pub kind: SessionEventKind,
    /// Name of the repository that published the event.
    pub source: Arc<str>,
    /// The session, or a placeholder carrying only the id.
    pub session: Arc<Session>,
    /// Id of the session.
    pub session_id: String,
    /// When the event was published.
    pub timestamp: DateTime<Utc>,
}

/// Failure reported by a publisher.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// Nobody is listening.
    #[error("No subscribers for session events")]
    NoSubscribers,

    /// A subscriber rejected the event.
    #[error("Subscriber failed: {0}")]
    Subscriber(String),
}

/// Delivers session events to interested parties.
///
/// Any `Fn(&SessionEvent) -> Result<(), PublishError>` closure is a publisher.
pub trait SessionEventPublisher: Send + Sync {
    /// Deliver `event`.
    fn publish(&self, event: &SessionEvent) -> std::result::Result<(), PublishError>;
}

impl<F> SessionEventPublisher for F
where
    F: Fn(&SessionEvent) -> std::result::Result<(), PublishError> + Send + Sync,
{
    fn publish(&self, event: &SessionEvent) -> std::result::Result<(), PublishError> {
        self(event)
    }
}

/// Publisher that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPublisher;

impl SessionEventPublisher for NoopPublisher {
    fn publish(&self, _event: &SessionEvent) -> std::result::Result<(), PublishError> {
        Ok(())
    }
}

/// Publisher fanning events out over a broadcast channel.
///
/// Subscribers that fall behind lose the oldest events.
#[derive(Debug, Clone)]
pub struct BroadcastPublisher {
    sender: broadcast::Sender<SessionEvent>,
}

impl BroadcastPublisher {
    /// Create a publisher buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to future events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new(DEFAULT_BROADCAST_CAPACITY)
    }
}

impl SessionEventPublisher for BroadcastPublisher {
    fn publish(&self, event: &SessionEvent) -> std::result::Result<(), PublishError> {
        self.sender
            .send(event.clone())
            .map(|_| ())
            .map_err(|_| PublishError::NoSubscribers)
    }
}

/// Result of handing an event to the publisher.
#[derive(Debug)]
#[must_use]
pub enum PublishOutcome {
    /// The publisher accepted the event.
    Delivered,
    /// The publisher failed; the failure was logged.
    Failed(PublishError),
}

impl PublishOutcome {
    /// Whether the publisher accepted the event.
    pub fn is_delivered(&self) -> bool {
        matches!(self, PublishOutcome::Delivered)
    }
}

/// Builds events and hands them to the configured publisher.
///
/// Publisher failures are logged and reported as
/// [`PublishOutcome::Failed`]; they never reach the read or write path.
pub struct EventDispatcher {
    source: Arc<str>,
    publisher: RwLock<Arc<dyn SessionEventPublisher>>,
}

impl EventDispatcher {
    /// Create a dispatcher for the repository named `source`.
    pub fn new(source: impl Into<Arc<str>>, publisher: Arc<dyn SessionEventPublisher>) -> Self {
        Self {
            source: source.into(),
            publisher: RwLock::new(publisher),
        }
    }

    /// Name of the publishing repository.
    pub fn source(&self) -> &Arc<str> {
        &self.source
    }

    /// Replace the publisher.
    pub fn set_publisher(&self, publisher: Arc<dyn SessionEventPublisher>) {
        *self.publisher.write() = publisher;
    }

    /// Publish a `kind` event for `session`, or for a placeholder when only
    /// `session_id` is known.
    ///
    /// Fails when neither a session nor a non-blank id is available.
    pub fn publish(
        &self,
        kind: SessionEventKind,
        session: Option<Arc<Session>>,
        session_id: Option<&str>,
    ) -> Result<PublishOutcome> {
        let event = self.resolve(kind, session, session_id)?;
        trace!(kind = %kind, session_id = %event.session_id, "Publishing session event");

        let publisher = Arc::clone(&self.publisher.read());
        match publisher.publish(&event) {
            Ok(()) => Ok(PublishOutcome::Delivered),
            Err(e) => {
                error!(
                    kind = %kind,
                    session_id = %event.session_id,
                    error = %e,
                    "Error occurred while publishing session event"
                );
                Ok(PublishOutcome::Failed(e))
            }
        }
    }

    fn resolve(
        &self,
        kind: SessionEventKind,
        session: Option<Arc<Session>>,
        session_id: Option<&str>,
    ) -> Result<SessionEvent> {
        let requested = session_id;
        let session_id = session_id.filter(|id| !id.trim().is_empty());

        let (session, session_id) = match (session, session_id) {
            (Some(session), Some(id)) => (session, id.to_string()),
            (Some(session), None) => {
                let id = session.id();
                (session, id)
            }
            (None, Some(id)) => (Arc::new(Session::placeholder(id)?), id.to_string()),
            (None, None) => {
                return Err(Error::UnresolvableSessionEvent(
                    requested.map(str::to_string),
                ));
            }
        };

        Ok(SessionEvent {
            kind,
            source: Arc::clone(&self.source),
            session,
            session_id,
            timestamp: Utc::now(),
        })
    }
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::SerializationStrategy;

    fn dispatcher(publisher: Arc<dyn SessionEventPublisher>) -> EventDispatcher {
        EventDispatcher::new("test-repo", publisher)
    }

    #[test]
    fn test_publishes_with_session() {
        let broadcast = BroadcastPublisher::new(8);
        let mut rx = broadcast.subscribe();
        let dispatcher = dispatcher(Arc::new(broadcast));

        let session = Arc::new(Session::create(SerializationStrategy::Full));
        let outcome = dispatcher
            .publish(SessionEventKind::Created, Some(Arc::clone(&session)), None)
            .unwrap();
        assert!(outcome.is_delivered());

        let event = rx.try_recv().unwrap();
        assert_eq!(event.kind, SessionEventKind::Created);
        assert_eq!(event.session_id, session.id());
        assert_eq!(&*event.source, "test-repo");
    }

    #[test]
    fn test_placeholder_when_only_id_known() {
        let broadcast = BroadcastPublisher::new(8);
        let mut rx = broadcast.subscribe();
        let dispatcher = dispatcher(Arc::new(broadcast));

        dispatcher
            .publish(SessionEventKind::Destroyed, None, Some("gone"))
            .unwrap()
            .is_delivered();

        let event = rx.try_recv().unwrap();
        assert_eq!(event.session_id, "gone");
        assert_eq!(event.session.id(), "gone");
        assert!(event.session.attribute_names().is_empty());
    }

    #[test]
    fn test_unresolvable_event_fails() {
        let dispatcher = dispatcher(Arc::new(NoopPublisher));
        assert!(matches!(
            dispatcher.publish(SessionEventKind::Expired, None, None),
            Err(Error::UnresolvableSessionEvent(None))
        ));
        assert!(dispatcher
            .publish(SessionEventKind::Expired, None, Some("  "))
            .is_err());
    }

    #[test]
    fn test_publisher_failure_is_contained() {
        let failing = |_event: &SessionEvent| -> std::result::Result<(), PublishError> {
            Err(PublishError::Subscriber("boom".into()))
        };
        let dispatcher = dispatcher(Arc::new(failing));

        let outcome = dispatcher
            .publish(SessionEventKind::Deleted, None, Some("abc"))
            .unwrap();
        assert!(matches!(outcome, PublishOutcome::Failed(PublishError::Subscriber(_))));
    }

    #[test]
    fn test_broadcast_without_subscribers_fails() {
        let dispatcher = dispatcher(Arc::new(BroadcastPublisher::default()));
        let outcome = dispatcher
            .publish(SessionEventKind::Changed, None, Some("abc"))
            .unwrap();
        assert!(matches!(outcome, PublishOutcome::Failed(PublishError::NoSubscribers)));
    }

    #[test]
    fn test_set_publisher() {
        let dispatcher = dispatcher(Arc::new(NoopPublisher));
        let broadcast = BroadcastPublisher::new(4);
        let mut rx = broadcast.subscribe();
        dispatcher.set_publisher(Arc::new(broadcast));

        let _ = dispatcher.publish(SessionEventKind::Created, None, Some("x"));
        assert_eq!(rx.try_recv().unwrap().kind, SessionEventKind::Created);
    }
}
