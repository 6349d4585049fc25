//! Integration tests for RegionSessionRepository over an in-memory region.

mod common;

use std::any::Any;
use std::sync::Arc;

use chrono::{Duration, Utc};
use gridsession::{
    AttributeValue, HasPrincipalName, IdleTimeoutExpirationPolicy, InMemoryRegion,
    IndexedSessionRepository, PRINCIPAL_NAME_INDEX_NAME, RegionSessionRepository,
    SECURITY_CONTEXT, SerializationStrategy, Session, SessionConfig, SessionEventKind,
    SessionRegion, SessionRepository, SessionValue, hash_session_id,
};

use common::{RecordingPublisher, TestRepository, init_tracing};

/// Authentication details stored by a login filter.
#[derive(Debug, PartialEq)]
struct LoginContext {
    user: String,
}

impl SessionValue for LoginContext {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn equals(&self, other: &dyn SessionValue) -> bool {
        other
            .as_any()
            .downcast_ref::<LoginContext>()
            .is_some_and(|other| self == other)
    }

    fn to_json(&self) -> Option<serde_json::Value> {
        Some(serde_json::json!({ "user": self.user }))
    }

    fn as_principal(&self) -> Option<&dyn HasPrincipalName> {
        Some(self)
    }
}

impl HasPrincipalName for LoginContext {
    fn principal_name(&self) -> Option<String> {
        Some(self.user.clone())
    }
}

#[test]
fn test_full_lifecycle_events() {
    let t = TestRepository::new();

    let session = t.repository.create_session();
    let id = session.id();
    session.set_attribute("cart", 2i64);
    t.repository.save(&session).unwrap();

    let loaded = t.repository.find_by_id(&id).unwrap().unwrap();
    loaded.set_attribute("cart", 3i64);
    t.repository.save(&loaded).unwrap();

    t.repository.delete_by_id(&id).unwrap();
    assert!(t.repository.find_by_id(&id).unwrap().is_none());

    assert_eq!(
        t.events.kinds(),
        vec![
            SessionEventKind::Created,
            SessionEventKind::Changed,
            SessionEventKind::Destroyed,
            SessionEventKind::Deleted,
        ]
    );

    let created = &t.events.of_kind(SessionEventKind::Created)[0];
    assert_eq!(created.session_id, id);
    assert_eq!(&*created.source, "/Sessions");
    assert_eq!(
        created.session.attribute("cart").unwrap().as_json(),
        Some(&serde_json::json!(2))
    );

    let changed = &t.events.of_kind(SessionEventKind::Changed)[0];
    assert_eq!(
        changed.session.attribute("cart").unwrap().as_json(),
        Some(&serde_json::json!(3))
    );
}

#[test]
fn test_each_find_yields_an_independent_instance() {
    let t = TestRepository::new();
    let session = t.repository.create_session();
    t.repository.save(&session).unwrap();

    let first = t.repository.find_by_id(&session.id()).unwrap().unwrap();
    let second = t.repository.find_by_id(&session.id()).unwrap().unwrap();
    first.set_attribute("only-first", true);

    assert_eq!(first, second);
    assert!(second.attribute("only-first").is_none());
}

#[test]
fn test_concurrent_saves_are_last_writer_wins() {
    let t = TestRepository::new();
    let session = t.repository.create_session();
    t.repository.save(&session).unwrap();

    let a = t.repository.find_by_id(&session.id()).unwrap().unwrap();
    let b = t.repository.find_by_id(&session.id()).unwrap().unwrap();
    a.set_attribute("writer", "a");
    b.set_attribute("writer", "b");
    t.repository.save(&a).unwrap();
    t.repository.save(&b).unwrap();

    let stored = t.repository.find_by_id(&session.id()).unwrap().unwrap();
    assert_eq!(stored.attribute("writer").unwrap().as_str(), Some("b"));
}

#[test]
fn test_principal_from_security_context_is_indexed() {
    let t = TestRepository::new();

    let session = t.repository.create_session();
    session.set_attribute(
        SECURITY_CONTEXT,
        AttributeValue::new(LoginContext {
            user: "alice".into(),
        }),
    );
    assert_eq!(session.principal_name().as_deref(), Some("alice"));
    t.repository.save(&session).unwrap();

    let other = t.repository.create_session();
    other.set_principal_name("bob");
    t.repository.save(&other).unwrap();

    let found = t.repository.find_by_principal_name("alice").unwrap();
    assert_eq!(found.len(), 1);
    let loaded = &found[&session.id()];
    assert_eq!(loaded.principal_name().as_deref(), Some("alice"));
    assert_eq!(
        loaded
            .attribute(PRINCIPAL_NAME_INDEX_NAME)
            .and_then(|v| v.as_str().map(str::to_string)),
        Some("alice".to_string())
    );

    let by_index = t
        .repository
        .find_by_index_name_and_index_value(PRINCIPAL_NAME_INDEX_NAME, "bob")
        .unwrap();
    assert_eq!(by_index.keys().collect::<Vec<_>>(), vec![&other.id()]);
}

#[test]
fn test_lazy_expiration_on_read() {
    let t = TestRepository::with_config(
        SessionConfig::default()
            .with_region_name("Sessions")
            .with_max_inactive_interval(Duration::seconds(30)),
    );
    let session = t.repository.create_session();
    session.set_last_accessed_time(Some(Utc::now() - Duration::seconds(31)));
    t.repository.save(&session).unwrap();
    t.events.clear();

    assert!(t.repository.find_by_id(&session.id()).unwrap().is_none());
    assert!(t.region.is_empty());

    let expired = t.events.of_kind(SessionEventKind::Expired);
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].session_id, session.id());
    assert!(t.events.of_kind(SessionEventKind::Deleted).is_empty());
}

#[test]
fn test_disabled_expiration_never_expires() {
    let t = TestRepository::with_config(
        SessionConfig::default().with_max_inactive_interval(Duration::zero()),
    );
    let session = t.repository.create_session();
    session.set_last_accessed_time(Some(Utc::now() - Duration::days(365)));
    t.repository.save(&session).unwrap();

    assert!(t.repository.find_by_id(&session.id()).unwrap().is_some());
}

#[test]
fn test_region_expiration_publishes_expired_with_session() {
    init_tracing();
    let policy = IdleTimeoutExpirationPolicy::new(Some(Duration::minutes(10)));
    let region = Arc::new(InMemoryRegion::new("Sessions").with_expiration_policy(Arc::new(policy)));
    let events = RecordingPublisher::default();
    let repository = RegionSessionRepository::builder()
        .region(region.clone())
        .publisher(Arc::new(events.clone()))
        .build()
        .unwrap();

    let session = repository.create_session();
    session.set_attribute("k", "v");
    repository.save(&session).unwrap();
    let id = session.id();

    let later = session.last_accessed_time() + Duration::minutes(11);
    assert_eq!(region.expire_entries(later).unwrap(), 1);

    let expired = events.of_kind(SessionEventKind::Expired);
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].session.attribute("k").unwrap().as_str(), Some("v"));
    assert!(!repository.created_session_ids().contains(hash_session_id(&id)));
}

#[test]
fn test_local_load_is_not_a_creation() {
    let t = TestRepository::new();
    let replica = Session::create(SerializationStrategy::Full);
    replica.set_attribute("from", "peer");

    t.region.local_load(&replica.id(), &replica).unwrap();
    assert!(t.events.kinds().is_empty());

    let found = t.repository.find_by_id(&replica.id()).unwrap().unwrap();
    assert_eq!(found.attribute("from").unwrap().as_str(), Some("peer"));
}

#[test]
fn test_recreated_after_destroy_is_announced_again() {
    let t = TestRepository::new();
    let session = t.repository.create_session();
    t.repository.save(&session).unwrap();

    t.region.remove(&session.id()).unwrap();
    t.region.put(&session.id(), &session).unwrap();

    assert_eq!(
        t.events.kinds(),
        vec![
            SessionEventKind::Created,
            SessionEventKind::Destroyed,
            SessionEventKind::Created,
        ]
    );
}

#[test]
fn test_delta_serialization_end_to_end() {
    let t = TestRepository::with_config(
        SessionConfig::default().with_serialization(SerializationStrategy::Delta),
    );
    let session = t.repository.create_session();
    session.set_attribute("a", "1");
    session.set_attribute("b", "2");
    t.repository.save(&session).unwrap();

    let loaded = t.repository.find_by_id(&session.id()).unwrap().unwrap();
    loaded.remove_attribute("a");
    loaded.set_attribute("c", "3");
    t.repository.save(&loaded).unwrap();

    let stored = t.region.get(&session.id()).unwrap().unwrap();
    assert_eq!(
        stored.attribute_names().into_iter().collect::<Vec<_>>(),
        vec!["b".to_string(), "c".to_string()]
    );
}

#[test]
fn test_publisher_failures_do_not_break_operations() {
    let t = TestRepository::new();
    t.repository.set_event_publisher(Arc::new(
        |_event: &gridsession::SessionEvent| -> Result<(), gridsession::PublishError> {
            Err(gridsession::PublishError::Subscriber("down".into()))
        },
    ));

    let session = t.repository.create_session();
    t.repository.save(&session).unwrap();
    assert!(t.repository.find_by_id(&session.id()).unwrap().is_some());
    t.repository.delete_by_id(&session.id()).unwrap();
}
