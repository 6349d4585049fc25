//! Common test utilities for integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use gridsession::{
    InMemoryRegion, PublishError, RegionSessionRepository, SessionConfig, SessionEvent,
    SessionEventKind,
};
use parking_lot::Mutex;

/// Install a test-writer subscriber once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Publisher remembering every event it receives.
#[derive(Clone, Default)]
pub struct RecordingPublisher {
    events: Arc<Mutex<Vec<SessionEvent>>>,
}

impl RecordingPublisher {
    /// Kinds of the recorded events, in publication order.
    pub fn kinds(&self) -> Vec<SessionEventKind> {
        self.events.lock().iter().map(|event| event.kind).collect()
    }

    /// Recorded events of one kind.
    pub fn of_kind(&self, kind: SessionEventKind) -> Vec<SessionEvent> {
        self.events
            .lock()
            .iter()
            .filter(|event| event.kind == kind)
            .cloned()
            .collect()
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl gridsession::SessionEventPublisher for RecordingPublisher {
    fn publish(&self, event: &SessionEvent) -> Result<(), PublishError> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

/// A repository over a fresh in-memory region.
pub struct TestRepository {
    pub repository: RegionSessionRepository,
    pub region: Arc<InMemoryRegion>,
    pub events: RecordingPublisher,
}

impl TestRepository {
    /// Build with default configuration.
    pub fn new() -> Self {
        Self::with_config(SessionConfig::default().with_region_name("Sessions"))
    }

    /// Build with `config`.
    pub fn with_config(config: SessionConfig) -> Self {
        init_tracing();
        let region = Arc::new(InMemoryRegion::from_config(&config));
        let events = RecordingPublisher::default();
        let repository = RegionSessionRepository::builder()
            .region(region.clone())
            .config(config)
            .publisher(Arc::new(events.clone()))
            .build()
            .expect("repository build failed");

        Self {
            repository,
            region,
            events,
        }
    }
}
