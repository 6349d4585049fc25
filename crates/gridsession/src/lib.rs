//! Distributed HTTP-session storage on top of a data-grid cache region.
//!
//! This crate provides:
//! - A session model with dirty and delta tracking and lazy idle expiration
//! - Pluggable predicates deciding which attribute writes are persisted
//! - A repository storing sessions in a cache region
//! - Translation of region entry hooks into session lifecycle events
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use gridsession::{InMemoryRegion, RegionSessionRepository, SessionConfig, SessionRepository};
//!
//! let config = SessionConfig::default().with_region_name("Sessions");
//! let region = Arc::new(InMemoryRegion::from_config(&config));
//! let repository = RegionSessionRepository::builder()
//!     .region(region)
//!     .config(config)
//!     .build()?;
//!
//! let session = repository.create_session();
//! session.set_attribute("cart", 3i64);
//! repository.save(&session)?;
//! ```

mod attributes;
mod codec;
mod config;
mod dirty;
mod error;
mod events;
mod expiration;
mod handler;
mod region;
mod repository;
mod ring;
mod session;
mod value;

pub use attributes::SessionAttributes;
pub use codec::{SerializationStrategy, SessionCodec};
pub use config::{DEFAULT_MAX_INACTIVE_INTERVAL_SECS, DEFAULT_REGION_NAME, SessionConfig};
pub use dirty::{
    AlwaysDirty, AndThen, DeltaAwareDirty, DirtyPredicateKind, EqualsDirty, IdentityDirty,
    IsDirtyPredicate, NeverDirty, OrElse, SharedDirtyPredicate, default_dirty_predicate,
};
pub use error::{Error, Result, SerializationError};
pub use events::{
    BroadcastPublisher, DEFAULT_BROADCAST_CAPACITY, EventDispatcher, NoopPublisher, PublishError,
    PublishOutcome, SessionEvent, SessionEventKind, SessionEventPublisher,
};
pub use expiration::{
    DEFAULT_IDLE_TIMEOUT_SECS, ExpirationAction, ExpirationPolicy,
    FixedDurationExpirationRepository, IdleTimeoutExpirationPolicy, fixed_duration_expired,
};
pub use handler::{SessionCreationWriter, SessionLifecycleListener};
pub use region::{
    EntryEvent, EntryListener, EntryValue, EntryWriter, InMemoryRegion, IndexField, IndexQuery,
    Operation, SessionRegion,
};
pub use repository::{
    IndexedSessionRepository, RegionSessionRepository, RegionSessionRepositoryBuilder,
    SessionRepository,
};
pub use ring::{BoundedRingHashSet, DEFAULT_RING_CAPACITY, MAX_RING_CAPACITY, hash_session_id};
pub use session::{PRINCIPAL_NAME_INDEX_NAME, SECURITY_CONTEXT, Session, SessionView};
pub use value::{AttributeValue, DeltaAware, HasPrincipalName, SessionValue};
