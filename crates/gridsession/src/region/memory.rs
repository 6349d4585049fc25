//! In-process region holding encoded sessions.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, trace, warn};

use super::{EntryEvent, EntryListener, EntryWriter, IndexQuery, Operation, SessionRegion};
use crate::codec::{SerializationStrategy, SessionCodec};
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::expiration::{ExpirationAction, ExpirationPolicy};
use crate::session::Session;

/// A [`SessionRegion`] kept in process memory.
///
/// Entries are stored encoded, so every read yields an independent
/// [`Session`]. Hooks run on the caller's thread after the data lock has
/// been released. Writes to one key are serialized: the first writer of a
/// new key takes the create path and every later writer sees an update.
/// Concurrent writers of the same key are otherwise last-writer-wins.
pub struct InMemoryRegion {
    name: String,
    codec: RwLock<SessionCodec>,
    entries: Mutex<HashMap<String, Bytes>>,
    reserved: Mutex<HashSet<String>>,
    released: Condvar,
    writer: RwLock<Option<Arc<dyn EntryWriter>>>,
    listeners: RwLock<Vec<Arc<dyn EntryListener>>>,
    expiration_policy: Option<Arc<dyn ExpirationPolicy>>,
    offline: AtomicBool,
}

impl InMemoryRegion {
    /// Create an empty region.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            codec: RwLock::new(SessionCodec::default()),
            entries: Mutex::new(HashMap::new()),
            reserved: Mutex::new(HashSet::new()),
            released: Condvar::new(),
            writer: RwLock::new(None),
            listeners: RwLock::new(Vec::new()),
            expiration_policy: None,
            offline: AtomicBool::new(false),
        }
    }

    /// Create an empty region named and encoded as `config` says.
    pub fn from_config(config: &SessionConfig) -> Self {
        let region = Self::new(config.region_name.clone());
        region.configure_serialization(config.serialization);
        region
    }

    /// Time-box entries with `policy` in [`InMemoryRegion::expire_entries`].
    pub fn with_expiration_policy(mut self, policy: Arc<dyn ExpirationPolicy>) -> Self {
        self.expiration_policy = Some(policy);
        self
    }

    /// Region name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the region holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Whether `id` is stored.
    pub fn contains_key(&self, id: &str) -> bool {
        self.entries.lock().contains_key(id)
    }

    /// Make every data operation fail with [`Error::DataAccess`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Hydrate a copy replicated from another member.
    ///
    /// The creation writer sees a [`Operation::LocalLoadCreate`] event.
    pub fn local_load(&self, id: &str, session: &Session) -> Result<()> {
        self.check_online()?;
        let _reservation = self.reserve(id);
        let codec = self.codec();
        let encoded = codec.encode(session)?;

        let event = EntryEvent::new(Operation::LocalLoadCreate, id)
            .with_new_value(codec.decode(&encoded)?);
        self.before_create(&event)?;

        self.entries.lock().insert(id.to_string(), encoded);
        Ok(())
    }

    /// Time-box `id` out of the region, firing `after_invalidate`.
    pub fn invalidate(&self, id: &str) -> Result<Option<Session>> {
        self.evict(id, Operation::Invalidate)
    }

    /// Evict every entry that is due as of `now`.
    ///
    /// With an expiration policy an entry is due once its remaining timeout
    /// is zero or negative; otherwise, or when the policy has no opinion, the
    /// session's own idle interval decides. Returns the number of evictions.
    pub fn expire_entries(&self, now: DateTime<Utc>) -> Result<usize> {
        self.check_online()?;
        let codec = self.codec();
        let snapshot: Vec<(String, Bytes)> = self
            .entries
            .lock()
            .iter()
            .map(|(id, bytes)| (id.clone(), bytes.clone()))
            .collect();

        let operation = match self.expiration_policy.as_ref().map(|p| p.action()) {
            Some(ExpirationAction::Destroy) => Operation::Destroy,
            _ => Operation::Invalidate,
        };

        let mut expired = 0;
        for (id, bytes) in snapshot {
            let session = codec.decode(&bytes)?;
            let timeout = self
                .expiration_policy
                .as_ref()
                .and_then(|policy| policy.determine_expiration_timeout_at(&session, now));
            let due = match timeout {
                Some(remaining) => remaining <= Duration::zero(),
                None => session.is_expired_at(now),
            };

            if due && self.evict(&id, operation)?.is_some() {
                expired += 1;
            }
        }

        if expired > 0 {
            debug!(region = %self.name, expired, "Expired region entries");
        }
        Ok(expired)
    }

    fn codec(&self) -> SessionCodec {
        *self.codec.read()
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::DataAccess(format!("region {} is offline", self.name)));
        }
        Ok(())
    }

    /// Block until no other writer holds `id`, then hold it until the
    /// returned reservation drops.
    fn reserve(&self, id: &str) -> KeyReservation<'_> {
        let mut reserved = self.reserved.lock();
        while reserved.contains(id) {
            self.released.wait(&mut reserved);
        }
        reserved.insert(id.to_string());
        KeyReservation {
            region: self,
            key: id.to_string(),
        }
    }

    fn evict(&self, id: &str, operation: Operation) -> Result<Option<Session>> {
        self.check_online()?;
        let reservation = self.reserve(id);
        let removed = self.entries.lock().remove(id);
        drop(reservation);
        let Some(bytes) = removed else {
            return Ok(None);
        };
        let codec = self.codec();

        let event = EntryEvent::new(operation, id).with_old_value(codec.decode(&bytes)?);
        match operation {
            Operation::Invalidate => self.notify(&event, |l, e| l.after_invalidate(e)),
            _ => self.notify(&event, |l, e| l.after_destroy(e)),
        }

        Ok(Some(codec.decode(&bytes)?))
    }

    fn before_create(&self, event: &EntryEvent) -> Result<()> {
        let writer = self.writer.read().clone();
        match writer {
            Some(writer) => writer.before_create(event),
            None => Ok(()),
        }
    }

    fn notify<F>(&self, event: &EntryEvent, hook: F)
    where
        F: Fn(&dyn EntryListener, &EntryEvent) -> Result<()>,
    {
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            if let Err(e) = hook(listener.as_ref(), event) {
                warn!(
                    region = %self.name,
                    operation = %event.operation,
                    key = %event.key,
                    error = %e,
                    "Entry listener failed"
                );
            }
        }
    }
}

impl SessionRegion for InMemoryRegion {
    fn full_path(&self) -> String {
        format!("/{}", self.name)
    }

    fn configure_serialization(&self, strategy: SerializationStrategy) {
        *self.codec.write() = SessionCodec::new(strategy);
    }

    fn get(&self, id: &str) -> Result<Option<Session>> {
        self.check_online()?;
        let bytes = self.entries.lock().get(id).cloned();
        bytes.map(|bytes| self.codec().decode(&bytes)).transpose()
    }

    fn put(&self, id: &str, session: &Session) -> Result<Option<Session>> {
        self.check_online()?;
        let reservation = self.reserve(id);
        let codec = self.codec();
        let existing = self.entries.lock().get(id).cloned();

        let Some(old_bytes) = existing else {
            let encoded = codec.encode(session)?;
            let event =
                EntryEvent::new(Operation::Create, id).with_new_value(codec.decode(&encoded)?);
            self.before_create(&event)?;

            self.entries.lock().insert(id.to_string(), encoded);
            return Ok(None);
        };

        let ships_delta = codec.strategy() == SerializationStrategy::Delta
            && session.with_attributes(|attributes| attributes.is_delta_tracking());
        let encoded = if ships_delta {
            let delta = codec.encode_delta(session)?;
            trace!(session_id = %id, bytes = delta.len(), "Applying session delta");
            let stored = codec.decode(&old_bytes)?;
            codec.apply_delta(&stored, &delta)?;
            codec.encode(&stored)?
        } else {
            codec.encode(session)?
        };

        self.entries.lock().insert(id.to_string(), encoded.clone());
        drop(reservation);

        let event = EntryEvent::new(Operation::Update, id)
            .with_old_value(codec.decode(&old_bytes)?)
            .with_new_value(codec.decode(&encoded)?);
        self.notify(&event, |l, e| l.after_update(e));

        Ok(Some(codec.decode(&old_bytes)?))
    }

    fn remove(&self, id: &str) -> Result<Option<Session>> {
        self.evict(id, Operation::Destroy)
    }

    fn query(&self, query: &IndexQuery) -> Result<Vec<Session>> {
        self.check_online()?;
        let codec = self.codec();
        let snapshot: Vec<Bytes> = self.entries.lock().values().cloned().collect();

        let mut matches = Vec::new();
        for bytes in snapshot {
            let session = codec.decode(&bytes)?;
            if query.matches(&session) {
                matches.push(session);
            }
        }
        Ok(matches)
    }

    fn set_entry_writer(&self, writer: Arc<dyn EntryWriter>) {
        *self.writer.write() = Some(writer);
    }

    fn add_entry_listener(&self, listener: Arc<dyn EntryListener>) {
        self.listeners.write().push(listener);
    }
}

/// Exclusive claim on one key of an [`InMemoryRegion`].
struct KeyReservation<'a> {
    region: &'a InMemoryRegion,
    key: String,
}

impl Drop for KeyReservation<'_> {
    fn drop(&mut self) {
        self.region.reserved.lock().remove(&self.key);
        self.region.released.notify_all();
    }
}

impl std::fmt::Debug for InMemoryRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryRegion")
            .field("name", &self.name)
            .field("entries", &self.len())
            .finish_non_exhaustive()
    }
}
