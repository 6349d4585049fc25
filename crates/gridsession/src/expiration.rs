//! Expiration rules beyond the lazy idle check.
//!
//! - [`FixedDurationExpirationRepository`] caps a session's total lifetime
//!   measured from its creation, however often it is accessed.
//! - [`ExpirationPolicy`] lets a region time-box entries itself; see
//!   [`InMemoryRegion::expire_entries`](crate::InMemoryRegion::expire_entries).

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::repository::SessionRepository;
use crate::session::SessionView;

/// Default idle timeout of [`IdleTimeoutExpirationPolicy`] (30 minutes).
pub const DEFAULT_IDLE_TIMEOUT_SECS: i64 = 1800;

/// What the region does with an entry whose timeout elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpirationAction {
    /// Time-box the entry out, firing `after_invalidate`.
    #[default]
    Invalidate,
    /// Remove the entry, firing `after_destroy`.
    Destroy,
}

/// Decides how long a stored session may live.
pub trait ExpirationPolicy: Send + Sync {
    /// Remaining lifetime of `session` as of `now`.
    ///
    /// `None` leaves the entry to the region's default expiration. A zero
    /// or negative duration means the entry is due.
    fn determine_expiration_timeout_at(
        &self,
        session: &dyn SessionView,
        now: DateTime<Utc>,
    ) -> Option<Duration>;

    /// Remaining lifetime of `session` as of now.
    fn determine_expiration_timeout(&self, session: &dyn SessionView) -> Option<Duration> {
        self.determine_expiration_timeout_at(session, Utc::now())
    }

    /// Action taken once the timeout elapsed.
    fn action(&self) -> ExpirationAction {
        ExpirationAction::Invalidate
    }
}

/// Expires sessions that stayed idle longer than a configured timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleTimeoutExpirationPolicy {
    idle_timeout: Option<Duration>,
    action: ExpirationAction,
}

impl IdleTimeoutExpirationPolicy {
    /// Create a policy with the given idle timeout. `None` defers to the
    /// region's default expiration.
    pub fn new(idle_timeout: Option<Duration>) -> Self {
        Self {
            idle_timeout,
            action: ExpirationAction::Invalidate,
        }
    }

    /// Set the action taken on expiry.
    pub fn with_action(mut self, action: ExpirationAction) -> Self {
        self.action = action;
        self
    }

    /// Change the idle timeout.
    pub fn set_idle_timeout(&mut self, idle_timeout: Option<Duration>) {
        self.idle_timeout = idle_timeout;
    }

    /// The configured idle timeout.
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout
    }
}

impl Default for IdleTimeoutExpirationPolicy {
    fn default() -> Self {
        Self::new(Some(Duration::seconds(DEFAULT_IDLE_TIMEOUT_SECS)))
    }
}

impl ExpirationPolicy for IdleTimeoutExpirationPolicy {
    fn determine_expiration_timeout_at(
        &self,
        session: &dyn SessionView,
        now: DateTime<Utc>,
    ) -> Option<Duration> {
        let idle_time = now
            .signed_duration_since(session.last_accessed_time())
            .max(Duration::zero());
        self.idle_timeout.map(|timeout| {
            timeout
                .checked_sub(&idle_time)
                .unwrap_or(Duration::MIN)
        })
    }

    fn action(&self) -> ExpirationAction {
        self.action
    }
}

/// Whether a session created at `creation_time` outlived `timeout` as of
/// `now`. The boundary itself is not expired.
pub fn fixed_duration_expired(
    creation_time: DateTime<Utc>,
    timeout: Duration,
    now: DateTime<Utc>,
) -> bool {
    now.signed_duration_since(creation_time) > timeout
}

/// Wraps a repository and hides sessions older than a fixed lifetime.
///
/// Expired sessions are deleted through the delegate when looked up, so the
/// delegate publishes the usual Deleted or Expired event.
#[derive(Debug)]
pub struct FixedDurationExpirationRepository<R> {
    delegate: R,
    expiration_timeout: Option<Duration>,
}

impl<R: SessionRepository> FixedDurationExpirationRepository<R> {
    /// Wrap `delegate`. Without a timeout lookups pass through unchanged.
    pub fn new(delegate: R, expiration_timeout: Option<Duration>) -> Self {
        Self {
            delegate,
            expiration_timeout,
        }
    }

    /// The wrapped repository.
    pub fn delegate(&self) -> &R {
        &self.delegate
    }

    /// The fixed lifetime, if any.
    pub fn expiration_timeout(&self) -> Option<Duration> {
        self.expiration_timeout
    }
}

impl<R: SessionRepository> SessionRepository for FixedDurationExpirationRepository<R> {
    type Session = R::Session;

    fn create_session(&self) -> Self::Session {
        self.delegate.create_session()
    }

    fn find_by_id(&self, id: &str) -> Result<Option<Self::Session>> {
        let Some(session) = self.delegate.find_by_id(id)? else {
            return Ok(None);
        };

        match self.expiration_timeout {
            Some(timeout)
                if fixed_duration_expired(session.creation_time(), timeout, Utc::now()) =>
            {
                debug!(session_id = %id, "Session outlived its fixed lifetime");
                self.delegate.delete_by_id(&session.id())?;
                Ok(None)
            }
            _ => Ok(Some(session)),
        }
    }

    fn save(&self, session: &dyn SessionView) -> Result<()> {
        self.delegate.save(session)
    }

    fn delete_by_id(&self, id: &str) -> Result<()> {
        self.delegate.delete_by_id(id)
    }
}
