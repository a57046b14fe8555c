//! Advisory cross-instance request lock.
//!
//! Multiple app instances can share one preference store; the lock lets
//! them coordinate so two instances do not stream into the same session
//! at once. It is advisory only: a crashed holder leaves a stale value
//! behind, which any other instance may override once it ages past the
//! staleness window.
//!
//! The stored value is `"{unix_millis}|{owner}"`.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use polylm_core::PrefStore;

/// Default age after which a held lock is considered abandoned.
pub const DEFAULT_STALENESS: Duration = Duration::from_secs(120);

/// Advisory lock over a shared preference store.
pub struct AdvisoryLock {
    store: Arc<dyn PrefStore>,
    key: String,
    owner: String,
    staleness: Duration,
}

impl std::fmt::Debug for AdvisoryLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdvisoryLock")
            .field("key", &self.key)
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

impl AdvisoryLock {
    /// Creates a lock handle for `owner` under `key`.
    pub fn new(store: Arc<dyn PrefStore>, key: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
            owner: owner.into(),
            staleness: DEFAULT_STALENESS,
        }
    }

    /// Overrides the staleness window.
    #[must_use]
    pub fn with_staleness(mut self, staleness: Duration) -> Self {
        self.staleness = staleness;
        self
    }

    /// Attempts to take (or refresh) the lock.
    ///
    /// Succeeds when the lock is free, already ours, or stale. A stale
    /// takeover is logged with the previous holder.
    pub fn try_acquire(&self) -> bool {
        match self.store.get(&self.key).as_deref().and_then(parse_value) {
            None => {
                self.write();
                true
            }
            Some((_, holder)) if holder == self.owner => {
                self.write();
                true
            }
            Some((stamped_ms, holder)) => {
                let age = now_millis().saturating_sub(stamped_ms);
                if Duration::from_millis(age) < self.staleness {
                    return false;
                }
                tracing::warn!(
                    key = %self.key,
                    previous = %holder,
                    age_ms = age,
                    "overriding stale advisory lock"
                );
                self.write();
                true
            }
        }
    }

    /// Releases the lock if this instance holds it.
    pub fn release(&self) {
        if self.holder().as_deref() == Some(self.owner.as_str()) {
            self.store.remove(&self.key);
        }
    }

    /// The current holder, if any.
    pub fn holder(&self) -> Option<String> {
        self.store
            .get(&self.key)
            .as_deref()
            .and_then(parse_value)
            .map(|(_, owner)| owner.to_string())
    }

    fn write(&self) {
        self.store
            .set(&self.key, &format!("{}|{}", now_millis(), self.owner));
    }
}

fn parse_value(value: &str) -> Option<(u64, &str)> {
    let (millis, owner) = value.split_once('|')?;
    Some((millis.parse().ok()?, owner))
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}
