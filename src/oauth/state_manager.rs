//! Pending authorization attempts keyed by their CSRF `state` value.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rand::RngCore;
use std::sync::Arc;

const STATE_BYTES: usize = 32;

/// Who started an authorization attempt, and when.
#[derive(Clone, Debug, PartialEq)]
pub struct StateEntry {
    pub owner_id: String,
    pub provider: String,
    pub issued_at: DateTime<Utc>,
}

/// Single-use `state` values that lapse after a fixed lifetime.
///
/// Clones share the same pending set.
#[derive(Clone)]
pub struct StateManager {
    pending: Arc<DashMap<String, StateEntry>>,
    lifetime: Duration,
}

impl StateManager {
    pub fn new(lifetime_seconds: i64) -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
            lifetime: Duration::seconds(lifetime_seconds.max(0)),
        }
    }

    /// Records a new attempt for `(owner_id, provider)` and returns its state.
    /// Lapsed attempts are dropped first so the set stays bounded.
    pub fn create_state(&self, owner_id: &str, provider: &str) -> String {
        self.cleanup_expired();

        let mut bytes = [0u8; STATE_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        let state = URL_SAFE_NO_PAD.encode(bytes);

        self.pending.insert(
            state.clone(),
            StateEntry {
                owner_id: owner_id.to_string(),
                provider: provider.to_lowercase(),
                issued_at: Utc::now(),
            },
        );
        state
    }

    /// Removes `state` and returns its entry if it was issued here and has
    /// not lapsed. A second call with the same value always returns `None`.
    pub fn validate_and_consume(&self, state: &str) -> Option<StateEntry> {
        let (_, entry) = self.pending.remove(state)?;
        self.is_live(&entry, Utc::now()).then_some(entry)
    }

    pub fn cleanup_expired(&self) {
        let now = Utc::now();
        self.pending.retain(|_, entry| self.is_live(entry, now));
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn is_live(&self, entry: &StateEntry, now: DateTime<Utc>) -> bool {
        now - entry.issued_at <= self.lifetime
    }
}
