use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{KeyValueStore, Value};

/// One day in milliseconds, the spacing of daily-active-user events.
const DAU_INTERVAL_MS: i64 = 24 * 3600 * 1000;

pub(crate) mod keys {
    pub const TP_ID: &str = "tp_id";
    pub const ENVIRONMENT: &str = "environment";
    pub const SESSION_ID: &str = "session_id";
    pub const SESSION_STARTED_AT: &str = "session_started_at";
    pub const SESSION_LAST_ACTIVITY_TIME: &str = "last_activity_time";
    pub const SESSION_SAMPLING_RATE: &str = "session_sampling_rate";
    pub const SESSION_TRACKING_ENABLED: &str = "session_tracking_enabled";
    pub const SESSION_SAMPLING_OPTIONS: &str = "session_sampling_options";
    pub const TRACKING_ENABLED: &str = "tracking_enabled";
    pub const INGEST_CONFIG: &str = "ingest_config";
    pub const INGEST_CONFIG_DOWNLOADED_AT: &str = "ingest_config_downloaded_at";
    pub const FIRST_TIME_EXECUTION_TIMESTAMP: &str = "first_time_executed_at";
    pub const LAST_DAU_EVENT_SENT_TIMESTAMP: &str = "last_dau_event_sent_at";
}

/// The persisted form of a session.
///
/// The engine owns the live session type; this record is its storage shape.
/// Sampling options travel with the session as an opaque JSON document so the
/// session stays self-contained for sampling decisions even when the cached
/// ingest config has expired.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct SessionRecord {
    /// Opaque session identifier.
    pub session_id: String,
    /// The sampling rate the session was created under.
    pub sampling_rate: u32,
    /// The session's fixed tracking decision.
    pub tracking_enabled: bool,
    /// Wall-clock creation time, milliseconds since the Unix epoch.
    pub created_at: i64,
    /// Monotonic (boot-relative) time of the last activity, milliseconds.
    pub last_activity_time: i64,
    /// Serialized sampling options captured at session creation.
    pub sampling_options: String,
}

/// A cached ingest config document together with its download time.
#[derive(Clone, Debug, PartialEq)]
pub struct CachedConfig {
    /// The raw JSON document as served by the config endpoint.
    pub raw: String,
    /// Wall-clock download time, milliseconds since the Unix epoch.
    pub downloaded_at: i64,
}

/// Typed storage layer on top of a [`KeyValueStore`].
///
/// Construction applies the identity guards: a changed tp id clears
/// everything including the cached config, while a changed environment
/// clears session state but keeps the config cache, since the config
/// document is unique per tp id and carries rates for all environments.
#[derive(Clone)]
pub struct Storage {
    store: Arc<dyn KeyValueStore>,
}

impl Storage {
    /// Creates the storage layer and applies the identity guards.
    pub fn new(store: Arc<dyn KeyValueStore>, tp_id: &str, environment: &str) -> Self {
        let storage = Self { store };

        let cached_tp_id = storage.store.get_string(keys::TP_ID, "");
        let cached_environment = storage.store.get_string(keys::ENVIRONMENT, "");

        if cached_tp_id != tp_id {
            storage.store.clear();
        } else if cached_environment != environment {
            let config = storage.load_ingest_config();
            storage.store.clear();
            if let Some(config) = config {
                storage.save_ingest_config(&config.raw, config.downloaded_at);
            }
        }

        storage.store.set_string(keys::TP_ID, tp_id);
        storage.store.set_string(keys::ENVIRONMENT, environment);

        storage
    }

    /// Loads the persisted session, if all of its fields are present.
    pub fn load_session(&self) -> Option<SessionRecord> {
        let session_id = self.store.get_string(keys::SESSION_ID, "");
        let sampling_rate = self.store.get_long(keys::SESSION_SAMPLING_RATE, -1);
        let created_at = self.store.get_long(keys::SESSION_STARTED_AT, -1);
        let last_activity_time = self.store.get_long(keys::SESSION_LAST_ACTIVITY_TIME, -1);

        if session_id.is_empty() || sampling_rate < 0 || created_at < 0 || last_activity_time < 0 {
            return None;
        }

        Some(SessionRecord {
            session_id,
            sampling_rate: sampling_rate as u32,
            tracking_enabled: self.store.get_bool(keys::SESSION_TRACKING_ENABLED, false),
            created_at,
            last_activity_time,
            sampling_options: self.store.get_string(keys::SESSION_SAMPLING_OPTIONS, ""),
        })
    }

    /// Persists the session.
    pub fn save_session(&self, session: &SessionRecord) {
        self.store.set_string(keys::SESSION_ID, &session.session_id);
        self.store
            .set_long(keys::SESSION_SAMPLING_RATE, session.sampling_rate as i64);
        self.store
            .set_bool(keys::SESSION_TRACKING_ENABLED, session.tracking_enabled);
        self.store
            .set_long(keys::SESSION_STARTED_AT, session.created_at);
        self.store
            .set_long(keys::SESSION_LAST_ACTIVITY_TIME, session.last_activity_time);
        self.store
            .set_string(keys::SESSION_SAMPLING_OPTIONS, &session.sampling_options);
    }

    /// Loads the cached ingest config document.
    pub fn load_ingest_config(&self) -> Option<CachedConfig> {
        let raw = self.store.get_string(keys::INGEST_CONFIG, "");
        let downloaded_at = self.store.get_long(keys::INGEST_CONFIG_DOWNLOADED_AT, -1);

        if raw.is_empty() || downloaded_at < 0 {
            return None;
        }

        Some(CachedConfig { raw, downloaded_at })
    }

    /// Caches an ingest config document.
    pub fn save_ingest_config(&self, raw: &str, downloaded_at: i64) {
        self.store.set_string(keys::INGEST_CONFIG, raw);
        self.store
            .set_long(keys::INGEST_CONFIG_DOWNLOADED_AT, downloaded_at);
    }

    /// Drops the cached ingest config document.
    pub fn clear_ingest_config(&self) {
        self.store.remove(keys::INGEST_CONFIG);
        self.store.remove(keys::INGEST_CONFIG_DOWNLOADED_AT);
    }

    /// Returns the last persisted tracking decision.
    ///
    /// Kept separate from the session so hosts can inspect it without
    /// loading the full session record.
    pub fn load_tracking_enabled(&self) -> bool {
        self.store.get_bool(keys::TRACKING_ENABLED, false)
    }

    /// Persists the tracking decision of the most recent session.
    pub fn save_tracking_enabled(&self, enabled: bool) {
        self.store.set_bool(keys::TRACKING_ENABLED, enabled);
    }

    /// Returns whether this is the first run on this store.
    pub fn is_first_time_execution(&self) -> bool {
        !self.store.contains(keys::FIRST_TIME_EXECUTION_TIMESTAMP)
    }

    /// Records the first-execution timestamp.
    pub fn save_first_time_execution(&self, timestamp: i64) {
        self.store
            .set_long(keys::FIRST_TIME_EXECUTION_TIMESTAMP, timestamp);
    }

    /// Returns whether the last daily-active-user event is at least 24 hours
    /// old (or was never sent).
    pub fn was_last_dau_sent_over_24h_ago(&self, now: i64) -> bool {
        let last = self.store.get_long(keys::LAST_DAU_EVENT_SENT_TIMESTAMP, -1);
        last == -1 || last + DAU_INTERVAL_MS < now
    }

    /// Records when the last daily-active-user event was sent.
    pub fn save_last_dau_event_sent(&self, timestamp: i64) {
        self.store
            .set_long(keys::LAST_DAU_EVENT_SENT_TIMESTAMP, timestamp);
    }

    /// Removes everything, including the cached config.
    pub fn clear(&self) {
        self.store.clear();
    }

    pub(crate) fn raw_store(&self) -> &dyn KeyValueStore {
        &*self.store
    }
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use crate::MemoryStore;

    use super::*;

    fn record() -> SessionRecord {
        SessionRecord {
            session_id: "b9aed800-5bd6-44e1-937a-d57fd158b4dd".to_owned(),
            sampling_rate: 10,
            tracking_enabled: true,
            created_at: 1_700_000_000_000,
            last_activity_time: 90_000,
            sampling_options: "{}".to_owned(),
        }
    }

    #[test]
    fn session_round_trip() {
        let storage = Storage::new(Arc::new(MemoryStore::new()), "TP1", "PRODUCTION");
        assert_eq!(storage.load_session(), None);

        storage.save_session(&record());
        assert_eq!(storage.load_session(), Some(record()));
    }

    #[test]
    fn tp_id_change_clears_everything() {
        let store = Arc::new(MemoryStore::new());

        let storage = Storage::new(store.clone(), "TP1", "PRODUCTION");
        storage.save_session(&record());
        storage.save_ingest_config("{\"sample_rate\": 4}", 1000);

        let storage = Storage::new(store, "TP2", "PRODUCTION");
        assert_eq!(storage.load_session(), None);
        assert_eq!(storage.load_ingest_config(), None);
    }

    #[test]
    fn environment_change_keeps_config_cache() {
        let store = Arc::new(MemoryStore::new());

        let storage = Storage::new(store.clone(), "TP1", "PRODUCTION");
        storage.save_session(&record());
        storage.save_ingest_config("{\"sample_rate\": 4}", 1000);

        let storage = Storage::new(store, "TP1", "STAGING");
        assert_eq!(storage.load_session(), None);
        assert_eq!(
            storage.load_ingest_config(),
            Some(CachedConfig {
                raw: "{\"sample_rate\": 4}".to_owned(),
                downloaded_at: 1000,
            })
        );
    }

    #[test]
    fn dau_interval() {
        let storage = Storage::new(Arc::new(MemoryStore::new()), "TP1", "PRODUCTION");
        let now = 1_700_000_000_000;

        assert!(storage.was_last_dau_sent_over_24h_ago(now));

        storage.save_last_dau_event_sent(now);
        assert!(!storage.was_last_dau_sent_over_24h_ago(now + DAU_INTERVAL_MS));
        assert!(storage.was_last_dau_sent_over_24h_ago(now + DAU_INTERVAL_MS + 1));
    }
}
