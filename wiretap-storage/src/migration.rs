use crate::storage::keys;
use crate::{KeyValueStore, Storage};

/// Migrates long-lived counters from a legacy store.
///
/// Only `first_time_executed_at` and `last_dau_event_sent_at` carry over, and
/// only when the legacy store belongs to the same tp id and environment and
/// the current store has never run before. Anything else the legacy store
/// holds is stale by definition. The legacy store is cleared unconditionally
/// so the migration runs at most once.
pub fn migrate_legacy_store(legacy: &dyn KeyValueStore, storage: &Storage, tp_id: &str, environment: &str) {
    let legacy_tp_id = legacy.get_string(keys::TP_ID, "");
    let legacy_environment = legacy.get_string(keys::ENVIRONMENT, "");

    if legacy_tp_id == tp_id && legacy_environment == environment && storage.is_first_time_execution() {
        let store = storage.raw_store();

        if let Some(value) = legacy.get(keys::FIRST_TIME_EXECUTION_TIMESTAMP) {
            store.set(keys::FIRST_TIME_EXECUTION_TIMESTAMP, value);
        }

        if let Some(value) = legacy.get(keys::LAST_DAU_EVENT_SENT_TIMESTAMP) {
            store.set(keys::LAST_DAU_EVENT_SENT_TIMESTAMP, value);
        }
    }

    legacy.clear();
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use similar_asserts::assert_eq;

    use crate::MemoryStore;

    use super::*;

    fn legacy_store(tp_id: &str, environment: &str) -> MemoryStore {
        let legacy = MemoryStore::new();
        legacy.set_string(keys::TP_ID, tp_id);
        legacy.set_string(keys::ENVIRONMENT, environment);
        legacy.set_long(keys::FIRST_TIME_EXECUTION_TIMESTAMP, 1234);
        legacy.set_long(keys::LAST_DAU_EVENT_SENT_TIMESTAMP, 5678);
        legacy
    }

    #[test]
    fn migrates_on_matching_identity() {
        let legacy = legacy_store("TP1", "PRODUCTION");
        let store = Arc::new(MemoryStore::new());
        let storage = Storage::new(store.clone(), "TP1", "PRODUCTION");

        migrate_legacy_store(&legacy, &storage, "TP1", "PRODUCTION");

        assert!(!storage.is_first_time_execution());
        assert_eq!(store.get_long(keys::FIRST_TIME_EXECUTION_TIMESTAMP, -1), 1234);
        assert_eq!(store.get_long(keys::LAST_DAU_EVENT_SENT_TIMESTAMP, -1), 5678);
        assert!(!legacy.contains(keys::TP_ID));
    }

    #[test]
    fn skips_on_identity_mismatch() {
        let legacy = legacy_store("TP1", "STAGING");
        let storage = Storage::new(Arc::new(MemoryStore::new()), "TP1", "PRODUCTION");

        migrate_legacy_store(&legacy, &storage, "TP1", "PRODUCTION");

        assert!(storage.is_first_time_execution());
        assert!(!legacy.contains(keys::TP_ID));
    }

    #[test]
    fn skips_when_not_first_run() {
        let legacy = legacy_store("TP1", "PRODUCTION");
        let storage = Storage::new(Arc::new(MemoryStore::new()), "TP1", "PRODUCTION");
        storage.save_first_time_execution(9999);

        migrate_legacy_store(&legacy, &storage, "TP1", "PRODUCTION");

        let store = storage.raw_store();
        assert_eq!(store.get_long(keys::FIRST_TIME_EXECUTION_TIMESTAMP, -1), 9999);
        assert_eq!(store.get_long(keys::LAST_DAU_EVENT_SENT_TIMESTAMP, -1), -1);
    }
}
