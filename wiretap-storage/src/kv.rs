use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::StorageError;

/// A scalar value held by a [`KeyValueStore`].
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Value {
    /// A string value.
    String(String),
    /// An integer value.
    Long(i64),
    /// A floating point value.
    Float(f64),
    /// A boolean value.
    Bool(bool),
}

/// Typed persistent scalar storage.
///
/// Backends are free to persist however they like; writes must be visible to
/// subsequent reads on the same store instance. All methods take `&self` so
/// a store can be shared behind an `Arc`.
pub trait KeyValueStore: Send + Sync {
    /// Returns the raw value for a key, if present.
    fn get(&self, key: &str) -> Option<Value>;

    /// Sets the raw value for a key.
    fn set(&self, key: &str, value: Value);

    /// Removes a key.
    fn remove(&self, key: &str);

    /// Removes all keys.
    fn clear(&self);

    /// Returns whether a key is present.
    fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Returns the string value for a key, or the default.
    fn get_string(&self, key: &str, default: &str) -> String {
        match self.get(key) {
            Some(Value::String(s)) => s,
            _ => default.to_owned(),
        }
    }

    /// Returns the integer value for a key, or the default.
    fn get_long(&self, key: &str, default: i64) -> i64 {
        match self.get(key) {
            Some(Value::Long(v)) => v,
            _ => default,
        }
    }

    /// Returns the float value for a key, or the default.
    fn get_float(&self, key: &str, default: f64) -> f64 {
        match self.get(key) {
            Some(Value::Float(v)) => v,
            Some(Value::Long(v)) => v as f64,
            _ => default,
        }
    }

    /// Returns the boolean value for a key, or the default.
    fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            Some(Value::Bool(v)) => v,
            _ => default,
        }
    }

    /// Sets a string value.
    fn set_string(&self, key: &str, value: &str) {
        self.set(key, Value::String(value.to_owned()));
    }

    /// Sets an integer value.
    fn set_long(&self, key: &str, value: i64) {
        self.set(key, Value::Long(value));
    }

    /// Sets a float value.
    fn set_float(&self, key: &str, value: f64) {
        self.set(key, Value::Float(value));
    }

    /// Sets a boolean value.
    fn set_bool(&self, key: &str, value: bool) {
        self.set(key, Value::Bool(value));
    }
}

/// An in-memory [`KeyValueStore`].
///
/// Used in tests and by embedders that persist elsewhere.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<BTreeMap<String, Value>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn values(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Value>> {
        self.values.lock().unwrap_or_else(|poison| poison.into_inner())
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.values().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) {
        self.values().insert(key.to_owned(), value);
    }

    fn remove(&self, key: &str) {
        self.values().remove(key);
    }

    fn clear(&self) {
        self.values().clear();
    }
}

/// A [`KeyValueStore`] persisting to a single JSON document on disk.
///
/// The whole document is rewritten on every mutation. The stored state is a
/// handful of scalars, so simplicity wins over write batching here.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, Value>>,
}

impl JsonFileStore {
    /// Opens or creates the store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();

        let values = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    fn flush(&self, values: &BTreeMap<String, Value>) {
        let result = serde_json::to_string(values)
            .map_err(StorageError::from)
            .and_then(|raw| std::fs::write(&self.path, raw).map_err(StorageError::from));

        if let Err(error) = result {
            wiretap_log::warn!(
                error = &error as &dyn std::error::Error,
                "failed to persist key-value store"
            );
        }
    }

    fn values(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Value>> {
        self.values.lock().unwrap_or_else(|poison| poison.into_inner())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.values().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) {
        let mut values = self.values();
        values.insert(key.to_owned(), value);
        self.flush(&values);
    }

    fn remove(&self, key: &str) {
        let mut values = self.values();
        values.remove(key);
        self.flush(&values);
    }

    fn clear(&self) {
        let mut values = self.values();
        values.clear();
        self.flush(&values);
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn memory_store_typed_accessors() {
        let store = MemoryStore::new();

        store.set_string("s", "hello");
        store.set_long("l", 42);
        store.set_float("f", 0.5);
        store.set_bool("b", true);

        assert_eq!(store.get_string("s", ""), "hello");
        assert_eq!(store.get_long("l", -1), 42);
        assert_eq!(store.get_float("f", 0.0), 0.5);
        assert!(store.get_bool("b", false));

        // Type mismatches fall back to the default.
        assert_eq!(store.get_long("s", -1), -1);

        assert!(store.contains("s"));
        store.remove("s");
        assert!(!store.contains("s"));

        store.clear();
        assert_eq!(store.get_long("l", -1), -1);
    }

    #[test]
    fn json_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        {
            let store = JsonFileStore::open(&path).unwrap();
            store.set_string("session_id", "abc");
            store.set_long("session_started_at", 123_456);
        }

        let store = JsonFileStore::open(&path).unwrap();
        assert_eq!(store.get_string("session_id", ""), "abc");
        assert_eq!(store.get_long("session_started_at", -1), 123_456);
    }
}
