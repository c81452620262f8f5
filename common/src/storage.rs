use std::collections::HashMap;

use serde::{de::DeserializeOwned, Serialize};
use tracing::warn;

use crate::error::StoreError;

/// Persistent key/value records, one JSON document per key.
pub trait Storage {
    fn save(&mut self, key: &str, value: &str) -> Result<(), StoreError>;

    /// `Ok(None)` when nothing has been stored under `key` yet.
    fn load(&self, key: &str) -> Result<Option<String>, StoreError>;
}

pub fn save_json<T: Serialize + ?Sized>(
    storage: &mut dyn Storage,
    key: &str,
    value: &T,
) -> Result<(), StoreError> {
    let payload = serde_json::to_string(value)?;
    storage.save(key, &payload)
}

/// Loads `key`, falling back to `default` when the record is missing or
/// unreadable.
pub fn load_or<T: DeserializeOwned>(storage: &dyn Storage, key: &str, default: T) -> T {
    match storage.load(key) {
        Ok(Some(raw)) => match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(err) => {
                warn!("stored {key} is corrupt, using default: {err}");
                default
            }
        },
        Ok(None) => default,
        Err(err) => {
            warn!("failed to load {key} from store, using default: {err}");
            default
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    records: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.records.get(key).map(String::as_str)
    }
}

impl Storage for MemoryStore {
    fn save(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.records.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.records.get(key).cloned())
    }
}
