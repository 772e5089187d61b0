use dashmap::DashMap;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone)]
pub struct StringValue {
    pub value: Vec<u8>,
    pub expire_at_ms: Option<u64>,
}

impl StringValue {
    pub fn is_expired(&self, now_ms: u64) -> bool {
        matches!(self.expire_at_ms, Some(at) if now_ms >= at)
    }
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as u64
}

/// String key/value store with lazy TTL expiration: an expired key is
/// only removed when it is next looked up, not on a background sweep.
#[derive(Default)]
pub struct StringStore {
    data: DashMap<Vec<u8>, StringValue>,
}

impl StringStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: Vec<u8>, value: Vec<u8>, expire_at_ms: Option<u64>) {
        self.data.insert(key, StringValue { value, expire_at_ms });
    }

    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        let now = now_ms();
        if let Some(entry) = self.data.get(key) {
            if entry.is_expired(now) {
                drop(entry);
                self.data.remove(key);
                return None;
            }
            return Some(entry.value.clone());
        }
        None
    }

    pub fn contains_live(&self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }

    pub fn incr(&self, key: &[u8]) -> Result<i64, crate::error::CommandError> {
        let now = now_ms();
        if let Some(entry) = self.data.get(key) {
            if entry.is_expired(now) {
                drop(entry);
                self.data.remove(key);
            }
        }
        let mut entry = self
            .data
            .entry(key.to_vec())
            .or_insert_with(|| StringValue {
                value: b"0".to_vec(),
                expire_at_ms: None,
            });
        let current: i64 = std::str::from_utf8(&entry.value)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or(crate::error::CommandError::NotAnInteger)?;
        let next = current
            .checked_add(1)
            .ok_or(crate::error::CommandError::NotAnInteger)?;
        entry.value = next.to_string().into_bytes();
        Ok(next)
    }

    pub fn keys(&self) -> Vec<Vec<u8>> {
        let now = now_ms();
        self.data
            .iter()
            .filter(|e| !e.is_expired(now))
            .map(|e| e.key().clone())
            .collect()
    }

    pub fn load_from_rdb(&self, entries: Vec<crate::rdb::RdbEntry>) {
        for entry in entries {
            self.data.insert(
                entry.key,
                StringValue {
                    value: entry.value,
                    expire_at_ms: entry.expire_at_ms,
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get_roundtrip() {
        let store = StringStore::new();
        store.set(b"k".to_vec(), b"v".to_vec(), None);
        assert_eq!(store.get(b"k"), Some(b"v".to_vec()));
    }

    #[test]
    fn expired_key_reads_as_absent_and_is_removed() {
        let store = StringStore::new();
        store.set(b"k".to_vec(), b"v".to_vec(), Some(0));
        assert_eq!(store.get(b"k"), None);
        assert!(store.keys().is_empty());
    }

    #[test]
    fn incr_creates_and_increments() {
        let store = StringStore::new();
        assert_eq!(store.incr(b"counter").unwrap(), 1);
        assert_eq!(store.incr(b"counter").unwrap(), 2);
    }

    #[test]
    fn incr_on_non_integer_errors() {
        let store = StringStore::new();
        store.set(b"k".to_vec(), b"notanumber".to_vec(), None);
        assert!(store.incr(b"k").is_err());
    }
}
