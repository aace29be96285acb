use super::{validate_key, KvStore};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

/// Process-local store for tests and ephemeral hosts. Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryKvStore {
    inner: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_map<T>(&self, f: impl FnOnce(&mut HashMap<String, String>) -> T) -> eyre::Result<T> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|e| eyre::eyre!("mutex poisoned: {e}"))?;
        Ok(f(&mut guard))
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &str) -> eyre::Result<Option<String>> {
        validate_key(key)?;
        self.with_map(|m| m.get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> eyre::Result<()> {
        validate_key(key)?;
        self.with_map(|m| {
            m.insert(key.to_owned(), value.to_owned());
        })
    }

    fn delete(&self, key: &str) -> eyre::Result<()> {
        validate_key(key)?;
        self.with_map(|m| {
            m.remove(key);
        })
    }
}
