//! Durable key-value storage for custody records and host preferences.
//!
//! Values are JSON text. Every operation is idempotent; I/O failures surface as
//! [`WalletError::Storage`](crate::errors::WalletError::Storage) and undecodable values as
//! [`WalletError::CorruptRecord`](crate::errors::WalletError::CorruptRecord).

mod file;
mod memory;

pub use file::FileKvStore;
pub use memory::MemoryKvStore;

use crate::errors::WalletError;
use eyre::Context as _;
use serde::{de::DeserializeOwned, Serialize};
use tracing::warn;

pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> eyre::Result<Option<String>>;

    /// Replaces any existing value atomically.
    fn put(&self, key: &str, value: &str) -> eyre::Result<()>;

    /// Deleting an absent key succeeds.
    fn delete(&self, key: &str) -> eyre::Result<()>;
}

impl<T: KvStore + ?Sized> KvStore for std::sync::Arc<T> {
    fn get(&self, key: &str) -> eyre::Result<Option<String>> {
        (**self).get(key)
    }

    fn put(&self, key: &str, value: &str) -> eyre::Result<()> {
        (**self).put(key, value)
    }

    fn delete(&self, key: &str) -> eyre::Result<()> {
        (**self).delete(key)
    }
}

/// Keys double as file names, so keep them to a conservative alphabet.
pub(crate) fn validate_key(key: &str) -> eyre::Result<()> {
    let ok = !key.is_empty()
        && key
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_');
    if !ok {
        eyre::bail!("invalid storage key: {key:?}");
    }
    Ok(())
}

pub fn get_json<T: DeserializeOwned>(store: &impl KvStore, key: &str) -> eyre::Result<Option<T>> {
    let Some(raw) = store.get(key)? else {
        return Ok(None);
    };
    match serde_json::from_str(&raw) {
        Ok(v) => Ok(Some(v)),
        Err(e) => {
            warn!(key, error = %e, "stored record does not decode");
            Err(WalletError::CorruptRecord(key.to_owned()).into())
        }
    }
}

pub fn put_json<T: Serialize>(store: &impl KvStore, key: &str, value: &T) -> eyre::Result<()> {
    let s = serde_json::to_string(value).with_context(|| format!("encode record {key}"))?;
    store.put(key, &s)
}
