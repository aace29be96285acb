use super::{validate_key, KvStore};
use crate::{errors::WalletError, fsutil};
use std::path::{Path, PathBuf};

/// One private JSON file per key under a single directory.
#[derive(Debug, Clone)]
pub struct FileKvStore {
    dir: PathBuf,
}

impl FileKvStore {
    pub fn open(dir: impl Into<PathBuf>) -> eyre::Result<Self> {
        let dir = dir.into();
        fsutil::ensure_private_dir(&dir).map_err(|e| WalletError::storage(&e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> eyre::Result<PathBuf> {
        validate_key(key)?;
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl KvStore for FileKvStore {
    fn get(&self, key: &str) -> eyre::Result<Option<String>> {
        let p = self.path_for(key)?;
        let Some(bytes) = fsutil::read_private(&p).map_err(|e| WalletError::storage(&e))? else {
            return Ok(None);
        };
        let s =
            String::from_utf8(bytes).map_err(|_e| WalletError::CorruptRecord(key.to_owned()))?;
        Ok(Some(s))
    }

    fn put(&self, key: &str, value: &str) -> eyre::Result<()> {
        let p = self.path_for(key)?;
        fsutil::write_private_atomic(&p, value.as_bytes()).map_err(|e| WalletError::storage(&e))
    }

    fn delete(&self, key: &str) -> eyre::Result<()> {
        let p = self.path_for(key)?;
        fsutil::remove_if_exists(&p).map_err(|e| WalletError::storage(&e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_delete_survive_reopen() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = FileKvStore::open(dir.path().join("kv"))?;
        assert_eq!(store.get("wallet_v1")?, None);

        store.put("wallet_v1", r#"{"version":1}"#)?;
        let reopened = FileKvStore::open(store.dir())?;
        assert_eq!(
            reopened.get("wallet_v1")?.as_deref(),
            Some(r#"{"version":1}"#)
        );

        reopened.delete("wallet_v1")?;
        reopened.delete("wallet_v1")?;
        assert_eq!(store.get("wallet_v1")?, None);
        Ok(())
    }

    #[test]
    fn non_utf8_file_is_a_corrupt_record() -> eyre::Result<()> {
        use eyre::ContextCompat as _;
        let dir = tempfile::tempdir()?;
        let store = FileKvStore::open(dir.path())?;
        fsutil::write_private_atomic(&dir.path().join("wallet_v1.json"), &[0xff, 0xfe, 0x7b])?;
        let err = store.get("wallet_v1").err().context("must fail")?;
        assert_eq!(
            err.downcast_ref::<WalletError>(),
            Some(&WalletError::CorruptRecord("wallet_v1".to_owned()))
        );
        Ok(())
    }

    #[test]
    fn rejects_path_like_keys() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = FileKvStore::open(dir.path())?;
        assert!(store.put("../escape", "x").is_err());
        Ok(())
    }
}
