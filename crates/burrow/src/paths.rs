use crate::{errors::WalletError, fsutil};
use directories::ProjectDirs;
use eyre::{Context as _, ContextCompat as _};
use fs2::FileExt as _;
use std::{
    fs::{File, OpenOptions},
    path::PathBuf,
};

#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt as _;

#[derive(Debug, Clone)]
pub struct BurrowPaths {
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
    pub log_file: PathBuf,
}

impl BurrowPaths {
    pub fn discover() -> eyre::Result<Self> {
        // Test/CI override knobs.
        if let (Ok(data_dir), Ok(config_dir)) = (
            std::env::var("BURROW_DATA_DIR"),
            std::env::var("BURROW_CONFIG_DIR"),
        ) {
            return Ok(Self::at(PathBuf::from(config_dir), PathBuf::from(data_dir)));
        }

        let proj = ProjectDirs::from("", "", "burrow").context("failed to resolve project dirs")?;
        Ok(Self::at(
            proj.config_dir().to_path_buf(),
            proj.data_dir().to_path_buf(),
        ))
    }

    pub fn at(config_dir: PathBuf, data_dir: PathBuf) -> Self {
        let log_file = data_dir.join("burrow.log.jsonl");
        Self {
            config_dir,
            data_dir,
            log_file,
        }
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }

    /// One JSON file per durable record.
    pub fn kv_dir(&self) -> PathBuf {
        self.data_dir.join("kv")
    }

    pub fn custody_lock_file(&self) -> PathBuf {
        self.data_dir.join("custody.lock")
    }

    pub fn ensure_private_dirs(&self) -> eyre::Result<()> {
        fsutil::ensure_private_dir(&self.config_dir)?;
        fsutil::ensure_private_dir(&self.data_dir)?;
        Ok(())
    }

    /// Exclusive advisory lock serializing custody changes across processes. Never blocks:
    /// a held lock is `CustodyOperationInProgress`.
    pub fn lock_custody(&self) -> eyre::Result<CustodyLock> {
        self.ensure_private_dirs()?;
        let p = self.custody_lock_file();
        fsutil::refuse_symlink(&p)?;
        let mut oo = OpenOptions::new();
        oo.create(true).read(true).write(true).truncate(false);
        #[cfg(unix)]
        {
            oo.mode(fsutil::MODE_FILE_PRIVATE);
        }
        let file = oo
            .open(&p)
            .with_context(|| format!("open {}", p.display()))?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(CustodyLock { file }),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                Err(WalletError::CustodyOperationInProgress.into())
            }
            Err(e) => Err(eyre::Report::new(e).wrap_err("lock exclusive")),
        }
    }
}

/// Released on drop.
#[derive(Debug)]
pub struct CustodyLock {
    file: File,
}

impl Drop for CustodyLock {
    fn drop(&mut self) {
        fs2::FileExt::unlock(&self.file).ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_lock_reports_busy() -> eyre::Result<()> {
        let td = tempfile::tempdir()?;
        let paths = BurrowPaths::at(td.path().join("cfg"), td.path().join("data"));

        let held = paths.lock_custody()?;
        let busy = paths.lock_custody().err();
        assert_eq!(
            busy.as_ref().and_then(|e| e.downcast_ref::<WalletError>()),
            Some(&WalletError::CustodyOperationInProgress)
        );
        drop(held);
        paths.lock_custody()?;
        Ok(())
    }

    #[test]
    fn layout_is_under_the_data_dir() {
        let paths = BurrowPaths::at(PathBuf::from("/c"), PathBuf::from("/d"));
        assert_eq!(paths.log_file, PathBuf::from("/d/burrow.log.jsonl"));
        assert_eq!(paths.kv_dir(), PathBuf::from("/d/kv"));
        assert_eq!(paths.config_file(), PathBuf::from("/c/config.toml"));
    }
}
