use eyre::Context as _;
use rand::Rng as _;
use std::{
    fs::{self, OpenOptions},
    io::Write as _,
    path::{Path, PathBuf},
};

#[cfg(unix)]
use std::os::unix::fs::{OpenOptionsExt as _, PermissionsExt as _};

pub const MODE_DIR_PRIVATE: u32 = 0o700;
pub const MODE_FILE_PRIVATE: u32 = 0o600;

fn is_symlink(p: &Path) -> eyre::Result<bool> {
    match fs::symlink_metadata(p) {
        Ok(md) => Ok(md.file_type().is_symlink()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(eyre::Report::new(e).wrap_err(format!("stat {}", p.display()))),
    }
}

pub(crate) fn refuse_symlink(p: &Path) -> eyre::Result<()> {
    if is_symlink(p)? {
        eyre::bail!("refusing to follow symlink: {}", p.display());
    }
    Ok(())
}

/// Create `dir` if needed and clamp it to 0700 on Unix.
pub fn ensure_private_dir(dir: &Path) -> eyre::Result<()> {
    refuse_symlink(dir)?;
    if dir.exists() {
        if !dir.is_dir() {
            eyre::bail!("expected directory at {}", dir.display());
        }
    } else {
        fs::create_dir_all(dir).with_context(|| format!("create dir {}", dir.display()))?;
    }

    #[cfg(unix)]
    {
        let mode = fs::metadata(dir)
            .with_context(|| format!("stat {}", dir.display()))?
            .permissions()
            .mode();
        if (mode & 0o077) != 0 {
            fs::set_permissions(dir, fs::Permissions::from_mode(MODE_DIR_PRIVATE))
                .with_context(|| format!("chmod {MODE_DIR_PRIVATE:o} {}", dir.display()))?;
        }
    }

    Ok(())
}

fn sibling_tmp(path: &Path) -> eyre::Result<PathBuf> {
    let parent = path
        .parent()
        .ok_or_else(|| eyre::eyre!("missing parent for {}", path.display()))?;
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .ok_or_else(|| eyre::eyre!("invalid file name: {}", path.display()))?;
    let mut nonce = [0_u8; 8];
    rand::rng().fill_bytes(&mut nonce);
    Ok(parent.join(format!(".{name}.tmp.{}", hex::encode(nonce))))
}

/// Write-then-rename with a 0600 temp file. Readers see either the old or the new content.
pub fn write_private_atomic(path: &Path, bytes: &[u8]) -> eyre::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| eyre::eyre!("missing parent for {}", path.display()))?;
    ensure_private_dir(parent)?;
    refuse_symlink(path)?;

    let tmp = sibling_tmp(path)?;
    let mut opts = OpenOptions::new();
    opts.create_new(true).write(true);
    #[cfg(unix)]
    {
        opts.mode(MODE_FILE_PRIVATE);
    }
    let mut f = opts
        .open(&tmp)
        .with_context(|| format!("open temp {}", tmp.display()))?;

    let written = f
        .write_all(bytes)
        .and_then(|()| f.flush())
        .and_then(|()| f.sync_all());
    drop(f);
    if let Err(e) = written {
        drop(fs::remove_file(&tmp));
        return Err(eyre::Report::new(e).wrap_err(format!("write {}", tmp.display())));
    }

    // Windows refuses to rename over an existing file.
    #[cfg(windows)]
    {
        if path.exists() {
            fs::remove_file(path).with_context(|| format!("remove existing {}", path.display()))?;
        }
    }

    fs::rename(&tmp, path)
        .with_context(|| format!("rename {} -> {}", tmp.display(), path.display()))
}

/// `Ok(None)` when the file does not exist.
pub fn read_private(path: &Path) -> eyre::Result<Option<Vec<u8>>> {
    refuse_symlink(path)?;
    match fs::read(path) {
        Ok(b) => Ok(Some(b)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(eyre::Report::new(e).wrap_err(format!("read {}", path.display()))),
    }
}

/// Idempotent delete.
pub fn remove_if_exists(path: &Path) -> eyre::Result<()> {
    refuse_symlink(path)?;
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(eyre::Report::new(e).wrap_err(format!("remove {}", path.display()))),
    }
}
