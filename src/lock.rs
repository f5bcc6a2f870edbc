//! Lock file management for single-instance enforcement.
//!
//! Two daemons driving the same GPIO pins would fight over every relay, so
//! startup takes an exclusive `fs2` lock on `pirelay.lock` in the runtime
//! directory (`$XDG_RUNTIME_DIR`, falling back to `/tmp`). The file holds the
//! owner's PID; a lock left behind by a dead process is cleaned up.

use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::constants::LOCK_FILE_NAME;
use crate::logger::Logger;

/// A held instance lock. Released and removed on drop.
#[derive(Debug)]
pub struct LockFile {
    file: File,
    path: PathBuf,
}

impl LockFile {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Directory holding the lock file.
pub fn runtime_dir() -> PathBuf {
    std::env::var_os("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
}

/// Acquire an exclusive lock in `dir`.
///
/// Fails if another live process holds it.
pub fn acquire_lock(dir: &Path, log: &Logger) -> Result<LockFile> {
    let path = dir.join(LOCK_FILE_NAME);

    match try_lock(&path)? {
        Some(lock) => Ok(lock),
        None => {
            // handle_lock_conflict either clears a stale lock or fails
            handle_lock_conflict(&path, log)?;
            try_lock(&path)?.with_context(|| {
                format!("Failed to acquire lock {} after cleanup", path.display())
            })
        }
    }
}

fn try_lock(path: &Path) -> Result<Option<LockFile>> {
    // Open without truncating so a running owner's PID stays readable
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .with_context(|| format!("Failed to open lock file {}", path.display()))?;

    if file.try_lock_exclusive().is_err() {
        return Ok(None);
    }

    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    writeln!(&file, "{}", std::process::id())?;
    file.flush()?;

    Ok(Some(LockFile {
        file,
        path: path.to_path_buf(),
    }))
}

/// Remove a stale lock, or fail if its owner is still running.
fn handle_lock_conflict(path: &Path, log: &Logger) -> Result<()> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        // Lock file vanished, assume it was cleaned up
        Err(_) => return Ok(()),
    };

    let Ok(pid) = content.trim().parse::<u32>() else {
        log_warning!(log, "Lock file contains invalid PID, removing stale lock");
        let _ = std::fs::remove_file(path);
        return Ok(());
    };

    if !is_process_running(pid) {
        log_warning!(
            log,
            "Removing stale lock file (process {pid} no longer running)"
        );
        let _ = std::fs::remove_file(path);
        return Ok(());
    }

    anyhow::bail!("pirelay is already running (PID: {pid})")
}

fn is_process_running(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_is_exclusive_and_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let log = Logger::disabled();

        let lock = acquire_lock(dir.path(), &log).unwrap();
        let content = std::fs::read_to_string(lock.path()).unwrap();
        assert_eq!(content.trim(), std::process::id().to_string());

        let err = acquire_lock(dir.path(), &log).unwrap_err();
        assert!(err.to_string().contains("already running"));

        drop(lock);
        assert!(!dir.path().join(LOCK_FILE_NAME).exists());
        assert!(acquire_lock(dir.path(), &log).is_ok());
    }

    #[test]
    fn test_garbage_lock_file_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(LOCK_FILE_NAME), "not a pid").unwrap();

        let lock = acquire_lock(dir.path(), &Logger::disabled()).unwrap();
        let content = std::fs::read_to_string(lock.path()).unwrap();
        assert_eq!(content.trim(), std::process::id().to_string());
    }
}
