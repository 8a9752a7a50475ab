//! Persisted pairing credential.
//!
//! The store directory is owned by exactly one adapter at a time. Ownership
//! is an exclusive `flock` on `session.lock`, so the kernel releases it when
//! the owning process dies and a restarted worker can take over without
//! manual cleanup.

use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ChannelError;

const LOCK_FILE: &str = "session.lock";
const CREDENTIAL_FILE: &str = "credential.json";

/// What the session needs to resume without pairing again.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredential {
    pub identity: String,
    pub secret: String,
    pub paired_at: DateTime<Utc>,
}

impl core::fmt::Debug for StoredCredential {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StoredCredential")
            .field("identity", &self.identity)
            .field("secret", &"<redacted>")
            .field("paired_at", &self.paired_at)
            .finish()
    }
}

/// Exclusively-owned credential directory.
#[derive(Debug)]
pub struct CredentialStore {
    dir: PathBuf,
    // Held for the lifetime of the store; closing it releases the lock.
    _lock: File,
}

impl CredentialStore {
    /// Open `dir`, creating it if needed, and take the ownership lock.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, ChannelError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| io_error(&dir, e))?;

        let lock_path = dir.join(LOCK_FILE);
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&lock_path)
            .map_err(|e| io_error(&lock_path, e))?;
        lock_exclusive(&lock, &lock_path)?;

        debug!(dir = %dir.display(), "credential store locked");
        Ok(Self { dir, _lock: lock })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn load(&self) -> Result<Option<StoredCredential>, ChannelError> {
        let path = self.credential_path();
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(&path, e)),
        };
        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|e| ChannelError::CredentialStore(format!("{}: {e}", path.display())))
    }

    /// Persist `credential`, replacing any previous one atomically.
    pub fn save(&self, credential: &StoredCredential) -> Result<(), ChannelError> {
        let path = self.credential_path();
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(credential)
            .map_err(|e| ChannelError::CredentialStore(e.to_string()))?;
        fs::write(&tmp, body).map_err(|e| io_error(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| io_error(&path, e))
    }

    pub fn clear(&self) -> Result<(), ChannelError> {
        let path = self.credential_path();
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&path, e)),
        }
    }

    fn credential_path(&self) -> PathBuf {
        self.dir.join(CREDENTIAL_FILE)
    }
}

#[cfg(unix)]
fn lock_exclusive(file: &File, path: &Path) -> Result<(), ChannelError> {
    use std::os::unix::io::AsRawFd;

    // SAFETY: the descriptor is owned by `file`, which outlives this call.
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    if err.kind() == ErrorKind::WouldBlock {
        Err(ChannelError::CredentialStoreLocked(path.to_path_buf()))
    } else {
        Err(io_error(path, err))
    }
}

#[cfg(not(unix))]
fn lock_exclusive(_file: &File, _path: &Path) -> Result<(), ChannelError> {
    // Advisory locking is only enforced on unix targets.
    Ok(())
}

fn io_error(path: &Path, err: std::io::Error) -> ChannelError {
    ChannelError::CredentialStore(format!("{}: {err}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "billnotify-cred-{tag}-{}-{}",
            std::process::id(),
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ))
    }

    fn credential() -> StoredCredential {
        StoredCredential {
            identity: "5215500000000".to_string(),
            secret: "opaque".to_string(),
            paired_at: Utc::now(),
        }
    }

    #[test]
    fn save_load_and_clear() {
        let dir = scratch_dir("roundtrip");
        let store = CredentialStore::open(&dir).unwrap();
        assert_eq!(store.load().unwrap(), None);

        let cred = credential();
        store.save(&cred).unwrap();
        assert_eq!(store.load().unwrap(), Some(cred));

        store.clear().unwrap();
        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
        let _ = fs::remove_dir_all(dir);
    }

    #[cfg(unix)]
    #[test]
    fn second_owner_is_refused_until_first_drops() {
        let dir = scratch_dir("lock");
        let first = CredentialStore::open(&dir).unwrap();
        let err = CredentialStore::open(&dir).unwrap_err();
        assert!(matches!(err, ChannelError::CredentialStoreLocked(_)));

        drop(first);
        assert!(CredentialStore::open(&dir).is_ok());
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn debug_redacts_secret() {
        let s = format!("{:?}", credential());
        assert!(!s.contains("opaque"));
    }
}
