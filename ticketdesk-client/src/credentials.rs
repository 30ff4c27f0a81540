use std::{
    fs, io,
    path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::warn;

use crate::api::SessionRecord;

/// Defensive bound: the saved session file is expected to be tiny.
pub const MAX_SESSION_FILE_BYTES: u64 = 64 * 1024;

const SESSION_FILE: &str = "session.json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("metadata read failed: {0}")]
    Metadata(#[source] io::Error),
    #[error("session file too large: {size} bytes (max {max})")]
    TooLarge { size: u64, max: u64 },
    #[error("read failed: {0}")]
    Read(#[source] io::Error),
    #[error("parse failed: {0}")]
    Parse(#[source] serde_json::Error),
    #[error("serialize failed: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("tmp write failed: {0}")]
    WriteTmp(#[source] io::Error),
    #[error("rename failed: {0}")]
    Rename(#[source] io::Error),
    #[error("remove failed: {0}")]
    Remove(#[source] io::Error),
}

/// On-disk store for the authenticated session (token + user record),
/// read back at push-channel connect time and on app restart.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Store under the per-user config directory, e.g.
    /// `~/.config/TicketDesk/session.json`.
    pub fn default_location(app_dir_name: &str) -> Self {
        let base = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        let dir = base.join(app_dir_name);
        let _ = fs::create_dir_all(&dir);
        Self {
            path: dir.join(SESSION_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<SessionRecord, StoreError> {
        let meta = fs::metadata(&self.path).map_err(StoreError::Metadata)?;
        if meta.len() > MAX_SESSION_FILE_BYTES {
            return Err(StoreError::TooLarge {
                size: meta.len(),
                max: MAX_SESSION_FILE_BYTES,
            });
        }

        let data = fs::read_to_string(&self.path).map_err(StoreError::Read)?;
        serde_json::from_str(&data).map_err(StoreError::Parse)
    }

    /// `None` when nothing is stored or the stored record is unusable; a
    /// broken file is not worth failing login flows over.
    pub fn load_optional(&self) -> Option<SessionRecord> {
        match self.load() {
            Ok(record) => Some(record),
            Err(StoreError::Metadata(err)) if err.kind() == io::ErrorKind::NotFound => None,
            Err(err) => {
                warn!("ignoring stored session: {err}");
                None
            }
        }
    }

    pub fn save(&self, record: &SessionRecord) -> Result<(), StoreError> {
        let tmp = self.path.with_extension("json.tmp");
        let payload = serde_json::to_string_pretty(record).map_err(StoreError::Serialize)?;
        fs::write(&tmp, payload.as_bytes()).map_err(StoreError::WriteTmp)?;

        if self.path.exists() {
            let _ = fs::remove_file(&self.path);
        }

        fs::rename(&tmp, &self.path).map_err(StoreError::Rename)
    }

    /// Removes the stored session. Idempotent.
    pub fn clear(&self) -> Result<(), StoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StoreError::Remove(err)),
        }
    }
}
