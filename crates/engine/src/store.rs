//! Durable session records.
//!
//! One record per session, keyed by session id. A write either fully replaces
//! the previous record or leaves it untouched.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use dropwell_core::{ErrorKind, Session};
use dropwell_settings::{is_temp_file, write_atomic};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

const RECORD_EXT: &str = "json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session {0} not found")]
    NotFound(String),
    #[error("session {id} is corrupt: {detail}")]
    Corrupt { id: String, detail: String },
    #[error("session {0} already exists")]
    AlreadyExists(String),
    #[error("invalid session id {0:?}")]
    InvalidId(String),
    #[error("failed to serialize session {id}: {detail}")]
    Serialize { id: String, detail: String },
    #[error("session store io error: {0}")]
    Io(#[from] io::Error),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) | Self::Corrupt { .. } => ErrorKind::CorruptState,
            Self::AlreadyExists(_) | Self::InvalidId(_) | Self::Serialize { .. } => {
                ErrorKind::Validation
            }
            Self::Io(_) => ErrorKind::TransientInfrastructure,
        }
    }
}

/// Session ids become file names, so they are restricted to a safe alphabet.
pub fn validate_id(id: &str) -> Result<(), StoreError> {
    let ok = !id.is_empty()
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if ok {
        Ok(())
    } else {
        Err(StoreError::InvalidId(id.to_string()))
    }
}

fn encode(session: &Session) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec_pretty(session).map_err(|e| StoreError::Serialize {
        id: session.session_id.clone(),
        detail: e.to_string(),
    })
}

fn decode(id: &str, bytes: &[u8]) -> Result<Session, StoreError> {
    let session: Session = serde_json::from_slice(bytes).map_err(|e| StoreError::Corrupt {
        id: id.to_string(),
        detail: e.to_string(),
    })?;
    if session.session_id != id {
        return Err(StoreError::Corrupt {
            id: id.to_string(),
            detail: format!("record holds session {}", session.session_id),
        });
    }
    Ok(session)
}

pub trait SessionStore: Send + Sync {
    /// Replace the record for `session.session_id`.
    fn save(&self, session: &Session) -> Result<(), StoreError>;

    fn load(&self, id: &str) -> Result<Session, StoreError>;

    /// Every stored session id, sorted.
    fn list_ids(&self) -> Result<Vec<String>, StoreError>;

    /// A corrupt record still counts as existing.
    fn exists(&self, id: &str) -> Result<bool, StoreError> {
        match self.load(id) {
            Ok(_) | Err(StoreError::Corrupt { .. }) => Ok(true),
            Err(StoreError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Every readable session. Corrupt records are logged and skipped.
    fn list_all(&self) -> Result<Vec<Session>, StoreError> {
        let mut sessions = Vec::new();
        for id in self.list_ids()? {
            match self.load(&id) {
                Ok(session) => sessions.push(session),
                Err(StoreError::Corrupt { id, detail }) => {
                    warn!(session = %id, %detail, "skipping corrupt session record");
                }
                Err(StoreError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(sessions)
    }
}

/// One pretty-printed JSON file per session under a directory.
pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    /// Open (and create if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        debug!(dir = %dir.display(), "opened session store");
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn record_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", id, RECORD_EXT))
    }
}

impl SessionStore for FileSessionStore {
    fn save(&self, session: &Session) -> Result<(), StoreError> {
        validate_id(&session.session_id)?;
        let bytes = encode(session)?;
        write_atomic(&self.record_path(&session.session_id), &bytes)?;
        debug!(session = %session.session_id, stage = %session.stage, "session saved");
        Ok(())
    }

    fn load(&self, id: &str) -> Result<Session, StoreError> {
        validate_id(id)?;
        match fs::read(self.record_path(id)) {
            Ok(bytes) => decode(id, &bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StoreError::NotFound(id.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    fn list_ids(&self) -> Result<Vec<String>, StoreError> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_temp_file(&name) {
                continue;
            }
            if let Some(id) = name.strip_suffix(&format!(".{}", RECORD_EXT)) {
                if validate_id(id).is_ok() {
                    ids.push(id.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

/// In-memory store holding encoded records, so corrupt bytes can be planted.
#[derive(Default)]
pub struct MemorySessionStore {
    records: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store raw bytes under `id`, bypassing encoding.
    pub fn insert_raw(&self, id: &str, bytes: impl Into<Vec<u8>>) {
        self.records.lock().insert(id.to_string(), bytes.into());
    }

    pub fn raw(&self, id: &str) -> Option<Vec<u8>> {
        self.records.lock().get(id).cloned()
    }
}

impl SessionStore for MemorySessionStore {
    fn save(&self, session: &Session) -> Result<(), StoreError> {
        validate_id(&session.session_id)?;
        let bytes = encode(session)?;
        self.records.lock().insert(session.session_id.clone(), bytes);
        Ok(())
    }

    fn load(&self, id: &str) -> Result<Session, StoreError> {
        validate_id(id)?;
        let bytes = self
            .records
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        decode(id, &bytes)
    }

    fn list_ids(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.records.lock().keys().cloned().collect())
    }
}
