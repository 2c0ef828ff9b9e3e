//! Pluggable session storage
//!
//! The store persists session snapshots through a [`SessionStorage`]
//! backend. Two are provided:
//!
//! - [`FileSessionStorage`]: one pretty-printed JSON document per session,
//!   `session_<id>.json`, published atomically
//! - [`InMemorySessionStorage`]: map-backed, for tests and embedding
//!
//! # Example
//!
//! ```rust
//! use ctxhost_core::session::{FileSessionStorage, SessionStorage};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let storage = FileSessionStorage::new(dir.path()).unwrap();
//! assert!(storage.scan().unwrap().is_empty());
//! ```

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use super::SessionRecord;
use crate::error::{CoreError, CoreResult};

const FILE_PREFIX: &str = "session_";
const FILE_SUFFIX: &str = ".json";

/// A persisted record and where it lives
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSession {
    pub record: SessionRecord,
    pub location: String,
}

/// Storage backend for session records
///
/// All methods block; the store calls them from `spawn_blocking`.
pub trait SessionStorage: Send + Sync {
    /// Publish a record, replacing any previous one with the same id.
    /// Readers must never observe a partially written record.
    fn write(&self, record: &SessionRecord) -> CoreResult<String>;

    /// Read one record; `Ok(None)` if none exists
    fn read(&self, session_id: &str) -> CoreResult<Option<StoredSession>>;

    /// All readable records; unreadable entries are skipped
    fn scan(&self) -> CoreResult<Vec<StoredSession>>;

    /// Backend name (for logging)
    fn name(&self) -> &'static str;
}

/// Reject ids that cannot be used as a file name component
fn check_session_id(session_id: &str) -> CoreResult<()> {
    let invalid = session_id.is_empty()
        || session_id.contains(['/', '\\'])
        || session_id.contains("..");

    if invalid {
        return Err(CoreError::persistence(
            session_id,
            "session id is not usable as a record name",
        ));
    }
    Ok(())
}

fn decode(session_id: &str, text: &str) -> CoreResult<SessionRecord> {
    let record: SessionRecord = serde_json::from_str(text)
        .map_err(|e| CoreError::persistence(session_id, format!("corrupt record: {}", e)))?;

    if record.session_id != session_id {
        return Err(CoreError::persistence(
            session_id,
            format!("record belongs to session '{}'", record.session_id),
        ));
    }
    Ok(record)
}

/// File-based storage (one JSON document per session)
#[derive(Debug)]
pub struct FileSessionStorage {
    directory: PathBuf,
}

impl FileSessionStorage {
    /// Open (and create if needed) a storage directory
    pub fn new<P: Into<PathBuf>>(directory: P) -> CoreResult<Self> {
        let directory = directory.into();
        std::fs::create_dir_all(&directory).map_err(|e| {
            CoreError::persistence(
                directory.display().to_string(),
                format!("failed to create storage directory: {}", e),
            )
        })?;
        Ok(Self { directory })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn session_file(&self, session_id: &str) -> PathBuf {
        self.directory
            .join(format!("{}{}{}", FILE_PREFIX, session_id, FILE_SUFFIX))
    }

    fn read_path(&self, path: &Path) -> Option<StoredSession> {
        let file_name = path.file_name()?.to_str()?;
        let session_id = file_name
            .strip_prefix(FILE_PREFIX)?
            .strip_suffix(FILE_SUFFIX)?;

        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("Skipping unreadable session file {}: {}", path.display(), e);
                return None;
            }
        };

        match decode(session_id, &text) {
            Ok(record) => Some(StoredSession {
                record,
                location: path.display().to_string(),
            }),
            Err(e) => {
                tracing::warn!("Skipping session file {}: {}", path.display(), e);
                None
            }
        }
    }
}

impl SessionStorage for FileSessionStorage {
    fn write(&self, record: &SessionRecord) -> CoreResult<String> {
        let session_id = record.session_id.as_str();
        check_session_id(session_id)?;

        let body = serde_json::to_vec_pretty(record)
            .map_err(|e| CoreError::persistence(session_id, e))?;

        // Temp files never match the session_*.json pattern, so a concurrent
        // scan cannot pick one up.
        let mut temp = tempfile::Builder::new()
            .prefix(".pending-")
            .suffix(".tmp")
            .tempfile_in(&self.directory)
            .map_err(|e| CoreError::persistence(session_id, e))?;

        temp.write_all(&body)
            .and_then(|()| temp.as_file().sync_all())
            .map_err(|e| CoreError::persistence(session_id, e))?;

        let path = self.session_file(session_id);
        temp.persist(&path)
            .map_err(|e| CoreError::persistence(session_id, e.error))?;

        Ok(path.display().to_string())
    }

    fn read(&self, session_id: &str) -> CoreResult<Option<StoredSession>> {
        check_session_id(session_id)?;

        let path = self.session_file(session_id);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CoreError::persistence(session_id, e)),
        };

        Ok(Some(StoredSession {
            record: decode(session_id, &text)?,
            location: path.display().to_string(),
        }))
    }

    fn scan(&self) -> CoreResult<Vec<StoredSession>> {
        let entries = std::fs::read_dir(&self.directory).map_err(|e| {
            CoreError::persistence(self.directory.display().to_string(), e)
        })?;

        Ok(entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .filter_map(|path| self.read_path(&path))
            .collect())
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

/// In-memory storage backend
///
/// Records are kept serialized so loads exercise the same decoding path as
/// the file backend.
#[derive(Debug, Default)]
pub struct InMemorySessionStorage {
    records: RwLock<HashMap<String, String>>,
}

impl InMemorySessionStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store raw text under a session id, bypassing serialization
    pub fn insert_raw(&self, session_id: impl Into<String>, text: impl Into<String>) {
        self.records.write().insert(session_id.into(), text.into());
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    fn location(session_id: &str) -> String {
        format!("memory://{}{}", FILE_PREFIX, session_id)
    }
}

impl SessionStorage for InMemorySessionStorage {
    fn write(&self, record: &SessionRecord) -> CoreResult<String> {
        check_session_id(&record.session_id)?;

        let text = serde_json::to_string(record)
            .map_err(|e| CoreError::persistence(record.session_id.as_str(), e))?;
        self.records.write().insert(record.session_id.clone(), text);

        Ok(Self::location(&record.session_id))
    }

    fn read(&self, session_id: &str) -> CoreResult<Option<StoredSession>> {
        let records = self.records.read();
        let Some(text) = records.get(session_id) else {
            return Ok(None);
        };

        Ok(Some(StoredSession {
            record: decode(session_id, text)?,
            location: Self::location(session_id),
        }))
    }

    fn scan(&self) -> CoreResult<Vec<StoredSession>> {
        let records = self.records.read();
        Ok(records
            .iter()
            .filter_map(|(session_id, text)| match decode(session_id, text) {
                Ok(record) => Some(StoredSession {
                    record,
                    location: Self::location(session_id),
                }),
                Err(e) => {
                    tracing::warn!("Skipping in-memory record {}: {}", session_id, e);
                    None
                }
            })
            .collect())
    }

    fn name(&self) -> &'static str {
        "in-memory"
    }
}
