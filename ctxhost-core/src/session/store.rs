//! The session context store
//!
//! Active sessions live in a map of per-session slots. The map lock is only
//! held to find or insert a slot; appends take the slot's own lock, so
//! unrelated sessions never contend. Saves of one session are serialized by
//! an async gate and the snapshot is taken after the gate is acquired, which
//! keeps published records in append order.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};

use super::storage::{FileSessionStorage, InMemorySessionStorage, SessionStorage, StoredSession};
use super::{Interaction, Session, SessionSummary};
use crate::config::CoreConfig;
use crate::error::{CoreError, CoreResult};
use crate::handler::ContextProvider;

struct SessionSlot {
    session: Mutex<Session>,
    persist_gate: tokio::sync::Mutex<()>,
    location: Mutex<Option<String>>,
}

impl SessionSlot {
    fn new(session: Session, location: Option<String>) -> Arc<Self> {
        Arc::new(Self {
            session: Mutex::new(session),
            persist_gate: tokio::sync::Mutex::new(()),
            location: Mutex::new(location),
        })
    }
}

/// Owner of all active sessions
pub struct SessionContextStore {
    storage: Arc<dyn SessionStorage>,
    sessions: RwLock<HashMap<String, Arc<SessionSlot>>>,
    default_window: usize,
    reply_char_budget: usize,
}

impl SessionContextStore {
    /// Create a store over any storage backend
    pub fn new(storage: Arc<dyn SessionStorage>, config: &CoreConfig) -> Self {
        Self {
            storage,
            sessions: RwLock::new(HashMap::new()),
            default_window: config.context_window,
            reply_char_budget: config.reply_char_budget,
        }
    }

    /// Create a store persisting to `config.context_dir`
    pub fn open(config: &CoreConfig) -> CoreResult<Self> {
        let storage = FileSessionStorage::new(&config.context_dir)?;
        tracing::info!("Session records in {}", storage.directory().display());
        Ok(Self::new(Arc::new(storage), config))
    }

    /// Create a store that keeps records in memory
    pub fn in_memory(config: &CoreConfig) -> Self {
        Self::new(Arc::new(InMemorySessionStorage::new()), config)
    }

    /// Interactions rendered when a caller does not choose a window size
    pub fn default_window(&self) -> usize {
        self.default_window
    }

    pub fn storage_name(&self) -> &'static str {
        self.storage.name()
    }

    fn slot(&self, session_id: &str) -> CoreResult<Arc<SessionSlot>> {
        self.sessions
            .read()
            .get(session_id)
            .cloned()
            .ok_or_else(|| CoreError::SessionNotFound {
                session_id: session_id.to_string(),
            })
    }

    /// Create an empty active session
    ///
    /// Without an explicit id a time-based one is generated. An explicit id
    /// that is already active fails with `DuplicateSession`.
    pub fn create_session(&self, session_id: Option<&str>) -> CoreResult<Session> {
        let mut sessions = self.sessions.write();

        let id = match session_id {
            Some(id) if sessions.contains_key(id) => {
                return Err(CoreError::DuplicateSession {
                    session_id: id.to_string(),
                });
            }
            Some(id) => id.to_string(),
            None => loop {
                let candidate = Session::generate_id();
                if !sessions.contains_key(&candidate) {
                    break candidate;
                }
            },
        };

        let session = Session::new(id.clone());
        sessions.insert(id, SessionSlot::new(session.clone(), None));
        tracing::info!("Created session {}", session.id);

        Ok(session)
    }

    /// Append an interaction to an active session
    pub fn add_interaction(
        &self,
        session_id: &str,
        user: impl Into<String>,
        assistant: impl Into<String>,
        metadata: Option<Map<String, Value>>,
    ) -> CoreResult<Interaction> {
        let slot = self.slot(session_id)?;
        let interaction =
            slot.session
                .lock()
                .append(user.into(), assistant.into(), metadata.unwrap_or_default());

        tracing::debug!("Appended interaction to session {}", session_id);
        Ok(interaction)
    }

    /// Persist a snapshot of an active session
    ///
    /// Returns where the record was written. A failed save leaves the
    /// in-memory session untouched.
    pub async fn save(&self, session_id: &str) -> CoreResult<String> {
        let slot = self.slot(session_id)?;
        let _gate = slot.persist_gate.lock().await;

        let record = slot.session.lock().to_record();
        let count = record.history.len();
        let location = self.blocking(session_id, move |storage| storage.write(&record)).await?;

        *slot.location.lock() = Some(location.clone());
        tracing::info!(
            "Saved session {} ({} interactions) to {}",
            session_id,
            count,
            location
        );

        Ok(location)
    }

    /// Load a persisted session into memory
    ///
    /// An active session with the same id has its state replaced; otherwise
    /// the loaded session becomes active. For an active session the record
    /// is read under the persist gate, so an in-progress save is published
    /// before it is read back.
    pub async fn load(&self, session_id: &str) -> CoreResult<Session> {
        let session = loop {
            let existing = self.sessions.read().get(session_id).cloned();

            if let Some(slot) = existing {
                let _gate = slot.persist_gate.lock().await;
                let stored = self.read_record(session_id).await?;
                let session = Session::from_record(stored.record);
                *slot.session.lock() = session.clone();
                *slot.location.lock() = Some(stored.location);
                break session;
            }

            let stored = self.read_record(session_id).await?;
            let mut sessions = self.sessions.write();
            if sessions.contains_key(session_id) {
                // Activated while we were reading; reload under its gate
                continue;
            }
            let session = Session::from_record(stored.record);
            sessions.insert(
                session_id.to_string(),
                SessionSlot::new(session.clone(), Some(stored.location)),
            );
            break session;
        };

        tracing::info!(
            "Loaded session {} ({} interactions)",
            session_id,
            session.len()
        );
        Ok(session)
    }

    /// Render the last `max_interactions` interactions of an active session
    pub fn get_context(&self, session_id: &str, max_interactions: usize) -> CoreResult<String> {
        let slot = self.slot(session_id)?;
        let session = slot.session.lock();
        Ok(session.render_context(max_interactions, self.reply_char_budget))
    }

    /// Summaries of every readable persisted session, newest first
    pub async fn list_sessions(&self) -> CoreResult<Vec<SessionSummary>> {
        let stored = self.blocking("sessions", |storage| storage.scan()).await?;

        let mut summaries: Vec<SessionSummary> = stored
            .into_iter()
            .map(|s| s.record.summary(Some(s.location)))
            .collect();
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));

        Ok(summaries)
    }

    /// Summary of an active session
    pub fn summary(&self, session_id: &str) -> CoreResult<SessionSummary> {
        let slot = self.slot(session_id)?;
        let location = slot.location.lock().clone();
        let record = slot.session.lock().to_record();
        Ok(record.summary(location))
    }

    /// Read-only copy of an active session
    pub fn snapshot(&self, session_id: &str) -> CoreResult<Session> {
        let slot = self.slot(session_id)?;
        let session = slot.session.lock().clone();
        Ok(session)
    }

    /// Render a persisted session's window without activating it
    pub async fn persisted_context(
        &self,
        session_id: &str,
        max_interactions: usize,
    ) -> CoreResult<(String, SessionSummary)> {
        let stored = self.read_record(session_id).await?;

        let window = super::render_context(
            &stored.record.history,
            max_interactions,
            self.reply_char_budget,
        );
        let summary = stored.record.summary(Some(stored.location));

        Ok((window, summary))
    }

    /// Ids of the sessions currently in memory, sorted
    pub fn active_sessions(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn is_active(&self, session_id: &str) -> bool {
        self.sessions.read().contains_key(session_id)
    }

    async fn read_record(&self, session_id: &str) -> CoreResult<StoredSession> {
        let id = session_id.to_string();
        self.blocking(session_id, move |storage| storage.read(&id))
            .await?
            .ok_or_else(|| CoreError::SessionNotFound {
                session_id: session_id.to_string(),
            })
    }

    async fn blocking<T, F>(&self, target: &str, op: F) -> CoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn SessionStorage) -> CoreResult<T> + Send + 'static,
    {
        let storage = Arc::clone(&self.storage);
        tokio::task::spawn_blocking(move || op(storage.as_ref()))
            .await
            .map_err(|e| CoreError::persistence(target, format!("storage task failed: {}", e)))?
    }
}

impl ContextProvider for SessionContextStore {
    fn context_window(&self, session_id: &str, max_interactions: usize) -> CoreResult<String> {
        self.get_context(session_id, max_interactions)
    }
}

impl std::fmt::Debug for SessionContextStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContextStore")
            .field("storage", &self.storage.name())
            .field("active", &self.sessions.read().len())
            .finish()
    }
}
