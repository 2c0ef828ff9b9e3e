//! Sessions and their interaction history
//!
//! A [`Session`] is an append-only, chronological list of [`Interaction`]s.
//! The [`SessionContextStore`] owns the active sessions, serializes appends
//! per session, persists snapshots through a [`SessionStorage`] backend and
//! renders bounded context windows for handlers.

mod storage;
mod store;

pub use storage::{FileSessionStorage, InMemorySessionStorage, SessionStorage, StoredSession};
pub use store::SessionContextStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// First line of every non-empty context window
pub const CONTEXT_HEADER: &str = "Previous conversation:";

/// Marker appended to truncated assistant replies
pub const TRUNCATION_MARKER: &str = "...";

/// One user/assistant exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub timestamp: DateTime<Utc>,
    pub user: String,
    pub assistant: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// An identified, append-only conversation history
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    /// Unique within a store
    pub id: String,

    /// When the session was created
    pub created_at: DateTime<Utc>,

    /// Set by every append
    pub last_updated_at: Option<DateTime<Utc>>,

    history: Vec<Interaction>,
}

impl Session {
    /// Create an empty session
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            created_at: Utc::now(),
            last_updated_at: None,
            history: Vec::new(),
        }
    }

    /// Generate a time-based session id (`YYYYMMDD_HHMMSS_xxxxxxxx`)
    pub fn generate_id() -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        format!("{}_{}", Utc::now().format("%Y%m%d_%H%M%S"), &suffix[..8])
    }

    /// Interactions, oldest first
    pub fn history(&self) -> &[Interaction] {
        &self.history
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Append an interaction
    ///
    /// Timestamps never go backwards within a session, and never precede
    /// `created_at`, even if the wall clock does.
    pub(crate) fn append(
        &mut self,
        user: String,
        assistant: String,
        metadata: Map<String, Value>,
    ) -> Interaction {
        let floor = self
            .history
            .last()
            .map(|last| last.timestamp)
            .unwrap_or(self.created_at);
        let timestamp = Utc::now().max(floor);

        let interaction = Interaction {
            timestamp,
            user,
            assistant,
            metadata,
        };
        self.history.push(interaction.clone());
        self.last_updated_at = Some(timestamp);
        interaction
    }

    /// Render the last `max_interactions` interactions
    pub fn render_context(&self, max_interactions: usize, reply_char_budget: usize) -> String {
        render_context(&self.history, max_interactions, reply_char_budget)
    }

    /// Persisted form of this session
    pub fn to_record(&self) -> SessionRecord {
        SessionRecord {
            session_id: self.id.clone(),
            metadata: RecordMetadata {
                created_at: self.created_at,
                last_updated_at: self.last_updated_at,
            },
            history: self.history.clone(),
        }
    }

    /// Rebuild a session from its persisted form
    pub fn from_record(record: SessionRecord) -> Self {
        Self {
            id: record.session_id,
            created_at: record.metadata.created_at,
            last_updated_at: record.metadata.last_updated_at,
            history: record.history,
        }
    }
}

/// Persisted session document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub session_id: String,
    pub metadata: RecordMetadata,
    pub history: Vec<Interaction>,
}

impl SessionRecord {
    /// Summary of this record at `location`
    pub fn summary(&self, location: Option<String>) -> SessionSummary {
        SessionSummary {
            id: self.session_id.clone(),
            created_at: self.metadata.created_at,
            last_updated_at: self.metadata.last_updated_at,
            interaction_count: self.history.len(),
            location,
        }
    }
}

/// Timestamps stored alongside the history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordMetadata {
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_updated_at: Option<DateTime<Utc>>,
}

/// Listing entry for a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated_at: Option<DateTime<Utc>>,
    pub interaction_count: usize,
    /// Where the session was last persisted, if it ever was
    #[serde(default)]
    pub location: Option<String>,
}

/// Render a context window
///
/// Empty when `max_interactions` is zero or the history is empty. Otherwise
/// the header followed by the last `max_interactions` exchanges, oldest
/// first, with assistant replies cut to `reply_char_budget` characters.
pub fn render_context(
    history: &[Interaction],
    max_interactions: usize,
    reply_char_budget: usize,
) -> String {
    if max_interactions == 0 || history.is_empty() {
        return String::new();
    }

    let start = history.len().saturating_sub(max_interactions);
    let mut lines = vec![CONTEXT_HEADER.to_string()];

    for interaction in &history[start..] {
        lines.push(format!("\nUser: {}", interaction.user));
        lines.push(format!(
            "Assistant: {}",
            truncate_reply(&interaction.assistant, reply_char_budget)
        ));
    }

    lines.join("\n")
}

fn truncate_reply(text: &str, budget: usize) -> String {
    match text.char_indices().nth(budget) {
        Some((cut, _)) => format!("{}{}", &text[..cut], TRUNCATION_MARKER),
        None => text.to_string(),
    }
}
