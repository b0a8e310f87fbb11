//! Chat sessions held by the HTTP server, keyed by session id.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use folio_core::chat::{ChatSession, Retriever};
use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

/// One exchange, as reported by `GET /chat/history/{id}`.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub user_message: String,
    pub bot_response: String,
    pub timestamp: DateTime<Utc>,
}

struct SessionState {
    session: ChatSession,
    history: Vec<HistoryEntry>,
}

/// Reply to one chat turn.
#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub response: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
}

/// In-memory session registry. Sessions are created lazily on first use
/// and live until cleared or the process exits.
pub struct SessionStore {
    retriever: Retriever,
    sessions: Mutex<HashMap<String, Arc<Mutex<SessionState>>>>,
}

impl SessionStore {
    pub fn new(retriever: Retriever) -> Self {
        Self {
            retriever,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Send `message` to the session `session_id`, creating it (with a fresh
    /// id when none is given) if it does not exist.
    pub async fn chat(&self, session_id: Option<String>, message: &str) -> anyhow::Result<ChatReply> {
        let session_id = session_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let state = {
            let mut sessions = self.sessions.lock().await;
            Arc::clone(sessions.entry(session_id.clone()).or_insert_with(|| {
                tracing::debug!(session_id = %session_id, "created chat session");
                Arc::new(Mutex::new(SessionState {
                    session: ChatSession::new(self.retriever.clone()),
                    history: Vec::new(),
                }))
            }))
        };

        // Turns within one session are serialized; other sessions proceed.
        let mut state = state.lock().await;
        let response = state.session.chat(message).await?;
        let timestamp = Utc::now();
        state.history.push(HistoryEntry {
            user_message: message.to_string(),
            bot_response: response.clone(),
            timestamp,
        });

        Ok(ChatReply {
            response,
            session_id,
            timestamp,
        })
    }

    /// Turns of a session, oldest first. `None` if the session is unknown.
    pub async fn history(&self, session_id: &str) -> Option<Vec<HistoryEntry>> {
        let state = self.sessions.lock().await.get(session_id).cloned()?;
        let history = state.lock().await.history.clone();
        Some(history)
    }

    /// Forget a session. Returns `false` if it was unknown.
    pub async fn clear(&self, session_id: &str) -> bool {
        self.sessions.lock().await.remove(session_id).is_some()
    }
}
