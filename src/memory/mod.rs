//! Run-scoped conversational memory.
//!
//! A stage may be invoked several times in one run (first pass, then
//! revisions). Each invocation names a thread id derived from the run id and
//! the stage, and the backend client replays that thread's earlier turns so
//! the model revises its own previous answer instead of starting over.
//!
//! The store lives for one run: it is created before the engine starts and
//! discarded when the run ends.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One message in a conversation thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

/// Shared handle to all conversation threads of the current run.
///
/// Cloning the handle shares the underlying store.
#[derive(Debug, Clone, Default)]
pub struct ConversationMemory {
    threads: Arc<Mutex<HashMap<String, Vec<Turn>>>>,
}

impl ConversationMemory {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<Turn>>> {
        // A panic while holding the lock leaves the map intact; keep using it.
        self.threads.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Prior turns of a thread, oldest first. Unknown threads are empty.
    pub fn history(&self, thread: &str) -> Vec<Turn> {
        self.lock().get(thread).cloned().unwrap_or_default()
    }

    /// Append one user/assistant exchange to a thread.
    pub fn record(&self, thread: &str, user: &str, assistant: &str) {
        let mut threads = self.lock();
        let turns = threads.entry(thread.to_string()).or_default();
        turns.push(Turn {
            role: Role::User,
            content: user.to_string(),
        });
        turns.push(Turn {
            role: Role::Assistant,
            content: assistant.to_string(),
        });
    }

    pub fn thread_count(&self) -> usize {
        self.lock().len()
    }

    /// Drop every thread. Called when the run ends.
    pub fn discard(&self) {
        self.lock().clear();
    }
}

/// Build the thread id for one stage of one run.
pub fn thread_id(run_id: &Uuid, key: &str) -> String {
    format!("{}:{}", run_id, key)
}
