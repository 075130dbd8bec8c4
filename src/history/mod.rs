//! Per-user record of completed generations.
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::ai::conversation::ConversationTurn;

pub mod db;

pub use db::SqliteHistoryStore;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HistoryRecord {
    pub id: String,
    pub user_id: String,
    pub prompt: String,
    pub code: String,
    pub language: String,
    pub explanation: String,
    pub created_at: DateTime<Utc>,
}

/// The content of a record before the store assigns its id and
/// timestamp.
#[derive(Clone, Debug, PartialEq)]
pub struct NewHistoryRecord {
    pub prompt: String,
    pub code: String,
    pub language: String,
    pub explanation: String,
}

impl From<&ConversationTurn> for NewHistoryRecord {
    fn from(turn: &ConversationTurn) -> Self {
        Self {
            prompt: turn.prompt.clone(),
            code: turn.code.clone(),
            language: turn.language.clone(),
            explanation: turn.explanation.clone(),
        }
    }
}

impl NewHistoryRecord {
    fn into_record(self, user_id: &str) -> HistoryRecord {
        HistoryRecord {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            prompt: self.prompt,
            code: self.code,
            language: self.language,
            explanation: self.explanation,
            created_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn append_record(&self, user_id: &str, record: NewHistoryRecord)
    -> Result<HistoryRecord>;

    /// Most recent first
    async fn list_records(&self, user_id: &str, limit: usize) -> Result<Vec<HistoryRecord>>;

    async fn find_record(&self, user_id: &str, id: &str) -> Result<Option<HistoryRecord>>;
}

/// Keeps records for the lifetime of the process.
#[derive(Debug, Default)]
pub struct MemoryHistoryStore {
    records: Mutex<Vec<HistoryRecord>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> std::sync::MutexGuard<'_, Vec<HistoryRecord>> {
        self.records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn append_record(
        &self,
        user_id: &str,
        record: NewHistoryRecord,
    ) -> Result<HistoryRecord> {
        let record = record.into_record(user_id);
        self.records().push(record.clone());
        Ok(record)
    }

    async fn list_records(&self, user_id: &str, limit: usize) -> Result<Vec<HistoryRecord>> {
        Ok(self
            .records()
            .iter()
            .rev()
            .filter(|r| r.user_id == user_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn find_record(&self, user_id: &str, id: &str) -> Result<Option<HistoryRecord>> {
        Ok(self
            .records()
            .iter()
            .find(|r| r.user_id == user_id && r.id == id)
            .cloned())
    }
}
