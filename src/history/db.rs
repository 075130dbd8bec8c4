use anyhow::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{OptionalExtension, Row};
use tokio_rusqlite::Connection;

use super::{HistoryRecord, HistoryStore, NewHistoryRecord};

/// History kept in the `history` table of the app database.
#[derive(Clone)]
pub struct SqliteHistoryStore {
    db: Connection,
}

impl SqliteHistoryStore {
    pub fn new(db: Connection) -> Self {
        Self { db }
    }
}

const COLUMNS: &str = "id, user_id, prompt, code, language, explanation, created_at";

fn from_row(row: &Row) -> Result<HistoryRecord, rusqlite::Error> {
    let created_at: String = row.get(6)?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
        })?;
    Ok(HistoryRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        prompt: row.get(2)?,
        code: row.get(3)?,
        language: row.get(4)?,
        explanation: row.get(5)?,
        created_at,
    })
}

#[async_trait]
impl HistoryStore for SqliteHistoryStore {
    async fn append_record(
        &self,
        user_id: &str,
        record: NewHistoryRecord,
    ) -> Result<HistoryRecord, Error> {
        let record = record.into_record(user_id);
        let row = record.clone();
        self.db
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "INSERT INTO history ({COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?)"
                ))?;
                let created_at = row.created_at.to_rfc3339_opts(SecondsFormat::Micros, true);
                let result = stmt.execute([
                    &row.id,
                    &row.user_id,
                    &row.prompt,
                    &row.code,
                    &row.language,
                    &row.explanation,
                    &created_at,
                ])?;
                Ok(result)
            })
            .await?;

        tracing::debug!("Saved history record {} for user {}", record.id, user_id);
        Ok(record)
    }

    async fn list_records(&self, user_id: &str, limit: usize) -> Result<Vec<HistoryRecord>, Error> {
        let user_id = user_id.to_owned();
        let limit = limit as i64;
        let records = self
            .db
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {COLUMNS} FROM history WHERE user_id = ?
                     ORDER BY created_at DESC, rowid DESC LIMIT ?"
                ))?;
                let rows = stmt
                    .query_map(rusqlite::params![user_id, limit], from_row)?
                    .collect::<Result<Vec<HistoryRecord>, rusqlite::Error>>()?;
                Ok(rows)
            })
            .await?;
        Ok(records)
    }

    async fn find_record(&self, user_id: &str, id: &str) -> Result<Option<HistoryRecord>, Error> {
        let user_id = user_id.to_owned();
        let id = id.to_owned();
        let record = self
            .db
            .call(move |conn| {
                let record = conn
                    .query_row(
                        &format!("SELECT {COLUMNS} FROM history WHERE user_id = ? AND id = ?"),
                        [user_id, id],
                        from_row,
                    )
                    .optional()?;
                Ok(record)
            })
            .await?;
        Ok(record)
    }
}
