use anyhow::Result;
use rusqlite::Connection as SqliteConnection;
use tokio_rusqlite::Connection;

/// Schema changes in the order they are applied. The index of each
/// entry plus one is the `user_version` it migrates to.
const MIGRATIONS: [&str; 1] = [r"
CREATE TABLE IF NOT EXISTS history (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    prompt TEXT NOT NULL,
    code TEXT NOT NULL,
    language TEXT NOT NULL,
    explanation TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS history_user_created_at
    ON history (user_id, created_at);
"];

pub async fn async_db(db_dir: &str) -> Result<Connection> {
    let db_path = format!("{}/codegen.db", db_dir.trim_end_matches('/'));
    let db = Connection::open(db_path).await?;
    Ok(db)
}

pub fn schema_version(conn: &SqliteConnection) -> Result<usize, rusqlite::Error> {
    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    Ok(version.max(0) as usize)
}

/// Create every table on an empty database.
pub fn initialize_db(conn: &mut SqliteConnection) -> Result<(), rusqlite::Error> {
    migrate_db(conn)
}

/// Apply the migrations newer than the database's `user_version`, all
/// in one transaction.
pub fn migrate_db(conn: &mut SqliteConnection) -> Result<(), rusqlite::Error> {
    let current = schema_version(conn)?;
    if current >= MIGRATIONS.len() {
        tracing::debug!("Database schema is up to date at version {}", current);
        return Ok(());
    }

    let tx = conn.transaction()?;
    for (idx, migration) in MIGRATIONS.iter().enumerate().skip(current) {
        tracing::info!("Applying migration {}", idx + 1);
        tx.execute_batch(migration)?;
    }
    tx.pragma_update(None, "user_version", MIGRATIONS.len() as i64)?;
    tx.commit()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrate_is_idempotent() {
        let mut conn = SqliteConnection::open_in_memory().unwrap();
        assert_eq!(schema_version(&conn).unwrap(), 0);

        initialize_db(&mut conn).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), MIGRATIONS.len());

        migrate_db(&mut conn).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), MIGRATIONS.len());

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM history", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_async_db_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let db = async_db(dir.path().to_str().unwrap()).await.unwrap();
        db.call(|conn| {
            initialize_db(conn)?;
            Ok(())
        })
        .await
        .unwrap();
        assert!(dir.path().join("codegen.db").exists());
    }
}
