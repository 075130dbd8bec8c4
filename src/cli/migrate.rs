use anyhow::Result;

use crate::core::db::{async_db, migrate_db, schema_version};

pub async fn run(db_path: &str) -> Result<()> {
    println!("Migrating db...");
    let db = async_db(db_path).await?;
    let version = db
        .call(|conn| {
            migrate_db(conn)?;
            Ok(schema_version(conn)?)
        })
        .await?;
    println!("Finished migrating db to version {}", version);

    Ok(())
}
