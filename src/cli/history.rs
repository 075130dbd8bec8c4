use anyhow::{Result, anyhow};

use super::open_history;
use crate::core::AppConfig;
use crate::history::HistoryRecord;

pub async fn run(
    config: &AppConfig,
    user: Option<String>,
    limit: usize,
    id: Option<String>,
) -> Result<()> {
    let user = user
        .or_else(|| config.user.clone())
        .ok_or_else(|| anyhow!("Missing user. Pass --user or set CODEGEN_USER"))?;
    let store = open_history(&config.db_path).await?;

    if let Some(id) = id {
        let record = store
            .find_record(&user, &id)
            .await?
            .ok_or_else(|| anyhow!("No saved generation with id {}", id))?;
        println!("{}", record.prompt);
        if !record.explanation.is_empty() {
            println!("\n{}", record.explanation);
        }
        println!("\n```{}\n{}\n```", record.language, record.code);
        return Ok(());
    }

    let records = store.list_records(&user, limit).await?;
    if records.is_empty() {
        println!("No saved generations for {}", user);
    }
    for record in records {
        println!("{}", summary_line(&record));
    }

    Ok(())
}

/// One line per record: id, local time, language and the start of the
/// prompt.
pub fn summary_line(record: &HistoryRecord) -> String {
    let prompt = record.prompt.lines().next().unwrap_or("");
    let prompt = if prompt.chars().count() > 60 {
        format!("{}...", prompt.chars().take(57).collect::<String>())
    } else {
        prompt.to_string()
    };
    format!(
        "{}  {}  {:<10}  {}",
        record.id,
        record
            .created_at
            .with_timezone(&chrono::Local)
            .format("%Y-%m-%d %H:%M"),
        record.language,
        prompt
    )
}
