//! Saving generated code to disk.
use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};

/// File extension for a language tag. Unknown languages get `txt`.
pub fn file_extension(language: &str) -> &'static str {
    match language.trim().to_lowercase().as_str() {
        "javascript" | "js" => "js",
        "typescript" | "ts" => "ts",
        "python" | "py" => "py",
        "java" => "java",
        "cpp" | "c++" => "cpp",
        "c" => "c",
        "csharp" | "cs" => "cs",
        "go" => "go",
        "rust" | "rs" => "rs",
        "php" => "php",
        "ruby" | "rb" => "rb",
        "swift" => "swift",
        "kotlin" | "kt" => "kt",
        "html" => "html",
        "css" => "css",
        "sql" => "sql",
        "bash" | "sh" | "shell" => "sh",
        "powershell" | "ps1" => "ps1",
        _ => "txt",
    }
}

pub fn file_name(language: &str) -> String {
    format!("generated-code.{}", file_extension(language))
}

/// Write `code` to `generated-code.<ext>` inside `dir` and return the
/// path written.
pub async fn save_code(dir: &Path, code: &str, language: &str) -> Result<PathBuf> {
    if code.trim().is_empty() {
        return Err(anyhow!("No code to save"));
    }
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(file_name(language));
    tokio::fs::write(&path, code).await?;
    tracing::info!("Saved generated code to {}", path.display());
    Ok(path)
}
