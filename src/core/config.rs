use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub storage_path: String,
    pub db_path: String,
    pub openai_api_hostname: String,
    pub openai_api_key: String,
    pub model: String,
    pub fallback_model: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub stall_timeout: Duration,
    pub system_message: String,
    pub default_language: String,
    /// Signs this user in on startup
    pub user: Option<String>,
}

// Unset, blank or unparseable values use the default
fn parse_var<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(value) => value.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Ignoring invalid value for {}: {}", key, value);
            default
        }),
        Err(_) => default,
    }
}

fn optional_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Default for AppConfig {
    fn default() -> Self {
        let storage_path = env::var("CODEGEN_STORAGE_PATH").unwrap_or("./".to_string());
        let db_path = format!("{}/db", storage_path.trim_end_matches('/'));
        let openai_api_hostname = env::var("CODEGEN_LLM_HOST")
            .unwrap_or_else(|_| "https://api.openai.com".to_string());
        let openai_api_key =
            env::var("OPENAI_API_KEY").unwrap_or_else(|_| "thiswontworkforopenai".to_string());
        let model = env::var("CODEGEN_MODEL").unwrap_or_else(|_| "gpt-4.1-mini".to_string());
        let system_message = env::var("CODEGEN_SYSTEM_MESSAGE")
            .unwrap_or_else(|_| "You are a helpful AI coding assistant.".to_string());
        let default_language =
            env::var("CODEGEN_DEFAULT_LANGUAGE").unwrap_or_else(|_| "javascript".to_string());

        Self {
            storage_path,
            db_path,
            openai_api_hostname,
            openai_api_key,
            model,
            fallback_model: optional_var("CODEGEN_FALLBACK_MODEL"),
            temperature: parse_var("CODEGEN_TEMPERATURE", 0.5),
            max_tokens: parse_var("CODEGEN_MAX_TOKENS", 2048),
            max_attempts: parse_var("CODEGEN_MAX_ATTEMPTS", 2).max(1),
            retry_delay: Duration::from_millis(parse_var("CODEGEN_RETRY_DELAY_MS", 3000)),
            stall_timeout: Duration::from_secs(parse_var("CODEGEN_STALL_TIMEOUT_SECS", 30)),
            system_message,
            default_language,
            user: optional_var("CODEGEN_USER"),
        }
    }
}
