//! Test utilities for integration tests
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use codegen::ai::generation::GenerationOptions;
use codegen::ai::session::CodeSession;
use codegen::auth::LocalAuth;
use codegen::core::db::{async_db, initialize_db};
use codegen::history::SqliteHistoryStore;
use codegen::openai::OpenAiClient;

/// An event stream body that sends each fragment as its own chunk
/// followed by the `[DONE]` sentinel.
pub fn sse_body(fragments: &[&str]) -> String {
    let mut body = String::new();
    for fragment in fragments {
        let chunk = json!({
            "choices": [{"index": 0, "delta": {"content": fragment}, "finish_reason": null}]
        });
        body.push_str(&format!("data: {}\n\n", chunk));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

/// A history store backed by a fresh database in `dir`.
pub async fn test_history(dir: &Path) -> Arc<SqliteHistoryStore> {
    let db = async_db(dir.to_str().unwrap())
        .await
        .expect("Failed to connect to async db");
    db.call(|conn| {
        initialize_db(conn).expect("Failed to migrate db");
        Ok(())
    })
    .await
    .unwrap();
    Arc::new(SqliteHistoryStore::new(db))
}

pub fn test_options() -> GenerationOptions {
    GenerationOptions {
        model: String::from("primary-model"),
        retry_delay: Duration::ZERO,
        stall_timeout: Duration::from_secs(5),
        ..GenerationOptions::default()
    }
}

/// A session against a mock server, signed in as `user` when given.
pub fn test_session(
    server_url: &str,
    options: GenerationOptions,
    history: Arc<SqliteHistoryStore>,
    user: Option<&str>,
) -> CodeSession {
    let auth = match user {
        Some(user) => LocalAuth::signed_in(user).unwrap(),
        None => LocalAuth::new(),
    };
    CodeSession::new(
        Arc::new(OpenAiClient::new(server_url, "test-api-key").unwrap()),
        options,
        Arc::new(auth),
        history,
    )
}
