use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod chat;
pub mod generate;
pub mod history;
pub mod init;
pub mod migrate;

use crate::ai::generation::GenerationOptions;
use crate::ai::session::CodeSession;
use crate::auth::{AuthProvider, LocalAuth};
use crate::core::AppConfig;
use crate::core::db::{async_db, migrate_db};
use crate::history::{HistoryStore, SqliteHistoryStore};
use crate::openai::OpenAiClient;

#[derive(Subcommand)]
enum Command {
    /// Initialize the database
    Init {},
    /// Migrate the db schema
    Migrate {},
    /// Generate code for a prompt
    Generate {
        #[arg(long)]
        prompt: String,
        /// Override the configured model
        #[arg(long)]
        model: Option<String>,
        /// Language assumed when the code block has no tag
        #[arg(long)]
        language: Option<String>,
        /// Wait for the whole response instead of streaming it
        #[arg(long, action, default_value = "false")]
        no_stream: bool,
        /// Write the code to generated-code.<ext> in this directory
        #[arg(long)]
        save: Option<PathBuf>,
        /// Save the result to this user's history
        #[arg(long)]
        user: Option<String>,
    },
    /// Start an interactive code generation session
    Chat {
        #[arg(long)]
        user: Option<String>,
    },
    /// List or show saved generations
    History {
        #[arg(long)]
        user: Option<String>,
        #[arg(long, default_value = "20")]
        limit: usize,
        /// Show a single record in full
        #[arg(long)]
        id: Option<String>,
    },
}

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}=info", env!("CARGO_CRATE_NAME")).into()),
        )
        // Stdout is reserved for generated code
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

pub async fn run() -> Result<()> {
    let args = Cli::parse();
    init_tracing();
    let config = AppConfig::default();

    // Handle each sub command
    match args.command {
        Some(Command::Init {}) => {
            init::run(&config.db_path).await?;
        }
        Some(Command::Migrate {}) => {
            migrate::run(&config.db_path).await?;
        }
        Some(Command::Generate {
            prompt,
            model,
            language,
            no_stream,
            save,
            user,
        }) => {
            let args = generate::GenerateArgs {
                prompt,
                model,
                language,
                stream: !no_stream,
                save,
                user,
            };
            generate::run(&config, args).await?;
        }
        Some(Command::Chat { user }) => {
            chat::run(&config, user).await?;
        }
        Some(Command::History { user, limit, id }) => {
            history::run(&config, user, limit, id).await?;
        }
        None => {}
    }

    Ok(())
}

/// Open the history database, bringing its schema up to date.
pub async fn open_history(db_path: &str) -> Result<Arc<dyn HistoryStore>> {
    fs::create_dir_all(db_path)?;
    let db = async_db(db_path).await?;
    db.call(|conn| {
        migrate_db(conn)?;
        Ok(())
    })
    .await?;
    Ok(Arc::new(SqliteHistoryStore::new(db)))
}

/// The `--user` flag wins over the configured user.
pub fn local_auth(config: &AppConfig, user: Option<String>) -> Result<Arc<LocalAuth>> {
    let auth = LocalAuth::new();
    if let Some(user_id) = user.or_else(|| config.user.clone()) {
        auth.sign_in(&user_id)?;
    }
    Ok(Arc::new(auth))
}

pub async fn open_session(
    config: &AppConfig,
    options: GenerationOptions,
    user: Option<String>,
) -> Result<CodeSession> {
    let client = OpenAiClient::new(&config.openai_api_hostname, &config.openai_api_key)?;
    let auth = local_auth(config, user)?;
    let history = open_history(&config.db_path).await?;
    Ok(CodeSession::new(Arc::new(client), options, auth, history))
}
