use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Result, anyhow};

use super::open_session;
use crate::ai::conversation::{ConversationTurn, TurnStatus};
use crate::ai::files::save_code;
use crate::ai::generation::{GenerationEventKind, GenerationOptions};
use crate::ai::session::CodeSession;
use crate::core::AppConfig;

pub struct GenerateArgs {
    pub prompt: String,
    pub model: Option<String>,
    pub language: Option<String>,
    pub stream: bool,
    pub save: Option<PathBuf>,
    pub user: Option<String>,
}

pub async fn run(config: &AppConfig, args: GenerateArgs) -> Result<()> {
    let mut options = GenerationOptions::from_config(config);
    if let Some(model) = args.model {
        options.model = model;
    }
    if let Some(language) = args.language {
        options.default_language = language;
    }
    options.stream = args.stream;

    let mut session = open_session(config, options, args.user).await?;
    session.submit(&args.prompt)?;

    let Some(turn) = print_generation(&mut session).await? else {
        eprintln!("Generation cancelled");
        return Ok(());
    };

    if turn.status == TurnStatus::Failed {
        return Err(anyhow!(
            "{}",
            turn.error.unwrap_or_else(|| String::from("Code generation failed"))
        ));
    }

    print_summary(&session, &turn);
    if let Some(dir) = args.save {
        let path = save_code(&dir, &turn.code, &turn.language).await?;
        eprintln!("Saved code to {}", path.display());
    }

    Ok(())
}

/// Print the response as it streams in and return the finished turn.
/// Ctrl-C cancels the generation and returns `None`.
pub async fn print_generation(session: &mut CodeSession) -> Result<Option<ConversationTurn>> {
    let Some(turn_id) = session.conversation().active_handle().map(|h| h.turn_id()) else {
        return Ok(None);
    };
    let mut stdout = io::stdout();

    loop {
        // Only the receive races Ctrl-C. Applying an event and saving
        // the turn always run to the end.
        let next = tokio::select! {
            event = session.recv_event() => Some(event),
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(event) = next else {
            session.cancel();
            println!();
            return Ok(None);
        };
        let Some(event) = event else {
            break;
        };
        session.apply_event(&event).await;

        match event.kind {
            GenerationEventKind::Requesting => {
                tracing::debug!("Waiting for the model to respond");
            }
            GenerationEventKind::Fragment(text) => {
                write!(stdout, "{}", text)?;
                stdout.flush()?;
            }
            GenerationEventKind::Completed { .. } | GenerationEventKind::Failed(_) => {
                writeln!(stdout)?;
            }
            _ => {}
        }
    }

    Ok(session.conversation().turn(turn_id).cloned())
}

pub fn print_summary(session: &CodeSession, turn: &ConversationTurn) {
    if turn.code.is_empty() {
        eprintln!("No code block in the response");
    } else {
        eprintln!(
            "Generated {} lines of {} with {}",
            turn.code.lines().count(),
            turn.language,
            turn.model.as_deref().unwrap_or("unknown model")
        );
    }
    if let Some(record) = session.last_saved() {
        eprintln!("Saved to history as {}", record.id);
    }
}
