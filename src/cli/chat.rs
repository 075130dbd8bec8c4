use std::path::Path;

use anyhow::Result;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

use super::generate::{print_generation, print_summary};
use super::open_session;
use crate::ai::conversation::TurnStatus;
use crate::ai::files::save_code;
use crate::ai::generation::GenerationOptions;
use crate::ai::session::CodeSession;
use crate::core::AppConfig;

const HELP: &str = r"Type a description of the code you want. Ctrl-C stops a running generation.

/history          list your saved generations
/open <id>        load a saved generation
/save [dir]       write the latest code to generated-code.<ext>
/login <user>     sign in to save generations
/logout           sign out
/quit             exit";

pub async fn run(config: &AppConfig, user: Option<String>) -> Result<()> {
    let mut rl = DefaultEditor::new()?;
    let options = GenerationOptions::from_config(config);
    let mut session = open_session(config, options, user).await?;

    println!("{}", HELP);
    loop {
        let readline = rl.readline(">>> ");
        match readline {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(line);

                if let Some(command) = line.strip_prefix('/') {
                    match handle_command(&mut session, command).await {
                        Ok(true) => continue,
                        Ok(false) => break,
                        Err(e) => {
                            eprintln!("Error: {}", e);
                            continue;
                        }
                    }
                }

                if let Err(e) = session.submit(line) {
                    eprintln!("{}", e);
                    continue;
                }
                match print_generation(&mut session).await? {
                    Some(turn) if turn.status == TurnStatus::Failed => {
                        eprintln!("Error: {}", turn.error.unwrap_or_default());
                    }
                    Some(turn) => print_summary(&session, &turn),
                    None => eprintln!("Generation cancelled"),
                }
            }
            Err(ReadlineError::Interrupted) => break,
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                println!("Error: {:?}", err);
                break;
            }
        }
    }

    Ok(())
}

// Returns false when the session should end
async fn handle_command(session: &mut CodeSession, command: &str) -> Result<bool> {
    let (name, arg) = command
        .split_once(' ')
        .map(|(n, a)| (n, a.trim()))
        .unwrap_or((command, ""));

    match name {
        "quit" | "exit" => return Ok(false),
        "help" => println!("{}", HELP),
        "login" => {
            let user = session.auth().sign_in(arg)?;
            println!("Signed in as {}", user.id);
        }
        "logout" => {
            session.auth().sign_out();
            println!("Signed out");
        }
        "history" => {
            let Some(user) = session.auth().current_user() else {
                println!("Sign in with /login <user> to see your history");
                return Ok(true);
            };
            let records = session.history().list_records(&user.id, 20).await?;
            if records.is_empty() {
                println!("No saved generations yet");
            }
            for record in records {
                println!("{}", super::history::summary_line(&record));
            }
        }
        "open" => {
            let Some(user) = session.auth().current_user() else {
                println!("Sign in with /login <user> to open your history");
                return Ok(true);
            };
            match session.history().find_record(&user.id, arg).await? {
                Some(record) => {
                    let turn = session.conversation_mut().restore(&record);
                    println!("{}\n\n```{}\n{}\n```", turn.prompt, turn.language, turn.code);
                }
                None => println!("No saved generation with id {}", arg),
            }
        }
        "save" => {
            let dir = if arg.is_empty() { "." } else { arg };
            let latest = session
                .conversation()
                .turns()
                .iter()
                .rev()
                .find(|t| t.status == TurnStatus::Complete && !t.code.is_empty())
                .map(|t| (t.code.clone(), t.language.clone()));
            match latest {
                Some((code, language)) => {
                    let path = save_code(Path::new(dir), &code, &language).await?;
                    println!("Saved code to {}", path.display());
                }
                None => println!("No generated code to save"),
            }
        }
        _ => println!("Unknown command /{}. Try /help", name),
    }

    Ok(true)
}
