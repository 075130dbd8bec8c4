//! Reusable prompts using Handlebars for templating. Handlebars adds
//! additional security controls since it can't do much out of the box
//! without registering your own helpers. This is ideal since prompts
//! are user input and Handlebars forces you to add only what you need.

use std::fmt;

use anyhow::Result;
use handlebars::{Handlebars, no_escape};
use serde_json::json;

use crate::openai::{Message, Role};

#[derive(Debug)]
pub enum Prompt {
    GenerateCode,
}

impl fmt::Display for Prompt {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// Implement the Into trait so that Prompt can be converted to an &str
impl From<Prompt> for String {
    fn from(item: Prompt) -> String {
        format!("{:?}", item)
    }
}

const GENERATE_CODE_PROMPT: &str = r"Generate code for: {{prompt}}";

pub fn templates<'a>() -> Handlebars<'a> {
    let mut registry = Handlebars::new();
    registry.set_strict_mode(true);
    // Prompts are sent to a model, not rendered as HTML
    registry.register_escape_fn(no_escape);
    registry
        .register_template_string(&Prompt::GenerateCode.to_string(), GENERATE_CODE_PROMPT)
        .expect("Failed to register template");
    registry
}

/// Build the `[system, user]` messages for a code generation request.
pub fn code_messages(system_message: &str, prompt: &str) -> Result<Vec<Message>> {
    let user_msg = templates().render(
        &Prompt::GenerateCode.to_string(),
        &json!({ "prompt": prompt }),
    )?;
    Ok(vec![
        Message::new(Role::System, system_message),
        Message::new(Role::User, &user_msg),
    ])
}
