//! Pulls the generated code block, its language and the surrounding
//! prose out of a model response.
//!
//! Models are prompted to answer in Markdown so code arrives inside
//! triple-backtick fences, optionally tagged with a language:
//!
//! ````text
//! Here is the function:
//! ```js
//! console.log(1)
//! ```
//! It prints one.
//! ````
//!
//! Extraction is a pure function of the text so it can be re-run after
//! every streamed fragment.
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

// A complete fenced block: opening fence, optional tag made of word
// characters, newline, body, closing fence. `(?-u:\w)` keeps the tag
// ASCII.
static CODE_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"```((?-u:\w)+)?\n([\s\S]*?)```").expect("Invalid code block regex")
});

// Any region between a pair of fences, used to strip code from the
// explanation.
static FENCED_REGION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```[\s\S]*?```").expect("Invalid fenced region regex"));

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ExtractionResult {
    /// Body of the last complete fenced block, trimmed
    pub code: Option<String>,
    /// Tag of the selected block, or the default language when the
    /// block has no tag. `None` when there is no complete block.
    pub language: Option<String>,
    /// The text with every fenced region removed, trimmed
    pub explanation: String,
}

impl ExtractionResult {
    /// Code, or an empty string when no complete block has arrived
    pub fn code_or_empty(&self) -> &str {
        self.code.as_deref().unwrap_or("")
    }

    pub fn has_code(&self) -> bool {
        self.code.as_deref().is_some_and(|c| !c.is_empty())
    }
}

/// Derive the code, language and explanation from `text`.
///
/// When more than one complete block exists the last one wins, so a
/// model that revises its answer mid-response ends up with the final
/// version. An opening fence without a closing fence is not a block
/// and stays part of the explanation until it is closed.
pub fn extract(text: &str, default_language: &str) -> ExtractionResult {
    let last_block = CODE_BLOCK.captures_iter(text).last();

    let Some(captures) = last_block else {
        return ExtractionResult {
            code: None,
            language: None,
            explanation: text.trim().to_string(),
        };
    };

    let language = captures
        .get(1)
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| default_language.to_string());
    let code = captures
        .get(2)
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default();
    let explanation = FENCED_REGION.replace_all(text, "").trim().to_string();

    ExtractionResult {
        code: Some(code),
        language: Some(language),
        explanation,
    }
}
