//! Accumulates streamed fragments and keeps the extracted code current.
use super::extract::{ExtractionResult, extract};

/// Everything received so far for one generation request. Append only.
#[derive(Debug, Default)]
pub struct Transcript(String);

impl Transcript {
    pub fn new() -> Self {
        Self(String::new())
    }

    pub fn push(&mut self, fragment: &str) {
        self.0.push_str(fragment)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Owns the transcript for an in-flight generation and recomputes the
/// extraction after every fragment.
#[derive(Debug)]
pub struct StreamAssembler {
    transcript: Transcript,
    default_language: String,
    latest: ExtractionResult,
}

impl StreamAssembler {
    pub fn new(default_language: &str) -> Self {
        Self {
            transcript: Transcript::new(),
            default_language: default_language.to_string(),
            latest: ExtractionResult::default(),
        }
    }

    /// Append a fragment and return the extraction for the whole
    /// transcript so far.
    pub fn push(&mut self, fragment: &str) -> &ExtractionResult {
        self.transcript.push(fragment);
        self.latest = extract(self.transcript.as_str(), &self.default_language);
        &self.latest
    }

    pub fn result(&self) -> &ExtractionResult {
        &self.latest
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn into_result(self) -> ExtractionResult {
        self.latest
    }
}
