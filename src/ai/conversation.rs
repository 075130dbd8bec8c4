//! The ordered list of prompt/response turns and the single active
//! generation that may be filling in the newest one.
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::extract::ExtractionResult;
use super::generation::{GenerationEvent, GenerationEventKind, GenerationHandle, GenerationStatus};
use crate::history::HistoryRecord;
use crate::openai::GenerateError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum TurnStatus {
    Pending,
    Complete,
    Failed,
}

#[derive(Clone, Debug, Serialize)]
pub struct ConversationTurn {
    pub id: Uuid,
    pub prompt: String,
    pub code: String,
    pub language: String,
    pub explanation: String,
    pub status: TurnStatus,
    pub error: Option<String>,
    /// Model that produced the response, which may be a fallback
    pub model: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ConversationTurn {
    fn pending(prompt: &str, default_language: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            prompt: prompt.to_string(),
            code: String::new(),
            language: default_language.to_string(),
            explanation: String::new(),
            status: TurnStatus::Pending,
            error: None,
            model: None,
            created_at: Utc::now(),
        }
    }

    fn update(&mut self, result: &ExtractionResult) {
        if let Some(code) = &result.code {
            self.code = code.clone();
        }
        if let Some(language) = &result.language {
            self.language = language.clone();
        }
        self.explanation = result.explanation.clone();
    }
}

impl From<&HistoryRecord> for ConversationTurn {
    fn from(record: &HistoryRecord) -> Self {
        Self {
            id: Uuid::new_v4(),
            prompt: record.prompt.clone(),
            code: record.code.clone(),
            language: record.language.clone(),
            explanation: record.explanation.clone(),
            status: TurnStatus::Complete,
            error: None,
            model: None,
            created_at: record.created_at,
        }
    }
}

#[derive(Debug)]
struct ActiveGeneration {
    handle: GenerationHandle,
    status: GenerationStatus,
}

/// Turns in submission order. Only the newest turn can be pending and
/// at most one generation is active at a time.
#[derive(Debug)]
pub struct Conversation {
    turns: Vec<ConversationTurn>,
    active: Option<ActiveGeneration>,
    default_language: String,
}

impl Conversation {
    pub fn new(default_language: &str) -> Self {
        Self {
            turns: Vec::new(),
            active: None,
            default_language: default_language.to_string(),
        }
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn turn(&self, id: Uuid) -> Option<&ConversationTurn> {
        self.turns.iter().find(|t| t.id == id)
    }

    pub fn active_handle(&self) -> Option<&GenerationHandle> {
        self.active.as_ref().map(|a| &a.handle)
    }

    pub fn status(&self) -> GenerationStatus {
        self.active
            .as_ref()
            .map(|a| a.status)
            .unwrap_or(GenerationStatus::Idle)
    }

    /// Start a new turn for `prompt` and return the handle of the
    /// generation that will fill it in.
    ///
    /// Any generation still in flight is cancelled and its turn removed
    /// before the new turn is appended.
    pub fn submit(&mut self, prompt: &str) -> Result<GenerationHandle, GenerateError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(GenerateError::InvalidInput);
        }

        if self.cancel_active() {
            tracing::info!("Superseded the previous generation");
        }

        let turn = ConversationTurn::pending(prompt, &self.default_language);
        let handle = GenerationHandle::new(turn.id);
        self.turns.push(turn);
        self.active = Some(ActiveGeneration {
            handle: handle.clone(),
            status: GenerationStatus::Requesting,
        });
        Ok(handle)
    }

    /// Cancel the active generation, if any, and drop its turn.
    pub fn cancel_active(&mut self) -> bool {
        let Some(active) = self.active.take() else {
            return false;
        };
        active.handle.cancel();
        self.remove_turn(active.handle.turn_id());
        true
    }

    /// Apply an event from a generation. Events for anything other than
    /// the active generation are ignored.
    ///
    /// Returns the finished turn when the event completes it.
    pub fn apply(&mut self, event: &GenerationEvent) -> Option<ConversationTurn> {
        let active = self.active.as_mut()?;
        if active.handle.id() != event.handle_id {
            tracing::debug!("Ignoring event from stale generation {}", event.handle_id);
            return None;
        }

        if let Some(next) = event.kind.status()
            && next != active.status
        {
            if !active.status.can_transition_to(next) {
                tracing::warn!(
                    "Unexpected transition from {:?} to {:?}",
                    active.status,
                    next
                );
            }
            active.status = next;
        }
        let turn_id = active.handle.turn_id();

        match &event.kind {
            GenerationEventKind::Requesting | GenerationEventKind::Fragment(_) => None,
            GenerationEventKind::Streaming { model } => {
                if let Some(turn) = self.pending_turn_mut(turn_id) {
                    turn.model = Some(model.clone());
                }
                None
            }
            GenerationEventKind::Updated(result) => {
                if let Some(turn) = self.pending_turn_mut(turn_id) {
                    turn.update(result);
                }
                None
            }
            GenerationEventKind::Completed { model, result } => {
                self.active = None;
                let turn = self.pending_turn_mut(turn_id)?;
                turn.update(result);
                turn.model = Some(model.clone());
                turn.status = TurnStatus::Complete;
                Some(turn.clone())
            }
            GenerationEventKind::Cancelled => {
                self.active = None;
                self.remove_turn(turn_id);
                None
            }
            GenerationEventKind::Failed(e) => {
                self.active = None;
                if let Some(turn) = self.pending_turn_mut(turn_id) {
                    turn.status = TurnStatus::Failed;
                    turn.error = Some(e.to_string());
                }
                None
            }
        }
    }

    /// Replace the conversation with a single completed turn loaded
    /// from history.
    pub fn restore(&mut self, record: &HistoryRecord) -> &ConversationTurn {
        self.cancel_active();
        self.turns.clear();
        self.turns.push(ConversationTurn::from(record));
        &self.turns[0]
    }

    pub fn clear(&mut self) {
        self.cancel_active();
        self.turns.clear();
    }

    fn pending_turn_mut(&mut self, id: Uuid) -> Option<&mut ConversationTurn> {
        self.turns
            .iter_mut()
            .find(|t| t.id == id && t.status == TurnStatus::Pending)
    }

    fn remove_turn(&mut self, id: Uuid) {
        self.turns.retain(|t| t.id != id);
    }
}
