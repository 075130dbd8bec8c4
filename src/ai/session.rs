//! A code generation session: owns the conversation, spawns a task per
//! generation and applies their events one at a time.
use std::sync::Arc;

use tokio::sync::mpsc;

use super::conversation::{Conversation, ConversationTurn};
use super::generation::{GenerationEvent, GenerationHandle, GenerationOptions, run_generation};
use crate::auth::AuthProvider;
use crate::history::{HistoryRecord, HistoryStore, NewHistoryRecord};
use crate::openai::{GenerateError, ModelClient};

pub struct CodeSession {
    client: Arc<dyn ModelClient>,
    options: GenerationOptions,
    conversation: Conversation,
    auth: Arc<dyn AuthProvider>,
    history: Arc<dyn HistoryStore>,
    last_saved: Option<HistoryRecord>,
    tx: mpsc::UnboundedSender<GenerationEvent>,
    rx: mpsc::UnboundedReceiver<GenerationEvent>,
}

impl CodeSession {
    pub fn new(
        client: Arc<dyn ModelClient>,
        options: GenerationOptions,
        auth: Arc<dyn AuthProvider>,
        history: Arc<dyn HistoryStore>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            conversation: Conversation::new(&options.default_language),
            client,
            options,
            auth,
            history,
            last_saved: None,
            tx,
            rx,
        }
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn conversation_mut(&mut self) -> &mut Conversation {
        &mut self.conversation
    }

    pub fn options(&self) -> &GenerationOptions {
        &self.options
    }

    pub fn auth(&self) -> &dyn AuthProvider {
        self.auth.as_ref()
    }

    pub fn history(&self) -> &dyn HistoryStore {
        self.history.as_ref()
    }

    /// The record written for the most recent completed turn
    pub fn last_saved(&self) -> Option<&HistoryRecord> {
        self.last_saved.as_ref()
    }

    /// Start generating code for `prompt`, superseding any generation
    /// still in flight.
    pub fn submit(&mut self, prompt: &str) -> Result<GenerationHandle, GenerateError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(GenerateError::InvalidInput);
        }
        let request = self.options.request(prompt)?;
        let handle = self.conversation.submit(prompt)?;
        self.last_saved = None;

        tokio::spawn(run_generation(
            self.client.clone(),
            request,
            self.options.clone(),
            handle.clone(),
            self.tx.clone(),
        ));
        Ok(handle)
    }

    pub fn cancel(&mut self) -> bool {
        self.conversation.cancel_active()
    }

    /// Wait for the next event of the active generation and apply it.
    /// Returns `None` when nothing is generating.
    pub async fn next_event(&mut self) -> Option<GenerationEvent> {
        let event = self.recv_event().await?;
        self.apply_event(&event).await;
        Some(event)
    }

    /// Wait for the next event of the active generation without
    /// applying it. Cancel safe, so it can be raced against other
    /// futures in `tokio::select!`.
    pub async fn recv_event(&mut self) -> Option<GenerationEvent> {
        loop {
            let handle_id = self.conversation.active_handle()?.id();
            let event = self.rx.recv().await?;
            if event.handle_id == handle_id {
                return Some(event);
            }
            tracing::debug!("Dropping event from stale generation {}", event.handle_id);
        }
    }

    /// Apply an event to the conversation, saving the turn to history
    /// when the event completes it.
    pub async fn apply_event(&mut self, event: &GenerationEvent) {
        if let Some(turn) = self.conversation.apply(event) {
            self.persist(&turn).await;
        }
    }

    /// Drive the active generation to the end. Returns its turn, or
    /// `None` if it was cancelled or nothing was generating.
    pub async fn wait(&mut self) -> Option<ConversationTurn> {
        let turn_id = self.conversation.active_handle()?.turn_id();
        while self.next_event().await.is_some() {}
        self.conversation.turn(turn_id).cloned()
    }

    async fn persist(&mut self, turn: &ConversationTurn) {
        let Some(user) = self.auth.current_user() else {
            tracing::debug!("Not signed in, skipping history");
            return;
        };
        if turn.code.is_empty() {
            tracing::debug!("No code generated, skipping history");
            return;
        }
        match self
            .history
            .append_record(&user.id, NewHistoryRecord::from(turn))
            .await
        {
            Ok(record) => {
                tracing::info!("Saved generation to history {}", record.id);
                self.last_saved = Some(record);
            }
            // The generated code is still shown when saving fails
            Err(e) => tracing::error!("Code generated but failed to save to history: {}", e),
        }
    }
}

impl Drop for CodeSession {
    fn drop(&mut self) {
        self.conversation.cancel_active();
    }
}
