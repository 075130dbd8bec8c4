//! One cancellable code generation request, from opening the
//! connection to the final extraction.
//!
//! A generation moves through
//! `Idle -> Requesting -> Streaming -> {Completed | Cancelled | Failed}`
//! and reports every step as a [`GenerationEvent`] so the owner of the
//! conversation can apply them from a single task.
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::assembler::StreamAssembler;
use super::extract::ExtractionResult;
use super::prompt::code_messages;
use crate::core::AppConfig;
use crate::openai::{CompletionRequest, FragmentStream, GenerateError, ModelClient};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum GenerationStatus {
    Idle,
    Requesting,
    Streaming,
    Completed,
    Cancelled,
    Failed,
}

impl GenerationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            GenerationStatus::Completed | GenerationStatus::Cancelled | GenerationStatus::Failed
        )
    }

    pub fn can_transition_to(&self, next: GenerationStatus) -> bool {
        use GenerationStatus::*;
        matches!(
            (self, next),
            (Idle, Requesting)
                | (Requesting, Streaming)
                // A response with no text at all
                | (Requesting, Completed)
                | (Streaming, Completed)
                | (Idle | Requesting | Streaming, Cancelled)
                | (Requesting | Streaming, Failed)
        )
    }
}

/// The live, cancellable unit of work for one request. Cloning shares
/// the cancellation signal.
#[derive(Clone, Debug)]
pub struct GenerationHandle {
    id: Uuid,
    turn_id: Uuid,
    token: CancellationToken,
}

impl GenerationHandle {
    pub fn new(turn_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            turn_id,
            token: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The conversation turn this generation fills in
    pub fn turn_id(&self) -> Uuid {
        self.turn_id
    }

    pub fn cancel(&self) {
        self.token.cancel()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

#[derive(Debug)]
pub enum GenerationEventKind {
    Requesting,
    /// The first fragment arrived from `model`
    Streaming { model: String },
    Fragment(String),
    /// Extraction over everything received so far
    Updated(ExtractionResult),
    Completed {
        model: String,
        result: ExtractionResult,
    },
    Cancelled,
    Failed(GenerateError),
}

impl GenerationEventKind {
    /// The status this event moves the generation into, if any
    pub fn status(&self) -> Option<GenerationStatus> {
        match self {
            GenerationEventKind::Requesting => Some(GenerationStatus::Requesting),
            GenerationEventKind::Streaming { .. } => Some(GenerationStatus::Streaming),
            GenerationEventKind::Completed { .. } => Some(GenerationStatus::Completed),
            GenerationEventKind::Cancelled => Some(GenerationStatus::Cancelled),
            GenerationEventKind::Failed(_) => Some(GenerationStatus::Failed),
            GenerationEventKind::Fragment(_) | GenerationEventKind::Updated(_) => None,
        }
    }
}

#[derive(Debug)]
pub struct GenerationEvent {
    pub handle_id: Uuid,
    pub kind: GenerationEventKind,
}

/// Generation parameters and the policies around a request.
#[derive(Clone, Debug)]
pub struct GenerationOptions {
    pub model: String,
    /// Tried once when `model` is rate limited
    pub fallback_model: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Total number of requests, including the fallback
    pub max_attempts: u32,
    pub retry_delay: Duration,
    /// Longest wait for the response, and between fragments once
    /// streaming
    pub stall_timeout: Duration,
    pub stream: bool,
    pub system_message: String,
    pub default_language: String,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            model: String::from("gpt-4.1-mini"),
            fallback_model: None,
            temperature: 0.5,
            max_tokens: 2048,
            max_attempts: 2,
            retry_delay: Duration::from_millis(3000),
            stall_timeout: Duration::from_secs(30),
            stream: true,
            system_message: String::from("You are a helpful AI coding assistant."),
            default_language: String::from("javascript"),
        }
    }
}

impl GenerationOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            model: config.model.clone(),
            fallback_model: config.fallback_model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_attempts: config.max_attempts,
            retry_delay: config.retry_delay,
            stall_timeout: config.stall_timeout,
            stream: true,
            system_message: config.system_message.clone(),
            default_language: config.default_language.clone(),
        }
    }

    /// Build the completion request for a user's prompt.
    pub fn request(&self, prompt: &str) -> Result<CompletionRequest, GenerateError> {
        let messages =
            code_messages(&self.system_message, prompt).map_err(|e| GenerateError::Model {
                status: None,
                message: format!("Failed to render prompt: {e}"),
            })?;
        Ok(CompletionRequest {
            model: self.model.clone(),
            messages,
            stream: self.stream,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        })
    }
}

struct Emitter {
    handle_id: Uuid,
    tx: mpsc::UnboundedSender<GenerationEvent>,
}

impl Emitter {
    fn emit(&self, kind: GenerationEventKind) {
        // The receiver going away means nobody is listening anymore,
        // which is not a reason to fail the generation
        let _ = self.tx.send(GenerationEvent {
            handle_id: self.handle_id,
            kind,
        });
    }
}

enum Response {
    Stream(FragmentStream),
    Whole(String),
}

/// Run a generation to a terminal status, reporting progress on `tx`.
///
/// Cancellation is checked while waiting on the connection and
/// between fragments. Dropping the in-flight request on cancellation
/// closes the connection.
pub async fn run_generation(
    client: Arc<dyn ModelClient>,
    request: CompletionRequest,
    options: GenerationOptions,
    handle: GenerationHandle,
    tx: mpsc::UnboundedSender<GenerationEvent>,
) -> GenerationStatus {
    let emitter = Emitter {
        handle_id: handle.id(),
        tx,
    };
    tracing::info!("Starting generation {} with model {}", handle.id(), request.model);
    emitter.emit(GenerationEventKind::Requesting);

    let outcome = tokio::select! {
        biased;
        _ = handle.cancelled() => Err(GenerateError::Cancelled),
        result = drive(client.as_ref(), &request, &options, &emitter) => result,
    };

    match outcome {
        Ok((model, result)) => {
            tracing::info!(
                "Generation {} completed with model {} ({} chars of code)",
                handle.id(),
                model,
                result.code_or_empty().len()
            );
            emitter.emit(GenerationEventKind::Completed { model, result });
            GenerationStatus::Completed
        }
        Err(GenerateError::Cancelled) => {
            tracing::info!("Generation {} cancelled", handle.id());
            emitter.emit(GenerationEventKind::Cancelled);
            GenerationStatus::Cancelled
        }
        Err(e) => {
            tracing::error!("Generation {} failed: {}", handle.id(), e);
            emitter.emit(GenerationEventKind::Failed(e));
            GenerationStatus::Failed
        }
    }
}

async fn drive(
    client: &dyn ModelClient,
    request: &CompletionRequest,
    options: &GenerationOptions,
    emitter: &Emitter,
) -> Result<(String, ExtractionResult), GenerateError> {
    let mut assembler = StreamAssembler::new(&options.default_language);
    let (model, response) = open_with_retries(client, request, options).await?;

    match response {
        Response::Whole(text) => {
            if !text.is_empty() {
                emitter.emit(GenerationEventKind::Streaming {
                    model: model.clone(),
                });
                let result = assembler.push(&text).clone();
                emitter.emit(GenerationEventKind::Fragment(text));
                emitter.emit(GenerationEventKind::Updated(result));
            }
        }
        Response::Stream(mut stream) => {
            let mut streaming = false;
            loop {
                let next = tokio::time::timeout(options.stall_timeout, stream.next())
                    .await
                    .map_err(|_| GenerateError::Stalled(options.stall_timeout))?;
                let Some(fragment) = next else {
                    break;
                };
                let fragment = fragment?;

                if !streaming {
                    streaming = true;
                    emitter.emit(GenerationEventKind::Streaming {
                        model: model.clone(),
                    });
                }
                let result = assembler.push(&fragment).clone();
                emitter.emit(GenerationEventKind::Fragment(fragment));
                emitter.emit(GenerationEventKind::Updated(result));
            }
        }
    }

    Ok((model, assembler.into_result()))
}

// Opens the request, retrying retryable failures while attempts
// remain. A rate limited primary model switches to the fallback model
// once.
async fn open_with_retries(
    client: &dyn ModelClient,
    request: &CompletionRequest,
    options: &GenerationOptions,
) -> Result<(String, Response), GenerateError> {
    let mut model = request.model.clone();
    let mut fell_back = false;
    let mut attempt = 1;

    loop {
        tracing::debug!("Attempt {} with model {}", attempt, model);
        let result = open(client, &request.with_model(&model), options).await;

        match result {
            Ok(response) => return Ok((model, response)),
            Err(e) if e.is_retryable() && attempt < options.max_attempts => {
                match (&e, &options.fallback_model) {
                    (GenerateError::RateLimited { .. }, Some(fallback)) if !fell_back => {
                        tracing::warn!(
                            "Model {} hit capacity. Falling back to {}...",
                            model,
                            fallback
                        );
                        model = fallback.clone();
                        fell_back = true;
                    }
                    _ => {
                        tracing::warn!("Attempt {} failed, retrying: {}", attempt, e);
                    }
                }
            }
            Err(e) => return Err(e),
        }

        attempt += 1;
        tokio::time::sleep(options.retry_delay).await;
    }
}

async fn open(
    client: &dyn ModelClient,
    request: &CompletionRequest,
    options: &GenerationOptions,
) -> Result<Response, GenerateError> {
    let response = async {
        if options.stream {
            client.stream(request).await.map(Response::Stream)
        } else {
            client.complete(request).await.map(Response::Whole)
        }
    };
    tokio::time::timeout(options.stall_timeout, response)
        .await
        .map_err(|_| GenerateError::Stalled(options.stall_timeout))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::testing::{Script, ScriptedClient};

    fn options() -> GenerationOptions {
        GenerationOptions {
            model: String::from("primary"),
            retry_delay: Duration::ZERO,
            stall_timeout: Duration::from_secs(5),
            ..GenerationOptions::default()
        }
    }

    async fn run(
        client: ScriptedClient,
        options: GenerationOptions,
    ) -> (GenerationStatus, Vec<GenerationEventKind>, Arc<ScriptedClient>) {
        let client = Arc::new(client);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let request = options.request("a hello world").unwrap();
        let handle = GenerationHandle::new(Uuid::new_v4());
        let status = run_generation(client.clone(), request, options, handle, tx).await;

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event.kind);
        }
        (status, events, client)
    }

    #[test]
    fn test_status_transitions() {
        use GenerationStatus::*;
        assert!(Idle.can_transition_to(Requesting));
        assert!(Requesting.can_transition_to(Streaming));
        assert!(Requesting.can_transition_to(Completed));
        assert!(Streaming.can_transition_to(Completed));
        assert!(Streaming.can_transition_to(Cancelled));
        assert!(Requesting.can_transition_to(Failed));

        assert!(!Completed.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Streaming));
        assert!(!Failed.can_transition_to(Completed));
        assert!(!Streaming.can_transition_to(Requesting));
        assert!(!Idle.can_transition_to(Streaming));

        assert!(Completed.is_terminal());
        assert!(Cancelled.is_terminal());
        assert!(Failed.is_terminal());
        assert!(!Streaming.is_terminal());
    }

    #[test]
    fn test_request_from_options() {
        let request = options().request("a todo list").unwrap();
        assert_eq!(request.model, "primary");
        assert!(request.stream);
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[1].content, "Generate code for: a todo list");
    }

    #[tokio::test]
    async fn test_completes_with_final_extraction() {
        let client = ScriptedClient::new(vec![Script::Fragments(vec![
            "Sure:\n```py\n",
            "print('hi')\n",
            "```\nThat prints hi.",
        ])]);

        let (status, events, _) = run(client, options()).await;

        assert_eq!(status, GenerationStatus::Completed);
        assert!(matches!(events[0], GenerationEventKind::Requesting));
        assert!(
            matches!(&events[1], GenerationEventKind::Streaming { model } if model == "primary")
        );
        let fragments: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                GenerationEventKind::Fragment(f) => Some(f.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(fragments.concat(), "Sure:\n```py\nprint('hi')\n```\nThat prints hi.");

        match events.last() {
            Some(GenerationEventKind::Completed { model, result }) => {
                assert_eq!(model, "primary");
                assert_eq!(result.code.as_deref(), Some("print('hi')"));
                assert_eq!(result.language.as_deref(), Some("py"));
                assert_eq!(result.explanation, "Sure:\n\nThat prints hi.");
            }
            other => panic!("Expected Completed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_response_completes_without_streaming() {
        let client = ScriptedClient::new(vec![Script::Fragments(vec![])]);
        let (status, events, _) = run(client, options()).await;

        assert_eq!(status, GenerationStatus::Completed);
        assert_eq!(events.len(), 2);
        match &events[1] {
            GenerationEventKind::Completed { result, .. } => assert!(!result.has_code()),
            other => panic!("Expected Completed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rate_limited_falls_back_once() {
        let client = ScriptedClient::new(vec![
            Script::Fail(GenerateError::RateLimited {
                model: String::from("primary"),
            }),
            Script::Fragments(vec!["```js\nfallback()\n```"]),
        ]);
        let options = GenerationOptions {
            fallback_model: Some(String::from("lesser")),
            ..options()
        };

        let (status, events, client) = run(client, options).await;

        assert_eq!(status, GenerationStatus::Completed);
        assert_eq!(client.models(), vec!["primary", "lesser"]);
        match events.last() {
            Some(GenerationEventKind::Completed { model, result }) => {
                assert_eq!(model, "lesser");
                assert_eq!(result.code.as_deref(), Some("fallback()"));
            }
            other => panic!("Expected Completed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rate_limited_fallback_exhausts_attempts() {
        let client = ScriptedClient::new(vec![
            Script::Fail(GenerateError::RateLimited {
                model: String::from("primary"),
            }),
            Script::Fail(GenerateError::RateLimited {
                model: String::from("lesser"),
            }),
            Script::Fragments(vec!["never requested"]),
        ]);
        let options = GenerationOptions {
            fallback_model: Some(String::from("lesser")),
            max_attempts: 2,
            ..options()
        };

        let (status, events, client) = run(client, options).await;

        assert_eq!(status, GenerationStatus::Failed);
        assert_eq!(client.models(), vec!["primary", "lesser"]);
        assert!(matches!(
            events.last(),
            Some(GenerationEventKind::Failed(GenerateError::RateLimited { model })) if model == "lesser"
        ));
    }

    #[tokio::test]
    async fn test_rate_limited_without_fallback_retries_same_model() {
        let client = ScriptedClient::new(vec![
            Script::Fail(GenerateError::RateLimited {
                model: String::from("primary"),
            }),
            Script::Fragments(vec!["ok"]),
        ]);

        let (status, _, client) = run(client, options()).await;

        assert_eq!(status, GenerationStatus::Completed);
        assert_eq!(client.models(), vec!["primary", "primary"]);
    }

    #[tokio::test]
    async fn test_single_attempt_does_not_retry() {
        let client = ScriptedClient::new(vec![
            Script::Fail(GenerateError::TransientNetwork(String::from("reset"))),
            Script::Fragments(vec!["never requested"]),
        ]);
        let options = GenerationOptions {
            max_attempts: 1,
            ..options()
        };

        let (status, _, client) = run(client, options).await;

        assert_eq!(status, GenerationStatus::Failed);
        assert_eq!(client.models(), vec!["primary"]);
    }

    #[tokio::test]
    async fn test_auth_error_is_not_retried() {
        let client = ScriptedClient::new(vec![
            Script::Fail(GenerateError::Auth(String::from("Invalid API key"))),
            Script::Fragments(vec!["never requested"]),
        ]);
        let options = GenerationOptions {
            fallback_model: Some(String::from("lesser")),
            ..options()
        };

        let (status, events, client) = run(client, options).await;

        assert_eq!(status, GenerationStatus::Failed);
        assert_eq!(client.models(), vec!["primary"]);
        assert!(matches!(
            events.last(),
            Some(GenerationEventKind::Failed(GenerateError::Auth(_)))
        ));
    }

    #[tokio::test]
    async fn test_error_mid_stream_fails() {
        let client = ScriptedClient::new(vec![Script::FragmentsThenError(
            vec!["partial"],
            GenerateError::TransientNetwork(String::from("connection reset")),
        )]);

        let (status, events, client) = run(client, options()).await;

        // Once streaming, errors are not retried
        assert_eq!(status, GenerationStatus::Failed);
        assert_eq!(client.models(), vec!["primary"]);
        assert!(matches!(
            events.last(),
            Some(GenerationEventKind::Failed(GenerateError::TransientNetwork(_)))
        ));
    }

    #[tokio::test]
    async fn test_stalled_stream_fails() {
        let client = ScriptedClient::new(vec![Script::Stall(vec!["partial"])]);
        let options = GenerationOptions {
            stall_timeout: Duration::from_millis(50),
            ..options()
        };

        let (status, events, _) = run(client, options).await;

        assert_eq!(status, GenerationStatus::Failed);
        assert!(matches!(
            events.last(),
            Some(GenerationEventKind::Failed(GenerateError::Stalled(_)))
        ));
    }

    #[tokio::test]
    async fn test_cancel_while_streaming() {
        let client = Arc::new(ScriptedClient::new(vec![Script::Stall(vec!["```js\n"])]));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let request = options().request("a hello world").unwrap();
        let handle = GenerationHandle::new(Uuid::new_v4());

        let task = tokio::spawn(run_generation(
            client,
            request,
            options(),
            handle.clone(),
            tx,
        ));

        // Wait until the first fragment has been delivered
        loop {
            let event = rx.recv().await.expect("Channel closed early");
            if matches!(event.kind, GenerationEventKind::Fragment(_)) {
                break;
            }
        }
        handle.cancel();

        let status = task.await.unwrap();
        assert_eq!(status, GenerationStatus::Cancelled);
        assert!(handle.is_cancelled());

        let mut last = None;
        while let Ok(event) = rx.try_recv() {
            last = Some(event.kind);
        }
        assert!(matches!(last, Some(GenerationEventKind::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let client = ScriptedClient::new(vec![Script::Fragments(vec!["never read"])]);
        let client = Arc::new(client);
        let (tx, _rx) = mpsc::unbounded_channel();
        let handle = GenerationHandle::new(Uuid::new_v4());
        handle.cancel();

        let status = run_generation(
            client.clone(),
            options().request("x").unwrap(),
            options(),
            handle,
            tx,
        )
        .await;

        assert_eq!(status, GenerationStatus::Cancelled);
        assert!(client.models().is_empty());
    }

    #[tokio::test]
    async fn test_whole_response_mode() {
        let client = ScriptedClient::new(vec![Script::Fragments(vec![
            "Here:\n```go\n",
            "fmt.Println(1)\n```",
        ])]);
        let options = GenerationOptions {
            stream: false,
            ..options()
        };

        let (status, events, client) = run(client, options).await;

        assert_eq!(status, GenerationStatus::Completed);
        assert_eq!(client.completions(), 1);
        let fragments = events
            .iter()
            .filter(|e| matches!(e, GenerationEventKind::Fragment(_)))
            .count();
        assert_eq!(fragments, 1);
        match events.last() {
            Some(GenerationEventKind::Completed { result, .. }) => {
                assert_eq!(result.code.as_deref(), Some("fmt.Println(1)"));
                assert_eq!(result.language.as_deref(), Some("go"));
            }
            other => panic!("Expected Completed, got {:?}", other),
        }
    }
}
