use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::stream;
use futures_util::StreamExt;

use crate::openai::{CompletionRequest, FragmentStream, GenerateError, ModelClient};

/// What the next request to a [`ScriptedClient`] returns
pub enum Script {
    Fragments(Vec<&'static str>),
    /// Yields the fragments then never produces anything else
    Stall(Vec<&'static str>),
    FragmentsThenError(Vec<&'static str>, GenerateError),
    Fail(GenerateError),
}

/// A model client that plays back canned responses in order and
/// records which model each request was addressed to.
pub struct ScriptedClient {
    scripts: Mutex<VecDeque<Script>>,
    models: Mutex<Vec<String>>,
    completions: Mutex<usize>,
}

impl ScriptedClient {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            models: Mutex::new(Vec::new()),
            completions: Mutex::new(0),
        }
    }

    pub fn models(&self) -> Vec<String> {
        self.models.lock().unwrap().clone()
    }

    pub fn completions(&self) -> usize {
        *self.completions.lock().unwrap()
    }

    fn next(&self, request: &CompletionRequest) -> Script {
        self.models.lock().unwrap().push(request.model.clone());
        self.scripts
            .lock()
            .unwrap()
            .pop_front()
            .expect("No scripted response left")
    }
}

fn owned(fragments: Vec<&'static str>) -> Vec<Result<String, GenerateError>> {
    fragments.into_iter().map(|f| Ok(f.to_string())).collect()
}

#[async_trait]
impl ModelClient for ScriptedClient {
    async fn stream(&self, request: &CompletionRequest) -> Result<FragmentStream, GenerateError> {
        match self.next(request) {
            Script::Fragments(fragments) => Ok(Box::pin(stream::iter(owned(fragments)))),
            Script::Stall(fragments) => Ok(Box::pin(
                stream::iter(owned(fragments)).chain(stream::pending()),
            )),
            Script::FragmentsThenError(fragments, e) => Ok(Box::pin(
                stream::iter(owned(fragments)).chain(stream::once(async move { Err(e) })),
            )),
            Script::Fail(e) => Err(e),
        }
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, GenerateError> {
        *self.completions.lock().unwrap() += 1;
        match self.next(request) {
            Script::Fragments(fragments) => Ok(fragments.concat()),
            Script::Stall(_) => futures::future::pending().await,
            Script::FragmentsThenError(_, e) | Script::Fail(e) => Err(e),
        }
    }
}
