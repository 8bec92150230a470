//! Fixtures shared by the session, controller and workspace tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::stream;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::api::ChatMessage;
use crate::core::chat_stream::{CompletionProvider, CompletionRequest, EnvelopeStream, ProviderError};
use crate::core::config::Settings;
use crate::core::controller::ChatServices;
use crate::core::cost::{estimate_tokens_from_chars, CostEstimator, ModelPrice};
use crate::core::workspace::TITLE_PROMPT_PREFIX;

pub type ScriptFeed = mpsc::UnboundedSender<Result<Value, ProviderError>>;

/// One scripted provider response.
pub enum Script {
    /// Yields every envelope right away, then ends.
    Immediate(Vec<Value>),
    /// Yields envelopes as the test sends them; ends when the feed is dropped.
    Gated(mpsc::UnboundedReceiver<Result<Value, ProviderError>>),
    /// Fails before the first envelope.
    OpenFailure(ProviderError),
}

pub fn gated_script() -> (Script, ScriptFeed) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Script::Gated(rx), tx)
}

pub fn chunk(text: &str) -> Value {
    json!({"choices": [{"delta": {"content": text}}]})
}

pub fn finish(reason: &str) -> Value {
    json!({"choices": [{"delta": {}, "finish_reason": reason}]})
}

pub fn user_request(model: &str, prompt: &str) -> CompletionRequest {
    CompletionRequest {
        model: model.to_string(),
        messages: vec![ChatMessage::user(prompt)],
        max_tokens: Some(64),
    }
}

/// Provider that replays scripts in order. Title requests draw from their own
/// queue so they never consume a chat script; with no title script queued
/// they finish without text.
#[derive(Default)]
pub struct ScriptedProvider {
    scripts: Mutex<VecDeque<Script>>,
    title_scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            ..Self::default()
        })
    }

    pub fn push(&self, script: Script) {
        self.scripts.lock().unwrap().push_back(script);
    }

    pub fn push_title(&self, script: Script) {
        self.title_scripts.lock().unwrap().push_back(script);
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn chat_requests(&self) -> Vec<CompletionRequest> {
        self.requests()
            .into_iter()
            .filter(|request| !is_title_request(request))
            .collect()
    }
}

fn is_title_request(request: &CompletionRequest) -> bool {
    request
        .messages
        .last()
        .is_some_and(|message| message.content.starts_with(TITLE_PROMPT_PREFIX))
}

fn into_stream(script: Script) -> Result<EnvelopeStream, ProviderError> {
    match script {
        Script::Immediate(envelopes) => Ok(Box::pin(stream::iter(
            envelopes.into_iter().map(Ok).collect::<Vec<_>>(),
        ))),
        Script::Gated(rx) => Ok(Box::pin(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        }))),
        Script::OpenFailure(err) => Err(err),
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    async fn stream_completion(
        &self,
        request: &CompletionRequest,
    ) -> Result<EnvelopeStream, ProviderError> {
        self.requests.lock().unwrap().push(request.clone());
        if is_title_request(request) {
            let script = self.title_scripts.lock().unwrap().pop_front();
            return into_stream(script.unwrap_or(Script::Immediate(Vec::new())));
        }
        let script = self.scripts.lock().unwrap().pop_front();
        match script {
            Some(script) => into_stream(script),
            None => Err(ProviderError::Api("no scripted response left".into())),
        }
    }
}

/// Token counts looked up by exact text, with a single price for every model.
pub struct FixedEstimator {
    tokens: HashMap<String, u64>,
    price: Option<ModelPrice>,
}

impl FixedEstimator {
    pub fn new(price: Option<ModelPrice>) -> Self {
        Self {
            tokens: HashMap::new(),
            price,
        }
    }

    pub fn with_tokens(mut self, text: &str, tokens: u64) -> Self {
        self.tokens.insert(text.to_string(), tokens);
        self
    }
}

impl CostEstimator for FixedEstimator {
    fn estimate_tokens(&self, _model: &str, text: &str) -> u64 {
        self.tokens
            .get(text)
            .copied()
            .unwrap_or_else(|| estimate_tokens_from_chars(text))
    }

    fn price(&self, _model: &str) -> Option<ModelPrice> {
        self.price
    }
}

pub fn test_settings() -> Settings {
    Settings {
        show_timestamps: false,
        ..Settings::default()
    }
}

pub fn test_services(provider: Arc<ScriptedProvider>) -> ChatServices {
    ChatServices::new(provider, Arc::new(FixedEstimator::new(None)), test_settings())
}

pub fn priced_services(provider: Arc<ScriptedProvider>, estimator: FixedEstimator) -> ChatServices {
    ChatServices::new(provider, Arc::new(estimator), test_settings())
}
