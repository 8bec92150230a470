//! One chat tab: history, running cost and at most one streaming session.
//!
//! The controller is the only writer of its history. Session tasks report
//! through the controller's channel; the owner pulls events with
//! [`ChatSessionController::recv_event`] / [`ChatSessionController::next_update`]
//! and every state change happens synchronously in
//! [`ChatSessionController::handle_event`]. Events carrying an id other than
//! the active session's are stale and dropped.

use std::collections::VecDeque;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::core::chat_stream::{CompletionProvider, CompletionRequest};
use crate::core::config::Settings;
use crate::core::cost::{CostAccountant, CostEstimator, TokenDirection};
use crate::core::history::ConversationHistory;
use crate::core::message::{Message, TranscriptEntry};
use crate::core::session::{
    session_channel, FinishReason, SessionError, SessionEvent, SessionEventReceiver,
    SessionEventSender, StopOutcome, StreamingSession,
};
use crate::core::stream_errors::ClassifiedError;
use crate::utils::logging::TranscriptLog;

pub const STATUS_READY: &str = "Ready";
pub const STATUS_RECEIVING: &str = "Receiving message...";
pub const STATUS_CLEARED: &str = "Chat cleared";

pub const LENGTH_WARNING: &str = "Warning: The response may have been truncated due to reaching the maximum token limit. Increase your max tokens in the settings (max-tokens).";

const TIMESTAMP_FORMAT: &str = "%H:%M:%S";

/// Collaborators injected into every controller of a workspace.
#[derive(Clone)]
pub struct ChatServices {
    pub provider: Arc<dyn CompletionProvider>,
    pub costs: Arc<dyn CostEstimator>,
    pub settings: Arc<Settings>,
    pub transcript_log: Option<Arc<TranscriptLog>>,
}

impl ChatServices {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        costs: Arc<dyn CostEstimator>,
        settings: Settings,
    ) -> Self {
        Self {
            provider,
            costs,
            settings: Arc::new(settings),
            transcript_log: None,
        }
    }

    pub fn with_transcript_log(mut self, log: Arc<TranscriptLog>) -> Self {
        self.transcript_log = Some(log);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControllerUpdate {
    /// `content` is the full reply so far, `delta` the part just received.
    Chunk { delta: String, content: String },
    Completed { finish_reason: FinishReason },
    Cancelled,
    Failed(ClassifiedError),
}

impl ControllerUpdate {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ControllerUpdate::Chunk { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Blank input; nothing happened.
    Ignored,
    Started { session_id: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerError {
    Busy,
    InvalidIndex(usize),
    NotUserMessage(usize),
    NoModelSelected,
    ShutDown,
    Session(SessionError),
}

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerError::Busy => write!(
                f,
                "Cannot edit while an AI response is being processed. Please wait until it completes."
            ),
            ControllerError::InvalidIndex(index) => write!(f, "No message at position {index}"),
            ControllerError::NotUserMessage(index) => {
                write!(f, "Message {index} is not a user message")
            }
            ControllerError::NoModelSelected => write!(f, "Please select a model first."),
            ControllerError::ShutDown => write!(f, "This chat has been closed"),
            ControllerError::Session(err) => write!(f, "Could not start the request: {err}"),
        }
    }
}

impl Error for ControllerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ControllerError::Session(err) => Some(err),
            _ => None,
        }
    }
}

impl From<SessionError> for ControllerError {
    fn from(err: SessionError) -> Self {
        ControllerError::Session(err)
    }
}

pub struct ChatSessionController {
    services: ChatServices,
    history: ConversationHistory,
    costs: CostAccountant,
    model: String,
    active: Option<StreamingSession>,
    next_session_id: u64,
    events_tx: SessionEventSender,
    events_rx: SessionEventReceiver,
    status: String,
    last_error: Option<ClassifiedError>,
    unsent_prompt: Option<String>,
    outbox: VecDeque<ControllerUpdate>,
    shut_down: bool,
}

impl ChatSessionController {
    pub fn new(services: ChatServices, model: impl Into<String>) -> Self {
        let (events_tx, events_rx) = session_channel();
        Self {
            services,
            history: ConversationHistory::new(),
            costs: CostAccountant::new(),
            model: model.into(),
            active: None,
            next_session_id: 1,
            events_tx,
            events_rx,
            status: STATUS_READY.to_string(),
            last_error: None,
            unsent_prompt: None,
            outbox: VecDeque::new(),
            shut_down: false,
        }
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub fn costs(&self) -> &CostAccountant {
        &self.costs
    }

    pub fn total_cost(&self) -> f64 {
        self.costs.total()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Applies to the next request; a running one keeps its model.
    pub fn set_model(&mut self, model: impl Into<String>) {
        self.model = model.into();
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn last_error(&self) -> Option<&ClassifiedError> {
        self.last_error.as_ref()
    }

    /// A user turn that was rolled back because it never got a reply.
    pub fn unsent_prompt(&self) -> Option<&str> {
        self.unsent_prompt.as_deref()
    }

    pub fn is_streaming(&self) -> bool {
        self.active.as_ref().is_some_and(StreamingSession::is_running)
    }

    pub fn active_session_id(&self) -> Option<u64> {
        self.active.as_ref().map(StreamingSession::id)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    fn timestamp(&self) -> Option<String> {
        self.services
            .settings
            .show_timestamps
            .then(|| chrono::Local::now().format(TIMESTAMP_FORMAT).to_string())
    }

    fn log_message(&self, message: &Message) {
        if let Some(log) = &self.services.transcript_log {
            if let Err(err) = log.log_message(message) {
                warn!(path = %log.path().display(), error = %err, "Failed to write transcript log");
            }
        }
    }

    fn rewrite_log(&self) {
        if let Some(log) = &self.services.transcript_log {
            if let Err(err) = log.rewrite(self.history.messages()) {
                warn!(path = %log.path().display(), error = %err, "Failed to rewrite transcript log");
            }
        }
    }

    fn fail_status(&mut self, message: &str) {
        self.status = format!("Error: {message}");
    }

    /// Send a user message and start streaming the reply. A running session
    /// is stopped first.
    pub async fn send(&mut self, text: &str) -> Result<SendOutcome, ControllerError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(SendOutcome::Ignored);
        }
        if self.shut_down {
            return Err(ControllerError::ShutDown);
        }
        if self.model.trim().is_empty() {
            let err = ControllerError::NoModelSelected;
            self.fail_status(&err.to_string());
            return Err(err);
        }

        self.stop_streaming().await;

        let timestamp = self.timestamp();
        self.history.push_user(text, timestamp);
        if let Some(message) = self.history.messages().last() {
            self.log_message(message);
        }
        self.unsent_prompt = None;
        self.last_error = None;
        let input_cost = self.costs.accrue(
            self.services.costs.as_ref(),
            &self.model,
            text,
            TokenDirection::Input,
        );
        debug!(model = %self.model, input_cost, "User message appended");

        self.start_session()
    }

    fn start_session(&mut self) -> Result<SendOutcome, ControllerError> {
        let session_id = self.next_session_id;
        self.next_session_id += 1;

        let request = CompletionRequest {
            model: self.model.clone(),
            messages: self.history.to_api_messages(),
            max_tokens: self.services.settings.max_tokens_limit(),
        };
        let mut session = StreamingSession::new(session_id);
        if let Err(err) = session.start(
            self.services.provider.clone(),
            request,
            self.events_tx.clone(),
        ) {
            self.unsent_prompt = self.history.pop_unanswered_user().map(|m| m.content);
            self.fail_status(&err.to_string());
            return Err(err.into());
        }

        self.active = Some(session);
        self.status = STATUS_RECEIVING.to_string();
        Ok(SendOutcome::Started { session_id })
    }

    /// Wait for the next raw session event.
    ///
    /// Cancel-safe, so it can sit in a `select!` next to other sources.
    pub async fn recv_event(&mut self) -> (SessionEvent, u64) {
        match self.events_rx.recv().await {
            Some(event) => event,
            // The controller holds a sender, so the channel never closes.
            None => std::future::pending().await,
        }
    }

    /// Fold one session event into the controller state.
    pub fn handle_event(&mut self, event: SessionEvent, session_id: u64) -> Option<ControllerUpdate> {
        let Some(session) = self
            .active
            .as_mut()
            .filter(|session| session.id() == session_id)
        else {
            debug!(session_id, "Discarding event from a stale session");
            return None;
        };
        if !session.apply(&event) {
            return None;
        }

        match event {
            SessionEvent::Chunk(delta) => Some(ControllerUpdate::Chunk {
                delta,
                content: session.text().to_string(),
            }),
            SessionEvent::Completed(finish_reason) => Some(self.finish_turn(Some(finish_reason))),
            SessionEvent::Cancelled => Some(self.finish_turn(None)),
            SessionEvent::Errored(error) => Some(self.fail_turn(error)),
        }
    }

    /// Updates produced outside `handle_event`, e.g. by a stop.
    pub fn take_pending_updates(&mut self) -> Vec<ControllerUpdate> {
        self.outbox.drain(..).collect()
    }

    pub async fn next_update(&mut self) -> ControllerUpdate {
        loop {
            if let Some(update) = self.outbox.pop_front() {
                return update;
            }
            let (event, session_id) = self.recv_event().await;
            if let Some(update) = self.handle_event(event, session_id) {
                return update;
            }
        }
    }

    /// Process events until no session is running; returns every update.
    pub async fn wait_for_turn(&mut self) -> Vec<ControllerUpdate> {
        let mut updates = self.take_pending_updates();
        while self.active.is_some() {
            let (event, session_id) = self.recv_event().await;
            if let Some(update) = self.handle_event(event, session_id) {
                updates.push(update);
            }
        }
        updates
    }

    /// `None` finish reason means the turn was cancelled.
    fn finish_turn(&mut self, finish_reason: Option<FinishReason>) -> ControllerUpdate {
        let Some(session) = self.active.take() else {
            return ControllerUpdate::Cancelled;
        };
        let reply = session.text().to_string();
        let model = session.model().to_string();

        if reply.is_empty() {
            if self.history.awaiting_reply() {
                self.unsent_prompt = self.history.pop_unanswered_user().map(|m| m.content);
            }
        } else {
            let output_cost = self.costs.accrue(
                self.services.costs.as_ref(),
                &model,
                &reply,
                TokenDirection::Output,
            );
            if self.history.awaiting_reply() {
                let timestamp = self.timestamp();
                self.history
                    .push_assistant(reply, model.as_str(), timestamp.clone());
                if let Some(message) = self.history.messages().last() {
                    self.log_message(message);
                }
                if finish_reason == Some(FinishReason::Length) {
                    self.history.push_notice(LENGTH_WARNING, timestamp);
                    if let Some(message) = self.history.messages().last() {
                        self.log_message(message);
                    }
                }
            } else {
                debug!(session_id = session.id(), "History changed while streaming; reply not appended");
            }
            debug!(session_id = session.id(), output_cost, "Assistant turn finished");
        }

        self.status = STATUS_READY.to_string();
        match finish_reason {
            Some(finish_reason) => ControllerUpdate::Completed { finish_reason },
            None => ControllerUpdate::Cancelled,
        }
    }

    fn fail_turn(&mut self, error: ClassifiedError) -> ControllerUpdate {
        let session_id = self.active.take().map(|session| session.id());
        if self.history.awaiting_reply() {
            self.unsent_prompt = self.history.pop_unanswered_user().map(|m| m.content);
        }
        warn!(
            session_id = ?session_id,
            kind = error.kind.as_str(),
            model = %error.model,
            "Completion failed"
        );
        self.fail_status(&error.user_message());
        self.last_error = Some(error.clone());
        ControllerUpdate::Failed(error)
    }

    /// Stop the running session, waiting up to the grace period before
    /// aborting it. Whatever it streamed before the stop is kept.
    pub async fn stop_streaming(&mut self) -> Option<StopOutcome> {
        let session = self.active.as_mut()?;
        let session_id = session.id();
        let outcome = session.stop().await;

        while let Ok((event, event_session)) = self.events_rx.try_recv() {
            if let Some(update) = self.handle_event(event, event_session) {
                self.outbox.push_back(update);
            }
        }
        if self.active_session_id() == Some(session_id) {
            if let Some(session) = self.active.as_mut() {
                session.mark_cancelled();
            }
            let update = self.finish_turn(None);
            self.outbox.push_back(update);
        }
        debug!(session_id, outcome = ?outcome, "Streaming stopped");
        Some(outcome)
    }

    fn ensure_editable(&self, index: usize) -> Result<&Message, ControllerError> {
        if self.is_streaming() {
            return Err(ControllerError::Busy);
        }
        let message = self
            .history
            .get(index)
            .ok_or(ControllerError::InvalidIndex(index))?;
        if !message.is_user() {
            return Err(ControllerError::NotUserMessage(index));
        }
        Ok(message)
    }

    /// Replace the user message at `index` and everything after it with
    /// `new_text`, then request a fresh reply.
    pub async fn edit_message(
        &mut self,
        index: usize,
        new_text: &str,
    ) -> Result<SendOutcome, ControllerError> {
        self.ensure_editable(index)?;
        if new_text.trim().is_empty() {
            return Ok(SendOutcome::Ignored);
        }
        self.history.truncate(index);
        self.rewrite_log();
        debug!(index, remaining = self.history.len(), "History truncated for edit");
        self.send(new_text).await
    }

    pub async fn resend_message(&mut self, index: usize) -> Result<SendOutcome, ControllerError> {
        let content = self.ensure_editable(index)?.content.clone();
        self.edit_message(index, &content).await
    }

    /// Drop the history and reset the cost. A running session keeps going;
    /// its reply is discarded when it finishes.
    pub fn clear(&mut self) {
        self.history.clear();
        self.costs.reset();
        self.unsent_prompt = None;
        self.last_error = None;
        self.status = STATUS_CLEARED.to_string();
        self.rewrite_log();
    }

    /// Stop any running session. Safe to call more than once.
    pub async fn shutdown(&mut self) {
        if self.shut_down && self.active.is_none() {
            return;
        }
        self.stop_streaming().await;
        self.shut_down = true;
        info!(model = %self.model, messages = self.history.len(), "Chat closed");
    }

    /// Replace the history with an imported transcript. Entries with an
    /// unknown role are skipped. Adopts the model of the last assistant
    /// message that names one.
    pub fn load_transcript(&mut self, entries: Vec<TranscriptEntry>) -> Result<usize, ControllerError> {
        if self.is_streaming() {
            return Err(ControllerError::Busy);
        }
        let messages: Vec<Message> = entries
            .into_iter()
            .filter_map(|entry| match Message::try_from(entry) {
                Ok(message) => Some(message),
                Err(err) => {
                    warn!(error = %err, "Skipping transcript entry");
                    None
                }
            })
            .collect();
        self.history = ConversationHistory::from_messages(messages);
        if let Some(model) = self.history.last_assistant_model() {
            self.model = model.to_string();
        }
        self.status = STATUS_READY.to_string();
        Ok(self.history.len())
    }

    pub fn export_transcript(&self) -> Vec<TranscriptEntry> {
        self.history.to_transcript()
    }

    #[cfg(test)]
    pub(crate) fn events_sender(&self) -> SessionEventSender {
        self.events_tx.clone()
    }
}
