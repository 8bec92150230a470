//! One cancelable streaming completion request.
//!
//! A [`StreamingSession`] is owned by a controller. Starting it spawns a
//! background task that opens the provider stream and reports
//! `(SessionEvent, session_id)` pairs on the controller's channel: zero or
//! more chunks followed by exactly one terminal event. The controller feeds
//! every event it receives back through [`StreamingSession::apply`], which is
//! where the session's own status and partial text are kept.
//!
//! Stopping is two-phase. [`StreamingSession::request_stop`] trips the
//! cancellation token, which the task observes at the next chunk boundary
//! (dropping the provider stream closes the transport). [`StreamingSession::stop`]
//! then waits up to [`STOP_GRACE_PERIOD`] for the task and aborts it if it
//! does not finish in time.

use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::ChatMessage;
use crate::core::chat_stream::{CompletionProvider, CompletionRequest};
use crate::core::envelope::normalize_envelope;
use crate::core::stream_errors::ClassifiedError;

pub const STOP_GRACE_PERIOD: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Running,
    Completed,
    Cancelled,
    Errored,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Cancelled | SessionStatus::Errored
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FinishReason {
    #[default]
    Stop,
    Length,
    Error,
    Other(String),
}

impl FinishReason {
    pub fn parse(reason: &str) -> Self {
        match reason.trim().to_ascii_lowercase().as_str() {
            "stop" => FinishReason::Stop,
            "length" => FinishReason::Length,
            "error" => FinishReason::Error,
            other => FinishReason::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::Length => "length",
            FinishReason::Error => "error",
            FinishReason::Other(reason) => reason,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Chunk(String),
    Completed(FinishReason),
    Cancelled,
    Errored(ClassifiedError),
}

impl SessionEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionEvent::Chunk(_))
    }
}

pub type SessionEventSender = mpsc::UnboundedSender<(SessionEvent, u64)>;
pub type SessionEventReceiver = mpsc::UnboundedReceiver<(SessionEvent, u64)>;

pub fn session_channel() -> (SessionEventSender, SessionEventReceiver) {
    mpsc::unbounded_channel()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    AlreadyStarted,
    EmptyModel,
    MissingUserTurn,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::AlreadyStarted => write!(f, "session has already been started"),
            SessionError::EmptyModel => write!(f, "no model selected"),
            SessionError::MissingUserTurn => {
                write!(f, "the prompt must end with a user message")
            }
        }
    }
}

impl Error for SessionError {}

/// How a call to [`StreamingSession::stop`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Nothing was running.
    AlreadyFinished,
    /// The task wound down within the grace period.
    Graceful,
    /// The task was aborted after the grace period.
    Forced,
}

pub struct StreamingSession {
    id: u64,
    model: String,
    status: SessionStatus,
    text: String,
    finish_reason: Option<FinishReason>,
    error: Option<ClassifiedError>,
    cancel_token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl StreamingSession {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            model: String::new(),
            status: SessionStatus::Idle,
            text: String::new(),
            finish_reason: None,
            error: None,
            cancel_token: CancellationToken::new(),
            task: None,
        }
    }

    /// Validate the request and spawn the streaming task.
    pub fn start(
        &mut self,
        provider: Arc<dyn CompletionProvider>,
        request: CompletionRequest,
        events: SessionEventSender,
    ) -> Result<(), SessionError> {
        if self.status != SessionStatus::Idle {
            return Err(SessionError::AlreadyStarted);
        }
        if request.model.trim().is_empty() {
            return Err(SessionError::EmptyModel);
        }
        if !request.messages.last().is_some_and(ChatMessage::is_user) {
            return Err(SessionError::MissingUserTurn);
        }

        self.model = request.model.clone();
        self.status = SessionStatus::Running;

        debug!(
            session_id = self.id,
            model = %self.model,
            messages = request.messages.len(),
            max_tokens = ?request.max_tokens,
            "Starting streaming session"
        );

        let cancel_token = self.cancel_token.clone();
        let session_id = self.id;
        self.task = Some(tokio::spawn(async move {
            drive_stream(provider, request, cancel_token, events, session_id).await;
        }));
        Ok(())
    }

    /// Fold an event reported by this session's task into its state.
    ///
    /// Returns `false` when the event is ignored: anything after a terminal
    /// state, and chunks that arrive once a stop has been requested.
    pub fn apply(&mut self, event: &SessionEvent) -> bool {
        if self.status != SessionStatus::Running {
            return false;
        }
        match event {
            SessionEvent::Chunk(delta) => {
                if self.stop_requested() {
                    return false;
                }
                self.text.push_str(delta);
            }
            SessionEvent::Completed(reason) => {
                self.status = SessionStatus::Completed;
                self.finish_reason = Some(reason.clone());
            }
            SessionEvent::Cancelled => {
                self.status = SessionStatus::Cancelled;
            }
            SessionEvent::Errored(error) => {
                self.status = SessionStatus::Errored;
                self.finish_reason = Some(FinishReason::Error);
                self.error = Some(error.clone());
            }
        }
        true
    }

    /// Ask the task to stop at the next chunk boundary. Idempotent.
    pub fn request_stop(&self) {
        if !self.cancel_token.is_cancelled() {
            debug!(session_id = self.id, "Stop requested");
        }
        self.cancel_token.cancel();
    }

    /// A handle that can request a stop from any context.
    pub fn stop_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    pub fn stop_requested(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Request a stop and wait up to [`STOP_GRACE_PERIOD`] for the task,
    /// aborting it when the grace period runs out.
    pub async fn stop(&mut self) -> StopOutcome {
        self.request_stop();
        let Some(mut task) = self.task.take() else {
            return StopOutcome::AlreadyFinished;
        };
        if task.is_finished() {
            return StopOutcome::AlreadyFinished;
        }

        match tokio::time::timeout(STOP_GRACE_PERIOD, &mut task).await {
            Ok(_) => {
                debug!(session_id = self.id, "Session stopped within grace period");
                StopOutcome::Graceful
            }
            Err(_) => {
                task.abort();
                warn!(
                    session_id = self.id,
                    grace_secs = STOP_GRACE_PERIOD.as_secs(),
                    "Session did not stop in time; aborted"
                );
                self.mark_cancelled();
                StopOutcome::Forced
            }
        }
    }

    /// Treat a session whose terminal event never arrived as cancelled.
    pub fn mark_cancelled(&mut self) {
        if !self.status.is_terminal() {
            self.status = SessionStatus::Cancelled;
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn is_running(&self) -> bool {
        self.status == SessionStatus::Running
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn finish_reason(&self) -> Option<&FinishReason> {
        self.finish_reason.as_ref()
    }

    pub fn error(&self) -> Option<&ClassifiedError> {
        self.error.as_ref()
    }

    #[cfg(test)]
    pub(crate) fn install_task_for_test(&mut self, task: JoinHandle<()>) {
        self.status = SessionStatus::Running;
        self.task = Some(task);
    }
}

impl Drop for StreamingSession {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

impl fmt::Debug for StreamingSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingSession")
            .field("id", &self.id)
            .field("model", &self.model)
            .field("status", &self.status)
            .field("text_len", &self.text.len())
            .finish()
    }
}

async fn drive_stream(
    provider: Arc<dyn CompletionProvider>,
    request: CompletionRequest,
    cancel_token: CancellationToken,
    events: SessionEventSender,
    session_id: u64,
) {
    let model = request.model.clone();
    let terminal = consume_stream(provider.as_ref(), &request, &cancel_token, &events, session_id).await;

    match &terminal {
        SessionEvent::Completed(reason) => {
            debug!(session_id, finish_reason = reason.as_str(), "Session completed")
        }
        SessionEvent::Cancelled => debug!(session_id, "Session cancelled"),
        SessionEvent::Errored(error) => {
            debug!(session_id, model = %model, kind = error.kind.as_str(), raw = %error.raw, "Session errored")
        }
        SessionEvent::Chunk(_) => {}
    }
    let _ = events.send((terminal, session_id));
}

/// Runs the stream to its end and returns the terminal event; chunk events
/// are sent as they arrive.
async fn consume_stream(
    provider: &dyn CompletionProvider,
    request: &CompletionRequest,
    cancel_token: &CancellationToken,
    events: &SessionEventSender,
    session_id: u64,
) -> SessionEvent {
    let opened = tokio::select! {
        biased;
        _ = cancel_token.cancelled() => return SessionEvent::Cancelled,
        opened = provider.stream_completion(request) => opened,
    };
    let mut stream = match opened {
        Ok(stream) => stream,
        Err(err) => {
            return SessionEvent::Errored(ClassifiedError::classify(
                err.to_string(),
                &request.model,
            ))
        }
    };

    let mut finish_reason = None;
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel_token.cancelled() => return SessionEvent::Cancelled,
            next = stream.next() => next,
        };
        let envelope = match next {
            None => break,
            Some(Ok(envelope)) => envelope,
            Some(Err(err)) => {
                return SessionEvent::Errored(ClassifiedError::classify(
                    err.to_string(),
                    &request.model,
                ))
            }
        };
        if cancel_token.is_cancelled() {
            return SessionEvent::Cancelled;
        }

        let unit = normalize_envelope(&envelope);
        if let Some(delta) = unit.delta() {
            if events
                .send((SessionEvent::Chunk(delta.to_string()), session_id))
                .is_err()
            {
                // Nobody is listening any more.
                return SessionEvent::Cancelled;
            }
        }
        if let Some(reason) = unit.finish_reason() {
            finish_reason = Some(FinishReason::parse(reason));
        }
    }

    SessionEvent::Completed(finish_reason.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::stream_errors::ErrorKind;
    use crate::utils::test_utils::{chunk, finish, gated_script, user_request, Script, ScriptedProvider};
    use crate::core::chat_stream::ProviderError;

    async fn drain_until_terminal(
        session: &mut StreamingSession,
        rx: &mut SessionEventReceiver,
    ) -> Vec<SessionEvent> {
        let mut seen = Vec::new();
        while let Some((event, id)) = rx.recv().await {
            assert_eq!(id, session.id());
            session.apply(&event);
            let terminal = event.is_terminal();
            seen.push(event);
            if terminal {
                break;
            }
        }
        seen
    }

    #[tokio::test]
    async fn chunks_accumulate_and_complete_with_stop() {
        let provider = ScriptedProvider::new(vec![Script::Immediate(vec![
            chunk("Hel"),
            chunk("lo"),
            chunk(" world"),
            finish("stop"),
        ])]);
        let (tx, mut rx) = session_channel();
        let mut session = StreamingSession::new(1);
        session
            .start(provider.clone(), user_request("gpt-4o", "hi"), tx)
            .expect("start");

        let events = drain_until_terminal(&mut session, &mut rx).await;
        assert_eq!(
            events,
            vec![
                SessionEvent::Chunk("Hel".into()),
                SessionEvent::Chunk("lo".into()),
                SessionEvent::Chunk(" world".into()),
                SessionEvent::Completed(FinishReason::Stop),
            ]
        );
        assert_eq!(session.text(), "Hello world");
        assert_eq!(session.status(), SessionStatus::Completed);
        assert_eq!(provider.requests()[0].max_tokens, Some(64));
    }

    #[tokio::test]
    async fn missing_finish_reason_defaults_to_stop_and_last_reason_wins() {
        let provider = ScriptedProvider::new(vec![
            Script::Immediate(vec![chunk("a")]),
            Script::Immediate(vec![finish("length"), chunk("b"), finish("stop")]),
        ]);
        let (tx, mut rx) = session_channel();

        let mut first = StreamingSession::new(1);
        first
            .start(provider.clone(), user_request("m", "q"), tx.clone())
            .unwrap();
        drain_until_terminal(&mut first, &mut rx).await;
        assert_eq!(first.finish_reason(), Some(&FinishReason::Stop));

        let mut second = StreamingSession::new(2);
        second.start(provider, user_request("m", "q"), tx).unwrap();
        drain_until_terminal(&mut second, &mut rx).await;
        assert_eq!(second.finish_reason(), Some(&FinishReason::Stop));
        assert_eq!(second.text(), "b");
    }

    #[tokio::test]
    async fn start_validates_its_arguments() {
        let provider = ScriptedProvider::new(Vec::new());
        let (tx, _rx) = session_channel();

        let mut session = StreamingSession::new(1);
        assert_eq!(
            session.start(provider.clone(), user_request("  ", "hi"), tx.clone()),
            Err(SessionError::EmptyModel)
        );

        let mut request = user_request("m", "hi");
        request.messages.push(ChatMessage::new("assistant", "hello"));
        assert_eq!(
            session.start(provider.clone(), request, tx.clone()),
            Err(SessionError::MissingUserTurn)
        );
        assert_eq!(session.status(), SessionStatus::Idle);

        session
            .start(provider.clone(), user_request("m", "hi"), tx.clone())
            .unwrap();
        assert_eq!(
            session.start(provider, user_request("m", "hi"), tx),
            Err(SessionError::AlreadyStarted)
        );
    }

    #[tokio::test]
    async fn open_failures_are_classified_once() {
        let provider = ScriptedProvider::new(vec![Script::OpenFailure(ProviderError::Status {
            status: 429,
            reason: "Too Many Requests".into(),
            summary: "Rate limit reached for requests".into(),
        })]);
        let (tx, mut rx) = session_channel();
        let mut session = StreamingSession::new(7);
        session.start(provider, user_request("gpt-4o", "hi"), tx).unwrap();

        let events = drain_until_terminal(&mut session, &mut rx).await;
        assert_eq!(events.len(), 1);
        let error = session.error().expect("error recorded");
        assert_eq!(error.kind, ErrorKind::RateLimit);
        assert_eq!(error.model, "gpt-4o");
        assert_eq!(session.status(), SessionStatus::Errored);
        assert_eq!(session.text(), "");
    }

    #[tokio::test]
    async fn stop_after_first_chunk_discards_the_rest() {
        let (script, feed) = gated_script();
        let provider = ScriptedProvider::new(vec![script]);
        let (tx, mut rx) = session_channel();
        let mut session = StreamingSession::new(3);
        session.start(provider, user_request("m", "hi"), tx).unwrap();

        feed.send(Ok(chunk("one"))).unwrap();
        let (event, _) = rx.recv().await.expect("first chunk");
        assert!(session.apply(&event));

        session.request_stop();
        session.request_stop();
        let _ = feed.send(Ok(chunk("two")));
        let _ = feed.send(Ok(chunk("three")));

        assert_eq!(session.stop().await, StopOutcome::Graceful);
        while let Ok((event, _)) = rx.try_recv() {
            session.apply(&event);
        }
        assert_eq!(session.status(), SessionStatus::Cancelled);
        assert_eq!(session.text(), "one");
        assert_eq!(session.stop().await, StopOutcome::AlreadyFinished);
    }

    #[tokio::test]
    async fn cancelling_before_the_stream_opens_never_calls_the_provider() {
        let provider = ScriptedProvider::new(vec![Script::Immediate(vec![chunk("unused")])]);
        let (tx, mut rx) = session_channel();
        let mut session = StreamingSession::new(4);
        session
            .start(provider.clone(), user_request("m", "hi"), tx)
            .unwrap();

        // The task has not been polled yet on this runtime.
        session.stop_token().cancel();
        assert!(session.stop_requested());

        let events = drain_until_terminal(&mut session, &mut rx).await;
        assert_eq!(events, vec![SessionEvent::Cancelled]);
        assert_eq!(session.status(), SessionStatus::Cancelled);
        assert_eq!(session.text(), "");
        assert!(provider.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unresponsive_task_is_aborted_after_grace_period() {
        let mut session = StreamingSession::new(9);
        session.install_task_for_test(tokio::spawn(std::future::pending::<()>()));

        let started = tokio::time::Instant::now();
        assert_eq!(session.stop().await, StopOutcome::Forced);
        assert!(started.elapsed() >= STOP_GRACE_PERIOD);
        assert_eq!(session.status(), SessionStatus::Cancelled);
    }

    #[test]
    fn finish_reasons_parse_case_insensitively() {
        assert_eq!(FinishReason::parse("STOP"), FinishReason::Stop);
        assert_eq!(FinishReason::parse("length"), FinishReason::Length);
        assert_eq!(
            FinishReason::parse("content_filter"),
            FinishReason::Other("content_filter".into())
        );
        assert_eq!(FinishReason::default().as_str(), "stop");
    }
}
