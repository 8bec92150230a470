//! The set of open chat tabs.
//!
//! A workspace always holds at least one tab. It owns the tab controllers,
//! multiplexes their session events into [`WorkspaceUpdate`]s, names tabs
//! after their first message through a one-shot title session, and shuts
//! everything down together.

use std::collections::VecDeque;
use std::error::Error;
use std::fmt;

use futures_util::future::{join_all, select_all};
use tracing::{debug, info};
use unicode_segmentation::UnicodeSegmentation;

use crate::api::ChatMessage;
use crate::core::chat_stream::CompletionRequest;
use crate::core::controller::{
    ChatServices, ChatSessionController, ControllerError, ControllerUpdate, SendOutcome,
};
use crate::core::message::{Role, TranscriptEntry};
use crate::core::session::{
    session_channel, SessionEvent, SessionEventReceiver, StreamingSession,
};

pub type TabId = u64;

pub const DEFAULT_TAB_TITLE: &str = "New Chat";

/// Leading part of the title request; the first user message follows it in
/// single quotes.
pub(crate) const TITLE_PROMPT_PREFIX: &str = "Generate a very brief title (3-5 words, 20 characters max) for a chat. Give only and only the non formatted title. Do not put any description before or after the title.: ";

const TITLE_MAX_GRAPHEMES: usize = 30;
const PLACEHOLDER_GRAPHEMES: usize = 20;
const ELLIPSIS: &str = "...";

fn truncate_graphemes(text: &str, keep: usize, limit: usize) -> String {
    if text.graphemes(true).count() <= limit {
        return text.to_string();
    }
    let mut truncated: String = text.graphemes(true).take(keep).collect();
    truncated.push_str(ELLIPSIS);
    truncated
}

/// Short tab label shown until a generated title arrives.
pub fn placeholder_title(message: &str) -> String {
    truncate_graphemes(message.trim(), PLACEHOLDER_GRAPHEMES, PLACEHOLDER_GRAPHEMES)
}

/// Tidy a model-generated title: trim, drop surrounding quotes and cap the
/// length. `None` when nothing is left.
pub fn clean_title(raw: &str) -> Option<String> {
    let cleaned = raw.trim().trim_matches(['"', '\'']).trim();
    if cleaned.is_empty() {
        return None;
    }
    Some(truncate_graphemes(
        cleaned,
        TITLE_MAX_GRAPHEMES - ELLIPSIS.len(),
        TITLE_MAX_GRAPHEMES,
    ))
}

fn title_prompt(first_message: &str) -> String {
    format!("{TITLE_PROMPT_PREFIX}'{first_message}'")
}

pub struct ChatTab {
    id: TabId,
    title: String,
    /// Set once the tab has a title of its own; later sends never retitle it.
    titled: bool,
    controller: ChatSessionController,
}

impl ChatTab {
    pub fn id(&self) -> TabId {
        self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn controller(&self) -> &ChatSessionController {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut ChatSessionController {
        &mut self.controller
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorkspaceUpdate {
    Session {
        tab_id: TabId,
        update: ControllerUpdate,
    },
    TitleAssigned {
        tab_id: TabId,
        title: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkspaceError {
    LastSession,
    InvalidIndex(usize),
    EmptyImport,
    Controller(ControllerError),
}

impl fmt::Display for WorkspaceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkspaceError::LastSession => {
                write!(f, "Cannot delete the only remaining chat tab.")
            }
            WorkspaceError::InvalidIndex(index) => write!(f, "No chat tab at position {index}"),
            WorkspaceError::EmptyImport => write!(f, "No messages found in the imported file."),
            WorkspaceError::Controller(err) => write!(f, "{err}"),
        }
    }
}

impl Error for WorkspaceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            WorkspaceError::Controller(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ControllerError> for WorkspaceError {
    fn from(err: ControllerError) -> Self {
        WorkspaceError::Controller(err)
    }
}

/// The auxiliary session naming a tab. Untracked by any controller.
struct TitleJob {
    tab_id: TabId,
    session: StreamingSession,
    events: SessionEventReceiver,
}

enum EventSource {
    Tab {
        index: usize,
        event: SessionEvent,
        session_id: u64,
    },
    Title(Option<(SessionEvent, u64)>),
}

pub struct WorkspaceController {
    services: ChatServices,
    tabs: Vec<ChatTab>,
    active: usize,
    next_tab_id: TabId,
    model: String,
    title_job: Option<TitleJob>,
    next_title_session_id: u64,
    pending: VecDeque<WorkspaceUpdate>,
}

impl WorkspaceController {
    pub fn new(services: ChatServices, model: impl Into<String>) -> Self {
        let mut workspace = Self {
            services,
            tabs: Vec::new(),
            active: 0,
            next_tab_id: 1,
            model: model.into(),
            title_job: None,
            next_title_session_id: 1,
            pending: VecDeque::new(),
        };
        workspace.create_session(DEFAULT_TAB_TITLE);
        workspace
    }

    pub fn tabs(&self) -> &[ChatTab] {
        &self.tabs
    }

    pub fn len(&self) -> usize {
        self.tabs.len()
    }

    /// A workspace never drops to zero tabs.
    pub fn is_empty(&self) -> bool {
        self.tabs.is_empty()
    }

    pub fn active_index(&self) -> usize {
        self.active
    }

    pub fn active_tab(&self) -> &ChatTab {
        &self.tabs[self.active]
    }

    pub fn active_tab_mut(&mut self) -> &mut ChatTab {
        &mut self.tabs[self.active]
    }

    pub fn tab(&self, index: usize) -> Option<&ChatTab> {
        self.tabs.get(index)
    }

    pub fn tab_mut(&mut self, index: usize) -> Option<&mut ChatTab> {
        self.tabs.get_mut(index)
    }

    pub fn index_of(&self, tab_id: TabId) -> Option<usize> {
        self.tabs.iter().position(|tab| tab.id == tab_id)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Model used for the next message sent from any tab.
    pub fn set_model(&mut self, model: impl Into<String>) {
        self.model = model.into();
    }

    pub fn title_pending(&self) -> bool {
        self.title_job.is_some()
    }

    fn check_index(&self, index: usize) -> Result<(), WorkspaceError> {
        if index < self.tabs.len() {
            Ok(())
        } else {
            Err(WorkspaceError::InvalidIndex(index))
        }
    }

    /// Open a new tab and make it active. Returns its index.
    pub fn create_session(&mut self, title: &str) -> usize {
        let id = self.next_tab_id;
        self.next_tab_id += 1;
        let controller = ChatSessionController::new(self.services.clone(), self.model.clone());
        self.tabs.push(ChatTab {
            id,
            title: title.to_string(),
            titled: false,
            controller,
        });
        self.active = self.tabs.len() - 1;
        debug!(tab_id = id, title, "Chat tab created");
        self.active
    }

    /// Close the tab at `index`, stopping its running session. The last
    /// remaining tab cannot be closed.
    pub async fn delete_session(&mut self, index: usize) -> Result<(), WorkspaceError> {
        self.check_index(index)?;
        if self.tabs.len() == 1 {
            return Err(WorkspaceError::LastSession);
        }

        let mut tab = self.tabs.remove(index);
        tab.controller.shutdown().await;

        if self.active == index {
            self.active = index.min(self.tabs.len() - 1);
        } else if self.active > index {
            self.active -= 1;
        }
        debug!(tab_id = tab.id, remaining = self.tabs.len(), "Chat tab deleted");
        Ok(())
    }

    pub fn switch_session(&mut self, index: usize) -> Result<(), WorkspaceError> {
        self.check_index(index)?;
        self.active = index;
        Ok(())
    }

    /// Blank titles are ignored. A renamed tab is not retitled later.
    pub fn rename_session(&mut self, index: usize, title: &str) -> Result<(), WorkspaceError> {
        self.check_index(index)?;
        let title = title.trim();
        if !title.is_empty() {
            let tab = &mut self.tabs[index];
            tab.title = title.to_string();
            tab.titled = true;
        }
        Ok(())
    }

    /// Send `text` from the tab at `index` with the workspace model. The
    /// first message sent from a tab also sets a placeholder title and
    /// requests a generated one, even if that message later fails.
    pub async fn send(&mut self, index: usize, text: &str) -> Result<SendOutcome, WorkspaceError> {
        self.check_index(index)?;
        let model = self.model.clone();
        let tab = &mut self.tabs[index];
        if !model.trim().is_empty() {
            tab.controller.set_model(model);
        }
        let outcome = tab.controller.send(text).await?;
        if !tab.titled && outcome != SendOutcome::Ignored {
            tab.titled = true;
            tab.title = placeholder_title(text);
            let tab_id = tab.id;
            let model = tab.controller.model().to_string();
            self.generate_title(tab_id, text.trim(), &model);
        }
        Ok(outcome)
    }

    /// Start the title session for `tab_id`. Returns `false` when a title is
    /// already being generated or the session could not start.
    pub fn generate_title(&mut self, tab_id: TabId, first_user_message: &str, model: &str) -> bool {
        if self.title_job.is_some() {
            debug!(tab_id, "Title generation already pending; request dropped");
            return false;
        }

        let session_id = self.next_title_session_id;
        self.next_title_session_id += 1;
        let (events_tx, events) = session_channel();
        let mut session = StreamingSession::new(session_id);
        let request = CompletionRequest {
            model: model.to_string(),
            messages: vec![ChatMessage::user(title_prompt(first_user_message))],
            max_tokens: self.services.settings.max_tokens_limit(),
        };
        if let Err(err) = session.start(self.services.provider.clone(), request, events_tx) {
            debug!(tab_id, error = %err, "Title generation not started");
            return false;
        }
        info!(tab_id, model, "Generating tab title");
        self.title_job = Some(TitleJob {
            tab_id,
            session,
            events,
        });
        true
    }

    fn collect_pending(&mut self) {
        for tab in &mut self.tabs {
            for update in tab.controller.take_pending_updates() {
                self.pending.push_back(WorkspaceUpdate::Session {
                    tab_id: tab.id,
                    update,
                });
            }
        }
    }

    async fn next_event(&mut self) -> EventSource {
        let tabs = &mut self.tabs;
        let title_job = &mut self.title_job;

        let tab_events = select_all(tabs.iter_mut().enumerate().map(|(index, tab)| {
            Box::pin(async move {
                let (event, session_id) = tab.controller.recv_event().await;
                EventSource::Tab {
                    index,
                    event,
                    session_id,
                }
            })
        }));
        let title_event = async move {
            match title_job {
                Some(job) => EventSource::Title(job.events.recv().await),
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            (source, _, _) = tab_events => source,
            source = title_event => source,
        }
    }

    fn handle_title_event(&mut self, event: Option<(SessionEvent, u64)>) -> Option<WorkspaceUpdate> {
        let job = self.title_job.as_mut()?;
        let Some((event, _)) = event else {
            self.title_job = None;
            return None;
        };
        job.session.apply(&event);
        if !event.is_terminal() {
            return None;
        }

        let job = self.title_job.take()?;
        let SessionEvent::Completed(_) = event else {
            debug!(tab_id = job.tab_id, "Title generation did not complete; keeping placeholder");
            return None;
        };
        let title = clean_title(job.session.text())?;
        let index = self.index_of(job.tab_id)?;
        self.tabs[index].title = title.clone();
        debug!(tab_id = job.tab_id, title = %title, "Tab title assigned");
        Some(WorkspaceUpdate::TitleAssigned {
            tab_id: job.tab_id,
            title,
        })
    }

    /// Wait for the next change in any tab or in the title session.
    pub async fn next_update(&mut self) -> WorkspaceUpdate {
        loop {
            self.collect_pending();
            if let Some(update) = self.pending.pop_front() {
                return update;
            }

            let update = match self.next_event().await {
                EventSource::Tab {
                    index,
                    event,
                    session_id,
                } => {
                    let tab = &mut self.tabs[index];
                    tab.controller
                        .handle_event(event, session_id)
                        .map(|update| WorkspaceUpdate::Session {
                            tab_id: tab.id,
                            update,
                        })
                }
                EventSource::Title(event) => self.handle_title_event(event),
            };
            if let Some(update) = update {
                return update;
            }
        }
    }

    /// Open a tab holding an imported conversation. Titled after its first
    /// user message, or `fallback_name` when there is none. A transcript
    /// without any usable message is refused.
    pub fn import_session(
        &mut self,
        entries: Vec<TranscriptEntry>,
        fallback_name: &str,
    ) -> Result<usize, WorkspaceError> {
        if !entries
            .iter()
            .any(|entry| Role::try_from(entry.role.as_str()).is_ok())
        {
            return Err(WorkspaceError::EmptyImport);
        }
        let title_base = entries
            .iter()
            .find(|entry| entry.role == "user" && !entry.content.trim().is_empty())
            .map(|entry| placeholder_title(&entry.content))
            .unwrap_or_else(|| fallback_name.to_string());
        let index = self.create_session(&format!("Imported: {title_base}"));
        self.tabs[index].titled = true;
        let loaded = self.tabs[index].controller.load_transcript(entries)?;
        info!(tab_id = self.tabs[index].id, messages = loaded, "Conversation imported");
        Ok(index)
    }

    /// Shut down every tab and any pending title session.
    pub async fn shutdown_all(&mut self) {
        let tabs = &mut self.tabs;
        let title_job = self.title_job.take();

        let tabs_done = join_all(tabs.iter_mut().map(|tab| tab.controller.shutdown()));
        let title_done = async move {
            if let Some(mut job) = title_job {
                job.session.stop().await;
            }
        };
        tokio::join!(tabs_done, title_done);
        self.collect_pending();
        info!(tabs = self.tabs.len(), "Workspace shut down");
    }
}
