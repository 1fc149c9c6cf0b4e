use std::sync::{Arc, Weak};

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use futures_util::StreamExt;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::api::CouncilApi;
use crate::decoder::EventStream;
use crate::errors::ClientError;
use crate::identity::IdentityResolver;
use crate::models::{
    ContextDetails, ConversationSummary, HistoryPage, OrganizationContext, TranscriptMessage,
    TurnRequest,
};
use crate::service::events::{apply_event, seed_from_history, TurnFlow, TurnOutcome};
use crate::transcript::Session;

/// Generic notice shown when the council cannot be reached or the stream breaks.
pub const TRANSPORT_FAILURE_NOTICE: &str = "Connection to the council failed. Please try again.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitMode {
    /// Start fresh; no request is made.
    NewConversation,
    /// Load persisted history; `None` means the most recent conversation.
    Resume(Option<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    HistoryLoading,
    Submitting,
    Streaming,
}

/// One open turn stream, tagged with the session instance it was opened for.
/// Dropping it before it finishes releases the controller for the next submission.
pub struct Turn {
    session_tag: Uuid,
    events: EventStream,
    outcome: Option<TurnOutcome>,
    _liveness: Arc<()>,
}

impl Turn {
    fn new(session_tag: Uuid, events: EventStream, liveness: Arc<()>) -> Self {
        Self { session_tag, events, outcome: None, _liveness: liveness }
    }

    pub fn session_tag(&self) -> Uuid {
        self.session_tag
    }

    pub fn outcome(&self) -> Option<&TurnOutcome> {
        self.outcome.as_ref()
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnStep {
    /// An event of the given kind was applied; the turn continues.
    Applied(&'static str),
    Finished(TurnOutcome),
}

/// Owns the session and drives history loads and turns against it.
pub struct ChatController<A> {
    api: A,
    session: Session,
    identity: IdentityResolver,
    state: ControllerState,
    organization: OrganizationContext,
    context: ContextDetails,
    pending_image: Option<String>,
    live_turn: Weak<()>,
}

impl<A: CouncilApi> ChatController<A> {
    pub fn new(api: A, organization: OrganizationContext) -> Self {
        Self {
            api,
            session: Session::new(),
            identity: IdentityResolver::new(),
            state: ControllerState::Idle,
            organization,
            context: ContextDetails::default(),
            pending_image: None,
            live_turn: Weak::new(),
        }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn identity(&self) -> &IdentityResolver {
        &self.identity
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// True while a turn is being opened or streamed; input should be disabled.
    /// A turn whose handle was dropped no longer counts.
    pub fn is_loading(&self) -> bool {
        matches!(self.state, ControllerState::Submitting | ControllerState::Streaming)
            && self.live_turn.strong_count() > 0
    }

    pub fn set_organization(&mut self, organization: OrganizationContext) {
        self.organization = organization;
    }

    /// Context details for the next submission; cleared once it is sent.
    pub fn context_mut(&mut self) -> &mut ContextDetails {
        &mut self.context
    }

    /// Holds an image for the next submission only.
    pub fn attach_image(&mut self, bytes: &[u8]) {
        self.pending_image = Some(BASE64_STANDARD.encode(bytes));
    }

    pub fn has_pending_image(&self) -> bool {
        self.pending_image.is_some()
    }

    pub async fn initialize(&mut self, mode: InitMode) {
        match mode {
            InitMode::NewConversation => {
                info!("Starting a new conversation");
                self.session = Session::new();
                self.identity.start_new();
                self.state = ControllerState::Idle;
            }
            InitMode::Resume(target) => {
                // Navigation disowns whatever stream is still open for the current session.
                self.session.retag();
                self.session.clear_placeholder();
                self.identity.resume();
                self.state = ControllerState::HistoryLoading;

                match self.api.fetch_history(target.as_deref()).await {
                    Ok(page) => self.seed_session(page, target),
                    Err(e) => error!("History fetch failed: {e}"),
                }

                self.identity.sync(&self.session);
                self.state = ControllerState::Idle;
            }
        }
    }

    fn seed_session(&mut self, page: HistoryPage, target: Option<String>) {
        if !page.messages.is_empty() {
            let seed = seed_from_history(page.messages);
            let mut session = Session::new();
            session.conversation_id = page.conversation_id.or(target);
            session.load_wholesale(seed.messages);
            session.votes = seed.votes;
            info!(
                "Loaded {} message(s) for conversation {}",
                session.messages().len(),
                session.conversation_id.as_deref().unwrap_or("<unknown>")
            );
            self.session = session;
        } else if let Some(id) = target {
            debug!("Conversation {id} has no messages yet");
            self.session = Session::identified(id);
        } else {
            debug!("No persisted conversation; keeping the current session");
        }
    }

    /// Starts a turn. Returns `Ok(None)` when the input is blank or a turn is
    /// already in progress. If the stream cannot be opened the placeholder is
    /// withdrawn, a notice is appended and the error is returned.
    pub async fn submit(&mut self, raw_input: &str) -> Result<Option<Turn>, ClientError> {
        if raw_input.trim().is_empty() {
            debug!("Ignoring blank submission");
            return Ok(None);
        }
        self.reclaim_orphaned_turn();
        if self.state != ControllerState::Idle {
            debug!("Ignoring submission while {:?}", self.state);
            return Ok(None);
        }

        let message = self.context.annotate(raw_input);
        self.context = ContextDetails::default();

        self.session.append(TranscriptMessage::user(message.clone()));
        self.session.insert_placeholder();
        self.session.reset_votes();
        self.identity.begin_turn();
        self.live_turn = Weak::new();
        self.state = ControllerState::Submitting;

        let request = TurnRequest {
            message,
            company_info: self.organization.clone(),
            image: self.pending_image.take(),
            conversation_id: self.session.conversation_id.clone(),
        };
        let session_tag = self.session.instance();

        match self.api.submit_turn(request).await {
            Ok(events) => {
                let liveness = Arc::new(());
                self.live_turn = Arc::downgrade(&liveness);
                self.state = ControllerState::Streaming;
                Ok(Some(Turn::new(session_tag, events, liveness)))
            }
            Err(e) => {
                error!("Failed to open turn stream: {e}");
                self.session.clear_placeholder();
                self.session.append(TranscriptMessage::system(TRANSPORT_FAILURE_NOTICE));
                self.identity.end_turn();
                self.state = ControllerState::Idle;
                Err(e)
            }
        }
    }

    /// Reads and applies the next event of `turn`. Events of a turn whose
    /// session is no longer active are dropped without touching state.
    pub async fn next_event(&mut self, turn: &mut Turn) -> TurnStep {
        if let Some(outcome) = &turn.outcome {
            return TurnStep::Finished(outcome.clone());
        }
        if turn.session_tag != self.session.instance() {
            return Self::abandon(turn);
        }

        let next = turn.events.next().await;
        if turn.session_tag != self.session.instance() {
            return Self::abandon(turn);
        }

        match next {
            None => {
                info!("Turn stream closed without an end event");
                self.finish(turn, TurnOutcome::SourceClosed)
            }
            Some(Err(e)) => {
                warn!("Turn stream aborted: {e}");
                self.session.clear_placeholder();
                self.session.append(TranscriptMessage::system(TRANSPORT_FAILURE_NOTICE));
                self.finish(turn, TurnOutcome::Aborted(e.to_string()))
            }
            Some(Ok(event)) => {
                let kind = event.kind();
                match apply_event(&mut self.session, event) {
                    TurnFlow::Continue => {
                        if self.identity.sync(&self.session) {
                            info!("Conversation link is now {}", self.identity.deep_link());
                        }
                        TurnStep::Applied(kind)
                    }
                    TurnFlow::Finished(outcome) => self.finish(turn, outcome),
                }
            }
        }
    }

    /// Drives `turn` to its end.
    pub async fn run_turn(&mut self, mut turn: Turn) -> TurnOutcome {
        loop {
            if let TurnStep::Finished(outcome) = self.next_event(&mut turn).await {
                return outcome;
            }
        }
    }

    /// Conversation list for navigation; failures degrade to an empty list.
    pub async fn conversations(&self) -> Vec<ConversationSummary> {
        match self.api.fetch_conversations().await {
            Ok(list) => list,
            Err(e) => {
                error!("Failed to fetch conversations: {e}");
                Vec::new()
            }
        }
    }

    /// A turn that was dropped or cancelled mid-stream leaves the controller busy
    /// with a placeholder on screen; settle it so the next submission can start.
    fn reclaim_orphaned_turn(&mut self) {
        let busy = matches!(self.state, ControllerState::Submitting | ControllerState::Streaming);
        if !busy || self.live_turn.strong_count() > 0 {
            return;
        }
        warn!("Previous turn was dropped before it finished; releasing it");
        self.session.clear_placeholder();
        self.identity.sync(&self.session);
        self.identity.end_turn();
        self.state = ControllerState::Idle;
    }

    fn finish(&mut self, turn: &mut Turn, outcome: TurnOutcome) -> TurnStep {
        self.session.clear_placeholder();
        self.identity.sync(&self.session);
        self.identity.end_turn();
        self.state = ControllerState::Idle;
        debug!("Turn finished: {outcome:?}");
        turn.outcome = Some(outcome.clone());
        TurnStep::Finished(outcome)
    }

    fn abandon(turn: &mut Turn) -> TurnStep {
        debug!("Discarding events for an abandoned session");
        turn.outcome = Some(TurnOutcome::Abandoned);
        TurnStep::Finished(TurnOutcome::Abandoned)
    }
}
