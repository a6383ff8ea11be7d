//! Frontend-facing state reducer for `chat-term`.

use std::{collections::HashSet, fmt::Write as _};

use chat_core::{
    ConversationKind, MutationAck, MutationKind, PublishedState, PushChannelState,
    PushChannelStatus, SessionLifecycleState, SyncEvent,
};
use tracing::{debug, warn};

const DEFAULT_STATUS: &str = "Idle";
const PREVIEW_MAX_CHARS: usize = 40;
const MISSING_TIME: &str = "--:--";

/// Sidebar conversation row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationRow {
    pub id: String,
    pub is_group: bool,
    /// Truncated body of the newest message.
    pub preview: Option<String>,
    pub is_selected: bool,
}

/// Message line of the selected conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageView {
    pub sender: String,
    pub body: String,
    pub time: String,
    pub is_own: bool,
}

/// Full view snapshot emitted after state transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermSnapshot {
    pub client_id: Option<String>,
    pub rows: Vec<ConversationRow>,
    pub messages: Vec<MessageView>,
    pub selected_id: Option<String>,
    pub status_text: String,
    pub push_text: Option<String>,
    pub error_text: Option<String>,
    pub can_send: bool,
}

impl TermSnapshot {
    /// Plain-text rendering for the terminal.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let who = self.client_id.as_deref().unwrap_or("signed out");
        let _ = write!(out, "== {who} | {}", self.status_text);
        if let Some(push) = &self.push_text {
            let _ = write!(out, " | {push}");
        }
        out.push_str(" ==\n");

        if self.rows.is_empty() {
            out.push_str("  (no conversations)\n");
        }
        for row in &self.rows {
            let marker = if row.is_selected { '*' } else { ' ' };
            let kind = if row.is_group { "group" } else { "dm" };
            let _ = write!(out, " {marker} [{kind}] {}", row.id);
            if let Some(preview) = &row.preview {
                let _ = write!(out, ": {preview}");
            }
            out.push('\n');
        }

        if let Some(selected) = &self.selected_id {
            let _ = writeln!(out, "-- {selected} --");
            for message in &self.messages {
                let sender = if message.is_own {
                    "you"
                } else {
                    message.sender.as_str()
                };
                let _ = writeln!(out, "[{}] {sender}: {}", message.time, message.body);
            }
        }

        if let Some(error) = &self.error_text {
            let _ = writeln!(out, "! {error}");
        }
        out
    }
}

/// Mutable view state that receives sync events and user actions.
#[derive(Debug, Clone)]
pub struct TermState {
    own_client_id: Option<String>,
    lifecycle: SessionLifecycleState,
    awaiting_auth: bool,
    published: PublishedState,
    status_text: String,
    push_text: Option<String>,
    error_text: Option<String>,
    pending_mutations: HashSet<String>,
}

impl Default for TermState {
    fn default() -> Self {
        Self::new()
    }
}

impl TermState {
    pub fn new() -> Self {
        Self {
            own_client_id: None,
            lifecycle: SessionLifecycleState::Idle,
            awaiting_auth: false,
            published: PublishedState::default(),
            status_text: DEFAULT_STATUS.to_owned(),
            push_text: None,
            error_text: None,
            pending_mutations: HashSet::new(),
        }
    }

    /// Current immutable snapshot for rendering.
    pub fn snapshot(&self) -> TermSnapshot {
        let selected_id = self.selected_conversation_id().map(str::to_owned);
        TermSnapshot {
            client_id: self.own_client_id.clone(),
            rows: conversation_rows(&self.published),
            messages: self.visible_messages(),
            can_send: self.published.selected_conversation().is_some(),
            selected_id,
            status_text: self.status_text.clone(),
            push_text: self.push_text.clone(),
            error_text: self.error_text.clone(),
        }
    }

    /// Identifier used to mark own messages.
    pub fn set_own_client_id(&mut self, client_id: Option<String>) {
        self.own_client_id = client_id;
    }

    /// Claim `client_id` for a login or restore.
    ///
    /// Refused while another login is outstanding or a session is running, so
    /// the identity of the live session is never replaced by an unaccepted one.
    pub fn begin_login(&mut self, client_id: String) -> Result<(), String> {
        let busy = self.awaiting_auth
            || matches!(
                self.lifecycle,
                SessionLifecycleState::Authenticating | SessionLifecycleState::Syncing
            );
        if busy {
            let current = self.own_client_id.as_deref().unwrap_or("another id");
            let text = format!("already signed in as {current}; /logout first");
            self.error_text = Some(text.clone());
            return Err(text);
        }

        self.own_client_id = Some(client_id);
        self.awaiting_auth = true;
        self.clear_error();
        Ok(())
    }

    pub fn own_client_id(&self) -> Option<&str> {
        self.own_client_id.as_deref()
    }

    pub fn set_error_text(&mut self, text: impl Into<String>) {
        self.error_text = Some(text.into());
    }

    pub fn clear_error(&mut self) {
        self.error_text = None;
    }

    pub fn selected_conversation_id(&self) -> Option<&str> {
        self.published.selection.selected_id()
    }

    /// Peers offered when building a group; never includes the user.
    pub fn group_member_candidates(&self) -> Vec<String> {
        self.published
            .available_peers
            .iter()
            .filter(|peer| Some(peer.as_str()) != self.own_client_id.as_deref())
            .cloned()
            .collect()
    }

    /// Mark a mutation as pending using its client transaction ID.
    pub fn mark_mutation_requested(&mut self, client_txn_id: String) {
        self.pending_mutations.insert(client_txn_id);
    }

    pub fn pending_mutation_count(&self) -> usize {
        self.pending_mutations.len()
    }

    /// Handle a mutation acknowledgement from the runtime.
    pub fn handle_mutation_ack(&mut self, ack: MutationAck) {
        self.pending_mutations.remove(&ack.client_txn_id);
        match ack.error {
            Some(error) => {
                warn!(
                    client_txn_id = %ack.client_txn_id,
                    error_code = %error.code,
                    "mutation acknowledgement reported failure"
                );
                let action = match ack.kind {
                    MutationKind::SendMessage => "send",
                    MutationKind::CreateGroup => "group creation",
                };
                self.error_text = Some(format!(
                    "{action} failed ({}): {}",
                    error.code, error.message
                ));
            }
            None => {
                debug!(client_txn_id = %ack.client_txn_id, "mutation acknowledgement succeeded");
                self.clear_error();
            }
        }
    }

    /// Feed one sync event into the reducer.
    pub fn handle_sync_event(&mut self, event: SyncEvent) {
        match event {
            SyncEvent::StateChanged { state } => {
                self.lifecycle = state;
                self.status_text = lifecycle_label(state).to_owned();
                if state == SessionLifecycleState::LoggedOut {
                    self.published = PublishedState::default();
                    self.push_text = None;
                    self.pending_mutations.clear();
                    self.own_client_id = None;
                    self.awaiting_auth = false;
                }
            }
            SyncEvent::AuthResult {
                success,
                error_code,
            } => {
                self.awaiting_auth = false;
                let code = error_code.unwrap_or_else(|| "unknown".to_owned());
                if success {
                    self.status_text = "Authenticated".to_owned();
                    self.clear_error();
                } else if self.lifecycle == SessionLifecycleState::Syncing {
                    // A login refused while a session runs leaves that session untouched.
                    warn!(%code, "login rejected while a session is running");
                    self.error_text = Some(format!("login failed ({code})"));
                } else {
                    self.status_text = "Authentication failed".to_owned();
                    self.error_text = Some(format!("login failed ({code})"));
                    self.own_client_id = None;
                }
            }
            SyncEvent::StatePublished(state) => {
                debug!(
                    revision = state.revision,
                    conversation_count = state.conversations.len(),
                    "published state received"
                );
                self.published = state;
            }
            SyncEvent::PushChannel(status) => {
                self.push_text = Some(push_label(&status));
            }
            SyncEvent::MutationAck(ack) => {
                self.handle_mutation_ack(ack);
            }
            SyncEvent::FatalError { code, message, .. } => {
                warn!(%code, %message, "runtime error surfaced to state");
                self.error_text = Some(format!("{code}: {message}"));
            }
        }
    }

    fn visible_messages(&self) -> Vec<MessageView> {
        let Some(conversation) = self.published.selected_conversation() else {
            return Vec::new();
        };
        conversation
            .history
            .iter()
            .map(|message| MessageView {
                sender: message.sender.clone(),
                body: message.body.clone(),
                time: message
                    .timestamp
                    .clone()
                    .filter(|value| !value.trim().is_empty())
                    .unwrap_or_else(|| MISSING_TIME.to_owned()),
                is_own: self.own_client_id.as_deref() == Some(message.sender.as_str()),
            })
            .collect()
    }
}

/// Sidebar rows: groups first, then by id.
pub fn conversation_rows(state: &PublishedState) -> Vec<ConversationRow> {
    let selected = state.selection.selected_id();
    let mut rows = state
        .conversations
        .iter()
        .map(|conversation| ConversationRow {
            id: conversation.id.clone(),
            is_group: conversation.kind == ConversationKind::Group,
            preview: conversation
                .history
                .last()
                .map(|message| preview_text(&message.body)),
            is_selected: selected == Some(conversation.id.as_str()),
        })
        .collect::<Vec<_>>();
    rows.sort_by(|a, b| b.is_group.cmp(&a.is_group).then_with(|| a.id.cmp(&b.id)));
    rows
}

/// Cut a message body down to a one-line sidebar preview.
pub fn preview_text(body: &str) -> String {
    if body.chars().count() > PREVIEW_MAX_CHARS {
        let head = body.chars().take(PREVIEW_MAX_CHARS).collect::<String>();
        format!("{head}...")
    } else {
        body.to_owned()
    }
}

fn lifecycle_label(state: SessionLifecycleState) -> &'static str {
    match state {
        SessionLifecycleState::Idle => "Idle",
        SessionLifecycleState::Authenticating => "Authenticating",
        SessionLifecycleState::Syncing => "Syncing",
        SessionLifecycleState::LoggedOut => "Logged out",
    }
}

fn push_label(status: &PushChannelStatus) -> String {
    match status.state {
        PushChannelState::Open => "push connected".to_owned(),
        PushChannelState::Connecting if status.attempt == 0 => "push connecting".to_owned(),
        PushChannelState::Connecting => format!("push connecting (attempt {})", status.attempt + 1),
        PushChannelState::Closed => match status.retry_in_ms {
            Some(ms) => format!("push closed (retry in {ms} ms)"),
            None => "push closed".to_owned(),
        },
    }
}
