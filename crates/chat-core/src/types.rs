use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ChatError, ChatErrorCategory};

/// Opaque client-chosen identifier used as the sole session credential.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Trim and validate a raw identifier.
    pub fn parse(raw: &str) -> Result<Self, ChatError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ChatError::new(
                ChatErrorCategory::Config,
                "invalid_session_id",
                "client id must not be empty",
            ));
        }
        Ok(Self(trimmed.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Conversation flavor as reported by the backend (`"private"` / `"group"`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ConversationKind {
    /// One-to-one conversation with a single peer.
    #[default]
    #[serde(rename = "private")]
    Direct,
    /// Conversation shared by a named group of members.
    #[serde(rename = "group")]
    Group,
}

/// One immutable chat message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Sender client identifier.
    pub sender: String,
    /// Decrypted message text.
    #[serde(rename = "message")]
    pub body: String,
    /// Server-formatted timestamp, when known.
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// Server-owned conversation record. Identity is `id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conversation {
    /// Peer identifier for direct conversations, group name for groups.
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: ConversationKind,
    /// Messages in delivery order.
    #[serde(default)]
    pub history: Vec<Message>,
}

/// Complete, authoritative state returned by one fetch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Snapshot {
    /// Conversations in server order.
    pub conversations: Vec<Conversation>,
    /// Peers the client may message directly (advisory).
    pub available_peers: Vec<String>,
    /// Groups known to the server (advisory).
    pub available_groups: Vec<String>,
}

/// Which conversation, if any, is active in the view.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum Selection {
    #[default]
    Unselected,
    Selected(String),
}

impl Selection {
    /// Selected conversation ID, when present.
    pub fn selected_id(&self) -> Option<&str> {
        match self {
            Self::Unselected => None,
            Self::Selected(id) => Some(id.as_str()),
        }
    }
}

/// Reconciled state handed to presentation collaborators after every cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PublishedState {
    pub conversations: Vec<Conversation>,
    pub available_peers: Vec<String>,
    pub available_groups: Vec<String>,
    pub selection: Selection,
    /// Number of publishes since the session started.
    pub revision: u64,
}

impl PublishedState {
    /// Conversation currently selected, when it exists.
    pub fn selected_conversation(&self) -> Option<&Conversation> {
        let id = self.selection.selected_id()?;
        self.conversations.iter().find(|conv| conv.id == id)
    }
}

/// Timing knobs for polling, resync scheduling, and push reconnection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncConfig {
    /// Period of the repeating snapshot fetch.
    pub poll_interval_ms: u64,
    /// Delay before the resync that follows a successful send.
    pub send_resync_delay_ms: u64,
    /// Delay before the resync that follows a successful group creation.
    pub group_resync_delay_ms: u64,
    /// First push reconnect delay.
    pub reconnect_base_delay_ms: u64,
    /// Upper bound for push reconnect delays.
    pub reconnect_max_delay_ms: u64,
    /// Fraction (`0.0..=1.0`) of each reconnect delay that may be shaved off at random.
    pub reconnect_jitter_ratio: f64,
    /// Per-request HTTP timeout.
    pub request_timeout_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            send_resync_delay_ms: 100,
            group_resync_delay_ms: 500,
            reconnect_base_delay_ms: 3_000,
            reconnect_max_delay_ms: 30_000,
            reconnect_jitter_ratio: 0.2,
            request_timeout_ms: 10_000,
        }
    }
}

/// High-level session lifecycle state reported to the frontend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionLifecycleState {
    /// No session has been started yet.
    Idle,
    /// A login or session restore flow is running.
    Authenticating,
    /// Polling timer and push channel are active.
    Syncing,
    /// Session was torn down by logout.
    LoggedOut,
}

/// Mutating operation kinds acknowledged through [`MutationAck`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MutationKind {
    SendMessage,
    CreateGroup,
}

/// Command channel input accepted by the sync runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum SyncCommand {
    /// Announce the identifier to the backend and start syncing.
    Login {
        /// Raw client identifier; trimmed before use.
        client_id: String,
    },
    /// Start syncing with a previously persisted identifier, skipping login.
    RestoreSession { client_id: String },
    /// Request an immediate out-of-band fetch.
    Resync,
    /// Manually select a known conversation.
    SelectConversation { conversation_id: String },
    /// Send a message to a conversation.
    SendMessage {
        /// Frontend-provided transaction ID echoed in `MutationAck`.
        client_txn_id: String,
        /// Conversation ID (peer or group).
        target_id: String,
        body: String,
    },
    /// Create a group with the given members.
    CreateGroup {
        /// Frontend-provided transaction ID echoed in `MutationAck`.
        client_txn_id: String,
        name: String,
        members: Vec<String>,
    },
    /// Tear the session down and notify the backend.
    Logout,
}

/// Push connection phase.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PushChannelState {
    Connecting,
    Open,
    Closed,
}

/// Push channel status update.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PushChannelStatus {
    pub state: PushChannelState,
    /// Consecutive failed connection attempts.
    pub attempt: u32,
    /// Scheduled reconnect delay when `state == Closed`.
    pub retry_in_ms: Option<u64>,
}

/// Acknowledgement for `SendMessage` / `CreateGroup`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MutationAck {
    /// Original frontend transaction ID.
    pub client_txn_id: String,
    pub kind: MutationKind,
    /// Failure details; `None` on success.
    pub error: Option<ChatError>,
}

impl MutationAck {
    pub fn into_result(self) -> Result<(), ChatError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Event channel output emitted by the sync runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum SyncEvent {
    /// Session lifecycle transition.
    StateChanged { state: SessionLifecycleState },
    /// Result of login/session-restore flow.
    AuthResult {
        success: bool,
        error_code: Option<String>,
    },
    /// Reconciled state after a completed cycle or manual selection.
    StatePublished(PublishedState),
    /// Push connection status update.
    PushChannel(PushChannelStatus),
    /// Mutation acknowledgement.
    MutationAck(MutationAck),
    /// Command-level failure.
    FatalError {
        code: String,
        message: String,
        /// Indicates whether retrying may recover.
        recoverable: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_is_trimmed_and_rejects_blank_input() {
        let id = SessionId::parse("  alice ").expect("id should parse");
        assert_eq!(id.as_str(), "alice");

        let err = SessionId::parse("   ").expect_err("blank id must fail");
        assert_eq!(err.code, "invalid_session_id");
    }

    #[test]
    fn decodes_backend_conversation_payload() {
        let raw = r#"{
            "id": "devs",
            "type": "group",
            "history": [
                {"timestamp": "10:01:02", "sender": "bob", "message": "hi"},
                {"sender": "alice", "message": "yo"}
            ]
        }"#;
        let conv: Conversation = serde_json::from_str(raw).expect("payload should decode");

        assert_eq!(conv.kind, ConversationKind::Group);
        assert_eq!(conv.history.len(), 2);
        assert_eq!(conv.history[0].body, "hi");
        assert_eq!(conv.history[0].timestamp.as_deref(), Some("10:01:02"));
        assert_eq!(conv.history[1].timestamp, None);
    }

    #[test]
    fn conversation_defaults_to_direct_with_empty_history() {
        let conv: Conversation = serde_json::from_str(r#"{"id":"bob"}"#).expect("decode");
        assert_eq!(conv.kind, ConversationKind::Direct);
        assert!(conv.history.is_empty());
    }

    #[test]
    fn selected_conversation_resolves_against_published_set() {
        let state = PublishedState {
            conversations: vec![Conversation {
                id: "bob".into(),
                kind: ConversationKind::Direct,
                history: Vec::new(),
            }],
            selection: Selection::Selected("bob".into()),
            ..PublishedState::default()
        };
        assert_eq!(
            state.selected_conversation().map(|c| c.id.as_str()),
            Some("bob")
        );

        let dangling = PublishedState {
            selection: Selection::Selected("ghost".into()),
            ..state
        };
        assert!(dangling.selected_conversation().is_none());
    }
}
