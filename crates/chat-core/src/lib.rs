//! Core contract shared between the sync runtime and its front ends.
//!
//! This crate defines the command/event protocol, session lifecycle, the
//! conversation store with its sticky selection rules, fetch freshness and
//! reconnect policies, and the collaborator traits for the backend API and
//! push channel.

/// Backend and push-channel collaborator traits.
pub mod api;
/// Async command/event channel primitives.
pub mod channel;
/// Stable error types and HTTP classification helpers.
pub mod error;
/// Monotonic fetch sequencing.
pub mod freshness;
/// Mutation acknowledgement and error normalization.
pub mod normalization;
/// Push frame classification.
pub mod push;
/// Snapshot merge and publish.
pub mod reconcile;
/// Backoff policy used by the push reconnect loop.
pub mod retry;
/// Sticky conversation selection.
pub mod selection;
/// Session lifecycle state machine.
pub mod state_machine;
/// Frontend-facing protocol types (commands, events, payloads).
pub mod types;

pub use api::{ChatApi, PushConnector, PushFrames};
pub use channel::{EventStream, RuntimeEndpoint, SyncChannelError, SyncChannels, sync_link};
pub use error::{ChatError, ChatErrorCategory, classify_http_status};
pub use freshness::{FetchSeq, FetchSequencer};
pub use normalization::{MutationOutcome, normalize_fatal_error, normalize_mutation_outcome};
pub use push::{PushEventKind, classify_push_frame};
pub use reconcile::{ApplyOutcome, ConversationStore};
pub use retry::{ReconnectState, RetryPolicy};
pub use selection::SelectionMachine;
pub use state_machine::SessionStateMachine;
pub use types::{
    Conversation, ConversationKind, Message, MutationAck, MutationKind, PublishedState,
    PushChannelState, PushChannelStatus, Selection, SessionId, SessionLifecycleState, Snapshot,
    SyncCommand, SyncConfig, SyncEvent,
};
