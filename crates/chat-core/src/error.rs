use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::SessionLifecycleState;

/// Broad error category used for user-facing handling and retry behavior.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChatErrorCategory {
    /// Network unreachable, timeout, or gateway failure.
    Transport,
    /// Non-ok status or malformed payload from the backend.
    Protocol,
    /// Push connection error or close.
    Channel,
    /// Invalid input, unsupported state, or other configuration issue.
    Config,
    /// Local session persistence failure.
    Storage,
    /// Serialization/deserialization failure outside the wire protocol.
    Serialization,
    /// Internal runtime bug or invariant break.
    Internal,
}

/// Stable error payload emitted across the command/event boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{category:?}:{code}: {message}")]
pub struct ChatError {
    /// High-level error category.
    pub category: ChatErrorCategory,
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl ChatError {
    /// Construct a new error.
    pub fn new(
        category: ChatErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
        }
    }

    /// Build a standard invalid-state-transition error.
    pub fn invalid_state(current: SessionLifecycleState, action: impl Into<String>) -> Self {
        let action = action.into();
        Self::new(
            ChatErrorCategory::Config,
            "invalid_state_transition",
            format!("cannot run '{action}' while session is in state {current:?}"),
        )
    }

    /// Backend answered with a `status` other than `"ok"`.
    pub fn status_not_ok(detail: Option<String>) -> Self {
        Self::new(
            ChatErrorCategory::Protocol,
            "status_not_ok",
            detail.unwrap_or_else(|| "unknown error".to_owned()),
        )
    }

    /// Errors that a later polling cycle or reconnect may clear on its own.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.category,
            ChatErrorCategory::Transport | ChatErrorCategory::Channel
        )
    }
}

/// Map HTTP status codes to error categories.
pub fn classify_http_status(status: u16) -> ChatErrorCategory {
    match status {
        408 | 502 | 503 | 504 => ChatErrorCategory::Transport,
        _ => ChatErrorCategory::Protocol,
    }
}
