use serde::Deserialize;

/// Push notification kinds that request a resync. Payloads are never used as data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushEventKind {
    NewMessage,
    UpdateUi,
    MessageSent,
}

impl PushEventKind {
    pub fn from_type(kind: &str) -> Option<Self> {
        match kind {
            "new_message" => Some(Self::NewMessage),
            "update_ui" => Some(Self::UpdateUi),
            "message_sent" => Some(Self::MessageSent),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NewMessage => "new_message",
            Self::UpdateUi => "update_ui",
            Self::MessageSent => "message_sent",
        }
    }
}

#[derive(Deserialize)]
struct PushEnvelope {
    #[serde(rename = "type")]
    kind: Option<String>,
}

/// Classify one inbound text frame.
///
/// Malformed JSON, a missing `type`, and unknown kinds all yield `None`.
pub fn classify_push_frame(raw: &str) -> Option<PushEventKind> {
    let envelope = serde_json::from_str::<PushEnvelope>(raw).ok()?;
    PushEventKind::from_type(envelope.kind.as_deref()?)
}
