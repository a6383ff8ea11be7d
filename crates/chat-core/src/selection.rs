use crate::{
    error::{ChatError, ChatErrorCategory},
    types::{Conversation, Selection},
};

/// Sticky conversation selection driven by reconciliation cycles.
///
/// Only the very first reconciliation of a session may pick a conversation on
/// its own. Afterwards the selection either stays put or, once its target
/// disappears, falls back to [`Selection::Unselected`] until the user picks again.
#[derive(Debug, Clone)]
pub struct SelectionMachine {
    selection: Selection,
    initial: bool,
}

impl Default for SelectionMachine {
    fn default() -> Self {
        Self {
            selection: Selection::Unselected,
            initial: true,
        }
    }
}

impl SelectionMachine {
    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    /// Whether no reconciliation has completed yet.
    pub fn is_initial(&self) -> bool {
        self.initial
    }

    /// Advance the selection for one completed reconciliation.
    pub fn reconcile(&mut self, conversations: &[Conversation]) -> &Selection {
        let initial = std::mem::replace(&mut self.initial, false);

        let next = match &self.selection {
            Selection::Unselected if initial => conversations
                .first()
                .map(|conv| Selection::Selected(conv.id.clone()))
                .unwrap_or(Selection::Unselected),
            Selection::Selected(id) if contains(conversations, id) => {
                Selection::Selected(id.clone())
            }
            Selection::Selected(_) | Selection::Unselected => Selection::Unselected,
        };

        self.selection = next;
        &self.selection
    }

    /// Manual selection of a conversation present in `conversations`.
    pub fn select(
        &mut self,
        conversation_id: &str,
        conversations: &[Conversation],
    ) -> Result<&Selection, ChatError> {
        if !contains(conversations, conversation_id) {
            return Err(ChatError::new(
                ChatErrorCategory::Config,
                "unknown_conversation",
                format!("conversation not found: {conversation_id}"),
            ));
        }
        self.selection = Selection::Selected(conversation_id.to_owned());
        Ok(&self.selection)
    }
}

fn contains(conversations: &[Conversation], id: &str) -> bool {
    conversations.iter().any(|conv| conv.id == id)
}
