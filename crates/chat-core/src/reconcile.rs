use crate::{
    error::ChatError,
    freshness::{FetchSeq, FetchSequencer},
    selection::SelectionMachine,
    types::{Conversation, PublishedState, Selection, Snapshot},
};

/// Result of offering a completed fetch to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Snapshot merged; the new state should be published.
    Applied(PublishedState),
    /// An equal or newer fetch was already applied; nothing changed.
    Stale { seq: FetchSeq, last_applied: FetchSeq },
}

/// Authoritative conversation state for one session.
///
/// Snapshots replace the conversation, peer, and group sets wholesale; the
/// selection is then advanced by the [`SelectionMachine`].
#[derive(Debug, Clone, Default)]
pub struct ConversationStore {
    conversations: Vec<Conversation>,
    available_peers: Vec<String>,
    available_groups: Vec<String>,
    selection: SelectionMachine,
    sequencer: FetchSequencer,
    revision: u64,
}

impl ConversationStore {
    /// Reserve a sequence number for a fetch about to be issued.
    pub fn issue_fetch(&mut self) -> FetchSeq {
        self.sequencer.issue()
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn selection(&self) -> &Selection {
        self.selection.selection()
    }

    /// Merge a successful fetch result issued as `seq`.
    pub fn apply_snapshot(&mut self, seq: FetchSeq, snapshot: Snapshot) -> ApplyOutcome {
        if !self.sequencer.accept(seq) {
            return ApplyOutcome::Stale {
                seq,
                last_applied: self.sequencer.last_applied().unwrap_or(seq),
            };
        }

        let Snapshot {
            conversations,
            available_peers,
            available_groups,
        } = snapshot;
        self.conversations = conversations;
        self.available_peers = available_peers;
        self.available_groups = available_groups;
        self.selection.reconcile(&self.conversations);

        ApplyOutcome::Applied(self.publish())
    }

    /// Manual selection; publishes on success and leaves state untouched on error.
    pub fn select(&mut self, conversation_id: &str) -> Result<PublishedState, ChatError> {
        self.selection.select(conversation_id, &self.conversations)?;
        Ok(self.publish())
    }

    /// Current state without bumping the revision.
    pub fn current(&self) -> PublishedState {
        PublishedState {
            conversations: self.conversations.clone(),
            available_peers: self.available_peers.clone(),
            available_groups: self.available_groups.clone(),
            selection: self.selection.selection().clone(),
            revision: self.revision,
        }
    }

    fn publish(&mut self) -> PublishedState {
        self.revision = self.revision.saturating_add(1);
        self.current()
    }
}
