/// Sequence number stamped on each issued fetch.
pub type FetchSeq = u64;

/// Issues monotonically increasing fetch numbers and rejects results that are
/// older than the last one applied.
#[derive(Debug, Clone, Default)]
pub struct FetchSequencer {
    next: FetchSeq,
    last_applied: Option<FetchSeq>,
}

impl FetchSequencer {
    /// Reserve the number for a fetch that is about to be issued.
    pub fn issue(&mut self) -> FetchSeq {
        let seq = self.next;
        self.next = self.next.saturating_add(1);
        seq
    }

    /// Highest number applied so far.
    pub fn last_applied(&self) -> Option<FetchSeq> {
        self.last_applied
    }

    /// Whether a completed fetch is newer than everything applied so far.
    pub fn is_fresh(&self, seq: FetchSeq) -> bool {
        self.last_applied.is_none_or(|last| seq > last)
    }

    /// Record `seq` as applied when fresh. Returns `false` for stale results.
    pub fn accept(&mut self, seq: FetchSeq) -> bool {
        if !self.is_fresh(seq) {
            return false;
        }
        self.last_applied = Some(seq);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issues_increasing_numbers() {
        let mut seq = FetchSequencer::default();
        assert_eq!(seq.issue(), 0);
        assert_eq!(seq.issue(), 1);
        assert_eq!(seq.issue(), 2);
    }

    #[test]
    fn out_of_order_completion_keeps_freshest() {
        let mut seq = FetchSequencer::default();
        let timer_fetch = seq.issue();
        let push_fetch = seq.issue();

        assert!(seq.accept(push_fetch));
        assert!(!seq.accept(timer_fetch));
        assert_eq!(seq.last_applied(), Some(push_fetch));
    }

    #[test]
    fn rejects_duplicate_application() {
        let mut seq = FetchSequencer::default();
        let only = seq.issue();
        assert!(seq.accept(only));
        assert!(!seq.accept(only));
    }

    #[test]
    fn skipped_numbers_do_not_block_newer_results() {
        let mut seq = FetchSequencer::default();
        let failed = seq.issue();
        let next = seq.issue();
        assert!(seq.accept(next));
        assert!(!seq.is_fresh(failed));
    }
}
