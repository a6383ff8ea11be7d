use crate::{
    error::ChatError,
    types::{MutationAck, MutationKind, SyncEvent},
};

/// Mutation success/failure before normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome {
    Success,
    Failure { error: ChatError },
}

impl From<Result<(), ChatError>> for MutationOutcome {
    fn from(result: Result<(), ChatError>) -> Self {
        match result {
            Ok(()) => Self::Success,
            Err(error) => Self::Failure { error },
        }
    }
}

/// Convert a mutation outcome to a stable `SyncEvent::MutationAck`.
pub fn normalize_mutation_outcome(
    client_txn_id: impl Into<String>,
    kind: MutationKind,
    outcome: MutationOutcome,
) -> SyncEvent {
    let client_txn_id = client_txn_id.into();
    match outcome {
        MutationOutcome::Success => SyncEvent::MutationAck(MutationAck {
            client_txn_id,
            kind,
            error: None,
        }),
        MutationOutcome::Failure { error } => SyncEvent::MutationAck(MutationAck {
            client_txn_id,
            kind,
            error: Some(error),
        }),
    }
}

/// Convert an error into a `FatalError` event.
pub fn normalize_fatal_error(error: ChatError) -> SyncEvent {
    let recoverable = error.is_transient();
    SyncEvent::FatalError {
        code: error.code,
        message: error.message,
        recoverable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChatErrorCategory;

    #[test]
    fn maps_success_to_ack_without_error() {
        let event =
            normalize_mutation_outcome("txn-1", MutationKind::SendMessage, MutationOutcome::Success);

        match event {
            SyncEvent::MutationAck(ack) => {
                assert_eq!(ack.client_txn_id, "txn-1");
                assert_eq!(ack.kind, MutationKind::SendMessage);
                assert_eq!(ack.error, None);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn maps_failure_to_ack_with_stable_error_code() {
        let event = normalize_mutation_outcome(
            "txn-2",
            MutationKind::CreateGroup,
            Err(ChatError::status_not_ok(Some("grupo já existe".into()))).into(),
        );

        match event {
            SyncEvent::MutationAck(ack) => {
                assert_eq!(ack.client_txn_id, "txn-2");
                let err = ack.into_result().expect_err("failure should carry error");
                assert_eq!(err.code, "status_not_ok");
                assert_eq!(err.message, "grupo já existe");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn fatal_error_marks_transport_failures_recoverable() {
        let event = normalize_fatal_error(ChatError::new(
            ChatErrorCategory::Transport,
            "transport_error",
            "connection refused",
        ));
        assert!(matches!(
            event,
            SyncEvent::FatalError {
                recoverable: true,
                ..
            }
        ));
    }
}
