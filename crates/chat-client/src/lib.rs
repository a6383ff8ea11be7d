//! Sync runtime that keeps a chat client's conversation state aligned with the bridge.
//!
//! A single actor owns the conversation store. Polling ticks, push
//! notifications, and mutation follow-ups all funnel into it as messages, so
//! the published state only ever moves forward.

mod http;
mod push_channel;
mod runtime;
mod ws;

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use chat_core::{
    ChatApi, ChatError, ChatErrorCategory, EventStream, PushConnector, SyncChannelError,
    SyncChannels, SyncCommand, SyncConfig, SyncEvent, sync_link,
};
use tokio::sync::broadcast::error::RecvError;
use url::Url;

pub use http::HttpChatApi;
pub use ws::WebSocketConnector;

use runtime::SyncRuntime;

const COMMAND_BUFFER: usize = 128;
const EVENT_BUFFER: usize = 512;

/// Front-end handle to a running sync runtime. The runtime stops once every clone is dropped.
#[derive(Clone, Debug)]
pub struct SyncRuntimeHandle {
    channels: SyncChannels,
    next_txn: Arc<AtomicU64>,
}

impl SyncRuntimeHandle {
    pub async fn send(&self, command: SyncCommand) -> Result<(), SyncChannelError> {
        self.channels.send_command(command).await
    }

    pub fn subscribe(&self) -> EventStream {
        self.channels.subscribe()
    }

    /// Fresh transaction id for `SendMessage` / `CreateGroup`.
    pub fn next_txn_id(&self) -> String {
        let n = self.next_txn.fetch_add(1, Ordering::Relaxed);
        format!("txn-{n}")
    }

    /// Send a message and wait for its acknowledgement.
    pub async fn send_message_and_wait(
        &self,
        target_id: impl Into<String>,
        body: impl Into<String>,
    ) -> Result<(), ChatError> {
        let client_txn_id = self.next_txn_id();
        let command = SyncCommand::SendMessage {
            client_txn_id: client_txn_id.clone(),
            target_id: target_id.into(),
            body: body.into(),
        };
        self.run_mutation(client_txn_id, command).await
    }

    /// Create a group and wait for its acknowledgement.
    pub async fn create_group_and_wait(
        &self,
        name: impl Into<String>,
        members: Vec<String>,
    ) -> Result<(), ChatError> {
        let client_txn_id = self.next_txn_id();
        let command = SyncCommand::CreateGroup {
            client_txn_id: client_txn_id.clone(),
            name: name.into(),
            members,
        };
        self.run_mutation(client_txn_id, command).await
    }

    async fn run_mutation(
        &self,
        client_txn_id: String,
        command: SyncCommand,
    ) -> Result<(), ChatError> {
        // Subscribe before sending so the acknowledgement cannot be missed.
        let mut events = self.subscribe();
        self.send(command).await.map_err(runtime_closed)?;

        tokio::select! {
            result = wait_for_ack(&mut events, &client_txn_id) => result,
            () = self.channels.closed() => {
                Err(runtime_closed(SyncChannelError::CommandChannelClosed))
            }
        }
    }
}

/// Wait for the acknowledgement of `client_txn_id`.
///
/// A lagged subscription may have skipped the acknowledgement, so lag fails
/// the wait instead of blocking forever.
async fn wait_for_ack(events: &mut EventStream, client_txn_id: &str) -> Result<(), ChatError> {
    loop {
        match events.recv().await {
            Ok(SyncEvent::MutationAck(ack)) if ack.client_txn_id == client_txn_id => {
                return ack.into_result();
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                return Err(ChatError::new(
                    ChatErrorCategory::Internal,
                    "ack_lost",
                    format!(
                        "acknowledgement for {client_txn_id} may be among {skipped} skipped events"
                    ),
                ));
            }
            Err(RecvError::Closed) => {
                return Err(runtime_closed(SyncChannelError::CommandChannelClosed));
            }
        }
    }
}

/// Spawn the runtime on the current tokio runtime with the given collaborators.
pub fn spawn_runtime<A, C>(config: SyncConfig, api: A, connector: C) -> SyncRuntimeHandle
where
    A: ChatApi,
    C: PushConnector,
{
    let (channels, endpoint) = sync_link(COMMAND_BUFFER, EVENT_BUFFER);
    let runtime = SyncRuntime::new(config, api, connector, endpoint);
    tokio::spawn(async move {
        runtime.run().await;
    });

    SyncRuntimeHandle {
        channels,
        next_txn: Arc::new(AtomicU64::new(1)),
    }
}

/// Spawn the runtime against a bridge at `api_base_url`, deriving the push endpoint from it.
pub fn spawn_http_runtime(
    api_base_url: Url,
    config: SyncConfig,
) -> Result<SyncRuntimeHandle, ChatError> {
    let connector = WebSocketConnector::from_http_base(&api_base_url)?;
    let api = HttpChatApi::new(
        api_base_url,
        Duration::from_millis(config.request_timeout_ms),
    )?;
    Ok(spawn_runtime(config, api, connector))
}

fn runtime_closed(err: SyncChannelError) -> ChatError {
    ChatError::new(ChatErrorCategory::Internal, "runtime_closed", err.to_string())
}

#[cfg(test)]
mod tests {
    use chat_core::{MutationAck, MutationKind, SessionLifecycleState};
    use tokio::sync::broadcast;

    use super::*;

    fn ack(client_txn_id: &str, error: Option<ChatError>) -> SyncEvent {
        SyncEvent::MutationAck(MutationAck {
            client_txn_id: client_txn_id.to_owned(),
            kind: MutationKind::SendMessage,
            error,
        })
    }

    #[tokio::test]
    async fn ack_wait_skips_unrelated_events() {
        let (tx, mut events) = broadcast::channel(8);
        tx.send(SyncEvent::StateChanged {
            state: SessionLifecycleState::Syncing,
        })
        .expect("send");
        tx.send(ack("txn-1", None)).expect("send");
        tx.send(ack(
            "txn-2",
            Some(ChatError::status_not_ok(Some("recipient offline".to_owned()))),
        ))
        .expect("send");

        let err = wait_for_ack(&mut events, "txn-2")
            .await
            .expect_err("txn-2 was rejected");
        assert_eq!(err.code, "status_not_ok");
        assert_eq!(err.message, "recipient offline");
    }

    #[tokio::test]
    async fn ack_wait_fails_when_subscription_lags() {
        let (tx, mut events) = broadcast::channel(2);
        tx.send(ack("txn-7", None)).expect("send");
        for n in 0..4 {
            tx.send(ack(&format!("other-{n}"), None)).expect("send");
        }

        let err = tokio::time::timeout(Duration::from_secs(1), wait_for_ack(&mut events, "txn-7"))
            .await
            .expect("a lagged wait must not hang")
            .expect_err("the acknowledgement was overwritten");
        assert_eq!(err.code, "ack_lost");
    }

    #[tokio::test]
    async fn ack_wait_reports_stopped_runtime() {
        let (tx, mut events) = broadcast::channel::<SyncEvent>(2);
        drop(tx);

        let err = wait_for_ack(&mut events, "txn-1")
            .await
            .expect_err("closed stream");
        assert_eq!(err.code, "runtime_closed");
    }
}
