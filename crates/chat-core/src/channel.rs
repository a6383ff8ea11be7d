use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

use crate::types::{SyncCommand, SyncEvent};

/// Broadcast event stream type used by presentation subscribers.
pub type EventStream = broadcast::Receiver<SyncEvent>;

/// Errors returned by sync channel operations.
#[derive(Debug, Error)]
pub enum SyncChannelError {
    /// The runtime dropped its command receiver.
    #[error("command channel is closed")]
    CommandChannelClosed,
}

/// Front-end side of the runtime link: submit commands, subscribe to events.
///
/// The runtime sees its command stream end once every clone is dropped.
#[derive(Clone, Debug)]
pub struct SyncChannels {
    command_tx: mpsc::Sender<SyncCommand>,
    event_tx: broadcast::Sender<SyncEvent>,
}

/// Runtime side of the link: the single command consumer and event publisher.
#[derive(Debug)]
pub struct RuntimeEndpoint {
    command_rx: mpsc::Receiver<SyncCommand>,
    event_tx: broadcast::Sender<SyncEvent>,
}

/// Create a connected front-end/runtime pair.
///
/// `command_buffer` bounds queued commands (senders wait when full);
/// `event_buffer` is how far a subscriber may fall behind before it lags.
pub fn sync_link(command_buffer: usize, event_buffer: usize) -> (SyncChannels, RuntimeEndpoint) {
    let (command_tx, command_rx) = mpsc::channel(command_buffer.max(1));
    let (event_tx, _) = broadcast::channel(event_buffer.max(1));

    (
        SyncChannels {
            command_tx,
            event_tx: event_tx.clone(),
        },
        RuntimeEndpoint {
            command_rx,
            event_tx,
        },
    )
}

impl SyncChannels {
    /// Subscribe to events published after this call.
    pub fn subscribe(&self) -> EventStream {
        self.event_tx.subscribe()
    }

    /// Queue one command, waiting while the runtime's buffer is full.
    pub async fn send_command(&self, command: SyncCommand) -> Result<(), SyncChannelError> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| SyncChannelError::CommandChannelClosed)
    }

    /// Whether the runtime has stopped consuming commands.
    pub fn is_closed(&self) -> bool {
        self.command_tx.is_closed()
    }

    /// Resolves once the runtime has stopped consuming commands.
    pub async fn closed(&self) {
        self.command_tx.closed().await;
    }
}

impl RuntimeEndpoint {
    /// Next queued command; `None` once every front-end handle is gone.
    pub async fn next_command(&mut self) -> Option<SyncCommand> {
        self.command_rx.recv().await
    }

    /// Publish to current subscribers. Having none is not an error.
    pub fn publish(&self, event: SyncEvent) {
        let _ = self.event_tx.send(event);
    }
}
