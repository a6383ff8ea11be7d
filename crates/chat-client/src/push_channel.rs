use std::sync::Arc;

use chat_core::{
    PushChannelState, PushChannelStatus, PushConnector, PushEventKind, ReconnectState,
    RetryPolicy, SessionId, classify_push_frame,
};
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// What the push channel reports back to the reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PushSignal {
    Status(PushChannelStatus),
    Resync(PushEventKind),
}

/// Keep one push connection alive for `session` until `cancel` fires.
///
/// Every recognized frame becomes a [`PushSignal::Resync`]. A close or error
/// schedules a reconnect with jittered exponential backoff; a successful open
/// resets the backoff.
pub(crate) async fn run_push_channel<C, F>(
    connector: Arc<C>,
    session: SessionId,
    policy: RetryPolicy,
    cancel: CancellationToken,
    emit: F,
) where
    C: PushConnector,
    F: Fn(PushSignal) + Send,
{
    let mut reconnect = ReconnectState::new(policy);

    'session: loop {
        emit(status(PushChannelState::Connecting, reconnect.attempt(), None));

        let connected = tokio::select! {
            _ = cancel.cancelled() => break 'session,
            connected = connector.connect(&session) => connected,
        };

        match connected {
            Ok(mut frames) => {
                reconnect.on_open();
                info!(session = %session, "push channel open");
                emit(status(PushChannelState::Open, 0, None));

                loop {
                    let frame = tokio::select! {
                        _ = cancel.cancelled() => break 'session,
                        frame = frames.next() => frame,
                    };

                    match frame {
                        Some(Ok(text)) => match classify_push_frame(&text) {
                            Some(kind) => {
                                debug!(kind = kind.as_str(), "push notification");
                                emit(PushSignal::Resync(kind));
                            }
                            None => trace!(frame = %text, "ignoring push frame"),
                        },
                        Some(Err(err)) => {
                            warn!(code = %err.code, error = %err.message, "push channel error");
                            break;
                        }
                        None => {
                            debug!("push channel closed by server");
                            break;
                        }
                    }
                }
            }
            Err(err) => {
                warn!(
                    code = %err.code,
                    error = %err.message,
                    attempt = reconnect.attempt(),
                    "push channel connect failed"
                );
            }
        }

        let delay = reconnect.next_delay(&mut rand::thread_rng());
        let retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        emit(status(
            PushChannelState::Closed,
            reconnect.attempt(),
            Some(retry_in_ms),
        ));

        tokio::select! {
            _ = cancel.cancelled() => break 'session,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    debug!(session = %session, "push channel stopped");
}

fn status(state: PushChannelState, attempt: u32, retry_in_ms: Option<u64>) -> PushSignal {
    PushSignal::Status(PushChannelStatus {
        state,
        attempt,
        retry_in_ms,
    })
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::{
            Mutex,
            atomic::{AtomicU32, Ordering},
        },
        time::Duration,
    };

    use chat_core::{ChatError, ChatErrorCategory, PushFrames};
    use futures_util::stream;
    use tokio::{sync::mpsc, time::timeout};

    use super::*;

    /// Hands out scripted connections; an exhausted script fails every connect.
    #[derive(Default)]
    struct ScriptedConnector {
        script: Mutex<VecDeque<Result<Vec<Result<String, ChatError>>, ChatError>>>,
        connects: AtomicU32,
    }

    impl ScriptedConnector {
        fn new(script: Vec<Result<Vec<Result<String, ChatError>>, ChatError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                connects: AtomicU32::new(0),
            }
        }
    }

    impl PushConnector for ScriptedConnector {
        async fn connect(&self, _session: &SessionId) -> Result<PushFrames, ChatError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().expect("script lock").pop_front();
            match next {
                Some(Ok(frames)) => Ok(stream::iter(frames).boxed()),
                Some(Err(err)) => Err(err),
                None => Err(refused()),
            }
        }
    }

    fn refused() -> ChatError {
        ChatError::new(ChatErrorCategory::Channel, "push_connect_failed", "refused")
    }

    fn spawn_channel(
        connector: Arc<ScriptedConnector>,
        policy: RetryPolicy,
    ) -> (
        CancellationToken,
        mpsc::UnboundedReceiver<PushSignal>,
        tokio::task::JoinHandle<()>,
    ) {
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_push_channel(
            connector,
            SessionId::parse("alice").expect("session"),
            policy,
            cancel.clone(),
            move |signal| {
                let _ = tx.send(signal);
            },
        ));
        (cancel, rx, task)
    }

    async fn next_signal(rx: &mut mpsc::UnboundedReceiver<PushSignal>) -> PushSignal {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("signal timeout")
            .expect("signal receive")
    }

    fn state_of(signal: &PushSignal) -> Option<(PushChannelState, u32)> {
        match signal {
            PushSignal::Status(status) => Some((status.state, status.attempt)),
            PushSignal::Resync(_) => None,
        }
    }

    #[tokio::test]
    async fn recognized_frames_become_resync_signals() {
        let connector = Arc::new(ScriptedConnector::new(vec![Ok(vec![
            Ok(r#"{"type":"new_message","from":"bob"}"#.to_owned()),
            Ok(r#"{"type":"pong"}"#.to_owned()),
            Ok("garbage".to_owned()),
            Ok(r#"{"type":"update_ui"}"#.to_owned()),
        ])]));
        let (cancel, mut rx, task) = spawn_channel(connector, RetryPolicy::new(60_000, 60_000));

        assert_eq!(
            state_of(&next_signal(&mut rx).await),
            Some((PushChannelState::Connecting, 0))
        );
        assert_eq!(
            state_of(&next_signal(&mut rx).await),
            Some((PushChannelState::Open, 0))
        );
        assert_eq!(
            next_signal(&mut rx).await,
            PushSignal::Resync(PushEventKind::NewMessage)
        );
        assert_eq!(
            next_signal(&mut rx).await,
            PushSignal::Resync(PushEventKind::UpdateUi)
        );

        // Stream end counts as a close.
        match next_signal(&mut rx).await {
            PushSignal::Status(status) => {
                assert_eq!(status.state, PushChannelState::Closed);
                assert_eq!(status.attempt, 1);
                assert_eq!(status.retry_in_ms, Some(60_000));
            }
            other => panic!("unexpected signal: {other:?}"),
        }

        cancel.cancel();
        timeout(Duration::from_secs(2), task)
            .await
            .expect("push task should stop")
            .expect("push task should not panic");
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_grows_while_connects_fail_and_resets_after_open() {
        let connector = Arc::new(ScriptedConnector::new(vec![
            Err(refused()),
            Err(refused()),
            Ok(vec![Err(ChatError::new(
                ChatErrorCategory::Channel,
                "push_error",
                "reset by peer",
            ))]),
        ]));
        let (cancel, mut rx, _task) =
            spawn_channel(Arc::clone(&connector), RetryPolicy::new(100, 1_000));

        let mut closes = Vec::new();
        while closes.len() < 4 {
            if let PushSignal::Status(status) = next_signal(&mut rx).await
                && status.state == PushChannelState::Closed
            {
                closes.push((status.attempt, status.retry_in_ms));
            }
        }
        cancel.cancel();

        assert_eq!(
            closes,
            vec![
                (1, Some(100)),
                (2, Some(200)),
                // Opened, then errored: backoff restarts from the base delay.
                (1, Some(100)),
                (2, Some(200)),
            ]
        );
        assert!(connector.connects.load(Ordering::SeqCst) >= 4);
    }

    #[tokio::test]
    async fn cancellation_stops_pending_reconnect() {
        let connector = Arc::new(ScriptedConnector::new(Vec::new()));
        let (cancel, mut rx, task) =
            spawn_channel(Arc::clone(&connector), RetryPolicy::new(60_000, 60_000));

        loop {
            if let Some((PushChannelState::Closed, _)) = state_of(&next_signal(&mut rx).await) {
                break;
            }
        }
        cancel.cancel();
        timeout(Duration::from_secs(2), task)
            .await
            .expect("push task should stop while sleeping")
            .expect("push task should not panic");
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
    }
}
