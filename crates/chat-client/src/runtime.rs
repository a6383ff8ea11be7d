use std::{sync::Arc, time::Duration};

use chat_core::{
    ApplyOutcome, ChatApi, ChatError, ChatErrorCategory, ConversationStore, FetchSeq,
    MutationKind, MutationOutcome, PushConnector, PushEventKind, RetryPolicy, RuntimeEndpoint,
    SessionId, SessionStateMachine, Snapshot, SyncCommand, SyncConfig, SyncEvent,
    normalize_fatal_error, normalize_mutation_outcome,
};
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{Interval, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::push_channel::{PushSignal, run_push_channel};

type Transition = (SessionStateMachine, Vec<SyncEvent>);

/// Why a snapshot fetch was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FetchReason {
    Timer,
    Manual,
    Push(PushEventKind),
    Mutation(MutationKind),
}

impl FetchReason {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Timer => "timer",
            Self::Manual => "manual",
            Self::Push(kind) => kind.as_str(),
            Self::Mutation(MutationKind::SendMessage) => "send_message",
            Self::Mutation(MutationKind::CreateGroup) => "create_group",
        }
    }
}

/// Completions posted back to the actor by its spawned tasks.
///
/// Every message carries the epoch of the session that spawned it; anything
/// from an older epoch is dropped so nothing publishes after teardown.
#[derive(Debug)]
pub(crate) enum RuntimeMessage {
    FetchCompleted {
        epoch: u64,
        seq: FetchSeq,
        result: Result<Snapshot, ChatError>,
    },
    MutationCompleted {
        epoch: u64,
        client_txn_id: String,
        kind: MutationKind,
        result: Result<(), ChatError>,
    },
    ResyncDue {
        epoch: u64,
        reason: FetchReason,
    },
    Push {
        epoch: u64,
        signal: PushSignal,
    },
}

struct ActiveSession {
    id: SessionId,
    epoch: u64,
    store: ConversationStore,
    poll: Interval,
    cancel: CancellationToken,
    push_task: JoinHandle<()>,
}

/// Single-owner reconciler: the only place conversation state is mutated.
pub(crate) struct SyncRuntime<A, C> {
    endpoint: RuntimeEndpoint,
    internal_tx: mpsc::UnboundedSender<RuntimeMessage>,
    internal_rx: mpsc::UnboundedReceiver<RuntimeMessage>,
    state_machine: SessionStateMachine,
    config: SyncConfig,
    api: Arc<A>,
    connector: Arc<C>,
    session: Option<ActiveSession>,
    last_epoch: u64,
}

impl<A: ChatApi, C: PushConnector> SyncRuntime<A, C> {
    pub(crate) fn new(
        config: SyncConfig,
        api: A,
        connector: C,
        endpoint: RuntimeEndpoint,
    ) -> Self {
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        Self {
            endpoint,
            internal_tx,
            internal_rx,
            state_machine: SessionStateMachine::default(),
            config,
            api: Arc::new(api),
            connector: Arc::new(connector),
            session: None,
            last_epoch: 0,
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.endpoint.next_command() => {
                    let Some(command) = command else { break };
                    if let Err(err) = self.handle_command(command).await {
                        self.emit(normalize_fatal_error(err));
                    }
                }
                Some(message) = self.internal_rx.recv() => self.handle_internal(message),
                () = next_poll_tick(&mut self.session) => self.dispatch_fetch(FetchReason::Timer),
            }
        }

        self.teardown_session();
        debug!("sync runtime stopped");
    }

    async fn handle_command(&mut self, command: SyncCommand) -> Result<(), ChatError> {
        let transition = self.validate_transition(&command);

        match command {
            SyncCommand::Login { client_id } => {
                self.handle_login(transition, client_id, true).await;
                Ok(())
            }
            SyncCommand::RestoreSession { client_id } => {
                self.handle_login(transition, client_id, false).await;
                Ok(())
            }
            SyncCommand::Resync => {
                self.commit_transition(transition?);
                self.dispatch_fetch(FetchReason::Manual);
                Ok(())
            }
            SyncCommand::SelectConversation { conversation_id } => {
                self.handle_select(transition?, conversation_id)
            }
            SyncCommand::SendMessage {
                client_txn_id,
                target_id,
                body,
            } => {
                self.handle_send_message(transition, client_txn_id, target_id, body);
                Ok(())
            }
            SyncCommand::CreateGroup {
                client_txn_id,
                name,
                members,
            } => {
                self.handle_create_group(transition, client_txn_id, name, members);
                Ok(())
            }
            SyncCommand::Logout => {
                self.handle_logout(transition?);
                Ok(())
            }
        }
    }

    async fn handle_login(
        &mut self,
        transition: Result<Transition, ChatError>,
        raw_client_id: String,
        announce: bool,
    ) {
        let transition = match transition {
            Ok(transition) => transition,
            Err(err) => {
                self.emit_auth_failure(err);
                return;
            }
        };

        let session = match SessionId::parse(&raw_client_id) {
            Ok(session) => session,
            Err(err) => {
                warn!(code = %err.code, "rejecting login");
                self.emit_auth_failure(err);
                return;
            }
        };

        self.commit_transition(transition);

        if announce && let Err(err) = self.api.login(&session).await {
            warn!(session = %session, code = %err.code, error = %err.message, "login failed");
            self.finish_auth(false, Some(err));
            return;
        }

        info!(session = %session, restored = !announce, "session authenticated");
        self.finish_auth(true, None);
        self.start_session(session);
    }

    fn handle_select(
        &mut self,
        transition: Transition,
        conversation_id: String,
    ) -> Result<(), ChatError> {
        let session = self.require_session_mut()?;
        let state = session.store.select(&conversation_id)?;
        debug!(conversation = %conversation_id, revision = state.revision, "conversation selected");

        self.commit_transition(transition);
        self.emit(SyncEvent::StatePublished(state));
        Ok(())
    }

    fn handle_send_message(
        &mut self,
        transition: Result<Transition, ChatError>,
        client_txn_id: String,
        target_id: String,
        body: String,
    ) {
        let kind = MutationKind::SendMessage;
        let prepared = transition.and_then(|transition| {
            let target_id = non_empty(&target_id, "empty_target", "conversation id is required")?;
            let body = non_empty(&body, "empty_message", "message body is empty")?;
            Ok((transition, target_id, body))
        });
        let (transition, target_id, body) = match prepared {
            Ok(prepared) => prepared,
            Err(error) => {
                self.reject_mutation(client_txn_id, kind, error);
                return;
            }
        };
        let (session_id, epoch) = match self.require_session_mut() {
            Ok(session) => (session.id.clone(), session.epoch),
            Err(error) => {
                self.reject_mutation(client_txn_id, kind, error);
                return;
            }
        };

        self.commit_transition(transition);
        debug!(client_txn_id = %client_txn_id, target = %target_id, "sending message");

        let api = Arc::clone(&self.api);
        let internal_tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = api.send_message(&session_id, &target_id, &body).await;
            let _ = internal_tx.send(RuntimeMessage::MutationCompleted {
                epoch,
                client_txn_id,
                kind,
                result,
            });
        });
    }

    fn handle_create_group(
        &mut self,
        transition: Result<Transition, ChatError>,
        client_txn_id: String,
        name: String,
        members: Vec<String>,
    ) {
        let kind = MutationKind::CreateGroup;
        let prepared = transition.and_then(|transition| {
            let name = non_empty(&name, "empty_group_name", "group name is required")?;
            let members = normalize_members(members)?;
            Ok((transition, name, members))
        });
        let (transition, name, members) = match prepared {
            Ok(prepared) => prepared,
            Err(error) => {
                self.reject_mutation(client_txn_id, kind, error);
                return;
            }
        };
        let (session_id, epoch) = match self.require_session_mut() {
            Ok(session) => (session.id.clone(), session.epoch),
            Err(error) => {
                self.reject_mutation(client_txn_id, kind, error);
                return;
            }
        };

        self.commit_transition(transition);
        debug!(client_txn_id = %client_txn_id, group = %name, members = members.len(), "creating group");

        let api = Arc::clone(&self.api);
        let internal_tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = api.create_group(&session_id, &name, &members).await;
            let _ = internal_tx.send(RuntimeMessage::MutationCompleted {
                epoch,
                client_txn_id,
                kind,
                result,
            });
        });
    }

    /// Tears the session down locally; the remote release runs off the actor loop.
    fn handle_logout(&mut self, transition: Transition) {
        let session = self.teardown_session();
        self.commit_transition(transition);

        let Some(session) = session else {
            return;
        };
        info!(session = %session, "session torn down");
        let api = Arc::clone(&self.api);
        tokio::spawn(async move {
            if let Err(err) = api.logout(&session).await {
                warn!(
                    session = %session,
                    code = %err.code,
                    error = %err.message,
                    "logout request failed; local session already cleared"
                );
            }
        });
    }

    fn handle_internal(&mut self, message: RuntimeMessage) {
        match message {
            RuntimeMessage::FetchCompleted { epoch, seq, result } => {
                self.on_fetch_completed(epoch, seq, result)
            }
            RuntimeMessage::MutationCompleted {
                epoch,
                client_txn_id,
                kind,
                result,
            } => self.on_mutation_completed(epoch, client_txn_id, kind, result),
            RuntimeMessage::ResyncDue { epoch, reason } => {
                if self.is_current(epoch) {
                    self.dispatch_fetch(reason);
                }
            }
            RuntimeMessage::Push { epoch, signal } => {
                if !self.is_current(epoch) {
                    trace!(epoch, "dropping push signal from a torn-down session");
                    return;
                }
                match signal {
                    PushSignal::Status(status) => self.emit(SyncEvent::PushChannel(status)),
                    PushSignal::Resync(kind) => self.dispatch_fetch(FetchReason::Push(kind)),
                }
            }
        }
    }

    fn on_fetch_completed(
        &mut self,
        epoch: u64,
        seq: FetchSeq,
        result: Result<Snapshot, ChatError>,
    ) {
        let Some(session) = self.session.as_mut().filter(|session| session.epoch == epoch)
        else {
            trace!(epoch, seq, "dropping fetch result from a torn-down session");
            return;
        };

        let snapshot = match result {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(
                    seq,
                    code = %err.code,
                    error = %err.message,
                    "snapshot fetch failed; keeping last published state"
                );
                return;
            }
        };

        match session.store.apply_snapshot(seq, snapshot) {
            ApplyOutcome::Applied(state) => {
                debug!(
                    seq,
                    revision = state.revision,
                    conversations = state.conversations.len(),
                    selected = ?state.selection.selected_id(),
                    "snapshot reconciled"
                );
                self.emit(SyncEvent::StatePublished(state));
            }
            ApplyOutcome::Stale { seq, last_applied } => {
                debug!(seq, last_applied, "discarding stale snapshot");
            }
        }
    }

    fn on_mutation_completed(
        &mut self,
        epoch: u64,
        client_txn_id: String,
        kind: MutationKind,
        result: Result<(), ChatError>,
    ) {
        match &result {
            Ok(()) => info!(client_txn_id = %client_txn_id, kind = ?kind, "mutation accepted"),
            Err(err) => warn!(
                client_txn_id = %client_txn_id,
                kind = ?kind,
                code = %err.code,
                error = %err.message,
                "mutation failed"
            ),
        }

        let accepted = result.is_ok();
        self.emit(normalize_mutation_outcome(
            client_txn_id,
            kind,
            MutationOutcome::from(result),
        ));
        if accepted {
            self.schedule_resync(epoch, kind);
        }
    }

    fn schedule_resync(&self, epoch: u64, kind: MutationKind) {
        let Some(session) = self.session.as_ref().filter(|session| session.epoch == epoch) else {
            return;
        };
        let delay_ms = match kind {
            MutationKind::SendMessage => self.config.send_resync_delay_ms,
            MutationKind::CreateGroup => self.config.group_resync_delay_ms,
        };
        let delay = Duration::from_millis(delay_ms);
        let cancel = session.cancel.child_token();
        let internal_tx = self.internal_tx.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = internal_tx.send(RuntimeMessage::ResyncDue {
                        epoch,
                        reason: FetchReason::Mutation(kind),
                    });
                }
            }
        });
    }

    fn dispatch_fetch(&mut self, reason: FetchReason) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let seq = session.store.issue_fetch();
        let epoch = session.epoch;
        let session_id = session.id.clone();
        let cancel = session.cancel.child_token();
        let api = Arc::clone(&self.api);
        let internal_tx = self.internal_tx.clone();
        trace!(seq, reason = reason.as_str(), "dispatching snapshot fetch");

        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                result = api.fetch_snapshot(&session_id) => {
                    let _ = internal_tx.send(RuntimeMessage::FetchCompleted { epoch, seq, result });
                }
            }
        });
    }

    fn start_session(&mut self, id: SessionId) {
        self.last_epoch = self.last_epoch.wrapping_add(1);
        let epoch = self.last_epoch;
        let cancel = CancellationToken::new();

        // The first tick completes immediately and drives the initial fetch.
        let mut poll = tokio::time::interval(Duration::from_millis(
            self.config.poll_interval_ms.max(1),
        ));
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let internal_tx = self.internal_tx.clone();
        let push_task = tokio::spawn(run_push_channel(
            Arc::clone(&self.connector),
            id.clone(),
            RetryPolicy::from(&self.config),
            cancel.child_token(),
            move |signal| {
                let _ = internal_tx.send(RuntimeMessage::Push { epoch, signal });
            },
        ));

        debug!(session = %id, epoch, "sync session started");
        self.session = Some(ActiveSession {
            id,
            epoch,
            store: ConversationStore::default(),
            poll,
            cancel,
            push_task,
        });
    }

    fn teardown_session(&mut self) -> Option<SessionId> {
        let session = self.session.take()?;
        session.cancel.cancel();
        session.push_task.abort();
        Some(session.id)
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.epoch == epoch)
    }

    fn require_session_mut(&mut self) -> Result<&mut ActiveSession, ChatError> {
        self.session.as_mut().ok_or_else(|| {
            ChatError::new(
                ChatErrorCategory::Internal,
                "session_not_active",
                "no active sync session",
            )
        })
    }

    fn validate_transition(&self, command: &SyncCommand) -> Result<Transition, ChatError> {
        let mut candidate = self.state_machine.clone();
        let events = candidate.apply(command)?;
        Ok((candidate, events))
    }

    fn commit_transition(&mut self, (candidate, events): Transition) {
        self.state_machine = candidate;
        for event in events {
            self.emit(event);
        }
    }

    fn finish_auth(&mut self, success: bool, error: Option<ChatError>) {
        if let Ok(state_event) = self.state_machine.on_auth_result(success) {
            self.emit(state_event);
        }

        self.emit(SyncEvent::AuthResult {
            success,
            error_code: error.map(|err| err.code),
        });
    }

    fn emit_auth_failure(&self, error: ChatError) {
        self.emit(SyncEvent::AuthResult {
            success: false,
            error_code: Some(error.code),
        });
    }

    fn reject_mutation(&self, client_txn_id: String, kind: MutationKind, error: ChatError) {
        warn!(client_txn_id = %client_txn_id, kind = ?kind, code = %error.code, "mutation rejected");
        self.emit(normalize_mutation_outcome(
            client_txn_id,
            kind,
            MutationOutcome::Failure { error },
        ));
    }

    fn emit(&self, event: SyncEvent) {
        self.endpoint.publish(event);
    }
}

async fn next_poll_tick(session: &mut Option<ActiveSession>) {
    match session {
        Some(session) => {
            session.poll.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

fn non_empty(value: &str, code: &str, message: &str) -> Result<String, ChatError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ChatError::new(ChatErrorCategory::Config, code, message));
    }
    Ok(trimmed.to_owned())
}

/// Trim, drop blanks and duplicates while keeping first-seen order.
fn normalize_members(members: Vec<String>) -> Result<Vec<String>, ChatError> {
    let mut normalized: Vec<String> = Vec::with_capacity(members.len());
    for member in members {
        let member = member.trim();
        if !member.is_empty() && !normalized.iter().any(|known| known == member) {
            normalized.push(member.to_owned());
        }
    }

    if normalized.is_empty() {
        return Err(ChatError::new(
            ChatErrorCategory::Config,
            "empty_members",
            "a group needs at least one member",
        ));
    }
    Ok(normalized)
}
