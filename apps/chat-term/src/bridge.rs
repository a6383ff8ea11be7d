//! Bridge that wires terminal input and sync runtime events into view snapshots.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chat_client::SyncRuntimeHandle;
use chat_core::{SessionLifecycleState, SyncCommand, SyncEvent};
use chat_platform::SessionStore;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::{
    config::TermConfig,
    state::{TermSnapshot, TermState},
};

/// Callback used to publish new view snapshots.
pub type ViewCallback = Arc<dyn Fn(TermSnapshot) + Send + Sync + 'static>;

pub const HELP_TEXT: &str = "\
commands:
  /login <id>                 sign in with a client id
  /select <id>                open a conversation
  /send <text>                send to the open conversation (bare text works too)
  /group <name> <m1,m2,...>   create a group
  /resync                     fetch now
  /logout                     sign out and forget the stored id
  /quit                       exit";

/// One parsed line of terminal input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputCommand {
    Login(String),
    Select(String),
    Send(String),
    Group { name: String, members: Vec<String> },
    Resync,
    Logout,
    Help,
    Quit,
}

/// Parse one input line. Blank lines yield `Ok(None)`; malformed commands yield a usage hint.
pub fn parse_input(line: &str) -> Result<Option<InputCommand>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(command_line) = line.strip_prefix('/') else {
        return Ok(Some(InputCommand::Send(line.to_owned())));
    };

    let (command, rest) = match command_line.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, rest.trim()),
        None => (command_line, ""),
    };

    let command = match command {
        "login" => InputCommand::Login(required(rest, "/login <id>")?),
        "select" => InputCommand::Select(required(rest, "/select <id>")?),
        "send" => InputCommand::Send(required(rest, "/send <text>")?),
        "group" => {
            let usage = "/group <name> <m1,m2,...>";
            let Some((name, members)) = rest.split_once(char::is_whitespace) else {
                return Err(format!("usage: {usage}"));
            };
            let members = members
                .split(',')
                .map(str::trim)
                .filter(|member| !member.is_empty())
                .map(str::to_owned)
                .collect::<Vec<_>>();
            if members.is_empty() {
                return Err(format!("usage: {usage}"));
            }
            InputCommand::Group {
                name: name.to_owned(),
                members,
            }
        }
        "resync" => InputCommand::Resync,
        "logout" => InputCommand::Logout,
        "help" => InputCommand::Help,
        "quit" | "exit" => InputCommand::Quit,
        other => return Err(format!("unknown command '/{other}'; try /help")),
    };
    Ok(Some(command))
}

fn required(rest: &str, usage: &str) -> Result<String, String> {
    if rest.is_empty() {
        Err(format!("usage: {usage}"))
    } else {
        Ok(rest.to_owned())
    }
}

/// Bridges terminal actions and runtime events.
pub struct TermBridge {
    command_tx: mpsc::UnboundedSender<SyncCommand>,
    runtime: SyncRuntimeHandle,
    state: Arc<Mutex<TermState>>,
    view: ViewCallback,
    pending_login: Arc<Mutex<Option<String>>>,
    command_task: tokio::task::JoinHandle<()>,
    event_task: tokio::task::JoinHandle<()>,
}

impl TermBridge {
    /// Start command/event workers and enqueue the startup login or restore.
    pub fn spawn(
        config: &TermConfig,
        runtime: SyncRuntimeHandle,
        store: Arc<dyn SessionStore>,
        view: ViewCallback,
    ) -> Arc<Self> {
        let persisted = match store.load() {
            Ok(client_id) => client_id,
            Err(err) => {
                warn!(error = %err, "failed loading session profile; ignoring persisted id");
                None
            }
        };
        info!(
            restoring = persisted.is_some(),
            prefilled = config.prefill_client_id.is_some(),
            "spawning terminal bridge"
        );

        let state = Arc::new(Mutex::new(TermState::new()));
        let pending_login = Arc::new(Mutex::new(None));

        let (command_tx, mut command_rx) = mpsc::unbounded_channel::<SyncCommand>();
        let runtime_for_commands = runtime.clone();
        let command_task = tokio::spawn(async move {
            debug!("terminal command worker started");
            while let Some(command) = command_rx.recv().await {
                debug!(command = command_kind(&command), "forwarding command");
                if let Err(err) = runtime_for_commands.send(command).await {
                    error!(error = %err, "sync runtime stopped accepting commands");
                    break;
                }
            }
            debug!("terminal command worker exiting");
        });

        let state_for_events = Arc::clone(&state);
        let view_for_events = Arc::clone(&view);
        let pending_for_events = Arc::clone(&pending_login);
        let mut events = runtime.subscribe();
        let event_task = tokio::spawn(async move {
            debug!("terminal event worker started");
            while let Ok(event) = recv_event(&mut events).await {
                let snapshot = apply_runtime_event(
                    event,
                    &state_for_events,
                    store.as_ref(),
                    &pending_for_events,
                );
                (view_for_events)(snapshot);
            }
            warn!("terminal event worker exiting: runtime event stream closed");
        });

        let bridge = Arc::new(Self {
            command_tx,
            runtime,
            state,
            view,
            pending_login,
            command_task,
            event_task,
        });

        bridge.publish_snapshot();
        if let Some(client_id) = persisted {
            if bridge.begin_auth(client_id.clone()) {
                bridge.enqueue_command(SyncCommand::RestoreSession { client_id });
            }
        } else if let Some(client_id) = config.prefill_client_id.clone() {
            bridge.submit_login(client_id);
        }
        bridge
    }

    /// Apply one parsed user command. `Help` and `Quit` are handled by the caller.
    pub fn handle_input(&self, command: InputCommand) {
        match command {
            InputCommand::Login(client_id) => self.submit_login(client_id),
            InputCommand::Select(conversation_id) => {
                self.enqueue_command(SyncCommand::SelectConversation { conversation_id });
            }
            InputCommand::Send(body) => self.submit_message(body),
            InputCommand::Group { name, members } => self.submit_group(name, members),
            InputCommand::Resync => self.enqueue_command(SyncCommand::Resync),
            InputCommand::Logout => self.enqueue_command(SyncCommand::Logout),
            InputCommand::Help | InputCommand::Quit => {}
        }
    }

    /// Surface a local input error without touching the runtime.
    pub fn show_error(&self, text: impl Into<String>) {
        let snapshot = {
            let mut state = self.lock_state();
            state.set_error_text(text);
            state.snapshot()
        };
        (self.view)(snapshot);
    }

    fn submit_login(&self, client_id: String) {
        let client_id = client_id.trim().to_owned();
        info!(%client_id, "login requested");
        if self.begin_auth(client_id.clone()) {
            self.enqueue_command(SyncCommand::Login { client_id });
        }
    }

    fn submit_message(&self, body: String) {
        let target_id = self
            .lock_state()
            .selected_conversation_id()
            .map(str::to_owned);
        let Some(target_id) = target_id else {
            self.show_error("select a conversation before sending messages");
            return;
        };

        let client_txn_id = self.runtime.next_txn_id();
        self.lock_state()
            .mark_mutation_requested(client_txn_id.clone());
        debug!(%target_id, %client_txn_id, "send requested");
        self.enqueue_command(SyncCommand::SendMessage {
            client_txn_id,
            target_id,
            body,
        });
    }

    fn submit_group(&self, name: String, members: Vec<String>) {
        let members = {
            let state = self.lock_state();
            exclude_own_id(members, state.own_client_id())
        };

        let client_txn_id = self.runtime.next_txn_id();
        self.lock_state()
            .mark_mutation_requested(client_txn_id.clone());
        debug!(%name, member_count = members.len(), %client_txn_id, "group creation requested");
        self.enqueue_command(SyncCommand::CreateGroup {
            client_txn_id,
            name,
            members,
        });
    }

    /// Claim the view for `client_id`; false when a session is already running or starting.
    fn begin_auth(&self, client_id: String) -> bool {
        let (accepted, snapshot) = {
            let mut state = self.lock_state();
            let accepted = match state.begin_login(client_id.clone()) {
                Ok(()) => true,
                Err(reason) => {
                    warn!(%client_id, %reason, "login refused locally");
                    false
                }
            };
            (accepted, state.snapshot())
        };
        if accepted {
            *lock(&self.pending_login) = Some(client_id);
        }
        (self.view)(snapshot);
        accepted
    }

    fn enqueue_command(&self, command: SyncCommand) {
        if self.command_tx.send(command).is_err() {
            error!("failed to enqueue command: command worker stopped");
        }
    }

    fn publish_snapshot(&self) {
        let snapshot = self.lock_state().snapshot();
        (self.view)(snapshot);
    }

    fn lock_state(&self) -> MutexGuard<'_, TermState> {
        lock(&self.state)
    }
}

impl Drop for TermBridge {
    fn drop(&mut self) {
        info!("shutting down terminal bridge tasks");
        self.command_task.abort();
        self.event_task.abort();
    }
}

/// Feed one runtime event through persistence and the reducer.
///
/// A successful auth persists the pending id; a logout forgets it.
fn apply_runtime_event(
    event: SyncEvent,
    state: &Mutex<TermState>,
    store: &dyn SessionStore,
    pending_login: &Mutex<Option<String>>,
) -> TermSnapshot {
    debug!(event = event_kind(&event), "received runtime event");
    match &event {
        SyncEvent::AuthResult { success: true, .. } => {
            if let Some(client_id) = lock(pending_login).take()
                && let Err(err) = store.save(&client_id)
            {
                warn!(error = %err, "failed persisting session profile after login");
            }
        }
        SyncEvent::AuthResult { success: false, .. } => {
            lock(pending_login).take();
        }
        SyncEvent::StateChanged {
            state: SessionLifecycleState::LoggedOut,
        } => {
            lock(pending_login).take();
            if let Err(err) = store.clear() {
                warn!(error = %err, "failed clearing session profile on logout");
            }
        }
        _ => {}
    }

    let mut state = lock(state);
    state.handle_sync_event(event);
    state.snapshot()
}

fn exclude_own_id(members: Vec<String>, own_id: Option<&str>) -> Vec<String> {
    members
        .into_iter()
        .filter(|member| Some(member.as_str()) != own_id)
        .collect()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn recv_event(events: &mut broadcast::Receiver<SyncEvent>) -> Result<SyncEvent, ()> {
    loop {
        match events.recv().await {
            Ok(event) => return Ok(event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "view lagged behind runtime events");
            }
            Err(broadcast::error::RecvError::Closed) => return Err(()),
        }
    }
}

fn command_kind(command: &SyncCommand) -> &'static str {
    match command {
        SyncCommand::Login { .. } => "Login",
        SyncCommand::RestoreSession { .. } => "RestoreSession",
        SyncCommand::Resync => "Resync",
        SyncCommand::SelectConversation { .. } => "SelectConversation",
        SyncCommand::SendMessage { .. } => "SendMessage",
        SyncCommand::CreateGroup { .. } => "CreateGroup",
        SyncCommand::Logout => "Logout",
    }
}

fn event_kind(event: &SyncEvent) -> &'static str {
    match event {
        SyncEvent::StateChanged { .. } => "StateChanged",
        SyncEvent::AuthResult { .. } => "AuthResult",
        SyncEvent::StatePublished(_) => "StatePublished",
        SyncEvent::PushChannel(_) => "PushChannel",
        SyncEvent::MutationAck(_) => "MutationAck",
        SyncEvent::FatalError { .. } => "FatalError",
    }
}
