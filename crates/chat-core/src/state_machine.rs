use crate::{
    error::ChatError,
    types::{SessionLifecycleState, SyncCommand, SyncEvent},
};

#[derive(Debug, Clone)]
pub struct SessionStateMachine {
    state: SessionLifecycleState,
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self {
            state: SessionLifecycleState::Idle,
        }
    }
}

impl SessionStateMachine {
    pub fn state(&self) -> SessionLifecycleState {
        self.state
    }

    pub fn apply(&mut self, command: &SyncCommand) -> Result<Vec<SyncEvent>, ChatError> {
        use SyncCommand::*;

        match command {
            Login { .. } | RestoreSession { .. } => self.transition_from_any_of(
                &[SessionLifecycleState::Idle, SessionLifecycleState::LoggedOut],
                SessionLifecycleState::Authenticating,
                "login_or_restore",
            ),
            Logout => self.transition_from_any_of(
                &[
                    SessionLifecycleState::Authenticating,
                    SessionLifecycleState::Syncing,
                ],
                SessionLifecycleState::LoggedOut,
                "logout",
            ),
            Resync | SelectConversation { .. } | SendMessage { .. } | CreateGroup { .. } => {
                if self.state == SessionLifecycleState::Syncing {
                    Ok(Vec::new())
                } else {
                    Err(ChatError::invalid_state(self.state, "conversation command"))
                }
            }
        }
    }

    pub fn on_auth_result(&mut self, success: bool) -> Result<SyncEvent, ChatError> {
        if self.state != SessionLifecycleState::Authenticating {
            return Err(ChatError::invalid_state(self.state, "on_auth_result"));
        }

        let next = if success {
            SessionLifecycleState::Syncing
        } else {
            SessionLifecycleState::Idle
        };

        self.state = next;
        Ok(SyncEvent::StateChanged { state: next })
    }

    fn transition_from_any_of(
        &mut self,
        expected: &[SessionLifecycleState],
        next: SessionLifecycleState,
        action: &str,
    ) -> Result<Vec<SyncEvent>, ChatError> {
        if !expected.contains(&self.state) {
            return Err(ChatError::invalid_state(self.state, action));
        }
        self.state = next;
        Ok(vec![SyncEvent::StateChanged { state: next }])
    }
}
