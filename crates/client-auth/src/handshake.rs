//! Session handoff between the component that logged in and the shell.
//!
//! The component holding a fresh session writes it, publishes
//! `SessionEstablished` and waits for the shell's `SessionConfirmed` with the
//! same handshake id. The wait is bounded: when the deadline passes the
//! handshake ends `TimedOut` and the caller navigates anyway. Confirmation only
//! makes the transition faster; it is never required for correctness.
//!
//! ## State Diagram
//!
//! ```text
//!      Idle
//!        │ Publish
//!        ▼
//! AwaitingConfirmation ── DeadlineElapsed ──► TimedOut
//!        │ Confirm
//!        ▼
//!    Confirmed
//! ```

use crate::bus::{SessionBus, SessionEvent};
use crate::{AuthError, AuthResult};
use client_storage::{AuthSession, SessionStore};
use rust_fsm::*;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub handshake_machine(Idle)

    Idle => {
        Publish => AwaitingConfirmation
    },
    AwaitingConfirmation => {
        Confirm => Confirmed,
        DeadlineElapsed => TimedOut
    }
}

pub use handshake_machine::Input as HandshakeMachineInput;
pub use handshake_machine::State as HandshakeMachineState;
pub use handshake_machine::StateMachine as HandshakeMachine;

/// Externally visible handshake state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandshakeState {
    Idle,
    AwaitingConfirmation,
    Confirmed,
    TimedOut,
}

impl HandshakeState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, HandshakeState::Confirmed | HandshakeState::TimedOut)
    }
}

impl From<&HandshakeMachineState> for HandshakeState {
    fn from(state: &HandshakeMachineState) -> Self {
        match state {
            HandshakeMachineState::Idle => HandshakeState::Idle,
            HandshakeMachineState::AwaitingConfirmation => HandshakeState::AwaitingConfirmation,
            HandshakeMachineState::Confirmed => HandshakeState::Confirmed,
            HandshakeMachineState::TimedOut => HandshakeState::TimedOut,
        }
    }
}

/// How a finished handshake resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeOutcome {
    pub handshake_id: Uuid,
    pub state: HandshakeState,
    /// Time from publishing to resolution.
    pub elapsed: Duration,
}

impl HandshakeOutcome {
    pub fn confirmed(&self) -> bool {
        self.state == HandshakeState::Confirmed
    }
}

struct Handshake {
    id: Uuid,
    machine: HandshakeMachine,
}

impl Handshake {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            machine: HandshakeMachine::new(),
        }
    }

    fn advance(&mut self, input: HandshakeMachineInput) -> AuthResult<()> {
        let from = self.machine.state().clone();
        self.machine.consume(&input).map_err(|_| {
            AuthError::InvalidStateTransition(format!("no transition out of {:?}", from))
        })?;
        Ok(())
    }

    fn state(&self) -> HandshakeState {
        HandshakeState::from(self.machine.state())
    }
}

/// Writes a session and waits, bounded, for the shell to adopt it.
pub struct HandshakeCoordinator {
    store: SessionStore,
    bus: SessionBus,
    deadline: Duration,
}

impl HandshakeCoordinator {
    pub fn new(store: SessionStore, bus: SessionBus, deadline: Duration) -> Self {
        Self {
            store,
            bus,
            deadline,
        }
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Store `session`, announce it and wait for confirmation or the deadline.
    ///
    /// A failed store write ends here with [`AuthError::SessionWrite`] and
    /// nothing is published.
    pub async fn establish(&self, session: &AuthSession) -> AuthResult<HandshakeOutcome> {
        self.store
            .write(session)
            .map_err(|e| AuthError::SessionWrite(e.to_string()))?;

        let mut handshake = Handshake::new();
        // Subscribe first so a fast confirmation cannot be missed.
        let mut confirmations = self.bus.subscribe();
        let started = Instant::now();

        self.bus.publish(SessionEvent::SessionEstablished {
            handshake_id: handshake.id,
            session: session.clone(),
        });
        handshake.advance(HandshakeMachineInput::Publish)?;
        debug!(
            handshake_id = %handshake.id,
            deadline_ms = self.deadline.as_millis() as u64,
            "Awaiting session confirmation"
        );

        let confirmed = tokio::time::timeout(
            self.deadline,
            wait_for_confirmation(&mut confirmations, handshake.id),
        )
        .await
        .unwrap_or(false);
        // Late confirmations must not reach a finished handshake.
        drop(confirmations);

        if confirmed {
            handshake.advance(HandshakeMachineInput::Confirm)?;
        } else {
            handshake.advance(HandshakeMachineInput::DeadlineElapsed)?;
        }

        let outcome = HandshakeOutcome {
            handshake_id: handshake.id,
            state: handshake.state(),
            elapsed: started.elapsed(),
        };
        if outcome.confirmed() {
            info!(
                handshake_id = %outcome.handshake_id,
                uid = %session.user.uid,
                elapsed_ms = outcome.elapsed.as_millis() as u64,
                "Session confirmed by shell"
            );
        } else {
            warn!(
                handshake_id = %outcome.handshake_id,
                uid = %session.user.uid,
                "No session confirmation before deadline, continuing"
            );
        }
        Ok(outcome)
    }
}

/// Resolves `true` on a matching confirmation, `false` if the bus closed.
async fn wait_for_confirmation(
    confirmations: &mut broadcast::Receiver<SessionEvent>,
    handshake_id: Uuid,
) -> bool {
    loop {
        match confirmations.recv().await {
            Ok(SessionEvent::SessionConfirmed {
                handshake_id: confirmed,
                ..
            }) if confirmed == handshake_id => return true,
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                debug!(skipped, "Handshake listener lagged");
            }
            Err(RecvError::Closed) => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use client_storage::{KeyValueStorage, MemoryStorage, StorageError, StorageResult, UserRecord};
    use std::sync::Arc;

    const DEADLINE: Duration = Duration::from_millis(1000);

    fn coordinator() -> (SessionStore, SessionBus, HandshakeCoordinator) {
        let store = SessionStore::new(Arc::new(MemoryStorage::new()));
        let bus = SessionBus::default();
        let coordinator = HandshakeCoordinator::new(store.clone(), bus.clone(), DEADLINE);
        (store, bus, coordinator)
    }

    fn session() -> AuthSession {
        AuthSession::new(UserRecord::with_uid("u1"), "t1")
    }

    /// Confirms every established session, like the shell does.
    fn spawn_confirmer(bus: &SessionBus) -> tokio::task::JoinHandle<()> {
        let mut events = bus.subscribe();
        let bus = bus.clone();
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                if let SessionEvent::SessionEstablished {
                    handshake_id,
                    session,
                } = event
                {
                    bus.publish(SessionEvent::SessionConfirmed {
                        handshake_id,
                        uid: session.user.uid,
                    });
                }
            }
        })
    }

    #[test]
    fn test_machine_transitions() {
        let mut machine = HandshakeMachine::new();
        assert_eq!(*machine.state(), HandshakeMachineState::Idle);

        machine.consume(&HandshakeMachineInput::Publish).unwrap();
        assert_eq!(*machine.state(), HandshakeMachineState::AwaitingConfirmation);

        machine.consume(&HandshakeMachineInput::Confirm).unwrap();
        assert_eq!(*machine.state(), HandshakeMachineState::Confirmed);
        assert!(HandshakeState::from(machine.state()).is_terminal());
    }

    #[test]
    fn test_terminal_states_reject_input() {
        let mut machine = HandshakeMachine::new();
        machine.consume(&HandshakeMachineInput::Publish).unwrap();
        machine.consume(&HandshakeMachineInput::DeadlineElapsed).unwrap();
        assert_eq!(*machine.state(), HandshakeMachineState::TimedOut);

        assert!(machine.consume(&HandshakeMachineInput::Confirm).is_err());
        assert!(machine.consume(&HandshakeMachineInput::Publish).is_err());
    }

    #[test]
    fn test_cannot_confirm_before_publish() {
        let mut machine = HandshakeMachine::new();
        assert!(machine.consume(&HandshakeMachineInput::Confirm).is_err());
    }

    #[tokio::test]
    async fn test_confirmed_when_shell_answers() {
        let (store, bus, coordinator) = coordinator();
        let _confirmer = spawn_confirmer(&bus);

        let outcome = coordinator.establish(&session()).await.unwrap();
        assert_eq!(outcome.state, HandshakeState::Confirmed);
        assert_eq!(store.read().unwrap(), Some(session()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_without_shell() {
        let (store, _bus, coordinator) = coordinator();

        let started = Instant::now();
        let outcome = coordinator.establish(&session()).await.unwrap();

        assert_eq!(outcome.state, HandshakeState::TimedOut);
        assert!(started.elapsed() >= DEADLINE);
        assert!(started.elapsed() <= DEADLINE + Duration::from_millis(10));
        // The session is stored whether or not anyone confirmed.
        assert!(store.is_logged_in().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_foreign_confirmation_is_ignored() {
        let (_store, bus, coordinator) = coordinator();
        let mut events = bus.subscribe();
        let replier = bus.clone();
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                if matches!(event, SessionEvent::SessionEstablished { .. }) {
                    replier.publish(SessionEvent::SessionConfirmed {
                        handshake_id: Uuid::new_v4(),
                        uid: "u1".to_string(),
                    });
                }
            }
        });

        let outcome = coordinator.establish(&session()).await.unwrap();
        assert_eq!(outcome.state, HandshakeState::TimedOut);
    }

    #[tokio::test]
    async fn test_listener_unregistered_after_resolution() {
        let (_store, bus, coordinator) = coordinator();
        let _confirmer = spawn_confirmer(&bus);
        let before = bus.subscriber_count();

        coordinator.establish(&session()).await.unwrap();
        assert_eq!(bus.subscriber_count(), before);
    }

    struct FullStorage;

    impl KeyValueStorage for FullStorage {
        fn set(&self, _key: &str, _value: &str) -> StorageResult<()> {
            Err(StorageError::Platform("quota exceeded".to_string()))
        }

        fn get(&self, _key: &str) -> StorageResult<Option<String>> {
            Ok(None)
        }

        fn delete(&self, _key: &str) -> StorageResult<bool> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn test_write_failure_publishes_nothing() {
        let bus = SessionBus::default();
        let mut events = bus.subscribe();
        let coordinator = HandshakeCoordinator::new(
            SessionStore::new(Arc::new(FullStorage)),
            bus.clone(),
            DEADLINE,
        );

        let err = coordinator.establish(&session()).await.unwrap_err();
        assert!(matches!(err, AuthError::SessionWrite(_)));
        assert!(events.try_recv().is_err());
    }
}
