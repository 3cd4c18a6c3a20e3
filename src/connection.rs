//! Connection lifecycle shared by both roles
//!
//! ```text
//! Handshaking ──► Authenticating ──► Registering ──► Active ──► Closed
//!      │          (server only)           ▲
//!      └────────── client role ───────────┘
//! ```
//!
//! `Closed` is terminal and reachable from every other state.

use tokio::sync::watch;

use crate::error::{ChatError, ChatResult};

/// Which end of the connection we are
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Accepting side; runs the auth gate
    Server,
    /// Connecting side
    Client,
}

/// Lifecycle state of one connection
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionState {
    /// Exchanging public keys
    Handshaking,
    /// Checking the client's credential (server only)
    Authenticating,
    /// Exchanging the display name and joining the registry
    Registering,
    /// Receive loop running
    Active,
    /// Terminal
    Closed,
}

impl ConnectionState {
    /// Whether `self -> to` is a legal step for `role`
    pub fn can_transition(self, to: ConnectionState, role: Role) -> bool {
        use ConnectionState::*;

        match (self, to) {
            (Closed, _) => false,
            (_, Closed) => true,
            (Handshaking, Authenticating) => role == Role::Server,
            (Handshaking, Registering) => role == Role::Client,
            (Authenticating, Registering) => true,
            (Registering, Active) => true,
            _ => false,
        }
    }
}

/// Tracks and publishes one connection's state
pub struct StateMachine {
    role: Role,
    tx: watch::Sender<ConnectionState>,
}

impl StateMachine {
    /// Start in `Handshaking`
    pub fn new(role: Role) -> Self {
        let (tx, _) = watch::channel(ConnectionState::Handshaking);
        StateMachine { role, tx }
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    /// Role this machine was created for
    pub fn role(&self) -> Role {
        self.role
    }

    /// Watch state changes from another task
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }

    /// Move to `to`, refusing steps the lifecycle does not allow
    pub fn advance(&self, to: ConnectionState) -> ChatResult<()> {
        let from = self.state();
        if !from.can_transition(to, self.role) {
            return Err(ChatError::InvalidTransition { from, to });
        }
        self.tx.send_replace(to);
        Ok(())
    }

    /// Enter `Closed`; a no-op if already there
    pub fn close(&self) {
        self.tx.send_replace(ConnectionState::Closed);
    }
}
