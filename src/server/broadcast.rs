//! Fan-out of chat lines and control messages to registered sessions
//!
//! Each recipient's copy goes through that recipient's own send path, where
//! it is encrypted with that recipient's key. A recipient whose send path is
//! gone is deregistered and announced as departed; the rest of the fan-out
//! carries on regardless.
//!
//! Delivery order across different senders is best effort: two recipients
//! may see lines from two concurrent senders in different orders.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::registry::{ClientRegistry, ConnectionId, Session};
use crate::error::ChatResult;
use crate::protocol::{departure_notice, ChatEnvelope, ControlMessage};

/// Sends to subsets of the registry
#[derive(Clone)]
pub struct BroadcastEngine {
    registry: Arc<ClientRegistry>,
}

impl BroadcastEngine {
    /// Broadcast over `registry`
    pub fn new(registry: Arc<ClientRegistry>) -> Self {
        BroadcastEngine { registry }
    }

    /// Deliver to every registered session, sender included
    ///
    /// Returns how many sessions the message was queued for.
    pub fn broadcast_to_all(&self, envelope: &ChatEnvelope) -> usize {
        self.fan_out(&envelope.to_wire(), None)
    }

    /// Deliver to every registered session except `excluded`
    pub fn broadcast_excluding(&self, envelope: &ChatEnvelope, excluded: ConnectionId) -> usize {
        self.fan_out(&envelope.to_wire(), Some(excluded))
    }

    /// Deliver a control message to every registered session
    pub fn send_control_to_all(&self, control: &ControlMessage) -> usize {
        self.fan_out(&control.to_wire(), None)
    }

    /// Deliver to one session
    ///
    /// On failure the session is deregistered (and its departure announced)
    /// before the error is returned.
    pub fn send_to(&self, session: &Session, envelope: &ChatEnvelope) -> ChatResult<()> {
        let result = session.outbound.enqueue(envelope.to_wire());
        if let Err(e) = &result {
            warn!("Send to {} ({}) failed: {}", session.display_name, session.id, e);
            self.drop_recipient(session.id);
        }
        result
    }

    /// Tell everyone left that `session` is gone, with the new user count
    pub fn announce_departure(&self, session: &Session) {
        info!("{} ({}) has disconnected", session.display_name, session.id);
        self.broadcast_to_all(&departure_notice(&session.display_name));
        self.publish_user_count();
    }

    /// Send every session the current user count
    ///
    /// The count is read and queued under the registry lock, so after any
    /// run of joins and departures the last count each session receives is
    /// the registry size.
    pub fn publish_user_count(&self) -> usize {
        let (count, failed) = self.registry.with_sessions(|sessions| {
            let wire = ControlMessage::UserCount(sessions.len()).to_wire();
            let mut failed = Vec::new();
            for session in sessions.values() {
                if let Err(e) = session.outbound.enqueue(wire.as_str()) {
                    warn!("Send to {} ({}) failed: {}", session.display_name, session.id, e);
                    failed.push(session.id);
                }
            }
            (sessions.len(), failed)
        });

        for id in failed {
            self.drop_recipient(id);
        }
        count
    }

    fn fan_out(&self, text: &str, excluded: Option<ConnectionId>) -> usize {
        let mut delivered = 0;
        let mut failed = Vec::new();

        for session in self.registry.snapshot() {
            if Some(session.id) == excluded {
                continue;
            }
            match session.outbound.enqueue(text) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!("Send to {} ({}) failed: {}", session.display_name, session.id, e);
                    failed.push(session.id);
                }
            }
        }

        debug!("Fan-out reached {} session(s), {} failed", delivered, failed.len());
        for id in failed {
            self.drop_recipient(id);
        }
        delivered
    }

    /// Deregister a recipient whose send path failed
    ///
    /// Whoever actually removes the session announces it, so a departure is
    /// announced once even if the receive loop notices the same failure.
    fn drop_recipient(&self, id: ConnectionId) {
        if let Some(gone) = self.registry.remove(id) {
            gone.outbound.close();
            self.announce_departure(&gone);
        }
    }
}
