//! Pending-session registry: one sender and at most one receiver per
//! rendezvous code.
//!
//! The registry holds no file metadata, only the outboxes needed to ferry
//! frames between the two parties. Registrations expire lazily: staleness
//! is checked when a receiver tries to join, not by a background sweeper.

use dropwire_core::signaling::{RelayErrorCode, ServerFrame};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// How long a registered code stays claimable.
pub const REGISTRATION_TTL: Duration = Duration::from_secs(30 * 60);

/// Per-connection frame queue, drained by the socket writer.
pub type Outbox = mpsc::UnboundedSender<ServerFrame>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Party {
    Sender,
    Receiver,
}

struct PendingSession {
    sender: Option<Outbox>,
    receiver: Option<Outbox>,
    registered_at: Instant,
}

pub struct Registry {
    sessions: RwLock<HashMap<String, PendingSession>>,
    ttl: Duration,
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_ttl(REGISTRATION_TTL)
    }
}

impl Registry {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Claim `code` for a sender. A code held by a live, unexpired sender
    /// is taken; a dead or expired holder is silently replaced.
    pub async fn register(&self, code: &str, outbox: Outbox) -> Result<(), RelayErrorCode> {
        let mut sessions = self.sessions.write().await;
        if let Some(existing) = sessions.get(code) {
            let live = existing
                .sender
                .as_ref()
                .is_some_and(|sender| !sender.is_closed());
            if live && existing.registered_at.elapsed() <= self.ttl {
                return Err(RelayErrorCode::Taken);
            }
        }
        sessions.insert(
            code.to_string(),
            PendingSession {
                sender: Some(outbox),
                receiver: None,
                registered_at: Instant::now(),
            },
        );
        tracing::info!(%code, "sender registered");
        Ok(())
    }

    /// Pair a receiver with the sender holding `code`. On success returns
    /// the sender's outbox so the caller can announce the arrival.
    pub async fn join(&self, code: &str, outbox: Outbox) -> Result<Outbox, RelayErrorCode> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(code).ok_or(RelayErrorCode::NotFound)?;

        if session.registered_at.elapsed() > self.ttl {
            sessions.remove(code);
            tracing::info!(%code, "expired registration reaped on join");
            return Err(RelayErrorCode::Expired);
        }
        let sender = match &session.sender {
            Some(sender) if !sender.is_closed() => sender.clone(),
            _ => {
                sessions.remove(code);
                return Err(RelayErrorCode::NotFound);
            }
        };
        if session
            .receiver
            .as_ref()
            .is_some_and(|receiver| !receiver.is_closed())
        {
            return Err(RelayErrorCode::Busy);
        }

        session.receiver = Some(outbox);
        tracing::info!(%code, "receiver joined");
        Ok(sender)
    }

    /// Outbox of the party opposite `party`, if present.
    pub async fn peer_of(&self, code: &str, party: Party) -> Option<Outbox> {
        let sessions = self.sessions.read().await;
        let session = sessions.get(code)?;
        let peer = match party {
            Party::Sender => session.receiver.as_ref(),
            Party::Receiver => session.sender.as_ref(),
        };
        peer.filter(|outbox| !outbox.is_closed()).cloned()
    }

    /// Drop one party from a session, returning the survivor's outbox so
    /// it can be told the peer is gone. The session itself is removed once
    /// either party leaves; codes are single-use.
    pub async fn remove_party(&self, code: &str, party: Party) -> Option<Outbox> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.remove(code)?;
        tracing::info!(%code, ?party, "session removed");
        let survivor = match party {
            Party::Sender => session.receiver,
            Party::Receiver => session.sender,
        };
        survivor.filter(|outbox| !outbox.is_closed())
    }
}
