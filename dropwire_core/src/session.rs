//! Session lifecycle and peer-connection negotiation.
//!
//! The negotiator drives offer/answer and candidate exchange through the
//! rendezvous client, then hands the open channel to the pipelines. A
//! signaling frame arriving out of the expected state is dropped and
//! logged, never treated as an error; only an elapsed deadline fails the
//! session.

use crate::TransferEvent;
use crate::channel::{ChannelEvent, ChannelEvents, DataChannel, PeerConnection};
use crate::config::SessionConfig;
use crate::error::TransferError;
use crate::signaling::{RendezvousClient, ServerFrame, SignalPayload};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Sender,
    Receiver,
}

/// Transfer session states, in protocol order. `Failed` is reachable from
/// every state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    Signaling,
    Connecting,
    ChannelOpen,
    Transferring,
    Verifying,
    Done,
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Init => "init",
            SessionState::Signaling => "signaling",
            SessionState::Connecting => "connecting",
            SessionState::ChannelOpen => "channel_open",
            SessionState::Transferring => "transferring",
            SessionState::Verifying => "verifying",
            SessionState::Done => "done",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// One side of a transfer. Owned exclusively by the process running the
/// role; dropped when the transfer completes or aborts.
pub struct Session {
    role: Role,
    code: Option<String>,
    config: SessionConfig,
    state: SessionState,
    event_tx: mpsc::Sender<TransferEvent>,
}

impl Session {
    pub fn new(
        role: Role,
        config: SessionConfig,
        event_tx: mpsc::Sender<TransferEvent>,
    ) -> Result<Self, TransferError> {
        config.validate()?;
        Ok(Self {
            role,
            code: None,
            config,
            state: SessionState::Init,
            event_tx,
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    pub fn set_code(&mut self, code: impl Into<String>) {
        self.code = Some(code.into());
    }

    pub(crate) fn event_sender(&self) -> mpsc::Sender<TransferEvent> {
        self.event_tx.clone()
    }

    pub(crate) async fn advance(&mut self, next: SessionState) {
        tracing::info!(role = ?self.role, from = %self.state, to = %next, "session state");
        self.state = next;
        let _ = self.event_tx.send(TransferEvent::StateChanged(next)).await;
    }

    /// Terminal failure: record the cause and stop. The caller is expected
    /// to drop the channel and relay connection.
    pub async fn fail(&mut self, error: &TransferError) {
        tracing::error!(role = ?self.role, from = %self.state, %error, "session failed");
        self.state = SessionState::Failed;
        let _ = self
            .event_tx
            .send(TransferEvent::StateChanged(SessionState::Failed))
            .await;
        let _ = self
            .event_tx
            .send(TransferEvent::Error(error.to_string()))
            .await;
    }

    /// Drive signaling and connectivity establishment until the data
    /// channel opens, bounded by the negotiation deadline. Expects the
    /// rendezvous client to be registered (sender) or joined (receiver).
    pub async fn establish(
        &mut self,
        rendezvous: &mut RendezvousClient,
        connection: &mut dyn PeerConnection,
    ) -> Result<(Arc<dyn DataChannel>, ChannelEvents), TransferError> {
        tracing::info!(
            role = ?self.role,
            code = self.code.as_deref().unwrap_or("-"),
            "establishing session"
        );
        self.advance(SessionState::Signaling).await;

        let deadline = self.config.negotiation_timeout;
        let role = self.role;
        let negotiation = async {
            match role {
                Role::Sender => negotiate_sender(self, rendezvous, connection).await,
                Role::Receiver => negotiate_receiver(self, rendezvous, connection).await,
            }
        };

        match tokio::time::timeout(deadline, negotiation).await {
            Ok(Ok(channel)) => {
                self.advance(SessionState::ChannelOpen).await;
                Ok(channel)
            }
            Ok(Err(e)) => {
                self.fail(&e).await;
                Err(e)
            }
            Err(_) => {
                let e = TransferError::NegotiationTimeout;
                self.fail(&e).await;
                Err(e)
            }
        }
    }
}

async fn negotiate_sender(
    session: &mut Session,
    rendezvous: &mut RendezvousClient,
    connection: &mut dyn PeerConnection,
) -> Result<(Arc<dyn DataChannel>, ChannelEvents), TransferError> {
    // Hold the offer until a receiver lands; the relay only forwards
    // frames once both parties are present.
    loop {
        match rendezvous.next_frame().await? {
            ServerFrame::PeerJoined => break,
            ServerFrame::Cancelled => return Err(TransferError::ChannelClosedEarly),
            other => tracing::debug!(?other, "dropping frame while waiting for receiver"),
        }
    }

    let (channel, mut events) = connection.open_channel()?;
    let offer = connection.create_offer()?;
    rendezvous
        .send_signal(SignalPayload::Offer { sdp: offer })
        .await?;
    for candidate in connection.local_candidates() {
        rendezvous
            .send_signal(SignalPayload::Candidate { candidate })
            .await?;
    }
    session.advance(SessionState::Connecting).await;

    let mut answered = false;
    wait_for_open(rendezvous, connection, &mut events, |conn, payload| {
        match payload {
            SignalPayload::Answer { sdp } if !answered => {
                conn.apply_answer(&sdp)?;
                answered = true;
            }
            SignalPayload::Candidate { candidate } => conn.add_remote_candidate(&candidate)?,
            other => tracing::debug!(?other, "dropping out-of-state signal"),
        }
        Ok(())
    })
    .await?;

    Ok((channel, events))
}

async fn negotiate_receiver(
    session: &mut Session,
    rendezvous: &mut RendezvousClient,
    connection: &mut dyn PeerConnection,
) -> Result<(Arc<dyn DataChannel>, ChannelEvents), TransferError> {
    let (channel, mut events) = connection.open_channel()?;

    // First the offer, answering it; candidates may arrive interleaved.
    loop {
        match rendezvous.next_frame().await? {
            ServerFrame::Signal {
                payload: SignalPayload::Offer { sdp },
            } => {
                let answer = connection.accept_offer(&sdp)?;
                rendezvous
                    .send_signal(SignalPayload::Answer { sdp: answer })
                    .await?;
                for candidate in connection.local_candidates() {
                    rendezvous
                        .send_signal(SignalPayload::Candidate { candidate })
                        .await?;
                }
                break;
            }
            ServerFrame::Signal {
                payload: SignalPayload::Candidate { candidate },
            } => connection.add_remote_candidate(&candidate)?,
            ServerFrame::Cancelled => return Err(TransferError::ChannelClosedEarly),
            other => tracing::debug!(?other, "dropping frame while waiting for offer"),
        }
    }
    session.advance(SessionState::Connecting).await;

    wait_for_open(rendezvous, connection, &mut events, |conn, payload| {
        match payload {
            SignalPayload::Candidate { candidate } => conn.add_remote_candidate(&candidate)?,
            other => tracing::debug!(?other, "dropping out-of-state signal"),
        }
        Ok(())
    })
    .await?;

    Ok((channel, events))
}

/// Pump relay frames into the connection until the channel reports open.
async fn wait_for_open(
    rendezvous: &mut RendezvousClient,
    connection: &mut dyn PeerConnection,
    events: &mut ChannelEvents,
    mut on_signal: impl FnMut(&mut dyn PeerConnection, SignalPayload) -> Result<(), TransferError>,
) -> Result<(), TransferError> {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(ChannelEvent::Open) => return Ok(()),
                Some(ChannelEvent::Closed) | None => {
                    return Err(TransferError::ConnectivityFailure(
                        "channel closed during negotiation".to_string(),
                    ));
                }
                Some(other) => tracing::debug!(?other, "dropping channel event before open"),
            },
            frame = rendezvous.next_frame() => match frame? {
                ServerFrame::Signal { payload } => on_signal(connection, payload)?,
                ServerFrame::Cancelled => return Err(TransferError::ChannelClosedEarly),
                other => tracing::debug!(?other, "dropping relay frame while connecting"),
            },
        }
    }
}
