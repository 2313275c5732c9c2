//! Contracts for the external peer-connection primitive.
//!
//! The core never reimplements connectivity establishment; it consumes a
//! negotiated, ordered, reliable data channel through these traits. Channel
//! callbacks (open/message/buffered-amount-low/close) are modeled as a
//! single-consumer event queue per session, processed by exactly one duty
//! per peer.

use crate::error::TransferError;
use bytes::Bytes;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;

/// Events surfaced by a data channel, in delivery order.
#[derive(Debug)]
pub enum ChannelEvent {
    /// The channel finished negotiating and is ready to carry frames.
    Open,
    /// One inbound channel message.
    Message(Bytes),
    /// The outbound buffer drained below the low-water mark.
    BufferedAmountLow,
    /// The channel closed, locally or remotely.
    Closed,
}

/// Handle to a negotiated, ordered, reliable data channel.
pub trait DataChannel: Send + Sync {
    /// Queue one message for delivery. Fails once the channel is closed.
    fn send(&self, payload: Bytes) -> Result<(), TransferError>;

    /// Bytes queued locally but not yet handed to the peer.
    fn buffered_amount(&self) -> usize;

    /// Close the channel. Closure is the cancellation signal: the remote
    /// peer observes it as `ChannelEvent::Closed`.
    fn close(&self);
}

/// Negotiation surface of the peer-connection primitive. Descriptors and
/// candidates are opaque strings ferried through the relay.
pub trait PeerConnection: Send {
    /// Hand out the channel and its event queue. Callable once.
    fn open_channel(&mut self) -> Result<(Arc<dyn DataChannel>, ChannelEvents), TransferError>;

    fn create_offer(&mut self) -> Result<String, TransferError>;

    /// Apply a remote offer and produce the local answer.
    fn accept_offer(&mut self, offer: &str) -> Result<String, TransferError>;

    fn apply_answer(&mut self, answer: &str) -> Result<(), TransferError>;

    fn add_remote_candidate(&mut self, candidate: &str) -> Result<(), TransferError>;

    /// Connectivity candidates gathered so far, drained on read.
    fn local_candidates(&mut self) -> Vec<String>;
}

/// Single-consumer queue of [`ChannelEvent`]s for one session.
pub struct ChannelEvents {
    rx: mpsc::UnboundedReceiver<ChannelEvent>,
    drain: Option<PeerDrain>,
}

/// Bookkeeping for in-process channels: consuming a message here drains the
/// peer's outbound buffer and may wake a suspended peer sender.
pub(crate) struct PeerDrain {
    pub(crate) peer_buffered: Arc<AtomicUsize>,
    pub(crate) low_water: usize,
    pub(crate) peer_events: mpsc::UnboundedSender<ChannelEvent>,
}

impl ChannelEvents {
    /// Wrap a raw event receiver whose producer does its own buffer
    /// accounting.
    pub fn from_receiver(rx: mpsc::UnboundedReceiver<ChannelEvent>) -> Self {
        Self { rx, drain: None }
    }

    pub(crate) fn with_drain(rx: mpsc::UnboundedReceiver<ChannelEvent>, drain: PeerDrain) -> Self {
        Self {
            rx,
            drain: Some(drain),
        }
    }

    /// Next event, `None` once all producers are gone.
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        let event = self.rx.recv().await;
        if let (Some(ChannelEvent::Message(payload)), Some(drain)) = (&event, &self.drain) {
            let len = payload.len();
            let before = drain.peer_buffered.fetch_sub(len, Ordering::AcqRel);
            let after = before.saturating_sub(len);
            if before > drain.low_water && after <= drain.low_water {
                let _ = drain.peer_events.send(ChannelEvent::BufferedAmountLow);
            }
        }
        event
    }
}
