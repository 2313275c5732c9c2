//! In-process peer connection, used by tests and same-host transfers.
//!
//! Delivery is ordered and reliable by construction. The sender-side
//! buffered amount counts bytes queued but not yet pulled by the peer's
//! event consumer; draining it below the low-water mark emits
//! `BufferedAmountLow`, mirroring the watermark behavior of a real data
//! channel.

use crate::channel::{ChannelEvent, ChannelEvents, DataChannel, PeerConnection, PeerDrain};
use crate::error::TransferError;
use bytes::Bytes;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::mpsc;

struct PairShared {
    ready: [AtomicBool; 2],
    opened: AtomicBool,
    closed: AtomicBool,
    events: [mpsc::UnboundedSender<ChannelEvent>; 2],
}

impl PairShared {
    /// Marks one side as negotiated; fires `Open` on both queues once the
    /// second side lands.
    fn mark_ready(&self, side: usize) {
        self.ready[side].store(true, Ordering::Release);
        if self.ready[0].load(Ordering::Acquire)
            && self.ready[1].load(Ordering::Acquire)
            && !self.opened.swap(true, Ordering::AcqRel)
        {
            for events in &self.events {
                let _ = events.send(ChannelEvent::Open);
            }
        }
    }
}

pub struct LoopbackChannel {
    shared: Arc<PairShared>,
    side: usize,
    buffered: Arc<AtomicUsize>,
}

impl DataChannel for LoopbackChannel {
    fn send(&self, payload: Bytes) -> Result<(), TransferError> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(TransferError::ChannelClosedEarly);
        }
        self.buffered.fetch_add(payload.len(), Ordering::AcqRel);
        self.shared.events[1 - self.side]
            .send(ChannelEvent::Message(payload))
            .map_err(|_| TransferError::ChannelClosedEarly)
    }

    fn buffered_amount(&self) -> usize {
        self.buffered.load(Ordering::Acquire)
    }

    fn close(&self) {
        if !self.shared.closed.swap(true, Ordering::AcqRel) {
            for events in &self.shared.events {
                let _ = events.send(ChannelEvent::Closed);
            }
        }
    }
}

pub struct LoopbackConnection {
    shared: Arc<PairShared>,
    side: usize,
    channel: Option<(Arc<dyn DataChannel>, ChannelEvents)>,
}

impl PeerConnection for LoopbackConnection {
    fn open_channel(&mut self) -> Result<(Arc<dyn DataChannel>, ChannelEvents), TransferError> {
        self.channel.take().ok_or_else(|| {
            TransferError::ConnectivityFailure("loopback channel already taken".to_string())
        })
    }

    fn create_offer(&mut self) -> Result<String, TransferError> {
        Ok("loopback:offer".to_string())
    }

    fn accept_offer(&mut self, _offer: &str) -> Result<String, TransferError> {
        self.shared.mark_ready(self.side);
        Ok("loopback:answer".to_string())
    }

    fn apply_answer(&mut self, _answer: &str) -> Result<(), TransferError> {
        self.shared.mark_ready(self.side);
        Ok(())
    }

    fn add_remote_candidate(&mut self, _candidate: &str) -> Result<(), TransferError> {
        Ok(())
    }

    fn local_candidates(&mut self) -> Vec<String> {
        // Both ends share a process; no candidates to gather.
        Vec::new()
    }
}

/// Build a connected pair of in-process peer connections. `low_water` is
/// the sender-side buffer level at which `BufferedAmountLow` fires.
pub fn pair(low_water: usize) -> (LoopbackConnection, LoopbackConnection) {
    let (tx_a, rx_a) = mpsc::unbounded_channel();
    let (tx_b, rx_b) = mpsc::unbounded_channel();
    let shared = Arc::new(PairShared {
        ready: [AtomicBool::new(false), AtomicBool::new(false)],
        opened: AtomicBool::new(false),
        closed: AtomicBool::new(false),
        events: [tx_a.clone(), tx_b.clone()],
    });

    let buffered_a = Arc::new(AtomicUsize::new(0));
    let buffered_b = Arc::new(AtomicUsize::new(0));

    let channel_a: Arc<dyn DataChannel> = Arc::new(LoopbackChannel {
        shared: shared.clone(),
        side: 0,
        buffered: buffered_a.clone(),
    });
    // Side A consumes messages produced by B, so its queue drains B's buffer.
    let events_a = ChannelEvents::with_drain(
        rx_a,
        PeerDrain {
            peer_buffered: buffered_b.clone(),
            low_water,
            peer_events: tx_b,
        },
    );

    let channel_b: Arc<dyn DataChannel> = Arc::new(LoopbackChannel {
        shared: shared.clone(),
        side: 1,
        buffered: buffered_b,
    });
    let events_b = ChannelEvents::with_drain(
        rx_b,
        PeerDrain {
            peer_buffered: buffered_a,
            low_water,
            peer_events: tx_a,
        },
    );

    (
        LoopbackConnection {
            shared: shared.clone(),
            side: 0,
            channel: Some((channel_a, events_a)),
        },
        LoopbackConnection {
            shared,
            side: 1,
            channel: Some((channel_b, events_b)),
        },
    )
}
