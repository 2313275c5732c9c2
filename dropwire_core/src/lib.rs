//! Peer-to-peer file transfer core: rendezvous codes, relay signaling,
//! data-channel framing, and the bounded-memory send/receive pipelines.
//!
//! The crate is transport-agnostic above the [`channel`] traits; the relay
//! lives in its own crate and only ever sees opaque negotiation frames.

pub mod channel;
pub mod code;
pub mod config;
pub mod error;
pub mod loopback;
pub mod progress;
pub mod protocol;
pub mod receiver;
pub mod sender;
pub mod session;
pub mod signaling;
pub mod util;

pub use channel::{ChannelEvent, ChannelEvents, DataChannel, PeerConnection};
pub use config::SessionConfig;
pub use error::TransferError;
pub use receiver::{ReceivedFile, receive_to_dir};
pub use sender::{SourceMeta, send_stream};
pub use session::{Role, Session, SessionState};
pub use signaling::{ClientFrame, RelayErrorCode, RendezvousClient, ServerFrame, SignalPayload};

/// Events reported to whoever is observing a transfer (a CLI, a test
/// harness). A dropped observer is tolerated; send failures at the call
/// sites are ignored.
#[derive(Debug, Clone)]
pub enum TransferEvent {
    StateChanged(SessionState),
    Progress {
        file_name: String,
        percent: f32,
        throughput_bps: f64,
        bytes_done: u64,
        total_bytes: u64,
        is_sending: bool,
    },
    Completed {
        file_name: String,
    },
    Error(String),
}
