//! Relay wire protocol and the rendezvous client.
//!
//! The relay never sees file bytes; it pairs a sender and a receiver under
//! a rendezvous code and ferries opaque negotiation frames between them,
//! preserving per-sender order.

use crate::code;
use crate::error::TransferError;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

/// Frames a peer sends to the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Sender announces availability under a freshly minted code.
    Register { code: String },
    /// Receiver asks to be paired with the sender holding `code`.
    Join { code: String },
    /// Opaque negotiation payload for the other peer.
    Signal { payload: SignalPayload },
    /// Abort before or during negotiation; forwarded to the peer.
    Cancel,
}

/// Frames the relay sends to a peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ServerFrame {
    Registered { code: String },
    Joined,
    /// Delivered to the sender when its receiver arrives.
    PeerJoined,
    Signal { payload: SignalPayload },
    /// The remote peer cancelled or disconnected.
    Cancelled,
    Error { code: RelayErrorCode, message: String },
}

/// Negotiation payloads, opaque to the rendezvous layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SignalPayload {
    Offer { sdp: String },
    Answer { sdp: String },
    Candidate { candidate: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayErrorCode {
    /// A live sender already holds this code.
    Taken,
    /// No sender is registered under this code.
    NotFound,
    /// The code already has an active pairing.
    Busy,
    /// The sender's registration timed out.
    Expired,
}

/// WebSocket client for the signaling relay.
pub struct RendezvousClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl RendezvousClient {
    /// Open a persistent connection to the relay.
    pub async fn connect(relay_url: &Url) -> Result<Self, TransferError> {
        let (ws, _response) = connect_async(relay_url.as_str())
            .await
            .map_err(|e| TransferError::RelayUnreachable(e.to_string()))?;
        tracing::debug!(relay = %relay_url, "connected to relay");
        Ok(Self { ws })
    }

    /// Register as sender. Mints codes until the relay accepts one,
    /// bounded by [`code::MAX_MINT_ATTEMPTS`]. Each attempt waits for the
    /// relay's verdict on the outstanding code before minting another.
    pub async fn register(&mut self) -> Result<String, TransferError> {
        'mint: for attempt in 0..code::MAX_MINT_ATTEMPTS {
            let candidate = code::generate();
            self.send_frame(&ClientFrame::Register {
                code: candidate.clone(),
            })
            .await?;

            loop {
                match self.next_frame().await? {
                    ServerFrame::Registered { code } => {
                        tracing::info!(%code, "registered at relay");
                        return Ok(code);
                    }
                    ServerFrame::Error {
                        code: RelayErrorCode::Taken,
                        ..
                    } => {
                        tracing::debug!(code = %candidate, attempt, "code collision, reminting");
                        continue 'mint;
                    }
                    ServerFrame::Error { code, message } => {
                        return Err(map_relay_error(code, &candidate, message));
                    }
                    other => {
                        tracing::debug!(?other, "dropping frame while registering");
                    }
                }
            }
        }
        Err(TransferError::CodeExhausted)
    }

    /// Join as receiver under an existing code.
    pub async fn join(&mut self, code: &str) -> Result<(), TransferError> {
        let code = code::normalize(code);
        self.send_frame(&ClientFrame::Join { code: code.clone() })
            .await?;

        loop {
            match self.next_frame().await? {
                ServerFrame::Joined => {
                    tracing::info!(%code, "joined session at relay");
                    return Ok(());
                }
                ServerFrame::Error {
                    code: error_code,
                    message,
                } => return Err(map_relay_error(error_code, &code, message)),
                other => {
                    tracing::debug!(?other, "dropping frame while joining");
                }
            }
        }
    }

    pub async fn send_signal(&mut self, payload: SignalPayload) -> Result<(), TransferError> {
        self.send_frame(&ClientFrame::Signal { payload }).await
    }

    /// Tell the relay to notify the peer that this side is bailing out.
    pub async fn cancel(&mut self) -> Result<(), TransferError> {
        self.send_frame(&ClientFrame::Cancel).await
    }

    /// Next relay frame. Pings and pongs are handled transparently; a
    /// closed relay connection surfaces as `RelayUnreachable`.
    pub async fn next_frame(&mut self) -> Result<ServerFrame, TransferError> {
        loop {
            let message = self
                .ws
                .next()
                .await
                .ok_or_else(|| {
                    TransferError::RelayUnreachable("relay connection closed".to_string())
                })?
                .map_err(|e| TransferError::RelayUnreachable(e.to_string()))?;

            match message {
                Message::Text(text) => {
                    return serde_json::from_str(text.as_str()).map_err(|e| {
                        TransferError::ProtocolViolation(format!("malformed relay frame: {}", e))
                    });
                }
                Message::Close(_) => {
                    return Err(TransferError::RelayUnreachable(
                        "relay closed the connection".to_string(),
                    ));
                }
                Message::Ping(_) | Message::Pong(_) => continue,
                other => {
                    tracing::debug!(?other, "ignoring non-text relay message");
                }
            }
        }
    }

    /// Release the relay connection.
    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }

    async fn send_frame(&mut self, frame: &ClientFrame) -> Result<(), TransferError> {
        let json = serde_json::to_string(frame)
            .map_err(|e| TransferError::ProtocolViolation(format!("unencodable frame: {}", e)))?;
        self.ws
            .send(Message::Text(json.into()))
            .await
            .map_err(|e| TransferError::RelayUnreachable(e.to_string()))
    }
}

fn map_relay_error(code: RelayErrorCode, rendezvous_code: &str, message: String) -> TransferError {
    match code {
        RelayErrorCode::NotFound => TransferError::CodeNotFound(rendezvous_code.to_string()),
        RelayErrorCode::Busy => TransferError::CodeBusy(rendezvous_code.to_string()),
        RelayErrorCode::Expired => TransferError::CodeExpired(rendezvous_code.to_string()),
        RelayErrorCode::Taken => {
            TransferError::ProtocolViolation(format!("unexpected relay error: {}", message))
        }
    }
}
