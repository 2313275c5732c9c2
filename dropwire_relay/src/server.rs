//! WebSocket relay endpoint.
//!
//! One socket per party. Frames from the socket are dispatched against the
//! registry; frames for the party are queued on its outbox and written by
//! the same task. The relay never inspects signal payloads.

use crate::registry::{Outbox, Party, Registry};
use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use dropwire_core::signaling::{ClientFrame, RelayErrorCode, ServerFrame};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub fn router(registry: Arc<Registry>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .with_state(registry)
}

/// Bind `addr` and serve until the token fires.
pub async fn run(addr: SocketAddr, token: CancellationToken) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    run_with_listener(listener, token).await
}

/// Serve on an already-bound listener. Tests bind port 0 and read the
/// local address back before calling this.
pub async fn run_with_listener(
    listener: TcpListener,
    token: CancellationToken,
) -> anyhow::Result<()> {
    let registry = Arc::new(Registry::default());
    let app = router(registry);
    tracing::info!(addr = %listener.local_addr()?, "relay listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(token.cancelled_owned())
        .await?;
    Ok(())
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(registry): State<Arc<Registry>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, registry))
}

async fn handle_socket(socket: WebSocket, registry: Arc<Registry>) {
    let (mut sink, mut stream) = socket.split();
    let (outbox, mut queued) = mpsc::unbounded_channel::<ServerFrame>();

    // Set once the party registers or joins; used for routing and cleanup.
    let mut identity: Option<(String, Party)> = None;

    loop {
        tokio::select! {
            frame = queued.recv() => {
                let Some(frame) = frame else { break };
                match serde_json::to_string(&frame) {
                    Ok(json) => {
                        if sink.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::error!(error = %e, "unencodable relay frame"),
                }
            }
            inbound = stream.next() => {
                let message = match inbound {
                    Some(Ok(message)) => message,
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "socket error");
                        break;
                    }
                    None => break,
                };
                match message {
                    Message::Text(text) => {
                        let frame = match serde_json::from_str::<ClientFrame>(text.as_str()) {
                            Ok(frame) => frame,
                            Err(e) => {
                                tracing::debug!(error = %e, "dropping malformed client frame");
                                continue;
                            }
                        };
                        dispatch(frame, &registry, &outbox, &mut identity).await;
                    }
                    Message::Close(_) => break,
                    Message::Ping(_) | Message::Pong(_) => {}
                    other => tracing::debug!(?other, "ignoring non-text message"),
                }
            }
        }
    }

    if let Some((code, party)) = identity {
        if let Some(survivor) = registry.remove_party(&code, party).await {
            let _ = survivor.send(ServerFrame::Cancelled);
        }
    }
}

async fn dispatch(
    frame: ClientFrame,
    registry: &Registry,
    outbox: &Outbox,
    identity: &mut Option<(String, Party)>,
) {
    match frame {
        ClientFrame::Register { code } => match registry.register(&code, outbox.clone()).await {
            Ok(()) => {
                *identity = Some((code.clone(), Party::Sender));
                let _ = outbox.send(ServerFrame::Registered { code });
            }
            Err(error) => {
                let _ = outbox.send(error_frame(error));
            }
        },
        ClientFrame::Join { code } => match registry.join(&code, outbox.clone()).await {
            Ok(sender) => {
                *identity = Some((code, Party::Receiver));
                let _ = outbox.send(ServerFrame::Joined);
                let _ = sender.send(ServerFrame::PeerJoined);
            }
            Err(error) => {
                let _ = outbox.send(error_frame(error));
            }
        },
        ClientFrame::Signal { payload } => {
            let Some((code, party)) = identity.as_ref() else {
                tracing::debug!("dropping signal from unidentified socket");
                return;
            };
            match registry.peer_of(code, *party).await {
                Some(peer) => {
                    let _ = peer.send(ServerFrame::Signal { payload });
                }
                None => tracing::debug!(%code, "dropping signal, no peer yet"),
            }
        }
        ClientFrame::Cancel => {
            let Some((code, party)) = identity.as_ref() else {
                return;
            };
            if let Some(peer) = registry.peer_of(code, *party).await {
                let _ = peer.send(ServerFrame::Cancelled);
            }
        }
    }
}

fn error_frame(code: RelayErrorCode) -> ServerFrame {
    let message = match code {
        RelayErrorCode::Taken => "code already registered",
        RelayErrorCode::NotFound => "no sender registered under this code",
        RelayErrorCode::Busy => "code already has a receiver",
        RelayErrorCode::Expired => "registration expired",
    };
    ServerFrame::Error {
        code,
        message: message.to_string(),
    }
}
