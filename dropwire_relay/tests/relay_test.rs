//! Relay integration tests: real WebSocket clients against a relay bound
//! to an ephemeral port, up to a full transfer negotiated through it.

use dropwire_core::channel::PeerConnection;
use dropwire_core::config::SessionConfig;
use dropwire_core::error::TransferError;
use dropwire_core::loopback;
use dropwire_core::receiver::receive_to_dir;
use dropwire_core::sender::{SourceMeta, send_stream};
use dropwire_core::session::{Role, Session};
use dropwire_core::signaling::{RendezvousClient, ServerFrame, SignalPayload};
use std::io::Cursor;
use std::net::SocketAddr;
use tempfile::tempdir;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

async fn start_relay() -> (SocketAddr, CancellationToken) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let token = CancellationToken::new();
    let serve_token = token.clone();
    tokio::spawn(async move {
        dropwire_relay::run_with_listener(listener, serve_token)
            .await
            .unwrap();
    });
    (addr, token)
}

fn relay_url(addr: SocketAddr) -> Url {
    Url::parse(&format!("ws://{}/ws", addr)).unwrap()
}

#[tokio::test]
async fn register_join_and_signal_round_trip() {
    let (addr, _token) = start_relay().await;
    let url = relay_url(addr);

    let mut sender = RendezvousClient::connect(&url).await.unwrap();
    let code = sender.register().await.unwrap();
    assert_eq!(code.split('-').count(), 3);

    let mut receiver = RendezvousClient::connect(&url).await.unwrap();
    receiver.join(&code).await.unwrap();

    match sender.next_frame().await.unwrap() {
        ServerFrame::PeerJoined => {}
        other => panic!("unexpected frame: {:?}", other),
    }

    sender
        .send_signal(SignalPayload::Offer {
            sdp: "offer-sdp".to_string(),
        })
        .await
        .unwrap();
    sender
        .send_signal(SignalPayload::Candidate {
            candidate: "candidate-1".to_string(),
        })
        .await
        .unwrap();

    // Forwarded in order, payloads untouched.
    match receiver.next_frame().await.unwrap() {
        ServerFrame::Signal {
            payload: SignalPayload::Offer { sdp },
        } => assert_eq!(sdp, "offer-sdp"),
        other => panic!("unexpected frame: {:?}", other),
    }
    match receiver.next_frame().await.unwrap() {
        ServerFrame::Signal {
            payload: SignalPayload::Candidate { candidate },
        } => assert_eq!(candidate, "candidate-1"),
        other => panic!("unexpected frame: {:?}", other),
    }

    receiver
        .send_signal(SignalPayload::Answer {
            sdp: "answer-sdp".to_string(),
        })
        .await
        .unwrap();
    match sender.next_frame().await.unwrap() {
        ServerFrame::Signal {
            payload: SignalPayload::Answer { sdp },
        } => assert_eq!(sdp, "answer-sdp"),
        other => panic!("unexpected frame: {:?}", other),
    }
}

#[tokio::test]
async fn malformed_frames_do_not_kill_the_socket() {
    use futures_util::{SinkExt, StreamExt};
    use tokio_tungstenite::tungstenite::Message;

    let (addr, _token) = start_relay().await;
    let (mut ws, _response) = tokio_tungstenite::connect_async(relay_url(addr).as_str())
        .await
        .unwrap();

    ws.send(Message::Text("not json at all".into()))
        .await
        .unwrap();
    ws.send(Message::Text(
        r#"{"action":"register","code":"crow-mink-ibex"}"#.into(),
    ))
    .await
    .unwrap();

    loop {
        match ws.next().await.unwrap().unwrap() {
            Message::Text(text) => {
                assert!(text.as_str().contains(r#""action":"registered""#));
                break;
            }
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected message: {:?}", other),
        }
    }
}

#[tokio::test]
async fn registering_a_held_code_is_rejected_as_taken() {
    use futures_util::{SinkExt, StreamExt};
    use tokio_tungstenite::tungstenite::Message;

    let (addr, _token) = start_relay().await;
    let url = relay_url(addr);
    let register = r#"{"action":"register","code":"swan-stoat-lemur"}"#;

    let (mut first, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
    first.send(Message::Text(register.into())).await.unwrap();
    match first.next().await.unwrap().unwrap() {
        Message::Text(text) => assert!(text.as_str().contains(r#""action":"registered""#)),
        other => panic!("unexpected message: {:?}", other),
    }

    let (mut second, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
    second.send(Message::Text(register.into())).await.unwrap();
    match second.next().await.unwrap().unwrap() {
        Message::Text(text) => {
            assert!(text.as_str().contains(r#""action":"error""#));
            assert!(text.as_str().contains(r#""code":"taken""#));
        }
        other => panic!("unexpected message: {:?}", other),
    }
}

#[tokio::test]
async fn joining_an_unknown_code_is_not_found() {
    let (addr, _token) = start_relay().await;
    let mut client = RendezvousClient::connect(&relay_url(addr)).await.unwrap();
    let err = client.join("lynx-mole-toad").await.unwrap_err();
    assert!(matches!(err, TransferError::CodeNotFound(_)));
}

#[tokio::test]
async fn a_code_accepts_only_one_receiver() {
    let (addr, _token) = start_relay().await;
    let url = relay_url(addr);

    let mut sender = RendezvousClient::connect(&url).await.unwrap();
    let code = sender.register().await.unwrap();

    let mut first = RendezvousClient::connect(&url).await.unwrap();
    first.join(&code).await.unwrap();

    let mut second = RendezvousClient::connect(&url).await.unwrap();
    let err = second.join(&code).await.unwrap_err();
    assert!(matches!(err, TransferError::CodeBusy(_)));
}

#[tokio::test]
async fn codes_are_normalized_before_lookup() {
    let (addr, _token) = start_relay().await;
    let url = relay_url(addr);

    let mut sender = RendezvousClient::connect(&url).await.unwrap();
    let code = sender.register().await.unwrap();

    let mut receiver = RendezvousClient::connect(&url).await.unwrap();
    let shouty = format!("  {}  ", code.to_uppercase());
    receiver.join(&shouty).await.unwrap();
    assert!(matches!(
        sender.next_frame().await.unwrap(),
        ServerFrame::PeerJoined
    ));
}

#[tokio::test]
async fn a_vanishing_peer_cancels_the_survivor() {
    let (addr, _token) = start_relay().await;
    let url = relay_url(addr);

    let mut sender = RendezvousClient::connect(&url).await.unwrap();
    let code = sender.register().await.unwrap();

    let mut receiver = RendezvousClient::connect(&url).await.unwrap();
    receiver.join(&code).await.unwrap();
    assert!(matches!(
        sender.next_frame().await.unwrap(),
        ServerFrame::PeerJoined
    ));

    receiver.cancel().await.unwrap();
    assert!(matches!(
        sender.next_frame().await.unwrap(),
        ServerFrame::Cancelled
    ));
}

#[tokio::test]
async fn disconnecting_mid_negotiation_cancels_the_survivor() {
    let (addr, _token) = start_relay().await;
    let url = relay_url(addr);

    let mut sender = RendezvousClient::connect(&url).await.unwrap();
    let code = sender.register().await.unwrap();

    let mut receiver = RendezvousClient::connect(&url).await.unwrap();
    receiver.join(&code).await.unwrap();
    assert!(matches!(
        sender.next_frame().await.unwrap(),
        ServerFrame::PeerJoined
    ));

    receiver.close().await;
    assert!(matches!(
        sender.next_frame().await.unwrap(),
        ServerFrame::Cancelled
    ));
}

#[tokio::test]
async fn full_transfer_negotiated_through_the_relay() {
    let (addr, _token) = start_relay().await;
    let url = relay_url(addr);

    let config = SessionConfig {
        relay_url: url.clone(),
        chunk_size: 65_536,
        memory_budget: 262_144,
        ..Default::default()
    };
    let (conn_a, conn_b) = loopback::pair(config.low_water_mark());
    let dir = tempdir().unwrap();
    let dest = dir.path().to_path_buf();

    let data: Vec<u8> = (0..1_000_000).map(|i| (i % 239) as u8).collect();
    let expected_digest = blake3::hash(&data).to_hex().to_string();

    let mut sender_rendezvous = RendezvousClient::connect(&url).await.unwrap();
    let code = sender_rendezvous.register().await.unwrap();

    let sender_config = config.clone();
    let sender_data = data.clone();
    let sender_code = code.clone();
    let sender_task = tokio::spawn(async move {
        let (tx, _rx) = mpsc::channel(1024);
        let mut session = Session::new(Role::Sender, sender_config, tx).unwrap();
        session.set_code(sender_code);
        let mut connection: Box<dyn PeerConnection> = Box::new(conn_a);
        let (channel, mut events) = session
            .establish(&mut sender_rendezvous, connection.as_mut())
            .await?;
        let total_len = sender_data.len() as u64;
        send_stream(
            &mut session,
            channel.as_ref(),
            &mut events,
            Cursor::new(sender_data),
            SourceMeta {
                file_name: "relayed.bin".to_string(),
                total_len,
            },
        )
        .await
    });

    let (tx, _rx) = mpsc::channel(1024);
    let mut session = Session::new(Role::Receiver, config, tx).unwrap();
    session.set_code(code.clone());
    let mut rendezvous = RendezvousClient::connect(&url).await.unwrap();
    rendezvous.join(&code).await.unwrap();
    let mut connection: Box<dyn PeerConnection> = Box::new(conn_b);
    let (_channel, mut events) = session
        .establish(&mut rendezvous, connection.as_mut())
        .await
        .unwrap();
    let received = receive_to_dir(&mut session, &mut events, &dest)
        .await
        .unwrap();
    assert_eq!(session.code(), Some(code.as_str()));

    let sent_digest = sender_task.await.unwrap().unwrap();
    assert_eq!(sent_digest, expected_digest);
    assert_eq!(received.checksum, expected_digest);
    assert_eq!(
        tokio::fs::read(&received.path).await.unwrap(),
        data
    );
}
