//! Sender pipeline: slice a byte source into sequenced chunks and stream
//! them over the data channel under backpressure.

use crate::TransferEvent;
use crate::channel::{ChannelEvent, ChannelEvents, DataChannel};
use crate::error::TransferError;
use crate::progress::ProgressTracker;
use crate::protocol::{Frame, TransferHeader};
use crate::session::{Session, SessionState};
use blake3::Hasher;
use tokio::io::{AsyncRead, AsyncReadExt};

/// What the pipeline knows about the source before reading it.
#[derive(Debug, Clone)]
pub struct SourceMeta {
    pub file_name: String,
    pub total_len: u64,
}

/// Stream `source` over the channel as one transfer. Returns the final
/// whole-file digest on success.
pub async fn send_stream<R>(
    session: &mut Session,
    channel: &dyn DataChannel,
    events: &mut ChannelEvents,
    source: R,
    meta: SourceMeta,
) -> Result<String, TransferError>
where
    R: AsyncRead + Unpin,
{
    match run(session, channel, events, source, &meta).await {
        Ok(digest) => {
            session.advance(SessionState::Done).await;
            let _ = session
                .event_sender()
                .send(TransferEvent::Completed {
                    file_name: meta.file_name,
                })
                .await;
            Ok(digest)
        }
        Err(e) => {
            session.fail(&e).await;
            Err(e)
        }
    }
}

async fn run<R>(
    session: &mut Session,
    channel: &dyn DataChannel,
    events: &mut ChannelEvents,
    mut source: R,
    meta: &SourceMeta,
) -> Result<String, TransferError>
where
    R: AsyncRead + Unpin,
{
    let chunk_size = session.config().chunk_size;
    let high_water = session.config().high_water_mark();
    let header = TransferHeader::new(meta.file_name.clone(), meta.total_len, chunk_size as u32);
    let chunk_count = header.chunk_count;

    tracing::info!(
        file = %meta.file_name,
        size = %crate::util::human_bytes(meta.total_len),
        chunks = chunk_count,
        "starting send"
    );

    // Header travels while the channel is freshly open; chunk streaming is
    // what Transferring covers.
    channel.send(Frame::Header(header).encode()?)?;
    session.advance(SessionState::Transferring).await;

    let mut progress = ProgressTracker::new(
        meta.file_name.clone(),
        meta.total_len,
        true,
        session.event_sender(),
    );
    let mut hasher = Hasher::new();
    let mut remaining = meta.total_len;

    for seq in 0..chunk_count {
        wait_for_capacity(channel, events, high_water).await?;

        let len = remaining.min(chunk_size as u64) as usize;
        let mut payload = vec![0u8; len];
        source.read_exact(&mut payload).await?;
        hasher.update(&payload);
        remaining -= len as u64;

        channel.send(Frame::Chunk { seq, payload }.encode()?)?;
        progress.record(len as u64).await;
    }

    let checksum = hasher.finalize().to_hex().to_string();
    channel.send(
        Frame::Complete {
            checksum: checksum.clone(),
        }
        .encode()?,
    )?;

    session.advance(SessionState::Verifying).await;
    tracing::info!(file = %meta.file_name, %checksum, "send complete");
    Ok(checksum)
}

/// Suspend while the outbound buffer sits above the high-water mark,
/// resuming on `BufferedAmountLow`. Channel closure here means the peer
/// went away before the transfer finished.
async fn wait_for_capacity(
    channel: &dyn DataChannel,
    events: &mut ChannelEvents,
    high_water: usize,
) -> Result<(), TransferError> {
    while channel.buffered_amount() > high_water {
        match events.recv().await {
            Some(ChannelEvent::BufferedAmountLow) => continue,
            Some(ChannelEvent::Closed) | None => return Err(TransferError::ChannelClosedEarly),
            Some(other) => tracing::debug!(?other, "dropping channel event while throttled"),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::PeerConnection;
    use crate::config::SessionConfig;
    use crate::loopback;
    use crate::session::Role;
    use std::io::Cursor;
    use tokio::sync::mpsc;

    fn open_side(
        conn: &mut loopback::LoopbackConnection,
    ) -> (std::sync::Arc<dyn DataChannel>, ChannelEvents) {
        conn.open_channel().unwrap()
    }

    #[tokio::test]
    async fn sends_header_chunks_and_completion_in_order() {
        let (mut a, mut b) = loopback::pair(usize::MAX);
        let (channel, mut events) = open_side(&mut a);
        let (_peer_channel, mut peer_events) = open_side(&mut b);
        let offer = a.create_offer().unwrap();
        let answer = b.accept_offer(&offer).unwrap();
        a.apply_answer(&answer).unwrap();
        assert!(matches!(events.recv().await, Some(ChannelEvent::Open)));
        assert!(matches!(peer_events.recv().await, Some(ChannelEvent::Open)));

        let (tx, _rx) = mpsc::channel(64);
        let config = SessionConfig {
            chunk_size: 4,
            memory_budget: 16,
            ..Default::default()
        };
        let mut session = Session::new(Role::Sender, config, tx).unwrap();

        let data = b"0123456789".to_vec();
        let digest = send_stream(
            &mut session,
            channel.as_ref(),
            &mut events,
            Cursor::new(data.clone()),
            SourceMeta {
                file_name: "ten.bin".to_string(),
                total_len: data.len() as u64,
            },
        )
        .await
        .unwrap();

        assert_eq!(digest, blake3::hash(&data).to_hex().to_string());
        assert_eq!(session.state(), SessionState::Done);

        // Header first.
        let frame = match peer_events.recv().await {
            Some(ChannelEvent::Message(raw)) => Frame::decode(&raw).unwrap(),
            other => panic!("unexpected event: {:?}", other),
        };
        match frame {
            Frame::Header(header) => {
                assert_eq!(header.file_name, "ten.bin");
                assert_eq!(header.total_len, 10);
                assert_eq!(header.chunk_count, 3);
            }
            other => panic!("expected header, got {:?}", other),
        }

        // Chunks 0..3 with the short tail, then the completion marker.
        let mut reassembled = Vec::new();
        for expected_seq in 0..3u64 {
            match peer_events.recv().await {
                Some(ChannelEvent::Message(raw)) => match Frame::decode(&raw).unwrap() {
                    Frame::Chunk { seq, payload } => {
                        assert_eq!(seq, expected_seq);
                        reassembled.extend_from_slice(&payload);
                    }
                    other => panic!("expected chunk, got {:?}", other),
                },
                other => panic!("unexpected event: {:?}", other),
            }
        }
        assert_eq!(reassembled, data);

        match peer_events.recv().await {
            Some(ChannelEvent::Message(raw)) => match Frame::decode(&raw).unwrap() {
                Frame::Complete { checksum } => assert_eq!(checksum, digest),
                other => panic!("expected completion, got {:?}", other),
            },
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn closed_channel_fails_with_channel_closed_early() {
        let (mut a, mut b) = loopback::pair(usize::MAX);
        let (channel, mut events) = open_side(&mut a);
        let (peer_channel, _peer_events) = open_side(&mut b);
        let offer = a.create_offer().unwrap();
        let answer = b.accept_offer(&offer).unwrap();
        a.apply_answer(&answer).unwrap();
        assert!(matches!(events.recv().await, Some(ChannelEvent::Open)));

        peer_channel.close();

        let (tx, mut rx) = mpsc::channel(64);
        let config = SessionConfig {
            chunk_size: 4,
            memory_budget: 16,
            ..Default::default()
        };
        let mut session = Session::new(Role::Sender, config, tx).unwrap();
        let data = vec![7u8; 32];
        let err = send_stream(
            &mut session,
            channel.as_ref(),
            &mut events,
            Cursor::new(data.clone()),
            SourceMeta {
                file_name: "gone.bin".to_string(),
                total_len: data.len() as u64,
            },
        )
        .await
        .unwrap_err();

        assert!(matches!(err, TransferError::ChannelClosedEarly));
        assert_eq!(session.state(), SessionState::Failed);

        // The header never went out, so Transferring was never entered.
        while let Ok(event) = rx.try_recv() {
            assert!(!matches!(
                event,
                TransferEvent::StateChanged(SessionState::Transferring)
            ));
        }
    }
}
