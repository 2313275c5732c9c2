//! Receiver pipeline: reassemble sequenced chunks under a fixed memory
//! budget, spilling to part files, then merge and verify.
//!
//! Staged bytes never exceed the configured budget: once the staging
//! buffer cannot absorb the next chunk it is flushed to a numbered part
//! file next to the destination. The merge step concatenates parts in
//! order and removes them.

use crate::TransferEvent;
use crate::channel::{ChannelEvent, ChannelEvents};
use crate::error::TransferError;
use crate::progress::ProgressTracker;
use crate::protocol::{self, Frame, TransferHeader};
use crate::session::{Session, SessionState};
use blake3::Hasher;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;

/// Attempts per part-file write before giving up on local storage.
const WRITE_RETRIES: u32 = 3;

/// Outcome of a completed receive.
#[derive(Debug)]
pub struct ReceivedFile {
    pub path: PathBuf,
    pub header: TransferHeader,
    pub checksum: String,
    pub parts_written: u64,
    pub peak_staged: usize,
}

/// Receive one transfer into `dest_dir`. The destination file name comes
/// from the sanitized header.
pub async fn receive_to_dir(
    session: &mut Session,
    events: &mut ChannelEvents,
    dest_dir: &Path,
) -> Result<ReceivedFile, TransferError> {
    match run(session, events, dest_dir).await {
        Ok(received) => {
            session.advance(SessionState::Done).await;
            let _ = session
                .event_sender()
                .send(TransferEvent::Completed {
                    file_name: received.header.file_name.clone(),
                })
                .await;
            Ok(received)
        }
        Err(e) => {
            session.fail(&e).await;
            Err(e)
        }
    }
}

async fn run(
    session: &mut Session,
    events: &mut ChannelEvents,
    dest_dir: &Path,
) -> Result<ReceivedFile, TransferError> {
    let inactivity = session.config().chunk_inactivity_timeout;
    let budget = session.config().memory_budget;

    let header = match next_frame(events, inactivity).await? {
        Frame::Header(header) => header,
        other => {
            return Err(TransferError::ProtocolViolation(format!(
                "expected transfer header, got {}",
                other.name()
            )));
        }
    };
    header.validate()?;
    if header.chunk_size as usize > budget {
        return Err(TransferError::InvalidConfig(format!(
            "chunk size {} exceeds memory budget {}",
            header.chunk_size, budget
        )));
    }

    let file_name = protocol::sanitize_file_name(&header.file_name);
    let dest_path = dest_dir.join(&file_name);
    tracing::info!(
        file = %file_name,
        size = %crate::util::human_bytes(header.total_len),
        chunks = header.chunk_count,
        "starting receive"
    );

    session.advance(SessionState::Transferring).await;

    let mut progress = ProgressTracker::new(
        file_name.clone(),
        header.total_len,
        false,
        session.event_sender(),
    );
    let mut hasher = Hasher::new();
    let mut staging: Vec<u8> = Vec::new();
    let mut parts: Vec<PathBuf> = Vec::new();
    let mut peak_staged = 0usize;
    let mut received: u64 = 0;
    let mut expected_seq: u64 = 0;

    let sender_checksum = loop {
        match next_frame(events, inactivity).await? {
            Frame::Chunk { seq, payload } => {
                if seq != expected_seq {
                    return Err(TransferError::ProtocolViolation(format!(
                        "chunk {} arrived, expected {}",
                        seq, expected_seq
                    )));
                }
                if seq >= header.chunk_count {
                    return Err(TransferError::ProtocolViolation(format!(
                        "chunk {} beyond declared count {}",
                        seq, header.chunk_count
                    )));
                }
                let is_last = seq == header.chunk_count - 1;
                let expected_len = if is_last {
                    header.total_len - seq * header.chunk_size as u64
                } else {
                    header.chunk_size as u64
                };
                if payload.len() as u64 != expected_len {
                    return Err(TransferError::ProtocolViolation(format!(
                        "chunk {} is {} bytes, expected {}",
                        seq,
                        payload.len(),
                        expected_len
                    )));
                }

                hasher.update(&payload);
                received += payload.len() as u64;
                expected_seq += 1;

                if !staging.is_empty() && staging.len() + payload.len() > budget {
                    let part = part_path(&dest_path, parts.len());
                    write_part(&part, &staging).await?;
                    tracing::debug!(part = %part.display(), bytes = staging.len(), "spilled part");
                    parts.push(part);
                    staging.clear();
                }
                staging.extend_from_slice(&payload);
                peak_staged = peak_staged.max(staging.len());
                progress.record(payload.len() as u64).await;
            }
            Frame::Complete { checksum } => break checksum,
            Frame::Header(_) => {
                return Err(TransferError::ProtocolViolation(
                    "duplicate transfer header".to_string(),
                ));
            }
        }
    };

    if received != header.total_len {
        return Err(TransferError::LengthMismatch {
            declared: header.total_len,
            received,
        });
    }

    let parts_written = parts.len() as u64;
    merge(&dest_path, &parts, &staging).await?;

    session.advance(SessionState::Verifying).await;
    let computed = hasher.finalize().to_hex().to_string();
    let expected = match &header.checksum {
        Some(from_header) if *from_header != sender_checksum => {
            return Err(TransferError::ProtocolViolation(
                "header and completion checksums disagree".to_string(),
            ));
        }
        _ => sender_checksum,
    };
    if computed != expected {
        // The merged file stays on disk for inspection.
        return Err(TransferError::ChecksumMismatch { expected, computed });
    }
    tracing::info!(file = %file_name, checksum = %computed, "receive verified");

    Ok(ReceivedFile {
        path: dest_path,
        header,
        checksum: computed,
        parts_written,
        peak_staged,
    })
}

/// Next channel frame, bounded by the chunk inactivity deadline.
async fn next_frame(
    events: &mut ChannelEvents,
    inactivity: std::time::Duration,
) -> Result<Frame, TransferError> {
    loop {
        let event = tokio::time::timeout(inactivity, events.recv())
            .await
            .map_err(|_| TransferError::ChunkInactivityTimeout)?;
        match event {
            Some(ChannelEvent::Message(raw)) => return Frame::decode(&raw),
            Some(ChannelEvent::Closed) | None => return Err(TransferError::ChannelClosedEarly),
            Some(other) => tracing::debug!(?other, "dropping channel event while receiving"),
        }
    }
}

fn part_path(dest: &Path, index: usize) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unknown_file".to_string());
    name.push_str(&format!(".part{}", index));
    dest.with_file_name(name)
}

/// Write one part file, retrying transient failures. A persistent failure
/// means the destination cannot hold the transfer.
async fn write_part(path: &Path, data: &[u8]) -> Result<(), TransferError> {
    let mut last_err = None;
    for attempt in 0..WRITE_RETRIES {
        match fs::write(path, data).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                tracing::warn!(part = %path.display(), attempt, error = %e, "part write failed");
                last_err = Some(e);
            }
        }
    }
    match last_err {
        Some(e) => Err(TransferError::InsufficientLocalStorage(e)),
        None => Ok(()),
    }
}

/// Concatenate spilled parts and the staging tail into the destination,
/// then remove the parts.
async fn merge(dest: &Path, parts: &[PathBuf], staging: &[u8]) -> Result<(), TransferError> {
    if parts.is_empty() {
        fs::write(dest, staging).await?;
        return Ok(());
    }

    if parts.len() == 1 && staging.is_empty() {
        if fs::metadata(dest).await.is_ok() {
            fs::remove_file(dest).await?;
        }
        fs::rename(&parts[0], dest).await?;
        return Ok(());
    }

    let mut out = File::create(dest).await?;
    for part in parts {
        let mut input = File::open(part).await?;
        tokio::io::copy(&mut input, &mut out).await?;
    }
    out.write_all(staging).await?;
    out.flush().await?;
    drop(out);

    for part in parts {
        fs::remove_file(part).await?;
    }
    Ok(())
}
