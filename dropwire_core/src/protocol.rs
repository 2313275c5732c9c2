//! Data-channel wire protocol: the transfer header and chunk frames.
//!
//! Every channel message is one bincode-encoded [`Frame`]. The header is
//! always the first frame; chunks follow in strict sequence order; the
//! completion marker carries the authoritative whole-file checksum.

use crate::error::TransferError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Maximum accepted file name length (bytes)
pub const MAX_FILENAME_LENGTH: usize = 255;

/// Metadata envelope sent before any chunk. Immutable once sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferHeader {
    pub file_name: String,
    pub total_len: u64,
    pub chunk_size: u32,
    pub chunk_count: u64,
    /// Placeholder at header time; the completion marker carries the
    /// authoritative value computed while reading.
    pub checksum: Option<String>,
}

impl TransferHeader {
    pub fn new(file_name: impl Into<String>, total_len: u64, chunk_size: u32) -> Self {
        let chunk_count = if chunk_size == 0 {
            0
        } else {
            total_len.div_ceil(chunk_size as u64)
        };
        Self {
            file_name: file_name.into(),
            total_len,
            chunk_size,
            chunk_count,
            checksum: None,
        }
    }

    /// Reject headers a well-behaved sender can never produce.
    pub fn validate(&self) -> Result<(), TransferError> {
        if self.chunk_size == 0 {
            return Err(TransferError::ProtocolViolation(
                "header declares zero chunk size".to_string(),
            ));
        }
        let expected = self.total_len.div_ceil(self.chunk_size as u64);
        if self.chunk_count != expected {
            return Err(TransferError::ProtocolViolation(format!(
                "header declares {} chunks, {} bytes at {} bytes/chunk requires {}",
                self.chunk_count, self.total_len, self.chunk_size, expected
            )));
        }
        if self.file_name.is_empty() || self.file_name.len() > MAX_FILENAME_LENGTH {
            return Err(TransferError::ProtocolViolation(format!(
                "header file name length {} out of range",
                self.file_name.len()
            )));
        }
        Ok(())
    }
}

/// One data-channel message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Frame {
    Header(TransferHeader),
    Chunk { seq: u64, payload: Vec<u8> },
    Complete { checksum: String },
}

impl Frame {
    pub fn encode(&self) -> Result<Bytes, TransferError> {
        let raw = bincode::serialize(self)
            .map_err(|e| TransferError::ProtocolViolation(format!("unencodable frame: {}", e)))?;
        Ok(Bytes::from(raw))
    }

    pub fn decode(raw: &[u8]) -> Result<Self, TransferError> {
        bincode::deserialize(raw)
            .map_err(|e| TransferError::ProtocolViolation(format!("undecodable frame: {}", e)))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Frame::Header(_) => "header",
            Frame::Chunk { .. } => "chunk",
            Frame::Complete { .. } => "complete",
        }
    }
}

/// Strip directories and control characters from a sender-supplied file
/// name so it can never escape the destination directory.
pub fn sanitize_file_name(file_name: &str) -> String {
    let last = file_name
        .split(['/', '\\'])
        .next_back()
        .unwrap_or("unknown_file");

    let mut clean: String = last.chars().filter(|c| !c.is_control()).collect();

    if clean == ".." || clean == "." || clean.trim().is_empty() {
        return "unknown_file".to_string();
    }

    if clean.len() > MAX_FILENAME_LENGTH {
        let mut cutoff = MAX_FILENAME_LENGTH;
        while !clean.is_char_boundary(cutoff) {
            cutoff -= 1;
        }
        clean.truncate(cutoff);
    }

    clean
}
