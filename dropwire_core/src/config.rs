use crate::error::TransferError;
use std::time::Duration;
use url::Url;

/// Default chunk size (256KB)
pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

/// Default receiver memory budget (64MB)
pub const DEFAULT_MEMORY_BUDGET: usize = 64 * 1024 * 1024;

/// Default relay endpoint
pub const DEFAULT_RELAY_URL: &str = "ws://127.0.0.1:9009/ws";

/// Per-session configuration, provided as a single object at session
/// construction. The CLI/config layer that populates it lives outside this
/// crate.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Relay (signaling) endpoint.
    pub relay_url: Url,
    /// Bytes per chunk. The last chunk of a transfer may be shorter.
    pub chunk_size: usize,
    /// Maximum bytes the receiver stages in memory before spilling to a
    /// part file.
    pub memory_budget: usize,
    /// Deadline for signaling plus connectivity establishment.
    pub negotiation_timeout: Duration,
    /// Deadline for the gap between consecutive channel frames while
    /// transferring.
    pub chunk_inactivity_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            relay_url: Url::parse(DEFAULT_RELAY_URL).expect("default relay url is valid"),
            chunk_size: DEFAULT_CHUNK_SIZE,
            memory_budget: DEFAULT_MEMORY_BUDGET,
            negotiation_timeout: Duration::from_secs(30),
            chunk_inactivity_timeout: Duration::from_secs(20),
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), TransferError> {
        if self.chunk_size == 0 {
            return Err(TransferError::InvalidConfig(
                "chunk size must be non-zero".to_string(),
            ));
        }
        if self.chunk_size > u32::MAX as usize {
            return Err(TransferError::InvalidConfig(format!(
                "chunk size {} exceeds the wire limit of {} bytes",
                self.chunk_size,
                u32::MAX
            )));
        }
        if self.memory_budget < self.chunk_size {
            return Err(TransferError::InvalidConfig(format!(
                "memory budget {} is smaller than one chunk ({})",
                self.memory_budget, self.chunk_size
            )));
        }
        Ok(())
    }

    /// Outbound-buffer level above which the sender suspends.
    pub fn high_water_mark(&self) -> usize {
        (self.chunk_size * 4).max(1024 * 1024)
    }

    /// Outbound-buffer level at which a suspended sender resumes.
    pub fn low_water_mark(&self) -> usize {
        self.high_water_mark() / 2
    }
}
