use thiserror::Error;

/// Faults that terminate a transfer session.
///
/// Every variant is terminal: the session transitions to `Failed` carrying
/// the cause and releases the channel and relay connection. Nothing here is
/// retried internally, except bounded part-file write retries before
/// `InsufficientLocalStorage` is raised.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("relay unreachable: {0}")]
    RelayUnreachable(String),

    #[error("could not mint a unique rendezvous code")]
    CodeExhausted,

    #[error("no sender registered under code '{0}'")]
    CodeNotFound(String),

    #[error("code '{0}' already has an active pairing")]
    CodeBusy(String),

    #[error("registration for code '{0}' has expired")]
    CodeExpired(String),

    #[error("negotiation deadline elapsed")]
    NegotiationTimeout,

    #[error("connectivity establishment failed: {0}")]
    ConnectivityFailure(String),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("channel closed before the transfer completed")]
    ChannelClosedEarly,

    #[error("no chunk arrived within the inactivity deadline")]
    ChunkInactivityTimeout,

    #[error("checksum mismatch: sender declared {expected}, receiver computed {computed}")]
    ChecksumMismatch { expected: String, computed: String },

    #[error("length mismatch: header declared {declared} bytes, received {received}")]
    LengthMismatch { declared: u64, received: u64 },

    #[error("could not write part file to local storage: {0}")]
    InsufficientLocalStorage(std::io::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
