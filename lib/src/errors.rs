use std::io;
use thiserror::Error;

/// Every fault that can terminate a Caesar session. All variants are
/// fatal to the session that observes them; none are retried internally
/// except `NameInUse` during sender name allocation.
#[derive(Error, Debug)]
pub enum CaesarError {
    // Transport
    #[error("failed to connect to relay at {0}")]
    ConnectFailed(String),
    #[error("transport closed by peer")]
    TransportClosed,
    #[error("operation timed out")]
    Timeout,

    // Relay control
    #[error("transfer name already in use")]
    NameInUse,
    #[error("no such transfer")]
    NoSuchTransfer,
    #[error("transfer already paired")]
    AlreadyPaired,
    #[error("malformed rendezvous request")]
    BadRequest,

    // Protocol
    #[error("malformed frame")]
    MalformedFrame,
    #[error("unsupported protocol version {0}")]
    UnknownVersion(u16),
    #[error("unexpected packet while awaiting {0}")]
    UnexpectedPacket(&'static str),
    #[error("nonce sequence exhausted")]
    NonceReuse,
    #[error("out-of-order chunk for file {file_index} at offset {offset}")]
    OutOfOrderChunk { file_index: u64, offset: u64 },
    #[error("session aborted by peer: {0}")]
    SessionAborted(String),

    // Crypto
    #[error("key agreement failed")]
    KeyMismatch,
    #[error("chunk encryption failed")]
    EncryptFailed,
    #[error("chunk decryption failed")]
    DecryptFailed,

    // Filesystem
    #[error("destination already exists: {0}")]
    DestinationConflict(String),
    #[error("write to destination failed")]
    WriteFailed(#[source] io::Error),
    #[error("file size mismatch: announced {expected}, received {actual}")]
    SizeMismatch { expected: u64, actual: u64 },
    #[error("file hash mismatch: announced {expected}, computed {actual}")]
    HashMismatch { expected: String, actual: String },
    #[error("invalid file name: {0}")]
    BadFileName(String),

    // Policy
    #[error("could not allocate an unused transfer name")]
    NameAllocationFailed,
    #[error("announced transfer of {0} bytes exceeds the configured ceiling")]
    ListTooLarge(u64),
    #[error("transfer rejected by local policy")]
    Cancelled,
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    #[error("i/o failure")]
    Io(#[from] io::Error),
}
