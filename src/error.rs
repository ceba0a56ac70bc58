//! Error taxonomy untuk Pigeon RPC
//!
//! Semua path error mengembalikan `RpcError`, tidak ada panic di library.
//! Transport outcomes dipecah jadi dua bucket: `ConnectionClosed` (peer
//! menutup stream) dan `Io` (error lainnya). Keduanya mengakhiri sesi.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Main error type for the RPC system.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("Invalid port: {0}")]
    InvalidPort(u32),

    #[error("Invalid address: {0:?}")]
    InvalidAddress(String),

    #[error("Invalid function name: {reason}")]
    InvalidName { reason: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Invalid or no prefix: {0}")]
    InvalidPrefix(u32),

    #[error("Invalid handle: {0}")]
    InvalidHandle(u32),

    #[error("Unknown request type: {0}")]
    UnknownRequestType(u32),

    #[error("Function not found: {0}")]
    FunctionNotFound(String),

    #[error("Function registration failed for {name:?}")]
    FunctionRegistrationFailed { name: String },

    #[error("RPC call failed")]
    CallFailed,

    #[error("Connection to {addr} failed")]
    ConnectionFailed {
        addr: String,
        #[source]
        source: Option<io::Error>,
    },

    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("Payload too large: {len} bytes (limit {limit})")]
    PayloadTooLarge { len: u64, limit: u64 },

    #[error("I/O error: {0}")]
    Io(#[source] io::Error),
}

/// Result type alias for RPC operations.
pub type Result<T> = std::result::Result<T, RpcError>;

impl RpcError {
    /// True kalau error berasal dari transport (closed atau I/O).
    ///
    /// Sesi yang mengalami error ini tidak bisa dipakai lagi.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::ConnectionClosed | Self::Io(_))
    }

    pub(crate) fn invalid_name(reason: impl Into<String>) -> Self {
        Self::InvalidName {
            reason: reason.into(),
        }
    }

    pub(crate) fn connection_failed(addr: &SocketAddr, source: io::Error) -> Self {
        Self::ConnectionFailed {
            addr: addr.to_string(),
            source: Some(source),
        }
    }
}

// A short read means the peer hung up mid-frame; a zero-length write means
// the peer stopped accepting bytes. Everything else is a hard error.
impl From<io::Error> for RpcError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof | io::ErrorKind::WriteZero => Self::ConnectionClosed,
            _ => Self::Io(err),
        }
    }
}
