//! TFTP Transfer Errors
//!
//! Every way a request or a transfer can go wrong, together with the wire
//! error code the peer is told about (if any).

use std::io;

use thiserror::Error;

use crate::protocol::TftpErrorCode;

/// Errors raised while decoding packets or driving a transfer session.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The datagram could not be decoded (short header, unterminated string, bad UTF-8).
    #[error("malformed packet: {0}")]
    MalformedRequest(String),

    /// The first datagram of a session was not a RRQ or WRQ, or asked for an unsupported mode.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// The read source could not be opened.
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// The target lies outside the configured root or cannot be created.
    #[error("access violation: {0}")]
    AccessViolation(String),

    /// The write destination already exists and overwriting is disabled.
    #[error("file already exists: {0}")]
    FileAlreadyExists(String),

    /// The destination ran out of space mid-transfer.
    #[error("disk full while writing {0}")]
    DiskFull(String),

    /// Retries were exhausted while waiting on `block`.
    #[error("timed out waiting on block {block} after {attempts} attempts")]
    Timeout { block: u16, attempts: u32 },

    /// The client ended the transfer with its own ERROR packet.
    #[error("aborted by client: {message} (code {code})")]
    Aborted { code: u16, message: String },

    /// Socket or file I/O failed mid-transfer.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, TransferError>;

/// Failure classification reported back to the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    MalformedRequest,
    UnsupportedOperation,
    FileNotFound,
    AccessViolation,
    DiskFull,
    Timeout,
    Aborted,
    Io,
}

impl TransferError {
    /// Wrap an I/O error from writing the destination, promoting "no space" to [`TransferError::DiskFull`].
    pub fn from_write(err: io::Error, filename: &str) -> Self {
        if err.kind() == io::ErrorKind::StorageFull {
            Self::DiskFull(filename.to_string())
        } else {
            Self::Io(err)
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            Self::MalformedRequest(_) => FailureKind::MalformedRequest,
            Self::UnsupportedOperation(_) => FailureKind::UnsupportedOperation,
            Self::FileNotFound(_) => FailureKind::FileNotFound,
            Self::AccessViolation(_) | Self::FileAlreadyExists(_) => FailureKind::AccessViolation,
            Self::DiskFull(_) => FailureKind::DiskFull,
            Self::Timeout { .. } => FailureKind::Timeout,
            Self::Aborted { .. } => FailureKind::Aborted,
            Self::Io(_) => FailureKind::Io,
        }
    }

    /// The error code to put on the wire, or `None` when no ERROR packet should be sent.
    ///
    /// A client that aborted with its own ERROR packet is not answered.
    pub fn wire_code(&self) -> Option<TftpErrorCode> {
        match self {
            Self::MalformedRequest(_) | Self::UnsupportedOperation(_) => Some(TftpErrorCode::IllegalOperation),
            Self::FileNotFound(_) => Some(TftpErrorCode::FileNotFound),
            Self::AccessViolation(_) => Some(TftpErrorCode::AccessViolation),
            Self::FileAlreadyExists(_) => Some(TftpErrorCode::FileAlreadyExists),
            Self::DiskFull(_) => Some(TftpErrorCode::DiskFull),
            Self::Timeout { .. } | Self::Io(_) => Some(TftpErrorCode::NotDefined),
            Self::Aborted { .. } => None,
        }
    }

    /// Human-readable message for the ERROR packet.
    pub fn wire_message(&self) -> String {
        match self {
            Self::Timeout { .. } => "Transfer timed out".to_string(),
            Self::Io(_) => "I/O error".to_string(),
            Self::DiskFull(_) => TftpErrorCode::DiskFull.default_message().to_string(),
            Self::FileNotFound(name) => format!("File not found: {name}"),
            Self::FileAlreadyExists(name) => format!("File already exists: {name}"),
            other => other.to_string(),
        }
    }
}
