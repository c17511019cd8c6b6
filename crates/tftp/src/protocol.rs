//! TFTP Protocol Implementation
//!
//! This module contains the wire-level half of TFTP: opcodes, error codes,
//! transfer modes, the [`Packet`] codec and the request parser.
//!
//! # Packet Layout
//!
//! All multi-byte integers are big-endian (RFC 1350 §5):
//!
//! | Packet    | Layout                                              |
//! |-----------|-----------------------------------------------------|
//! | RRQ / WRQ | opcode (1 or 2) · filename · 0 · mode · 0           |
//! | DATA      | opcode (3) · block number · payload (0..512 bytes)  |
//! | ACK       | opcode (4) · block number                           |
//! | ERROR     | opcode (5) · error code · message · 0               |
//!
//! Decoding is pure: it only looks at the supplied slice and never touches a
//! socket or the filesystem.

use std::fmt;
use std::str::FromStr;

use crate::error::{Result, TransferError};

/// Payload size of a full DATA block. A shorter block ends the transfer.
pub const BLOCK_SIZE: usize = 512;

/// Largest datagram the engine produces or consumes (4-byte header + one block).
pub const MAX_PACKET_SIZE: usize = BLOCK_SIZE + 4;

/// TFTP Protocol Opcodes
///
/// These opcodes identify the type of TFTP packet being sent or received.
/// Each opcode corresponds to a specific packet format as defined in RFC 1350.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TftpOpcode {
    /// Read Request (RRQ) - Opcode 1
    ///
    /// Packet format: | Opcode | Filename | 0 | Mode | 0 |
    ReadRequest = 1,

    /// Write Request (WRQ) - Opcode 2
    ///
    /// Packet format: | Opcode | Filename | 0 | Mode | 0 |
    WriteRequest = 2,

    /// Data Packet (DATA) - Opcode 3
    ///
    /// Carries one block of at most 512 bytes. The last packet of a transfer
    /// is the first one shorter than 512 bytes, possibly empty.
    ///
    /// Packet format: | Opcode | Block# | Data |
    Data = 3,

    /// Acknowledgment (ACK) - Opcode 4
    ///
    /// Acknowledges a DATA packet. A WRQ is acknowledged with block 0.
    ///
    /// Packet format: | Opcode | Block# |
    Acknowledgment = 4,

    /// Error Packet (ERROR) - Opcode 5
    ///
    /// Terminates the transfer. Never acknowledged or retransmitted.
    ///
    /// Packet format: | Opcode | ErrorCode | ErrMsg | 0 |
    Error = 5,
}

impl TftpOpcode {
    /// Convert a u16 value to a TftpOpcode
    ///
    /// # Examples
    /// ```
    /// use tftp::TftpOpcode;
    ///
    /// assert_eq!(TftpOpcode::from_u16(2), Some(TftpOpcode::WriteRequest));
    /// assert_eq!(TftpOpcode::from_u16(6), None);
    /// ```
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(Self::ReadRequest),
            2 => Some(Self::WriteRequest),
            3 => Some(Self::Data),
            4 => Some(Self::Acknowledgment),
            5 => Some(Self::Error),
            _ => None,
        }
    }

    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Get the human-readable name of the opcode
    ///
    /// # Examples
    /// ```
    /// use tftp::TftpOpcode;
    ///
    /// assert_eq!(TftpOpcode::WriteRequest.name(), "WRQ");
    /// assert_eq!(TftpOpcode::Acknowledgment.name(), "ACK");
    /// ```
    pub fn name(self) -> &'static str {
        match self {
            Self::ReadRequest => "RRQ",
            Self::WriteRequest => "WRQ",
            Self::Data => "DATA",
            Self::Acknowledgment => "ACK",
            Self::Error => "ERROR",
        }
    }
}

impl From<TftpOpcode> for u16 {
    fn from(opcode: TftpOpcode) -> Self {
        opcode.as_u16()
    }
}

impl fmt::Display for TftpOpcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// TFTP Error Codes
///
/// Standard error codes as defined in RFC 1350.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TftpErrorCode {
    /// Error code 0: Not defined, see error message
    NotDefined = 0,

    /// Error code 1: File not found
    FileNotFound = 1,

    /// Error code 2: Access violation
    ///
    /// Includes attempts to reach files outside the served directory tree.
    AccessViolation = 2,

    /// Error code 3: Disk full or allocation exceeded
    DiskFull = 3,

    /// Error code 4: Illegal TFTP operation
    IllegalOperation = 4,

    /// Error code 5: Unknown transfer ID
    ///
    /// Sent to a packet source that is not the session's client.
    UnknownTransferId = 5,

    /// Error code 6: File already exists
    FileAlreadyExists = 6,

    /// Error code 7: No such user
    NoSuchUser = 7,
}

impl TftpErrorCode {
    /// Convert a u16 value to a TftpErrorCode
    ///
    /// # Examples
    /// ```
    /// use tftp::TftpErrorCode;
    ///
    /// assert_eq!(TftpErrorCode::from_u16(6), Some(TftpErrorCode::FileAlreadyExists));
    /// assert_eq!(TftpErrorCode::from_u16(99), None);
    /// ```
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(Self::NotDefined),
            1 => Some(Self::FileNotFound),
            2 => Some(Self::AccessViolation),
            3 => Some(Self::DiskFull),
            4 => Some(Self::IllegalOperation),
            5 => Some(Self::UnknownTransferId),
            6 => Some(Self::FileAlreadyExists),
            7 => Some(Self::NoSuchUser),
            _ => None,
        }
    }

    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Get the default error message for this error code
    pub fn default_message(self) -> &'static str {
        match self {
            Self::NotDefined => "Undefined error",
            Self::FileNotFound => "File not found",
            Self::AccessViolation => "Access violation",
            Self::DiskFull => "Disk full or allocation exceeded",
            Self::IllegalOperation => "Illegal TFTP operation",
            Self::UnknownTransferId => "Unknown transfer ID",
            Self::FileAlreadyExists => "File already exists",
            Self::NoSuchUser => "No such user",
        }
    }
}

impl From<TftpErrorCode> for u16 {
    fn from(error_code: TftpErrorCode) -> Self {
        error_code.as_u16()
    }
}

impl fmt::Display for TftpErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.default_message(), self.as_u16())
    }
}

/// TFTP Transfer Modes
///
/// Both `octet` and `netascii` transfers move file bytes unchanged; `mail`
/// is recognised so it can be refused explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferMode {
    /// Mode string: "octet"
    Octet,

    /// Mode string: "netascii"
    NetAscii,

    /// Mode string: "mail" (obsolete, RFC 1350 §1)
    Mail,
}

impl TransferMode {
    /// Parse a transfer mode from a string, ignoring case
    ///
    /// # Examples
    /// ```
    /// use tftp::TransferMode;
    ///
    /// assert_eq!("OCTET".parse::<TransferMode>(), Ok(TransferMode::Octet));
    /// assert!("binary".parse::<TransferMode>().is_err());
    /// ```
    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "octet" => Some(Self::Octet),
            "netascii" => Some(Self::NetAscii),
            "mail" => Some(Self::Mail),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Octet => "octet",
            Self::NetAscii => "netascii",
            Self::Mail => "mail",
        }
    }

    pub fn is_supported(self) -> bool {
        match self {
            Self::Octet | Self::NetAscii => true,
            Self::Mail => false,
        }
    }
}

impl FromStr for TransferMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::from_str_opt(s).ok_or_else(|| format!("Unsupported transfer mode: {}", s))
    }
}

impl fmt::Display for TransferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Direction of a transfer, seen from the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// RRQ: the server sends the file.
    Read,
    /// WRQ: the server receives the file.
    Write,
}

impl RequestKind {
    pub fn opcode(self) -> TftpOpcode {
        match self {
            Self::Read => TftpOpcode::ReadRequest,
            Self::Write => TftpOpcode::WriteRequest,
        }
    }
}

/// TFTP Request (RRQ/WRQ), produced once from the first datagram of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub kind: RequestKind,
    pub filename: String,
    /// Mode string as sent by the client, lowercased.
    pub mode: String,
}

impl Request {
    pub fn new(kind: RequestKind, filename: impl Into<String>, mode: impl Into<String>) -> Self {
        Self {
            kind,
            filename: filename.into(),
            mode: mode.into(),
        }
    }

    /// Parse the first datagram of a session.
    ///
    /// Anything other than a RRQ or WRQ is an [`TransferError::UnsupportedOperation`];
    /// a missing terminator or empty field is a [`TransferError::MalformedRequest`].
    /// Option pairs following the mode (RFC 2347) are ignored.
    ///
    /// # Examples
    /// ```
    /// use tftp::{Request, RequestKind};
    ///
    /// let request = Request::parse(b"\x00\x01boot.img\x00octet\x00").unwrap();
    /// assert_eq!(request.kind, RequestKind::Read);
    /// assert_eq!(request.filename, "boot.img");
    ///
    /// assert!(Request::parse(b"\x00\x06x\x00octet\x00").is_err());
    /// ```
    pub fn parse(buf: &[u8]) -> Result<Self> {
        let opcode = get_opcode(buf).ok_or_else(|| TransferError::MalformedRequest("request too short".into()))?;

        let kind = match TftpOpcode::from_u16(opcode) {
            Some(TftpOpcode::ReadRequest) => RequestKind::Read,
            Some(TftpOpcode::WriteRequest) => RequestKind::Write,
            Some(other) => {
                return Err(TransferError::UnsupportedOperation(format!(
                    "{} is not a request",
                    other
                )));
            }
            None => return Err(TransferError::UnsupportedOperation(format!("opcode {}", opcode))),
        };

        let (filename, i) = read_cstr(buf, 2, "filename")?;
        let (mode, _) = read_cstr(buf, i, "mode")?;

        if filename.is_empty() {
            return Err(TransferError::MalformedRequest("empty filename".into()));
        }
        if mode.is_empty() {
            return Err(TransferError::MalformedRequest("empty mode".into()));
        }

        Ok(Self::new(kind, filename, mode.to_ascii_lowercase()))
    }

    /// The parsed transfer mode, if it is one TFTP defines.
    pub fn transfer_mode(&self) -> Option<TransferMode> {
        TransferMode::from_str_opt(&self.mode)
    }
}

/// A decoded TFTP datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Request(Request),
    Data { block: u16, payload: Vec<u8> },
    Ack { block: u16 },
    Error { code: u16, message: String },
}

impl Packet {
    pub fn opcode(&self) -> TftpOpcode {
        match self {
            Self::Request(request) => request.kind.opcode(),
            Self::Data { .. } => TftpOpcode::Data,
            Self::Ack { .. } => TftpOpcode::Acknowledgment,
            Self::Error { .. } => TftpOpcode::Error,
        }
    }

    /// Build an ERROR packet carrying `code` and `message`.
    pub fn error(code: TftpErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.as_u16(),
            message: message.into(),
        }
    }

    /// Serialize to wire format.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Request(request) => {
                let mut v = Vec::with_capacity(4 + request.filename.len() + request.mode.len());
                v.extend_from_slice(&request.kind.opcode().as_u16().to_be_bytes());
                v.extend_from_slice(request.filename.as_bytes());
                v.push(0);
                v.extend_from_slice(request.mode.as_bytes());
                v.push(0);
                v
            }
            Self::Data { block, payload } => build_data(*block, payload),
            Self::Ack { block } => build_ack(*block),
            Self::Error { code, message } => build_error(*code, message),
        }
    }

    /// Decode a datagram.
    ///
    /// # Examples
    /// ```
    /// use tftp::Packet;
    ///
    /// assert_eq!(Packet::decode(&[0, 4, 0x01, 0x02]).unwrap(), Packet::Ack { block: 0x0102 });
    /// assert!(Packet::decode(&[0, 9, 0, 0]).is_err());
    /// ```
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let opcode = get_opcode(buf).ok_or_else(|| TransferError::MalformedRequest("packet too short".into()))?;

        match TftpOpcode::from_u16(opcode) {
            Some(TftpOpcode::ReadRequest | TftpOpcode::WriteRequest) => Request::parse(buf).map(Self::Request),
            Some(TftpOpcode::Data) => {
                let block = read_u16(buf, "DATA")?;
                let payload = &buf[4..];
                if payload.len() > BLOCK_SIZE {
                    return Err(TransferError::MalformedRequest(format!(
                        "DATA payload of {} bytes exceeds {}",
                        payload.len(),
                        BLOCK_SIZE
                    )));
                }
                Ok(Self::Data {
                    block,
                    payload: payload.to_vec(),
                })
            }
            Some(TftpOpcode::Acknowledgment) => Ok(Self::Ack {
                block: read_u16(buf, "ACK")?,
            }),
            Some(TftpOpcode::Error) => {
                let code = read_u16(buf, "ERROR")?;
                let (message, _) = read_cstr(buf, 4, "error message")?;
                Ok(Self::Error {
                    code,
                    message: message.to_string(),
                })
            }
            None => Err(TransferError::MalformedRequest(format!("unknown opcode {}", opcode))),
        }
    }
}

/// Find the next null byte in a buffer starting from a given position
pub fn find_zero(buf: &[u8], start: usize) -> Option<usize> {
    buf.get(start..)?.iter().position(|&b| b == 0).map(|pos| start + pos)
}

/// Read a null-terminated UTF-8 string at `start`, returning it and the offset past the terminator.
fn read_cstr<'a>(buf: &'a [u8], start: usize, field: &str) -> Result<(&'a str, usize)> {
    let end = find_zero(buf, start)
        .ok_or_else(|| TransferError::MalformedRequest(format!("{} not terminated", field)))?;
    let s = std::str::from_utf8(&buf[start..end])
        .map_err(|_| TransferError::MalformedRequest(format!("{} is not valid UTF-8", field)))?;
    Ok((s, end + 1))
}

/// Read the 16-bit field following the opcode.
fn read_u16(buf: &[u8], what: &str) -> Result<u16> {
    if buf.len() < 4 {
        return Err(TransferError::MalformedRequest(format!("{} too short", what)));
    }
    Ok(u16::from_be_bytes([buf[2], buf[3]]))
}

/// Build a TFTP Data packet
pub fn build_data(block: u16, data: &[u8]) -> Vec<u8> {
    let mut v = Vec::with_capacity(4 + data.len());
    v.extend_from_slice(&TftpOpcode::Data.as_u16().to_be_bytes());
    v.extend_from_slice(&block.to_be_bytes());
    v.extend_from_slice(data);
    v
}

/// Build a TFTP ACK packet
pub fn build_ack(block: u16) -> Vec<u8> {
    let mut v = Vec::with_capacity(4);
    v.extend_from_slice(&TftpOpcode::Acknowledgment.as_u16().to_be_bytes());
    v.extend_from_slice(&block.to_be_bytes());
    v
}

/// Build a TFTP Error packet
pub fn build_error(code: u16, msg: &str) -> Vec<u8> {
    let mut v = Vec::with_capacity(4 + msg.len() + 1);
    v.extend_from_slice(&TftpOpcode::Error.as_u16().to_be_bytes());
    v.extend_from_slice(&code.to_be_bytes());
    // An embedded NUL would end the message early on the peer's side.
    v.extend(msg.bytes().filter(|&b| b != 0));
    v.push(0);
    v
}

/// Get the opcode from a TFTP packet
pub fn get_opcode(buf: &[u8]) -> Option<u16> {
    if buf.len() >= 2 {
        Some(u16::from_be_bytes([buf[0], buf[1]]))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_bytes(opcode: u16, rest: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&opcode.to_be_bytes());
        buf.extend_from_slice(rest);
        buf
    }

    #[test]
    fn test_tftp_opcode_conversion() {
        assert_eq!(TftpOpcode::ReadRequest.as_u16(), 1);
        assert_eq!(TftpOpcode::Error.as_u16(), 5);
        assert_eq!(TftpOpcode::from_u16(3), Some(TftpOpcode::Data));
        assert_eq!(TftpOpcode::from_u16(0), None);
        assert_eq!(TftpOpcode::from_u16(6), None);
    }

    #[test]
    fn test_tftp_error_code_conversion() {
        assert_eq!(TftpErrorCode::DiskFull.as_u16(), 3);
        assert_eq!(TftpErrorCode::from_u16(5), Some(TftpErrorCode::UnknownTransferId));
        assert_eq!(TftpErrorCode::from_u16(8), None);
        assert_eq!(TftpErrorCode::FileNotFound.to_string(), "File not found (1)");
    }

    #[test]
    fn test_transfer_mode() {
        assert_eq!(TransferMode::from_str_opt("NetAscii"), Some(TransferMode::NetAscii));
        assert_eq!(TransferMode::from_str_opt("mail"), Some(TransferMode::Mail));
        assert_eq!(TransferMode::from_str_opt("binary"), None);
        assert!(TransferMode::Octet.is_supported());
        assert!(TransferMode::NetAscii.is_supported());
        assert!(!TransferMode::Mail.is_supported());
    }

    #[test]
    fn test_find_zero() {
        let buf = b"hello\0world\0";
        assert_eq!(find_zero(buf, 0), Some(5));
        assert_eq!(find_zero(buf, 6), Some(11));
        assert_eq!(find_zero(buf, 12), None);
        assert_eq!(find_zero(buf, 40), None);
    }

    #[test]
    fn test_parse_rrq() {
        let buf = request_bytes(1, b"test.txt\0OCTET\0");
        let request = Request::parse(&buf).unwrap();
        assert_eq!(request, Request::new(RequestKind::Read, "test.txt", "octet"));
        assert_eq!(request.transfer_mode(), Some(TransferMode::Octet));
    }

    #[test]
    fn test_parse_wrq_ignores_options() {
        let buf = request_bytes(2, b"upload.bin\0octet\0blksize\01400\0");
        let request = Request::parse(&buf).unwrap();
        assert_eq!(request.kind, RequestKind::Write);
        assert_eq!(request.filename, "upload.bin");
        assert_eq!(request.mode, "octet");
    }

    #[test]
    fn test_parse_rejects_non_requests() {
        for opcode in [3u16, 4, 5, 6, 0xffff] {
            let buf = request_bytes(opcode, b"name\0octet\0");
            assert!(
                matches!(Request::parse(&buf), Err(TransferError::UnsupportedOperation(_))),
                "opcode {opcode}"
            );
        }
    }

    #[test]
    fn test_parse_unterminated_fields() {
        let no_filename_nul = request_bytes(1, b"name");
        assert!(matches!(
            Request::parse(&no_filename_nul),
            Err(TransferError::MalformedRequest(_))
        ));

        let no_mode_nul = request_bytes(1, b"name\0octet");
        assert!(matches!(
            Request::parse(&no_mode_nul),
            Err(TransferError::MalformedRequest(_))
        ));

        let empty_filename = request_bytes(2, b"\0octet\0");
        assert!(matches!(
            Request::parse(&empty_filename),
            Err(TransferError::MalformedRequest(_))
        ));

        assert!(matches!(Request::parse(&[0]), Err(TransferError::MalformedRequest(_))));
    }

    #[test]
    fn test_decode_data() {
        let mut buf = vec![0, 3, 0x01, 0x00];
        buf.extend_from_slice(&[0x41; 512]);
        assert_eq!(
            Packet::decode(&buf).unwrap(),
            Packet::Data {
                block: 256,
                payload: vec![0x41; 512]
            }
        );

        assert_eq!(
            Packet::decode(&[0, 3, 0, 7]).unwrap(),
            Packet::Data {
                block: 7,
                payload: Vec::new()
            }
        );

        buf.push(0x41);
        assert!(Packet::decode(&buf).is_err());
        assert!(Packet::decode(&[0, 3, 0]).is_err());
    }

    #[test]
    fn test_decode_error() {
        let packet = Packet::decode(b"\x00\x05\x00\x02Access denied\x00").unwrap();
        assert_eq!(
            packet,
            Packet::Error {
                code: 2,
                message: "Access denied".into()
            }
        );

        assert!(matches!(
            Packet::decode(b"\x00\x05\x00\x02Access denied"),
            Err(TransferError::MalformedRequest(_))
        ));
    }

    #[test]
    fn test_decode_unknown_opcode() {
        assert!(matches!(
            Packet::decode(&[0, 6, 0, 0]),
            Err(TransferError::MalformedRequest(_))
        ));
        assert!(matches!(Packet::decode(&[]), Err(TransferError::MalformedRequest(_))));
    }

    #[test]
    fn test_build_data() {
        let data = b"Hello, TFTP!";
        let packet = build_data(300, data);

        assert_eq!(packet.len(), 4 + data.len());
        assert_eq!(&packet[0..2], &[0, 3]);
        assert_eq!(&packet[2..4], &[0x01, 0x2c]);
        assert_eq!(&packet[4..], data);
    }

    #[test]
    fn test_build_ack() {
        assert_eq!(build_ack(0xabcd), vec![0, 4, 0xab, 0xcd]);
        assert_eq!(Packet::Ack { block: 1 }.encode(), vec![0, 4, 0, 1]);
    }

    #[test]
    fn test_build_error() {
        let packet = Packet::error(TftpErrorCode::FileNotFound, "File not found").encode();
        assert_eq!(&packet[0..4], &[0, 5, 0, 1]);
        assert_eq!(&packet[4..], b"File not found\0");

        let sanitized = build_error(0, "a\0b");
        assert_eq!(&sanitized[4..], b"ab\0");
    }

    #[test]
    fn test_encode_request() {
        let packet = Packet::Request(Request::new(RequestKind::Write, "f.bin", "octet"));
        assert_eq!(packet.encode(), b"\x00\x02f.bin\x00octet\x00".to_vec());
        assert_eq!(packet.opcode(), TftpOpcode::WriteRequest);
    }
}
