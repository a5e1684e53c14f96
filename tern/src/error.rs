// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Lesser General Public License that can be found
// in the LICENSE file.

use std::fmt::{self, Display};
use std::io;

use codec::ReasonCode;
use tokio_tungstenite::tungstenite;

/// Represent the types of errors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Server rejected the CONNECT request with a non-zero reason code.
    ConnAckRejected(ReasonCode),

    /// Operation abandoned because the connection was lost before its
    /// acknowledgement arrived.
    Cancelled,

    /// Peer sent a packet that could not be decoded.
    MalformedPacket,

    /// Peer sent a well-formed but semantically illegal packet.
    ProtocolError,

    /// Packet encode error.
    EncodeError,

    /// Operation requires a connected session.
    InvalidSessionStatus,

    /// No inbound packet within the negotiated keep-alive window.
    KeepAliveTimeout,

    /// All 65535 packet identifiers are in flight.
    PacketIdExhausted,

    /// CONNACK did not arrive within the handshake window.
    HandshakeTimeout,

    /// Error occurred while performing I/O.
    IoError,

    /// Socket stream error.
    SocketError,

    /// Cert files error.
    CertError,
}

/// Error type of this library.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Error {
    /// Type of current error.
    kind: ErrorKind,

    /// Detail message about this error.
    message: String,
}

impl Error {
    #[must_use]
    pub fn new(kind: ErrorKind, message: &str) -> Self {
        Self {
            kind,
            message: message.to_owned(),
        }
    }

    #[must_use]
    pub fn from_string(kind: ErrorKind, message: String) -> Self {
        Self { kind, message }
    }

    /// Get type of current error.
    #[must_use]
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// Get detail message of current error.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::from_string(ErrorKind::IoError, format!("IoError {err}"))
    }
}

impl From<tungstenite::Error> for Error {
    fn from(err: tungstenite::Error) -> Self {
        Self::from_string(ErrorKind::IoError, format!("Websocket error: {err}"))
    }
}

impl From<codec::EncodeError> for Error {
    fn from(err: codec::EncodeError) -> Self {
        Self::from_string(ErrorKind::EncodeError, format!("{err:?}"))
    }
}

impl From<codec::DecodeError> for Error {
    fn from(err: codec::DecodeError) -> Self {
        use codec::DecodeError;
        // Packets that parse but violate the protocol (wrong type or flags
        // nibble, illegal QoS, zero packet id, out-of-range values) are
        // protocol errors; everything else failed to parse at all.
        let kind = match err {
            DecodeError::InvalidPacketType
            | DecodeError::InvalidPacketFlags
            | DecodeError::InvalidQoS
            | DecodeError::InvalidPacketId
            | DecodeError::InvalidPropertyValue
            | DecodeError::InvalidReasonCode => ErrorKind::ProtocolError,
            _ => ErrorKind::MalformedPacket,
        };
        Self::from_string(kind, format!("{err:?}"))
    }
}

impl From<codec::topic::TopicError> for Error {
    fn from(err: codec::topic::TopicError) -> Self {
        Self::from_string(ErrorKind::EncodeError, format!("Invalid topic: {err:?}"))
    }
}

impl From<codec::utils::StringError> for Error {
    fn from(err: codec::utils::StringError) -> Self {
        Self::from_string(ErrorKind::EncodeError, format!("Invalid string: {err:?}"))
    }
}
