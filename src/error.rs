// Permission is hereby granted, free of charge, to any person obtaining a
// copy of this software and associated documentation files (the "Software"),
// to deal in the Software without restriction, including without limitation
// the rights to use, copy, modify, merge, publish, distribute, sublicense,
// and/or sell copies of the Software, and to permit persons to whom the
// Software is furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS
// OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
// FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
// DEALINGS IN THE SOFTWARE.

use std::fmt;

/// `sam-bridge` error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error.
    #[error("i/o error: `{0}`")]
    IoError(#[from] std::io::Error),

    /// Protocol error on the control socket.
    #[error("protocol error: `{0}`")]
    Protocol(#[from] ProtocolError),

    /// Session lifecycle error.
    #[error("session error: `{0}`")]
    Session(#[from] SessionError),

    /// Session or bridge configuration error.
    #[error("config error: `{0}`")]
    Config(#[from] ConfigError),

    /// Stream semantics error, reported by the streaming collaborator.
    #[error("stream error: `{0}`")]
    Stream(#[from] StreamError),

    /// The I2CP router cannot be reached.
    #[error("i2cp router unreachable")]
    RouterUnreachable,

    /// An operation did not complete within its deadline.
    #[error("timeout: `{0}`")]
    Timeout(TimeoutKind),

    /// The operation was cancelled, e.g., because the owning connection closed.
    #[error("operation cancelled")]
    Cancelled,
}

/// Errors of the line protocol itself.
#[derive(Debug, PartialEq, Eq)]
pub enum ProtocolError {
    /// Command line could not be tokenized.
    InvalidSyntax,

    /// Command line exceeded the configured maximum length.
    LineTooLong,

    /// No handler is registered for the verb/action pair.
    UnknownCommand,

    /// A command other than `HELLO` was received before the handshake.
    HandshakeNotComplete,

    /// Authentication is required but the connection is not authenticated.
    AuthRequired,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSyntax => write!(f, "invalid command syntax"),
            Self::LineTooLong => write!(f, "line too long"),
            Self::UnknownCommand => write!(f, "unknown command"),
            Self::HandshakeNotComplete => write!(f, "handshake not complete"),
            Self::AuthRequired => write!(f, "authentication required"),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Session lifecycle errors.
#[derive(Debug, PartialEq, Eq)]
pub enum SessionError {
    /// The session id is already registered.
    DuplicateId,

    /// The destination already backs an active session.
    DuplicateDest,

    /// No session is registered under the given id.
    NotFound,

    /// The session exists but is not active.
    NotActive,

    /// The requested subsession style is not allowed under a primary session.
    InvalidSubsessionStyle,

    /// A sibling subsession already uses the id.
    DuplicateSubsessionId,

    /// A sibling subsession already claims the `(ListenPort, ListenProtocol)` pair.
    RoutingConflict,

    /// Protocol 6 is reserved for streaming and cannot be used by RAW sessions.
    Protocol6Disallowed,

    /// `STREAM ACCEPT` requested while forwarding is active.
    ForwardingActive,

    /// `STREAM FORWARD` requested while an accept listener exists.
    ListenerActive,

    /// Concurrent `STREAM ACCEPT` requested by a pre-3.2 client.
    ConcurrentAccept,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateId => write!(f, "session id already in use"),
            Self::DuplicateDest => write!(f, "destination already in use"),
            Self::NotFound => write!(f, "session not found"),
            Self::NotActive => write!(f, "session not active"),
            Self::InvalidSubsessionStyle => write!(f, "invalid subsession style"),
            Self::DuplicateSubsessionId => write!(f, "subsession id already in use"),
            Self::RoutingConflict => write!(f, "listen port and protocol already in use"),
            Self::Protocol6Disallowed => write!(f, "protocol 6 is reserved for streaming"),
            Self::ForwardingActive => write!(f, "stream forwarding is active"),
            Self::ListenerActive => write!(f, "stream accept listener is active"),
            Self::ConcurrentAccept => write!(f, "concurrent accept requires version 3.2"),
        }
    }
}

impl std::error::Error for SessionError {}

/// Option and payload validation errors.
#[derive(Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// Port outside `0..=65535` or unparseable.
    InvalidPort,

    /// Protocol outside `0..=255`, unparseable or reserved.
    InvalidProtocol,

    /// Tunnel quantity/length option is out of range.
    InvalidTunnelConfig,

    /// Forwarding port is zero or unparseable.
    InvalidForwardingPort,

    /// DATAGRAM3 source hash is not 44 base64 characters decoding to 32 bytes.
    InvalidHashLength,

    /// DATAGRAM3 source hash is not valid base64.
    InvalidHashFormat,

    /// Datagram payload is empty.
    EmptyPayload,

    /// Datagram payload exceeds the per-style maximum.
    PayloadTooLarge,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidPort => write!(f, "port must be in range 0..=65535"),
            Self::InvalidProtocol => write!(f, "protocol must be in range 0..=255"),
            Self::InvalidTunnelConfig => write!(f, "invalid tunnel configuration"),
            Self::InvalidForwardingPort => write!(f, "invalid forwarding port"),
            Self::InvalidHashLength => write!(f, "hash must be 44 base64 characters of 32 bytes"),
            Self::InvalidHashFormat => write!(f, "hash is not valid base64"),
            Self::EmptyPayload => write!(f, "payload is empty"),
            Self::PayloadTooLarge => write!(f, "payload exceeds maximum size"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Stream semantics errors, surfaced with the vocabulary of the SAM protocol.
#[derive(Debug, PartialEq, Eq)]
pub enum StreamError {
    /// The peer exists, but cannot be reached.
    CantReachPeer,

    /// The specified key is not valid (e.g., bad format).
    InvalidKey,

    /// The naming system can't resolve the given name.
    KeyNotFound,
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CantReachPeer => write!(f, "the peer exists, but cannot be reached"),
            Self::InvalidKey => write!(f, "the specified key is not valid (e.g., bad format)"),
            Self::KeyNotFound => write!(f, "the naming system can't resolve the given name"),
        }
    }
}

impl std::error::Error for StreamError {}

/// Which deadline fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    /// Read deadline before the handshake.
    Handshake,

    /// Read deadline after the handshake.
    Command,

    /// An outstanding `PING` was not answered in time.
    Pong,

    /// Stream accept deadline.
    Accept,

    /// Stream connect deadline.
    Connect,
}

impl fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Handshake => write!(f, "HELLO not received"),
            Self::Command => write!(f, "no command received"),
            Self::Pong => write!(f, "PONG not received"),
            Self::Accept => write!(f, "stream accept"),
            Self::Connect => write!(f, "stream connect"),
        }
    }
}

impl Error {
    /// SAM `RESULT=` token for the error.
    pub fn result_kind(&self) -> &'static str {
        match self {
            Self::Session(SessionError::DuplicateId) => "DUPLICATED_ID",
            Self::Session(SessionError::DuplicateSubsessionId) => "DUPLICATED_ID",
            Self::Session(SessionError::DuplicateDest) => "DUPLICATED_DEST",
            Self::Session(SessionError::NotFound) => "INVALID_ID",
            Self::Stream(StreamError::CantReachPeer) => "CANT_REACH_PEER",
            Self::Stream(StreamError::InvalidKey) => "INVALID_KEY",
            Self::Stream(StreamError::KeyNotFound) => "KEY_NOT_FOUND",
            Self::Timeout(_) => "TIMEOUT",
            _ => "I2P_ERROR",
        }
    }

    /// Human-readable `MESSAGE=` text for the error.
    pub fn result_message(&self) -> String {
        match self {
            Self::IoError(error) => format!("i/o error: {error}"),
            error => error.to_string(),
        }
    }
}
