//! Error taxonomy shared by every layer.
//!
//! [`Error`] is what synchronous calls return and what connection-fatal
//! conditions are built from before they are surfaced as
//! [`crate::event::Event::Error`]. Events carry the flattened [`ErrorKind`]
//! plus a human-readable reason so they stay `Clone + Eq`.

use std::fmt;
use std::net::SocketAddr;

use thiserror::Error;

use crate::event::Channel;
use crate::segment::{ConnectionId, DecodeError};

#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed segment: {0}")]
    MalformedSegment(#[from] DecodeError),
    #[error("dead link: segment {sn} unacknowledged after {retransmits} retransmits")]
    DeadLink { sn: u32, retransmits: u32 },
    #[error("no traffic for {idle_ms}ms")]
    Timeout { idle_ms: u32 },
    #[error("{channel} message of {len} bytes exceeds the {max} byte limit")]
    MessageTooLarge {
        channel: Channel,
        len: usize,
        max: usize,
    },
    #[error("tried to send an empty message")]
    EmptyMessage,
    #[error("not connected")]
    NotConnected,
    #[error("datagram for connection {id} came from {actual}, expected {expected}")]
    SpoofedEndpoint {
        id: ConnectionId,
        expected: SocketAddr,
        actual: SocketAddr,
    },
    #[error("{queued} segments queued, peer is not keeping up")]
    Congestion { queued: usize },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("socket error: {0}")]
    Socket(#[from] std::io::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::MalformedSegment(_) => ErrorKind::MalformedSegment,
            Error::DeadLink { .. } => ErrorKind::DeadLink,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::MessageTooLarge { .. } => ErrorKind::MessageTooLarge,
            Error::EmptyMessage => ErrorKind::InvalidSend,
            Error::NotConnected => ErrorKind::NotConnected,
            Error::SpoofedEndpoint { .. } => ErrorKind::SpoofedEndpoint,
            Error::Congestion { .. } => ErrorKind::Congestion,
            Error::InvalidConfig(_) => ErrorKind::InvalidConfig,
            Error::Socket(_) => ErrorKind::Socket,
        }
    }
}

/// Flat classification of [`Error`], as reported in events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    MalformedSegment,
    DeadLink,
    Timeout,
    MessageTooLarge,
    InvalidSend,
    NotConnected,
    SpoofedEndpoint,
    Congestion,
    InvalidConfig,
    Socket,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_errors_convert_to_malformed_segment() {
        let err: Error = DecodeError::UnknownCommand(3).into();
        assert_eq!(err.kind(), ErrorKind::MalformedSegment);
        assert_eq!(err.to_string(), "malformed segment: unknown command byte 3");
    }

    #[test]
    fn idle_timeout_reports_its_duration() {
        let err = Error::Timeout { idle_ms: 2_000 };
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(err.to_string(), "no traffic for 2000ms");
    }

    #[test]
    fn message_too_large_names_the_channel() {
        let err = Error::MessageTooLarge {
            channel: Channel::Unreliable,
            len: 2000,
            max: 1176,
        };
        assert_eq!(err.kind(), ErrorKind::MessageTooLarge);
        assert_eq!(
            err.to_string(),
            "Unreliable message of 2000 bytes exceeds the 1176 byte limit"
        );
    }

    #[test]
    fn empty_message_is_an_invalid_send() {
        assert_eq!(Error::EmptyMessage.kind(), ErrorKind::InvalidSend);
    }
}
