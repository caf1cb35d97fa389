//! Values emitted by [`crate::server::Server::tick`] and
//! [`crate::client::Client::tick`] and drained by the application.

use std::fmt;

use crate::error::ErrorKind;
use crate::segment::ConnectionId;

/// Delivery mode of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Ordered, retransmitted, may span many segments.
    Reliable,
    /// Best effort, single segment, no ordering guarantee.
    Unreliable,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The handshake completed.
    Connected(ConnectionId),
    /// One complete message arrived.
    Data {
        id: ConnectionId,
        message: Vec<u8>,
        channel: Channel,
    },
    /// The connection is gone. Emitted exactly once per connection.
    Disconnected(ConnectionId),
    Error {
        id: ConnectionId,
        kind: ErrorKind,
        reason: String,
    },
}

impl Event {
    pub(crate) fn error(id: ConnectionId, err: &crate::error::Error) -> Self {
        Event::Error {
            id,
            kind: err.kind(),
            reason: err.to_string(),
        }
    }

    /// Connection the event refers to.
    pub fn connection_id(&self) -> ConnectionId {
        match self {
            Event::Connected(id) | Event::Disconnected(id) => *id,
            Event::Data { id, .. } | Event::Error { id, .. } => *id,
        }
    }
}
