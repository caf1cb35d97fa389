//! The segment codec.
//!
//! A datagram holds one [`Segment`]: a fixed 24-byte header followed by the
//! payload the header announces. [`Segment::encode_into`] appends that layout
//! to a caller-owned buffer and [`Segment::decode`] reads it back, returning a
//! [`DecodeError`] for anything that does not parse. Sockets and timers never
//! appear here.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                         Connection Id                         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |    Command    |  Frag Count   |          Window Size          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                           Timestamp                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Sequence Number                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                     Unacknowledged Number                     |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Payload Length                         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Payload ...                            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Total header size: [`HEADER_LEN`] = 24 bytes.
//! conv(4) + cmd(1) + frg(1) + wnd(2) + ts(4) + sn(4) + una(4) + len(4)

use thiserror::Error;

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 24;

// Byte offsets of each field within the serialised header.
const OFF_CONV: usize = 0;
const OFF_CMD: usize = 4;
const OFF_FRG: usize = 5;
const OFF_WND: usize = 6;
const OFF_TS: usize = 8;
const OFF_SN: usize = 12;
const OFF_UNA: usize = 16;
const OFF_LEN: usize = 20;

/// Identifies one logical connection multiplexed over a socket.
pub type ConnectionId = u32;

/// What a segment asks the receiver to do.
///
/// The byte values follow the classic KCP numbering so captures stay
/// readable next to other KCP tooling; the last three are protocol
/// extensions for connection management and best-effort delivery.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Reliable data (one fragment of a message).
    Push = 81,
    /// Acknowledges one `Push` by sequence number, echoing its timestamp.
    Ack = 82,
    /// Asks the peer to report its receive window.
    WindowProbe = 83,
    /// Reports the sender's receive window (answer to `WindowProbe`, also
    /// used as the unreliable keepalive).
    WindowProbeAck = 84,
    /// Opens a connection (client → server with id 0) or confirms it
    /// (server → client carrying the allocated id).
    Handshake = 85,
    /// Tears the connection down.
    Disconnect = 86,
    /// Best-effort single-segment message; never retransmitted.
    Unreliable = 87,
}

impl Command {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            81 => Command::Push,
            82 => Command::Ack,
            83 => Command::WindowProbe,
            84 => Command::WindowProbeAck,
            85 => Command::Handshake,
            86 => Command::Disconnect,
            87 => Command::Unreliable,
            _ => return None,
        })
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// A complete protocol segment: header fields + payload bytes.
///
/// `payload_length` is not stored; it is always `payload.len()` and is
/// written by [`Segment::encode`] / validated by [`Segment::decode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Connection (conversation) this segment belongs to.
    pub conv: ConnectionId,
    pub cmd: Command,
    /// Fragments remaining after this one in the same message (0 = last).
    pub frg: u8,
    /// Sender's advertised free receive window, in segments.
    pub wnd: u16,
    /// Sender's clock when this segment was (re)transmitted, or the echoed
    /// timestamp for an `Ack`.
    pub ts: u32,
    pub sn: u32,
    /// Next sequence number the sender expects from us.
    pub una: u32,
    pub payload: Vec<u8>,
}

impl Segment {
    /// A payload-less segment carrying only header information.
    pub fn control(conv: ConnectionId, cmd: Command) -> Self {
        Self {
            conv,
            cmd,
            frg: 0,
            wnd: 0,
            ts: 0,
            sn: 0,
            una: 0,
            payload: Vec::new(),
        }
    }

    /// Length of this segment once encoded.
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    /// Serialise this segment into a newly allocated byte vector.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf
    }

    /// Append the encoded segment to `buf`.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        let start = buf.len();
        buf.resize(start + HEADER_LEN, 0);
        let header = &mut buf[start..];

        header[OFF_CONV..OFF_CONV + 4].copy_from_slice(&self.conv.to_be_bytes());
        header[OFF_CMD] = self.cmd.to_u8();
        header[OFF_FRG] = self.frg;
        header[OFF_WND..OFF_WND + 2].copy_from_slice(&self.wnd.to_be_bytes());
        header[OFF_TS..OFF_TS + 4].copy_from_slice(&self.ts.to_be_bytes());
        header[OFF_SN..OFF_SN + 4].copy_from_slice(&self.sn.to_be_bytes());
        header[OFF_UNA..OFF_UNA + 4].copy_from_slice(&self.una.to_be_bytes());
        header[OFF_LEN..OFF_LEN + 4]
            .copy_from_slice(&(self.payload.len() as u32).to_be_bytes());

        buf.extend_from_slice(&self.payload);
    }

    /// Parse a [`Segment`] from one received datagram.
    ///
    /// Returns [`Err`] if:
    /// - `buf` is shorter than [`HEADER_LEN`],
    /// - the payload length field disagrees with the remaining bytes, or
    /// - the command byte is not a known [`Command`].
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        if buf.len() < HEADER_LEN {
            return Err(DecodeError::BufferTooShort { len: buf.len() });
        }

        let cmd =
            Command::from_u8(buf[OFF_CMD]).ok_or(DecodeError::UnknownCommand(buf[OFF_CMD]))?;
        let payload_len = read_u32(buf, OFF_LEN) as usize;
        let remaining = buf.len() - HEADER_LEN;
        if payload_len != remaining {
            return Err(DecodeError::LengthMismatch {
                declared: payload_len,
                remaining,
            });
        }

        Ok(Segment {
            conv: read_u32(buf, OFF_CONV),
            cmd,
            frg: buf[OFF_FRG],
            wnd: u16::from_be_bytes([buf[OFF_WND], buf[OFF_WND + 1]]),
            ts: read_u32(buf, OFF_TS),
            sn: read_u32(buf, OFF_SN),
            una: read_u32(buf, OFF_UNA),
            payload: buf[HEADER_LEN..].to_vec(),
        })
    }
}

#[inline]
fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_be_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

/// Errors that can arise when parsing a raw datagram.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("buffer of {len} bytes is too short to contain a header")]
    BufferTooShort { len: usize },
    #[error("payload length field says {declared} bytes but {remaining} remain")]
    LengthMismatch { declared: usize, remaining: usize },
    #[error("unknown command byte {0}")]
    UnknownCommand(u8),
}
