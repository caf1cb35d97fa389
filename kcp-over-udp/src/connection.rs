//! Per-connection lifecycle manager.
//!
//! A [`Connection`] owns the complete state for one logical session with one
//! remote endpoint. Its responsibilities are:
//! - Driving the finite-state machine (see [`crate::state`]).
//! - Feeding inbound segments to the [`Arq`] engine and surfacing complete
//!   messages as [`Event::Data`].
//! - Carrying the unreliable channel, which bypasses the ARQ engine.
//! - Handshake resends, keepalive pings, idle timeout, dead-link and
//!   congestion teardown, and the graceful disconnect sequence.
//!
//! A connection never owns a socket; the server or client lends one to
//! [`Connection::tick`]. It also never emits [`Event::Disconnected`]: the
//! owner does that, exactly once, when it drops a closed connection.

use std::collections::VecDeque;
use std::net::SocketAddr;

use crate::arq::Arq;
use crate::clock;
use crate::config::{Config, DISCONNECT_REDUNDANCY, HANDSHAKE_INTERVAL, PING_INTERVAL};
use crate::error::Error;
use crate::event::{Channel, Event};
use crate::segment::{Command, ConnectionId, Segment};
use crate::socket::DatagramSocket;
use crate::state::ConnectionState;

/// One reliable/unreliable session with a remote endpoint.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    remote: SocketAddr,
    state: ConnectionState,
    arq: Arq,

    timeout: u32,
    reliable_ping: bool,
    unreliable_max: usize,
    disconnect_flush_ticks: u32,
    queue_disconnect_threshold: usize,

    /// Unreliable payloads waiting for the next tick.
    unreliable: Vec<Vec<u8>>,

    /// When the handshake started (client) or the connection was accepted.
    opened_at: u32,
    last_receive: u32,
    last_ping: u32,
    /// Last `Handshake` sent while connecting.
    last_handshake: Option<u32>,
    /// The server owes a (repeated) handshake reply.
    handshake_reply_due: bool,
    /// Ticks spent in `Disconnecting`.
    disconnect_ticks: u32,
    /// The peer sent `Disconnect`.
    remote_closed: bool,

    /// Scratch buffer for encoding.
    scratch: Vec<u8>,
}

impl Connection {
    fn new(id: ConnectionId, remote: SocketAddr, config: &Config, now: u32) -> Self {
        Self {
            id,
            remote,
            state: ConnectionState::Connecting,
            arq: Arq::new(id, config),
            timeout: config.timeout,
            reliable_ping: config.reliable_ping,
            unreliable_max: config.unreliable_max_message_size(),
            disconnect_flush_ticks: config.disconnect_flush_ticks,
            queue_disconnect_threshold: config.queue_disconnect_threshold,
            unreliable: Vec::new(),
            opened_at: now,
            last_receive: now,
            last_ping: now,
            last_handshake: None,
            handshake_reply_due: false,
            disconnect_ticks: 0,
            remote_closed: false,
            scratch: Vec::with_capacity(config.mtu),
        }
    }

    /// Active open: the client side, waiting for the server to assign an id.
    pub fn connect(remote: SocketAddr, config: &Config, now: u32) -> Self {
        Self::new(0, remote, config, now)
    }

    /// Passive open: the server accepted a handshake and assigned `id`.
    ///
    /// The handshake reply goes out on the next tick.
    pub fn accept(id: ConnectionId, remote: SocketAddr, config: &Config, now: u32) -> Self {
        let mut conn = Self::new(id, remote, config, now);
        conn.state = ConnectionState::Established;
        conn.handshake_reply_due = true;
        conn
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == ConnectionState::Closed
    }

    pub fn arq(&self) -> &Arq {
        &self.arq
    }

    // -----------------------------------------------------------------------
    // Application side
    // -----------------------------------------------------------------------

    /// Queue a message. Nothing touches the socket until the next tick.
    pub fn send(&mut self, message: &[u8], channel: Channel) -> Result<(), Error> {
        if !self.state.accepts_sends() {
            return Err(Error::NotConnected);
        }
        if message.is_empty() {
            return Err(Error::EmptyMessage);
        }
        match channel {
            Channel::Reliable => self.arq.send(message),
            Channel::Unreliable => {
                if message.len() > self.unreliable_max {
                    return Err(Error::MessageTooLarge {
                        channel,
                        len: message.len(),
                        max: self.unreliable_max,
                    });
                }
                self.unreliable.push(message.to_vec());
                Ok(())
            }
        }
    }

    /// Begin a graceful close.
    ///
    /// Queued reliable data keeps flowing for a few ticks, then the peer is
    /// told with a burst of `Disconnect` segments.
    pub fn disconnect(&mut self) {
        match self.state {
            ConnectionState::Connecting => {
                log::info!("[conn] {} handshake abandoned", self.remote);
                self.state = ConnectionState::Closed;
            }
            ConnectionState::Established => {
                log::info!("[conn] id={} disconnecting", self.id);
                self.state = ConnectionState::Disconnecting;
                self.disconnect_ticks = 0;
            }
            ConnectionState::Disconnecting | ConnectionState::Closed => {}
        }
    }

    // -----------------------------------------------------------------------
    // Network side
    // -----------------------------------------------------------------------

    /// Process one segment that the owner routed to this connection.
    pub fn input(&mut self, mut segment: Segment, now: u32, events: &mut VecDeque<Event>) {
        match (self.state, segment.cmd) {
            (ConnectionState::Closed, _) => return,
            (ConnectionState::Connecting, Command::Handshake) => {
                if segment.conv == 0 {
                    log::debug!("[conn] {} handshake reply without id", self.remote);
                    return;
                }
                self.id = segment.conv;
                self.arq.set_conv(segment.conv);
                self.state = ConnectionState::Established;
                self.last_receive = now;
                self.last_ping = now;
                log::info!("[conn] id={} connected to {}", self.id, self.remote);
                events.push_back(Event::Connected(self.id));
                return;
            }
            // Nothing but the handshake reply means anything yet.
            (ConnectionState::Connecting, _) => return,
            (_, Command::Handshake) => {
                // A client that missed our reply retries with id 0. Replies
                // (non-zero id) arriving at an established client are stale.
                if segment.conv == 0 {
                    self.handshake_reply_due = true;
                }
                self.last_receive = now;
                return;
            }
            _ => {}
        }

        self.last_receive = now;
        match segment.cmd {
            Command::Disconnect => {
                if !self.remote_closed {
                    log::info!("[conn] id={} peer disconnected", self.id);
                }
                self.remote_closed = true;
                self.state = ConnectionState::Disconnecting;
            }
            Command::Unreliable => {
                let message = std::mem::take(&mut segment.payload);
                self.arq.input(segment, now);
                if !message.is_empty() {
                    events.push_back(Event::Data {
                        id: self.id,
                        message,
                        channel: Channel::Unreliable,
                    });
                }
            }
            _ => {
                self.arq.input(segment, now);
                while let Some(message) = self.arq.recv() {
                    events.push_back(Event::Data {
                        id: self.id,
                        message,
                        channel: Channel::Reliable,
                    });
                }
            }
        }
    }

    /// Advance timers and write every due segment to `socket`.
    pub fn tick<S: DatagramSocket>(&mut self, now: u32, socket: &S, events: &mut VecDeque<Event>) {
        match self.state {
            ConnectionState::Connecting => self.tick_connecting(now, socket),
            ConnectionState::Established => self.tick_established(now, socket, events),
            ConnectionState::Disconnecting => self.tick_disconnecting(now, socket, events),
            ConnectionState::Closed => {}
        }
    }

    fn tick_connecting<S: DatagramSocket>(&mut self, now: u32, socket: &S) {
        if clock::diff(now, self.opened_at) >= self.timeout as i32 {
            log::warn!(
                "[conn] {} no handshake reply after {}ms",
                self.remote,
                self.timeout
            );
            self.state = ConnectionState::Closed;
            return;
        }
        let due = self
            .last_handshake
            .map_or(true, |at| clock::diff(now, at) >= HANDSHAKE_INTERVAL as i32);
        if due {
            self.last_handshake = Some(now);
            self.transmit(socket, &Segment::control(0, Command::Handshake));
        }
    }

    fn tick_established<S: DatagramSocket>(
        &mut self,
        now: u32,
        socket: &S,
        events: &mut VecDeque<Event>,
    ) {
        let idle = clock::diff(now, self.last_receive);
        if idle >= self.timeout as i32 {
            let err = Error::Timeout {
                idle_ms: idle as u32,
            };
            log::info!("[conn] id={} closing: {err}", self.id);
            self.state = ConnectionState::Closed;
            return;
        }

        let queued = self.arq.total_queued();
        if queued > self.queue_disconnect_threshold {
            self.fail(Error::Congestion { queued }, events);
            return;
        }

        if self.handshake_reply_due {
            self.handshake_reply_due = false;
            let reply = self.arq.control_now(Command::Handshake);
            self.transmit(socket, &reply);
        }

        if clock::diff(now, self.last_ping) >= PING_INTERVAL as i32 {
            self.last_ping = now;
            if self.reliable_ping {
                self.arq.send_ping();
            } else {
                let ping = self.arq.control_now(Command::WindowProbeAck);
                self.transmit(socket, &ping);
            }
        }

        self.flush_unreliable(socket);
        self.arq.update(now);
        self.flush_arq(socket);

        if let Some(dead) = self.arq.dead_link() {
            self.fail(
                Error::DeadLink {
                    sn: dead.sn,
                    retransmits: dead.retransmits,
                },
                events,
            );
        }
    }

    fn tick_disconnecting<S: DatagramSocket>(
        &mut self,
        now: u32,
        socket: &S,
        events: &mut VecDeque<Event>,
    ) {
        if self.remote_closed {
            // Let the peer see our acks for whatever it sent last.
            self.arq.flush_at(now);
            self.flush_arq(socket);
            self.state = ConnectionState::Closed;
            return;
        }

        self.flush_unreliable(socket);
        self.arq.update(now);
        self.flush_arq(socket);
        self.disconnect_ticks += 1;

        if let Some(dead) = self.arq.dead_link() {
            self.fail(
                Error::DeadLink {
                    sn: dead.sn,
                    retransmits: dead.retransmits,
                },
                events,
            );
            return;
        }

        if self.arq.is_drained() || self.disconnect_ticks >= self.disconnect_flush_ticks {
            if !self.arq.is_drained() {
                log::debug!(
                    "[conn] id={} closing with {} segment(s) unsent",
                    self.id,
                    self.arq.waiting_to_send()
                );
            }
            let bye = self.arq.control_now(Command::Disconnect);
            for _ in 0..DISCONNECT_REDUNDANCY {
                self.transmit(socket, &bye);
            }
            self.state = ConnectionState::Closed;
        }
    }

    /// Close because of a connection-fatal error, reporting it once.
    fn fail(&mut self, err: Error, events: &mut VecDeque<Event>) {
        log::warn!("[conn] id={} closing: {err}", self.id);
        events.push_back(Event::error(self.id, &err));
        self.state = ConnectionState::Closed;
    }

    fn flush_unreliable<S: DatagramSocket>(&mut self, socket: &S) {
        for payload in std::mem::take(&mut self.unreliable) {
            let segment = Segment {
                payload,
                ..self.arq.control_now(Command::Unreliable)
            };
            self.transmit(socket, &segment);
        }
    }

    fn flush_arq<S: DatagramSocket>(&mut self, socket: &S) {
        let segments: Vec<Segment> = self.arq.drain_outbox().collect();
        for segment in &segments {
            self.transmit(socket, segment);
        }
    }

    fn transmit<S: DatagramSocket>(&mut self, socket: &S, segment: &Segment) {
        self.scratch.clear();
        segment.encode_into(&mut self.scratch);
        if let Err(e) = socket.send_to(&self.scratch, self.remote) {
            log::warn!("[conn] send to {} failed: {e}", self.remote);
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
