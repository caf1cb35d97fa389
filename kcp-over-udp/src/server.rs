//! Server role: many connections multiplexed over one socket.
//!
//! ```text
//!                      ┌────────────────────────────────────┐
//!   datagram ──decode──▶ Handshake from new endpoint?        │
//!                      │   yes → allocate id, Connected      │
//!                      │   no  → look up conv ──▶ Connection │
//!                      │         endpoint must match         │
//!                      └────────────────────────────────────┘
//! ```
//!
//! Everything happens inside [`Server::tick`]: drain the socket, route each
//! segment, tick every connection, then drop the closed ones and report
//! [`Event::Disconnected`] for each.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;

use rand::Rng;

use crate::config::Config;
use crate::connection::Connection;
use crate::error::Error;
use crate::event::{Channel, Event};
use crate::segment::{Command, ConnectionId, Segment};
use crate::socket::{DatagramSocket, MAX_DATAGRAM};

pub struct Server<S: DatagramSocket> {
    socket: S,
    config: Config,
    connections: HashMap<ConnectionId, Connection>,
    /// Remote endpoint → connection id, for handshakes.
    endpoints: HashMap<SocketAddr, ConnectionId>,
    events: VecDeque<Event>,
    buf: Vec<u8>,
}

impl<S: DatagramSocket> Server<S> {
    /// Serve connections on an already-bound `socket`.
    pub fn new(socket: S, config: Config) -> Result<Self, Error> {
        config.validate()?;
        if let Ok(addr) = socket.local_addr() {
            log::info!("[server] listening on {addr}");
        }
        Ok(Self {
            socket,
            config,
            connections: HashMap::new(),
            endpoints: HashMap::new(),
            events: VecDeque::new(),
            buf: vec![0u8; MAX_DATAGRAM],
        })
    }

    /// Queue `message` for connection `id`.
    pub fn send(&mut self, id: ConnectionId, message: &[u8], channel: Channel) -> Result<(), Error> {
        self.connections
            .get_mut(&id)
            .ok_or(Error::NotConnected)?
            .send(message, channel)
    }

    /// Start a graceful close of connection `id`. Unknown ids are ignored.
    pub fn disconnect(&mut self, id: ConnectionId) {
        if let Some(conn) = self.connections.get_mut(&id) {
            conn.disconnect();
        }
    }

    /// Drain the socket, advance every connection and flush due output.
    pub fn tick(&mut self, now: u32) {
        loop {
            let (n, from) = match self.socket.recv_from(&mut self.buf) {
                Ok(Some(received)) => received,
                Ok(None) => break,
                Err(e) => {
                    log::warn!("[server] receive failed: {e}");
                    break;
                }
            };
            match Segment::decode(&self.buf[..n]) {
                Ok(segment) => self.route(segment, from, now),
                Err(e) => log::debug!("[server] malformed datagram from {from}: {e}"),
            }
        }

        for conn in self.connections.values_mut() {
            conn.tick(now, &self.socket, &mut self.events);
        }

        let closed: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|(_, conn)| conn.is_closed())
            .map(|(id, _)| *id)
            .collect();
        for id in closed {
            if let Some(conn) = self.connections.remove(&id) {
                self.endpoints.remove(&conn.remote());
                log::info!("[server] id={id} ({}) removed", conn.remote());
                self.events.push_back(Event::Disconnected(id));
            }
        }
    }

    fn route(&mut self, segment: Segment, from: SocketAddr, now: u32) {
        if segment.cmd == Command::Handshake {
            if let Some(id) = self.endpoints.get(&from) {
                if let Some(conn) = self.connections.get_mut(id) {
                    conn.input(segment, now, &mut self.events);
                }
            } else if segment.conv == 0 {
                self.accept(from, now);
            } else {
                log::debug!("[server] stray handshake reply from {from}");
            }
            return;
        }

        let Some(conn) = self.connections.get_mut(&segment.conv) else {
            log::debug!("[server] datagram for unknown id={} from {from}", segment.conv);
            return;
        };
        if conn.remote() != from {
            let err = Error::SpoofedEndpoint {
                id: segment.conv,
                expected: conn.remote(),
                actual: from,
            };
            log::warn!("[server] {err}");
            self.events.push_back(Event::error(segment.conv, &err));
            return;
        }
        conn.input(segment, now, &mut self.events);
    }

    fn accept(&mut self, from: SocketAddr, now: u32) {
        let id = self.allocate_id();
        self.connections
            .insert(id, Connection::accept(id, from, &self.config, now));
        self.endpoints.insert(from, id);
        log::info!("[server] id={id} connected from {from}");
        self.events.push_back(Event::Connected(id));
    }

    /// A random non-zero id not currently in use.
    fn allocate_id(&self) -> ConnectionId {
        let mut rng = rand::rng();
        loop {
            let id: ConnectionId = rng.random();
            if id != 0 && !self.connections.contains_key(&id) {
                return id;
            }
        }
    }

    // -----------------------------------------------------------------------
    // Events and inspection
    // -----------------------------------------------------------------------

    /// Take the oldest pending event.
    pub fn poll_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    /// Take every pending event in order.
    pub fn drain_events(&mut self) -> Vec<Event> {
        self.events.drain(..).collect()
    }

    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.connections.keys().copied().collect()
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    pub fn remote_addr(&self, id: ConnectionId) -> Option<SocketAddr> {
        self.connections.get(&id).map(Connection::remote)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.socket.local_addr()?)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::simulator::{Network, SimSocket};

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, 1], port))
    }

    fn setup() -> (Network, Server<SimSocket>, SimSocket) {
        let net = Network::new(3);
        let server = Server::new(net.socket(addr(1)), Config::default()).unwrap();
        let peer = net.socket(addr(2));
        (net, server, peer)
    }

    fn send(socket: &SimSocket, segment: &Segment) {
        socket.send_to(&segment.encode(), addr(1)).unwrap();
    }

    fn recv(socket: &SimSocket) -> Vec<Segment> {
        let mut buf = [0u8; 2048];
        let mut out = Vec::new();
        while let Some((n, _)) = socket.recv_from(&mut buf).unwrap() {
            out.push(Segment::decode(&buf[..n]).unwrap());
        }
        out
    }

    #[test]
    fn handshake_allocates_non_zero_id() {
        let (_net, mut server, peer) = setup();
        send(&peer, &Segment::control(0, Command::Handshake));
        server.tick(0);

        let events = server.drain_events();
        let Some(Event::Connected(id)) = events.first().cloned() else {
            panic!("expected Connected, got {events:?}");
        };
        assert_ne!(id, 0);
        assert_eq!(server.remote_addr(id), Some(addr(2)));

        let reply = recv(&peer);
        assert_eq!(reply[0].cmd, Command::Handshake);
        assert_eq!(reply[0].conv, id);
    }

    #[test]
    fn repeated_handshake_resends_reply_without_new_connection() {
        let (_net, mut server, peer) = setup();
        send(&peer, &Segment::control(0, Command::Handshake));
        server.tick(0);
        recv(&peer);
        send(&peer, &Segment::control(0, Command::Handshake));
        server.tick(10);
        assert_eq!(server.connection_count(), 1);
        assert_eq!(server.drain_events().len(), 1);
        assert!(recv(&peer).iter().any(|s| s.cmd == Command::Handshake));
    }

    #[test]
    fn unknown_id_and_garbage_are_dropped() {
        let (_net, mut server, peer) = setup();
        send(&peer, &Segment::control(1234, Command::Push));
        peer.send_to(&[1, 2, 3], addr(1)).unwrap();
        server.tick(0);
        assert_eq!(server.connection_count(), 0);
        assert!(server.poll_event().is_none());
    }

    #[test]
    fn spoofed_endpoint_is_reported_and_ignored() {
        let (net, mut server, peer) = setup();
        send(&peer, &Segment::control(0, Command::Handshake));
        server.tick(0);
        let Some(Event::Connected(id)) = server.poll_event() else {
            panic!("no connection");
        };

        let intruder = net.socket(addr(3));
        let mut fake = Segment::control(id, Command::Disconnect);
        fake.wnd = 128;
        send(&intruder, &fake);
        server.tick(10);

        match server.poll_event() {
            Some(Event::Error { id: got, kind, .. }) => {
                assert_eq!(got, id);
                assert_eq!(kind, ErrorKind::SpoofedEndpoint);
            }
            other => panic!("expected spoofing error, got {other:?}"),
        }
        assert_eq!(server.connection_count(), 1);
        assert_eq!(
            server.connection(id).map(Connection::state),
            Some(crate::state::ConnectionState::Established)
        );
    }

    #[test]
    fn send_to_unknown_id_fails() {
        let (_net, mut server, _peer) = setup();
        assert!(matches!(
            server.send(99, b"hi", Channel::Reliable),
            Err(Error::NotConnected)
        ));
    }

    #[test]
    fn idle_connection_is_removed_once() {
        let (_net, mut server, peer) = setup();
        send(&peer, &Segment::control(0, Command::Handshake));
        server.tick(0);
        let id = server.connection_ids()[0];
        server.drain_events();

        let timeout = server.config().timeout;
        server.tick(timeout);
        server.tick(timeout + 10);
        assert_eq!(server.drain_events(), vec![Event::Disconnected(id)]);
        assert_eq!(server.connection_count(), 0);
        assert_eq!(server.remote_addr(id), None);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let net = Network::new(0);
        let config = Config::default().with_windows(0, 128);
        assert!(matches!(
            Server::new(net.socket(addr(1)), config),
            Err(Error::InvalidConfig(_))
        ));
    }
}
