//! Client role: one session with one server.

use std::collections::VecDeque;
use std::net::SocketAddr;

use crate::config::Config;
use crate::connection::Connection;
use crate::error::Error;
use crate::event::{Channel, Event};
use crate::segment::{Command, ConnectionId, Segment};
use crate::socket::{DatagramSocket, MAX_DATAGRAM};
use crate::state::ConnectionState;

pub struct Client<S: DatagramSocket> {
    socket: S,
    remote: SocketAddr,
    /// `None` once the session is over and `Disconnected` was reported.
    connection: Option<Connection>,
    events: VecDeque<Event>,
    buf: Vec<u8>,
}

impl<S: DatagramSocket> Client<S> {
    /// Start a handshake with `remote`. Progress happens in [`Client::tick`].
    pub fn connect(socket: S, remote: SocketAddr, config: Config, now: u32) -> Result<Self, Error> {
        config.validate()?;
        log::info!("[client] connecting to {remote}");
        Ok(Self {
            socket,
            remote,
            connection: Some(Connection::connect(remote, &config, now)),
            events: VecDeque::new(),
            buf: vec![0u8; MAX_DATAGRAM],
        })
    }

    pub fn send(&mut self, message: &[u8], channel: Channel) -> Result<(), Error> {
        self.connection
            .as_mut()
            .ok_or(Error::NotConnected)?
            .send(message, channel)
    }

    pub fn disconnect(&mut self) {
        if let Some(conn) = self.connection.as_mut() {
            conn.disconnect();
        }
    }

    /// `true` once the handshake completed and until the session ends.
    pub fn connected(&self) -> bool {
        self.state() == Some(ConnectionState::Established)
    }

    pub fn state(&self) -> Option<ConnectionState> {
        self.connection.as_ref().map(Connection::state)
    }

    /// Server-assigned id, once connected.
    pub fn id(&self) -> Option<ConnectionId> {
        self.connection
            .as_ref()
            .map(Connection::id)
            .filter(|id| *id != 0)
    }

    pub fn connection(&self) -> Option<&Connection> {
        self.connection.as_ref()
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.socket.local_addr()?)
    }

    /// Drain the socket, advance the session and flush due output.
    pub fn tick(&mut self, now: u32) {
        let Some(conn) = self.connection.as_mut() else {
            return;
        };

        loop {
            let (n, from) = match self.socket.recv_from(&mut self.buf) {
                Ok(Some(received)) => received,
                Ok(None) => break,
                Err(e) => {
                    log::warn!("[client] receive failed: {e}");
                    break;
                }
            };
            if from != self.remote {
                log::debug!("[client] ignoring datagram from {from}");
                continue;
            }
            let segment = match Segment::decode(&self.buf[..n]) {
                Ok(segment) => segment,
                Err(e) => {
                    log::debug!("[client] malformed datagram: {e}");
                    continue;
                }
            };
            // Before the handshake completes our id is 0 and only the reply
            // (which carries the new id) is meaningful.
            if segment.cmd != Command::Handshake && segment.conv != conn.id() {
                log::debug!("[client] datagram for id={} ignored", segment.conv);
                continue;
            }
            conn.input(segment, now, &mut self.events);
        }

        conn.tick(now, &self.socket, &mut self.events);

        if conn.is_closed() {
            let id = conn.id();
            log::info!("[client] session id={id} with {} ended", self.remote);
            self.connection = None;
            self.events.push_back(Event::Disconnected(id));
        }
    }

    /// Take the oldest pending event.
    pub fn poll_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    /// Take every pending event in order.
    pub fn drain_events(&mut self) -> Vec<Event> {
        self.events.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::{Network, SimSocket};

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, 1], port))
    }

    fn client(net: &Network, config: Config) -> Client<SimSocket> {
        Client::connect(net.socket(addr(2)), addr(1), config, 0).unwrap()
    }

    #[test]
    fn send_before_handshake_is_rejected() {
        let net = Network::new(1);
        let mut c = client(&net, Config::default());
        assert!(!c.connected());
        assert_eq!(c.id(), None);
        assert!(matches!(
            c.send(b"early", Channel::Reliable),
            Err(Error::NotConnected)
        ));
    }

    #[test]
    fn reply_from_other_endpoint_is_ignored() {
        let net = Network::new(1);
        let mut c = client(&net, Config::default());
        let impostor = net.socket(addr(9));
        impostor
            .send_to(&Segment::control(5, Command::Handshake).encode(), addr(2))
            .unwrap();
        c.tick(0);
        assert!(!c.connected());
        assert!(c.poll_event().is_none());
    }

    #[test]
    fn handshake_timeout_reports_disconnected_once() {
        let net = Network::new(1);
        let mut c = client(&net, Config::default().with_timeout(300));
        let mut now = 0;
        while now <= 400 {
            c.tick(now);
            now += 10;
        }
        assert_eq!(c.drain_events(), vec![Event::Disconnected(0)]);
        assert!(c.state().is_none());
        assert!(matches!(
            c.send(b"late", Channel::Reliable),
            Err(Error::NotConnected)
        ));
    }
}
