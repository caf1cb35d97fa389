//! In-memory network simulator for deterministic testing.
//!
//! Real networks drop, reorder, and duplicate packets. To exercise the
//! reliability mechanisms without depending on actual network conditions,
//! [`Network`] routes datagrams between [`SimSocket`]s through a shared
//! in-memory switch and applies a configurable fault model:
//!
//! | Fault            | Description                                      |
//! |------------------|--------------------------------------------------|
//! | Packet loss      | Drop a datagram with probability `loss_rate`.    |
//! | Periodic loss    | Drop every `drop_every`-th datagram.             |
//! | Reordering       | Insert a datagram at a random queue position     |
//! |                  | with probability `reorder_rate`.                 |
//! | Duplication      | Deliver a datagram twice (`duplicate_rate`).     |
//! | Partition        | Drop everything to or from a blocked address.    |
//!
//! Randomness comes from a seeded [`StdRng`], so a failing run replays
//! exactly with the same seed.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::socket::DatagramSocket;

/// Configuration for the fault-injection model.
///
/// All probabilities are in the range `[0.0, 1.0]`.
#[derive(Debug, Clone, Default)]
pub struct SimulatorConfig {
    /// Probability that any given datagram is silently dropped.
    pub loss_rate: f64,
    /// Drop every n-th datagram sent on the network (`None` = never).
    pub drop_every: Option<u64>,
    /// Probability that a datagram is delivered out of order.
    pub reorder_rate: f64,
    /// Probability that a datagram is delivered twice.
    pub duplicate_rate: f64,
}

/// Counters for what the network did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkStats {
    pub sent: u64,
    pub dropped: u64,
    pub duplicated: u64,
    pub reordered: u64,
}

#[derive(Debug)]
struct Switch {
    config: SimulatorConfig,
    rng: StdRng,
    inboxes: HashMap<SocketAddr, VecDeque<(Vec<u8>, SocketAddr)>>,
    blocked: HashSet<SocketAddr>,
    stats: NetworkStats,
}

impl Switch {
    fn route(&mut self, datagram: &[u8], from: SocketAddr, to: SocketAddr) {
        self.stats.sent += 1;
        let periodic = self
            .config
            .drop_every
            .is_some_and(|n| n > 0 && self.stats.sent % n == 0);
        if periodic
            || self.blocked.contains(&from)
            || self.blocked.contains(&to)
            || self.roll(self.config.loss_rate)
        {
            self.stats.dropped += 1;
            return;
        }

        let copies = if self.roll(self.config.duplicate_rate) {
            self.stats.duplicated += 1;
            2
        } else {
            1
        };
        for _ in 0..copies {
            let reorder = self.roll(self.config.reorder_rate);
            // Unknown destinations swallow the datagram, like UDP.
            let Some(inbox) = self.inboxes.get_mut(&to) else {
                return;
            };
            let entry = (datagram.to_vec(), from);
            if reorder && !inbox.is_empty() {
                let at = self.rng.random_range(0..inbox.len());
                inbox.insert(at, entry);
                self.stats.reordered += 1;
            } else {
                inbox.push_back(entry);
            }
        }
    }

    fn roll(&mut self, probability: f64) -> bool {
        probability > 0.0 && self.rng.random_bool(probability.min(1.0))
    }
}

/// A shared in-memory datagram network.
///
/// Cloning gives another handle to the same network.
#[derive(Debug, Clone)]
pub struct Network {
    inner: Arc<Mutex<Switch>>,
}

impl Network {
    /// A fault-free network.
    pub fn new(seed: u64) -> Self {
        Self::with_faults(seed, SimulatorConfig::default())
    }

    pub fn with_faults(seed: u64, config: SimulatorConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Switch {
                config,
                rng: StdRng::seed_from_u64(seed),
                inboxes: HashMap::new(),
                blocked: HashSet::new(),
                stats: NetworkStats::default(),
            })),
        }
    }

    /// Attach a socket at `addr`.
    pub fn socket(&self, addr: SocketAddr) -> SimSocket {
        self.lock().inboxes.entry(addr).or_default();
        SimSocket {
            addr,
            network: self.clone(),
        }
    }

    /// Replace the fault model from now on.
    pub fn set_faults(&self, config: SimulatorConfig) {
        self.lock().config = config;
    }

    /// Drop (or stop dropping) all traffic to and from `addr`.
    pub fn set_blocked(&self, addr: SocketAddr, blocked: bool) {
        let mut switch = self.lock();
        if blocked {
            switch.blocked.insert(addr);
        } else {
            switch.blocked.remove(&addr);
        }
    }

    pub fn stats(&self) -> NetworkStats {
        self.lock().stats
    }

    fn lock(&self) -> MutexGuard<'_, Switch> {
        // The switch holds no invariants a panicking test could break.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One endpoint on a [`Network`].
#[derive(Debug, Clone)]
pub struct SimSocket {
    addr: SocketAddr,
    network: Network,
}

impl DatagramSocket for SimSocket {
    fn send_to(&self, datagram: &[u8], target: SocketAddr) -> io::Result<()> {
        self.network.lock().route(datagram, self.addr, target);
        Ok(())
    }

    fn recv_from(&self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        let mut switch = self.network.lock();
        let Some((datagram, from)) = switch
            .inboxes
            .get_mut(&self.addr)
            .and_then(VecDeque::pop_front)
        else {
            return Ok(None);
        };
        // Oversized datagrams are truncated, as with a real socket.
        let n = datagram.len().min(buf.len());
        buf[..n].copy_from_slice(&datagram[..n]);
        Ok(Some((n, from)))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.addr)
    }
}
