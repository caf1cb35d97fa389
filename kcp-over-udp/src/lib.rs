//! `kcp-over-udp`: reliable and unreliable message channels over UDP.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────────────────┐        ┌──────────────────────┐
//!  │ Server (many conns)  │        │ Client (one session) │
//!  └──────────┬───────────┘        └──────────┬───────────┘
//!             │  route by conv                 │
//!  ┌──────────▼────────────────────────────────▼───────────┐
//!  │ Connection: lifecycle, keepalive, unreliable channel  │
//!  └──────────┬────────────────────────────────────────────┘
//!  ┌──────────▼────────────────────────────────────────────┐
//!  │ Arq: ArqSender / ArqReceiver / RttEstimator /         │
//!  │      FlowController / fragment::Reassembler           │
//!  └──────────┬────────────────────────────────────────────┘
//!             │ Segment::encode / decode
//!  ┌──────────▼───────────┐
//!  │ DatagramSocket       │  (tokio UdpSocket, or the in-memory simulator)
//!  └──────────────────────┘
//! ```
//!
//! Nothing runs in the background. The application calls `tick(now)` on its
//! [`Server`] or [`Client`] with a millisecond clock, then drains
//! [`Event`]s.
//!
//! Each module has a single responsibility:
//! - [`segment`]: wire format (serialise / deserialise)
//! - [`fragment`]: message splitting and reassembly
//! - [`sender`]: outbound queue and in-flight buffer
//! - [`receiver`]: out-of-order buffer, receive queue and pending acks
//! - [`rtt`]: RTT estimation and retransmission timeouts
//! - [`flow`]: send / remote / congestion windows
//! - [`arq`]: the per-connection ARQ engine
//! - [`state`]: finite-state-machine types
//! - [`connection`]: per-connection lifecycle
//! - [`server`]: connection multiplexer
//! - [`client`]: client session
//! - [`socket`]: datagram socket capability and tokio implementation
//! - [`simulator`]: lossy/reorder in-memory network for testing

pub mod arq;
pub mod client;
pub mod clock;
pub mod config;
pub mod connection;
pub mod error;
pub mod event;
pub mod flow;
pub mod fragment;
pub mod receiver;
pub mod rtt;
pub mod segment;
pub mod sender;
pub mod server;
pub mod simulator;
pub mod socket;
pub mod state;

pub use client::Client;
pub use config::Config;
pub use error::{Error, ErrorKind};
pub use event::{Channel, Event};
pub use segment::ConnectionId;
pub use server::Server;
pub use socket::{DatagramSocket, Socket};
