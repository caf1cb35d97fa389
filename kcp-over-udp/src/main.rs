//! Entry point for `kcp-over-udp`.
//!
//! Parses CLI arguments and dispatches into **server** (echo), **client** or
//! **demo** mode. All protocol work is delegated to library modules;
//! `main.rs` owns only process setup (logging, signal handling, argument
//! parsing) and the tick loop.

use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use tokio::time::{interval, MissedTickBehavior};

use kcp_over_udp::clock::Clock;
use kcp_over_udp::socket::{self, Socket};
use kcp_over_udp::{Channel, Client, Config, Event, Server};

/// Reliable and unreliable messaging over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(flatten)]
    tuning: Tuning,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Echo every message back to its sender.
    Server {
        #[arg(short, long, default_value_t = 7777)]
        port: u16,
    },
    /// Connect, send messages and print the replies.
    Client {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(short, long, default_value_t = 7777)]
        port: u16,
        /// Message to send (repeated `count` times).
        #[arg(short, long, default_value = "hello")]
        message: String,
        #[arg(short, long, default_value_t = 1)]
        count: usize,
        /// Use the unreliable channel.
        #[arg(long)]
        unreliable: bool,
    },
    /// Run a server and a client in one process over loopback.
    Demo,
}

/// Protocol tuning shared by every mode.
#[derive(Args)]
struct Tuning {
    /// Flush interval in milliseconds.
    #[arg(long, default_value_t = 10, global = true)]
    interval: u32,
    /// Idle timeout in milliseconds.
    #[arg(long, default_value_t = 10_000, global = true)]
    timeout: u32,
    /// Use the normal (backoff) RTO policy instead of no-delay.
    #[arg(long, global = true)]
    normal_mode: bool,
    /// Enable congestion control.
    #[arg(long, global = true)]
    congestion: bool,
    /// Send keepalives over the reliable channel.
    #[arg(long, global = true)]
    reliable_ping: bool,
    /// Bind the server to IPv4 only.
    #[arg(long, global = true)]
    ipv4_only: bool,
    #[arg(long, default_value_t = 32, global = true)]
    send_window: u16,
    #[arg(long, default_value_t = 128, global = true)]
    receive_window: u16,
}

impl Tuning {
    fn config(&self) -> Config {
        Config::default()
            .with_interval(self.interval)
            .with_timeout(self.timeout)
            .with_no_delay(!self.normal_mode)
            .with_congestion_window(self.congestion)
            .with_reliable_ping(self.reliable_ping)
            .with_dual_mode(!self.ipv4_only)
            .with_windows(self.send_window, self.receive_window)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();
    let config = cli.tuning.config();
    config.validate()?;

    match cli.mode {
        Mode::Server { port } => run_server(port, config).await,
        Mode::Client {
            host,
            port,
            message,
            count,
            unreliable,
        } => {
            let channel = if unreliable {
                Channel::Unreliable
            } else {
                Channel::Reliable
            };
            run_client(&host, port, message.into_bytes(), count, channel, config).await
        }
        Mode::Demo => run_demo(config).await,
    }
}

async fn run_server(port: u16, config: Config) -> anyhow::Result<()> {
    let socket = Socket::bind_server(port, config.dual_mode).await?;
    let mut ticker = interval(Duration::from_millis(config.flush_interval() as u64));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut server = Server::new(socket, config)?;
    let clock = Clock::new();
    log::info!("Starting echo server on {}", server.local_addr()?);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                log::info!("Shutting down");
                return Ok(());
            }
        }
        server.tick(clock.now_ms());
        while let Some(event) = server.poll_event() {
            let id = event.connection_id();
            match event {
                Event::Data { message, channel, .. } => {
                    if let Err(e) = server.send(id, &message, channel) {
                        log::warn!("echo to id={id} failed: {e}");
                    }
                }
                Event::Connected(_) => log::info!("id={id} connected"),
                Event::Disconnected(_) => log::info!("id={id} disconnected"),
                Event::Error { kind, reason, .. } => log::warn!("id={id} {kind}: {reason}"),
            }
        }
    }
}

async fn run_client(
    host: &str,
    port: u16,
    message: Vec<u8>,
    count: usize,
    channel: Channel,
    config: Config,
) -> anyhow::Result<()> {
    let remote = socket::resolve(host, port)
        .await
        .with_context(|| format!("resolving {host}"))?;
    let socket = Socket::bind_for(remote).await?;
    let clock = Clock::new();
    let mut ticker = interval(Duration::from_millis(config.flush_interval() as u64));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut client = Client::connect(socket, remote, config, clock.now_ms())?;
    let mut replies = 0;

    loop {
        ticker.tick().await;
        client.tick(clock.now_ms());
        while let Some(event) = client.poll_event() {
            match event {
                Event::Connected(id) => {
                    log::info!("Connected as id={id}");
                    for _ in 0..count {
                        client.send(&message, channel)?;
                    }
                }
                Event::Data { message, .. } => {
                    replies += 1;
                    println!("{}", String::from_utf8_lossy(&message));
                    if replies == count {
                        client.disconnect();
                    }
                }
                Event::Disconnected(_) if replies == count => return Ok(()),
                Event::Disconnected(_) => bail!("disconnected after {replies}/{count} replies"),
                Event::Error { kind, reason, .. } => log::warn!("{kind}: {reason}"),
            }
        }
    }
}

/// The classic smoke test: client sends `[1, 2]`, server answers `[3, 4]`.
async fn run_demo(config: Config) -> anyhow::Result<()> {
    let server_socket = Socket::bind("127.0.0.1:0".parse()?).await?;
    let server_addr = server_socket.local_addr;
    let client_socket = Socket::bind("127.0.0.1:0".parse()?).await?;

    let clock = Clock::new();
    let mut ticker = interval(Duration::from_millis(config.flush_interval() as u64));
    let mut server = Server::new(server_socket, config.clone())?;
    let mut client = Client::connect(client_socket, server_addr, config, clock.now_ms())?;

    let deadline = clock.now_ms() + 5_000;
    let mut done = false;
    while !done {
        ticker.tick().await;
        let now = clock.now_ms();
        if now > deadline {
            bail!("demo did not finish in time");
        }
        server.tick(now);
        client.tick(now);

        for event in server.drain_events() {
            println!("server: {event:?}");
            if let Event::Data { id, .. } = event {
                server.send(id, &[0x03, 0x04], Channel::Reliable)?;
            }
        }
        for event in client.drain_events() {
            println!("client: {event:?}");
            match event {
                Event::Connected(_) => client.send(&[0x01, 0x02], Channel::Reliable)?,
                Event::Data { .. } => client.disconnect(),
                Event::Disconnected(_) => done = true,
                Event::Error { .. } => {}
            }
        }
    }
    Ok(())
}
