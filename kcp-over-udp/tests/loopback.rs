//! Integration tests over real UDP sockets on loopback.
//!
//! Server and client are ticked from the same task with a real millisecond
//! clock; sleeping between ticks lets the tokio reactor pick up socket
//! readiness.

use std::net::SocketAddr;
use std::time::Duration;

use kcp_over_udp::clock::Clock;
use kcp_over_udp::{Channel, Client, Config, Event, Server, Socket};

async fn bind() -> Socket {
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    Socket::bind(addr).await.expect("bind failed")
}

async fn pair(config: Config) -> (Server<Socket>, Client<Socket>, Clock) {
    let server_socket = bind().await;
    let server_addr = server_socket.local_addr;
    let clock = Clock::new();
    let server = Server::new(server_socket, config.clone()).unwrap();
    let client = Client::connect(bind().await, server_addr, config, clock.now_ms()).unwrap();
    (server, client, clock)
}

#[tokio::test]
async fn handshake_and_exchange_over_loopback() {
    let (mut server, mut client, clock) = pair(Config::default()).await;
    let mut server_got = Vec::new();
    let mut client_got = Vec::new();

    let finished = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let now = clock.now_ms();
            client.tick(now);
            server.tick(now);

            for event in server.drain_events() {
                if let Event::Data { id, message, .. } = event {
                    server.send(id, &[0x03, 0x04], Channel::Reliable).unwrap();
                    server_got.push(message);
                }
            }
            for event in client.drain_events() {
                match event {
                    Event::Connected(_) => {
                        client.send(&[0x01, 0x02], Channel::Reliable).unwrap();
                    }
                    Event::Data { message, .. } => {
                        client_got.push(message);
                        return;
                    }
                    other => panic!("unexpected client event {other:?}"),
                }
            }
        }
    })
    .await;

    assert!(finished.is_ok(), "exchange timed out");
    assert_eq!(server_got, vec![vec![0x01, 0x02]]);
    assert_eq!(client_got, vec![vec![0x03, 0x04]]);
    assert_eq!(server.connection_count(), 1);
    assert_eq!(
        server.remote_addr(client.id().unwrap()),
        client.local_addr().ok()
    );
}

#[tokio::test]
async fn connect_to_silent_peer_times_out() {
    // Bind and immediately drop a socket so its port is unbound.
    let silent_addr = bind().await.local_addr;
    let clock = Clock::new();
    let mut client = Client::connect(
        bind().await,
        silent_addr,
        Config::default().with_timeout(300),
        clock.now_ms(),
    )
    .unwrap();

    let mut events = Vec::new();
    let _ = tokio::time::timeout(Duration::from_secs(5), async {
        while client.state().is_some() {
            tokio::time::sleep(Duration::from_millis(10)).await;
            client.tick(clock.now_ms());
            events.extend(client.drain_events());
        }
    })
    .await;

    assert_eq!(events, vec![Event::Disconnected(0)]);
}
