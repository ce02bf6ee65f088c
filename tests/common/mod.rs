//! Shared utilities for integration testing: a scriptable mock backend
//! and helpers for booting the relay and talking to it as a client.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use live_relay::config::RelayConfig;
use live_relay::lifecycle::Shutdown;
use live_relay::session::SessionRegistry;
use live_relay::RelayServer;
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, connect_async, MaybeTlsStream, WebSocketStream};

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// What the test can make the mock backend do.
#[derive(Debug)]
pub enum MockCommand {
    Send(Value),
    Close(u16, &'static str),
}

/// One connection the relay opened to the mock backend.
pub struct MockConnection {
    /// Request URI, including the query string.
    pub uri: String,
    /// The setup frame (`{"setup": {...}}`).
    pub setup: Value,
    /// Every later frame the relay sent. Ends when the socket closes.
    pub frames: mpsc::UnboundedReceiver<Value>,
    commands: mpsc::UnboundedSender<MockCommand>,
}

impl MockConnection {
    pub fn send(&self, message: Value) {
        let _ = self.commands.send(MockCommand::Send(message));
    }

    pub fn close(&self, code: u16, reason: &'static str) {
        let _ = self.commands.send(MockCommand::Close(code, reason));
    }

    pub async fn next_frame(&mut self) -> Option<Value> {
        tokio::time::timeout(TIMEOUT, self.frames.recv())
            .await
            .expect("timed out waiting for upstream frame")
    }
}

/// A mock backend that acknowledges every setup.
pub struct MockUpstream {
    pub addr: SocketAddr,
    connections: mpsc::UnboundedReceiver<MockConnection>,
}

impl MockUpstream {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let tx = tx.clone();
                tokio::spawn(serve_connection(stream, tx));
            }
        });

        Self { addr, connections: rx }
    }

    pub fn endpoint(&self) -> String {
        format!("ws://{}/ws/bidi", self.addr)
    }

    /// Wait for the relay to open the next connection.
    pub async fn next_connection(&mut self) -> MockConnection {
        tokio::time::timeout(TIMEOUT, self.connections.recv())
            .await
            .expect("timed out waiting for upstream connection")
            .expect("mock upstream stopped")
    }
}

async fn serve_connection(stream: TcpStream, connections: mpsc::UnboundedSender<MockConnection>) {
    let mut uri = String::new();
    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        uri = request.uri().to_string();
        Ok(response)
    };
    let Ok(mut ws) = accept_hdr_async(stream, callback).await else {
        return;
    };

    let setup = match ws.next().await {
        Some(Ok(Message::Text(text))) => serde_json::from_str::<Value>(text.as_str()).unwrap(),
        _ => return,
    };
    let ack = json!({ "setupComplete": {} }).to_string();
    if ws.send(Message::Text(ack.into())).await.is_err() {
        return;
    }

    let (frames_tx, frames_rx) = mpsc::unbounded_channel();
    let (commands_tx, mut commands_rx) = mpsc::unbounded_channel();
    let _ = connections.send(MockConnection {
        uri,
        setup,
        frames: frames_rx,
        commands: commands_tx,
    });

    let mut commands_open = true;
    loop {
        tokio::select! {
            command = commands_rx.recv(), if commands_open => match command {
                Some(MockCommand::Send(message)) => {
                    if ws.send(Message::Text(message.to_string().into())).await.is_err() {
                        break;
                    }
                }
                Some(MockCommand::Close(code, reason)) => {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.into(),
                    };
                    let _ = ws.close(Some(frame)).await;
                }
                None => commands_open = false,
            },
            inbound = ws.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    if let Ok(value) = serde_json::from_str::<Value>(text.as_str()) {
                        let _ = frames_tx.send(value);
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

/// Relay configuration pointed at `upstream`, with a test credential.
pub fn relay_config(upstream: &MockUpstream) -> RelayConfig {
    let mut config = RelayConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.upstream.endpoint = upstream.endpoint();
    config.upstream.api_key = Some("test-key".to_string());
    config.upstream.connect_timeout_secs = 2;
    config.timeouts.shutdown_drain_secs = 2;
    config.observability.metrics_enabled = false;
    config
}

/// A relay running in the background.
pub struct TestRelay {
    pub addr: SocketAddr,
    pub registry: SessionRegistry,
    pub shutdown: Shutdown,
    pub handle: JoinHandle<Result<(), std::io::Error>>,
}

impl TestRelay {
    pub async fn start(config: RelayConfig) -> Self {
        let listener = TcpListener::bind(&config.listener.bind_address).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = RelayServer::new(config);
        let registry = server.registry();
        let shutdown = Shutdown::new();
        let server_shutdown = shutdown.subscribe();
        let (_, config_updates) = mpsc::unbounded_channel();

        let handle = tokio::spawn(server.run(listener, config_updates, server_shutdown));

        Self {
            addr,
            registry,
            shutdown,
            handle,
        }
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Connect a client and consume the `connected` event.
    /// Returns the socket and the session ID.
    pub async fn connect(&self) -> (Client, String) {
        let (mut ws, _) = connect_async(self.ws_url()).await.unwrap();
        let connected = next_event(&mut ws).await;
        assert_eq!(connected["type"], "connected");
        let session_id = connected["data"]["sessionId"].as_str().unwrap().to_string();
        (ws, session_id)
    }

    /// Wait until the registry holds `expected` sessions.
    pub async fn wait_for_sessions(&self, expected: usize) {
        let registry = self.registry.clone();
        tokio::time::timeout(TIMEOUT, async move {
            while registry.len() != expected {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("registry did not reach expected size");
    }
}

pub async fn send_frame(ws: &mut Client, kind: &str, data: Value) {
    let frame = json!({ "type": kind, "data": data }).to_string();
    ws.send(Message::Text(frame.into())).await.unwrap();
}

/// Next JSON event from the relay, skipping control frames.
pub async fn next_event(ws: &mut Client) -> Value {
    tokio::time::timeout(TIMEOUT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return serde_json::from_str::<Value>(text.as_str()).unwrap(),
                Some(Ok(Message::Close(frame))) => panic!("relay closed the socket: {frame:?}"),
                Some(Ok(_)) => continue,
                Some(Err(e)) => panic!("client socket error: {e}"),
                None => panic!("client socket ended"),
            }
        }
    })
    .await
    .expect("timed out waiting for relay event")
}

/// Wait for the relay to close the client socket; returns the close code.
pub async fn expect_close(ws: &mut Client) -> Option<u16> {
    tokio::time::timeout(TIMEOUT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(frame))) => return frame.map(|f| u16::from(f.code)),
                Some(Ok(_)) => continue,
                Some(Err(_)) | None => return None,
            }
        }
    })
    .await
    .expect("timed out waiting for close")
}

/// Send `setup` and wait for the acknowledgement on both sides.
pub async fn setup(ws: &mut Client, upstream: &mut MockUpstream, model: &str) -> MockConnection {
    send_frame(ws, "setup", json!({ "model": model })).await;
    let connection = upstream.next_connection().await;
    let ack = next_event(ws).await;
    assert_eq!(ack["type"], "setupComplete");
    connection
}
