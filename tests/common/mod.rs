//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use locker_gateway::config::GatewayConfig;
use locker_gateway::lifecycle::build_authenticator;
use locker_gateway::net::Listener;
use locker_gateway::{Authenticator, GatewayError, HttpServer, Shutdown, SocketServer};

pub const API_TOKEN: &str = "test-token";
pub const USER: &str = "demo";
pub const PASSWORD: &str = "test";

/// Start a backend that answers every request with
/// `<method> <target> <body>` and closes the connection.
pub async fn start_echo_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let Some(request) = read_message(&mut socket).await else {
                    return;
                };
                let (head, body) = request.split_once("\r\n\r\n").unwrap_or((&request, ""));
                let request_line = head.lines().next().unwrap_or("");
                let mut parts = request_line.split(' ');
                let method = parts.next().unwrap_or("");
                let target = parts.next().unwrap_or("");

                let reply = format!("{method} {target} {body}");
                let response = format!(
                    "HTTP/1.1 200 OK\r\nX-Backend: echo\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    reply.len(),
                    reply
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    addr
}

/// Start a backend that keeps connections open and answers each request
/// with `<method> <target> <body>` until the gateway closes its side.
pub async fn start_keep_alive_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 4096];
                loop {
                    while let Some(request) = take_message(&mut buf) {
                        let (head, body) = request.split_once("\r\n\r\n").unwrap_or((&request, ""));
                        let mut parts = head.lines().next().unwrap_or("").split(' ');
                        let method = parts.next().unwrap_or("");
                        let target = parts.next().unwrap_or("");
                        let reply = format!("{method} {target} {body}");
                        let response = format!(
                            "HTTP/1.1 200 OK\r\nX-Backend: keep-alive\r\nContent-Length: {}\r\n\r\n{}",
                            reply.len(),
                            reply
                        );
                        if socket.write_all(response.as_bytes()).await.is_err() {
                            return;
                        }
                    }
                    match socket.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    }
                }
                let _ = socket.shutdown().await;
            });
        }
    });

    addr
}

/// Remove one complete message from the front of `buf`, if there is one.
pub fn take_message(buf: &mut Vec<u8>) -> Option<String> {
    let end = buf.windows(4).position(|w| w == b"\r\n\r\n")?;
    let head = String::from_utf8_lossy(&buf[..end]).to_string();
    let length = head
        .lines()
        .filter_map(|l| l.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.trim().parse::<usize>().ok())
        .unwrap_or(0);
    if buf.len() < end + 4 + length {
        return None;
    }
    let message: Vec<u8> = buf.drain(..end + 4 + length).collect();
    Some(String::from_utf8_lossy(&message).to_string())
}

/// Read until the peer closes.
pub async fn read_all<S: AsyncRead + Unpin>(stream: &mut S) -> String {
    let mut out = Vec::new();
    let _ = stream.read_to_end(&mut out).await;
    String::from_utf8_lossy(&out).to_string()
}

/// Read one HTTP message (head plus `Content-Length` body). `None` on EOF
/// before anything arrived.
pub async fn read_message<S: AsyncRead + Unpin>(stream: &mut S) -> Option<String> {
    let mut out = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        if let Some(end) = out.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&out[..end]).to_string();
            let length = head
                .lines()
                .filter_map(|l| l.split_once(':'))
                .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
                .and_then(|(_, v)| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if out.len() >= end + 4 + length {
                return Some(String::from_utf8_lossy(&out[..end + 4 + length]).to_string());
            }
        }
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return (!out.is_empty()).then(|| String::from_utf8_lossy(&out).to_string());
        }
        out.extend_from_slice(&chunk[..n]);
    }
}

/// Pull the `session_id` value out of a `Set-Cookie` header value or a raw response.
pub fn session_id_from(text: &str) -> Option<String> {
    let start = text.find("session_id=")? + "session_id=".len();
    let rest = &text[start..];
    let end = rest.find(|c: char| c == ';' || c == '\r' || c == '\n').unwrap_or(rest.len());
    Some(rest[..end].to_string())
}

pub fn gateway_config(target: SocketAddr) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.target.url = format!("http://{target}");
    config.auth.api_token = Some(API_TOKEN.to_string());
    config.auth.users.insert(USER.to_string(), PASSWORD.to_string());
    config.timeouts.connect_secs = 2;
    config.timeouts.request_secs = 5;
    config.timeouts.shutdown_grace_secs = 2;
    config
}

/// A gateway running in the background on an ephemeral port.
pub struct TestGateway {
    pub addr: SocketAddr,
    pub authenticator: Arc<Authenticator>,
    pub shutdown: Shutdown,
    pub handle: JoinHandle<Result<(), GatewayError>>,
}

impl TestGateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Trigger shutdown and wait for the server task.
    pub async fn stop(self) -> Result<(), GatewayError> {
        self.shutdown.trigger();
        self.handle.await.unwrap()
    }
}

pub async fn start_http_gateway(config: GatewayConfig) -> TestGateway {
    let authenticator = build_authenticator(&config);
    let server = HttpServer::new(&config, Arc::clone(&authenticator)).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let handle = tokio::spawn(server.run(listener, shutdown.subscribe()));
    TestGateway {
        addr,
        authenticator,
        shutdown,
        handle,
    }
}

pub async fn start_socket_gateway(config: GatewayConfig) -> TestGateway {
    let authenticator = build_authenticator(&config);
    let server = SocketServer::new(&config, Arc::clone(&authenticator)).unwrap();
    let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = tcp.local_addr().unwrap();
    let listener = Listener::from_tcp(tcp, 64);
    let shutdown = Shutdown::new();
    let handle = tokio::spawn(server.run(listener, shutdown.subscribe()));
    TestGateway {
        addr,
        authenticator,
        shutdown,
        handle,
    }
}
