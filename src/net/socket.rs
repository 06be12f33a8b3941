//! Raw-socket proxy adapter.
//!
//! # Responsibilities
//! - Buffer client bytes until a complete HTTP/1.1 request is available
//! - Ask the authenticator once per request, for every request on the connection
//! - Answer challenges and redirects directly, keeping the connection open
//! - Relay admitted requests byte for byte to one backend connection
//!
//! # Design Decisions
//! - The backend connection opens on the first admitted request and is
//!   reused for later admitted requests on the same client connection
//! - Backend responses stream back unparsed; once the backend is involved a
//!   rejected request ends the connection, after earlier responses drain
//! - A client that disconnects mid-request leaves no trace: the decision
//!   only runs on complete requests
//! - Chunked request bodies are rejected by the parser

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast;
use tracing::Instrument;

use crate::auth::resolver::{AuthRequest, Authenticator, Verdict};
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::http::request::{ParseError, Parsed, ParsedRequest, RequestHeader};
use crate::http::response::GatewayResponse;
use crate::net::connection::ConnectionTracker;
use crate::net::listener::{Listener, ListenerError};
use crate::net::upstream::UpstreamTarget;
use crate::observability::metrics;

const READ_CHUNK: usize = 8 * 1024;

/// Why a client connection ended abnormally.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("malformed request: {0}")]
    Parse(#[from] ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out waiting for a complete request")]
    Timeout,

    #[error("authentication task failed: {0}")]
    Internal(String),
}

/// Per-connection request handling, shared by all connection tasks.
#[derive(Debug)]
pub struct SocketProxy {
    authenticator: Arc<Authenticator>,
    upstream: UpstreamTarget,
    parser: RequestHeader,
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl SocketProxy {
    pub fn new(config: &GatewayConfig, authenticator: Arc<Authenticator>) -> Result<Self, GatewayError> {
        Ok(Self {
            authenticator,
            upstream: UpstreamTarget::parse(&config.target.url)?,
            parser: RequestHeader::new(config.limits.max_header_bytes, config.limits.max_body_bytes),
            connect_timeout: Duration::from_secs(config.timeouts.connect_secs),
            request_timeout: Duration::from_secs(config.timeouts.request_secs),
        })
    }

    /// Serve one client connection until it closes.
    pub async fn serve<S>(&self, mut client: S) -> Result<(), ConnectionError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut buf = Vec::with_capacity(READ_CHUNK);

        loop {
            let request = match self.read_request(&mut client, &mut buf).await {
                Ok(Some(request)) => request,
                Ok(None) => {
                    tracing::trace!(buffered = buf.len(), "Client closed connection");
                    return Ok(());
                }
                Err(ConnectionError::Parse(e)) => {
                    let _ = client.write_all(&parse_error_response(&e).to_bytes(true)).await;
                    let _ = client.shutdown().await;
                    return Err(e.into());
                }
                Err(e) => return Err(e),
            };

            let consumed = request.consumed;
            let close = wants_close(&request);
            let verdict = self.decide(request).await?;

            match GatewayResponse::from_verdict(&verdict) {
                None => return self.forward(client, buf, consumed).await,
                Some(response) => {
                    client.write_all(&response.to_bytes(close)).await?;
                    client.flush().await?;
                    buf.drain(..consumed);
                    if close {
                        client.shutdown().await?;
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Read until the buffer holds a complete request. `None` on clean EOF.
    async fn read_request<R>(
        &self,
        client: &mut R,
        buf: &mut Vec<u8>,
    ) -> Result<Option<ParsedRequest>, ConnectionError>
    where
        R: AsyncRead + Unpin,
    {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Parsed::Complete(request) = self.parser.parse_buffer(buf)? {
                return Ok(Some(request));
            }

            let n = tokio::time::timeout(self.request_timeout, client.read(&mut chunk))
                .await
                .map_err(|_| ConnectionError::Timeout)??;
            if n == 0 {
                return Ok(None);
            }
            buf.extend_from_slice(&chunk[..n]);
        }
    }

    async fn decide(&self, request: ParsedRequest) -> Result<Verdict, ConnectionError> {
        let authenticator = Arc::clone(&self.authenticator);
        let request = AuthRequest::from(request);
        // Password hashing may be slow; keep it off the reactor threads.
        tokio::task::spawn_blocking(move || authenticator.authenticate(&request))
            .await
            .map_err(|e| ConnectionError::Internal(e.to_string()))
    }

    /// Connect to the backend and relay the admitted request at the front
    /// of `buf`, then keep judging whatever the client sends next.
    async fn forward<S>(&self, mut client: S, buf: Vec<u8>, admitted: usize) -> Result<(), ConnectionError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let backend = match self.upstream.connect(self.connect_timeout).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!(upstream = %self.upstream.socket_address(), error = %e, "Upstream connect failed");
                metrics::record_upstream_error("socket");
                let response = GatewayResponse::error(StatusCode::BAD_GATEWAY, "Upstream connection failed");
                let _ = client.write_all(&response.to_bytes(true)).await;
                let _ = client.shutdown().await;
                return Err(e.into());
            }
        };

        let (mut backend_rd, mut backend_wr) = backend.into_split();
        let (mut client_rd, mut client_wr) = tokio::io::split(client);

        let rejection = {
            let upstream = async {
                let result = self
                    .relay_requests(&mut client_rd, &mut backend_wr, buf, admitted)
                    .await;
                // Let the backend finish what it was sent, then close.
                let _ = backend_wr.shutdown().await;
                result
            };
            let downstream = tokio::io::copy(&mut backend_rd, &mut client_wr);
            tokio::pin!(upstream, downstream);

            tokio::select! {
                relayed = &mut upstream => {
                    let to_client = (&mut downstream).await?;
                    tracing::debug!(to_client, "Backend connection drained");
                    relayed?
                }
                copied = &mut downstream => {
                    let to_client = copied?;
                    tracing::debug!(to_client, "Backend closed connection");
                    None
                }
            }
        };

        if let Some(response) = rejection {
            client_wr.write_all(&response.to_bytes(true)).await?;
        }
        let _ = client_wr.shutdown().await;
        Ok(())
    }

    /// Send admitted requests to the backend one by one.
    ///
    /// Returns the response to send once the backend has drained if a
    /// later request is not admitted, `None` when the client stops sending.
    async fn relay_requests<R, W>(
        &self,
        client: &mut R,
        backend: &mut W,
        mut buf: Vec<u8>,
        mut admitted: usize,
    ) -> Result<Option<GatewayResponse>, ConnectionError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        loop {
            backend.write_all(&buf[..admitted]).await?;
            buf.drain(..admitted);

            let request = match self.read_request(client, &mut buf).await {
                Ok(Some(request)) => request,
                // Idle or gone; partial bytes are never forwarded.
                Ok(None) | Err(ConnectionError::Timeout) => return Ok(None),
                Err(ConnectionError::Parse(e)) => {
                    tracing::warn!(error = %e, "Malformed request on forwarded connection");
                    return Ok(Some(parse_error_response(&e)));
                }
                Err(e) => return Err(e),
            };

            admitted = request.consumed;
            let verdict = self.decide(request).await?;
            if let Some(response) = GatewayResponse::from_verdict(&verdict) {
                tracing::debug!(
                    verdict = verdict.label(),
                    "Request on forwarded connection not admitted, closing after backend drains"
                );
                return Ok(Some(response));
            }
        }
    }
}

fn parse_error_response(e: &ParseError) -> GatewayResponse {
    let status = match e {
        ParseError::HeaderTooLarge(_) => StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE,
        ParseError::BodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        ParseError::UnsupportedTransferEncoding(_) => StatusCode::NOT_IMPLEMENTED,
        _ => StatusCode::BAD_REQUEST,
    };
    GatewayResponse::error(status, &e.to_string())
}

/// Whether the client asked for the connection to close after this request.
fn wants_close(request: &ParsedRequest) -> bool {
    let connection = request.headers.get("connection").unwrap_or("");
    let has = |token: &str| {
        connection
            .split(',')
            .any(|t| t.trim().eq_ignore_ascii_case(token))
    };
    if request.version == "HTTP/1.0" {
        !has("keep-alive")
    } else {
        has("close")
    }
}

/// Accept loop for the raw-socket adapter.
pub struct SocketServer {
    proxy: Arc<SocketProxy>,
    tracker: ConnectionTracker,
    shutdown_grace: Duration,
}

impl SocketServer {
    pub fn new(config: &GatewayConfig, authenticator: Arc<Authenticator>) -> Result<Self, GatewayError> {
        Ok(Self {
            proxy: Arc::new(SocketProxy::new(config, authenticator)?),
            tracker: ConnectionTracker::new(),
            shutdown_grace: Duration::from_secs(config.timeouts.shutdown_grace_secs),
        })
    }

    pub fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }

    /// Accept connections until shutdown, then wait for in-flight ones.
    pub async fn run(
        self,
        listener: Listener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), GatewayError> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            upstream = %self.proxy.upstream.socket_address(),
            "Socket proxy starting"
        );

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => self.spawn_connection(stream, peer, permit),
                    Err(ListenerError::Closed) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "Accept failed");
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                },
                _ = shutdown.recv() => {
                    tracing::info!("Shutdown signal received, no longer accepting connections");
                    break;
                }
            }
        }

        drop(listener);
        if !self.tracker.wait_idle(self.shutdown_grace).await {
            tracing::warn!(
                remaining = self.tracker.active_count(),
                "Shutdown grace period elapsed with connections still open"
            );
        }
        tracing::info!("Socket proxy stopped");
        Ok(())
    }

    fn spawn_connection(
        &self,
        stream: tokio::net::TcpStream,
        peer: SocketAddr,
        permit: crate::net::listener::ConnectionPermit,
    ) {
        let proxy = Arc::clone(&self.proxy);
        let guard = self.tracker.track();
        let span = tracing::info_span!("connection", connection_id = %guard.id(), peer_addr = %peer);

        tokio::spawn(
            async move {
                let _permit = permit;
                let _guard = guard;
                if let Err(e) = proxy.serve(stream).await {
                    match e {
                        ConnectionError::Io(ref io)
                            if matches!(
                                io.kind(),
                                std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::BrokenPipe
                            ) =>
                        {
                            tracing::debug!(error = %e, "Connection dropped")
                        }
                        _ => tracing::warn!(error = %e, "Connection closed with error"),
                    }
                }
            }
            .instrument(span),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::account::{Account, StaticUsers};
    use crate::auth::session::SessionStore;
    use tokio::io::duplex;
    use tokio::net::TcpListener;

    fn proxy_for(target: &str) -> SocketProxy {
        let mut config = GatewayConfig::default();
        config.target.url = target.to_string();
        config.timeouts.request_secs = 2;
        config.timeouts.connect_secs = 2;
        let account = Account::new(
            Some("test".into()),
            Arc::new(StaticUsers::new([("demo", "test")])),
        );
        let authenticator = Arc::new(Authenticator::new(account, Arc::new(SessionStore::default())));
        SocketProxy::new(&config, authenticator).unwrap()
    }

    async fn read_response<S: AsyncRead + Unpin>(stream: &mut S) -> String {
        let mut out = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = stream.read(&mut chunk).await.unwrap();
            out.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&out);
            if let Some((head, body)) = text.split_once("\r\n\r\n") {
                let len = head
                    .lines()
                    .find_map(|l| l.strip_prefix("Content-Length: "))
                    .and_then(|v| v.parse::<usize>().ok())
                    .unwrap_or(0);
                if body.len() >= len {
                    return text.into_owned();
                }
            }
            if n == 0 {
                return text.into_owned();
            }
        }
    }

    #[test]
    fn close_semantics() {
        let parse = |raw: &[u8]| match RequestHeader::parse(raw).unwrap() {
            Parsed::Complete(r) => r,
            Parsed::Incomplete => panic!("incomplete"),
        };
        assert!(!wants_close(&parse(b"GET / HTTP/1.1\r\n\r\n")));
        assert!(wants_close(&parse(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n")));
        assert!(wants_close(&parse(b"GET / HTTP/1.0\r\n\r\n")));
        assert!(!wants_close(&parse(b"GET / HTTP/1.0\r\nConnection: Keep-Alive\r\n\r\n")));
    }

    #[tokio::test]
    async fn challenge_then_keep_alive() {
        let proxy = proxy_for("http://127.0.0.1:9");
        let (mut client, server) = duplex(64 * 1024);
        let task = tokio::spawn(async move { proxy.serve(server).await });

        client.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
        let first = read_response(&mut client).await;
        assert!(first.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(first.contains("Set-Cookie: session_id="));

        // Split across writes: parser must wait for the rest.
        client.write_all(b"GET /again HTTP/1.1\r\nCon").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        client.write_all(b"nection: close\r\n\r\n").await.unwrap();
        let second = read_response(&mut client).await;
        assert!(second.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(second.contains("Connection: close\r\n"));

        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn malformed_request_line_closes_connection() {
        let proxy = proxy_for("http://127.0.0.1:9");
        let (mut client, server) = duplex(4096);
        let task = tokio::spawn(async move { proxy.serve(server).await });

        client.write_all(b"NONSENSE\r\n\r\n").await.unwrap();
        let response = read_response(&mut client).await;
        assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(matches!(
            task.await.unwrap(),
            Err(ConnectionError::Parse(ParseError::MalformedRequestLine))
        ));
    }

    #[tokio::test]
    async fn eof_mid_body_signs_nobody_in() {
        let proxy = proxy_for("http://127.0.0.1:9");
        let sessions = Arc::clone(proxy.authenticator.sessions());
        let id = sessions.create().id;
        let (mut client, server) = duplex(4096);
        let task = tokio::spawn(async move { proxy.serve(server).await });

        let head = format!("POST / HTTP/1.1\r\nContent-Length: 27\r\nCookie: session_id={id}\r\n\r\nusername=demo&pass");
        client.write_all(head.as_bytes()).await.unwrap();
        drop(client);

        task.await.unwrap().unwrap();
        assert!(!sessions.verify(&id));
    }

    #[tokio::test]
    async fn forward_replays_request_to_backend() {
        let backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let backend_addr = backend.local_addr().unwrap();
        let backend_task = tokio::spawn(async move {
            let (mut socket, _) = backend.accept().await.unwrap();
            let mut received = vec![0u8; 1024];
            let n = socket.read(&mut received).await.unwrap();
            received.truncate(n);
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 7\r\nConnection: close\r\n\r\nbackend")
                .await
                .unwrap();
            socket.shutdown().await.unwrap();
            received
        });

        let proxy = proxy_for(&format!("http://{backend_addr}"));
        let (mut client, server) = duplex(4096);
        let task = tokio::spawn(async move { proxy.serve(server).await });

        let request = b"GET /data HTTP/1.1\r\nAuthorization: Bearer test\r\n\r\n";
        client.write_all(request).await.unwrap();
        let response = read_response(&mut client).await;
        assert!(response.ends_with("backend"));
        assert_eq!(backend_task.await.unwrap(), request.to_vec());

        drop(client);
        task.await.unwrap().unwrap();
    }

    /// Backend that records everything it is sent, then answers once and closes.
    async fn recording_backend() -> (String, tokio::task::JoinHandle<Vec<u8>>) {
        let backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target = format!("http://{}", backend.local_addr().unwrap());
        let task = tokio::spawn(async move {
            let (mut socket, _) = backend.accept().await.unwrap();
            let mut received = Vec::new();
            socket.read_to_end(&mut received).await.unwrap();
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 7\r\n\r\nbackend")
                .await
                .unwrap();
            socket.shutdown().await.unwrap();
            received
        });
        (target, task)
    }

    #[tokio::test]
    async fn pipelined_request_after_excluded_path_is_challenged() {
        let (target, backend_task) = recording_backend().await;
        let proxy = proxy_for(&target);
        let (mut client, server) = duplex(64 * 1024);
        let task = tokio::spawn(async move { proxy.serve(server).await });

        client
            .write_all(b"GET /favicon.ico HTTP/1.1\r\n\r\nGET /secret HTTP/1.1\r\n\r\n")
            .await
            .unwrap();
        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        let text = String::from_utf8_lossy(&out);

        assert_eq!(backend_task.await.unwrap(), b"GET /favicon.ico HTTP/1.1\r\n\r\n".to_vec());
        let (forwarded, challenge) = text.split_once("backend").unwrap();
        assert!(forwarded.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(challenge.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(challenge.contains("Set-Cookie: session_id="));
        assert!(challenge.contains("Connection: close\r\n"));
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn malformed_request_after_admission_is_not_forwarded() {
        let (target, backend_task) = recording_backend().await;
        let proxy = proxy_for(&target);
        let (mut client, server) = duplex(64 * 1024);
        let task = tokio::spawn(async move { proxy.serve(server).await });

        client
            .write_all(b"GET /data HTTP/1.1\r\nAuthorization: Bearer test\r\n\r\nNONSENSE\r\n\r\n")
            .await
            .unwrap();
        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        let text = String::from_utf8_lossy(&out);

        let received = backend_task.await.unwrap();
        assert_eq!(received, b"GET /data HTTP/1.1\r\nAuthorization: Bearer test\r\n\r\n".to_vec());
        assert!(text.contains("backend"));
        assert!(text.ends_with("malformed request line"));
        assert!(text.contains("HTTP/1.1 400 Bad Request\r\n"));
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn unreachable_backend_is_bad_gateway() {
        let unused = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = unused.local_addr().unwrap();
        drop(unused);

        let proxy = proxy_for(&format!("http://{addr}"));
        let (mut client, server) = duplex(4096);
        let task = tokio::spawn(async move { proxy.serve(server).await });

        client.write_all(b"GET /favicon.ico HTTP/1.1\r\n\r\n").await.unwrap();
        let response = read_response(&mut client).await;
        assert!(response.starts_with("HTTP/1.1 502 Bad Gateway\r\n"));
        assert!(matches!(task.await.unwrap(), Err(ConnectionError::Io(_))));
    }
}
