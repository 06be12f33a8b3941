//! The protected backend.
//!
//! Both adapters forward to the same configured URL: the HTTP adapter
//! rewrites request URIs onto it, the socket adapter only needs its
//! `host:port`.

use std::time::Duration;

use axum::http::uri::{Authority, Scheme, Uri};
use tokio::net::TcpStream;
use url::Url;

use crate::error::GatewayError;

#[derive(Debug, Clone)]
pub struct UpstreamTarget {
    authority: Authority,
    /// Base path prefixed to every forwarded request, without trailing `/`.
    base_path: String,
    /// `host:port` for raw TCP connections.
    socket_address: String,
}

impl UpstreamTarget {
    pub fn parse(raw: &str) -> Result<Self, GatewayError> {
        let invalid = |reason: &str| GatewayError::Target {
            url: raw.to_string(),
            reason: reason.to_string(),
        };

        let url = Url::parse(raw).map_err(|e| invalid(&e.to_string()))?;
        if url.scheme() != "http" {
            return Err(invalid("only http:// targets are supported"));
        }
        let host = url.host_str().ok_or_else(|| invalid("missing host"))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| invalid("missing port"))?;

        let socket_address = format!("{host}:{port}");
        let authority = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        let authority = Authority::try_from(authority.as_str()).map_err(|e| invalid(&e.to_string()))?;

        Ok(Self {
            authority,
            base_path: url.path().trim_end_matches('/').to_string(),
            socket_address,
        })
    }

    pub fn socket_address(&self) -> &str {
        &self.socket_address
    }

    /// Absolute URI on the backend for a client request target.
    pub fn uri_for(&self, path_and_query: &str) -> Result<Uri, axum::http::Error> {
        let path_and_query = if path_and_query.starts_with('/') {
            format!("{}{}", self.base_path, path_and_query)
        } else {
            format!("{}/{}", self.base_path, path_and_query)
        };
        Uri::builder()
            .scheme(Scheme::HTTP)
            .authority(self.authority.clone())
            .path_and_query(path_and_query)
            .build()
    }

    /// Open a raw TCP connection to the backend.
    pub async fn connect(&self, timeout: Duration) -> std::io::Result<TcpStream> {
        match tokio::time::timeout(timeout, TcpStream::connect(&self.socket_address)).await {
            Ok(result) => result,
            Err(_) => Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("connect to {} timed out", self.socket_address),
            )),
        }
    }
}
