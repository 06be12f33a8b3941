//! HTTP-object proxy adapter.
//!
//! # Responsibilities
//! - Create the Axum router with a single catch-all handler
//! - Wire up middleware (tracing, request ID, timeout, concurrency limit)
//! - Buffer each request body and ask the authenticator for a verdict
//! - Render challenges and redirects, forward admitted requests upstream
//!
//! # Design Decisions
//! - Every request is judged on its own; keep-alive grants nothing
//! - The body is buffered once and reused for both the login form and
//!   the forwarded request
//! - Hop-by-hop headers are stripped in both directions

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, HeaderName, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::auth::resolver::{AuthRequest, Authenticator, Verdict};
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::http::request::Headers;
use crate::http::response::GatewayResponse;
use crate::net::upstream::UpstreamTarget;
use crate::observability::metrics;

/// Headers that describe a single hop and must not be forwarded.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub authenticator: Arc<Authenticator>,
    pub client: Client<HttpConnector, Body>,
    pub upstream: Arc<UpstreamTarget>,
    pub max_body_bytes: usize,
}

/// HTTP server fronting the protected backend.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(config: &GatewayConfig, authenticator: Arc<Authenticator>) -> Result<Self, GatewayError> {
        let upstream = Arc::new(UpstreamTarget::parse(&config.target.url)?);

        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(Duration::from_secs(config.timeouts.connect_secs)));
        let client = Client::builder(TokioExecutor::new()).build(connector);

        let state = AppState {
            authenticator,
            client,
            upstream,
            max_body_bytes: config.limits.max_body_bytes,
        };

        Ok(Self {
            router: Self::build_router(config, state),
        })
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &GatewayConfig, state: AppState) -> Router {
        Router::new()
            .route("/", any(gateway_handler))
            .route("/{*path}", any(gateway_handler))
            .with_state(state)
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(GlobalConcurrencyLimitLayer::new(config.listener.max_connections))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// The fully layered router, for driving requests without a socket.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve on `listener` until `shutdown` fires, then finish in-flight requests.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), GatewayError> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received, draining HTTP connections");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Judge the request, then answer it here or forward it.
async fn gateway_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let (parts, body) = request.into_parts();
    let request_id = parts
        .headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();

    let body = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(request_id = %request_id, error = %e, "Request body rejected");
            return GatewayResponse::error(StatusCode::PAYLOAD_TOO_LARGE, "Request body too large")
                .into_response();
        }
    };

    let target = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/")
        .to_string();

    let auth_request = AuthRequest {
        method: parts.method.as_str().to_string(),
        target: target.clone(),
        headers: auth_headers(&parts.headers),
        body: body.to_vec(),
    };

    let authenticator = Arc::clone(&state.authenticator);
    let verdict = match tokio::task::spawn_blocking(move || authenticator.authenticate(&auth_request)).await {
        Ok(verdict) => verdict,
        Err(e) => {
            tracing::error!(request_id = %request_id, error = %e, "Authentication task failed");
            return GatewayResponse::error(StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
                .into_response();
        }
    };

    let admission = match verdict {
        Verdict::Forward(admission) => admission,
        other => {
            return match GatewayResponse::from_verdict(&other) {
                Some(response) => response.into_response(),
                None => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
            };
        }
    };

    let uri = match state.upstream.uri_for(&target) {
        Ok(uri) => uri,
        Err(e) => {
            tracing::warn!(request_id = %request_id, target = %target, error = %e, "Unforwardable request target");
            return GatewayResponse::error(StatusCode::BAD_REQUEST, "Invalid request target")
                .into_response();
        }
    };

    let mut builder = Request::builder().method(parts.method.clone()).uri(uri);
    if let Some(headers) = builder.headers_mut() {
        copy_end_to_end(&parts.headers, headers);
        headers.remove(header::HOST);
    }
    let upstream_request = match builder.body(Body::from(body)) {
        Ok(req) => req,
        Err(e) => {
            tracing::error!(request_id = %request_id, error = %e, "Failed to build upstream request");
            return GatewayResponse::error(StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
                .into_response();
        }
    };

    tracing::debug!(
        request_id = %request_id,
        method = %parts.method,
        target = %target,
        admission = admission.as_str(),
        "Forwarding request"
    );

    match state.client.request(upstream_request).await {
        Ok(response) => {
            let (mut parts, body) = response.into_parts();
            strip_hop_by_hop(&mut parts.headers);
            Response::from_parts(parts, Body::new(body))
        }
        Err(e) => {
            tracing::error!(
                request_id = %request_id,
                upstream = %state.upstream.socket_address(),
                error = %e,
                "Upstream error"
            );
            metrics::record_upstream_error("http");
            GatewayResponse::error(StatusCode::BAD_GATEWAY, "Upstream request failed").into_response()
        }
    }
}

/// Convert an axum header map for the authenticator.
///
/// Multiple `Cookie` headers (HTTP/2 splits them) are rejoined; for any
/// other repeated header the last value wins.
fn auth_headers(map: &HeaderMap) -> Headers {
    let mut headers = Headers::new();
    for (name, value) in map {
        let Ok(value) = value.to_str() else {
            continue;
        };
        if name == header::COOKIE {
            if let Some(existing) = headers.get("cookie") {
                let joined = format!("{existing}; {value}");
                headers.insert("cookie", joined);
                continue;
            }
        }
        headers.insert(name.as_str(), value);
    }
    headers
}

fn connection_tokens(map: &HeaderMap) -> Vec<HeaderName> {
    map.get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|t| HeaderName::from_bytes(t.trim().as_bytes()).ok())
        .collect()
}

fn copy_end_to_end(from: &HeaderMap, to: &mut HeaderMap) {
    let listed = connection_tokens(from);
    for (name, value) in from {
        if HOP_BY_HOP.contains(&name.as_str()) || listed.contains(name) {
            continue;
        }
        to.append(name.clone(), value.clone());
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in connection_tokens(headers) {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}
