//! HTTP reverse-proxy transport.
//!
//! Forwards one request to a chosen backend over HTTP/1.1 and streams the
//! response back. Method, body and end-to-end headers pass through; the
//! request target and `Host` are rewritten for the backend.

use crate::backend::{Backend, connect_target};
use crate::config::ProxyConfig;
use crate::metrics::MetricsCollector;
use crate::util::RequestId;
use bytes::Bytes;
use http_body_util::{BodyExt, Full, combinators::BoxBody};
use hyper::body::{Body, Incoming};
use hyper::header::{CONTENT_TYPE, HOST, HeaderMap, HeaderName, HeaderValue};
use hyper::{Request, Response, StatusCode, Uri};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};

/// Body type of every response produced by the proxy.
pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

/// Headers that apply to a single connection and are never forwarded.
const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "proxy-connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Per-request state handed to the transport.
#[derive(Clone)]
pub struct ProxyContext {
    /// Client's address.
    pub client_addr: SocketAddr,
    /// Proxy configuration.
    pub config: Arc<ProxyConfig>,
    /// Metrics collector.
    pub metrics: MetricsCollector,
    /// Request ID used in logs.
    pub request_id: RequestId,
}

/// Failure while forwarding to a backend.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("backend address has no host: {0}")]
    InvalidBackend(String),

    #[error("failed to connect to backend: {0}")]
    Connect(#[from] std::io::Error),

    #[error("connecting to backend timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    #[error("invalid request for backend: {0}")]
    InvalidRequest(String),
}

/// Proxy a single request to `backend`, answering 502 if forwarding fails.
#[instrument(skip_all, fields(
    method = %req.method(),
    uri = %req.uri(),
    client = %ctx.client_addr,
    backend = %backend,
    request_id = %ctx.request_id
))]
pub async fn proxy_request(
    req: Request<Incoming>,
    backend: &Backend,
    ctx: &ProxyContext,
) -> Response<ProxyBody> {
    let start_time = Instant::now();
    let method = req.method().to_string();
    let backend_label = backend.address().to_string();

    debug!("proxying HTTP request");

    match forward_request(req, backend.address(), ctx).await {
        Ok(response) => {
            let duration = start_time.elapsed();
            let status = response.status().as_u16();
            ctx.metrics
                .record_request(&backend_label, &method, status, duration);

            info!(
                status,
                duration_ms = duration.as_millis(),
                "proxied request completed"
            );
            response
        }
        Err(e) => {
            error!(error = %e, "forwarding to backend failed");
            ctx.metrics.record_request(
                &backend_label,
                &method,
                StatusCode::BAD_GATEWAY.as_u16(),
                start_time.elapsed(),
            );
            error_response(StatusCode::BAD_GATEWAY, "Failed to forward request to backend")
        }
    }
}

/// Forward `req` to the backend at `backend` and return its response.
pub async fn forward_request<B>(
    mut req: Request<B>,
    backend: &Uri,
    ctx: &ProxyContext,
) -> Result<Response<ProxyBody>, ProxyError>
where
    B: Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let (host, port) =
        connect_target(backend).ok_or_else(|| ProxyError::InvalidBackend(backend.to_string()))?;

    let connect_timeout = ctx.config.connect_timeout;
    let stream = match timeout(connect_timeout, TcpStream::connect((host.as_str(), port))).await {
        Ok(result) => result?,
        Err(_) => return Err(ProxyError::ConnectTimeout(connect_timeout)),
    };
    if let Err(e) = stream.set_nodelay(true) {
        warn!(error = %e, "failed to set TCP_NODELAY on backend connection");
    }

    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream)).await?;

    tokio::spawn(async move {
        if let Err(e) = conn.await {
            warn!(error = %e, "backend connection error");
        }
    });

    rewrite_request(&mut req, backend, ctx)?;

    let response = sender.send_request(req).await?;

    let (mut parts, body) = response.into_parts();
    remove_hop_by_hop(&mut parts.headers);
    add_configured_headers(&mut parts.headers, &ctx.config.response_headers, backend, ctx);

    Ok(Response::from_parts(parts, body.boxed()))
}

/// Point the request at the backend: target, `Host`, forwarding headers.
fn rewrite_request<B>(
    req: &mut Request<B>,
    backend: &Uri,
    ctx: &ProxyContext,
) -> Result<(), ProxyError> {
    let target = join_target(backend, req.uri());
    *req.uri_mut() = target
        .parse::<Uri>()
        .map_err(|e| ProxyError::InvalidRequest(format!("{}: {}", target, e)))?;

    let headers = req.headers_mut();
    remove_hop_by_hop(headers);

    if let Some(authority) = backend.authority() {
        let value = HeaderValue::from_str(authority.as_str())
            .map_err(|e| ProxyError::InvalidRequest(e.to_string()))?;
        headers.insert(HOST, value);
    }

    append_forwarded_for(headers, ctx.client_addr);
    ctx.request_id.apply(headers);
    add_configured_headers(headers, &ctx.config.request_headers, backend, ctx);

    Ok(())
}

/// Join the backend's base path and query with the request's.
///
/// `http://b/api` + `/users?id=1` becomes `/api/users?id=1`; exactly one
/// slash separates the two paths and both queries are kept.
pub fn join_target(backend: &Uri, request: &Uri) -> String {
    let base = backend.path();
    let path = request.path();

    let mut target = match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{}{}", base, &path[1..]),
        (false, false) => format!("{}/{}", base, path),
        _ => format!("{}{}", base, path),
    };

    match (backend.query().unwrap_or(""), request.query().unwrap_or("")) {
        ("", "") => {}
        (q, "") | ("", q) => {
            target.push('?');
            target.push_str(q);
        }
        (b, r) => {
            target.push('?');
            target.push_str(b);
            target.push('&');
            target.push_str(r);
        }
    }

    target
}

/// Strip hop-by-hop headers, including any named by `Connection`.
fn remove_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(hyper::header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

/// Append the client IP to `X-Forwarded-For`, keeping earlier hops.
fn append_forwarded_for(headers: &mut HeaderMap, client_addr: SocketAddr) {
    let client_ip = client_addr.ip().to_string();
    let prior: Vec<&str> = headers
        .get_all(X_FORWARDED_FOR)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();

    let value = if prior.is_empty() {
        client_ip
    } else {
        format!("{}, {}", prior.join(", "), client_ip)
    };

    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(X_FORWARDED_FOR, value);
    }
}

/// Add configured headers, with variable substitution.
fn add_configured_headers(
    headers: &mut HeaderMap,
    configured: &std::collections::HashMap<String, String>,
    backend: &Uri,
    ctx: &ProxyContext,
) {
    for (name, value) in configured {
        let value = substitute_variables(value, backend, ctx);
        if let (Ok(name), Ok(value)) = (
            name.parse::<HeaderName>(),
            value.parse::<HeaderValue>(),
        ) {
            headers.insert(name, value);
        }
    }
}

/// Substitute variables in header values.
fn substitute_variables(value: &str, backend: &Uri, ctx: &ProxyContext) -> String {
    value
        .replace("$client_ip", &ctx.client_addr.ip().to_string())
        .replace("$client_port", &ctx.client_addr.port().to_string())
        .replace("$backend_addr", &backend.to_string())
        .replace("$request_id", ctx.request_id.as_str())
}

/// Create a plain-text error response.
pub fn error_response(status: StatusCode, message: &str) -> Response<ProxyBody> {
    let body = Full::new(Bytes::from(format!("{}: {}\n", status, message)))
        .map_err(|never| match never {})
        .boxed();

    let mut response = Response::new(body);
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}
