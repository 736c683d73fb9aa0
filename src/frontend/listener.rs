//! Frontend listener implementation.
//!
//! Accepts client connections, serves HTTP/1.1 on them, and for every request
//! asks the selector for a backend before handing off to the proxy transport.

use crate::backend::{SelectError, Selector};
use crate::config::ProxyConfig;
use crate::metrics::{MetricsCollector, SelectionOutcome};
use crate::proxy::{ProxyBody, ProxyContext, error_response, proxy_request};
use crate::util::RequestId;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};

/// Frontend listener that accepts and handles connections.
pub struct FrontendListener {
    /// TCP listener.
    listener: TcpListener,
    /// Picks the backend for each request.
    selector: Arc<Selector>,
    /// Forwarding settings shared by all requests.
    proxy_config: Arc<ProxyConfig>,
    /// Metrics collector.
    metrics: MetricsCollector,
}

/// Everything a request handler needs, cloned per connection.
#[derive(Clone)]
struct RequestHandler {
    client_addr: SocketAddr,
    selector: Arc<Selector>,
    proxy_config: Arc<ProxyConfig>,
    metrics: MetricsCollector,
}

impl FrontendListener {
    /// Bind the listening socket.
    pub async fn bind(
        listen: SocketAddr,
        selector: Arc<Selector>,
        proxy_config: ProxyConfig,
        metrics: MetricsCollector,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(listen).await?;

        info!(
            listen = %listener.local_addr()?,
            backends = selector.len(),
            "frontend listener bound"
        );

        Ok(Self {
            listener,
            selector,
            proxy_config: Arc::new(proxy_config),
            metrics,
        })
    }

    /// Address actually bound, useful when listening on port 0.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the listener, accepting connections until shutdown.
    #[instrument(skip_all, fields(listen = ?self.listener.local_addr().ok()))]
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!("frontend listener starting");

        loop {
            tokio::select! {
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, addr)) => {
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!(error = %e, "failed to accept connection");
                        }
                    }
                }

                _ = shutdown.recv() => {
                    info!("frontend listener shutting down");
                    break;
                }
            }
        }
    }

    /// Handle an incoming connection.
    fn handle_connection(&self, stream: TcpStream, client_addr: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            warn!(error = %e, "failed to set TCP_NODELAY on client connection");
        }

        let handler = RequestHandler {
            client_addr,
            selector: Arc::clone(&self.selector),
            proxy_config: Arc::clone(&self.proxy_config),
            metrics: self.metrics.clone(),
        };
        let metrics = self.metrics.clone();
        metrics.connection_opened();

        tokio::spawn(async move {
            let start_time = Instant::now();
            let io = TokioIo::new(stream);

            let service = service_fn(move |req| {
                let handler = handler.clone();
                async move { handler.handle(req).await }
            });

            let result = http1::Builder::new()
                .keep_alive(true)
                .serve_connection(io, service)
                .await;

            metrics.connection_closed();

            let duration = start_time.elapsed();
            match result {
                Ok(()) => debug!(
                    client = %client_addr,
                    duration_ms = duration.as_millis(),
                    "connection completed"
                ),
                Err(e) => warn!(
                    client = %client_addr,
                    duration_ms = duration.as_millis(),
                    error = %e,
                    "connection handling failed"
                ),
            }
        });
    }
}

impl RequestHandler {
    /// Select a backend and forward to it, or answer 503.
    async fn handle(&self, req: Request<Incoming>) -> Result<Response<ProxyBody>, Infallible> {
        let request_id = RequestId::from_headers(req.headers());

        let selection = match self.proxy_config.selection_timeout {
            Some(limit) => match timeout(limit, self.selector.next()).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        request_id = %request_id,
                        timeout_ms = limit.as_millis(),
                        "backend selection timed out"
                    );
                    self.metrics.record_selection(SelectionOutcome::TimedOut);
                    return Ok(error_response(
                        StatusCode::SERVICE_UNAVAILABLE,
                        "Timed out selecting a backend",
                    ));
                }
            },
            None => self.selector.next().await,
        };

        let backend = match selection {
            Ok(backend) => backend,
            Err(SelectError::NoAvailableBackend { attempts }) => {
                warn!(
                    request_id = %request_id,
                    client = %self.client_addr,
                    attempts,
                    "no available backend"
                );
                self.metrics.record_selection(SelectionOutcome::NoBackend);
                return Ok(error_response(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "No available backend",
                ));
            }
        };

        self.metrics.record_selection(SelectionOutcome::Selected);
        info!(
            request_id = %request_id,
            backend = %backend,
            "forwarding request"
        );

        let ctx = ProxyContext {
            client_addr: self.client_addr,
            config: Arc::clone(&self.proxy_config),
            metrics: self.metrics.clone(),
            request_id,
        };

        Ok(proxy_request(req, backend, &ctx).await)
    }
}
