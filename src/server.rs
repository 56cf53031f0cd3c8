//! Connection handling shared by all listeners
//!
//! Every listener in this crate (collector, notifier, gateway) goes through
//! the same accept loop:
//!
//! ```text
//! accept → [TLS handshake + client identity] → HTTP/1.1 connection → axum Router
//!              (read timeout)                    (header read / idle timeouts)
//! ```
//!
//! Handler completion is bounded separately by the collector's and gateway's
//! timeout layers (the notifier only bounds its body read), and request
//! bodies are capped by each router's body limit.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    extract::rejection::BytesRejection,
    http::{Method, Request, StatusCode},
    response::{IntoResponse, Response},
};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper_util::rt::{TokioIo, TokioTimer};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_rustls::TlsAcceptor;
use tower::ServiceExt;
use tracing::{debug, error, info, trace, warn};

use crate::tls::ClientIdentity;

/// Transport level timeouts for one listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportTimeouts {
    /// TLS handshake and request header read
    pub read: Duration,

    /// Handler completion, including reading the body and writing the response
    pub write: Duration,

    /// Keep-alive connections without an in-flight request are closed after this
    pub idle: Duration,
}

impl TransportTimeouts {
    /// Bounds for the agent-facing collector
    pub fn collector() -> Self {
        Self {
            read: Duration::from_secs(10),
            write: Duration::from_secs(10),
            idle: Duration::from_secs(30),
        }
    }

    /// Bounds for the plain HTTP listeners (notifier, gateway)
    pub fn http() -> Self {
        Self {
            read: Duration::from_secs(5),
            write: Duration::from_secs(5),
            idle: Duration::from_secs(15),
        }
    }
}

/// A bound listener serving connections in a background task
#[derive(Debug)]
pub struct Listening {
    addr: SocketAddr,
    task: JoinHandle<()>,
}

impl Listening {
    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Wait for the accept loop to end
    pub async fn wait(self) {
        if let Err(e) = self.task.await
            && !e.is_cancelled()
        {
            error!("accept loop terminated: {e}");
        }
    }

    /// Stop accepting new connections
    pub fn shutdown(&self) {
        self.task.abort();
    }
}

/// Serve `app` on `listener`, optionally terminating TLS first
///
/// When `tls` is set, every request carries the peer's [`ClientIdentity`] as a
/// request extension. Handshake failures never reach the router.
pub fn spawn(
    listener: TcpListener,
    app: Router,
    tls: Option<TlsAcceptor>,
    timeouts: TransportTimeouts,
) -> std::io::Result<Listening> {
    let addr = listener.local_addr()?;
    let task = tokio::spawn(accept_loop(listener, app, tls, timeouts));
    Ok(Listening { addr, task })
}

async fn accept_loop(
    listener: TcpListener,
    app: Router,
    tls: Option<TlsAcceptor>,
    timeouts: TransportTimeouts,
) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("failed to accept connection: {e}");
                tokio::time::sleep(Duration::from_millis(50)).await;
                continue;
            }
        };
        trace!("accepted connection from {peer}");

        let app = app.clone();
        let tls = tls.clone();

        tokio::spawn(async move {
            match tls {
                None => serve_connection(stream, app, None, timeouts).await,
                Some(acceptor) => {
                    let handshake =
                        tokio::time::timeout(timeouts.read, acceptor.accept(stream)).await;

                    let stream = match handshake {
                        Ok(Ok(stream)) => stream,
                        Ok(Err(e)) => {
                            debug!("TLS handshake with {peer} failed: {e}");
                            return;
                        }
                        Err(_) => {
                            debug!("TLS handshake with {peer} timed out");
                            return;
                        }
                    };

                    let identity =
                        ClientIdentity::from_peer_chain(stream.get_ref().1.peer_certificates());
                    trace!("{peer} authenticated as {:?}", identity.names());

                    serve_connection(stream, app, Some(identity), timeouts).await
                }
            }
        });
    }
}

/// Tracks in-flight requests and the last moment the connection was busy
#[derive(Debug)]
struct Activity {
    started: Instant,
    in_flight: AtomicUsize,
    last_active_ms: AtomicU64,
}

impl Activity {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            in_flight: AtomicUsize::new(0),
            last_active_ms: AtomicU64::new(0),
        }
    }

    fn touch(&self) {
        let elapsed = self.started.elapsed().as_millis() as u64;
        self.last_active_ms.store(elapsed, Ordering::Relaxed);
    }

    fn begin(&self) {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        self.touch();
    }

    fn end(&self) {
        self.touch();
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }

    fn idle_deadline(&self, idle: Duration) -> Instant {
        self.started + Duration::from_millis(self.last_active_ms.load(Ordering::Relaxed)) + idle
    }

    /// Resolves once the connection has been idle for `idle`
    async fn idle_for(&self, idle: Duration) {
        loop {
            let deadline = self.idle_deadline(idle);
            if Instant::now() < deadline {
                tokio::time::sleep_until(deadline).await;
                continue;
            }

            if self.in_flight.load(Ordering::Acquire) == 0 {
                return;
            }

            // still busy; look again once another idle period has passed
            tokio::time::sleep(idle).await;
        }
    }
}

async fn serve_connection<S>(
    stream: S,
    app: Router,
    identity: Option<ClientIdentity>,
    timeouts: TransportTimeouts,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let activity = Arc::new(Activity::new());

    let service = {
        let activity = activity.clone();
        hyper::service::service_fn(move |mut request: Request<Incoming>| {
            let app = app.clone();
            let activity = activity.clone();
            if let Some(identity) = &identity {
                request.extensions_mut().insert(identity.clone());
            }

            async move {
                activity.begin();
                let response = app.oneshot(request.map(Body::new)).await;
                activity.end();
                response
            }
        })
    };

    let connection = http1::Builder::new()
        .timer(TokioTimer::new())
        .header_read_timeout(timeouts.read)
        .keep_alive(true)
        .serve_connection(TokioIo::new(stream), service);
    tokio::pin!(connection);

    tokio::select! {
        result = connection.as_mut() => {
            if let Err(e) = result {
                debug!("connection closed with error: {e}");
            }
        }
        _ = activity.idle_for(timeouts.idle) => {
            trace!("closing idle connection");
            connection.as_mut().graceful_shutdown();
            if let Err(e) = connection.await {
                debug!("error while closing idle connection: {e}");
            }
        }
    }
}

/// Bind `addr` and log where we ended up listening
pub async fn bind(addr: SocketAddr, what: &str) -> std::io::Result<TcpListener> {
    let listener = TcpListener::bind(addr).await?;
    info!("{what} listening on {}", listener.local_addr()?);
    Ok(listener)
}

// ============================================================================
// Shared fallbacks for the write endpoints
// ============================================================================

/// Router fallback for unknown paths
pub async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "404 page not found")
}

/// Method fallback for the POST-only endpoints
pub async fn method_not_allowed() -> (StatusCode, &'static str) {
    (StatusCode::METHOD_NOT_ALLOWED, "Only POST allowed")
}

/// Router fallback that judges the method before the path
///
/// Anything but POST is a `405` wherever it was sent; a POST to an unknown
/// path is a `404`.
pub async fn post_only_fallback(method: Method) -> (StatusCode, &'static str) {
    if method == Method::POST {
        not_found().await
    } else {
        method_not_allowed().await
    }
}

/// Map a failed body read to a short plaintext response
///
/// Oversized bodies keep their `413`; everything else is a `400`.
pub fn body_rejection(rejection: BytesRejection) -> Response {
    let status = rejection.status();
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        (status, "Request body too large").into_response()
    } else {
        (StatusCode::BAD_REQUEST, "Unable to read request body").into_response()
    }
}
