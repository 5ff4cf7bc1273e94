use std::io;
use std::sync::Mutex;
use std::time::Duration;

use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use hyper_util::server::graceful::GracefulShutdown;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower::Service;
use tracing::{debug, error, info, warn};

use crate::recovery;
use crate::router::{self, Services};

/// How long [`Handler::close`] waits for in-flight requests before forcibly
/// destroying the remaining connections, unless overridden at build time.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(30);

/// Budget for the forced teardown itself once the graceful path has been
/// abandoned.
const FORCE_CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Construction failures reported by [`HandlerBuilder::build`]. No handler
/// is produced when any of these occur.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The listener option is mandatory; without it the handler could never
    /// accept a connection.
    #[error("applying listener option: a listening socket is required")]
    MissingListener,

    #[error("applying close timeout option: timeout must be greater than zero")]
    InvalidCloseTimeout,
}

/// Failures surfaced by [`Handler::serve`] and [`Handler::close`].
#[derive(Debug, Error)]
pub enum ServeError {
    #[error("serve http: {0}")]
    Accept(#[source] io::Error),

    /// The listener was already consumed, either by an earlier `serve` call
    /// or by closing the handler before serving.
    #[error("serve http: handler already started or closed")]
    AlreadyStarted,

    /// Graceful shutdown timed out and the forced close did not finish
    /// either; connections may still be open.
    #[error("shutdown http server: connections still open after forced close")]
    ForcedCloseFailed,
}

/// Observable lifecycle of a [`Handler`]. `Closed` is terminal; a handler
/// is not reusable after it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Serving,
    ShuttingDown,
    Closed,
}

/// Accumulates handler parameters. Every setter touches exactly one field,
/// the last write to a field wins, and nothing is validated until
/// [`build`](HandlerBuilder::build).
#[derive(Default)]
pub struct HandlerBuilder {
    bind: Option<String>,
    listener: Option<(TcpListener, String)>,
    close_timeout: Option<Duration>,
    services: Services,
}

impl HandlerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Informational bind address, recorded for operators; the socket
    /// itself arrives through [`listener`](Self::listener).
    pub fn bind(mut self, bind: impl Into<String>) -> Self {
        self.bind = Some(bind.into());
        self
    }

    /// The listening socket the gateway serves on, plus the URL advertised
    /// in the startup log. This option is mandatory.
    pub fn listener(mut self, listener: TcpListener, advertise_url: impl Into<String>) -> Self {
        self.listener = Some((listener, advertise_url.into()));
        self
    }

    /// How long [`Handler::close`] lets in-flight requests drain before
    /// forcing connections closed. Defaults to 30 seconds.
    pub fn close_timeout(mut self, close_timeout: Duration) -> Self {
        self.close_timeout = Some(close_timeout);
        self
    }

    /// Mount the metadata directory service under
    /// [`MDS_PREFIX`](crate::router::MDS_PREFIX).
    pub fn mds(mut self, service: Router) -> Self {
        self.services.mds = Some(service);
        self
    }

    /// Mount the write-ahead logger under
    /// [`WRITELOGGER_PREFIX`](crate::router::WRITELOGGER_PREFIX).
    pub fn writelogger(mut self, service: Router) -> Self {
        self.services.writelogger = Some(service);
        self
    }

    /// Mount the snapshot manager under
    /// [`SNAPSHOTTER_PREFIX`](crate::router::SNAPSHOTTER_PREFIX).
    pub fn snapshotter(mut self, service: Router) -> Self {
        self.services.snapshotter = Some(service);
        self
    }

    /// Mount the query engine under
    /// [`QUERYER_PREFIX`](crate::router::QUERYER_PREFIX).
    pub fn queryer(mut self, service: Router) -> Self {
        self.services.queryer = Some(service);
        self
    }

    /// Mount a generic computer handler under
    /// [`COMPUTER_PREFIX`](crate::router::COMPUTER_PREFIX).
    pub fn computer(mut self, service: Router) -> Self {
        self.services.computer = Some(service);
        self
    }

    /// Validates the accumulated options and freezes the routing table.
    /// Fails without producing a handler if any option is unusable.
    pub fn build(self) -> Result<Handler, BuildError> {
        let (listener, url) = self.listener.ok_or(BuildError::MissingListener)?;
        let close_timeout = self.close_timeout.unwrap_or(DEFAULT_CLOSE_TIMEOUT);
        if close_timeout.is_zero() {
            return Err(BuildError::InvalidCloseTimeout);
        }

        recovery::install_panic_hook();

        Ok(Handler {
            bind: self.bind.unwrap_or_default(),
            url,
            close_timeout,
            app: router::router(self.services),
            listener: Mutex::new(Some(listener)),
            shutdown: CancellationToken::new(),
            force: CancellationToken::new(),
            state: watch::Sender::new(LifecycleState::Idle),
        })
    }
}

/// The HTTP front door: owns the accept loop over a socket that was opened
/// elsewhere, dispatches by path prefix to the services configured at build
/// time, and shuts the whole thing down within a bounded grace period.
#[derive(Debug)]
pub struct Handler {
    bind: String,
    url: String,
    close_timeout: Duration,

    // frozen at build; safe to clone per connection
    app: Router,

    // consumed by the first serve() or by close-before-serve
    listener: Mutex<Option<TcpListener>>,

    shutdown: CancellationToken,
    force: CancellationToken,
    state: watch::Sender<LifecycleState>,
}

impl Handler {
    pub fn builder() -> HandlerBuilder {
        HandlerBuilder::new()
    }

    /// The configured bind address. Informational only; the handler never
    /// opens a socket with it.
    pub fn bind(&self) -> &str {
        &self.bind
    }

    /// The URL advertised when serving starts.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Runs the accept loop until [`close`](Self::close) asks it to stop.
    /// Being asked to stop is success; any other way out of the loop is
    /// logged and returned as an error. Blocks through the drain, so the
    /// caller sees `Closed` once this returns.
    pub async fn serve(&self) -> Result<(), ServeError> {
        let listener = self
            .listener
            .lock()
            .expect("listener lock poisoned")
            .take()
            .ok_or(ServeError::AlreadyStarted)?;

        self.state.send_replace(LifecycleState::Serving);
        info!("http gateway listening on {}", self.url);

        let builder = AutoBuilder::new(TokioExecutor::new());
        let graceful = GracefulShutdown::new();
        let connections = TaskTracker::new();

        let result = loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (socket, _remote_addr) = match accepted {
                        Ok(connection) => connection,
                        Err(e) if is_transient(&e) => {
                            warn!("failed to accept connection: {e}");
                            continue;
                        }
                        Err(e) => {
                            error!("http gateway terminated with error: {e}");
                            break Err(ServeError::Accept(e));
                        }
                    };

                    // Match axum default: set TCP_NODELAY for low-latency
                    if let Err(e) = socket.set_nodelay(true) {
                        warn!("failed to set TCP_NODELAY: {e}");
                    }

                    let app = self.app.clone();
                    let service = hyper::service::service_fn(
                        move |request: hyper::Request<hyper::body::Incoming>| {
                            let mut app = app.clone();
                            let request = request.map(axum::body::Body::new);
                            async move { app.call(request).await }
                        },
                    );

                    let connection = builder
                        .serve_connection_with_upgrades(TokioIo::new(socket), service);
                    let connection = graceful.watch(connection.into_owned());

                    let force = self.force.clone();
                    connections.spawn(async move {
                        tokio::select! {
                            served = connection => {
                                if let Err(e) = served {
                                    debug!("connection closed: {e}");
                                }
                            }
                            // dropping the connection future resets the socket
                            _ = force.cancelled() => {}
                        }
                    });
                }
                _ = self.shutdown.cancelled() => break Ok(()),
            }
        };

        // Stop accepting immediately, then let in-flight requests finish
        // naturally. close() fires `force` if this outlives its budget.
        drop(listener);
        self.state.send_replace(LifecycleState::ShuttingDown);

        tokio::select! {
            _ = graceful.shutdown() => {}
            _ = self.force.cancelled() => {}
        }

        connections.close();
        connections.wait().await;

        self.state.send_replace(LifecycleState::Closed);
        result
    }

    /// Stops accepting connections and waits up to the configured close
    /// timeout for in-flight requests to drain; past that, the remaining
    /// connections are forcibly destroyed. A timed-out graceful phase is
    /// still success; only a failed forced close is an error.
    pub async fn close(&self) -> Result<(), ServeError> {
        if self
            .listener
            .lock()
            .expect("listener lock poisoned")
            .take()
            .is_some()
        {
            // serve() never ran; just release the socket
            self.shutdown.cancel();
            self.state.send_replace(LifecycleState::Closed);
            return Ok(());
        }

        let mut state = self.state.subscribe();
        self.shutdown.cancel();

        match timeout(
            self.close_timeout,
            state.wait_for(|s| *s == LifecycleState::Closed),
        )
        .await
        {
            Ok(Ok(_)) => return Ok(()),
            Ok(Err(_)) | Err(_) => {}
        }

        warn!(
            "graceful shutdown did not finish within {:?}, destroying open connections",
            self.close_timeout
        );
        self.force.cancel();

        let result = match timeout(
            FORCE_CLOSE_GRACE,
            state.wait_for(|s| *s == LifecycleState::Closed),
        )
        .await
        {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) | Err(_) => Err(ServeError::ForcedCloseFailed),
        };
        result
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
    )
}
