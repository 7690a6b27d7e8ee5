//! HTTP listener component.
//!
//! # Responsibilities
//! - Collect route handlers until the listener starts
//! - Build the Axum router, wrap it in the default middleware
//! - Bind (ephemeral ports included), serve until stopped
//! - Rebind in place on reload without ever holding two sockets
//!
//! # Design Decisions
//! - A listener with no handlers is disabled: `run` returns at once
//! - Start, stop and reload are serialized by one async mutex
//! - The bound port sits behind its own mutex so readers never wait on a reload
//! - `run` watches the serve status instead of the server task, so it keeps
//!   waiting across reloads
//! - Every connection is a task in a `JoinSet` owned by the serve task;
//!   aborting the serve task after the grace period drops them all

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use axum::routing::MethodRouter;
use axum::Router;
use parking_lot::Mutex;
use thiserror::Error;
use axum::serve::Listener as _;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use tokio::sync::{oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::Instrument;

use super::middleware;
use crate::component::{Component, ComponentError, StopError, StopHandle};
use crate::config::{ConfigView, FlagError, ListenerConfig, ScopedFlags};
use crate::net::{format_bind_addr, KeepAliveListener};

/// Name (and prefix) of a listener built with [`HttpListener::default`].
pub const DEFAULT_LISTENER_NAME: &str = "http";

type RouteInstaller = Arc<dyn Fn(Router) -> Router + Send + Sync>;

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Handlers can only be added before `run`.
    #[error("handlers cannot be added after the listener has started")]
    HandlersFrozen,

    /// `run` was called while a server is already live.
    #[error("listener is already running")]
    AlreadyRunning,

    /// The socket could not be bound.
    #[error("failed to bind {address}: {source}")]
    Bind {
        /// The formatted `host:port`.
        address: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The server stopped with an error.
    #[error("server error: {0}")]
    Serve(#[source] io::Error),
}

impl From<ListenerError> for ComponentError {
    fn from(e: ListenerError) -> Self {
        ComponentError::other(e)
    }
}

/// Observable serve state, published through a watch channel.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ServeStatus {
    Idle,
    Serving(SocketAddr),
    Reloading,
    Stopped,
    Failed(String),
}

impl ServeStatus {
    fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Failed(_))
    }
}

#[derive(Default)]
struct Handlers {
    installers: Vec<RouteInstaller>,
    frozen: bool,
}

struct ServerHandle {
    addr: SocketAddr,
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

struct Inner {
    name: String,
    prefix: String,
    config: ArcSwap<ListenerConfig>,
    port: Mutex<u16>,
    handlers: Mutex<Handlers>,
    enabled: AtomicBool,
    server: tokio::sync::Mutex<Option<ServerHandle>>,
    status: watch::Sender<ServeStatus>,
}

/// A bindable HTTP endpoint hosted as a component.
///
/// Cheap to clone; clones share the same server. Register one clone with the
/// registry and keep another to add handlers or reload.
#[derive(Clone)]
pub struct HttpListener {
    inner: Arc<Inner>,
}

impl HttpListener {
    /// A listener whose name and prefix are both `name`.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::with_prefix(name.clone(), name)
    }

    /// A listener with a distinct configuration prefix.
    pub fn with_prefix(name: impl Into<String>, prefix: impl Into<String>) -> Self {
        let config = ListenerConfig::default();
        let (status, _) = watch::channel(ServeStatus::Idle);
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                prefix: prefix.into(),
                port: Mutex::new(config.port),
                config: ArcSwap::from_pointee(config),
                handlers: Mutex::new(Handlers::default()),
                enabled: AtomicBool::new(false),
                server: tokio::sync::Mutex::new(None),
                status,
            }),
        }
    }

    /// Replace the configuration before the listener runs.
    ///
    /// Use this when driving the listener without a host; `configure`
    /// does the same from resolved options.
    pub fn with_config(self, config: ListenerConfig) -> Self {
        self.inner.apply_config(config);
        self
    }

    /// Add a route installer. Enables the listener.
    ///
    /// Rejected with [`ListenerError::HandlersFrozen`] once `run` has started.
    pub fn add_handler<F>(&self, install: F) -> Result<(), ListenerError>
    where
        F: Fn(Router) -> Router + Send + Sync + 'static,
    {
        let mut handlers = self.inner.handlers.lock();
        if handlers.frozen {
            tracing::warn!(listener = %self.inner.name, "Handler added after start was rejected");
            return Err(ListenerError::HandlersFrozen);
        }
        handlers.installers.push(Arc::new(install));
        self.inner.enabled.store(true, Ordering::Release);
        Ok(())
    }

    /// Add a single route. Shorthand for [`add_handler`](Self::add_handler).
    pub fn route(&self, path: &str, method_router: MethodRouter) -> Result<(), ListenerError> {
        let path = path.to_string();
        self.add_handler(move |router| router.route(&path, method_router.clone()))
    }

    /// Whether any handler has been added.
    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Acquire)
    }

    /// The bound port, or the configured one when not serving.
    pub fn port(&self) -> u16 {
        *self.inner.port.lock()
    }

    /// The bound socket address while serving.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &*self.inner.status.borrow() {
            ServeStatus::Serving(addr) => Some(*addr),
            _ => None,
        }
    }

    /// Base URL clients can use to reach this listener.
    pub fn uri(&self) -> String {
        let config = self.inner.config.load();
        let host = match config.bind_address.as_str() {
            "" | "0.0.0.0" => "127.0.0.1",
            "::" | "[::]" => "::1",
            other => other,
        };
        format!("http://{}", format_bind_addr(host, self.port()))
    }

    /// Snapshot of the active configuration.
    pub fn config(&self) -> Arc<ListenerConfig> {
        self.inner.config.load_full()
    }

    /// Whether a server is currently accepting connections.
    pub fn is_running(&self) -> bool {
        matches!(*self.inner.status.borrow(), ServeStatus::Serving(_))
    }

    /// Rebind with `config`.
    ///
    /// Closes the current server and waits for its socket to be released
    /// before binding again. When not serving, only stores the configuration.
    pub async fn reload(&self, config: ListenerConfig) -> Result<(), ListenerError> {
        let mut server = self.inner.server.lock().await;
        let Some(current) = server.take() else {
            self.inner.apply_config(config);
            tracing::debug!(listener = %self.inner.name, "Configuration stored for next start");
            return Ok(());
        };

        let previous = current.addr;
        self.inner.status.send_replace(ServeStatus::Reloading);
        if let Err(e) = self.inner.close(current).await {
            tracing::warn!(listener = %self.inner.name, error = %e, "Previous server did not close cleanly");
        }

        // The bound port is published by `start`; until then readers keep the old one.
        self.inner.config.store(Arc::new(config));
        match self.inner.start().await {
            Ok(next) => {
                tracing::info!(
                    listener = %self.inner.name,
                    from = %previous,
                    to = %next.addr,
                    "Listener reloaded"
                );
                *server = Some(next);
                Ok(())
            }
            Err(e) => {
                tracing::error!(listener = %self.inner.name, error = %e, "Reload failed");
                *self.inner.port.lock() = self.inner.config.load().port;
                self.inner.status.send_replace(ServeStatus::Failed(e.to_string()));
                Err(e)
            }
        }
    }
}

impl Default for HttpListener {
    fn default() -> Self {
        Self::new(DEFAULT_LISTENER_NAME)
    }
}

impl std::fmt::Debug for HttpListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpListener")
            .field("name", &self.inner.name)
            .field("prefix", &self.inner.prefix)
            .field("port", &self.port())
            .field("status", &*self.inner.status.borrow())
            .finish()
    }
}

impl Inner {
    fn apply_config(&self, config: ListenerConfig) {
        *self.port.lock() = config.port;
        self.config.store(Arc::new(config));
    }

    fn router(&self, config: &ListenerConfig) -> Router {
        let installers = self.handlers.lock().installers.clone();
        let router = installers
            .iter()
            .fold(Router::new(), |router, install| install(router));
        middleware::apply(router, config)
    }

    /// Bind and spawn a server. Caller holds the server lock.
    async fn start(self: &Arc<Self>) -> Result<ServerHandle, ListenerError> {
        let config = self.config.load_full();
        let address = format_bind_addr(&config.bind_address, config.port);
        let bind_error = |source| ListenerError::Bind {
            address: address.clone(),
            source,
        };

        let listener = KeepAliveListener::bind(&self.name, &address)
            .await
            .map_err(bind_error)?;
        let addr = listener.local_addr().map_err(bind_error)?;
        *self.port.lock() = addr.port();

        let app = self.router(&config);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        self.status.send_replace(ServeStatus::Serving(addr));

        let span = tracing::info_span!("serve", listener = %self.name, address = %addr);
        let task = tokio::spawn(serve(listener, app, shutdown_rx).instrument(span));

        tracing::info!(
            listener = %self.name,
            address = %addr,
            requested_port = config.port,
            "Listener serving"
        );
        Ok(ServerHandle {
            addr,
            shutdown_tx,
            task,
        })
    }

    /// Stop accepting, let in-flight requests finish within the grace period.
    async fn close(&self, handle: ServerHandle) -> Result<(), StopError> {
        let grace = self.config.load().shutdown_grace;
        let ServerHandle {
            addr,
            shutdown_tx,
            mut task,
        } = handle;
        let _ = shutdown_tx.send(());

        match tokio::time::timeout(grace, &mut task).await {
            Ok(Ok(())) => {
                tracing::info!(listener = %self.name, address = %addr, "Listener closed");
                Ok(())
            }
            Ok(Err(e)) => Err(StopError::Failed(e.to_string())),
            Err(_) => {
                tracing::warn!(listener = %self.name, address = %addr, ?grace, "Grace period exceeded, aborting");
                // Dropping the serve task drops its JoinSet, which aborts every connection.
                task.abort();
                let _ = task.await;
                Err(StopError::GraceExceeded { grace })
            }
        }
    }

    async fn halt(&self) -> Result<(), StopError> {
        let mut server = self.server.lock().await;
        let outcome = match server.take() {
            Some(handle) => self.close(handle).await,
            None => Ok(()),
        };
        self.status.send_replace(ServeStatus::Stopped);
        outcome
    }
}

/// Accept until `shutdown` fires, then drain open connections.
///
/// Connections are told to finish their current request and close. The
/// caller bounds the drain by aborting this task.
async fn serve(mut listener: KeepAliveListener, router: Router, mut shutdown: oneshot::Receiver<()>) {
    let (draining_tx, draining_rx) = watch::channel(false);
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            (stream, peer) = listener.accept() => {
                let service = TowerToHyperService::new(router.clone());
                let draining = draining_rx.clone();
                let conn = serve_connection(TokioIo::new(stream), peer, service, draining);
                connections.spawn(conn.in_current_span());
            }
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            _ = &mut shutdown => break,
        }
    }

    drop(listener);
    let _ = draining_tx.send(true);
    tracing::debug!(open = connections.len(), "Draining connections");
    while connections.join_next().await.is_some() {}
}

async fn serve_connection(
    io: TokioIo<tokio::net::TcpStream>,
    peer: SocketAddr,
    service: TowerToHyperService<Router>,
    mut draining: watch::Receiver<bool>,
) {
    let builder = auto::Builder::new(TokioExecutor::new());
    let conn = builder.serve_connection_with_upgrades(io, service);
    tokio::pin!(conn);

    tokio::select! {
        result = conn.as_mut() => {
            if let Err(e) = result {
                tracing::debug!(peer_addr = %peer, error = %e, "Connection ended with an error");
            }
            return;
        }
        _ = draining.changed() => {}
    }

    conn.as_mut().graceful_shutdown();
    if let Err(e) = conn.await {
        tracing::debug!(peer_addr = %peer, error = %e, "Connection ended with an error while draining");
    }
}

#[async_trait]
impl Component for HttpListener {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn prefix(&self) -> &str {
        &self.inner.prefix
    }

    fn init_flags(&self, flags: &mut ScopedFlags<'_>) -> Result<(), FlagError> {
        ListenerConfig::register(flags)
    }

    fn configure(&self, config: &ConfigView<'_>) -> Result<(), ComponentError> {
        let config = ListenerConfig::from_view(config)?;
        tracing::debug!(port = config.port, bind_address = %config.bind_address, "Listener configured");
        self.inner.apply_config(config);
        Ok(())
    }

    async fn run(&self) -> Result<(), ComponentError> {
        if !self.is_enabled() {
            tracing::info!("No handlers registered, listener disabled");
            return Ok(());
        }
        self.inner.handlers.lock().frozen = true;

        {
            let mut server = self.inner.server.lock().await;
            if server.is_some() {
                return Err(ListenerError::AlreadyRunning.into());
            }
            let stopped = self.inner.status.borrow().is_terminal();
            if stopped {
                tracing::debug!("Listener stopped before it started");
                return Ok(());
            }
            *server = Some(self.inner.start().await?);
        }

        let mut status = self.inner.status.subscribe();
        let terminal = match status.wait_for(ServeStatus::is_terminal).await {
            Ok(current) => current.clone(),
            Err(_) => ServeStatus::Stopped,
        };
        match terminal {
            ServeStatus::Failed(msg) => Err(ListenerError::Serve(io::Error::other(msg)).into()),
            _ => Ok(()),
        }
    }

    fn stop(&self) -> StopHandle {
        let inner = Arc::clone(&self.inner);
        StopHandle::spawn(async move { inner.halt().await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;

    fn local(port: u16) -> ListenerConfig {
        ListenerConfig {
            port,
            bind_address: "127.0.0.1".into(),
            ..ListenerConfig::default()
        }
    }

    #[test]
    fn port_defaults_to_configured_value() {
        let listener = HttpListener::default();
        assert_eq!(listener.name(), "http");
        assert_eq!(listener.port(), 3000);
        assert_eq!(listener.uri(), "http://127.0.0.1:3000");

        let listener = listener.with_config(local(8081));
        assert_eq!(listener.port(), 8081);
        assert!(!listener.is_running());
    }

    #[test]
    fn uri_brackets_ipv6() {
        let listener = HttpListener::new("v6").with_config(ListenerConfig {
            port: 9000,
            bind_address: "::1".into(),
            ..ListenerConfig::default()
        });
        assert_eq!(listener.uri(), "http://[::1]:9000");
    }

    #[tokio::test]
    async fn disabled_listener_returns_immediately() {
        let listener = HttpListener::default();
        assert!(!listener.is_enabled());
        listener.run().await.unwrap();
        assert!(!listener.is_running());
        listener.stop().await.unwrap();
    }

    #[tokio::test]
    async fn handlers_freeze_once_running() {
        let listener = HttpListener::new("api").with_config(local(0));
        listener.route("/ping", get(|| async { "pong" })).unwrap();
        assert!(listener.is_enabled());

        let runner = listener.clone();
        let run = tokio::spawn(async move { runner.run().await });
        while !listener.is_running() {
            tokio::task::yield_now().await;
        }

        assert!(matches!(
            listener.route("/late", get(|| async { "late" })),
            Err(ListenerError::HandlersFrozen)
        ));
        assert_ne!(listener.port(), 0);

        listener.stop().await.unwrap();
        run.await.unwrap().unwrap();
        assert!(!listener.is_running());
    }

    #[tokio::test]
    async fn bind_conflict_is_reported() {
        let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = occupied.local_addr().unwrap().port();

        let listener = HttpListener::new("api").with_config(local(port));
        listener.route("/", get(|| async { "" })).unwrap();

        let err = listener.run().await.unwrap_err();
        assert!(err.to_string().contains(&format!("127.0.0.1:{port}")));
    }

    #[tokio::test]
    async fn reload_while_idle_only_stores_config() {
        let listener = HttpListener::new("api").with_config(local(0));
        listener.reload(local(4321)).await.unwrap();
        assert_eq!(listener.port(), 4321);
        assert!(!listener.is_running());
    }
}
