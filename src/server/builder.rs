// ────────────────────────────────
// src/server/builder.rs
// ────────────────────────────────
use super::connection::read_loop;
use super::error::ServerError;
use super::event::{ConnectionId, ServerEvent};
use super::handle::{ServerHandle, ShutdownTrigger};
use super::listener::BoundSocket;
use crate::config::{validate_limits, ConfigError, ServerConfig};
use crate::metrics::MetricsCollector;
use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, OwnedSemaphorePermit, Semaphore};
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Builder so callers can tune the accept/read loops before starting them.
pub struct ServerBuilder {
    socket: BoundSocket,
    backlog: u32,
    buffer_size: usize,
    max_connections: usize,
    event_capacity: usize,
    accept_backoff: Duration,
    metrics: Option<Arc<MetricsCollector>>,
}

impl ServerBuilder {
    pub fn new(socket: BoundSocket) -> Self {
        Self::from_config(socket, &ServerConfig::default())
    }

    pub fn from_config(socket: BoundSocket, config: &ServerConfig) -> Self {
        Self {
            socket,
            backlog: config.backlog,
            buffer_size: config.buffer_size,
            max_connections: config.max_connections,
            event_capacity: config.event_capacity,
            accept_backoff: config.accept_backoff(),
            metrics: None,
        }
    }

    pub fn with_backlog(mut self, backlog: u32) -> Self {
        self.backlog = backlog;
        self
    }

    /// Size of the per-connection read buffer. Each read returns at most
    /// `buffer_size - 1` bytes.
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Upper bound on concurrently running read loops.
    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn with_event_capacity(mut self, event_capacity: usize) -> Self {
        self.event_capacity = event_capacity;
        self
    }

    pub fn with_accept_backoff(mut self, backoff: Duration) -> Self {
        self.accept_backoff = backoff;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        validate_limits(
            self.buffer_size,
            self.backlog,
            self.max_connections,
            self.event_capacity,
        )
    }

    /// Start listening and spawn the accept loop.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(self) -> Result<ServerHandle, ServerError> {
        self.validate()?;

        let local_addr = self.socket.local_addr();
        let listener = self.socket.listen(self.backlog)?;
        info!(
            %local_addr,
            backlog = self.backlog,
            buffer_size = self.buffer_size,
            max_connections = self.max_connections,
            "server listening"
        );

        let (events_tx, events_rx) = mpsc::channel(self.event_capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let acceptor = Acceptor {
            events: events_tx,
            shutdown: shutdown_rx,
            slots: Arc::new(Semaphore::new(self.max_connections)),
            buffer_size: self.buffer_size,
            accept_backoff: self.accept_backoff,
            metrics: self.metrics,
        };
        let accept_task = tokio::spawn(acceptor.run(listener));

        Ok(ServerHandle::new(
            local_addr,
            events_rx,
            ShutdownTrigger::new(shutdown_tx),
            accept_task,
        ))
    }
}

/// Where the accept loop gets its connections from.
#[async_trait]
trait AcceptSource: Send + Sync + 'static {
    type Stream: AsyncRead + Unpin + Send + 'static;

    async fn accept(&self) -> io::Result<(Self::Stream, SocketAddr)>;
}

#[async_trait]
impl AcceptSource for TcpListener {
    type Stream = TcpStream;

    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self).await
    }
}

struct Acceptor {
    events: mpsc::Sender<ServerEvent>,
    shutdown: watch::Receiver<bool>,
    slots: Arc<Semaphore>,
    buffer_size: usize,
    accept_backoff: Duration,
    metrics: Option<Arc<MetricsCollector>>,
}

impl Acceptor {
    async fn run<L: AcceptSource>(self, listener: L) {
        let mut shutdown = self.shutdown.clone();
        let mut next_id = 0u64;

        loop {
            if *shutdown.borrow() {
                break;
            }

            // Wait for a free slot before accepting; excess peers queue in the backlog.
            let permit = tokio::select! {
                permit = self.slots.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            };

            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            };

            match accepted {
                Ok((stream, peer)) => {
                    next_id += 1;
                    let id = ConnectionId(next_id);
                    info!(%peer, %id, "accepted connection");

                    let event = ServerEvent::Accepted {
                        id,
                        address: peer.ip().to_string(),
                        port: peer.port(),
                    };
                    if self.events.send(event).await.is_err() {
                        debug!("event receiver dropped, stopping accept loop");
                        break;
                    }
                    if let Some(metrics) = &self.metrics {
                        metrics.record_accept();
                    }

                    self.spawn_reader(id, stream, permit);
                }
                Err(err) => {
                    warn!(%err, "accept failed");
                    if let Some(metrics) = &self.metrics {
                        metrics.record_accept_error();
                    }
                    drop(permit);
                    tokio::select! {
                        _ = sleep(self.accept_backoff) => {}
                        changed = shutdown.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        }

        info!("accept loop stopped");
    }

    fn spawn_reader<S>(&self, id: ConnectionId, stream: S, permit: OwnedSemaphorePermit)
    where
        S: AsyncRead + Unpin + Send + 'static,
    {
        let events = self.events.clone();
        let shutdown = self.shutdown.clone();
        let metrics = self.metrics.clone();
        let buffer_size = self.buffer_size;

        tokio::spawn(async move {
            let reason = read_loop(
                id,
                stream,
                buffer_size,
                &events,
                shutdown,
                metrics.as_deref(),
            )
            .await;
            if let Some(metrics) = &metrics {
                metrics.record_close(&reason);
            }
            // The slot frees only after `Closed` is queued.
            drop(permit);
        });
    }
}
