// src/server/handle.rs
use super::event::ServerEvent;
use super::handler::{dispatch, ConnectionHandler};
use futures::Stream;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info, trace};

/// Stops a running server. Cheap to clone and hand to a signal task.
#[derive(Clone)]
pub struct ShutdownTrigger {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownTrigger {
    pub(crate) fn new(tx: watch::Sender<bool>) -> Self {
        Self { tx: Arc::new(tx) }
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.tx.borrow()
    }
}

/// A running server.
///
/// Events arrive on a single channel, so consuming them through
/// `next_event`, the `Stream` impl, or `run` serializes every delivery.
/// The stream ends once shutdown has been requested and every read loop has
/// exited. Dropping the handle also stops the server.
pub struct ServerHandle {
    local_addr: SocketAddr,
    events: mpsc::Receiver<ServerEvent>,
    shutdown: ShutdownTrigger,
    accept_task: JoinHandle<()>,
}

impl ServerHandle {
    pub(crate) fn new(
        local_addr: SocketAddr,
        events: mpsc::Receiver<ServerEvent>,
        shutdown: ShutdownTrigger,
        accept_task: JoinHandle<()>,
    ) -> Self {
        Self {
            local_addr,
            events,
            shutdown,
            accept_task,
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn next_event(&mut self) -> Option<ServerEvent> {
        self.events.recv().await
    }

    pub fn shutdown(&self) {
        if self.shutdown.is_shutdown() {
            return;
        }
        info!(addr = %self.local_addr, "server shutdown requested");
        self.shutdown.shutdown();
    }

    pub fn shutdown_trigger(&self) -> ShutdownTrigger {
        self.shutdown.clone()
    }

    /// Feed every event to `handler` until the server stops, then hand the
    /// handler back.
    pub async fn run<H: ConnectionHandler>(mut self, mut handler: H) -> H {
        while let Some(event) = self.events.recv().await {
            trace!(id = %event.connection(), "dispatching event");
            dispatch(&mut handler, event).await;
        }
        if let Err(err) = (&mut self.accept_task).await {
            error!(%err, "accept task failed");
        }
        handler
    }

    /// Run `handler` on its own task.
    pub fn spawn<H>(self, handler: H) -> DispatchHandle<H>
    where
        H: ConnectionHandler + 'static,
    {
        let local_addr = self.local_addr;
        let shutdown = self.shutdown.clone();
        let task = tokio::spawn(self.run(handler));
        DispatchHandle {
            local_addr,
            shutdown,
            task,
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        // Outstanding `ShutdownTrigger` clones would otherwise keep it running.
        self.shutdown();
    }
}

impl Stream for ServerHandle {
    type Item = ServerEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().events.poll_recv(cx)
    }
}

/// A server whose events are being dispatched to a handler on a
/// background task.
pub struct DispatchHandle<H> {
    local_addr: SocketAddr,
    shutdown: ShutdownTrigger,
    task: JoinHandle<H>,
}

impl<H> DispatchHandle<H> {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown(&self) {
        self.shutdown.shutdown();
    }

    /// Wait for dispatching to finish and get the handler back.
    pub async fn finish(self) -> Result<H, JoinError> {
        self.task.await
    }
}
