// src/server/connection.rs
use super::event::{CloseReason, ConnectionId, ServerEvent};
use crate::config::{MAX_BUFFER_SIZE, MIN_BUFFER_SIZE};
use crate::metrics::MetricsCollector;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace};

/// Read from `stream` until EOF, a read error, or shutdown.
///
/// Every non-empty read becomes one `Data` event holding exactly the bytes
/// read, at most `buffer_size - 1` of them. A single `Closed` event follows
/// on exit and the stream is dropped, which closes the socket.
pub async fn read_loop<S>(
    id: ConnectionId,
    mut stream: S,
    buffer_size: usize,
    events: &mpsc::Sender<ServerEvent>,
    mut shutdown: watch::Receiver<bool>,
    metrics: Option<&MetricsCollector>,
) -> CloseReason
where
    S: AsyncRead + Unpin,
{
    let mut buffer = vec![0u8; buffer_size.clamp(MIN_BUFFER_SIZE, MAX_BUFFER_SIZE)];
    // The last slot stays reserved, as in the classic C read loop.
    let max_read = buffer.len() - 1;

    let reason = loop {
        if *shutdown.borrow() {
            break CloseReason::Shutdown;
        }

        let read = tokio::select! {
            read = stream.read(&mut buffer[..max_read]) => read,
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break CloseReason::Shutdown;
                }
                continue;
            }
        };

        match read {
            Ok(0) => break CloseReason::Eof,
            Ok(n) => {
                trace!(%id, bytes = n, "read");
                if let Some(metrics) = metrics {
                    metrics.record_read(n);
                }
                let event = ServerEvent::Data {
                    id,
                    bytes: buffer[..n].to_vec(),
                };
                if events.send(event).await.is_err() {
                    debug!(%id, "event receiver dropped");
                    break CloseReason::Shutdown;
                }
            }
            Err(err) => break CloseReason::Error(err.to_string()),
        }
    };

    drop(stream);
    debug!(%id, %reason, "connection closed");

    let _ = events
        .send(ServerEvent::Closed {
            id,
            reason: reason.clone(),
        })
        .await;
    reason
}
