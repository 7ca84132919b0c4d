// src/server/handler.rs
use super::event::{CloseReason, ConnectionId, ServerEvent};
use async_trait::async_trait;

/// Receives server events one at a time, never concurrently.
#[async_trait]
pub trait ConnectionHandler: Send {
    async fn on_accept(&mut self, id: ConnectionId, address: &str, port: u16);

    async fn on_data(&mut self, id: ConnectionId, data: Vec<u8>);

    async fn on_close(&mut self, _id: ConnectionId, _reason: &CloseReason) {}
}

pub(crate) async fn dispatch<H>(handler: &mut H, event: ServerEvent)
where
    H: ConnectionHandler + ?Sized,
{
    match event {
        ServerEvent::Accepted { id, address, port } => {
            handler.on_accept(id, &address, port).await
        }
        ServerEvent::Data { id, bytes } => handler.on_data(id, bytes).await,
        ServerEvent::Closed { id, reason } => handler.on_close(id, &reason).await,
    }
}

/// Adapts a pair of plain callbacks to `ConnectionHandler`.
pub struct CallbackHandler<A, R> {
    on_accept: A,
    on_read: R,
}

impl<A, R> CallbackHandler<A, R>
where
    A: FnMut(&str, u16) + Send,
    R: FnMut(Vec<u8>) + Send,
{
    pub fn new(on_accept: A, on_read: R) -> Self {
        Self { on_accept, on_read }
    }
}

#[async_trait]
impl<A, R> ConnectionHandler for CallbackHandler<A, R>
where
    A: FnMut(&str, u16) + Send,
    R: FnMut(Vec<u8>) + Send,
{
    async fn on_accept(&mut self, _id: ConnectionId, address: &str, port: u16) {
        (self.on_accept)(address, port);
    }

    async fn on_data(&mut self, _id: ConnectionId, data: Vec<u8>) {
        (self.on_read)(data);
    }
}
