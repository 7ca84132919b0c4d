pub mod builder;
pub mod connection;
pub mod error;
pub mod event;
pub mod handle;
pub mod handler;
pub mod listener;

pub use builder::ServerBuilder;
pub use error::ServerError;
pub use event::{CloseReason, ConnectionId, ServerEvent};
pub use handle::{DispatchHandle, ServerHandle, ShutdownTrigger};
pub use handler::{CallbackHandler, ConnectionHandler};
pub use listener::{bind_tcp, BoundSocket};

/// Listen on `socket` and deliver accepted peers and received bytes to two
/// callbacks. Both run on one dispatch task, one call at a time.
pub fn start_accepting<A, R>(
    socket: BoundSocket,
    backlog: u32,
    on_accept: A,
    on_read: R,
) -> Result<DispatchHandle<CallbackHandler<A, R>>, ServerError>
where
    A: FnMut(&str, u16) + Send + 'static,
    R: FnMut(Vec<u8>) + Send + 'static,
{
    let handle = ServerBuilder::new(socket).with_backlog(backlog).start()?;
    Ok(handle.spawn(CallbackHandler::new(on_accept, on_read)))
}
