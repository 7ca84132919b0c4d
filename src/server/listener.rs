// ────────────────────────────────
// src/server/listener.rs
// Low-level IPv4 socket setup: bind now, listen later with an explicit backlog.
// ────────────────────────────────
use super::error::ServerError;
use std::net::{Ipv4Addr, SocketAddr};
use tokio::net::{TcpListener, TcpSocket};

/// An IPv4 stream socket bound to `0.0.0.0:<port>` that is not listening yet.
#[derive(Debug)]
pub struct BoundSocket {
    socket: TcpSocket,
    local_addr: SocketAddr,
}

impl BoundSocket {
    /// The bound address. Reports the real port when bound to port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Must be called from within a Tokio runtime.
    pub(crate) fn listen(self, backlog: u32) -> Result<TcpListener, ServerError> {
        self.socket.listen(backlog).map_err(ServerError::Listen)
    }
}

/// Create an IPv4 TCP socket and bind it to the wildcard address.
pub fn bind_tcp(port: u16) -> Result<BoundSocket, ServerError> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    let bind_err = |source: std::io::Error| ServerError::Bind { port, source };

    let socket = TcpSocket::new_v4().map_err(bind_err)?;
    socket.bind(addr).map_err(bind_err)?;
    let local_addr = socket.local_addr().map_err(ServerError::LocalAddr)?;

    tracing::debug!(%local_addr, "bound server socket");
    Ok(BoundSocket { socket, local_addr })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_ephemeral_port() {
        let socket = bind_tcp(0).unwrap();
        assert_ne!(socket.port(), 0);
        assert!(socket.local_addr().ip().is_unspecified());
        assert!(socket.local_addr().is_ipv4());
    }

    #[test]
    fn test_bind_port_in_use() {
        let taken = std::net::TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0)).unwrap();
        let port = taken.local_addr().unwrap().port();

        match bind_tcp(port) {
            Err(ServerError::Bind { port: p, source }) => {
                assert_eq!(p, port);
                assert_eq!(source.kind(), std::io::ErrorKind::AddrInUse);
            }
            other => panic!("expected bind error, got {:?}", other),
        }
    }
}
