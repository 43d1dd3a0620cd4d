//! Listening socket setup.

use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpSocket};

use super::ServerError;

/// Bind and listen on `addr` with an explicit backlog.
///
/// `SO_REUSEADDR` is set so a restarted bridge can rebind while the previous
/// socket lingers in `TIME_WAIT`.
pub fn bind(addr: SocketAddr, backlog: u32) -> Result<TcpListener, ServerError> {
    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4(),
        SocketAddr::V6(_) => TcpSocket::new_v6(),
    }
    .map_err(|source| ServerError::Socket { addr, source })?;

    socket
        .set_reuseaddr(true)
        .map_err(|source| ServerError::Socket { addr, source })?;
    socket
        .bind(addr)
        .map_err(|source| ServerError::Bind { addr, source })?;
    socket
        .listen(backlog)
        .map_err(|source| ServerError::Listen { addr, source })
}
