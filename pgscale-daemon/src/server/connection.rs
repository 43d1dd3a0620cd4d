//! Reading a request from and writing a response to one client.

use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time;
use tracing::{debug, warn};

use pgscale_core::response::Response;

/// Perform a single bounded read of at most `capacity` bytes.
///
/// Read errors and timeouts are logged and yield an empty buffer, which the
/// pipeline answers with a bad-request response.
pub async fn read_request<R>(stream: &mut R, capacity: usize, timeout: Option<Duration>) -> Vec<u8>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; capacity];

    let read = match timeout {
        Some(limit) => match time::timeout(limit, stream.read(&mut buf)).await {
            Ok(read) => read,
            Err(_) => {
                warn!("No request received within {:?}", limit);
                return Vec::new();
            }
        },
        None => stream.read(&mut buf).await,
    };

    match read {
        Ok(n) => {
            buf.truncate(n);
            buf
        }
        Err(e) => {
            warn!("Can't receive: {}", e);
            Vec::new()
        }
    }
}

/// Write the whole response and shut down the write side.
///
/// Failures are logged only; the caller drops the stream either way.
pub async fn write_response<W>(stream: &mut W, response: &Response)
where
    W: AsyncWrite + Unpin,
{
    let bytes = response.to_bytes();
    if let Err(e) = stream.write_all(&bytes).await {
        warn!("Failed to send response: {}", e);
    }
    if let Err(e) = stream.shutdown().await {
        debug!("Failed to shut down connection: {}", e);
    }
}
