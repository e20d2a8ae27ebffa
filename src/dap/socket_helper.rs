//! Port allocation and connection-retry helpers shared by every
//! TCP-based adapter.
use crate::{Error, Result};
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, info};

/// Ask the OS for an unused loopback port.
pub fn find_free_port() -> Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")
        .map_err(|e| Error::SpawnFailed(format!("failed to bind to port: {e}")))?;

    let port = listener
        .local_addr()
        .map_err(|e| Error::SpawnFailed(format!("failed to read local address: {e}")))?
        .port();

    debug!(port, "found free port");
    Ok(port)
}

/// Scan `range` for a port nobody is listening on, starting from
/// `preferred` if it falls inside the range.
pub fn find_free_port_in_range(
    range: std::ops::RangeInclusive<u16>,
    preferred: Option<u16>,
) -> Result<u16> {
    let candidates = preferred
        .filter(|p| range.contains(p))
        .into_iter()
        .chain(range.clone());

    for port in candidates {
        if std::net::TcpListener::bind(("127.0.0.1", port)).is_ok() {
            return Ok(port);
        }
    }

    Err(Error::PortExhausted)
}

/// Retry connecting to `127.0.0.1:port` every 100ms until `timeout`
/// elapses, the way a just-spawned adapter process needs a moment before
/// its listener is up.
pub async fn connect_with_retry(port: u16, timeout: Duration) -> Result<TcpStream> {
    let start = std::time::Instant::now();
    let retry_interval = Duration::from_millis(100);

    info!(port, ?timeout, "connecting to adapter");

    loop {
        match TcpStream::connect(("127.0.0.1", port)).await {
            Ok(stream) => {
                info!(port, elapsed = ?start.elapsed(), "connected to adapter");
                return Ok(stream);
            }
            Err(e) => {
                if start.elapsed() >= timeout {
                    return Err(Error::ConnectFailed(format!(
                        "127.0.0.1:{port} after {timeout:?}: {e}"
                    )));
                }
                tokio::time::sleep(retry_interval).await;
            }
        }
    }
}
