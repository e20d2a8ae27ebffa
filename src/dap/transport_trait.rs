use super::types::Message;
use crate::Result;
use async_trait::async_trait;

/// Framed, bidirectional byte transport to an adapter's TCP endpoint.
/// Carries no DAP semantics of its own beyond the length-prefixed framing;
/// trait-object'd so the DAP client can be unit-tested against a mock.
#[async_trait]
pub trait DapTransportTrait: Send + Sync {
    /// Read the next complete frame. Returns `Err(Error::TransportClosed)`
    /// once the peer has closed the connection.
    async fn receive_message(&mut self) -> Result<Message>;

    /// Write one framed message. Implementations must serialize concurrent
    /// callers so that two frames can never interleave on the wire.
    async fn send_message(&mut self, msg: &Message) -> Result<()>;

    /// Idempotent. After `close()`, `send_message` fails with
    /// `Error::TransportClosed`.
    async fn close(&mut self) -> Result<()>;
}
