use super::transport_trait::DapTransportTrait;
use super::types::Message;
use crate::{Error, Result};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{lookup_host, TcpStream};
use tracing::{debug, trace};

/// Default cap used by [`DapTransport::new`], matching
/// [`crate::config::AidbConfig`]'s default so transports built without an
/// explicit config (tests, ad hoc call sites) still reject runaway frames.
const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Length-prefixed DAP transport over a loopback TCP socket. No STDIO
/// variant exists: every adapter this crate drives speaks DAP on a TCP
/// port it allocates itself.
pub struct DapTransport {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    closed: AtomicBool,
    max_frame_size: usize,
}

impl DapTransport {
    pub fn new(stream: TcpStream) -> Self {
        Self::with_max_frame_size(stream, DEFAULT_MAX_FRAME_SIZE)
    }

    /// Same as [`DapTransport::new`], but with an explicit cap on a
    /// single frame's `Content-Length` rather than the built-in default.
    pub fn with_max_frame_size(stream: TcpStream, max_frame_size: usize) -> Self {
        let (read_half, writer) = stream.into_split();
        Self {
            reader: BufReader::new(read_half),
            writer,
            closed: AtomicBool::new(false),
            max_frame_size,
        }
    }

    /// Resolve `host:port`, attempting IPv4 candidates before falling back
    /// to IPv6 ones, and connect to the first address that accepts.
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        Self::connect_with_max_frame_size(host, port, DEFAULT_MAX_FRAME_SIZE).await
    }

    /// Same as [`DapTransport::connect`], but with an explicit frame-size
    /// cap.
    pub async fn connect_with_max_frame_size(
        host: &str,
        port: u16,
        max_frame_size: usize,
    ) -> Result<Self> {
        let mut addrs: Vec<SocketAddr> = lookup_host((host, port))
            .await
            .map_err(|e| Error::ConnectFailed(format!("{host}:{port}: {e}")))?
            .collect();
        addrs.sort_by_key(|a| !a.is_ipv4());

        if addrs.is_empty() {
            return Err(Error::ConnectFailed(format!(
                "{host}:{port}: no addresses resolved"
            )));
        }

        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect(addr).await {
                Ok(stream) => return Ok(Self::with_max_frame_size(stream, max_frame_size)),
                Err(e) => last_err = Some(e),
            }
        }

        Err(Error::ConnectFailed(format!(
            "{host}:{port}: {}",
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    /// Read one length-prefixed frame's body as raw text, without
    /// attempting to parse it as a DAP message. A `Content-Length: 0`
    /// frame is a valid frame at this layer and yields an empty string.
    async fn read_raw_frame(&mut self) -> Result<String> {
        let mut headers = String::new();
        loop {
            let mut line = String::new();
            let n = self.reader.read_line(&mut line).await?;
            if n == 0 {
                return Err(Error::TransportClosed);
            }
            if line == "\r\n" || line == "\n" {
                break;
            }
            headers.push_str(&line);
        }

        let content_length = headers
            .lines()
            .find(|line| line.to_ascii_lowercase().starts_with("content-length:"))
            .and_then(|line| line.split(':').nth(1))
            .and_then(|s| s.trim().parse::<usize>().ok())
            .ok_or_else(|| Error::ProtocolError("missing Content-Length header".to_string()))?;

        if content_length > self.max_frame_size {
            return Err(Error::ProtocolError(format!(
                "frame of {content_length} bytes exceeds the {}-byte cap",
                self.max_frame_size
            )));
        }

        trace!(content_length, "reading DAP frame");

        let mut buffer = vec![0u8; content_length];
        if content_length > 0 {
            self.reader.read_exact(&mut buffer).await?;
        }

        String::from_utf8(buffer).map_err(|e| Error::ProtocolError(format!("invalid UTF-8 frame: {e}")))
    }

    async fn read_frame(&mut self) -> Result<Message> {
        let content = self.read_raw_frame().await?;
        debug!(%content, "received DAP frame");
        serde_json::from_str(&content).map_err(Error::from)
    }

    async fn write_frame(&mut self, msg: &Message) -> Result<()> {
        let content = serde_json::to_string(msg)?;
        debug!(%content, "sending DAP frame");
        let header = format!("Content-Length: {}\r\n\r\n", content.len());
        self.writer.write_all(header.as_bytes()).await?;
        self.writer.write_all(content.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl DapTransportTrait for DapTransport {
    async fn receive_message(&mut self) -> Result<Message> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::TransportClosed);
        }
        self.read_frame().await
    }

    async fn send_message(&mut self, msg: &Message) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::TransportClosed);
        }
        self.write_frame(msg).await
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let _ = self.writer.shutdown().await;
        Ok(())
    }
}
