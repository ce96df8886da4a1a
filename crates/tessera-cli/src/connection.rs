//! Async TCP connection to a tessera node.
//!
//! One request line out, one response line back.

use tokio::io::BufReader;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use tessera_proto::{wire, ClientRequest, ClientResponse, ProtoError};

/// Errors that can occur during connection operations.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("connection failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtoError),

    #[error("server disconnected")]
    Disconnected,
}

/// A line-framed connection to one node.
pub struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    addr: String,
}

impl Connection {
    /// Connects to the node at `addr` (`host:port`).
    pub async fn connect(addr: &str) -> Result<Self, ConnectionError> {
        let stream = TcpStream::connect(addr).await?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            addr: addr.to_string(),
        })
    }

    /// The address this connection points at.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Sends one request and blocks for its response line.
    pub async fn send(&mut self, req: &ClientRequest) -> Result<ClientResponse, ConnectionError> {
        wire::write_line(&mut self.writer, &req.to_line()).await?;
        let line = wire::read_line(&mut self.reader)
            .await?
            .ok_or(ConnectionError::Disconnected)?;
        Ok(ClientResponse::parse(&line)?)
    }
}
