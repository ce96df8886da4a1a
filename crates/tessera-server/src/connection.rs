//! Per-connection line loop.
//!
//! One listener serves both protocols: lines opening with `{` are peer
//! JSON, everything else is a client command. Malformed input of either
//! kind is logged and the connection dropped.

use std::sync::Arc;

use tokio::net::TcpStream;
use tracing::{debug, warn};

use tessera_proto::{wire, ClientRequest, PeerMessage};

use crate::node::NodeState;
use crate::ServerError;

pub async fn handle(stream: TcpStream, node: Arc<NodeState>) -> Result<(), ServerError> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = tokio::io::BufReader::new(read_half);

    loop {
        let line = match wire::read_line(&mut reader).await? {
            Some(line) => line,
            None => return Ok(()),
        };
        if line.is_empty() {
            continue;
        }

        let reply = if line.starts_with('{') {
            let msg = match PeerMessage::from_line(&line) {
                Ok(msg) => msg,
                Err(err) => {
                    warn!(%err, "malformed peer message, dropping connection");
                    return Ok(());
                }
            };
            node.handle_peer(msg).await.to_line()?
        } else {
            let req = match ClientRequest::parse(&line) {
                Ok(req) => req,
                Err(err) => {
                    debug!(%err, "malformed client request, dropping connection");
                    return Ok(());
                }
            };
            node.handle_client(req).await.to_line()
        };

        wire::write_line(&mut write_half, &reply).await?;
    }
}
