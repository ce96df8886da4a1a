//! One-shot peer RPC: connect, send one JSON line, read one reply line.
//!
//! Node-to-node and node-to-coordinator traffic both go through here,
//! so the transport can later be swapped for a framed streaming one in
//! a single place.

use std::time::Duration;

use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::time::timeout;

use tessera_proto::{wire, PeerMessage, ProtoError};

use crate::ClusterError;

/// Bound on connect plus one request/response exchange.
pub const RPC_TIMEOUT: Duration = Duration::from_secs(2);

/// Sends `msg` to `addr` and waits for exactly one reply line.
pub async fn send_message(addr: &str, msg: &PeerMessage) -> Result<PeerMessage, ClusterError> {
    match timeout(RPC_TIMEOUT, exchange(addr, msg)).await {
        Ok(result) => result,
        Err(_elapsed) => Err(ClusterError::Timeout(addr.to_string())),
    }
}

async fn exchange(addr: &str, msg: &PeerMessage) -> Result<PeerMessage, ClusterError> {
    let stream = TcpStream::connect(addr).await?;
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    wire::write_line(&mut write_half, &msg.to_line()?).await?;
    let line = wire::read_line(&mut reader)
        .await?
        .ok_or(ProtoError::Closed)?;
    Ok(PeerMessage::from_line(&line)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_proto::Action;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn exchanges_one_message() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut reader = BufReader::new(read_half);
            let line = wire::read_line(&mut reader).await.unwrap().unwrap();
            let msg = PeerMessage::from_line(&line).unwrap();
            assert_eq!(msg.action, Action::Heartbeat);
            let reply = PeerMessage::ack(Action::Heartbeat);
            wire::write_line(&mut write_half, &reply.to_line().unwrap())
                .await
                .unwrap();
        });

        let reply = send_message(&addr, &PeerMessage::request(Action::Heartbeat))
            .await
            .unwrap();
        assert!(reply.success);
    }

    #[tokio::test]
    async fn closed_before_reply_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.shutdown().await.ok();
        });

        let result = send_message(&addr, &PeerMessage::request(Action::Heartbeat)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn unreachable_peer_is_an_error() {
        // nothing listens on this port
        let result = send_message("127.0.0.1:1", &PeerMessage::request(Action::Heartbeat)).await;
        assert!(result.is_err());
    }
}
