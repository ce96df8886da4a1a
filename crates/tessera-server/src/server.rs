//! Node lifecycle: bind, register, serve, leave.
//!
//! Startup order matters: the listener must be live before the node
//! announces itself, because the coordinator's join protocol sends the
//! new node its share of the keyspace right away.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use tessera_cluster::send_message;
use tessera_proto::{Action, PeerMessage};

use crate::config::NodeConfig;
use crate::node::NodeState;
use crate::{connection, heartbeat, ServerError};

/// A running node. Dropping the handle does not stop the node; call
/// [`NodeHandle::close`] for a graceful leave.
pub struct NodeHandle {
    node: Arc<NodeState>,
    addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
}

impl NodeHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn node(&self) -> &Arc<NodeState> {
        &self.node
    }

    /// Graceful leave: flush the cache, hand the full data set to the
    /// coordinator for the successor to absorb, then stop serving.
    pub async fn close(self) {
        if let Some(addr) = self.node.coordinator_addr().await {
            let dump = self.node.drain().await;
            let leave = PeerMessage::request(Action::Delete)
                .with_server_info(self.node.info().clone())
                .with_data(dump);
            match send_message(&addr, &leave).await {
                Ok(reply) if reply.success => info!("left the ring"),
                Ok(_) => warn!("coordinator rejected leave"),
                Err(err) => warn!(%err, "leave notification failed"),
            }
        }
        let _ = self.shutdown.send(true);
        let _ = self.accept_task.await;
        info!(node = %self.node.info().name(), "node closed");
    }
}

/// Binds the listener, registers with the coordinator when one is
/// configured, and spawns the accept loop and heartbeat task.
///
/// Failure to bind is the one fatal condition a node has; registration
/// failure is fatal too since an unregistered node owns nothing.
pub async fn start(config: NodeConfig) -> Result<NodeHandle, ServerError> {
    let node = NodeState::new(&config)?;
    std::fs::create_dir_all(&config.data_dir)?;

    let listener = TcpListener::bind(config.bind_addr()).await?;
    let addr = listener.local_addr()?;
    info!(%addr, "node listening");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let accept_task = tokio::spawn(accept_loop(
        listener,
        Arc::clone(&node),
        config.max_connections,
        shutdown_rx.clone(),
    ));

    if let Some(coordinator) = &config.coordinator {
        let join = PeerMessage::request(Action::NewNode).with_server_info(node.info().clone());
        let reply = send_message(coordinator, &join).await?;
        if !reply.success {
            return Err(ServerError::RegistrationRejected(coordinator.clone()));
        }
        // the reply carries the first ring snapshot; the broadcast that
        // follows may have raced us, so install whichever arrives
        if let Some(ring) = reply.ring_snapshot {
            node.install_ring(ring).await;
        }
        tokio::spawn(heartbeat::run(
            Arc::clone(&node),
            config.heartbeat_interval,
            shutdown_rx,
        ));
    }

    Ok(NodeHandle {
        node,
        addr,
        shutdown: shutdown_tx,
        accept_task,
    })
}

async fn accept_loop(
    listener: TcpListener,
    node: Arc<NodeState>,
    max_connections: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    let semaphore = Arc::new(Semaphore::new(max_connections));
    loop {
        tokio::select! {
            biased;

            _ = shutdown.changed() => {
                info!("shutdown, draining connections");
                break;
            }

            result = listener.accept() => {
                let (stream, peer) = match result {
                    Ok(pair) => pair,
                    Err(err) => {
                        warn!(%err, "accept failed");
                        continue;
                    }
                };
                let permit = match semaphore.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        warn!(%peer, "connection limit reached, dropping");
                        drop(stream);
                        continue;
                    }
                };
                let node = Arc::clone(&node);
                tokio::spawn(async move {
                    if let Err(err) = connection::handle(stream, node).await {
                        error!(%peer, %err, "connection error");
                    }
                    drop(permit);
                });
            }
        }
    }
}
