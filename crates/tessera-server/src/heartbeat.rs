//! Coordinator liveness checks and the takeover path.
//!
//! Every node heartbeats the coordinator on a fixed interval. A missed
//! heartbeat starts an election; losing the election (someone higher
//! answered) goes back to heartbeating, winning it turns this node into
//! the coordinator for the rest of its life.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use tessera_cluster::{decide, higher_priority_peers, Coordinator, ElectionOutcome, Role};
use tessera_proto::{Action, PeerMessage};

use crate::node::NodeState;

/// Heartbeat loop. Exits on shutdown or once this node becomes the
/// coordinator.
pub async fn run(node: Arc<NodeState>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = tokio::time::sleep(interval) => {}
        }

        if node.role().await == Role::Coordinator {
            return;
        }
        let Some(addr) = node.coordinator_addr().await else {
            continue;
        };

        let probe =
            PeerMessage::request(Action::Heartbeat).with_server_info(node.info().clone());
        match tessera_cluster::send_message(&addr, &probe).await {
            Ok(reply) if reply.success => continue,
            Ok(_) => warn!(coordinator = %addr, "heartbeat rejected"),
            Err(err) => warn!(coordinator = %addr, %err, "heartbeat failed"),
        }

        elect(&node).await;
        if node.role().await == Role::Coordinator {
            return;
        }
    }
}

/// One election round.
async fn elect(node: &Arc<NodeState>) {
    if !node.transition_role(Role::Electing).await {
        return;
    }
    info!("coordinator lost, starting election");

    let peers = match node.ring().await {
        Some(ring) => higher_priority_peers(&ring, node.priority()),
        None => Vec::new(),
    };

    match decide(&peers).await {
        ElectionOutcome::Abstain => {
            debug!("abstaining, awaiting new coordinator");
            node.transition_role(Role::Follower).await;
        }
        ElectionOutcome::TakeOver => take_over(node).await,
    }
}

/// Becomes the coordinator: resume authority over the last known ring,
/// then leave it as a member via the normal graceful-leave protocol so
/// the shed range and data land on the successor, and the broadcast
/// tells every survivor where the coordinator now lives.
async fn take_over(node: &Arc<NodeState>) {
    if !node.transition_role(Role::Coordinator).await {
        return;
    }
    info!("election won, taking over coordinator duties");

    let ring = node.ring().await.unwrap_or_default();
    let coordinator = Arc::new(Coordinator::resume(node.info().clone(), ring));
    node.host_coordinator(Arc::clone(&coordinator)).await;

    let dump = node.drain().await;
    let leave = PeerMessage::request(Action::Delete)
        .with_server_info(node.info().clone())
        .with_data(dump);
    let reply = coordinator.handle(leave).await;
    if !reply.success {
        warn!("self-removal during takeover was rejected");
    }

    // adopt the shrunken ring locally; our own broadcast skips us
    node.install_ring(coordinator.ring().await).await;
}
