//! Replica pushes.
//!
//! After every successful local mutation (and after every ring change)
//! the owner pushes its full data set to each successor over a fresh
//! connection. Best effort: an unreachable successor is logged and
//! caught up by the next push.

use std::sync::Arc;

use tracing::{debug, warn};

use tessera_cluster::send_message;
use tessera_proto::{Action, PeerMessage};

use crate::node::NodeState;

/// Pushes this node's current data set to every successor.
pub async fn force_sync(node: Arc<NodeState>) {
    let successors = node.successor_infos().await;
    if successors.is_empty() {
        return;
    }
    let records = node.owned_records().await;

    for successor in successors {
        let msg = PeerMessage::request(Action::ForceSync)
            .with_server_info(node.info().clone())
            .with_data(records.clone());
        match send_message(&successor.addr(), &msg).await {
            Ok(reply) if reply.success => {
                debug!(to = %successor.addr(), records = records.len(), "replica pushed")
            }
            Ok(_) => warn!(to = %successor.addr(), "replica push rejected"),
            Err(err) => warn!(to = %successor.addr(), %err, "replica push failed"),
        }
    }
}
