//! Leader election after coordinator loss.
//!
//! Priority numbers are assigned at join time and strictly increase, so
//! no two members share one. A member that loses contact with the
//! coordinator probes every member with a higher priority; if any of
//! them answers, the member abstains and waits for that node to take
//! over. If none answer, the member is the highest-priority survivor
//! and becomes the coordinator itself.

use tracing::{debug, info};

use tessera_proto::{Action, PeerMessage, ServerInfo};
use tessera_ring::Ring;

use crate::rpc::send_message;

/// What a node currently is to the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Normal member, heartbeating the coordinator.
    Follower,
    /// Coordinator contact lost, probing higher-priority members.
    Electing,
    /// Took over coordinator duties. Terminal.
    Coordinator,
}

impl Role {
    /// The only legal moves: Follower -> Electing, Electing -> Follower
    /// (a higher-priority member answered), Electing -> Coordinator.
    /// Returns false and leaves the role unchanged for anything else.
    pub fn transition(&mut self, next: Role) -> bool {
        let allowed = matches!(
            (*self, next),
            (Role::Follower, Role::Electing)
                | (Role::Electing, Role::Follower)
                | (Role::Electing, Role::Coordinator)
        );
        if allowed {
            debug!(from = ?*self, to = ?next, "role transition");
            *self = next;
        }
        allowed
    }
}

/// Result of an election round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionOutcome {
    /// A higher-priority member is alive and will take over.
    Abstain,
    /// No higher-priority member answered; this node takes over.
    TakeOver,
}

/// Members of `ring` with a priority strictly above `my_priority`,
/// in ascending priority order.
pub fn higher_priority_peers(ring: &Ring, my_priority: u64) -> Vec<ServerInfo> {
    let mut peers: Vec<(u64, ServerInfo)> = ring
        .iter()
        .filter(|e| e.priority > my_priority)
        .map(|e| (e.priority, ServerInfo::new(e.host.clone(), e.port)))
        .collect();
    peers.sort_by_key(|(priority, _)| *priority);
    peers.into_iter().map(|(_, info)| info).collect()
}

/// Runs one election round: probes every peer in `peers` and abstains
/// as soon as any of them answers successfully.
pub async fn decide(peers: &[ServerInfo]) -> ElectionOutcome {
    for peer in peers {
        let probe = PeerMessage::request(Action::Election);
        match send_message(&peer.addr(), &probe).await {
            Ok(reply) if reply.success => {
                info!(peer = %peer.addr(), "higher-priority member alive, abstaining");
                return ElectionOutcome::Abstain;
            }
            Ok(_) => debug!(peer = %peer.addr(), "election probe rejected"),
            Err(err) => debug!(peer = %peer.addr(), %err, "election probe failed"),
        }
    }
    ElectionOutcome::TakeOver
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_proto::wire;
    use tokio::io::BufReader;
    use tokio::net::TcpListener;

    #[test]
    fn transitions_follow_the_state_machine() {
        let mut role = Role::Follower;
        assert!(!role.transition(Role::Coordinator)); // must elect first
        assert!(role.transition(Role::Electing));
        assert!(role.transition(Role::Follower)); // abstained
        assert!(role.transition(Role::Electing));
        assert!(role.transition(Role::Coordinator));
        // coordinator is terminal
        assert!(!role.transition(Role::Follower));
        assert!(!role.transition(Role::Electing));
        assert_eq!(role, Role::Coordinator);
    }

    #[test]
    fn peers_filtered_and_sorted_by_priority() {
        let mut ring = Ring::new();
        ring.insert("127.0.0.1", 5000, 0);
        ring.insert("127.0.0.1", 5001, 1);
        ring.insert("127.0.0.1", 5002, 2);

        let peers = higher_priority_peers(&ring, 0);
        assert_eq!(peers.len(), 2);
        assert_eq!(peers[0].port, 5001);
        assert_eq!(peers[1].port, 5002);

        assert!(higher_priority_peers(&ring, 2).is_empty());
    }

    #[tokio::test]
    async fn takes_over_when_nobody_answers() {
        let peers = vec![
            ServerInfo::new("127.0.0.1", 1),
            ServerInfo::new("127.0.0.1", 2),
        ];
        assert_eq!(decide(&peers).await, ElectionOutcome::TakeOver);
        assert_eq!(decide(&[]).await, ElectionOutcome::TakeOver);
    }

    #[tokio::test]
    async fn abstains_when_a_higher_member_answers() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut reader = BufReader::new(read_half);
            let _ = wire::read_line(&mut reader).await;
            let reply = PeerMessage::ack(Action::Election);
            wire::write_line(&mut write_half, &reply.to_line().unwrap())
                .await
                .ok();
        });

        let peers = vec![ServerInfo::new("127.0.0.1", addr.port())];
        assert_eq!(decide(&peers).await, ElectionOutcome::Abstain);
    }
}
