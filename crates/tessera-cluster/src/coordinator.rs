//! The coordinator: sole owner of the ring, processing membership
//! events one at a time.
//!
//! Joins and leaves mutate several neighboring entries at once, so the
//! whole state sits behind one async mutex and every event runs to
//! completion (including its network calls) before the next one starts.
//! Members only ever see immutable snapshots pushed via
//! `METADATA_UPDATE`.

use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use tessera_proto::{wire, Action, PeerMessage, ServerInfo};
use tessera_ring::{key_digest, Digest, Ring};

use crate::rpc::send_message;
use crate::ClusterError;

struct CoordState {
    ring: Ring,
    /// Next priority number; strictly increasing across the cluster's
    /// lifetime, never reused.
    join_counter: u64,
}

/// Membership authority. One per cluster, either standalone or hosted
/// by the member that won an election.
pub struct Coordinator {
    info: ServerInfo,
    state: Mutex<CoordState>,
}

impl Coordinator {
    /// A fresh coordinator with an empty ring.
    pub fn new(info: ServerInfo) -> Self {
        Self {
            info,
            state: Mutex::new(CoordState {
                ring: Ring::new(),
                join_counter: 0,
            }),
        }
    }

    /// A coordinator resuming authority over an existing ring, after an
    /// election. The join counter continues past every priority already
    /// handed out so numbers stay unique.
    pub fn resume(info: ServerInfo, ring: Ring) -> Self {
        let join_counter = ring.max_priority().map(|p| p + 1).unwrap_or(0);
        Self {
            info,
            state: Mutex::new(CoordState { ring, join_counter }),
        }
    }

    /// The address members heartbeat against.
    pub fn info(&self) -> &ServerInfo {
        &self.info
    }

    /// Current ring snapshot.
    pub async fn ring(&self) -> Ring {
        self.state.lock().await.ring.clone()
    }

    /// Dispatches one membership request and produces the reply.
    pub async fn handle(&self, msg: PeerMessage) -> PeerMessage {
        match msg.action {
            Action::NewNode => match msg.server_info {
                Some(info) => self.on_new_node(info).await,
                None => PeerMessage::nack(Action::NewNode),
            },
            Action::Delete => match msg.server_info {
                Some(info) => self.on_delete(info, msg.data).await,
                None => PeerMessage::nack(Action::Delete),
            },
            Action::Heartbeat => self.on_heartbeat(msg.server_info).await,
            // a coordinator answering an election probe is, by
            // definition, alive
            Action::Election => PeerMessage::ack(Action::Election),
            other => {
                warn!(action = ?other, "unexpected action at coordinator");
                PeerMessage::nack(other)
            }
        }
    }

    /// NEW_NODE: position the joiner, carve its range out of its
    /// successor's, move the affected records, then publish the ring.
    async fn on_new_node(&self, info: ServerInfo) -> PeerMessage {
        let mut state = self.state.lock().await;
        let priority = state.join_counter;
        state.join_counter += 1;

        let hash = state.ring.insert(&info.host, info.port, priority);
        info!(node = %info.name(), %hash, priority, "node joined");

        if state.ring.len() > 1 {
            // the successor still holds the joiner's range; have it
            // hand the records over before anyone sees the new ring
            let successor = state
                .ring
                .successor_of(hash)
                .map(|e| ServerInfo::new(e.host.clone(), e.port));
            if let Some(successor) = successor {
                self.migrate_range(&successor, &info, hash).await;
            }
        }

        self.broadcast(&state.ring).await;
        PeerMessage::ack(Action::NewNode).with_ring(state.ring.clone())
    }

    /// DELETE: push the leaver's records to its successor, merge the
    /// range, drop the entry, publish.
    async fn on_delete(&self, info: ServerInfo, data: Option<Vec<String>>) -> PeerMessage {
        let mut state = self.state.lock().await;
        let hash = key_digest(&info.name());
        if state.ring.get(&hash).is_none() {
            warn!(node = %info.name(), "delete for unknown member");
            return PeerMessage::nack(Action::Delete);
        }

        if state.ring.len() > 1 {
            let successor = state
                .ring
                .successor_of(hash)
                .map(|e| ServerInfo::new(e.host.clone(), e.port));
            if let Some(successor) = successor {
                self.write_lock(&successor, true).await;
                if let Some(data) = data {
                    let transfer = PeerMessage::request(Action::InternalTransfer).with_data(data);
                    if let Err(err) = send_message(&successor.addr(), &transfer).await {
                        error!(to = %successor.addr(), %err, "leave transfer failed");
                    }
                }
                self.write_lock(&successor, false).await;
            }
        }

        state.ring.remove(&hash);
        info!(node = %info.name(), "node left");
        self.broadcast(&state.ring).await;
        PeerMessage::ack(Action::Delete)
    }

    /// HEARTBEAT: success iff the sender is a known member.
    async fn on_heartbeat(&self, info: Option<ServerInfo>) -> PeerMessage {
        let state = self.state.lock().await;
        let known = info
            .map(|i| state.ring.get(&key_digest(&i.name())).is_some())
            .unwrap_or(false);
        if known {
            PeerMessage::ack(Action::Heartbeat)
        } else {
            PeerMessage::nack(Action::Heartbeat)
        }
    }

    /// Write-locks `donor`, tells it to send everything up to `boundary`
    /// to `dest`, then unlocks. The unlock always runs, whatever happened
    /// to the transfer, so a failed migration cannot leave the donor
    /// rejecting writes forever.
    async fn migrate_range(
        &self,
        donor: &ServerInfo,
        dest: &ServerInfo,
        boundary: Digest,
    ) {
        self.write_lock(donor, true).await;

        let instruction = PeerMessage::request(Action::InternalTransfer)
            .with_server_info(dest.clone())
            .with_boundary(boundary);
        match send_message(&donor.addr(), &instruction).await {
            Ok(reply) if reply.success => {
                debug!(donor = %donor.addr(), dest = %dest.addr(), "range migrated")
            }
            Ok(_) => error!(donor = %donor.addr(), "donor rejected range migration"),
            Err(err) => error!(donor = %donor.addr(), %err, "range migration failed"),
        }

        self.write_lock(donor, false).await;
    }

    async fn write_lock(&self, target: &ServerInfo, locked: bool) {
        let action = if locked {
            Action::SetWriteLock
        } else {
            Action::UnsetWriteLock
        };
        if let Err(err) = send_message(&target.addr(), &PeerMessage::request(action)).await {
            error!(target = %target.addr(), %err, ?action, "write lock message failed");
        }
    }

    /// Pushes the current ring to every member. Best effort: a member
    /// that cannot be reached will catch up on the next change or fail
    /// its heartbeat.
    async fn broadcast(&self, ring: &Ring) {
        let members: Vec<ServerInfo> = ring
            .iter()
            .map(|e| ServerInfo::new(e.host.clone(), e.port))
            .collect();
        let update = PeerMessage::ack(Action::MetadataUpdate)
            .with_ring(ring.clone())
            .with_server_info(self.info.clone());
        for member in members {
            if member == self.info {
                continue;
            }
            if let Err(err) = send_message(&member.addr(), &update).await {
                warn!(member = %member.addr(), %err, "metadata broadcast failed");
            }
        }
    }
}

/// Listener half of a standalone coordinator: accepts connections and
/// feeds each JSON line through [`Coordinator::handle`].
pub struct CoordinatorService {
    listener: TcpListener,
    coordinator: Arc<Coordinator>,
}

impl CoordinatorService {
    /// Binds the membership listener. Failure here is fatal to the
    /// process; everything past it is not.
    pub async fn bind(addr: &str, coordinator: Arc<Coordinator>) -> Result<Self, ClusterError> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "coordinator listening");
        Ok(Self {
            listener,
            coordinator,
        })
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr, ClusterError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept loop. Runs until the task is dropped.
    pub async fn run(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    debug!(%peer, "member connected");
                    let coordinator = self.coordinator.clone();
                    tokio::spawn(async move {
                        handle_member(coordinator, stream).await;
                    });
                }
                Err(err) => warn!(%err, "accept failed"),
            }
        }
    }
}

async fn handle_member(coordinator: Arc<Coordinator>, stream: TcpStream) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = tokio::io::BufReader::new(read_half);

    loop {
        let line = match wire::read_line(&mut reader).await {
            Ok(Some(line)) => line,
            Ok(None) => return,
            Err(err) => {
                debug!(%err, "member read failed");
                return;
            }
        };
        let msg = match PeerMessage::from_line(&line) {
            Ok(msg) => msg,
            Err(err) => {
                // malformed input: log and drop the connection
                warn!(%err, "malformed member message");
                return;
            }
        };
        let reply = coordinator.handle(msg).await;
        let reply_line = match reply.to_line() {
            Ok(line) => line,
            Err(err) => {
                error!(%err, "reply serialization failed");
                return;
            }
        };
        if wire::write_line(&mut write_half, &reply_line).await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coord() -> Coordinator {
        Coordinator::new(ServerInfo::new("127.0.0.1", 9))
    }

    // member addresses below are unreachable on purpose: migration and
    // broadcast traffic is best-effort and must not block membership

    #[tokio::test]
    async fn joins_accumulate_priorities() {
        let coord = coord();
        for port in [1, 2, 3] {
            let reply = coord
                .handle(
                    PeerMessage::request(Action::NewNode)
                        .with_server_info(ServerInfo::new("127.0.0.1", port)),
                )
                .await;
            assert!(reply.success);
            assert!(reply.ring_snapshot.is_some());
        }
        let ring = coord.ring().await;
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.max_priority(), Some(2));
    }

    #[tokio::test]
    async fn heartbeat_known_vs_unknown() {
        let coord = coord();
        coord
            .handle(
                PeerMessage::request(Action::NewNode)
                    .with_server_info(ServerInfo::new("127.0.0.1", 1)),
            )
            .await;

        let known = coord
            .handle(
                PeerMessage::request(Action::Heartbeat)
                    .with_server_info(ServerInfo::new("127.0.0.1", 1)),
            )
            .await;
        assert!(known.success);

        let unknown = coord
            .handle(
                PeerMessage::request(Action::Heartbeat)
                    .with_server_info(ServerInfo::new("127.0.0.1", 7)),
            )
            .await;
        assert!(!unknown.success);

        let anonymous = coord.handle(PeerMessage::request(Action::Heartbeat)).await;
        assert!(!anonymous.success);
    }

    #[tokio::test]
    async fn delete_shrinks_and_empties() {
        let coord = coord();
        for port in [1, 2] {
            coord
                .handle(
                    PeerMessage::request(Action::NewNode)
                        .with_server_info(ServerInfo::new("127.0.0.1", port)),
                )
                .await;
        }

        let reply = coord
            .handle(
                PeerMessage::request(Action::Delete)
                    .with_server_info(ServerInfo::new("127.0.0.1", 1)),
            )
            .await;
        assert!(reply.success);
        assert_eq!(coord.ring().await.len(), 1);

        let reply = coord
            .handle(
                PeerMessage::request(Action::Delete)
                    .with_server_info(ServerInfo::new("127.0.0.1", 2)),
            )
            .await;
        assert!(reply.success);
        assert!(coord.ring().await.is_empty());
    }

    #[tokio::test]
    async fn delete_unknown_member_rejected() {
        let coord = coord();
        let reply = coord
            .handle(
                PeerMessage::request(Action::Delete)
                    .with_server_info(ServerInfo::new("127.0.0.1", 40)),
            )
            .await;
        assert!(!reply.success);
    }

    #[tokio::test]
    async fn resume_continues_the_join_counter() {
        let mut ring = Ring::new();
        ring.insert("127.0.0.1", 1, 4);
        ring.insert("127.0.0.1", 2, 7);
        let coord = Coordinator::resume(ServerInfo::new("127.0.0.1", 9), ring);

        coord
            .handle(
                PeerMessage::request(Action::NewNode)
                    .with_server_info(ServerInfo::new("127.0.0.1", 3)),
            )
            .await;
        assert_eq!(coord.ring().await.max_priority(), Some(8));
    }

    #[tokio::test]
    async fn election_probe_is_acked() {
        let reply = coord().handle(PeerMessage::request(Action::Election)).await;
        assert!(reply.success);
    }
}
