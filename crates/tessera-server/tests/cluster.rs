//! End-to-end cluster tests: a real coordinator and real nodes on
//! loopback sockets, driven through the client text protocol.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::BufReader;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use tessera_cluster::{Coordinator, CoordinatorService};
use tessera_proto::{wire, Action, ClientResponse, PeerMessage, ServerInfo, Status};
use tessera_ring::{key_digest, Ring};
use tessera_server::{start, NodeConfig, NodeHandle};
use tessera_store::CachePolicy;

/// Time for broadcasts, migrations and replica pushes to settle.
const SETTLE: Duration = Duration::from_millis(700);

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

async fn start_coordinator() -> String {
    let port = free_port();
    let info = ServerInfo::new("127.0.0.1", port);
    let coordinator = Arc::new(Coordinator::new(info));
    let service = CoordinatorService::bind(&format!("127.0.0.1:{port}"), coordinator)
        .await
        .unwrap();
    let addr = service.local_addr().unwrap().to_string();
    tokio::spawn(service.run());
    addr
}

async fn start_node(port: u16, coordinator: &str, dir: &Path) -> NodeHandle {
    let config = NodeConfig::new("127.0.0.1", port, dir)
        .with_coordinator(coordinator)
        .with_cache(CachePolicy::Lru, 16)
        // long interval: these tests drive membership explicitly
        .with_heartbeat_interval(Duration::from_secs(60));
    start(config).await.unwrap()
}

struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Client {
    async fn connect(addr: impl std::fmt::Display) -> Self {
        let stream = TcpStream::connect(addr.to_string()).await.unwrap();
        let (read_half, write_half) = stream.into_split();
        Self {
            reader: BufReader::new(read_half),
            writer: write_half,
        }
    }

    async fn send(&mut self, line: &str) -> ClientResponse {
        wire::write_line(&mut self.writer, line).await.unwrap();
        let reply = wire::read_line(&mut self.reader).await.unwrap().unwrap();
        ClientResponse::parse(&reply).unwrap()
    }
}

async fn ring_of(addr: impl std::fmt::Display) -> Ring {
    let mut client = Client::connect(addr).await;
    let resp = client.send("keyrange").await;
    assert_eq!(resp.status, Status::KeyrangeSuccess);
    Ring::from_json(resp.payload.as_deref().unwrap()).unwrap()
}

fn owner_port(ring: &Ring, key: &str) -> u16 {
    ring.node_for_key(key_digest(key)).unwrap().port
}

#[tokio::test]
async fn put_get_delete_on_single_node() {
    let coordinator = start_coordinator().await;
    let dir = tempfile::tempdir().unwrap();
    let node = start_node(free_port(), &coordinator, dir.path()).await;
    let mut client = Client::connect(node.addr()).await;

    assert_eq!(client.send("put alpha one").await.status, Status::PutSuccess);
    let got = client.send("get alpha").await;
    assert_eq!(got.status, Status::GetSuccess);
    assert_eq!(got.value(), Some("one"));

    assert_eq!(client.send("put alpha two").await.status, Status::PutUpdate);
    assert_eq!(client.send("get alpha").await.value(), Some("two"));

    // "null" is a tombstone
    assert_eq!(
        client.send("put alpha null").await.status,
        Status::DeleteSuccess
    );
    assert_eq!(client.send("get alpha").await.status, Status::GetError);
    assert_eq!(
        client.send("put alpha null").await.status,
        Status::DeleteError
    );

    node.close().await;
}

// A fresh PUT lands in the cache and may never be displaced to disk; a
// tombstone for such a key must still report DELETE_SUCCESS.
#[tokio::test]
async fn tombstone_deletes_a_cache_resident_key() {
    let coordinator = start_coordinator().await;
    let dir = tempfile::tempdir().unwrap();
    let node = start_node(free_port(), &coordinator, dir.path()).await;
    let mut client = Client::connect(node.addr()).await;

    assert_eq!(client.send("put ck cv").await.status, Status::PutSuccess);
    assert_eq!(
        client.send("put ck null").await.status,
        Status::DeleteSuccess
    );
    assert_eq!(client.send("get ck").await.status, Status::GetError);

    node.close().await;
}

#[tokio::test]
async fn keyrange_and_keyrange_read_report_the_ring() {
    let coordinator = start_coordinator().await;
    let dir = tempfile::tempdir().unwrap();
    let a = start_node(free_port(), &coordinator, dir.path()).await;
    let b = start_node(free_port(), &coordinator, dir.path()).await;
    tokio::time::sleep(SETTLE).await;

    let ring = ring_of(a.addr()).await;
    assert_eq!(ring.len(), 2);

    let mut client = Client::connect(b.addr()).await;
    let resp = client.send("keyrange_read").await;
    assert_eq!(resp.status, Status::KeyrangeReadSuccess);
    let read_ring = Ring::from_json(resp.payload.as_deref().unwrap()).unwrap();
    assert_eq!(read_ring.len(), 2);
    // with two nodes both replicate each other, so every widened range
    // covers any key
    let d = key_digest("anything");
    assert_eq!(read_ring.iter().filter(|e| e.range.contains(d)).count(), 2);

    b.close().await;
    a.close().await;
}

#[tokio::test]
async fn non_owner_redirects_with_ring() {
    let coordinator = start_coordinator().await;
    let dir = tempfile::tempdir().unwrap();
    let ports = [free_port(), free_port(), free_port()];
    let mut handles = Vec::new();
    for port in ports {
        handles.push(start_node(port, &coordinator, dir.path()).await);
    }
    tokio::time::sleep(SETTLE).await;

    let ring = ring_of(handles[0].addr()).await;
    let owner = owner_port(&ring, "key");
    let stranger = ports.iter().copied().find(|p| *p != owner).unwrap();

    let mut client = Client::connect(format!("127.0.0.1:{stranger}")).await;
    let resp = client.send("put key val0").await;
    assert_eq!(resp.status, Status::ServerNotResponsible);
    // the payload is a usable ring snapshot for re-routing
    let snapshot = Ring::from_json(resp.payload.as_deref().unwrap()).unwrap();
    assert_eq!(owner_port(&snapshot, "key"), owner);

    let mut client = Client::connect(format!("127.0.0.1:{owner}")).await;
    assert_eq!(client.send("put key val0").await.status, Status::PutSuccess);

    for handle in handles {
        handle.close().await;
    }
}

#[tokio::test]
async fn write_locked_node_rejects_puts_but_serves_gets() {
    let coordinator = start_coordinator().await;
    let dir = tempfile::tempdir().unwrap();
    let node = start_node(free_port(), &coordinator, dir.path()).await;
    let addr = node.addr().to_string();

    let mut client = Client::connect(&addr).await;
    assert_eq!(client.send("put k v").await.status, Status::PutSuccess);

    let lock = PeerMessage::request(Action::SetWriteLock);
    assert!(tessera_cluster::send_message(&addr, &lock)
        .await
        .unwrap()
        .success);

    assert_eq!(client.send("put k other").await.status, Status::ServerWriteLock);
    assert_eq!(client.send("put unrelated v").await.status, Status::ServerWriteLock);
    let got = client.send("get k").await;
    assert_eq!(got.status, Status::GetSuccess);
    assert_eq!(got.value(), Some("v"));

    let unlock = PeerMessage::request(Action::UnsetWriteLock);
    assert!(tessera_cluster::send_message(&addr, &unlock)
        .await
        .unwrap()
        .success);
    assert_eq!(client.send("put k other").await.status, Status::PutUpdate);

    node.close().await;
}

#[tokio::test]
async fn join_hands_existing_keys_to_the_new_owner() {
    let coordinator = start_coordinator().await;
    let dir = tempfile::tempdir().unwrap();
    let first = start_node(free_port(), &coordinator, dir.path()).await;

    let keys = ["apple", "banana", "cherry", "dates", "elder"];
    let mut client = Client::connect(first.addr()).await;
    for key in keys {
        assert_eq!(
            client.send(&format!("put {key} v-{key}")).await.status,
            Status::PutSuccess
        );
    }

    let second = start_node(free_port(), &coordinator, dir.path()).await;
    tokio::time::sleep(SETTLE).await;

    // every key must be served by its (possibly new) owner
    let ring = ring_of(second.addr()).await;
    assert_eq!(ring.len(), 2);
    for key in keys {
        let owner = owner_port(&ring, key);
        let mut client = Client::connect(format!("127.0.0.1:{owner}")).await;
        let got = client.send(&format!("get {key}")).await;
        assert_eq!(got.status, Status::GetSuccess, "key {key}");
        assert_eq!(got.value(), Some(format!("v-{key}").as_str()));
    }

    second.close().await;
    first.close().await;
}

#[tokio::test]
async fn graceful_leave_merges_into_the_survivor() {
    let coordinator = start_coordinator().await;
    let dir = tempfile::tempdir().unwrap();
    let ports = [free_port(), free_port()];
    let a = start_node(ports[0], &coordinator, dir.path()).await;
    let b = start_node(ports[1], &coordinator, dir.path()).await;
    tokio::time::sleep(SETTLE).await;

    let ring = ring_of(a.addr()).await;
    let owner = owner_port(&ring, "key");

    let mut client = Client::connect(format!("127.0.0.1:{owner}")).await;
    assert_eq!(client.send("put key val0").await.status, Status::PutSuccess);

    let (leaving, survivor) = if owner == ports[0] { (a, b) } else { (b, a) };
    leaving.close().await;
    tokio::time::sleep(SETTLE).await;

    let ring = ring_of(survivor.addr()).await;
    assert_eq!(ring.len(), 1);
    let entry = ring.iter().next().unwrap();
    assert_eq!(entry.range.start, entry.range.end); // full keyspace again

    let mut client = Client::connect(survivor.addr()).await;
    let got = client.send("get key").await;
    assert_eq!(got.status, Status::GetSuccess);
    assert_eq!(got.value(), Some("val0"));

    survivor.close().await;
}

// The full replication scenario: three nodes, a write to the owner is
// readable everywhere after the replica push, and survives the owner
// leaving.
#[tokio::test]
async fn replicated_value_survives_owner_departure() {
    let coordinator = start_coordinator().await;
    let dir = tempfile::tempdir().unwrap();
    let ports = [42609u16, 42157, 46683];
    let mut handles: Vec<(u16, NodeHandle)> = Vec::new();
    for port in ports {
        handles.push((port, start_node(port, &coordinator, dir.path()).await));
    }
    tokio::time::sleep(SETTLE).await;

    let ring = ring_of(SocketAddr::from(([127, 0, 0, 1], ports[0]))).await;
    assert_eq!(ring.len(), 3);
    let owner = owner_port(&ring, "key");

    let mut client = Client::connect(format!("127.0.0.1:{owner}")).await;
    assert_eq!(client.send("put key val0").await.status, Status::PutSuccess);
    tokio::time::sleep(SETTLE).await;

    // with R=2 and three nodes, every node holds "key" as owner or replica
    for port in ports {
        let mut client = Client::connect(format!("127.0.0.1:{port}")).await;
        let got = client.send("get key").await;
        assert_eq!(got.status, Status::GetSuccess, "node {port}");
        assert_eq!(got.value(), Some("val0"), "node {port}");
    }

    // owner leaves; the absorbing successor must still serve the key
    let idx = handles.iter().position(|(p, _)| *p == owner).unwrap();
    let (_, leaving) = handles.swap_remove(idx);
    leaving.close().await;
    tokio::time::sleep(SETTLE).await;

    let survivor_addr = format!("127.0.0.1:{}", handles[0].0);
    let ring = ring_of(&survivor_addr).await;
    assert_eq!(ring.len(), 2);
    let new_owner = owner_port(&ring, "key");

    let mut client = Client::connect(format!("127.0.0.1:{new_owner}")).await;
    let got = client.send("get key").await;
    assert_eq!(got.status, Status::GetSuccess);
    assert_eq!(got.value(), Some("val0"));

    for (_, handle) in handles {
        handle.close().await;
    }
}

// Coordinator loss: heartbeats fail, the highest-priority member wins
// the election, resumes authority over the last ring, sheds its own
// membership, and the survivors keep serving under the new coordinator.
#[tokio::test]
async fn survivor_takes_over_a_dead_coordinator() {
    let coord_port = free_port();
    let info = ServerInfo::new("127.0.0.1", coord_port);
    let coordinator = Arc::new(Coordinator::new(info));
    let service = CoordinatorService::bind(&format!("127.0.0.1:{coord_port}"), coordinator)
        .await
        .unwrap();
    let coordinator_addr = service.local_addr().unwrap().to_string();
    let service_task = tokio::spawn(service.run());

    let dir = tempfile::tempdir().unwrap();
    let ports = [free_port(), free_port(), free_port()];
    let mut handles = Vec::new();
    // sequential joins fix the priority order: ports[2] joins last and
    // outranks everyone in the election
    for port in ports {
        let config = NodeConfig::new("127.0.0.1", port, dir.path())
            .with_coordinator(&coordinator_addr)
            .with_cache(CachePolicy::Lru, 16)
            .with_heartbeat_interval(Duration::from_millis(200));
        handles.push(start(config).await.unwrap());
    }
    tokio::time::sleep(SETTLE).await;

    let ring = ring_of(handles[0].addr()).await;
    let owner = owner_port(&ring, "key");
    let mut client = Client::connect(format!("127.0.0.1:{owner}")).await;
    assert_eq!(client.send("put key val0").await.status, Status::PutSuccess);
    tokio::time::sleep(SETTLE).await;

    service_task.abort();
    tokio::time::sleep(3 * SETTLE).await;

    // the winner left the ring it now coordinates
    let ring = ring_of(handles[0].addr()).await;
    assert_eq!(ring.len(), 2);
    assert!(ring.iter().all(|e| e.port != ports[2]));

    let new_owner = owner_port(&ring, "key");
    let mut client = Client::connect(format!("127.0.0.1:{new_owner}")).await;
    let got = client.send("get key").await;
    assert_eq!(got.status, Status::GetSuccess);
    assert_eq!(got.value(), Some("val0"));

    // membership still works: a fresh node can join via the new coordinator
    let late = start_node(free_port(), &format!("127.0.0.1:{}", ports[2]), dir.path()).await;
    tokio::time::sleep(SETTLE).await;
    assert_eq!(ring_of(late.addr()).await.len(), 3);

    late.close().await;
    for handle in handles {
        handle.close().await;
    }
}

#[tokio::test]
async fn no_ring_means_server_stopped() {
    // a node with no coordinator never receives a ring snapshot
    let dir = tempfile::tempdir().unwrap();
    let config = NodeConfig::new("127.0.0.1", free_port(), dir.path());
    let node = start(config).await.unwrap();

    let mut client = Client::connect(node.addr()).await;
    assert_eq!(client.send("get k").await.status, Status::ServerStopped);
    assert_eq!(client.send("put k v").await.status, Status::ServerStopped);
    assert_eq!(client.send("keyrange").await.status, Status::ServerStopped);

    node.close().await;
}
