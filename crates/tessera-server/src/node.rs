//! Per-node state and request handling.
//!
//! A node answers three questions about every key: am I the owner, a
//! replica holder, or neither. Owners serve reads and writes from the
//! cache-fronted primary store; replica holders serve reads from the
//! per-predecessor replica stores; everyone else hands the client the
//! current ring and lets it re-route.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use tessera_cluster::{Coordinator, Role};
use tessera_proto::{
    decode_records, encode_records, Action, ClientRequest, ClientResponse, PeerMessage,
    ServerInfo, Status,
};
use tessera_ring::{key_digest, Digest, HashRange, Ring};
use tessera_store::{build_cache, Cache, FileStore};

use crate::config::NodeConfig;
use crate::replication;
use crate::ServerError;

/// Cache plus primary store plus one replica store per predecessor.
/// One mutex over the lot: a single key's read-modify-write must not
/// interleave between the cache check and the storage fallback.
pub(crate) struct Storage {
    pub cache: Box<dyn Cache>,
    pub primary: FileStore,
    pub replicas: HashMap<Digest, FileStore>,
}

impl Storage {
    /// Everything this node owns: the primary store overlaid with the
    /// cache (cache entries may not have hit disk yet).
    pub fn full_dump(&self) -> Result<Vec<(String, String)>, tessera_store::StoreError> {
        let mut records = self.primary.dump_all()?;
        for (key, value) in self.cache.entries() {
            match records.iter_mut().find(|(k, _)| *k == key) {
                Some(slot) => slot.1 = value,
                None => records.push((key, value)),
            }
        }
        Ok(records)
    }
}

/// The single per-process node instance.
pub struct NodeState {
    info: ServerInfo,
    hash: Digest,
    data_dir: PathBuf,
    storage: Mutex<Storage>,
    ring: RwLock<Option<Ring>>,
    role: Mutex<Role>,
    coordinator_addr: RwLock<Option<String>>,
    /// Set once this node wins an election and hosts the coordinator.
    local_coordinator: RwLock<Option<Arc<Coordinator>>>,
    write_locked: AtomicBool,
    priority: AtomicU64,
}

impl NodeState {
    pub fn new(config: &NodeConfig) -> Result<Arc<Self>, ServerError> {
        let info = ServerInfo::new(config.host.clone(), config.port);
        let hash = key_digest(&info.name());
        let primary = FileStore::open(config.data_dir.join(format!("{}.store", config.port)))?;
        let storage = Storage {
            cache: build_cache(config.cache_policy, config.cache_capacity),
            primary,
            replicas: HashMap::new(),
        };
        Ok(Arc::new(Self {
            info,
            hash,
            data_dir: config.data_dir.clone(),
            storage: Mutex::new(storage),
            ring: RwLock::new(None),
            role: Mutex::new(Role::Follower),
            coordinator_addr: RwLock::new(config.coordinator.clone()),
            local_coordinator: RwLock::new(None),
            write_locked: AtomicBool::new(false),
            priority: AtomicU64::new(0),
        }))
    }

    pub fn info(&self) -> &ServerInfo {
        &self.info
    }

    pub fn priority(&self) -> u64 {
        self.priority.load(Ordering::SeqCst)
    }

    pub async fn ring(&self) -> Option<Ring> {
        self.ring.read().await.clone()
    }

    pub async fn role(&self) -> Role {
        *self.role.lock().await
    }

    pub async fn coordinator_addr(&self) -> Option<String> {
        self.coordinator_addr.read().await.clone()
    }

    pub(crate) async fn local_coordinator(&self) -> Option<Arc<Coordinator>> {
        self.local_coordinator.read().await.clone()
    }

    /// Single entry point for role changes; illegal moves are ignored.
    pub(crate) async fn transition_role(&self, next: Role) -> bool {
        self.role.lock().await.transition(next)
    }

    // ---- client protocol ----

    /// Handles one client request. Successful mutations kick off an
    /// asynchronous replica push; the client never waits for it.
    pub async fn handle_client(self: &Arc<Self>, req: ClientRequest) -> ClientResponse {
        match req {
            ClientRequest::Get { key } => self.handle_get(&key).await,
            ClientRequest::Put { key, value } => {
                let resp = self.handle_put(&key, &value).await;
                if matches!(
                    resp.status,
                    Status::PutSuccess | Status::PutUpdate | Status::DeleteSuccess
                ) {
                    let node = Arc::clone(self);
                    tokio::spawn(async move {
                        replication::force_sync(node).await;
                    });
                }
                resp
            }
            ClientRequest::Keyrange => match &*self.ring.read().await {
                Some(ring) => match ring.to_json() {
                    Ok(json) => ClientResponse::with_payload(Status::KeyrangeSuccess, json),
                    Err(err) => {
                        error!(%err, "ring serialization failed");
                        ClientResponse::status(Status::ServerStopped)
                    }
                },
                None => ClientResponse::status(Status::ServerStopped),
            },
            ClientRequest::KeyrangeRead => match &*self.ring.read().await {
                Some(ring) => match ring.read_ring().to_json() {
                    Ok(json) => ClientResponse::with_payload(Status::KeyrangeReadSuccess, json),
                    Err(err) => {
                        error!(%err, "ring serialization failed");
                        ClientResponse::status(Status::ServerStopped)
                    }
                },
                None => ClientResponse::status(Status::ServerStopped),
            },
        }
    }

    async fn handle_get(&self, key: &str) -> ClientResponse {
        let digest = key_digest(key);
        let ring = self.ring.read().await.clone();
        let Some(ring) = ring else {
            return ClientResponse::status(Status::ServerStopped);
        };

        if self.owns(&ring, digest) {
            let mut storage = self.storage.lock().await;
            if let Some(value) = storage.cache.get(key) {
                return ClientResponse::get_success(key, &value);
            }
            match storage.primary.get(key) {
                Ok(Some(value)) => {
                    // promote into the cache; a displaced entry goes to disk
                    if let Some((dk, dv)) = storage.cache.put(key, &value) {
                        if let Err(err) = storage.primary.put(&dk, &dv) {
                            error!(%err, key = %dk, "failed to flush displaced entry");
                        }
                    }
                    ClientResponse::get_success(key, &value)
                }
                Ok(None) => ClientResponse::status(Status::GetError),
                Err(err) => {
                    error!(%err, key, "storage read failed");
                    ClientResponse::status(Status::GetError)
                }
            }
        } else if let Some(pred) = self.replica_holding(&ring, digest).await {
            let storage = self.storage.lock().await;
            match storage.replicas.get(&pred).map(|s| s.get(key)) {
                Some(Ok(Some(value))) => ClientResponse::get_success(key, &value),
                Some(Ok(None)) => ClientResponse::status(Status::GetError),
                Some(Err(err)) => {
                    error!(%err, key, "replica read failed");
                    ClientResponse::status(Status::GetError)
                }
                None => ClientResponse::status(Status::GetError),
            }
        } else {
            self.not_responsible(&ring)
        }
    }

    async fn handle_put(&self, key: &str, value: &str) -> ClientResponse {
        // a write-locked node rejects every PUT, owned range or not
        if self.write_locked.load(Ordering::SeqCst) {
            return ClientResponse::status(Status::ServerWriteLock);
        }
        let ring = self.ring.read().await.clone();
        let Some(ring) = ring else {
            return ClientResponse::status(Status::ServerStopped);
        };
        let digest = key_digest(key);
        if !self.owns(&ring, digest) {
            return self.not_responsible(&ring);
        }

        let mut storage = self.storage.lock().await;

        // the wire value "null" is a tombstone, never a stored value
        if value == "null" {
            let cached = storage.cache.remove(key).is_some();
            return match storage.primary.remove(key) {
                Ok(removed) if cached || removed => {
                    ClientResponse::status(Status::DeleteSuccess)
                }
                Ok(_) => ClientResponse::status(Status::DeleteError),
                Err(err) => {
                    error!(%err, key, "storage delete failed");
                    ClientResponse::status(Status::DeleteError)
                }
            };
        }

        if storage.cache.contains(key) {
            storage.cache.put(key, value);
            return ClientResponse::status(Status::PutUpdate);
        }
        match storage.primary.get(key) {
            Ok(Some(_)) => match storage.primary.put(key, value) {
                Ok(_) => ClientResponse::status(Status::PutUpdate),
                Err(err) => {
                    error!(%err, key, "storage update failed");
                    ClientResponse::status(Status::PutError)
                }
            },
            Ok(None) => {
                if let Some((dk, dv)) = storage.cache.put(key, value) {
                    if let Err(err) = storage.primary.put(&dk, &dv) {
                        error!(%err, key = %dk, "failed to flush displaced entry");
                        return ClientResponse::status(Status::PutError);
                    }
                }
                ClientResponse::status(Status::PutSuccess)
            }
            Err(err) => {
                error!(%err, key, "storage read failed");
                ClientResponse::status(Status::PutError)
            }
        }
    }

    fn not_responsible(&self, ring: &Ring) -> ClientResponse {
        match ring.to_json() {
            Ok(json) => ClientResponse::with_payload(Status::ServerNotResponsible, json),
            Err(err) => {
                error!(%err, "ring serialization failed");
                ClientResponse::status(Status::ServerStopped)
            }
        }
    }

    fn owns(&self, ring: &Ring, digest: Digest) -> bool {
        ring.get(&self.hash)
            .map(|e| e.range.contains(digest))
            .unwrap_or(false)
    }

    /// The predecessor whose replicated range covers `digest`, if this
    /// node holds a replica store for it.
    async fn replica_holding(&self, ring: &Ring, digest: Digest) -> Option<Digest> {
        let entry = ring.get(&self.hash)?;
        let storage = self.storage.lock().await;
        for pred in &entry.predecessors {
            if !storage.replicas.contains_key(pred) {
                continue;
            }
            if let Some(pred_entry) = ring.get(pred) {
                if pred_entry.range.contains(digest) {
                    return Some(*pred);
                }
            }
        }
        None
    }

    // ---- peer protocol ----

    /// Handles one cluster-internal message. When this node hosts the
    /// coordinator, membership traffic is forwarded to it.
    pub async fn handle_peer(self: &Arc<Self>, msg: PeerMessage) -> PeerMessage {
        match msg.action {
            Action::SetWriteLock => {
                self.write_locked.store(true, Ordering::SeqCst);
                debug!("write lock set");
                PeerMessage::ack(Action::SetWriteLock)
            }
            Action::UnsetWriteLock => {
                self.write_locked.store(false, Ordering::SeqCst);
                debug!("write lock released");
                PeerMessage::ack(Action::UnsetWriteLock)
            }
            Action::InternalTransfer => self.on_internal_transfer(msg).await,
            Action::ForceSync => self.on_force_sync(msg).await,
            Action::MetadataUpdate => self.on_metadata_update(msg).await,
            // an election probe just needs proof of life
            Action::Election => PeerMessage::ack(Action::Election),
            Action::NewNode | Action::Delete | Action::Heartbeat => {
                match self.local_coordinator().await {
                    Some(coordinator) => coordinator.handle(msg).await,
                    None => {
                        warn!(action = ?msg.action, "membership message at non-coordinator");
                        PeerMessage::nack(msg.action)
                    }
                }
            }
        }
    }

    /// `INTERNAL_TRANSFER` is two messages in one: with `data` it is the
    /// payload of a hand-off and gets loaded into the primary store;
    /// without, it instructs this node to carve off everything up to
    /// `boundaryHash` and send it to `serverInfo`.
    async fn on_internal_transfer(&self, msg: PeerMessage) -> PeerMessage {
        if let Some(data) = msg.data {
            let records = decode_records(&data);
            let storage = self.storage.lock().await;
            return match storage.primary.bulk_load(&records) {
                Ok(()) => {
                    info!(records = records.len(), "transfer payload loaded");
                    PeerMessage::ack(Action::InternalTransfer)
                }
                Err(err) => {
                    error!(%err, "transfer load failed");
                    PeerMessage::nack(Action::InternalTransfer)
                }
            };
        }

        let (Some(dest), Some(boundary)) = (msg.server_info, msg.boundary_hash) else {
            warn!("transfer instruction missing destination or boundary");
            return PeerMessage::nack(Action::InternalTransfer);
        };

        // the outgoing range runs from our (pre-join) range start to the
        // joiner's position
        let start = {
            let ring = self.ring.read().await;
            match ring.as_ref().and_then(|r| r.get(&self.hash)) {
                Some(entry) => entry.range.start,
                None => {
                    warn!("transfer instruction before any ring snapshot");
                    return PeerMessage::nack(Action::InternalTransfer);
                }
            }
        };
        let range = HashRange {
            start,
            end: boundary,
        };

        let taken = {
            let mut storage = self.storage.lock().await;
            // cached entries may not have hit disk yet; flush before the
            // range scan so nothing in the moved range stays behind
            let cached = storage.cache.entries();
            if let Err(err) = storage.primary.bulk_load(&cached) {
                error!(%err, "cache flush before hand-off failed");
                return PeerMessage::nack(Action::InternalTransfer);
            }
            storage.cache.clear();
            match storage.primary.take_range(range) {
                Ok(taken) => taken,
                Err(err) => {
                    error!(%err, "range extraction failed");
                    return PeerMessage::nack(Action::InternalTransfer);
                }
            }
        };
        info!(records = taken.len(), dest = %dest.addr(), "handing off range");

        let payload =
            PeerMessage::request(Action::InternalTransfer).with_data(encode_records(&taken));
        match tessera_cluster::send_message(&dest.addr(), &payload).await {
            Ok(reply) if reply.success => PeerMessage::ack(Action::InternalTransfer),
            Ok(_) => {
                error!(dest = %dest.addr(), "destination rejected hand-off");
                PeerMessage::nack(Action::InternalTransfer)
            }
            Err(err) => {
                error!(dest = %dest.addr(), %err, "hand-off failed");
                PeerMessage::nack(Action::InternalTransfer)
            }
        }
    }

    /// `FORCE_SYNC`: a predecessor pushed its full data set. Replaces
    /// the replica store contents so re-applying a dump is a no-op.
    async fn on_force_sync(&self, msg: PeerMessage) -> PeerMessage {
        let Some(sender) = msg.server_info else {
            warn!("force sync without sender");
            return PeerMessage::nack(Action::ForceSync);
        };
        let sender_hash = key_digest(&sender.name());

        let expected = {
            let ring = self.ring.read().await;
            ring.as_ref()
                .and_then(|r| r.get(&self.hash))
                .map(|e| e.predecessors.contains(&sender_hash))
                .unwrap_or(false)
        };
        if !expected {
            // a push can race a membership change; refuse rather than
            // hold data for a node that is not our predecessor
            debug!(sender = %sender.name(), "force sync from non-predecessor");
            return PeerMessage::nack(Action::ForceSync);
        }

        let records = decode_records(&msg.data.unwrap_or_default());
        let mut storage = self.storage.lock().await;
        let replica = match storage.replicas.entry(sender_hash) {
            std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
            std::collections::hash_map::Entry::Vacant(e) => {
                match FileStore::open(self.replica_path(sender_hash)) {
                    Ok(store) => e.insert(store),
                    Err(err) => {
                        error!(%err, "replica store creation failed");
                        return PeerMessage::nack(Action::ForceSync);
                    }
                }
            }
        };
        let result = replica.clear().and_then(|()| replica.bulk_load(&records));
        match result {
            Ok(()) => {
                debug!(sender = %sender.name(), records = records.len(), "replica refreshed");
                PeerMessage::ack(Action::ForceSync)
            }
            Err(err) => {
                error!(%err, "replica load failed");
                PeerMessage::nack(Action::ForceSync)
            }
        }
    }

    /// `METADATA_UPDATE`: adopt the new ring, reconcile replica stores
    /// against the changed predecessor set, then re-push our own data to
    /// the (possibly changed) successors.
    async fn on_metadata_update(self: &Arc<Self>, msg: PeerMessage) -> PeerMessage {
        let Some(ring) = msg.ring_snapshot else {
            warn!("metadata update without ring");
            return PeerMessage::nack(Action::MetadataUpdate);
        };
        if let Some(coord) = msg.server_info {
            *self.coordinator_addr.write().await = Some(coord.addr());
        }
        self.install_ring(ring).await;

        let node = Arc::clone(self);
        tokio::spawn(async move {
            replication::force_sync(node).await;
        });
        PeerMessage::ack(Action::MetadataUpdate)
    }

    /// Adopts a ring snapshot: records our range and priority, creates
    /// replica stores for new predecessors and purges stores for hashes
    /// that stopped being predecessors.
    pub(crate) async fn install_ring(&self, ring: Ring) {
        let new_preds = ring
            .get(&self.hash)
            .map(|e| e.predecessors.clone())
            .unwrap_or_default();
        if let Some(entry) = ring.get(&self.hash) {
            self.priority.store(entry.priority, Ordering::SeqCst);
        }

        {
            let mut storage = self.storage.lock().await;
            let stale: Vec<Digest> = storage
                .replicas
                .keys()
                .filter(|h| !new_preds.contains(h))
                .copied()
                .collect();
            for hash in stale {
                if let Some(store) = storage.replicas.remove(&hash) {
                    if let Err(err) = std::fs::remove_file(store.path()) {
                        warn!(%err, %hash, "replica file removal failed");
                    }
                    info!(%hash, "replica purged");
                }
            }
            for pred in &new_preds {
                if !storage.replicas.contains_key(pred) {
                    match FileStore::open(self.replica_path(*pred)) {
                        Ok(store) => {
                            storage.replicas.insert(*pred, store);
                            info!(hash = %pred, "replica created");
                        }
                        Err(err) => error!(%err, hash = %pred, "replica creation failed"),
                    }
                }
            }
        }

        *self.ring.write().await = Some(ring);
        debug!("ring snapshot installed");
    }

    fn replica_path(&self, hash: Digest) -> PathBuf {
        self.data_dir
            .join(format!("replica-{}-{}.store", self.info.port, hash))
    }

    // ---- lifecycle ----

    /// Installs a locally hosted coordinator after winning an election.
    pub(crate) async fn host_coordinator(&self, coordinator: Arc<Coordinator>) {
        *self.coordinator_addr.write().await = Some(self.info.addr());
        *self.local_coordinator.write().await = Some(coordinator);
    }

    /// Flushes the cache to the primary store and returns a full dump,
    /// in wire line form, for the graceful-leave message.
    pub(crate) async fn drain(&self) -> Vec<String> {
        let mut storage = self.storage.lock().await;
        let cached = storage.cache.entries();
        if let Err(err) = storage.primary.bulk_load(&cached) {
            error!(%err, "cache flush failed");
        }
        storage.cache.clear();
        match storage.primary.dump_all() {
            Ok(records) => encode_records(&records),
            Err(err) => {
                error!(%err, "dump failed during drain");
                Vec::new()
            }
        }
    }

    /// Full owned data set (primary overlaid with cache), wire form.
    pub(crate) async fn owned_records(&self) -> Vec<String> {
        let storage = self.storage.lock().await;
        match storage.full_dump() {
            Ok(records) => encode_records(&records),
            Err(err) => {
                error!(%err, "dump failed");
                Vec::new()
            }
        }
    }

    /// Successor addresses from the current ring snapshot.
    pub(crate) async fn successor_infos(&self) -> Vec<ServerInfo> {
        let ring = self.ring.read().await;
        let Some(ring) = ring.as_ref() else {
            return Vec::new();
        };
        let Some(entry) = ring.get(&self.hash) else {
            return Vec::new();
        };
        entry
            .successors
            .iter()
            .filter_map(|h| ring.get(h))
            .map(|e| ServerInfo::new(e.host.clone(), e.port))
            .collect()
    }
}
