//! Ring-aware request routing.
//!
//! The client keeps the last ring snapshot it has seen and connects to
//! whichever node should answer: the owner for writes, the owner or a
//! random replica holder for reads. On `SERVER_NOT_RESPONSIBLE` (or a
//! dead connection) it refreshes the snapshot, re-routes, and retries
//! exactly once.

use tessera_proto::{ClientRequest, ClientResponse, Status};
use tessera_ring::{key_digest, Ring};

use crate::connection::{Connection, ConnectionError};

pub struct RoutingClient {
    conn: Connection,
    ring: Option<Ring>,
}

impl RoutingClient {
    pub async fn connect(addr: &str) -> Result<Self, ConnectionError> {
        let conn = Connection::connect(addr).await?;
        Ok(Self { conn, ring: None })
    }

    pub fn addr(&self) -> &str {
        self.conn.addr()
    }

    /// Executes one request with routing and the single retry. A cluster
    /// that has become unreachable surfaces as a DISCONNECT response.
    pub async fn execute(&mut self, req: ClientRequest) -> Result<ClientResponse, ConnectionError> {
        match self.dispatch(&req).await {
            Err(ConnectionError::Disconnected) => {
                Ok(ClientResponse::status(Status::Disconnect))
            }
            other => other,
        }
    }

    async fn dispatch(&mut self, req: &ClientRequest) -> Result<ClientResponse, ConnectionError> {
        let (key, read) = match req {
            ClientRequest::Get { key } => (Some(key.clone()), true),
            ClientRequest::Put { key, .. } => (Some(key.clone()), false),
            _ => (None, false),
        };

        if let Some(key) = &key {
            // best effort: stale snapshots are corrected by the reply
            let _ = self.route_to(key, read).await;
        }

        let resp = match self.conn.send(req).await {
            Ok(resp) => resp,
            Err(_) if key.is_some() => {
                // node gone: find a surviving member and retry once
                self.reroute_after_failure(key.as_deref().unwrap_or_default(), read)
                    .await?;
                return self.conn.send(req).await;
            }
            Err(err) => return Err(err),
        };

        match resp.status {
            Status::ServerNotResponsible => {
                // the reply carries the ring we should have used
                if let Some(ring) = resp.payload.as_deref().and_then(|p| Ring::from_json(p).ok())
                {
                    self.ring = Some(ring);
                } else {
                    self.refresh_ring().await?;
                }
                if let Some(key) = &key {
                    self.route_to(key, read).await?;
                }
                self.conn.send(req).await
            }
            Status::KeyrangeSuccess => {
                if let Some(ring) = resp.payload.as_deref().and_then(|p| Ring::from_json(p).ok())
                {
                    self.ring = Some(ring);
                }
                Ok(resp)
            }
            _ => Ok(resp),
        }
    }

    /// Updates the cached ring via `keyrange` on the current connection.
    async fn refresh_ring(&mut self) -> Result<(), ConnectionError> {
        let resp = self.conn.send(&ClientRequest::Keyrange).await?;
        if resp.status == Status::KeyrangeSuccess {
            if let Some(ring) = resp.payload.as_deref().and_then(|p| Ring::from_json(p).ok()) {
                self.ring = Some(ring);
            }
        }
        Ok(())
    }

    /// Reconnects to the node that should serve `key`, if it is not the
    /// one we already talk to.
    async fn route_to(&mut self, key: &str, read: bool) -> Result<(), ConnectionError> {
        let Some(ring) = &self.ring else {
            return Ok(());
        };
        let digest = key_digest(key);
        let target = if read {
            ring.read_node_for_key(digest)
        } else {
            ring.node_for_key(digest)
        };
        let Some(target) = target else {
            return Ok(());
        };
        let addr = target.addr();
        if addr != self.conn.addr() {
            self.conn = Connection::connect(&addr).await?;
        }
        Ok(())
    }

    /// The node we talked to is gone: drop it from the snapshot, attach
    /// to any surviving member, refresh, and route again.
    async fn reroute_after_failure(
        &mut self,
        key: &str,
        read: bool,
    ) -> Result<(), ConnectionError> {
        let dead = self.conn.addr().to_string();
        let survivors: Vec<String> = self
            .ring
            .iter()
            .flat_map(|r| r.iter())
            .map(|e| e.addr())
            .filter(|a| *a != dead)
            .collect();

        let mut attached = false;
        for addr in survivors {
            if let Ok(conn) = Connection::connect(&addr).await {
                self.conn = conn;
                attached = true;
                break;
            }
        }
        if !attached {
            return Err(ConnectionError::Disconnected);
        }

        self.refresh_ring().await?;
        self.route_to(key, read).await
    }
}
