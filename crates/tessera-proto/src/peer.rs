//! JSON messages exchanged between cluster members and the coordinator.
//!
//! One JSON object per newline-terminated line. All fields beyond
//! `action` and `success` are optional; which ones are present depends
//! on the action.

use serde::{Deserialize, Serialize};

use tessera_ring::{Digest, Ring};

use crate::ProtoError;

/// What a peer message asks for (or answers about).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    /// A node announces itself to the coordinator.
    NewNode,
    /// A node leaves gracefully, carrying its full dump.
    Delete,
    /// Liveness probe from a member to the coordinator.
    Heartbeat,
    /// Election probe to a higher-priority member.
    Election,
    /// Coordinator tells a node to reject client writes.
    SetWriteLock,
    /// Coordinator releases the write lock.
    UnsetWriteLock,
    /// Range hand-off: either an instruction to send a range to a peer,
    /// or the payload itself when `data` is present.
    InternalTransfer,
    /// Full replica dump pushed from an owner to a successor.
    ForceSync,
    /// Coordinator broadcast of a new ring snapshot.
    MetadataUpdate,
}

/// Network identity of a cluster member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub host: String,
    pub port: u16,
}

impl ServerInfo {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// The member's ring name, `host:port`.
    pub fn name(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn addr(&self) -> String {
        self.name()
    }
}

/// One cluster-internal message, request or reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerMessage {
    pub action: Action,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_info: Option<ServerInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ring_snapshot: Option<Ring>,
    /// Key-value records in storage line form, `key,value`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<String>>,
    /// Scopes an `InternalTransfer` instruction to one ring position.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boundary_hash: Option<Digest>,
}

impl PeerMessage {
    /// A request with no payload.
    pub fn request(action: Action) -> Self {
        Self {
            action,
            success: false,
            server_info: None,
            ring_snapshot: None,
            data: None,
            boundary_hash: None,
        }
    }

    /// A positive reply to `action`.
    pub fn ack(action: Action) -> Self {
        Self {
            success: true,
            ..Self::request(action)
        }
    }

    /// A negative reply to `action`.
    pub fn nack(action: Action) -> Self {
        Self::request(action)
    }

    pub fn with_server_info(mut self, info: ServerInfo) -> Self {
        self.server_info = Some(info);
        self
    }

    pub fn with_ring(mut self, ring: Ring) -> Self {
        self.ring_snapshot = Some(ring);
        self
    }

    pub fn with_data(mut self, data: Vec<String>) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_boundary(mut self, hash: Digest) -> Self {
        self.boundary_hash = Some(hash);
        self
    }

    /// Serializes to a single wire line (no trailing newline).
    pub fn to_line(&self) -> Result<String, ProtoError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses one wire line.
    pub fn from_line(line: &str) -> Result<Self, ProtoError> {
        Ok(serde_json::from_str(line)?)
    }
}

/// Converts key-value pairs to the `key,value` lines carried in `data`.
pub fn encode_records(records: &[(String, String)]) -> Vec<String> {
    records.iter().map(|(k, v)| format!("{k},{v}")).collect()
}

/// Parses `key,value` lines back into pairs, skipping malformed ones.
pub fn decode_records(lines: &[String]) -> Vec<(String, String)> {
    lines
        .iter()
        .filter_map(|line| {
            line.split_once(',')
                .map(|(k, v)| (k.to_string(), v.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_roundtrip() {
        let msg = PeerMessage::request(Action::Heartbeat)
            .with_server_info(ServerInfo::new("127.0.0.1", 5000));
        let line = msg.to_line().unwrap();
        assert!(!line.contains('\n'));
        let back = PeerMessage::from_line(&line).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn action_uses_wire_names() {
        let line = PeerMessage::request(Action::InternalTransfer)
            .to_line()
            .unwrap();
        assert!(line.contains("\"INTERNAL_TRANSFER\""));
        let line = PeerMessage::request(Action::NewNode).to_line().unwrap();
        assert!(line.contains("\"NEW_NODE\""));
    }

    #[test]
    fn transfer_with_payload_roundtrip() {
        let records = vec![
            ("a".to_string(), "1".to_string()),
            ("b".to_string(), "x,y".to_string()),
        ];
        let msg = PeerMessage::ack(Action::InternalTransfer).with_data(encode_records(&records));
        let back = PeerMessage::from_line(&msg.to_line().unwrap()).unwrap();
        assert_eq!(decode_records(back.data.as_deref().unwrap()), records);
    }

    #[test]
    fn ring_snapshot_survives_transit() {
        let mut ring = Ring::new();
        ring.insert("127.0.0.1", 5000, 0);
        ring.insert("127.0.0.1", 5001, 1);
        let msg = PeerMessage::ack(Action::MetadataUpdate).with_ring(ring.clone());
        let back = PeerMessage::from_line(&msg.to_line().unwrap()).unwrap();
        assert_eq!(back.ring_snapshot, Some(ring));
    }

    #[test]
    fn absent_fields_are_omitted() {
        let line = PeerMessage::request(Action::Heartbeat).to_line().unwrap();
        assert!(!line.contains("serverInfo"));
        assert!(!line.contains("data"));
        assert!(!line.contains("boundaryHash"));
    }

    #[test]
    fn malformed_line_is_an_error() {
        assert!(PeerMessage::from_line("{\"action\":").is_err());
        assert!(PeerMessage::from_line("not json").is_err());
    }
}
