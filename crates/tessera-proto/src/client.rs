//! The text protocol spoken by clients.
//!
//! Requests: `get <key>`, `put <key> <value>`, `put <key> null`
//! (delete), `keyrange`, `keyrange_read`. The value is everything after
//! the key, spaces included. Responses are a status word followed by an
//! optional payload: key and value for reads, a ring snapshot for
//! keyrange and re-routing statuses.

use std::fmt;
use std::str::FromStr;

use crate::ProtoError;

/// Outcome carried on every response line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    GetSuccess,
    GetError,
    PutSuccess,
    PutUpdate,
    PutError,
    DeleteSuccess,
    DeleteError,
    ServerNotResponsible,
    ServerWriteLock,
    ServerStopped,
    KeyrangeSuccess,
    KeyrangeReadSuccess,
    Disconnect,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::GetSuccess => "GET_SUCCESS",
            Status::GetError => "GET_ERROR",
            Status::PutSuccess => "PUT_SUCCESS",
            Status::PutUpdate => "PUT_UPDATE",
            Status::PutError => "PUT_ERROR",
            Status::DeleteSuccess => "DELETE_SUCCESS",
            Status::DeleteError => "DELETE_ERROR",
            Status::ServerNotResponsible => "SERVER_NOT_RESPONSIBLE",
            Status::ServerWriteLock => "SERVER_WRITE_LOCK",
            Status::ServerStopped => "SERVER_STOPPED",
            Status::KeyrangeSuccess => "KEYRANGE_SUCCESS",
            Status::KeyrangeReadSuccess => "KEYRANGE_READ_SUCCESS",
            Status::Disconnect => "DISCONNECT",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = ProtoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GET_SUCCESS" => Ok(Status::GetSuccess),
            "GET_ERROR" => Ok(Status::GetError),
            "PUT_SUCCESS" => Ok(Status::PutSuccess),
            "PUT_UPDATE" => Ok(Status::PutUpdate),
            "PUT_ERROR" => Ok(Status::PutError),
            "DELETE_SUCCESS" => Ok(Status::DeleteSuccess),
            "DELETE_ERROR" => Ok(Status::DeleteError),
            "SERVER_NOT_RESPONSIBLE" => Ok(Status::ServerNotResponsible),
            "SERVER_WRITE_LOCK" => Ok(Status::ServerWriteLock),
            "SERVER_STOPPED" => Ok(Status::ServerStopped),
            "KEYRANGE_SUCCESS" => Ok(Status::KeyrangeSuccess),
            "KEYRANGE_READ_SUCCESS" => Ok(Status::KeyrangeReadSuccess),
            "DISCONNECT" => Ok(Status::Disconnect),
            other => Err(ProtoError::UnknownStatus(other.to_string())),
        }
    }
}

/// A parsed client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientRequest {
    Get { key: String },
    Put { key: String, value: String },
    Keyrange,
    KeyrangeRead,
}

impl ClientRequest {
    /// Parses one request line. The value of a `put` is the remainder of
    /// the line after the key, so values may contain spaces.
    pub fn parse(line: &str) -> Result<Self, ProtoError> {
        let line = line.trim_end_matches(['\r', '\n']);
        let mut parts = line.splitn(2, ' ');
        let command = parts.next().unwrap_or_default();
        let rest = parts.next().unwrap_or_default();
        match command {
            "get" => {
                let key = rest.trim();
                if key.is_empty() || key.contains(' ') {
                    return Err(ProtoError::MalformedRequest(line.to_string()));
                }
                Ok(ClientRequest::Get {
                    key: key.to_string(),
                })
            }
            "put" => {
                let (key, value) = rest
                    .split_once(' ')
                    .ok_or_else(|| ProtoError::MalformedRequest(line.to_string()))?;
                if key.is_empty() || value.is_empty() {
                    return Err(ProtoError::MalformedRequest(line.to_string()));
                }
                Ok(ClientRequest::Put {
                    key: key.to_string(),
                    value: value.to_string(),
                })
            }
            "keyrange" if rest.is_empty() => Ok(ClientRequest::Keyrange),
            "keyrange_read" if rest.is_empty() => Ok(ClientRequest::KeyrangeRead),
            _ => Err(ProtoError::MalformedRequest(line.to_string())),
        }
    }

    /// Serializes back to a request line.
    pub fn to_line(&self) -> String {
        match self {
            ClientRequest::Get { key } => format!("get {key}"),
            ClientRequest::Put { key, value } => format!("put {key} {value}"),
            ClientRequest::Keyrange => "keyrange".to_string(),
            ClientRequest::KeyrangeRead => "keyrange_read".to_string(),
        }
    }
}

/// One response line: a status word plus an optional payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientResponse {
    pub status: Status,
    pub payload: Option<String>,
}

impl ClientResponse {
    pub fn status(status: Status) -> Self {
        Self {
            status,
            payload: None,
        }
    }

    pub fn with_payload(status: Status, payload: impl Into<String>) -> Self {
        Self {
            status,
            payload: Some(payload.into()),
        }
    }

    /// `GET_SUCCESS key value`.
    pub fn get_success(key: &str, value: &str) -> Self {
        Self::with_payload(Status::GetSuccess, format!("{key} {value}"))
    }

    /// Serializes to a response line (no trailing newline).
    pub fn to_line(&self) -> String {
        match &self.payload {
            Some(payload) => format!("{} {payload}", self.status),
            None => self.status.to_string(),
        }
    }

    /// Parses one response line.
    pub fn parse(line: &str) -> Result<Self, ProtoError> {
        let line = line.trim_end_matches(['\r', '\n']);
        let (status, payload) = match line.split_once(' ') {
            Some((word, rest)) => (word.parse()?, Some(rest.to_string())),
            None => (line.parse()?, None),
        };
        Ok(Self { status, payload })
    }

    /// For a `GET_SUCCESS` payload, the value past the echoed key.
    pub fn value(&self) -> Option<&str> {
        self.payload
            .as_deref()
            .and_then(|p| p.split_once(' '))
            .map(|(_, v)| v)
    }
}
