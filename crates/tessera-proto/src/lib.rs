//! Wire protocol for both sides of the house.
//!
//! Clients speak a text protocol: one whitespace-separated command per
//! newline-terminated line, one status line back. Cluster members speak
//! JSON: one serialized [`PeerMessage`] object per line over the same
//! kind of socket. Both are strict request/response.

mod client;
mod error;
mod peer;
pub mod wire;

pub use client::{ClientRequest, ClientResponse, Status};
pub use error::ProtoError;
pub use peer::{decode_records, encode_records, Action, PeerMessage, ServerInfo};
