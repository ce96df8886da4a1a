//! tessera-ring: keyspace hashing and ring metadata.
//!
//! This crate defines the consistent-hashing ring that every other part of
//! tessera routes through:
//!
//! - **Digest**: a 128-bit position on the circular keyspace, derived from
//!   a key or a node name with MD5.
//! - **Ring**: an ordered map of cluster members keyed by digest, with
//!   wrap-aware range ownership, neighbor navigation, and a JSON snapshot
//!   form that round-trips exactly.
//!
//! The ring is owned by the coordinator; storage nodes and clients only
//! ever hold read-only snapshots of it.
//!
//! # Quick start
//!
//! ```rust
//! use tessera_ring::{key_digest, Ring};
//!
//! let mut ring = Ring::new();
//! ring.insert("127.0.0.1", 5000, 0);
//! ring.insert("127.0.0.1", 5001, 1);
//!
//! let owner = ring.node_for_key(key_digest("mykey")).unwrap();
//! assert!(owner.range.contains(key_digest("mykey")));
//! ```

mod error;
mod hash;
mod ring;

pub use error::RingError;
pub use hash::{key_digest, Digest};
pub use ring::{HashRange, Ring, RingEntry, REPLICATION_FACTOR};
