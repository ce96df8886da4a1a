//! The consistent-hashing ring.
//!
//! One `RingEntry` per cluster member, keyed by the digest of the member's
//! `host:port` name. Ranges partition the full keyspace with no gaps or
//! overlaps: each entry owns the half-open-to-closed interval from its
//! predecessor's position (exclusive) to its own position (inclusive).
//! A single-node ring degenerates to `start == end`, meaning the whole
//! keyspace.
//!
//! Neighbors are looked up by key rather than held as references, so the
//! circular structure carries no ownership cycles.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{key_digest, Digest, RingError};

/// Number of successor nodes that hold a standby copy of a node's data.
pub const REPLICATION_FACTOR: usize = 2;

/// The hash interval a node owns: `(start, end]`, wrap-aware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashRange {
    /// Exclusive lower bound (the predecessor's position).
    pub start: Digest,
    /// Inclusive upper bound (the owning node's own position).
    pub end: Digest,
}

impl HashRange {
    /// Returns true if `d` falls inside this range.
    ///
    /// A range whose start equals its end covers the entire keyspace
    /// (single-node ring); a range whose start exceeds its end wraps
    /// through the keyspace minimum.
    pub fn contains(&self, d: Digest) -> bool {
        if self.start < self.end {
            d > self.start && d <= self.end
        } else {
            d > self.start || d <= self.end
        }
    }
}

/// One cluster member as recorded in the ring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingEntry {
    /// Unique member name, `host:port`.
    pub name: String,
    pub host: String,
    pub port: u16,
    /// This member's position on the ring: `key_digest(name)`.
    pub hash: Digest,
    /// The keyspace interval this member owns.
    pub range: HashRange,
    /// Positions of the up-to-R members preceding this one, whose data
    /// this member replicates. Never contains the member itself.
    pub predecessors: Vec<Digest>,
    /// Positions of the up-to-R members following this one, to which this
    /// member pushes its own data.
    pub successors: Vec<Digest>,
    /// Monotonic join order; the election tie-breaker.
    pub priority: u64,
}

impl RingEntry {
    /// The member's advertised address as a connect string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// The ordered set of cluster members positioned by digest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ring {
    entries: BTreeMap<Digest, RingEntry>,
}

impl Ring {
    /// Creates an empty ring.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the entry at the given position, if any.
    pub fn get(&self, hash: &Digest) -> Option<&RingEntry> {
        self.entries.get(hash)
    }

    /// Iterates entries in ring (digest) order.
    pub fn iter(&self) -> impl Iterator<Item = &RingEntry> {
        self.entries.values()
    }

    /// The highest join priority currently in the ring.
    pub fn max_priority(&self) -> Option<u64> {
        self.entries.values().map(|e| e.priority).max()
    }

    /// Position of the member that owns `d`: the first entry at or after
    /// `d`, wrapping to the minimum entry past the keyspace maximum.
    fn owner_key(&self, d: Digest) -> Option<Digest> {
        self.entries
            .range(d..)
            .next()
            .map(|(k, _)| *k)
            .or_else(|| self.entries.keys().next().copied())
    }

    /// The member responsible for a key hash. Total for non-empty rings.
    pub fn node_for_key(&self, d: Digest) -> Option<&RingEntry> {
        let key = self.owner_key(d)?;
        self.entries.get(&key)
    }

    /// The owning member plus the up-to-R successors holding a replica.
    /// First element is always the owner.
    pub fn read_set_for_key(&self, d: Digest) -> Vec<&RingEntry> {
        let Some(owner) = self.node_for_key(d) else {
            return Vec::new();
        };
        let mut set = vec![owner];
        for succ in &owner.successors {
            if let Some(entry) = self.entries.get(succ) {
                set.push(entry);
            }
        }
        set
    }

    /// The owner or, at random, one of the successors holding a replica.
    /// Clients use this to spread read load.
    pub fn read_node_for_key(&self, d: Digest) -> Option<&RingEntry> {
        use rand::Rng;

        let set = self.read_set_for_key(d);
        if set.is_empty() {
            return None;
        }
        let idx = rand::rng().random_range(0..set.len());
        Some(set[idx])
    }

    /// Ring-wrapping successor: the next entry after `hash`.
    pub fn successor_of(&self, hash: Digest) -> Option<&RingEntry> {
        self.entries
            .range((
                std::ops::Bound::Excluded(hash),
                std::ops::Bound::Unbounded,
            ))
            .next()
            .map(|(_, e)| e)
            .or_else(|| self.entries.values().next())
    }

    /// Ring-wrapping predecessor: the last entry before `hash`.
    pub fn predecessor_of(&self, hash: Digest) -> Option<&RingEntry> {
        self.entries
            .range(..hash)
            .next_back()
            .map(|(_, e)| e)
            .or_else(|| self.entries.values().next_back())
    }

    /// Adds a member, splitting the range of the node that previously
    /// owned its position: the new member takes the back half up to its
    /// own digest. Recomputes neighbor lists for every entry.
    ///
    /// Re-inserting an existing member is a no-op. Returns the member's
    /// ring position.
    pub fn insert(&mut self, host: &str, port: u16, priority: u64) -> Digest {
        let name = format!("{host}:{port}");
        let hash = key_digest(&name);
        if self.entries.contains_key(&hash) {
            return hash;
        }

        let (start, split) = match self.owner_key(hash) {
            Some(succ) => {
                let old_start = self.entries[&succ].range.start;
                (old_start, Some(succ))
            }
            None => (hash, None), // first member owns the full keyspace
        };

        self.entries.insert(
            hash,
            RingEntry {
                name,
                host: host.to_string(),
                port,
                hash,
                range: HashRange { start, end: hash },
                predecessors: Vec::new(),
                successors: Vec::new(),
                priority,
            },
        );

        if let Some(succ) = split {
            if let Some(entry) = self.entries.get_mut(&succ) {
                entry.range.start = hash;
            }
        }

        self.refresh_neighbors();
        hash
    }

    /// Removes a member; its immediate successor absorbs the freed range.
    /// Recomputes neighbor lists. Returns the removed entry.
    pub fn remove(&mut self, hash: &Digest) -> Option<RingEntry> {
        let removed = self.entries.remove(hash)?;
        if let Some(succ) = self.owner_key(*hash) {
            if let Some(entry) = self.entries.get_mut(&succ) {
                entry.range.start = removed.range.start;
            }
        }
        self.refresh_neighbors();
        Some(removed)
    }

    /// Recomputes every entry's predecessor/successor lists. Lists have at
    /// most `REPLICATION_FACTOR` members and never include the entry itself.
    fn refresh_neighbors(&mut self) {
        let keys: Vec<Digest> = self.entries.keys().copied().collect();
        let n = keys.len();
        let hops = REPLICATION_FACTOR.min(n.saturating_sub(1));
        for (i, key) in keys.iter().enumerate() {
            let successors = (1..=hops).map(|step| keys[(i + step) % n]).collect();
            let predecessors = (1..=hops).map(|step| keys[(i + n - step) % n]).collect();
            if let Some(entry) = self.entries.get_mut(key) {
                entry.successors = successors;
                entry.predecessors = predecessors;
            }
        }
    }

    /// A copy of the ring where each entry's range is widened to cover
    /// everything it holds a replica of. Served for `keyrange_read` so
    /// clients can direct reads at replica holders.
    pub fn read_ring(&self) -> Ring {
        let mut widened = self.clone();
        for entry in widened.entries.values_mut() {
            if let Some(furthest) = entry.predecessors.last() {
                if let Some(pred) = self.entries.get(furthest) {
                    entry.range.start = pred.range.start;
                }
            }
        }
        widened
    }

    /// Serializes the ring to its wire form. Round-trips exactly: same
    /// node set, same ranges, same order.
    pub fn to_json(&self) -> Result<String, RingError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses the wire form produced by [`Ring::to_json`].
    pub fn from_json(s: &str) -> Result<Ring, RingError> {
        Ok(serde_json::from_str(s)?)
    }
}
