//! The keyspace digest.
//!
//! Both keys and node names hash onto the same circular 128-bit keyspace,
//! so a node's position and a key's position are directly comparable.

use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::RingError;

/// A position on the circular keyspace: a 128-bit MD5 digest.
///
/// Ordered by byte value, which matches the lexicographic order of its
/// lowercase-hex rendering. Serialized as the 32-character hex string so it
/// can double as a JSON map key.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Digest(pub [u8; 16]);

impl Digest {
    /// The lowest point of the keyspace (all zero bytes).
    pub const MIN: Digest = Digest([0x00; 16]);

    /// The highest point of the keyspace (all 0xFF bytes).
    pub const MAX: Digest = Digest([0xFF; 16]);

    /// Renders the digest as 32 lowercase hex characters.
    pub fn to_hex(self) -> String {
        let mut out = String::with_capacity(32);
        for byte in self.0 {
            out.push_str(&format!("{byte:02x}"));
        }
        out
    }

    /// Parses a 32-character hex string (case insensitive).
    pub fn from_hex(s: &str) -> Result<Self, RingError> {
        if s.len() != 32 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(RingError::InvalidDigest(s.to_string()));
        }
        let mut bytes = [0u8; 16];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let hi = hex_val(chunk[0]);
            let lo = hex_val(chunk[1]);
            bytes[i] = (hi << 4) | lo;
        }
        Ok(Digest(bytes))
    }
}

fn hex_val(c: u8) -> u8 {
    match c {
        b'0'..=b'9' => c - b'0',
        b'a'..=b'f' => c - b'a' + 10,
        b'A'..=b'F' => c - b'A' + 10,
        _ => 0, // callers validate before converting
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form for readable logs (similar to git short hashes)
        write!(f, "Digest({}..)", &self.to_hex()[..8])
    }
}

impl FromStr for Digest {
    type Err = RingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Digest::from_hex(s)
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Digest::from_hex(&s).map_err(D::Error::custom)
    }
}

/// Hashes a key or node name onto the keyspace.
pub fn key_digest(s: &str) -> Digest {
    use md5::Digest as _;

    let mut hasher = md5::Md5::new();
    hasher.update(s.as_bytes());
    let out = hasher.finalize();
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&out);
    Digest(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_digest() {
        assert_eq!(
            key_digest("testKey").to_hex(),
            "24afda34e3f74e54b61a8e4cbe921650"
        );
    }

    #[test]
    fn hex_round_trip() {
        let d = key_digest("some key");
        let parsed = Digest::from_hex(&d.to_hex()).unwrap();
        assert_eq!(d, parsed);
    }

    #[test]
    fn hex_uppercase_accepted() {
        let d = key_digest("abc");
        let upper = d.to_hex().to_ascii_uppercase();
        assert_eq!(Digest::from_hex(&upper).unwrap(), d);
    }

    #[test]
    fn invalid_hex_rejected() {
        assert!(Digest::from_hex("not hex").is_err());
        assert!(Digest::from_hex("24afda34").is_err());
        assert!(Digest::from_hex("zzafda34e3f74e54b61a8e4cbe921650").is_err());
    }

    #[test]
    fn ordering_matches_hex() {
        let a = key_digest("a");
        let b = key_digest("b");
        assert_eq!(a < b, a.to_hex() < b.to_hex());
    }

    #[test]
    fn min_max_span_keyspace() {
        let d = key_digest("anything");
        assert!(Digest::MIN <= d && d <= Digest::MAX);
    }

    #[test]
    fn serde_as_hex_string() {
        let d = key_digest("testKey");
        let json = serde_json::to_string(&d).unwrap();
        assert_eq!(json, "\"24afda34e3f74e54b61a8e4cbe921650\"");
        let back: Digest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, d);
    }
}
