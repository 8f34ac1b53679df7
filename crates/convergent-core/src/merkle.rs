//! Content-addressed digests of a CRDT's delta history, used to find
//! the minimal set of updates two replicas must exchange.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// A 32-byte SHA-256 digest.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Hash([u8; 32]);

impl Hash {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Hash(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn zero() -> Self {
        Hash([0u8; 32])
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    pub fn to_hex(&self) -> String {
        crate::wire::hex_encode(&self.0)
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = crate::wire::hex_decode(s).ok()?;
        if bytes.len() != 32 {
            return None;
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        Some(Hash(out))
    }

    pub fn of(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        let digest = hasher.finalize();
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        Hash(out)
    }

    /// Hashes the concatenation of `items` in the order given. Callers
    /// that need a deterministic combined hash across an unordered
    /// collection must sort `items` first.
    pub fn of_all<'a, I: IntoIterator<Item = &'a [u8]>>(items: I) -> Self {
        let mut hasher = Sha256::new();
        for item in items {
            hasher.update(item);
        }
        let digest = hasher.finalize();
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        Hash(out)
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.to_hex())
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// `(root, sorted leaf ids, leaf id -> packed update)`.
pub struct MerkleHistory {
    pub root: Hash,
    pub leaf_ids: Vec<Hash>,
    pub leaves: BTreeMap<Hash, Vec<u8>>,
}

/// Builds the Merkle history of a CRDT's packed delta history: each
/// update's leaf id is the SHA-256 of its packed bytes, and the root is
/// the SHA-256 of the concatenation of the sorted leaf ids.
pub fn get_merkle_history<'a, I: IntoIterator<Item = &'a [u8]>>(packed_updates: I) -> MerkleHistory {
    let mut leaves = BTreeMap::new();
    for packed in packed_updates {
        leaves.insert(Hash::of(packed), packed.to_vec());
    }
    let leaf_ids: Vec<Hash> = leaves.keys().copied().collect();
    let root = Hash::of_all(leaf_ids.iter().map(|h| h.as_bytes().as_slice()));
    MerkleHistory {
        root,
        leaf_ids,
        leaves,
    }
}

/// Given a peer's `(root, leaf_ids)`, returns the subset of the peer's
/// leaf ids this side is missing, or an empty list when the roots
/// already match.
pub fn resolve_merkle_histories(
    local: &MerkleHistory,
    peer_root: Hash,
    peer_leaf_ids: &[Hash],
) -> Vec<Hash> {
    if local.root == peer_root {
        return Vec::new();
    }
    peer_leaf_ids
        .iter()
        .filter(|id| !local.leaves.contains_key(id))
        .copied()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        assert_eq!(Hash::of(b"hello"), Hash::of(b"hello"));
    }

    #[test]
    fn different_data_hashes_differently() {
        assert_ne!(Hash::of(b"hello"), Hash::of(b"world"));
    }

    #[test]
    fn hex_round_trips() {
        let h = Hash::of(b"round-trip-me");
        assert_eq!(Hash::from_hex(&h.to_hex()), Some(h));
    }

    #[test]
    fn identical_histories_need_nothing() {
        let a = get_merkle_history(vec![b"one".as_slice(), b"two".as_slice()]);
        let b = get_merkle_history(vec![b"two".as_slice(), b"one".as_slice()]);
        assert_eq!(a.root, b.root);
        assert!(resolve_merkle_histories(&a, b.root, &b.leaf_ids).is_empty());
    }

    #[test]
    fn missing_leaves_are_reported() {
        let a = get_merkle_history(vec![b"one".as_slice()]);
        let b = get_merkle_history(vec![b"one".as_slice(), b"two".as_slice()]);
        let missing = resolve_merkle_histories(&a, b.root, &b.leaf_ids);
        assert_eq!(missing, vec![Hash::of(b"two")]);
    }
}
