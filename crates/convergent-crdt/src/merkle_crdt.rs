//! A small shared trait giving every CRDT in this crate its Merkle
//! anti-entropy methods for free, once it can produce its `history()`.
//!
//! Grounded on the same "derive the compound behavior from one
//! primitive" shape as `convergent_core`'s lattice-free design: rather
//! than a join-semilattice `bottom()`/`join()` pair, the primitive here
//! is `history()`, and `get_merkle_history`/`resolve_merkle_histories`
//! fall out of it mechanically.

use convergent_core::{get_merkle_history, resolve_merkle_histories, Hash, MerkleHistory, StateUpdate, Timestamp};

pub trait MerkleCrdt {
    /// All updates applied so far, optionally windowed to
    /// `[from_ts, until_ts]`. Replaying this sequence against a fresh
    /// instance must reproduce equivalent state.
    fn history(&self, from_ts: Option<Timestamp>, until_ts: Option<Timestamp>) -> Vec<StateUpdate>;

    fn get_merkle_history(&self) -> MerkleHistory {
        let packed: Vec<Vec<u8>> = self
            .history(None, None)
            .iter()
            .map(|su| su.pack())
            .collect();
        get_merkle_history(packed.iter().map(|v| v.as_slice()))
    }

    fn resolve_merkle_histories(&self, peer_root: Hash, peer_leaf_ids: &[Hash]) -> Vec<Hash> {
        let local = self.get_merkle_history();
        resolve_merkle_histories(&local, peer_root, peer_leaf_ids)
    }
}
