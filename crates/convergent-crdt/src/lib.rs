//! # convergent-crdt
//!
//! The CRDT catalogue: every convergent type described in terms of
//! [`convergent_core`]'s clock, value codec, and state-update envelope.
//! Each type follows the same shape -- a mutator method that stamps,
//! applies, and returns a `StateUpdate`, a matching `update` that
//! applies one received from a peer, and `checksums`/`history` for
//! anti-entropy via [`merkle_crdt::MerkleCrdt`].

pub mod causal_tree;
pub mod counter;
pub mod counterset;
pub mod fiarray;
pub mod gset;
pub mod listener;
pub mod lww_map;
pub mod lww_register;
pub mod merkle_crdt;
pub mod mv_map;
pub mod mv_register;
pub mod orset;
pub mod pncounter;
pub mod rga;

pub use causal_tree::CausalTree;
pub use counter::Counter;
pub use counterset::CounterSet;
pub use fiarray::FiArray;
pub use gset::GSet;
pub use listener::{Listener, ListenerHandle, Listeners};
pub use lww_map::LwwMap;
pub use lww_register::LwwRegister;
pub use merkle_crdt::MerkleCrdt;
pub use mv_map::MvMap;
pub use mv_register::MvRegister;
pub use orset::ORSet;
pub use pncounter::PnCounter;
pub use rga::RgArray;
