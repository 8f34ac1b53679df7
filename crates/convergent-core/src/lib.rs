//! # convergent-core
//!
//! The foundation every CRDT in this workspace is built on: a logical
//! clock, a self-describing value codec, the state-update envelope
//! that carries mutations between replicas, and the Merkle-history
//! machinery used to find what two replicas are missing from each
//! other.
//!
//! Nothing in this crate touches I/O, randomness, or wall-clock time.
//! It is pure, synchronous, and deterministic so that the convergence
//! guarantees upstream crates depend on can be checked by property
//! tests rather than taken on faith.

pub mod clock;
pub mod envelope;
pub mod error;
pub mod merkle;
pub mod value;
pub mod wire;

pub use clock::{ScalarClock, Timestamp};
pub use envelope::{Payload, StateUpdate};
pub use error::{CrdtError, Result};
pub use merkle::{get_merkle_history, resolve_merkle_histories, Hash, MerkleHistory};
pub use value::{empty_registry, TypeRegistry, Value, WrappedValue};
