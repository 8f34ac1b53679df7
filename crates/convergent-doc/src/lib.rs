//! # convergent-doc
//!
//! The composite document: a named collection of heterogeneous CRDTs
//! from [`convergent_crdt`] sharing one [`convergent_core::ScalarClock`].

pub mod document;

pub use document::{Document, Identifier, Part, PartKind};
