//! Error types shared by every crate in this workspace.

use thiserror::Error;

/// The four error kinds every CRDT operation can raise.
///
/// Kinds are ordered roughly by ascending severity: a caller can usually
/// recover from [`CrdtError::ValueInvalid`] by choosing a different
/// argument, while [`CrdtError::UnknownClass`] means the byte stream
/// itself cannot be resurrected without a richer type registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CrdtError {
    /// An argument had the wrong shape: wrong tuple arity, wrong clock
    /// uuid, a value of the wrong wrapper kind.
    #[error("type invalid: {0}")]
    TypeInvalid(String),

    /// An argument had the right type but an out-of-domain value, e.g. a
    /// non-positive counter increment or `from_ts > until_ts`.
    #[error("value invalid: {0}")]
    ValueInvalid(String),

    /// Deserialization reached a class name absent from the type
    /// registry supplied to `unpack`.
    #[error("unknown class: {0}")]
    UnknownClass(String),

    /// A precondition of a helper method was not met, e.g. `put_after`
    /// given a parent uuid that does not exist.
    #[error("usage error: {0}")]
    Usage(String),
}

impl CrdtError {
    pub fn type_invalid(msg: impl Into<String>) -> Self {
        CrdtError::TypeInvalid(msg.into())
    }

    pub fn value_invalid(msg: impl Into<String>) -> Self {
        CrdtError::ValueInvalid(msg.into())
    }

    pub fn unknown_class(name: impl Into<String>) -> Self {
        CrdtError::UnknownClass(name.into())
    }

    pub fn usage(msg: impl Into<String>) -> Self {
        CrdtError::Usage(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, CrdtError>;
