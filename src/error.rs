//! Error values reported by vector operations.

/// Everything that can go wrong when using a vector.
///
/// Out-of-range indexing through the fallible accessors, popping an empty
/// vector, and misuse of a transient all land here. None of these are
/// retried internally; they are reported to the caller as-is.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("index {index} out of bounds for a vector of length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("pop of an empty vector")]
    EmptyPop,

    #[error("transient vector used after it was frozen")]
    UseAfterPersistent,

    #[error("transient vector touched from a thread that does not own it")]
    CrossThreadEdit,

    #[error("vectors only support integral keys")]
    KeyTypeMismatch,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
