//! Binding error types
//!
//! Construction-time failures (wrong kind, blank name, null factory
//! result) surface synchronously through these variants. Failures inside
//! a native callback never cross the ABI; the trampoline contains them
//! and hands the script an `"Error: ..."` string instead.

use thiserror::Error;

use crate::value::Kind;

/// Error type for all fallible binding operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The native engine factory returned null.
    #[error("engine creation failed")]
    EngineCreationFailed,

    /// A registration or declaration name was blank.
    #[error("name must not be empty")]
    EmptyName,

    /// A typed wrapper was constructed over a value of the wrong kind.
    #[error("expected {expected} value, got {actual}")]
    TypeMismatch {
        /// Kind the wrapper requires.
        expected: Kind,
        /// Kind the value actually had.
        actual: Kind,
    },

    /// Operation on a null or already-detached handle.
    #[error("operation on a null or detached handle")]
    InvalidHandle,

    /// A native handle-producing call returned null.
    #[error("native call failed: {0}")]
    NativeCallFailed(&'static str),

    /// A host closure reported a failure during trampoline execution.
    #[error("native callback failed: {0}")]
    ClosureFailure(String),

    /// A string with an interior NUL byte cannot cross the C boundary.
    #[error("string contains an interior NUL byte")]
    Nul(#[from] std::ffi::NulError),
}

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;
