//! Custom error types for the multiplexer core.
//!
//! All fallible control-plane operations return [`MuxError`] through the
//! crate-wide [`Result`] alias. The poll path never surfaces errors to the
//! caller: wait failures are logged and retried, and failed device reads
//! discard the pass (see `controller`).

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type Result<T> = std::result::Result<T, MuxError>;

/// Primary error type for the multiplexer core.
#[derive(Error, Debug)]
pub enum MuxError {
    /// Bad argument from the caller (zero delay, unknown sensor slot,
    /// malformed type descriptor, table full).
    ///
    /// The operation performed no side effects.
    #[error("invalid argument: {0}")]
    Invalid(String),

    /// The operation does not apply to the current activation state,
    /// e.g. disabling a sensor whose enable count is already zero.
    ///
    /// The operation performed no side effects.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A device node could not be opened or registered with the waiter.
    /// Activation rolls its refcount step back before returning this.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A sysfs attribute was absent, unreadable or unwritable.
    ///
    /// Non-fatal: not every sensor exposes every attribute. Callers treat
    /// the offending channel as disabled and continue.
    #[error("sysfs attribute unavailable: {}", path.display())]
    Sysfs {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
