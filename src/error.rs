//! # Kernel Error Codes
//!
//! Every fallible kernel API reports its outcome through [`KernelError`].
//! The kernel never panics on a recoverable condition: invalid arguments
//! are rejected at the API boundary, resource exhaustion is reported to
//! the caller, and a failed call leaves kernel state untouched.

/// Status codes returned by fallible kernel operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// An argument was rejected at the API boundary: zero-valued mask or
    /// period, a handle that names no live object, or a mutex operation
    /// that the calling task is not allowed to perform (e.g. re-locking
    /// a mutex it already holds).
    InvalidParam,
    /// A fixed-capacity pool (task table, timer table, heap) is exhausted.
    NoMemory,
    /// A blocking operation reached its deadline before completing.
    Timeout,
    /// The caller tried to unlock a mutex it does not own.
    PermissionDenied,
}

/// Convenience alias used throughout the kernel.
pub type Result<T> = core::result::Result<T, KernelError>;
