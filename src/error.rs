use std::io;
use std::sync::Arc;

/// A specialized [`Result`](std::result::Result) type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures observable through a [`Future`](crate::Future)'s resolution.
///
/// `WouldBlock` deliberately has no variant here: it is an internal signal to
/// stop draining a descriptor and wait for the next readiness transition, and
/// is swallowed before it could ever reach a future.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// A `complete` call was made on a future that has already resolved.
    ///
    /// This is a programming-contract violation, not a recoverable condition:
    /// resolution is one-way and single-writer.
    #[error("future has already been resolved")]
    AlreadyResolved,

    /// A socket-level failure (bind, accept, or read).
    ///
    /// Wrapped in an `Arc` since [`std::io::Error`] is not `Clone`, and a
    /// resolved future hands a clone of its result to every registered
    /// continuation.
    #[error("i/o failure: {0}")]
    Io(Arc<io::Error>),

    /// A user-supplied continuation panicked inside `map`, `and_then`, or
    /// `then`. The panic is caught and carried here instead of unwinding
    /// through the event loop.
    #[error("continuation panicked: {0}")]
    Transform(String),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(Arc::new(err))
    }
}
