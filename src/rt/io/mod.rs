//! Readiness multiplexer backed by `epoll(7)`.
//!
//! Handles the registering and waiting on I/O events, reporting which file
//! descriptors became ready so the event loop can dispatch them.

mod poller;
pub(crate) use poller::{LoopWaker, Poller, READ_EDGE};

/// Creates an `io::Error` with a message prefixed to the `errno` value.
macro_rules! errno {
    ($($arg:tt)+) => {{
        let errno = ::std::io::Error::last_os_error();
        let prefix = format!($($arg)+);
        ::std::io::Error::new(errno.kind(), format!("{prefix}: {errno}"))
    }};
}

pub(crate) use errno;
