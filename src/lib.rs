//! Minimal event-loop runtime built on externally completed futures.
//!
//! A [`Future`] here is a one-shot promise: it is constructed pending,
//! observed through continuation registration, and completed from the
//! outside by the [`Runtime`]'s event loop once a timer expires or a socket
//! read finishes. The loop multiplexes readiness with edge-triggered
//! `epoll(7)` and runs until no registered work remains.
//!
//! ```no_run
//! use std::time::Duration;
//!
//! let mut rt = evio::Runtime::new();
//!
//! rt.spawn_delay("ping", Duration::from_millis(50)).request(
//!     |payload| println!("delayed value: {payload}"),
//!     |err| eprintln!("delay failed: {err}"),
//! );
//!
//! // Blocks until every registered future has resolved.
//! rt.run();
//! ```

#![warn(
    missing_debug_implementations,
    missing_docs,
    rust_2018_idioms,
    unreachable_pub
)]
#![deny(unused_must_use)]

mod error;
pub use error::{Error, Result};

pub mod future;
pub use future::{Future, Outcome};

pub mod rt;
pub use rt::Runtime;

mod net;
