//! The `evio` runtime.
//!
//! The runtime turns two kinds of external events into completed futures:
//! timer deadlines and socket readiness. It is split into two contexts. The
//! *owner* context constructs futures and issues registrations through
//! [`Runtime`]; the *loop* context runs the tick algorithm on a dedicated
//! thread and is the only context that mutates the timer queue, the
//! descriptor map, and the multiplexer's registration set.
//!
//! The two contexts never share mutable structures. Registrations cross the
//! boundary as immutable command messages over a channel, drained by the
//! loop once per tick; an `eventfd(2)` wake descriptor interrupts a loop
//! that is asleep inside its poll so new work is picked up promptly. This
//! message-passing discipline eliminates data races without a lock around
//! the loop's state.
//!
//! Each tick the loop fires every expired timer, converts the next deadline
//! into a poll timeout, blocks on the readiness multiplexer, and dispatches
//! every ready descriptor through its connection state machine. A
//! pending-work counter tracks the not-yet-resolved futures; the loop
//! terminates when and only when it reaches zero.

mod runtime;
pub use runtime::Runtime;

pub(crate) mod event_loop;
pub(crate) mod io;
pub(crate) mod timer;
