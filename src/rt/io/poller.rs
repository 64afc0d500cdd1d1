use std::os::fd::{FromRawFd, OwnedFd};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::Arc;
use std::{fmt, io, mem, ptr};

use crate::rt::io::errno;

/// Interest mask for connection descriptors: readable, edge-triggered.
///
/// `EPOLLET` means a readiness transition is reported once; the dispatcher
/// must drain the descriptor until it would block before polling again, or a
/// later wakeup will never occur for data that arrived without a new
/// transition.
pub(crate) const READ_EDGE: u32 = (libc::EPOLLIN | libc::EPOLLET) as u32;

/// Readiness multiplexer backed by `epoll(7)`.
///
/// Wraps a single `epoll` instance plus an always-armed `eventfd(2)` wake
/// descriptor. The wake descriptor lets another thread interrupt an
/// in-progress [`poll`](Poller::poll) promptly, so a registration sent while
/// the loop sleeps is not delayed until the current timeout expires. It is
/// registered level-triggered and never surfaces in poll results.
///
/// Unrecoverable `epoll` failures are fatal to the whole runtime and panic.
pub(crate) struct Poller {
    /// The `epoll(7)` instance.
    epoll: OwnedFd,
    /// Wake descriptor, shared with [`LoopWaker`] handles.
    wake: Arc<OwnedFd>,
    /// Stores events for ready file descriptors.
    events: [libc::epoll_event; Self::EPOLL_MAX_EVENTS as usize],
}

impl Poller {
    /// Total number of events returned each tick (event loop cycle).
    const EPOLL_MAX_EVENTS: i32 = 1024;

    /// Creates a new `Poller` with its wake descriptor already registered.
    ///
    /// # Panics
    ///
    /// This function panics if the `epoll(7)` instance or the `eventfd(2)`
    /// could not be created.
    pub(crate) fn new() -> Self {
        let epoll = unsafe {
            // `epoll(7)` is used to efficiently monitor multiple file
            // descriptors for I/O. Instead of blocking on each socket
            // sequentially, this approach (with non-blocking sockets) allows
            // blocking on all simultaneously, processing only the file
            // descriptors that are ready.
            let epoll_fd = libc::epoll_create1(libc::EPOLL_CLOEXEC);
            if epoll_fd == -1 {
                panic!("{}", errno!("failed to create epoll instance"));
            }
            OwnedFd::from_raw_fd(epoll_fd)
        };

        let wake = unsafe {
            let wake_fd = libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC);
            if wake_fd == -1 {
                panic!("{}", errno!("failed to create wake eventfd"));
            }
            OwnedFd::from_raw_fd(wake_fd)
        };

        let poller = Poller {
            epoll,
            wake: Arc::new(wake),
            events: [libc::epoll_event { events: 0, u64: 0 }; Self::EPOLL_MAX_EVENTS as usize],
        };

        // Level-triggered on purpose: the wake fd stays armed until its
        // counter is drained, so a wake is never lost between polls.
        poller.register(poller.wake.as_raw_fd(), libc::EPOLLIN as u32);

        poller
    }

    /// Returns a cloneable handle that wakes an in-progress [`poll`](Poller::poll).
    pub(crate) fn waker(&self) -> LoopWaker {
        LoopWaker {
            wake: Arc::clone(&self.wake),
        }
    }

    /// Waits for events on the `epoll(7)` instance, blocking until either a
    /// file descriptor delivers an event, the call is interrupted by a signal
    /// handler, or the timeout expires.
    ///
    /// `timeout` specifies the maximum duration (in milliseconds) to block. A
    /// timeout of `-1` will cause the function to block indefinitely, while a
    /// timeout of `0` will not wait on any file descriptors to be ready
    /// before returning.
    ///
    /// Returns the file descriptors that transitioned to ready since the last
    /// poll, with the internal wake descriptor drained and filtered out.
    ///
    /// # Panics
    ///
    /// This function panics if it fails to wait on file descriptor readiness.
    pub(crate) fn poll(&mut self, timeout: i32) -> Vec<RawFd> {
        let rdfs = unsafe {
            // Returns 0 if no file descriptors became ready during the
            // timeout duration, if `timeout` is a value other than `-1`.
            libc::epoll_wait(
                self.epoll.as_raw_fd(),
                &raw mut self.events as *mut libc::epoll_event,
                Self::EPOLL_MAX_EVENTS,
                timeout,
            )
        };

        if rdfs == -1 {
            // Interrupted by a signal: report no readiness and let the loop
            // recompute its timeout.
            if io::Error::last_os_error().raw_os_error() == Some(libc::EINTR) {
                return Vec::new();
            }

            panic!("{}", errno!("failed to wait on epoll"));
        }

        let wake_fd = self.wake.as_raw_fd();
        let mut ready = Vec::with_capacity(rdfs as usize);

        for event in self.events.iter().take(rdfs as usize) {
            let fd = event.u64 as RawFd;

            if fd == wake_fd {
                self.drain_wake();
                continue;
            }

            ready.push(fd);
        }

        ready
    }

    /// Adds an entry to the interest list of the `epoll(7)` file descriptor.
    ///
    /// `events` is a bit mask of event types (`epoll_ctl(2)`).
    ///
    /// Registering a file descriptor that is already in the interest list is
    /// a caller error with no defined behavior; the runtime keys connections
    /// by descriptor, so it never does this itself.
    ///
    /// # Panics
    ///
    /// This function panics if the entry could not be added to the interest
    /// list.
    pub(crate) fn register(&self, fd: RawFd, events: u32) {
        let mut ev = libc::epoll_event {
            events,
            u64: fd as u64,
        };

        if unsafe { libc::epoll_ctl(self.epoll.as_raw_fd(), libc::EPOLL_CTL_ADD, fd, &raw mut ev) }
            == -1
        {
            panic!("{}", errno!("failed to add fd {} to epoll interest list", fd));
        }
    }

    /// Removes (unregisters) the target file descriptor from the `epoll(7)`
    /// interest list.
    ///
    /// # Panics
    ///
    /// This function panics if the file descriptor could not be unregistered.
    pub(crate) fn unregister(&self, fd: RawFd) {
        if unsafe { libc::epoll_ctl(self.epoll.as_raw_fd(), libc::EPOLL_CTL_DEL, fd, ptr::null_mut()) }
            == -1
        {
            // The supplied file descriptor is not registered with this
            // `epoll` instance.
            if io::Error::last_os_error().raw_os_error() == Some(libc::ENOENT) {
                return;
            }

            panic!("{}", errno!("failed to remove fd {} from epoll interest list", fd));
        }
    }

    /// Empties the wake descriptor's counter, re-arming it for the next wake.
    fn drain_wake(&self) {
        let mut buf = [0u8; 8];

        // A single read resets an eventfd counter to zero; looping also
        // covers a concurrent write landing between the read and return.
        loop {
            let n = unsafe {
                libc::read(
                    self.wake.as_raw_fd(),
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                )
            };

            if n <= 0 {
                // EAGAIN: counter is back to zero.
                break;
            }
        }
    }
}

impl fmt::Debug for Poller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Poller")
            .field("epoll", &self.epoll)
            .field("wake", &self.wake)
            .finish_non_exhaustive()
    }
}

/// Handle used by the owner side to interrupt the loop's blocking poll.
///
/// Writing to the shared eventfd makes its counter non-zero, which the
/// level-triggered registration reports on the next (or current) wait.
#[derive(Debug, Clone)]
pub(crate) struct LoopWaker {
    wake: Arc<OwnedFd>,
}

impl LoopWaker {
    /// Wakes an in-progress or upcoming poll.
    pub(crate) fn wake(&self) {
        let one: u64 = 1;

        let res = unsafe {
            libc::write(
                self.wake.as_raw_fd(),
                &raw const one as *const libc::c_void,
                mem::size_of::<u64>(),
            )
        };

        // A saturated counter (EAGAIN) means the loop is about to wake
        // anyway, so the failure is ignored.
        let _ = res;
    }
}
