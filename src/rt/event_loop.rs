use std::collections::HashMap;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::mpsc::{Receiver, TryRecvError};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::net::{Conn, Transition};
use crate::rt::io::{Poller, READ_EDGE};
use crate::rt::timer::{TimerEntry, TimerQueue};

/// Registration requests crossing from the owner context to the loop.
///
/// Commands are the only way the owner side touches the loop's structures:
/// the loop drains them once per tick and applies them itself, so the timer
/// queue, descriptor map, poller registration set, and pending counter have
/// exactly one mutating context.
pub(crate) enum Command {
    /// Queue a delayed completion.
    Delay {
        id: u64,
        deadline: Instant,
        fire: Box<dyn FnOnce() + Send>,
    },
    /// Track a pre-bound listening entry and watch it for readiness.
    Read { conn: Conn },
    /// Withdraw a registration without resolving its future.
    Cancel { id: u64 },
}

/// The loop side of the runtime.
///
/// Owns every mutable structure: the timer queue, the descriptor map, the
/// poller, and the pending-work counter. `pending` equals the number of
/// not-yet-resolved futures currently tracked; the loop terminates when and
/// only when it reaches zero.
#[derive(Debug)]
pub(crate) struct EventLoop {
    timers: TimerQueue,
    /// Connection entries keyed by their current descriptor.
    conns: HashMap<RawFd, Conn>,
    poller: Poller,
    rx: Receiver<Command>,
    pending: usize,
}

impl EventLoop {
    pub(crate) fn new(poller: Poller, rx: Receiver<Command>) -> Self {
        EventLoop {
            timers: TimerQueue::new(),
            conns: HashMap::new(),
            poller,
            rx,
            pending: 0,
        }
    }

    /// Runs the tick loop to completion.
    ///
    /// Each tick: drain registration commands, fire expired timers, convert
    /// the next deadline into a poll timeout, poll, and dispatch every ready
    /// descriptor.
    pub(crate) fn run(mut self) {
        loop {
            self.drain_commands();

            if self.pending == 0 {
                debug!("no pending work, event loop terminating");
                break;
            }

            self.fire_expired(Instant::now());

            if self.pending == 0 {
                // Firing timers may have been the last tracked work; check
                // for late registrations before exiting.
                continue;
            }

            let timeout = self.poll_timeout(Instant::now());
            trace!(timeout, "waiting for readiness");

            for fd in self.poller.poll(timeout) {
                self.dispatch(fd);
            }
        }
    }

    /// Applies every queued registration command.
    fn drain_commands(&mut self) {
        loop {
            match self.rx.try_recv() {
                Ok(Command::Delay { id, deadline, fire }) => {
                    trace!(id, "registering delay");
                    self.timers.insert(TimerEntry { deadline, id, fire });
                    self.pending += 1;
                }
                Ok(Command::Read { conn }) => {
                    let fd = conn.fd();
                    trace!(id = conn.id, fd, "registering read");
                    self.poller.register(fd, READ_EDGE);
                    self.conns.insert(fd, conn);
                    self.pending += 1;
                }
                Ok(Command::Cancel { id }) => self.cancel(id),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
    }

    /// Removes the association for `id`, decrementing the pending counter
    /// without resolving the future. Unknown or already-completed ids make
    /// this a no-op.
    fn cancel(&mut self, id: u64) {
        if self.timers.remove(id).is_some() {
            debug!(id, "delay cancelled");
            self.pending -= 1;
            return;
        }

        let found = self
            .conns
            .iter()
            .find_map(|(fd, conn)| (conn.id == id).then_some(*fd));

        if let Some(fd) = found {
            self.poller.unregister(fd);
            self.conns.remove(&fd);
            debug!(id, fd, "read cancelled");
            self.pending -= 1;
        }
    }

    /// Completes every timer whose deadline has passed, in ascending
    /// deadline order.
    fn fire_expired(&mut self, now: Instant) {
        for entry in self.timers.pop_expired(now) {
            debug!(id = entry.id, "timer fired");
            (entry.fire)();
            self.pending -= 1;
        }
    }

    /// Converts the next timer deadline into an `epoll_wait` timeout in
    /// milliseconds, or `-1` (block indefinitely) when only descriptor work
    /// remains.
    fn poll_timeout(&self, now: Instant) -> i32 {
        match self.timers.next_deadline() {
            Some(deadline) => {
                let wait = deadline.saturating_duration_since(now);

                // Round up to whole milliseconds so a timer is never waited
                // for less than its remaining delay.
                let mut millis = wait.as_millis();
                if wait > Duration::from_millis(millis as u64) {
                    millis += 1;
                }

                millis.min(i32::MAX as u128) as i32
            }
            None => -1,
        }
    }

    /// Routes a ready descriptor through its connection state machine and
    /// applies the resulting transition.
    fn dispatch(&mut self, fd: RawFd) {
        let Some(mut conn) = self.conns.remove(&fd) else {
            // Stale event for an entry cancelled earlier in this tick.
            return;
        };

        match conn.on_ready() {
            Transition::Stay => {
                self.conns.insert(fd, conn);
            }
            Transition::Promoted { listener, new_fd } => {
                debug!(id = conn.id, listen_fd = fd, new_fd, "connection accepted");

                // Unregister before the listener is dropped and its
                // descriptor closed.
                self.poller.unregister(listener.as_raw_fd());
                drop(listener);

                self.poller.register(new_fd, READ_EDGE);
                self.conns.insert(new_fd, conn);
            }
            Transition::Done => {
                debug!(id = conn.id, fd, "read completed");
                self.poller.unregister(fd);
                self.pending -= 1;
            }
            Transition::Failed => {
                debug!(id = conn.id, fd, "read failed");
                self.poller.unregister(fd);
                self.pending -= 1;
            }
        }
    }
}
