use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::Future;
use crate::net::Conn;
use crate::rt::event_loop::{Command, EventLoop};
use crate::rt::io::{LoopWaker, Poller};

/// The `evio` runtime.
///
/// The owner side of the design: registration entry points construct futures
/// and send immutable commands to the event loop, which exclusively owns all
/// mutable state and completes the futures as work finishes. Every send is
/// followed by a poller wake, so a registration issued while the loop sleeps
/// inside its poll is observed promptly.
///
/// Futures returned by the `spawn_*` entry points are completed by the loop;
/// completing one externally violates the single-writer contract and will
/// make the loop's own completion fail.
pub struct Runtime {
    /// Command channel into the loop.
    tx: Sender<Command>,
    /// Interrupts an in-progress blocking poll after a send.
    waker: LoopWaker,
    /// Source of registration ids, shared by timers and reads.
    next_id: AtomicU64,
    /// The loop side, consumed by [`run`](Runtime::run).
    core: Option<EventLoop>,
}

impl Runtime {
    /// Creates a new `Runtime` instance.
    ///
    /// # Panics
    ///
    /// This function panics if the underlying readiness multiplexer could
    /// not be created.
    pub fn new() -> Self {
        let poller = Poller::new();
        let waker = poller.waker();
        let (tx, rx) = mpsc::channel();

        Runtime {
            tx,
            waker,
            next_id: AtomicU64::new(1),
            core: Some(EventLoop::new(poller, rx)),
        }
    }

    /// Returns a future that resolves to `Ok(payload)` once `duration` has
    /// elapsed on the monotonic clock, or never if cancelled first.
    pub fn spawn_delay<T>(&self, payload: T, duration: Duration) -> Future<T>
    where
        T: Clone + Send + 'static,
    {
        let id = self.next_id();
        let future = Future::with_key(id);

        let target = future.clone();
        let fire = Box::new(move || {
            target
                .complete(Ok(payload))
                .expect("delay future must resolve exactly once");
        });

        debug!(id, ?duration, "spawning delay");
        self.send(Command::Delay {
            id,
            deadline: Instant::now() + duration,
            fire,
        });

        future
    }

    /// Binds a non-blocking loopback listener on `port` and returns a future
    /// that resolves to `Ok(all bytes received before the peer closed)`, or
    /// `Err` on bind, accept, or read failure.
    ///
    /// The bind happens before this call returns, so the port is live
    /// immediately; a bind failure resolves the future without involving the
    /// loop. The socket exists only as a readiness-capable stand-in for
    /// generic input: `epoll(7)` does not support plain regular files.
    pub fn spawn_read(&self, port: u16) -> Future<Vec<u8>> {
        let id = self.next_id();
        let future = Future::with_key(id);

        match Conn::bind(id, port, future.clone()) {
            Ok(conn) => {
                debug!(id, port, "spawning read");
                self.send(Command::Read { conn });
            }
            Err(err) => {
                // Failures surface through the normal completion path, never
                // as a panic out of a registration entry point.
                debug!(id, port, %err, "bind failed");
                future
                    .complete(Err(err.into()))
                    .expect("freshly created future cannot be resolved");
            }
        }

        future
    }

    /// Best-effort withdrawal of a pending registration.
    ///
    /// Removes the loop-side timer or descriptor association and decrements
    /// the pending-work counter without resolving the future, which then
    /// never resolves. Cancelling an already-resolved future, or one
    /// produced by a combinator, is a no-op.
    pub fn cancel<T>(&self, future: &Future<T>) {
        if let Some(id) = future.key() {
            self.send(Command::Cancel { id });
        }
    }

    /// Runs the event loop on a dedicated thread, blocking the calling
    /// thread until the loop's pending-work counter reaches zero.
    ///
    /// Registrations issued after `run` returns are dropped; their futures
    /// never resolve. Calling `run` a second time returns immediately.
    pub fn run(&mut self) {
        let Some(core) = self.core.take() else {
            return;
        };

        let handle = thread::Builder::new()
            .name("evio-loop".to_string())
            .spawn(move || core.run())
            .expect("failed to spawn event loop thread");

        handle.join().expect("event loop thread panicked");
    }

    /// Hands a command to the loop and wakes its poll.
    ///
    /// A send after the loop has terminated fails silently: the registration
    /// is dropped, matching the documented behavior of abandoned futures.
    fn send(&self, command: Command) {
        if self.tx.send(command).is_ok() {
            self.waker.wake();
        }
    }

    #[inline]
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("ran", &self.core.is_none())
            .finish_non_exhaustive()
    }
}
