use std::io::{self, Read};
use std::mem;
use std::net::{TcpListener, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};

use crate::Future;

/// The descriptor a [`Conn`] currently owns.
#[derive(Debug)]
enum Role {
    /// A bound, non-blocking, listening socket waiting for its one peer.
    Listening(TcpListener),
    /// An accepted, non-blocking socket being drained until the peer closes.
    Connected(TcpStream),
}

/// Result of dispatching a readiness event to a [`Conn`].
///
/// The event loop applies the transition: it re-keys the descriptor map on
/// `Promoted`, and unregisters/removes the entry on `Done` or `Failed` (both
/// terminal, with the target future already completed).
#[derive(Debug)]
pub(crate) enum Transition {
    /// More readiness is needed; the entry stays under its current key.
    Stay,
    /// First accept succeeded: the connection replaced the listener in place.
    /// The retired listener is handed back so the loop can unregister its
    /// descriptor before it is dropped (and closed).
    Promoted {
        listener: TcpListener,
        new_fd: RawFd,
    },
    /// Peer closed; target completed with `Ok(accumulated bytes)`.
    Done,
    /// Fatal accept or read error; target completed with `Err`.
    Failed,
}

/// Per-descriptor accept/read state machine.
///
/// Lifecycle: created `Listening` when a read is requested, mutated in place
/// to `Connected` on first accept (descriptor replaced, buffer reset), and
/// destroyed once EOF or a fatal read error completes its target future.
#[derive(Debug)]
pub(crate) struct Conn {
    /// Registration id, used for cancellation.
    pub(crate) id: u64,
    role: Role,
    /// Partial-read accumulation across readiness transitions.
    buf: Vec<u8>,
    /// Resolves to every byte received before the peer closed.
    target: Future<Vec<u8>>,
}

impl Conn {
    /// Fixed read chunk size used while draining a connected socket.
    const CHUNK: usize = 4096;

    /// Binds a loopback listener on `port` and wraps it in a `Listening`
    /// entry.
    ///
    /// Binding with a port number of 0 will request that the OS assigns a
    /// port to the listener.
    pub(crate) fn bind(id: u64, port: u16, target: Future<Vec<u8>>) -> io::Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port))?;

        // Required so accepts driven by edge-triggered readiness never
        // block the event loop.
        listener.set_nonblocking(true)?;

        Ok(Conn {
            id,
            role: Role::Listening(listener),
            buf: Vec::new(),
            target,
        })
    }

    /// The descriptor this entry is currently keyed by.
    pub(crate) fn fd(&self) -> RawFd {
        match &self.role {
            Role::Listening(listener) => listener.as_raw_fd(),
            Role::Connected(stream) => stream.as_raw_fd(),
        }
    }

    /// Dispatches one readiness event according to the entry's role.
    ///
    /// The listening socket's initial acceptance is a readiness event
    /// distinct from the connected socket's later read events; keying the
    /// dispatch on the current role keeps the two from being conflated.
    pub(crate) fn on_ready(&mut self) -> Transition {
        if matches!(self.role, Role::Listening(_)) {
            self.on_accept()
        } else {
            self.on_read()
        }
    }

    /// Accepts the one pending connection and promotes the entry in place.
    fn on_accept(&mut self) -> Transition {
        let Role::Listening(listener) = &self.role else {
            unreachable!("on_accept outside the Listening role");
        };

        match listener.accept() {
            Ok((stream, _addr)) => {
                if let Err(err) = stream.set_nonblocking(true) {
                    return self.fail(err);
                }

                let new_fd = stream.as_raw_fd();
                self.buf.clear();

                let Role::Listening(listener) =
                    mem::replace(&mut self.role, Role::Connected(stream))
                else {
                    unreachable!("listening role checked above");
                };

                Transition::Promoted { listener, new_fd }
            }
            // Spurious wakeup: nothing to accept yet.
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => Transition::Stay,
            Err(err) => self.fail(err),
        }
    }

    /// Drains the connected socket until it would block, the peer closes, or
    /// a read fails.
    ///
    /// Reading until `WouldBlock` is mandatory under edge-triggered
    /// readiness: data left behind would otherwise stall silently, since no
    /// new transition is reported for bytes that already arrived.
    fn on_read(&mut self) -> Transition {
        let mut chunk = [0u8; Self::CHUNK];

        loop {
            let Role::Connected(stream) = &mut self.role else {
                unreachable!("on_read outside the Connected role");
            };

            match stream.read(&mut chunk) {
                // Zero-length read: the peer closed its end.
                Ok(0) => return self.finish(),
                Ok(rbytes) => self.buf.extend_from_slice(&chunk[..rbytes]),
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                    return Transition::Stay;
                }
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return self.fail(err),
            }
        }
    }

    /// Completes the target with everything accumulated so far.
    fn finish(&mut self) -> Transition {
        let data = mem::take(&mut self.buf);
        self.target
            .complete(Ok(data))
            .expect("connection future must resolve exactly once");

        Transition::Done
    }

    /// Completes the target with the fatal socket error.
    fn fail(&mut self, err: io::Error) -> Transition {
        self.target
            .complete(Err(err.into()))
            .expect("connection future must resolve exactly once");

        Transition::Failed
    }
}
