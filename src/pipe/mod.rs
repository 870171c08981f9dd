//! Buffered pipes over a shared storage region, gated by a mutex and
//! condition variable.
//!
//! A pipe owns one [`Storage`] region and hands out two halves: a
//! [`PipeWriter`] that appends to the region and a [`PipeReader`] that
//! drains it. A full region suspends the writer, an empty one suspends the
//! reader, and the condition variable is the single rendezvous point both
//! sides signal whenever they change state the other may be waiting on.
//!
//! Each half is an owned handle whose I/O takes `&mut self`, so only one
//! call per side can ever be in flight. Dropping a half closes it the same
//! way [`PipeReader::close`] or [`PipeWriter::close`] would.

use crate::storage::Storage;
use std::io::{self, Read, Write};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

pub mod chunked;

/// Create a buffered pipe over the given storage region.
///
/// Bytes written to the returned writer are held by `storage` until the
/// returned reader drains them, so the writer can run ahead of the reader by
/// up to the storage's capacity.
pub fn pipe<S: Storage>(storage: S) -> (PipeReader<S>, PipeWriter<S>) {
    let shared = Arc::new(Shared {
        state: Mutex::new(State {
            storage,
            terminal: None,
        }),
        cond: Condvar::new(),
    });

    (
        PipeReader {
            shared: shared.clone(),
            timeout: None,
        },
        PipeWriter {
            shared,
            timeout: None,
        },
    )
}

/// The first close recorded on a pipe. Never overwritten once set.
enum Terminal {
    /// The writer closed cleanly; reads drain the storage, then report end
    /// of stream.
    Eof,

    /// The reader hung up, or a side closed without supplying an error.
    Closed,

    /// A side closed with an error, snapshotted so it can be surfaced on
    /// every subsequent call.
    Failed {
        kind: io::ErrorKind,
        message: String,
    },
}

impl Terminal {
    fn from_error(err: &io::Error) -> Self {
        Terminal::Failed {
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    fn to_error(&self) -> io::Error {
        match self {
            Terminal::Eof | Terminal::Closed => io::ErrorKind::BrokenPipe.into(),
            Terminal::Failed { kind, message } => io::Error::new(*kind, message.clone()),
        }
    }
}

struct State<S> {
    storage: S,
    terminal: Option<Terminal>,
}

impl<S> State<S> {
    /// Record a storage failure as the terminal condition, unless one side
    /// already closed.
    fn fail(&mut self, err: &io::Error) {
        if self.terminal.is_none() {
            self.terminal = Some(Terminal::from_error(err));
        }
    }
}

struct Shared<S> {
    state: Mutex<State<S>>,
    cond: Condvar,
}

impl<S> Shared<S> {
    fn close(&self, terminal: Terminal) {
        let mut state = self.state.lock().unwrap();

        // First close wins; a later close must not disturb the recorded
        // condition, but both sides still get woken.
        if state.terminal.is_none() {
            state.terminal = Some(terminal);
            self.cond.notify_all();
        }
    }

    fn wait<'a>(
        &self,
        guard: MutexGuard<'a, State<S>>,
        deadline: Option<Instant>,
    ) -> MutexGuard<'a, State<S>> {
        match deadline {
            None => self.cond.wait(guard).unwrap(),
            Some(deadline) => {
                let timeout = deadline.saturating_duration_since(Instant::now());
                self.cond.wait_timeout(guard, timeout).unwrap().0
            }
        }
    }
}

/// The reading half of a buffered pipe.
pub struct PipeReader<S> {
    shared: Arc<Shared<S>>,
    timeout: Option<Duration>,
}

impl<S> PipeReader<S> {
    /// Set the time a read may spend blocked on an empty pipe before it
    /// fails with [`io::ErrorKind::TimedOut`], or `None` to block
    /// indefinitely.
    ///
    /// A timed-out read leaves the pipe untouched and may simply be retried.
    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// Close the reader; subsequent writes to the other half fail with
    /// [`io::ErrorKind::BrokenPipe`].
    pub fn close(&mut self) {
        self.shared.close(Terminal::Closed);
    }

    /// Close the reader with an error that subsequent calls on either half
    /// will surface instead of the generic closed-pipe failure.
    pub fn close_with_error(&mut self, err: io::Error) {
        self.shared.close(Terminal::from_error(&err));
    }
}

impl<S: Storage> Read for PipeReader<S> {
    /// Read buffered bytes, blocking while the pipe is empty and no close
    /// has been recorded.
    ///
    /// A read that finds any buffered data returns it immediately rather
    /// than waiting to fill `buf`. Once the writer has closed, the remaining
    /// buffered bytes are drained before `Ok(0)` (clean close) or the
    /// recorded error is returned.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let deadline = self.timeout.map(|timeout| Instant::now() + timeout);
        let mut state = self.shared.state.lock().unwrap();

        while state.storage.is_empty() {
            match &state.terminal {
                Some(Terminal::Eof) => return Ok(0),
                Some(terminal) => return Err(terminal.to_error()),
                None => {}
            }

            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Err(io::ErrorKind::TimedOut.into());
                }
            }

            // Wake a writer that may be waiting for space before suspending.
            self.shared.cond.notify_all();
            state = self.shared.wait(state, deadline);
        }

        match state.storage.read(buf) {
            Ok(n) => {
                self.shared.cond.notify_all();
                Ok(n)
            }
            Err(err) => {
                state.fail(&err);
                self.shared.cond.notify_all();
                Err(err)
            }
        }
    }
}

impl<S> Drop for PipeReader<S> {
    fn drop(&mut self) {
        self.shared.close(Terminal::Closed);
    }
}

/// The writing half of a buffered pipe.
pub struct PipeWriter<S> {
    shared: Arc<Shared<S>>,
    timeout: Option<Duration>,
}

impl<S> PipeWriter<S> {
    /// Set the time a write may spend blocked on a full pipe before it fails
    /// with [`io::ErrorKind::TimedOut`], or `None` to block indefinitely.
    ///
    /// The deadline covers one whole call. A timed-out write leaves the pipe
    /// untouched and may simply be retried.
    pub fn set_write_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// Check whether a close has been recorded on either half.
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().unwrap().terminal.is_some()
    }

    /// Close the writer; once the storage is drained, subsequent reads from
    /// the other half return `Ok(0)`.
    pub fn close(&mut self) {
        self.shared.close(Terminal::Eof);
    }

    /// Close the writer with an error; once the storage is drained,
    /// subsequent reads from the other half return that error instead of
    /// end of stream.
    pub fn close_with_error(&mut self, err: io::Error) {
        self.shared.close(Terminal::from_error(&err));
    }
}

impl<S: Storage> Write for PipeWriter<S> {
    /// Write `buf` into the pipe, blocking whenever the storage has no free
    /// space, until every byte has been accepted.
    ///
    /// If the reader hangs up while the call is blocked, the number of bytes
    /// already committed to storage is returned when nonzero; a call that
    /// committed nothing, or that started after the close, fails with
    /// [`io::ErrorKind::BrokenPipe`].
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let deadline = self.timeout.map(|timeout| Instant::now() + timeout);
        let mut state = self.shared.state.lock().unwrap();

        if state.terminal.is_some() {
            return Err(io::ErrorKind::BrokenPipe.into());
        }

        let mut written = 0;

        while written < buf.len() {
            while state.storage.gap() == 0 {
                if state.terminal.is_some() {
                    return if written > 0 {
                        Ok(written)
                    } else {
                        Err(io::ErrorKind::BrokenPipe.into())
                    };
                }

                if let Some(deadline) = deadline {
                    if Instant::now() >= deadline {
                        return if written > 0 {
                            Ok(written)
                        } else {
                            Err(io::ErrorKind::TimedOut.into())
                        };
                    }
                }

                // Wake a reader that may be waiting for data before
                // suspending.
                self.shared.cond.notify_all();
                state = self.shared.wait(state, deadline);
            }

            match state.storage.write(&buf[written..]) {
                Ok(n) => written += n,
                Err(err) => {
                    state.fail(&err);
                    self.shared.cond.notify_all();
                    return Err(err);
                }
            }

            self.shared.cond.notify_all();
        }

        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<S> Drop for PipeWriter<S> {
    fn drop(&mut self) {
        self.shared.close(Terminal::Eof);
    }
}
