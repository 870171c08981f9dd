//! A message-passing alternative to the mutex-and-condvar pipe.
//!
//! Instead of gating one shared region, this pipe relays fixed-size chunks
//! of bytes through a pair of bounded channels. A fixed pool of reusable
//! chunk buffers circulates between the two halves: a write claims a free
//! buffer, fills it with at most one transfer unit, and hands it to the
//! reader; a fully drained buffer is handed back to be refilled. Exactly one
//! half owns any given chunk at any instant, chunks arrive in the order they
//! were written, and an exhausted pool is what makes a fast writer wait for
//! a slow reader.
//!
//! This form trades the blocking rendezvous for channel hand-offs, which
//! makes it a natural fit for the asynchronous I/O traits. The price is that
//! closing carries no error payload in-band, only end of stream; see
//! [`relay::copy_chunked`](crate::relay::copy_chunked) for how source errors
//! are carried around the pipe instead.

use futures_channel::mpsc;
use futures_core::Stream;
use futures_io::{AsyncRead, AsyncWrite};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Most bytes a single chunk will carry. Writes larger than this are
/// accepted one transfer unit at a time.
pub const MAX_CHUNK: usize = 32 * 1024;

/// How many chunk buffers circulate in a pipe by default. Four strikes a
/// reasonable balance between memory usage and the slack available to a
/// producer and consumer running at different speeds.
pub const DEFAULT_CHUNK_COUNT: usize = 4;

/// Create a chunked pipe with room for `count` chunks in flight.
///
/// With `count` set to 1 the pipe is essentially serial: each chunk must be
/// fully drained by the reader before the writer can produce the next one.
pub fn new(count: usize) -> (Reader, Writer) {
    let (mut pool_tx, pool_rx) = mpsc::channel(count);
    let (data_tx, data_rx) = mpsc::channel(count);

    // Stock the pool; the channel was created with room for exactly this
    // many, so the sends cannot fail.
    for _ in 0..count {
        pool_tx.try_send(Vec::new()).expect("chunk pool overflow");
    }

    (
        Reader {
            pool_tx,
            data_rx,
            current: None,
        },
        Writer { pool_rx, data_tx },
    )
}

/// The reading half of a chunked pipe.
pub struct Reader {
    /// Hands drained chunk buffers back to the writer for reuse.
    pool_tx: mpsc::Sender<Vec<u8>>,

    /// Chunks in flight from the writer.
    data_rx: mpsc::Receiver<Vec<u8>>,

    /// A partially drained chunk kept across reads, with its read position.
    current: Option<(Vec<u8>, usize)>,
}

impl AsyncRead for Reader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<io::Result<usize>> {
        let (chunk, pos) = match self.current.take() {
            Some(current) => current,

            None => match Pin::new(&mut self.data_rx).poll_next(cx) {
                Poll::Pending => return Poll::Pending,

                // The writer is gone and everything in flight is drained.
                Poll::Ready(None) => return Poll::Ready(Ok(0)),

                Poll::Ready(Some(chunk)) => (chunk, 0),
            },
        };

        let len = buf.len().min(chunk.len() - pos);
        buf[..len].copy_from_slice(&chunk[pos..pos + len]);
        let pos = pos + len;

        if pos < chunk.len() {
            self.current = Some((chunk, pos));
        } else {
            let mut chunk = chunk;
            chunk.clear();

            // Hand the buffer back for reuse. If the writer is gone there is
            // no pool to return it to and it is simply dropped.
            let _ = self.pool_tx.try_send(chunk);
        }

        Poll::Ready(Ok(len))
    }
}

/// The writing half of a chunked pipe.
pub struct Writer {
    /// Free chunk buffers handed back by the reader.
    pool_rx: mpsc::Receiver<Vec<u8>>,

    /// Chunks on their way to the reader.
    data_tx: mpsc::Sender<Vec<u8>>,
}

impl AsyncWrite for Writer {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        // Check for a hangup before claiming a buffer for nothing.
        if self.data_tx.is_closed() {
            return Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()));
        }

        match Pin::new(&mut self.pool_rx).poll_next(cx) {
            // Every buffer is in flight; wait for the reader to drain one.
            Poll::Pending => Poll::Pending,

            // The reader is gone.
            Poll::Ready(None) => Poll::Ready(Err(io::ErrorKind::BrokenPipe.into())),

            Poll::Ready(Some(mut chunk)) => {
                let len = buf.len().min(MAX_CHUNK);
                chunk.extend_from_slice(&buf[..len]);

                // Holding a free buffer implies a free slot in the data
                // channel, so a failure here can only be a hangup.
                match self.data_tx.try_send(chunk) {
                    Ok(()) => Poll::Ready(Ok(len)),
                    Err(_) => Poll::Ready(Err(io::ErrorKind::BrokenPipe.into())),
                }
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(mut self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.data_tx.close_channel();
        Poll::Ready(Ok(()))
    }
}
