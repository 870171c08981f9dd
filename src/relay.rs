//! Relays that couple a source stream to a destination stream through a
//! buffered pipe.
//!
//! [`copy`] services the two streams from separate threads, so the source
//! and the destination run concurrently and are coupled only by the
//! capacity of the storage between them: a slow destination stalls the
//! relay once the storage fills, which in turn stalls the source.
//! [`reader`] and [`writer`] expose one end of such a relay as a handle,
//! with a detached thread driving the other. [`copy_chunked`] is the
//! asynchronous counterpart built on the chunked pipe.

use crate::pipe::{self, chunked, PipeReader, PipeWriter};
use crate::storage::{MemoryStorage, Storage};
use futures_io::{AsyncRead, AsyncWrite};
use futures_util::future;
use futures_util::io::{AsyncReadExt, AsyncWriteExt};
use std::io::{self, Read, Write};
use std::thread;

/// Size of the scratch buffer used to shuttle bytes at each end of a relay.
const SCRATCH_SIZE: usize = 8 * 1024;

/// Copy everything from `src` to `dest` through a default storage region.
///
/// Equivalent to [`copy_with`] over a [`MemoryStorage`] of
/// [`MemoryStorage::DEFAULT_CAPACITY`].
pub fn copy<R, W>(src: &mut R, dest: &mut W) -> io::Result<u64>
where
    R: Read + Send + ?Sized,
    W: Write + ?Sized,
{
    copy_with(src, dest, MemoryStorage::new())
}

/// Copy everything from `src` to `dest` through the given storage region.
///
/// A background thread drains `src` into the write half of a pipe over
/// `storage` while the calling thread drains the read half into `dest`.
/// Returns the number of bytes written to `dest` once the source is
/// exhausted and the storage fully drained.
///
/// If both sides fail, the source's error is reported, since it is the root
/// cause; a destination failure also closes the pipe so the background
/// thread cannot stall on a full storage region.
pub fn copy_with<R, W, S>(src: &mut R, dest: &mut W, storage: S) -> io::Result<u64>
where
    R: Read + Send + ?Sized,
    W: Write + ?Sized,
    S: Storage + Send,
{
    let (mut reader, writer) = pipe::pipe(storage);

    thread::scope(|scope| {
        let feeder = scope.spawn(move || feed(src, writer));

        let result = drain(&mut reader, dest);

        // Unblock the feeder in case the destination failed first.
        reader.close();

        let fed = match feeder.join() {
            Ok(fed) => fed,
            Err(panic) => std::panic::resume_unwind(panic),
        };

        match fed {
            Err(err) => Err(err),
            Ok(()) => result,
        }
    })
}

/// Expose `src` as a pipe reader fed by a detached background thread.
///
/// The thread drains `src` into the pipe and closes the write half with the
/// source's terminal condition, so reads observe the source's bytes followed
/// by its end of stream or error.
pub fn reader<R, S>(src: R, storage: S) -> PipeReader<S>
where
    R: Read + Send + 'static,
    S: Storage + Send + 'static,
{
    let (reader, writer) = pipe::pipe(storage);

    thread::spawn(move || {
        let mut src = src;
        let _ = feed(&mut src, writer);
    });

    reader
}

/// Expose `dest` as a pipe writer drained by a detached background thread.
///
/// Writes are buffered by the storage and relayed to `dest` as the thread
/// keeps up. Closing (or dropping) the returned writer lets the thread
/// finish draining and exit; if `dest` fails, subsequent writes surface
/// [`io::ErrorKind::BrokenPipe`].
pub fn writer<W, S>(dest: W, storage: S) -> PipeWriter<S>
where
    W: Write + Send + 'static,
    S: Storage + Send + 'static,
{
    let (mut reader, writer) = pipe::pipe(storage);

    thread::spawn(move || {
        let mut dest = dest;
        let _ = drain(&mut reader, &mut dest);
    });

    writer
}

/// Drain `src` into the pipe until end of input, closing the write half with
/// the source's terminal condition.
///
/// Returns `Err` only for a source read failure. A pipe that closes under us
/// is the other side's condition to report.
fn feed<R, S>(src: &mut R, mut writer: PipeWriter<S>) -> io::Result<()>
where
    R: Read + ?Sized,
    S: Storage,
{
    let mut scratch = [0; SCRATCH_SIZE];

    loop {
        match src.read(&mut scratch) {
            Ok(0) => {
                writer.close();
                return Ok(());
            }
            Ok(n) => {
                if writer.write_all(&scratch[..n]).is_err() {
                    return Ok(());
                }
            }
            Err(err) => {
                writer.close_with_error(io::Error::new(err.kind(), err.to_string()));
                return Err(err);
            }
        }
    }
}

/// Drain the pipe into `dest` until end of stream, counting the bytes
/// delivered.
fn drain<S, W>(reader: &mut PipeReader<S>, dest: &mut W) -> io::Result<u64>
where
    S: Storage,
    W: Write + ?Sized,
{
    let mut scratch = [0; SCRATCH_SIZE];
    let mut copied = 0;

    loop {
        match reader.read(&mut scratch)? {
            0 => return Ok(copied),
            n => {
                dest.write_all(&scratch[..n])?;
                copied += n as u64;
            }
        }
    }
}

/// Copy everything from `src` to `dest` through a chunked pipe.
///
/// The asynchronous counterpart of [`copy`]: the halves of a
/// [`chunked`](crate::pipe::chunked) pipe are driven as a pair of joined
/// futures, one feeding chunks from `src` and one draining them into
/// `dest`. Returns the number of bytes written to `dest`; as with [`copy`],
/// the source's error wins if both sides fail.
pub async fn copy_chunked<R, W>(mut src: R, dest: &mut W) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + ?Sized,
{
    let (reader, writer) = chunked::new(chunked::DEFAULT_CHUNK_COUNT);

    let feed = async {
        let mut writer = writer;
        let mut scratch = [0; SCRATCH_SIZE];

        loop {
            match src.read(&mut scratch).await {
                Ok(0) => {
                    let _ = writer.close().await;
                    return Ok(());
                }
                Ok(n) => {
                    if writer.write_all(&scratch[..n]).await.is_err() {
                        return Ok(());
                    }
                }
                Err(err) => {
                    // The chunked pipe carries no error payload; the join
                    // below carries the source error out instead.
                    let _ = writer.close().await;
                    return Err(err);
                }
            }
        }
    };

    let drain = async {
        // Owning the reader here means an early return drops it, which
        // unblocks the feeding side.
        let mut reader = reader;
        let mut scratch = [0; SCRATCH_SIZE];
        let mut copied = 0u64;

        loop {
            match reader.read(&mut scratch).await? {
                0 => return Ok(copied),
                n => {
                    dest.write_all(&scratch[..n]).await?;
                    copied += n as u64;
                }
            }
        }
    };

    let (fed, drained) = future::join(feed, drain).await;

    match fed {
        Err(err) => Err(err),
        Ok(()) => drained,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::UnboundedStorage;
    use futures::executor::block_on;
    use std::io::Cursor;
    use std::pin::Pin;
    use std::sync::{Arc, Mutex};
    use std::task::{Context, Poll};
    use std::time::Duration;

    /// Reader that yields its contents, then an error instead of end of
    /// input.
    struct FaultySource {
        data: Cursor<Vec<u8>>,
    }

    impl Read for FaultySource {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.data.read(buf)? {
                0 => Err(io::Error::new(io::ErrorKind::Other, "source failed")),
                n => Ok(n),
            }
        }
    }

    /// Writer that fails once it has accepted a set number of bytes.
    struct FaultySink {
        accepted: usize,
        limit: usize,
    }

    impl Write for FaultySink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.accepted >= self.limit {
                return Err(io::Error::new(io::ErrorKind::Other, "sink failed"));
            }
            let n = buf.len().min(self.limit - self.accepted);
            self.accepted += n;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn copy_through_storage_smaller_than_payload() {
        let payload = b"hello world";
        let mut src = &payload[..];
        let mut dest = Vec::new();

        let copied = copy_with(&mut src, &mut dest, MemoryStorage::with_capacity(5)).unwrap();

        assert_eq!(copied, 11);
        assert_eq!(dest, payload);
    }

    #[test]
    fn copy_with_default_storage() {
        let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        let mut src = &payload[..];
        let mut dest = Vec::new();

        let copied = copy(&mut src, &mut dest).unwrap();

        assert_eq!(copied, 100_000);
        assert_eq!(dest, payload);
    }

    #[test]
    fn copy_through_unbounded_storage() {
        let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 197) as u8).collect();
        let mut src = &payload[..];
        let mut dest = Vec::new();

        let copied = copy_with(&mut src, &mut dest, UnboundedStorage::new()).unwrap();

        assert_eq!(copied, 100_000);
        assert_eq!(dest, payload);
    }

    #[test]
    fn source_error_reaches_the_caller() {
        let mut src = FaultySource {
            data: Cursor::new(b"partial".to_vec()),
        };
        let mut dest = Vec::new();

        let err = copy(&mut src, &mut dest).unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::Other);
        assert_eq!(err.to_string(), "source failed");
        assert_eq!(dest, b"partial");
    }

    #[test]
    fn destination_error_reaches_the_caller() {
        let payload = vec![9; 256 * 1024];
        let mut src = &payload[..];
        let mut dest = FaultySink {
            accepted: 0,
            limit: 4,
        };

        let err = copy(&mut src, &mut dest).unwrap_err();
        assert_eq!(err.to_string(), "sink failed");
    }

    #[test]
    fn source_error_takes_priority_over_destination_error() {
        let mut src = FaultySource {
            data: Cursor::new(b"abc".to_vec()),
        };
        let mut dest = FaultySink {
            accepted: 0,
            limit: 2,
        };

        let err = copy(&mut src, &mut dest).unwrap_err();
        assert_eq!(err.to_string(), "source failed");
    }

    #[test]
    fn concurrent_copies_are_independent() {
        let first = thread::spawn(|| {
            let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
            let mut src = &payload[..];
            let mut dest = Vec::new();
            let copied = copy_with(&mut src, &mut dest, MemoryStorage::with_capacity(64)).unwrap();
            (copied, dest == payload)
        });

        let second = thread::spawn(|| {
            let mut src = FaultySource {
                data: Cursor::new(b"doomed".to_vec()),
            };
            let mut dest = Vec::new();
            let err = copy_with(&mut src, &mut dest, MemoryStorage::with_capacity(64)).unwrap_err();
            (err.to_string(), dest)
        });

        assert_eq!(first.join().unwrap(), (100_000, true));

        let (message, dest) = second.join().unwrap();
        assert_eq!(message, "source failed");
        assert_eq!(dest, b"doomed");
    }

    #[test]
    fn background_reader_relays_the_source() {
        let mut relayed = reader(
            Cursor::new(b"0123456789".to_vec()),
            MemoryStorage::with_capacity(4),
        );

        let mut data = Vec::new();
        relayed.read_to_end(&mut data).unwrap();
        assert_eq!(data, b"0123456789");
    }

    #[test]
    fn background_reader_relays_the_source_error() {
        let mut relayed = reader(
            FaultySource {
                data: Cursor::new(b"abc".to_vec()),
            },
            MemoryStorage::with_capacity(4),
        );

        let mut data = Vec::new();
        let err = relayed.read_to_end(&mut data).unwrap_err();
        assert_eq!(err.to_string(), "source failed");
        assert_eq!(data, b"abc");
    }

    /// Destination whose contents can be inspected from the test thread.
    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn background_writer_relays_to_the_destination() {
        let dest = SharedSink::default();
        let mut relayed = writer(dest.clone(), MemoryStorage::with_capacity(4));

        for i in 0..10 {
            write!(relayed, "{}", i).unwrap();
        }
        relayed.close();

        for _ in 0..100 {
            if dest.0.lock().unwrap().len() == 10 {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }

        assert_eq!(*dest.0.lock().unwrap(), b"0123456789");
    }

    /// Async reader that yields its contents, then an error.
    struct FaultyAsyncSource {
        data: Vec<u8>,
        pos: usize,
    }

    impl AsyncRead for FaultyAsyncSource {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _: &mut Context<'_>,
            buf: &mut [u8],
        ) -> Poll<io::Result<usize>> {
            if self.pos < self.data.len() {
                let n = buf.len().min(self.data.len() - self.pos);
                let pos = self.pos;
                buf[..n].copy_from_slice(&self.data[pos..pos + n]);
                self.pos += n;
                Poll::Ready(Ok(n))
            } else {
                Poll::Ready(Err(io::ErrorKind::ConnectionReset.into()))
            }
        }
    }

    #[test]
    fn chunked_copy_matches_the_source() {
        block_on(async {
            let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
            let mut dest = Vec::new();

            let copied = copy_chunked(&payload[..], &mut dest).await.unwrap();

            assert_eq!(copied, 100_000);
            assert_eq!(dest, payload);
        });
    }

    #[test]
    fn chunked_copy_reports_the_source_error() {
        block_on(async {
            let src = FaultyAsyncSource {
                data: b"abc".to_vec(),
                pos: 0,
            };
            let mut dest = Vec::new();

            let err = copy_chunked(src, &mut dest).await.unwrap_err();

            assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
            assert_eq!(dest, b"abc");
        });
    }
}
