//! Kernel pipes
//!
//! A unidirectional byte channel between refcounted reader and writer
//! endpoints. The ring keeps one slot empty to distinguish full from
//! empty. Endpoint construction and duplication bump the pipe's reader or
//! writer count; dropping an endpoint decrements it, and the pipe body is
//! freed when the last endpoint of either kind goes away.

use alloc::sync::Arc;

use spin::Mutex;

use super::FileContext;
use crate::error::{Errno, SysResult};

/// Capacity of the ring buffer. One byte is sacrificed to the full/empty
/// distinction.
pub const PIPE_SIZE: usize = 4096;

struct PipeState {
    buffer: [u8; PIPE_SIZE],
    read_pos: usize,
    write_pos: usize,
    readers: usize,
    writers: usize,
}

/// The shared pipe body.
pub struct Pipe {
    state: Mutex<PipeState>,
}

impl Pipe {
    fn new() -> Self {
        Self {
            state: Mutex::new(PipeState {
                buffer: [0; PIPE_SIZE],
                read_pos: 0,
                write_pos: 0,
                readers: 0,
                writers: 0,
            }),
        }
    }

    /// Append bytes to the ring.
    ///
    /// Fails with `EPIPE` when no readers remain, and with `EFULL` when the
    /// caller asked for `n > 0` bytes and none fit. Partial writes are
    /// normal otherwise.
    fn put(&self, data: &[u8]) -> SysResult<usize> {
        let mut state = self.state.lock();
        if state.readers == 0 {
            return Err(Errno::Pipe);
        }
        let mut count = 0;
        while count < data.len()
            && !(state.write_pos == PIPE_SIZE - 1 && state.read_pos == 0)
            && state.write_pos + 1 != state.read_pos
        {
            let pos = state.write_pos;
            state.buffer[pos] = data[count];
            count += 1;
            state.write_pos += 1;
            if state.write_pos >= PIPE_SIZE {
                state.write_pos = 0;
            }
        }
        if !data.is_empty() && count == 0 {
            Err(Errno::Full)
        } else {
            Ok(count)
        }
    }

    /// Take bytes from the ring; returns how many were available.
    fn take(&self, buf: &mut [u8]) -> usize {
        let mut state = self.state.lock();
        let mut count = 0;
        while state.read_pos != state.write_pos && count < buf.len() {
            buf[count] = state.buffer[state.read_pos];
            count += 1;
            state.read_pos += 1;
            if state.read_pos >= PIPE_SIZE {
                state.read_pos = 0;
            }
        }
        count
    }

    pub fn reader_count(&self) -> usize {
        self.state.lock().readers
    }

    pub fn writer_count(&self) -> usize {
        self.state.lock().writers
    }
}

/// Create a pipe and return its `(reader, writer)` endpoints.
pub fn create_pipe() -> (Arc<dyn FileContext>, Arc<dyn FileContext>) {
    let pipe = Arc::new(Pipe::new());
    let reader = Arc::new(PipeReader::new(pipe.clone()));
    let writer = Arc::new(PipeWriter::new(pipe));
    (reader, writer)
}

/// The read end of a pipe.
pub struct PipeReader {
    pipe: Arc<Pipe>,
}

impl PipeReader {
    fn new(pipe: Arc<Pipe>) -> Self {
        pipe.state.lock().readers += 1;
        Self { pipe }
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        self.pipe.state.lock().readers -= 1;
    }
}

impl FileContext for PipeReader {
    fn read(&self, buf: &mut [u8]) -> SysResult<usize> {
        // Zero-length reads return zero in every pipe state.
        if buf.is_empty() {
            return Ok(0);
        }
        let count = self.pipe.take(buf);
        if count == 0 && self.pipe.writer_count() == 0 {
            Err(Errno::Eof)
        } else {
            Ok(count)
        }
    }

    fn write(&self, _buf: &[u8]) -> SysResult<usize> {
        Err(Errno::Io)
    }

    fn duplicate(&self) -> Arc<dyn FileContext> {
        Arc::new(PipeReader::new(self.pipe.clone()))
    }
}

/// The write end of a pipe.
pub struct PipeWriter {
    pipe: Arc<Pipe>,
}

impl PipeWriter {
    fn new(pipe: Arc<Pipe>) -> Self {
        pipe.state.lock().writers += 1;
        Self { pipe }
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        self.pipe.state.lock().writers -= 1;
    }
}

impl FileContext for PipeWriter {
    fn read(&self, _buf: &mut [u8]) -> SysResult<usize> {
        Err(Errno::Io)
    }

    fn write(&self, buf: &[u8]) -> SysResult<usize> {
        self.pipe.put(buf)
    }

    fn duplicate(&self) -> Arc<dyn FileContext> {
        Arc::new(PipeWriter::new(self.pipe.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use alloc::vec::Vec;

    fn raw_pipe() -> (Arc<Pipe>, PipeReader, PipeWriter) {
        let pipe = Arc::new(Pipe::new());
        let reader = PipeReader::new(pipe.clone());
        let writer = PipeWriter::new(pipe.clone());
        (pipe, reader, writer)
    }

    #[test]
    fn bytes_come_out_in_order() {
        let (_, reader, writer) = raw_pipe();
        assert_eq!(writer.write(b"hello"), Ok(5));
        let mut buf = [0u8; 16];
        assert_eq!(reader.read(&mut buf), Ok(5));
        assert_eq!(&buf[..5], b"hello");
    }

    #[test]
    fn ring_wraps_and_preserves_order() {
        let (_, reader, writer) = raw_pipe();
        // Drive the positions around the ring several times.
        let chunk: Vec<u8> = (0u8..=255).collect();
        let mut buf = vec![0u8; 256];
        for _ in 0..40 {
            assert_eq!(writer.write(&chunk), Ok(256));
            assert_eq!(reader.read(&mut buf), Ok(256));
            assert_eq!(buf, chunk);
        }
    }

    #[test]
    fn capacity_is_one_less_than_the_ring() {
        let (_, _reader, writer) = raw_pipe();
        let big = vec![0xabu8; 2 * PIPE_SIZE];
        assert_eq!(writer.write(&big), Ok(PIPE_SIZE - 1));
        assert_eq!(writer.write(b"x"), Err(Errno::Full));
    }

    #[test]
    fn full_then_drained_accepts_again() {
        let (_, reader, writer) = raw_pipe();
        let big = vec![1u8; PIPE_SIZE];
        assert_eq!(writer.write(&big), Ok(PIPE_SIZE - 1));
        let mut buf = vec![0u8; 100];
        assert_eq!(reader.read(&mut buf), Ok(100));
        // Partial write: only the drained space fits.
        assert_eq!(writer.write(&big), Ok(100));
    }

    #[test]
    fn read_empty_with_live_writer_returns_zero() {
        let (_, reader, _writer) = raw_pipe();
        let mut buf = [0u8; 4];
        assert_eq!(reader.read(&mut buf), Ok(0));
    }

    #[test]
    fn read_after_last_writer_closes_hits_eof() {
        let (_, reader, writer) = raw_pipe();
        writer.write(b"bye").unwrap();
        drop(writer);
        let mut buf = [0u8; 16];
        // Buffered data drains first, then end-of-file.
        assert_eq!(reader.read(&mut buf), Ok(3));
        assert_eq!(reader.read(&mut buf), Err(Errno::Eof));
    }

    #[test]
    fn write_with_no_readers_is_a_broken_pipe() {
        let (_, reader, writer) = raw_pipe();
        drop(reader);
        assert_eq!(writer.write(b"anyone?"), Err(Errno::Pipe));
    }

    #[test]
    fn zero_length_read_is_zero_in_every_state() {
        let (_, reader, writer) = raw_pipe();
        let mut empty = [0u8; 0];
        assert_eq!(reader.read(&mut empty), Ok(0));
        writer.write(b"data").unwrap();
        assert_eq!(reader.read(&mut empty), Ok(0));
        drop(writer);
        assert_eq!(reader.read(&mut empty), Ok(0));
    }

    #[test]
    fn duplication_tracks_endpoint_counts() {
        let (pipe, reader, writer) = raw_pipe();
        assert_eq!((pipe.reader_count(), pipe.writer_count()), (1, 1));
        let reader2 = reader.duplicate();
        let writer2 = writer.duplicate();
        assert_eq!((pipe.reader_count(), pipe.writer_count()), (2, 2));
        drop(reader);
        drop(writer2);
        assert_eq!((pipe.reader_count(), pipe.writer_count()), (1, 1));

        // One reader left; writes still land.
        assert_eq!(writer.write(b"z"), Ok(1));
        let mut buf = [0u8; 1];
        assert_eq!(reader2.read(&mut buf), Ok(1));
    }

    #[test]
    fn pipe_body_is_destroyed_when_both_counts_reach_zero() {
        let pipe = Arc::new(Pipe::new());
        let weak = Arc::downgrade(&pipe);
        let reader = PipeReader::new(pipe.clone());
        let writer = PipeWriter::new(pipe);

        drop(writer);
        assert!(weak.upgrade().is_some(), "a reader is still attached");
        drop(reader);
        assert!(weak.upgrade().is_none(), "pipe body should be freed");
    }
}
