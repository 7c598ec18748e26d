// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Cross-wired in-memory byte pipe.
//!
//! Each direction is a byte queue guarded by a mutex with a condvar for
//! blocking reads, so a pair behaves like a connected socket pair: reads
//! block until data arrives, the writer closes, or the read timeout fires.

use super::TwoWayStream;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default)]
struct PipeState {
    data: VecDeque<u8>,
    closed: bool,
}

#[derive(Debug, Default)]
struct Pipe {
    state: Mutex<PipeState>,
    readable: Condvar,
}

impl Pipe {
    fn close(&self) {
        self.state.lock().closed = true;
        self.readable.notify_all();
    }
}

/// One end of an in-memory duplex pipe.
#[derive(Debug)]
pub struct MemoryStream {
    incoming: Arc<Pipe>,
    outgoing: Arc<Pipe>,
    read_timeout: Option<Duration>,
    ok: bool,
}

impl MemoryStream {
    /// Create a connected pair: bytes written to one end are read from the other.
    pub fn pair() -> (Self, Self) {
        let a_to_b = Arc::new(Pipe::default());
        let b_to_a = Arc::new(Pipe::default());
        let a = Self {
            incoming: b_to_a.clone(),
            outgoing: a_to_b.clone(),
            read_timeout: None,
            ok: true,
        };
        let b = Self {
            incoming: a_to_b,
            outgoing: b_to_a,
            read_timeout: None,
            ok: true,
        };
        (a, b)
    }

    /// Number of bytes written by the peer and not yet read here.
    pub fn available(&self) -> usize {
        self.incoming.state.lock().data.len()
    }
}

impl Read for MemoryStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut state = self.incoming.state.lock();
        while state.data.is_empty() {
            if state.closed {
                self.ok = false;
                return Ok(0);
            }
            match self.read_timeout {
                Some(timeout) => {
                    if self
                        .incoming
                        .readable
                        .wait_for(&mut state, timeout)
                        .timed_out()
                        && state.data.is_empty()
                    {
                        return Err(io::Error::new(io::ErrorKind::TimedOut, "read timed out"));
                    }
                }
                None => self.incoming.readable.wait(&mut state),
            }
        }
        let n = buf.len().min(state.data.len());
        for (slot, byte) in buf.iter_mut().zip(state.data.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for MemoryStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.outgoing.state.lock();
        if state.closed {
            self.ok = false;
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"));
        }
        state.data.extend(buf);
        drop(state);
        self.outgoing.readable.notify_all();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl TwoWayStream for MemoryStream {
    fn is_ok(&self) -> bool {
        self.ok
    }

    fn close(&mut self) {
        self.outgoing.close();
        self.incoming.close();
        self.ok = false;
    }

    fn set_read_timeout(&mut self, dur: Option<Duration>) -> io::Result<()> {
        self.read_timeout = dur;
        Ok(())
    }
}

impl Drop for MemoryStream {
    fn drop(&mut self) {
        self.outgoing.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_pair_is_cross_wired() {
        let (mut a, mut b) = MemoryStream::pair();
        a.write_all(b"from a").unwrap();
        b.write_all(b"from b").unwrap();
        assert_eq!(b.available(), 6);

        let mut buf = [0u8; 6];
        b.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"from a");
        a.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"from b");
    }

    #[test]
    fn test_blocking_read_wakes_on_write() {
        let (mut a, mut b) = MemoryStream::pair();
        let reader = thread::spawn(move || {
            let mut buf = [0u8; 3];
            b.read_exact(&mut buf).unwrap();
            buf
        });
        thread::sleep(Duration::from_millis(20));
        a.write_all(b"abc").unwrap();
        assert_eq!(&reader.join().unwrap(), b"abc");
    }

    #[test]
    fn test_drop_signals_eof() {
        let (a, mut b) = MemoryStream::pair();
        drop(a);
        let mut buf = [0u8; 1];
        assert_eq!(b.read(&mut buf).unwrap(), 0);
        assert!(!b.is_ok());
    }

    #[test]
    fn test_read_timeout() {
        let (_a, mut b) = MemoryStream::pair();
        b.set_read_timeout(Some(Duration::from_millis(10))).unwrap();
        let mut buf = [0u8; 1];
        let err = b.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert!(b.is_ok(), "timeout must not poison the stream");
    }
}
