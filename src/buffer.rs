//! Growable bytewise FIFO sitting between the kernel socket and the user's
//! message callback. Layout and growth heuristic are lifted directly from
//! `original_source/src/Buffer.h`/`Buffer.cc`:
//!
//! ```text
//! | prepend (8 bytes) | readable [reader, writer) | writable [writer, cap) |
//! ```

use std::io;
use std::os::unix::io::RawFd;

use crate::config::{BUFFER_PREPEND_SIZE, DEFAULT_BUFFER_SIZE, SCATTER_READ_EXTRA_SIZE};

/// A growable byte FIFO with a cheap-prepend region and a scatter-read fast
/// path for draining a socket in a single syscall regardless of how much
/// data the kernel has buffered.
#[derive(Debug)]
pub struct Buffer {
    data: Vec<u8>,
    reader: usize,
    writer: usize,
}

impl Default for Buffer {
    fn default() -> Buffer {
        Buffer::new()
    }
}

impl Buffer {
    pub fn new() -> Buffer {
        Buffer::with_capacity(DEFAULT_BUFFER_SIZE)
    }

    pub fn with_capacity(initial: usize) -> Buffer {
        let mut data = Vec::with_capacity(BUFFER_PREPEND_SIZE + initial);
        data.resize(BUFFER_PREPEND_SIZE + initial, 0);
        Buffer {
            data,
            reader: BUFFER_PREPEND_SIZE,
            writer: BUFFER_PREPEND_SIZE,
        }
    }

    pub fn readable_bytes(&self) -> usize {
        self.writer - self.reader
    }

    pub fn writable_bytes(&self) -> usize {
        self.data.len() - self.writer
    }

    pub fn prependable_bytes(&self) -> usize {
        self.reader
    }

    /// Borrow of the readable region, `[reader, writer)`.
    pub fn peek(&self) -> &[u8] {
        &self.data[self.reader..self.writer]
    }

    /// Advance the read cursor by `n` bytes, or reset both cursors if `n`
    /// reaches the end of the readable region.
    pub fn retrieve(&mut self, n: usize) {
        if n < self.readable_bytes() {
            self.reader += n;
        } else {
            self.retrieve_all();
        }
    }

    pub fn retrieve_all(&mut self) {
        self.reader = BUFFER_PREPEND_SIZE;
        self.writer = BUFFER_PREPEND_SIZE;
    }

    /// Drain the entire readable region as an owned `String`. Invalid UTF-8
    /// is replaced, matching how a lossy wire protocol would be logged
    /// rather than panicking on arbitrary bytes.
    pub fn retrieve_all_as_string(&mut self) -> String {
        let len = self.readable_bytes();
        self.retrieve_as_string(len)
    }

    pub fn retrieve_as_string(&mut self, len: usize) -> String {
        let s = String::from_utf8_lossy(&self.data[self.reader..self.reader + len]).into_owned();
        self.retrieve(len);
        s
    }

    pub fn ensure_writable(&mut self, len: usize) {
        if self.writable_bytes() < len {
            self.make_space(len);
        }
    }

    pub fn append(&mut self, bytes: &[u8]) {
        self.ensure_writable(bytes.len());
        let start = self.writer;
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
        self.writer += bytes.len();
    }

    fn begin_write_mut(&mut self) -> *mut u8 {
        unsafe { self.data.as_mut_ptr().add(self.writer) }
    }

    /// Reclaim the prepend-sized hole by shifting the readable region left;
    /// only grow the backing storage if that still would not fit.
    fn make_space(&mut self, len: usize) {
        if self.writable_bytes() + (self.prependable_bytes() - BUFFER_PREPEND_SIZE) < len {
            self.data.resize(self.writer + len, 0);
        } else {
            let readable = self.readable_bytes();
            self.data
                .copy_within(self.reader..self.writer, BUFFER_PREPEND_SIZE);
            self.reader = BUFFER_PREPEND_SIZE;
            self.writer = BUFFER_PREPEND_SIZE + readable;
        }
    }

    /// Scatter-read from `fd` into the writable tail plus a 64 KiB on-stack
    /// extra segment, in a single `readv` syscall. Returns the number of
    /// bytes read (`0` means EOF) or the syscall's `io::Error`.
    ///
    /// One syscall drains the socket even when the buffer is small, without
    /// having to oversize every connection's buffer up front.
    pub fn read_from_fd(&mut self, fd: RawFd) -> io::Result<usize> {
        let mut extra = [0u8; SCATTER_READ_EXTRA_SIZE];
        let writable = self.writable_bytes();

        let mut iov = [
            libc::iovec {
                iov_base: self.begin_write_mut() as *mut libc::c_void,
                iov_len: writable,
            },
            libc::iovec {
                iov_base: extra.as_mut_ptr() as *mut libc::c_void,
                iov_len: extra.len(),
            },
        ];
        // Only hand the kernel the extra segment when the tail alone might
        // not be enough to drain the socket in one call.
        let iovcnt = if writable < extra.len() { 2 } else { 1 };

        let n = unsafe { libc::readv(fd, iov.as_mut_ptr(), iovcnt) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        let n = n as usize;

        if n <= writable {
            self.writer += n;
        } else {
            self.writer = self.data.len();
            self.append(&extra[..n - writable]);
        }
        Ok(n)
    }

    /// A single non-blocking write of the readable region. The caller
    /// decides whether to retry on `WouldBlock` via write-readiness.
    pub fn write_to_fd(&self, fd: RawFd) -> io::Result<usize> {
        let readable = self.peek();
        let n = unsafe {
            libc::write(
                fd,
                readable.as_ptr() as *const libc::c_void,
                readable.len(),
            )
        };
        if n < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(n as usize)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_then_retrieve_round_trips() {
        let mut buf = Buffer::new();
        buf.append(b"hello world");
        assert_eq!(buf.retrieve_all_as_string(), "hello world");
        assert_eq!(buf.readable_bytes(), 0);
    }

    #[test]
    fn retrieve_all_resets_both_cursors_to_prepend() {
        let mut buf = Buffer::new();
        buf.append(b"abc");
        buf.retrieve(3);
        assert_eq!(buf.readable_bytes(), 0);
        assert_eq!(buf.prependable_bytes(), BUFFER_PREPEND_SIZE);
    }

    #[test]
    fn partial_retrieve_advances_reader_only() {
        let mut buf = Buffer::new();
        buf.append(b"abcdef");
        buf.retrieve(2);
        assert_eq!(buf.peek(), b"cdef");
    }

    #[test]
    fn growth_shifts_before_allocating() {
        let mut buf = Buffer::with_capacity(16);
        buf.append(&vec![b'x'; 10]);
        buf.retrieve(10);
        // Readable is now empty but writer is near the end; appending
        // should reuse the reclaimed prepend hole rather than reallocate.
        let cap_before = buf.data.len();
        buf.append(&vec![b'y'; 10]);
        assert_eq!(buf.data.len(), cap_before);
        assert_eq!(buf.readable_bytes(), 10);
    }

    #[test]
    fn growth_allocates_when_shifting_is_not_enough() {
        let mut buf = Buffer::with_capacity(16);
        buf.append(&vec![b'x'; 16]);
        let cap_before = buf.data.len();
        buf.append(&vec![b'y'; 64]);
        assert!(buf.data.len() > cap_before);
        assert_eq!(buf.readable_bytes(), 80);
    }

    #[test]
    fn invariants_hold_after_operations() {
        let mut buf = Buffer::new();
        buf.append(b"0123456789");
        buf.retrieve(4);
        assert!(buf.prependable_bytes() <= buf.reader);
        assert!(buf.reader <= buf.writer);
        assert!(buf.writer <= buf.data.len());
    }
}
