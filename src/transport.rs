//! Buffered line-oriented access to the inbound byte stream.
//!
//! The receiver task owns a [LineReader] over the transport's read half. The
//! buffer is deliberately small and fixed: AT response lines are short, and a
//! line that overruns the buffer is handed out as a partial chunk instead of
//! growing memory, mirroring how inbound data headers carry their payload
//! length out of band.

use std::io::{self, Read};

/// Capacity of the line scratch buffer in bytes.
pub(crate) const LINE_BUF: usize = 128;

/// One result of [LineReader::read_line].
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ScanLine<'a> {
    /// A complete line, including the terminating `\n`.
    Full(&'a [u8]),
    /// The buffer filled up before a newline arrived. The returned bytes are
    /// consumed; the rest of the line follows in later calls.
    Partial(&'a [u8]),
}

/// Errors a serial transport reports without the stream being broken.
fn retryable(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

/// A buffered reader with a bounded scratch window.
///
/// `read_line` hands out slices of the internal buffer, `read_exact_into` and
/// `discard` bypass it for binary payloads. End of stream surfaces as
/// [io::ErrorKind::UnexpectedEof].
pub(crate) struct LineReader<R> {
    inner: R,
    buf: [u8; LINE_BUF],
    start: usize,
    end: usize,
}

impl<R: Read> LineReader<R> {
    pub(crate) fn new(inner: R) -> Self {
        Self {
            inner,
            buf: [0; LINE_BUF],
            start: 0,
            end: 0,
        }
    }

    /// Reads up to and including the next `\n`.
    ///
    /// Returns [ScanLine::Partial] when the buffer is full without a newline
    /// in sight; the caller decides whether that is payload or body text.
    pub(crate) fn read_line(&mut self) -> io::Result<ScanLine<'_>> {
        let mut scanned = 0;
        let (len, full) = loop {
            let window = &self.buf[self.start..self.end];
            if let Some(pos) = window[scanned..].iter().position(|&b| b == b'\n') {
                break (scanned + pos + 1, true);
            }
            scanned = window.len();
            if scanned == self.buf.len() {
                break (scanned, false);
            }
            self.fill()?;
        };
        let from = self.start;
        self.start += len;
        let line = &self.buf[from..from + len];
        Ok(if full {
            ScanLine::Full(line)
        } else {
            ScanLine::Partial(line)
        })
    }

    /// Fills `out` completely, draining buffered bytes first.
    pub(crate) fn read_exact_into(&mut self, out: &mut [u8]) -> io::Result<()> {
        let buffered = (self.end - self.start).min(out.len());
        out[..buffered].copy_from_slice(&self.buf[self.start..self.start + buffered]);
        self.start += buffered;

        let mut filled = buffered;
        while filled < out.len() {
            match self.inner.read(&mut out[filled..]) {
                Ok(0) => return Err(eof()),
                Ok(n) => filled += n,
                Err(e) if retryable(&e) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Consumes and drops exactly `n` bytes.
    pub(crate) fn discard(&mut self, mut n: usize) -> io::Result<()> {
        let buffered = (self.end - self.start).min(n);
        self.start += buffered;
        n -= buffered;

        let mut scratch = [0u8; 64];
        while n > 0 {
            let want = n.min(scratch.len());
            match self.inner.read(&mut scratch[..want]) {
                Ok(0) => return Err(eof()),
                Ok(k) => n -= k,
                Err(e) if retryable(&e) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Reads at least one more byte into the scratch window.
    fn fill(&mut self) -> io::Result<()> {
        if self.start > 0 {
            self.buf.copy_within(self.start..self.end, 0);
            self.end -= self.start;
            self.start = 0;
        }
        loop {
            match self.inner.read(&mut self.buf[self.end..]) {
                Ok(0) => return Err(eof()),
                Ok(n) => {
                    self.end += n;
                    return Ok(());
                }
                Err(e) if retryable(&e) => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

fn eof() -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, "transport closed")
}
