//! Output accounting utilities.
//!
//! This module provides a reusable `CountingWriter` wrapper that tracks
//! bytes written and optionally calls a callback function, enabling
//! byte-based progress reporting while the dump streams out.

use std::io::Write;

/// A writer wrapper that tracks bytes written and calls a progress callback.
pub struct CountingWriter<W: Write> {
    writer: W,
    callback: Option<Box<dyn Fn(u64)>>,
    bytes_written: u64,
}

impl<W: Write> CountingWriter<W> {
    /// Create a new CountingWriter wrapping the given writer.
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            callback: None,
            bytes_written: 0,
        }
    }

    /// Create a CountingWriter that reports the running byte total to the
    /// callback after each successful write.
    pub fn with_callback<F>(writer: W, callback: F) -> Self
    where
        F: Fn(u64) + 'static,
    {
        Self {
            writer,
            callback: Some(Box::new(callback)),
            bytes_written: 0,
        }
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.writer.write(buf)?;
        self.bytes_written += n as u64;
        if let Some(callback) = &self.callback {
            callback(self.bytes_written);
        }
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}
