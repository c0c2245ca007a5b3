//! Per-table write-behind buffers with spill-to-disk.
//!
//! INSERT statements accumulate in memory per table; once the combined
//! size crosses the threshold every buffer is drained into its lazily
//! created temp file so memory stays bounded regardless of closure size.
//! Write errors are latched: the first one turns all later writes into
//! no-ops and is reported once at the end of the run.

use std::io::{self, Cursor, Read, Write};
use std::path::PathBuf;

use ahash::AHashMap;
use tempfile::NamedTempFile;

/// Spill threshold for the combined in-memory buffer size (50 MiB).
pub const MAX_MEM_SIZE: usize = 50 * 1024 * 1024;

pub struct RowsBuffer {
    max_mem_size: usize,
    buffers: AHashMap<String, Vec<u8>>,
    mem_size: usize,
    files: AHashMap<String, NamedTempFile>,
    latched: Option<io::Error>,
}

impl RowsBuffer {
    pub fn new() -> Self {
        Self::with_threshold(MAX_MEM_SIZE)
    }

    /// Buffer with a custom spill threshold; tests use tiny thresholds to
    /// force the spill path.
    pub fn with_threshold(max_mem_size: usize) -> Self {
        Self {
            max_mem_size,
            buffers: AHashMap::new(),
            mem_size: 0,
            files: AHashMap::new(),
            latched: None,
        }
    }

    /// Append bytes to the table's buffer. A no-op once a write error has
    /// been latched; pick the error up with [`RowsBuffer::take_error`].
    pub fn write(&mut self, table: &str, bytes: &[u8]) {
        if self.latched.is_some() {
            return;
        }

        let buffer = self.buffers.entry(table.to_string()).or_default();
        buffer.extend_from_slice(bytes);
        self.mem_size += bytes.len();

        if self.mem_size >= self.max_mem_size {
            if let Err(e) = self.flush() {
                self.latched = Some(e);
            }
        }
    }

    /// Drain every in-memory buffer into its per-table temp file.
    fn flush(&mut self) -> io::Result<()> {
        for (table, buffer) in &mut self.buffers {
            if buffer.is_empty() {
                continue;
            }

            let file = match self.files.entry(table.clone()) {
                std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
                std::collections::hash_map::Entry::Vacant(entry) => entry.insert(
                    tempfile::Builder::new()
                        .prefix(&format!("dumper_{table}_"))
                        .tempfile()?,
                ),
            };

            file.write_all(buffer)?;
            buffer.clear();
        }

        self.mem_size = 0;
        Ok(())
    }

    /// Sequential reader over everything written for `table`: the spilled
    /// file contents (from offset 0) followed by the in-memory tail.
    pub fn reader(&self, table: &str) -> io::Result<Box<dyn Read + '_>> {
        let tail = self
            .buffers
            .get(table)
            .map(|b| b.as_slice())
            .unwrap_or_default();

        match self.files.get(table) {
            Some(file) => {
                let spilled = file.reopen()?;
                Ok(Box::new(spilled.chain(Cursor::new(tail))))
            }
            None => Ok(Box::new(Cursor::new(tail))),
        }
    }

    /// Paths of the temp files currently backing spilled tables.
    pub fn spill_paths(&self) -> Vec<PathBuf> {
        self.files.values().map(|f| f.path().to_path_buf()).collect()
    }

    /// The latched write error, if any. Clears the latch.
    pub fn take_error(&mut self) -> Option<io::Error> {
        self.latched.take()
    }

    /// Drop all buffers and delete every temp file. Runs on success and
    /// failure paths alike.
    pub fn clear(&mut self) {
        self.buffers.clear();
        self.mem_size = 0;
        self.files.clear();
    }
}

impl Drop for RowsBuffer {
    fn drop(&mut self) {
        self.clear();
    }
}
