//! Reusable block buffers and positional block reads.

use std::fs::File;

use crate::error::Result;

/// A single-slot buffer holding one loaded block, keyed by the block's file
/// offset so repeated loads of the same block are noops. `offset == None` is
/// the invalidation sentinel. Capacity grows as needed and is never released;
/// shrinking only adjusts the slice view.
#[derive(Debug)]
pub(crate) struct BlockBuffer {
    data: Vec<u8>,
    offset: Option<u64>,
}

impl BlockBuffer {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(cap: usize) -> Self {
        BlockBuffer {
            data: Vec::with_capacity(cap),
            offset: None,
        }
    }

    /// True if the buffer currently holds the block at `offset`.
    pub fn holds(&self, offset: u64) -> bool {
        self.offset == Some(offset)
    }

    /// Resizes for an incoming block of `len` bytes and returns the slice to
    /// fill. Invalidates the offset key until `mark_loaded` is called, so a
    /// failed load never leaves stale bytes marked valid.
    pub fn prepare(&mut self, len: usize) -> &mut [u8] {
        self.offset = None;
        self.data.resize(len, 0);
        &mut self.data
    }

    /// Clears and hands out the backing Vec for streamed writes
    /// (decompression). Invalidates like `prepare`.
    pub fn writer(&mut self) -> &mut Vec<u8> {
        self.offset = None;
        self.data.clear();
        &mut self.data
    }

    pub fn mark_loaded(&mut self, offset: u64) {
        self.offset = Some(offset);
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

fn read_at_os(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
    #[cfg(unix)]
    {
        std::os::unix::fs::FileExt::read_at(file, buf, offset)
    }
    #[cfg(windows)]
    {
        std::os::windows::fs::FileExt::seek_read(file, buf, offset)
    }
}

/// Reads at `offset` until `buf` is full or EOF, returning the byte count.
/// Positional reads leave the file cursor untouched, so searchers sharing a
/// dataset file never perturb each other.
pub(crate) fn read_full_at(file: &File, buf: &mut [u8], offset: u64) -> Result<usize> {
    let mut read = 0;
    while read < buf.len() {
        match read_at_os(file, &mut buf[read..], offset + read as u64) {
            Ok(0) => break,
            Ok(n) => read += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(read)
}
