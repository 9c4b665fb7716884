//! Binary search over byte-sorted, line-oriented datasets by key prefix.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use crate::buffer::{read_full_at, BlockBuffer};
use crate::compare::{prefix_compare, Compare};
use crate::errdata;
use crate::error::{Error, Result};
use crate::index::{Index, IndexEntry, IndexOptions, DEFAULT_BLOCKSIZE};
use crate::scanner::LineScanner;

/// Index attachment semantics for a searcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexSemantics {
    /// Use a sibling index when one loads cleanly, otherwise build a
    /// transient one in memory on first use.
    #[default]
    Auto,
    /// Fail construction if no sibling index can be loaded.
    Required,
    /// Build and persist a sibling index if none can be loaded.
    Create,
    /// Ignore any index on disk.
    None,
}

/// Searcher options.
#[derive(Clone, Default)]
pub struct Options {
    /// Blocksize used when the searcher has to build an index. Has no effect
    /// on an index loaded from disk.
    pub blocksize: Option<u64>,
    /// Replacement prefix comparison function.
    pub compare: Option<Compare>,
    /// The first line of the dataset is a header and should be ignored.
    pub header: bool,
    /// Matches must be followed by a word boundary. Byte-wise: multi-byte
    /// scripts spanning the boundary are not handled.
    pub boundary: bool,
    /// Position lookups use less-than-or-equal-to match semantics.
    pub match_le: bool,
    /// Index attachment semantics.
    pub index: IndexSemantics,
}

impl Options {
    pub fn blocksize(mut self, blocksize: u64) -> Self {
        self.blocksize = Some(blocksize);
        self
    }

    pub fn compare(mut self, compare: Compare) -> Self {
        self.compare = Some(compare);
        self
    }

    pub fn header(mut self, header: bool) -> Self {
        self.header = header;
        self
    }

    pub fn boundary(mut self, boundary: bool) -> Self {
        self.boundary = boundary;
        self
    }

    pub fn match_le(mut self, match_le: bool) -> Self {
        self.match_le = match_le;
        self
    }

    pub fn index(mut self, index: IndexSemantics) -> Self {
        self.index = index;
        self
    }
}

/// Provides binary search over a byte-sorted, line-oriented dataset by key
/// prefix.
///
/// A searcher owns its dataset handle, block buffers and index, and every
/// lookup takes `&mut self`: one searcher serves one thread. Parallel
/// lookups construct one searcher per worker; the underlying dataset file
/// can be shared because all reads are positional.
#[derive(Debug)]
pub struct Searcher {
    file: File,
    length: u64,
    blocksize: u64,
    buf: BlockBuffer,
    dbuf: BlockBuffer,
    filepath: PathBuf,
    index: Option<Index>,
    compare: Compare,
    header: bool,
    boundary: bool,
    match_le: bool,
}

impl Searcher {
    /// Opens the dataset at `path` with default options. A sibling index is
    /// attached when one loads cleanly; load failures are not errors here.
    pub fn new(path: impl AsRef<Path>) -> Result<Searcher> {
        let filepath = path.as_ref().to_path_buf();
        let meta = fs::metadata(&filepath)?;
        if meta.is_dir() {
            return Err(Error::NotFile);
        }
        let file = File::open(&filepath)?;
        let index = Index::load(&filepath).ok();

        Ok(Searcher {
            file,
            length: meta.len(),
            blocksize: DEFAULT_BLOCKSIZE,
            buf: BlockBuffer::with_capacity(DEFAULT_BLOCKSIZE as usize + 1),
            dbuf: BlockBuffer::new(),
            filepath,
            index,
            compare: prefix_compare,
            header: false,
            boundary: false,
            match_le: false,
        })
    }

    /// Opens the dataset at `path` with the given options.
    pub fn with_options(path: impl AsRef<Path>, options: Options) -> Result<Searcher> {
        let mut s = Searcher::new(path)?;

        if let Some(blocksize) = options.blocksize {
            s.blocksize = blocksize;
        }
        if let Some(compare) = options.compare {
            s.compare = compare;
        }
        s.header = options.header;
        s.boundary = options.boundary;
        s.match_le = options.match_le;

        match options.index {
            IndexSemantics::None => s.index = None,
            IndexSemantics::Required if s.index.is_none() => {
                return Err(Error::NoIndexFound);
            }
            IndexSemantics::Create if s.index.is_none() => {
                let index = Index::with_options(&s.filepath, s.builder_options())?;
                index.write()?;
                s.index = Some(index);
            }
            _ => {}
        }

        Ok(s)
    }

    /// Dataset length in bytes.
    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// The attached index, if any.
    pub fn index(&self) -> Option<&Index> {
        self.index.as_ref()
    }

    /// Returns the first line whose first field equals `key`.
    pub fn line(&mut self, key: &[u8]) -> Result<Vec<u8>> {
        let lines = self.lines_n(key, 1)?;
        lines.into_iter().next().ok_or(Error::NotFound)
    }

    /// Returns all consecutive lines whose first field equals `key`. The
    /// delimiter is appended to `key` before scanning, so this is an exact
    /// first-field match, not a substring search.
    pub fn lines(&mut self, key: &[u8]) -> Result<Vec<Vec<u8>>> {
        self.lines_n(key, 0)
    }

    /// Returns the first `n` lines whose first field equals `key`
    /// (`n == 0` means unlimited).
    pub fn lines_n(&mut self, key: &[u8], n: usize) -> Result<Vec<Vec<u8>>> {
        if self.is_compressed() {
            let Some(index) = self.index.take() else {
                return Err(Error::CompressedNoIndex);
            };
            let result = self.scan_compressed_lines(&index, key, n);
            self.index = Some(index);
            return result;
        }

        // Without an index, build and keep a transient one (never persisted)
        let index = match self.index.take() {
            Some(index) => index,
            None => Index::with_options(&self.filepath, self.builder_options())?,
        };
        let result = self.scan_indexed_lines(&index, key, n);
        self.index = Some(index);
        result
    }

    fn builder_options(&self) -> IndexOptions {
        IndexOptions {
            blocksize: Some(self.blocksize),
            header: self.header,
            ..IndexOptions::default()
        }
    }

    fn is_compressed(&self) -> bool {
        self.filepath.extension().is_some_and(|ext| ext == "zst")
    }

    fn scanner(&self) -> LineScanner {
        LineScanner {
            compare: self.compare,
            boundary: self.boundary,
            match_le: self.match_le,
        }
    }

    /// Loads the block for `entry` into the raw buffer. Noop if that block
    /// is already loaded.
    fn read_block_entry(&mut self, entry: &IndexEntry) -> Result<()> {
        if self.buf.holds(entry.offset) {
            return Ok(());
        }
        let buf = self.buf.prepare(entry.length as usize);
        let bytesread = read_full_at(&self.file, buf, entry.offset)?;
        if (bytesread as u64) < entry.length {
            return errdata!(
                "short read on block at offset {}: read {bytesread} bytes, expected {}",
                entry.offset,
                entry.length
            );
        }
        self.buf.mark_loaded(entry.offset);
        Ok(())
    }

    /// Loads and decompresses the zstd frame for `entry` into the
    /// decompressed buffer, keyed by the compressed offset. Noop if that
    /// block is already decompressed.
    fn decompress_block_entry(&mut self, entry: &IndexEntry) -> Result<()> {
        if self.dbuf.holds(entry.offset) {
            return Ok(());
        }
        self.read_block_entry(entry)?;
        zstd::stream::copy_decode(self.buf.data(), self.dbuf.writer())?;
        self.dbuf.mark_loaded(entry.offset);
        Ok(())
    }

    /// Scans the plain dataset for lines whose first field equals `key`,
    /// starting from the last index block that precedes any possible match
    /// and spilling into successor blocks while the run continues.
    fn scan_indexed_lines(&mut self, index: &Index, key: &[u8], n: usize) -> Result<Vec<Vec<u8>>> {
        let (mut e, found) = index.block_entry_lt(key)?;
        tracing::debug!(
            key = %String::from_utf8_lossy(key),
            entry = e,
            entry_key = %found.key,
            offset = found.offset,
            length = found.length,
            "block entry"
        );

        // Key search, so append the delimiter
        let mut b = key.to_vec();
        b.extend_from_slice(index.delim.as_bytes());

        let scanner = self.scanner();
        let mut entry = found.clone();
        let mut lines: Vec<Vec<u8>> = Vec::new();
        loop {
            self.read_block_entry(&entry)?;
            let remaining = if n > 0 { n - lines.len() } else { 0 };
            let (l, terminate) = scanner.scan_lines_matching(self.buf.data(), &b, remaining);
            lines.extend(l);
            if terminate || (n > 0 && lines.len() >= n) {
                break;
            }
            e += 1;
            match index.block_entry_n(e) {
                Some(next) => entry = next.clone(),
                None => break,
            }
        }

        if lines.is_empty() {
            return Err(Error::NotFound);
        }
        Ok(lines)
    }

    /// Compressed variant of `scan_indexed_lines`: index entries address
    /// whole zstd frames, which are decompressed before scanning.
    fn scan_compressed_lines(
        &mut self,
        index: &Index,
        key: &[u8],
        n: usize,
    ) -> Result<Vec<Vec<u8>>> {
        let (mut e, found) = index.block_entry_lt(key)?;

        let mut b = key.to_vec();
        b.extend_from_slice(index.delim.as_bytes());

        let scanner = self.scanner();
        let mut entry = found.clone();
        let mut lines: Vec<Vec<u8>> = Vec::new();
        loop {
            self.decompress_block_entry(&entry)?;
            let remaining = if n > 0 { n - lines.len() } else { 0 };
            let (l, terminate) = scanner.scan_lines_matching(self.dbuf.data(), &b, remaining);
            lines.extend(l);
            if terminate || (n > 0 && lines.len() >= n) {
                break;
            }
            e += 1;
            match index.block_entry_n(e) {
                Some(next) => entry = next.clone(),
                None => break,
            }
        }

        if lines.is_empty() {
            return Err(Error::NotFound);
        }
        Ok(lines)
    }
}
