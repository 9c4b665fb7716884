//! Block index for byte-sorted datasets.
//!
//! The index divides a dataset into blocks of at least `blocksize` bytes,
//! each ending on a line boundary, and records the first complete key of
//! every block together with the block's byte offset and length. Lookups
//! binary search the entry list to pick the one candidate block for a key.
//!
//! The index persists as a zstd-compressed YAML file next to the dataset
//! (see [`codec`] for the naming and freshness rules).

mod build;
mod codec;

use std::cmp::Ordering;
use std::fs::File;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::compare::prefix_compare_str;
use crate::error::{Error, Result};

pub use codec::index_path;

/// Default lower bound on block size, in bytes.
pub const DEFAULT_BLOCKSIZE: u64 = 4096;

/// Current index file format version.
const INDEX_VERSION: u32 = 2;

/// Index scan mode: how the builder walks the dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanMode {
    /// Read the dataset in blocksize chunks and extract one key per block.
    /// Fast, but cannot determine key uniqueness.
    #[default]
    Block,
    /// Read the dataset line by line. Slower, but tracks key uniqueness and
    /// exact block boundaries.
    Line,
}

/// Options for building an index.
#[derive(Debug, Clone, Default)]
pub struct IndexOptions {
    /// Lower bound on block size; defaults to [`DEFAULT_BLOCKSIZE`].
    pub blocksize: Option<u64>,
    /// Key/value delimiter; derived from the filename suffix when unset.
    pub delimiter: Option<String>,
    /// The first dataset line is a header and carries no data.
    pub header: bool,
    /// Builder scan mode.
    pub scan_mode: ScanMode,
}

/// One block: the first complete key in it, plus its byte span.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    #[serde(rename = "k")]
    pub key: String,
    /// File offset of the start of the block.
    #[serde(rename = "o")]
    pub offset: u64,
    /// Block length in bytes.
    #[serde(rename = "l")]
    pub length: u64,
}

/// Index metadata and entry list for a dataset. Immutable once built or
/// loaded; lives as long as the searcher holding it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Index {
    pub blocksize: u64,
    pub delim: String,
    /// Dataset mtime in unix seconds at the moment the index was built.
    pub epoch: i64,
    /// Absolute path of the dataset the index was built for.
    pub filepath: String,
    /// The first dataset line is a header.
    pub header: bool,
    /// Every key's first occurrence is referenced by an index entry. Only
    /// established by a line scan, and only when keys are unique; its
    /// contract with duplicate keys is undefined, so gate any optimization
    /// on `keys_unique` instead.
    pub keys_index_first: bool,
    /// No key occurs twice. Never set by a block scan.
    pub keys_unique: bool,
    /// Number of entries in `list`.
    pub length: usize,
    pub list: Vec<IndexEntry>,
    pub version: u32,
}

impl Index {
    /// Builds an index for the dataset at `path` with default options
    /// (block scan, delimiter derived from the filename suffix).
    pub fn new(path: impl AsRef<Path>) -> Result<Index> {
        Self::with_options(path, IndexOptions::default())
    }

    /// Builds an index for the dataset at `path`.
    pub fn with_options(path: impl AsRef<Path>, opt: IndexOptions) -> Result<Index> {
        let path = std::path::absolute(path.as_ref())?;
        let file = File::open(&path)?;
        let epoch = codec::epoch(&path)?;
        let delim = match opt.delimiter {
            Some(delim) => delim,
            None => build::derive_delimiter(&path)?,
        };

        let mut index = Index {
            blocksize: opt.blocksize.unwrap_or(DEFAULT_BLOCKSIZE),
            delim,
            epoch,
            filepath: path.to_string_lossy().into_owned(),
            header: opt.header,
            keys_index_first: false,
            keys_unique: false,
            length: 0,
            list: Vec::new(),
            version: INDEX_VERSION,
        };

        match opt.scan_mode {
            ScanMode::Line => build::generate_line_index(&mut index, &file)?,
            ScanMode::Block => build::generate_block_index(&mut index, &file)?,
        }

        Ok(index)
    }

    /// Number of block entries.
    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Returns the last entry whose key is less-than-or-equal-to `key` under
    /// the prefix comparator, and its position. Fails with
    /// `IndexEntryNotFound` if even the first entry's key is greater than
    /// `key`.
    ///
    /// Beware with duplicate keys: an equal run spanning several blocks
    /// converges on the run's *last* block. Use [`Index::block_entry_lt`] to
    /// find a block that precedes every match.
    pub fn block_entry_le(&self, key: &[u8]) -> Result<(usize, &IndexEntry)> {
        let key = String::from_utf8_lossy(key);
        let list = &self.list;
        if list.is_empty() || list[0].key.as_str() > key.as_ref() {
            return Err(Error::IndexEntryNotFound);
        }

        let mut begin = 0;
        let mut end = list.len() - 1;
        while end - begin > 0 {
            let mut mid = begin + (end - begin) / 2;
            // If mid == begin, skip to next
            if mid == begin {
                mid += 1;
            }
            match prefix_compare_str(&list[mid].key, &key) {
                Ordering::Less | Ordering::Equal => begin = mid,
                Ordering::Greater => {
                    if end == mid {
                        break;
                    }
                    end = mid;
                }
            }
        }

        Ok((begin, &list[begin]))
    }

    /// Returns the last entry whose key is strictly less than `key` under
    /// the prefix comparator, and its position. If no such entry exists, the
    /// first entry is returned: the first block may carry a header or start
    /// mid-way through a run of equal keys, so starting there is the
    /// conservative choice. Fails only when the index is empty.
    pub fn block_entry_lt(&self, key: &[u8]) -> Result<(usize, &IndexEntry)> {
        let key = String::from_utf8_lossy(key);
        let list = &self.list;
        if list.is_empty() {
            return Err(Error::IndexEntryNotFound);
        }

        let mut begin = 0;
        let mut end = list.len() - 1;
        while end - begin > 0 {
            let mut mid = begin + (end - begin) / 2;
            if mid == begin {
                mid += 1;
            }
            match prefix_compare_str(&list[mid].key, &key) {
                Ordering::Less => begin = mid,
                Ordering::Equal | Ordering::Greater => {
                    if end == mid {
                        break;
                    }
                    end = mid;
                }
            }
        }

        Ok((begin, &list[begin]))
    }

    /// Returns the nth entry, if one exists. Used to spill a scan into the
    /// next block when matches extend past a block boundary.
    pub fn block_entry_n(&self, n: usize) -> Option<&IndexEntry> {
        self.list.get(n)
    }
}
