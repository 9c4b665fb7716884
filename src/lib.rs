//! Binary search for lines in byte-sorted delimited text files
//! (e.g. `LC_ALL=C` sorted CSV/TSV/PSV), by key prefix.
//!
//! A [`Searcher`] locates, in time logarithmic in the dataset size, the
//! first line whose leading field equals a key, or all consecutive lines
//! sharing it. Lookups go through a persistent block [`Index`], which also
//! supports datasets stored as per-block zstd frames.

pub mod compare;
pub mod error;
pub mod index;
pub mod searcher;

mod buffer;
mod scanner;

pub use compare::{prefix_compare, prefix_compare_str, Compare};
pub use error::{Error, Result};
pub use index::{Index, IndexEntry, IndexOptions, ScanMode, DEFAULT_BLOCKSIZE};
pub use searcher::{IndexSemantics, Options, Searcher};
