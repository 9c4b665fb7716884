use std::fmt::Display;

/// bsearch errors.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// No line beginning with the search key exists in the dataset.
    /// Distinguished from all other variants so callers can branch on
    /// "absent key" vs. operational failure.
    NotFound,
    /// A key is longer than the index blocksize, so no block-aligned
    /// index entry can be produced for it.
    KeyExceedsBlocksize,
    /// The dataset path exists but is not a regular file.
    NotFile,
    /// The dataset is compressed and no index is attached; compressed
    /// datasets cannot be searched without one.
    CompressedNoIndex,
    /// An index was required by the caller but none could be loaded.
    NoIndexFound,
    /// No index file exists next to the dataset.
    IndexNotFound,
    /// The dataset has been modified since its index was built.
    IndexExpired,
    /// The index contains no entries.
    IndexEmpty,
    /// The index file was built for a different dataset path.
    IndexPathMismatch,
    /// No index entry satisfies the lookup.
    IndexEntryNotFound,
    /// The delimiter could not be derived from the dataset filename.
    UnknownDelimiter,
    /// Invalid data: sort violations, lines without a delimiter, or an
    /// index file that cannot be decoded.
    InvalidData(String),
    /// An IO error.
    IO(String),
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::NotFound => write!(f, "not found"),
            Error::KeyExceedsBlocksize => write!(f, "key length exceeds blocksize"),
            Error::NotFile => write!(f, "filename exists but is not a file"),
            Error::CompressedNoIndex => write!(f, "compressed file without an index file"),
            Error::NoIndexFound => write!(f, "no index found"),
            Error::IndexNotFound => write!(f, "index file not found"),
            Error::IndexExpired => write!(f, "index file out of date"),
            Error::IndexEmpty => write!(f, "index contains no entries"),
            Error::IndexPathMismatch => write!(f, "index file path mismatch"),
            Error::IndexEntryNotFound => write!(f, "index entry not found"),
            Error::UnknownDelimiter => write!(f, "cannot derive delimiter from filename"),
            Error::InvalidData(msg) => write!(f, "invalid data: {msg}"),
            Error::IO(msg) => write!(f, "io error: {msg}"),
        }
    }
}

/// Constructs an Error::InvalidData for the given format string.
#[macro_export]
macro_rules! errdata {
    ($($args:tt)*) => { $crate::error::Error::InvalidData(format!($($args)*)).into() };
}

/// A bsearch Result returning Error.
pub type Result<T> = std::result::Result<T, Error>;

impl<T> From<Error> for Result<T> {
    fn from(error: Error) -> Self {
        Err(error)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IO(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::InvalidData(err.to_string())
    }
}
