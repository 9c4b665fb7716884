//! Index persistence.
//!
//! The index file is zstd-compressed YAML, stored next to the dataset with
//! every `.` in the dataset filename changed to `_` plus a `.bsx` suffix:
//! the index for `rdns1.csv` is `rdns1_csv.bsx`.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use crate::errdata;
use crate::error::{Error, Result};

use super::Index;

const INDEX_SUFFIX: &str = "bsx";

/// Modtime for `path` in unix seconds.
pub(crate) fn epoch(path: &Path) -> Result<i64> {
    let mtime = fs::metadata(path)?.modified()?;
    match mtime.duration_since(UNIX_EPOCH) {
        Ok(d) => Ok(d.as_secs() as i64),
        Err(e) => errdata!("mtime before unix epoch: {e}"),
    }
}

/// Returns the index filepath associated with the dataset at `path`.
pub fn index_path(path: &Path) -> Result<PathBuf> {
    let path = std::path::absolute(path)?;
    let name = match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => name,
        None => return errdata!("no filename in dataset path {:?}", path),
    };
    let index_name = format!("{}.{}", name.replace('.', "_"), INDEX_SUFFIX);
    Ok(path.with_file_name(index_name))
}

impl Index {
    /// Loads the index from the index file associated with the dataset at
    /// `path`.
    ///
    /// Fails with `IndexNotFound` if no index file exists, `IndexPathMismatch`
    /// if the index was built for a different dataset path, and `IndexExpired`
    /// if the dataset has been modified since the index was built.
    pub fn load(path: impl AsRef<Path>) -> Result<Index> {
        let path = std::path::absolute(path.as_ref())?;
        let idxpath = index_path(&path)?;
        let fh = match File::open(&idxpath) {
            Ok(fh) => fh,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::IndexNotFound);
            }
            Err(e) => return Err(e.into()),
        };

        let data = zstd::decode_all(fh)?;
        let mut index: Index = serde_yaml::from_slice(&data)
            .map_err(|e| Error::InvalidData(format!("bad index file {:?}: {e}", idxpath)))?;

        if index.filepath != path.to_string_lossy() {
            return Err(Error::IndexPathMismatch);
        }
        if epoch(&path)? > index.epoch {
            return Err(Error::IndexExpired);
        }
        // Indexes written before the format carried a version are version 1
        if index.version == 0 {
            index.version = 1;
        }

        Ok(index)
    }

    /// Writes the index to its index file, replacing any previous one.
    pub fn write(&self) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        let idxpath = index_path(Path::new(&self.filepath))?;

        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o644);
        }
        let fh = options.open(&idxpath)?;
        zstd::stream::copy_encode(data.as_bytes(), fh, 0)?;

        Ok(())
    }
}
