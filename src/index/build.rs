//! Index builders: block scan and line scan.

use std::cmp::Ordering;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::buffer::read_full_at;
use crate::errdata;
use crate::error::{Error, Result};

use super::{Index, IndexEntry};

fn find_byte(haystack: &[u8], needle: u8) -> Option<usize> {
    haystack.iter().position(|&b| b == needle)
}

fn find_delim(haystack: &[u8], delim: &[u8]) -> Option<usize> {
    if delim.is_empty() || haystack.len() < delim.len() {
        return None;
    }
    haystack.windows(delim.len()).position(|w| w == delim)
}

/// Guesses the delimiter from the dataset filename suffix.
pub(crate) fn derive_delimiter(path: &Path) -> Result<String> {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let name = name.strip_suffix(".zst").unwrap_or(name);
    if name.ends_with(".csv") {
        Ok(",".to_string())
    } else if name.ends_with(".tsv") {
        Ok("\t".to_string())
    } else if name.ends_with(".psv") {
        Ok("|".to_string())
    } else {
        Err(Error::UnknownDelimiter)
    }
}

/// Extracts the index entry for the first complete keyed line in the chunk
/// `buf[..bytesread]` read at `block_position`, re-reading as needed when the
/// line or its key straddles the chunk. Returns the entry plus the (possibly
/// advanced) position the chunk was processed at, or None when nothing but
/// line fragments remain before EOF.
fn process_block(
    file: &File,
    buf: &mut [u8],
    mut bytesread: usize,
    mut block_position: u64,
    delim: &[u8],
    file_len: u64,
) -> Result<Option<(IndexEntry, u64)>> {
    loop {
        if bytesread == 0 {
            return Ok(None);
        }

        // The first complete line starts just past the first newline, except
        // at the start of the file where it starts at offset zero.
        let nl = if block_position == 0 {
            None
        } else {
            match find_byte(&buf[..bytesread], b'\n') {
                Some(nl) => Some(nl),
                None => {
                    // no line boundary at all: skip the whole chunk
                    block_position += bytesread as u64;
                    bytesread = read_full_at(file, buf, block_position)?;
                    continue;
                }
            }
        };
        let line_start = nl.map_or(0, |nl| nl + 1);

        let didx = match find_delim(&buf[line_start..bytesread], delim) {
            Some(didx) => line_start + didx,
            None => match nl {
                Some(nl) if nl > 0 => {
                    // partial line at the chunk tail: rewind so it is re-read
                    // in full starting from its own newline
                    block_position += nl as u64;
                    bytesread = read_full_at(file, buf, block_position)?;
                    continue;
                }
                Some(_) if block_position + bytesread as u64 >= file_len => {
                    // nothing but a trailing newline remains
                    return Ok(None);
                }
                // a keyless span this long means the key cannot fit a block
                _ => return Err(Error::KeyExceedsBlocksize),
            },
        };

        // A newline between the line start and the delimiter means a line
        // with no delimiter at all
        if let Some(bad) = find_byte(&buf[line_start..didx], b'\n') {
            let line = String::from_utf8_lossy(&buf[line_start..line_start + bad]).into_owned();
            return errdata!("line without delimiter: {:?}", line);
        }

        let entry = IndexEntry {
            key: String::from_utf8_lossy(&buf[line_start..didx]).into_owned(),
            offset: block_position + line_start as u64,
            length: (bytesread - line_start) as u64,
        };

        // On the first block only, derive the entry for the second line as
        // well; a first key sorting above the second means the first line is
        // a header, and the second line's entry replaces it.
        if block_position == 0 {
            let Some(first_nl) = find_byte(&buf[..bytesread], b'\n') else {
                return errdata!("no line boundary in first block");
            };
            let probe_position = first_nl as u64;
            let probe_read = read_full_at(file, buf, probe_position)?;
            let probe = process_block(file, buf, probe_read, probe_position, delim, file_len)?;
            if let Some((second, position)) = probe {
                if entry.key > second.key {
                    return Ok(Some((second, position)));
                }
            }
        }

        return Ok(Some((entry, block_position)));
    }
}

/// Processes the dataset in blocksize chunks, adding an index entry for the
/// first complete line of each block.
pub(crate) fn generate_block_index(index: &mut Index, file: &File) -> Result<()> {
    let blocksize = index.blocksize as usize;
    let file_len = file.metadata()?.len();
    let delim = index.delim.clone();
    let mut buf = vec![0u8; blocksize];
    let mut list: Vec<IndexEntry> = Vec::new();
    let mut block_position: u64 = 0;
    let mut first_block = true;
    let mut prev: Option<IndexEntry> = None;

    loop {
        let bytesread = read_full_at(file, &mut buf, block_position)?;
        if bytesread > 0 {
            let processed = process_block(
                file,
                &mut buf,
                bytesread,
                block_position,
                delim.as_bytes(),
                file_len,
            )?;
            let Some((entry, position)) = processed else {
                break;
            };
            // Entry keys must arrive already sorted
            match &prev {
                Some(prev) if prev.key > entry.key => {
                    return errdata!("key sort violation: {:?} > {:?}", prev.key, entry.key);
                }
                Some(prev) if prev.key == entry.key && prev.offset == entry.offset => {
                    tracing::warn!(
                        key = %entry.key,
                        offset = entry.offset,
                        "duplicate index entry, skipping"
                    );
                }
                _ => list.push(entry.clone()),
            }
            // A first entry past offset zero means a header line was skipped
            if first_block && entry.offset > 0 {
                index.header = true;
            }
            prev = Some(entry);
            block_position = position + bytesread as u64;
        }
        if bytesread < blocksize {
            break;
        }
        first_block = false;
    }

    if list.is_empty() {
        return Err(Error::IndexEmpty);
    }

    // Rewrite all but the final entry length so blocks finish cleanly on
    // newlines: each block runs to the start of the next.
    for i in 0..list.len() - 1 {
        list[i].length = list[i + 1].offset - list[i].offset;
    }

    index.keys_unique = false; // a block scan cannot establish uniqueness
    index.length = list.len();
    index.list = list;

    Ok(())
}

/// Processes the dataset line by line, adding an index entry for the first
/// line of each block. Tracks key uniqueness as it goes.
pub(crate) fn generate_line_index(index: &mut Index, file: &File) -> Result<()> {
    let mut reader = BufReader::new(file);
    let delim = index.delim.as_bytes().to_vec();
    let mut list: Vec<IndexEntry> = Vec::new();
    let mut block_position: u64 = 0;
    let mut block_number: i64 = -1;
    let mut prev_key: Vec<u8> = Vec::new();
    let mut skip_header = index.header;
    index.keys_unique = true;

    let mut line = Vec::new();
    loop {
        line.clear();
        let consumed = reader.read_until(b'\n', &mut line)?;
        if consumed == 0 {
            break;
        }
        if skip_header {
            skip_header = false;
            block_position += consumed as u64;
            continue;
        }

        let content = match line.last() {
            Some(&b'\n') => &line[..line.len() - 1],
            _ => &line[..],
        };
        let key = match find_delim(content, &delim) {
            Some(didx) => &content[..didx],
            None => content,
        };
        tracing::trace!(
            block_number,
            block_position,
            key = %String::from_utf8_lossy(key),
            "line scan"
        );

        match prev_key.as_slice().cmp(key) {
            Ordering::Greater => {
                // A second record sorting below the first usually means the
                // first line was an undeclared header: restart with it skipped
                if block_number == 0 && !index.header {
                    index.header = true;
                    list.clear();
                    block_number = -1;
                } else {
                    return errdata!(
                        "key sort violation: {:?} > {:?}",
                        String::from_utf8_lossy(&prev_key),
                        String::from_utf8_lossy(key)
                    );
                }
            }
            Ordering::Equal => index.keys_unique = false,
            Ordering::Less => {}
        }

        // Record the first line of each block
        let current_block_number = (block_position / index.blocksize) as i64;
        if current_block_number > block_number {
            if let Some(last) = list.last_mut() {
                last.length = block_position - last.offset;
            }
            list.push(IndexEntry {
                key: String::from_utf8_lossy(key).into_owned(),
                offset: block_position,
                length: 0, // finalized when the next block starts
            });
            block_number = current_block_number;
        }

        block_position += consumed as u64;
        prev_key.clear();
        prev_key.extend_from_slice(key);
    }

    if list.is_empty() {
        return Err(Error::IndexEmpty);
    }
    if let Some(last) = list.last_mut() {
        last.length = block_position - last.offset;
    }

    if index.keys_unique {
        index.keys_index_first = true;
    }
    index.length = list.len();
    index.list = list;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::path::PathBuf;

    use tempfile::TempDir;

    use super::*;
    use crate::index::{IndexOptions, ScanMode};

    fn write_dataset(dir: &TempDir, name: &str, contents: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        let mut fh = std::fs::File::create(&path).unwrap();
        fh.write_all(contents).unwrap();
        path
    }

    /// Sorted dataset of `count` lines "key%05d,value%d\n".
    fn numbered_lines(count: usize) -> Vec<u8> {
        let mut out = Vec::new();
        for i in 0..count {
            out.extend_from_slice(format!("key{i:05},value{i}\n").as_bytes());
        }
        out
    }

    #[test]
    fn derive_delimiter_from_suffix() {
        assert_eq!(derive_delimiter(Path::new("a/b/data.csv")).unwrap(), ",");
        assert_eq!(derive_delimiter(Path::new("data.tsv")).unwrap(), "\t");
        assert_eq!(derive_delimiter(Path::new("data.psv")).unwrap(), "|");
        assert_eq!(derive_delimiter(Path::new("data.csv.zst")).unwrap(), ",");
        assert_eq!(derive_delimiter(Path::new("data.tsv.zst")).unwrap(), "\t");
        assert_eq!(
            derive_delimiter(Path::new("data.txt")).unwrap_err(),
            Error::UnknownDelimiter
        );
    }

    #[test]
    fn block_scan_tiles_the_file() {
        let dir = TempDir::new().unwrap();
        let data = numbered_lines(200);
        let path = write_dataset(&dir, "tile.csv", &data);

        let index = Index::with_options(
            &path,
            IndexOptions {
                blocksize: Some(64),
                ..IndexOptions::default()
            },
        )
        .unwrap();

        assert!(index.len() > 1);
        assert!(!index.header);
        assert!(!index.keys_unique);
        assert_eq!(index.length, index.list.len());
        assert_eq!(index.list[0].offset, 0);
        assert_eq!(index.list[0].key, "key00000");

        // Entries tile the data region: each block ends where the next starts
        for pair in index.list.windows(2) {
            assert_eq!(pair[0].offset + pair[0].length, pair[1].offset);
            assert!(pair[0].key < pair[1].key);
            assert!(pair[0].length > 0);
        }
        let last = index.list.last().unwrap();
        assert_eq!(last.offset + last.length, data.len() as u64);

        // Every entry points at a line start whose key matches
        for entry in &index.list {
            let at = entry.offset as usize;
            assert!(at == 0 || data[at - 1] == b'\n');
            assert!(data[at..].starts_with(entry.key.as_bytes()));
        }
    }

    #[test]
    fn block_scan_flips_header_for_high_sorting_first_line() {
        let dir = TempDir::new().unwrap();
        let mut data = b"name,count\n".to_vec();
        data.extend_from_slice(&numbered_lines(20));
        let path = write_dataset(&dir, "hdr.csv", &data);

        let index = Index::new(&path).unwrap();
        assert!(index.header);
        assert_eq!(index.list[0].key, "key00000");
        assert_eq!(index.list[0].offset, 11); // just past "name,count\n"
    }

    #[test]
    fn block_scan_key_longer_than_block_fails() {
        let dir = TempDir::new().unwrap();
        let mut data = Vec::new();
        data.extend_from_slice(&[b'a'; 100]);
        data.extend_from_slice(b",1\n");
        let path = write_dataset(&dir, "longkey.csv", &data);

        let err = Index::with_options(
            &path,
            IndexOptions {
                blocksize: Some(32),
                ..IndexOptions::default()
            },
        )
        .unwrap_err();
        assert_eq!(err, Error::KeyExceedsBlocksize);
    }

    #[test]
    fn block_scan_key_longer_than_block_fails_past_file_start() {
        let dir = TempDir::new().unwrap();
        let mut data = b"aaa,1\n".to_vec();
        data.extend_from_slice(&[b'b'; 60]);
        data.extend_from_slice(b",2\n");
        let path = write_dataset(&dir, "longkey2.csv", &data);

        let err = Index::with_options(
            &path,
            IndexOptions {
                blocksize: Some(32),
                ..IndexOptions::default()
            },
        )
        .unwrap_err();
        assert_eq!(err, Error::KeyExceedsBlocksize);
    }

    #[test]
    fn block_scan_detects_sort_violation() {
        let dir = TempDir::new().unwrap();
        let path = write_dataset(&dir, "unsorted.csv", b"aaa,1\nbbb,2\nzzz,3\nccc,4\n");

        let err = Index::with_options(
            &path,
            IndexOptions {
                blocksize: Some(6),
                ..IndexOptions::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidData(msg) if msg.contains("sort violation")));
    }

    #[test]
    fn block_scan_single_line_file() {
        let dir = TempDir::new().unwrap();
        let path = write_dataset(&dir, "single.csv", b"only,1\n");

        let index = Index::new(&path).unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.list[0].key, "only");
        assert_eq!(index.list[0].offset, 0);
        assert_eq!(index.list[0].length, 7);
        assert!(!index.header);
    }

    #[test]
    fn block_scan_empty_file() {
        let dir = TempDir::new().unwrap();
        let path = write_dataset(&dir, "empty.csv", b"");
        assert_eq!(Index::new(&path).unwrap_err(), Error::IndexEmpty);
    }

    #[test]
    fn line_scan_records_block_starts() {
        let dir = TempDir::new().unwrap();
        // 10-byte lines at offsets 0, 10, 20, ...
        let mut data = Vec::new();
        for i in 0..12 {
            data.extend_from_slice(format!("k{i:04},{i:03}\n").as_bytes());
        }
        let path = write_dataset(&dir, "lines.csv", &data);

        let index = Index::with_options(
            &path,
            IndexOptions {
                blocksize: Some(32),
                scan_mode: ScanMode::Line,
                ..IndexOptions::default()
            },
        )
        .unwrap();

        // First line starting in each 32-byte window: offsets 0, 40, 70, 100
        let spans: Vec<_> = index.list.iter().map(|e| (e.offset, e.length)).collect();
        assert_eq!(spans, vec![(0, 40), (40, 30), (70, 30), (100, 20)]);
        assert_eq!(index.list[0].key, "k0000");
        assert_eq!(index.list[1].key, "k0004");
        let last = index.list.last().unwrap();
        assert_eq!(last.offset + last.length, data.len() as u64);

        assert!(index.keys_unique);
        assert!(index.keys_index_first);
    }

    #[test]
    fn line_scan_duplicate_keys_clear_uniqueness() {
        let dir = TempDir::new().unwrap();
        let path = write_dataset(&dir, "dup.csv", b"aaa,1\naaa,2\nbbb,3\n");

        let index = Index::with_options(
            &path,
            IndexOptions {
                scan_mode: ScanMode::Line,
                ..IndexOptions::default()
            },
        )
        .unwrap();
        assert!(!index.keys_unique);
        assert!(!index.keys_index_first);
    }

    #[test]
    fn line_scan_flips_header_on_out_of_order_second_record() {
        let dir = TempDir::new().unwrap();
        let path = write_dataset(&dir, "hdr2.csv", b"name,count\naaa,1\nbbb,2\n");

        let index = Index::with_options(
            &path,
            IndexOptions {
                scan_mode: ScanMode::Line,
                ..IndexOptions::default()
            },
        )
        .unwrap();
        assert!(index.header);
        assert_eq!(index.list[0].key, "aaa");
        assert_eq!(index.list[0].offset, 11);
    }

    #[test]
    fn line_scan_skips_declared_header() {
        let dir = TempDir::new().unwrap();
        // header sorts below the data, so only the option can skip it
        let path = write_dataset(&dir, "hdr3.csv", b"AAA,count\nbbb,1\nccc,2\n");

        let index = Index::with_options(
            &path,
            IndexOptions {
                header: true,
                scan_mode: ScanMode::Line,
                ..IndexOptions::default()
            },
        )
        .unwrap();
        assert!(index.header);
        assert_eq!(index.list[0].key, "bbb");
        assert_eq!(index.list[0].offset, 10);
    }

    #[test]
    fn line_scan_detects_sort_violation() {
        let dir = TempDir::new().unwrap();
        let path = write_dataset(&dir, "unsorted2.csv", b"ccc,1\nbbb,2\naaa,3\n");

        let err = Index::with_options(
            &path,
            IndexOptions {
                scan_mode: ScanMode::Line,
                ..IndexOptions::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidData(msg) if msg.contains("sort violation")));
    }

    #[test]
    fn line_scan_empty_file() {
        let dir = TempDir::new().unwrap();
        let path = write_dataset(&dir, "empty2.csv", b"");
        let err = Index::with_options(
            &path,
            IndexOptions {
                scan_mode: ScanMode::Line,
                ..IndexOptions::default()
            },
        )
        .unwrap_err();
        assert_eq!(err, Error::IndexEmpty);
    }

    #[test]
    fn line_scan_entries_point_at_matching_lines() {
        let dir = TempDir::new().unwrap();
        let data = numbered_lines(300);
        let path = write_dataset(&dir, "entries.csv", &data);

        let index = Index::with_options(
            &path,
            IndexOptions {
                blocksize: Some(128),
                scan_mode: ScanMode::Line,
                ..IndexOptions::default()
            },
        )
        .unwrap();

        assert!(index.len() > 1);
        for pair in index.list.windows(2) {
            assert_eq!(pair[0].offset + pair[0].length, pair[1].offset);
        }
        for entry in &index.list {
            let at = entry.offset as usize;
            assert!(at == 0 || data[at - 1] == b'\n');
            assert!(data[at..].starts_with(entry.key.as_bytes()));
        }
    }
}
