//! In-block line scanning.
//!
//! Both primitives walk a loaded block buffer line by line, comparing each
//! line's leading bytes against a search key with the configured prefix
//! comparator. The `terminate` flag they return distinguishes "the match run
//! is fully consumed" from "ran off the end of the buffer": the latter tells
//! the caller to load the next block and continue (spill).

use std::cmp::Ordering;

use crate::compare::Compare;

/// Scanner configuration, borrowed from the searcher per call.
#[derive(Clone, Copy)]
pub(crate) struct LineScanner {
    pub compare: Compare,
    /// Require a word/non-word transition just past the matched prefix.
    pub boundary: bool,
    /// `scan_line_offset` falls back to the last line below the key.
    pub match_le: bool,
}

fn find_nl(buf: &[u8]) -> Option<usize> {
    buf.iter().position(|&b| b == b'\n')
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

impl LineScanner {
    /// Returns the offset of the first line within `buf` that begins with
    /// `key`, or None. With match-LE semantics, a miss instead returns the
    /// offset of the last line that sorts below `key`, when one was seen.
    /// The second value is the terminate flag: true once a line sorting
    /// above `key` is reached.
    pub fn scan_line_offset(&self, buf: &[u8], key: &[u8]) -> (Option<usize>, bool) {
        let mut trailing = None;
        let mut offset = 0;
        let mut terminate = false;

        // Scan lines until we find one >= key
        while offset < buf.len() {
            let end = (offset + key.len()).min(buf.len());
            match (self.compare)(&buf[offset..end], key) {
                Ordering::Equal => return (Some(offset), false),
                Ordering::Greater => {
                    terminate = true;
                    break;
                }
                Ordering::Less => match find_nl(&buf[offset..]) {
                    None => break,
                    Some(nl) => {
                        trailing = Some(offset);
                        offset += nl + 1;
                    }
                },
            }
        }

        if self.match_le && trailing.is_some() {
            return (trailing, terminate);
        }
        (None, terminate)
    }

    /// Returns up to `n` copies of consecutive lines in `buf` beginning with
    /// `key` (`n == 0` means unlimited), plus the terminate flag.
    pub fn scan_lines_matching(&self, buf: &[u8], key: &[u8], n: usize) -> (Vec<Vec<u8>>, bool) {
        let (offset, mut terminate) = self.scan_line_offset(buf, key);
        let Some(mut offset) = offset else {
            return (Vec::new(), terminate);
        };
        if terminate {
            return (Vec::new(), terminate);
        }
        tracing::debug!(
            search = %String::from_utf8_lossy(key),
            offset,
            "first matching line"
        );

        let mut lines: Vec<Vec<u8>> = Vec::new();
        while offset < buf.len() {
            if n > 0 && lines.len() >= n {
                lines.truncate(n);
                return (lines, true);
            }

            let end = (offset + key.len()).min(buf.len());
            let cmp = (self.compare)(&buf[offset..end], key);
            let nl = find_nl(&buf[offset..]);
            match cmp {
                Ordering::Less => match nl {
                    None => break,
                    Some(nl) => offset += nl + 1,
                },
                Ordering::Equal => {
                    let line_end = nl.map_or(buf.len(), |nl| offset + nl);
                    if self.boundary && !boundary_ok(&buf[offset..line_end], key) {
                        match nl {
                            None => break,
                            Some(nl) => offset += nl + 1,
                        }
                        continue;
                    }
                    match nl {
                        None => {
                            // final line without a trailing newline
                            lines.push(buf[offset..].to_vec());
                            break;
                        }
                        Some(nl) => {
                            lines.push(buf[offset..offset + nl].to_vec());
                            offset += nl + 1;
                        }
                    }
                }
                Ordering::Greater => {
                    terminate = true;
                    break;
                }
            }
        }
        (lines, terminate)
    }
}

/// True if the line has a word boundary right after the matched prefix: the
/// last prefix byte and the byte past it must not be both word characters or
/// both non-word characters. Byte-wise only, so multi-byte scripts spanning
/// the boundary are not handled.
fn boundary_ok(line: &[u8], key: &[u8]) -> bool {
    if key.is_empty() || line.len() <= key.len() {
        return true;
    }
    is_word_byte(line[key.len() - 1]) != is_word_byte(line[key.len()])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compare::prefix_compare;

    fn scanner() -> LineScanner {
        LineScanner {
            compare: prefix_compare,
            boundary: false,
            match_le: false,
        }
    }

    const BUF: &[u8] = b"aaa,1\nbbb,2\nccc,3\nccc,4\nddd,5\n";

    #[test]
    fn offset_of_first_match() {
        assert_eq!(scanner().scan_line_offset(BUF, b"aaa,"), (Some(0), false));
        assert_eq!(scanner().scan_line_offset(BUF, b"ccc,"), (Some(12), false));
    }

    #[test]
    fn offset_miss_terminates_past_key() {
        // "bbc" sorts between bbb and ccc: termination without a match
        assert_eq!(scanner().scan_line_offset(BUF, b"bbc,"), (None, true));
        // past every line: no termination, caller may spill
        assert_eq!(scanner().scan_line_offset(BUF, b"zzz,"), (None, false));
    }

    #[test]
    fn offset_match_le_returns_trailing_line() {
        let s = LineScanner {
            match_le: true,
            ..scanner()
        };
        // last line below "bbc," is "bbb,2" at offset 6
        assert_eq!(s.scan_line_offset(BUF, b"bbc,"), (Some(6), true));
        assert_eq!(s.scan_line_offset(BUF, b"zzz,"), (Some(24), false));
        // nothing below the key at all
        assert_eq!(s.scan_line_offset(BUF, b"a"), (Some(0), false));
        assert_eq!(s.scan_line_offset(BUF, b"0"), (None, true));
    }

    #[test]
    fn collects_matching_run() {
        let (lines, terminate) = scanner().scan_lines_matching(BUF, b"ccc,", 0);
        assert_eq!(lines, vec![b"ccc,3".to_vec(), b"ccc,4".to_vec()]);
        assert!(terminate);
    }

    #[test]
    fn caps_at_n() {
        let (lines, terminate) = scanner().scan_lines_matching(BUF, b"ccc,", 1);
        assert_eq!(lines, vec![b"ccc,3".to_vec()]);
        assert!(terminate);
    }

    #[test]
    fn no_match_is_empty() {
        let (lines, terminate) = scanner().scan_lines_matching(BUF, b"bbc,", 0);
        assert!(lines.is_empty());
        assert!(terminate);
    }

    #[test]
    fn run_to_buffer_end_requests_spill() {
        let buf = b"aaa,1\nccc,2\nccc,3\n";
        let (lines, terminate) = scanner().scan_lines_matching(buf, b"ccc,", 0);
        assert_eq!(lines.len(), 2);
        // the run may continue in the next block
        assert!(!terminate);
    }

    #[test]
    fn final_line_without_newline() {
        let buf = b"aaa,1\nccc,2\nccc,3";
        let (lines, terminate) = scanner().scan_lines_matching(buf, b"ccc,", 0);
        assert_eq!(lines, vec![b"ccc,2".to_vec(), b"ccc,3".to_vec()]);
        assert!(!terminate);
    }

    #[test]
    fn boundary_requires_word_transition() {
        let s = LineScanner {
            boundary: true,
            ..scanner()
        };
        let buf = b"alstom.co.th,RED\nalstom.com,SOA\n";

        // "alstom.co" continues with "." then "t": word boundary after "o"
        let (lines, _) = s.scan_lines_matching(buf, b"alstom.co", 0);
        assert_eq!(lines, vec![b"alstom.co.th,RED".to_vec()]);

        // "alstom.c" continues with "o": both word characters, no boundary
        let (lines, _) = s.scan_lines_matching(buf, b"alstom.c", 0);
        assert!(lines.is_empty());
    }

    #[test]
    fn repeated_scans_are_idempotent() {
        let s = scanner();
        let first = s.scan_lines_matching(BUF, b"ccc,", 0);
        let second = s.scan_lines_matching(BUF, b"ccc,", 0);
        assert_eq!(first, second);
    }
}
