//! Prefix comparators for byte-sorted line data.
//!
//! Both comparators compare `a` against `b` up to `len(b)` only, so a zero
//! result means "`a` starts with `b`". When `a` is shorter than `b` and
//! matches as far as it goes, the result is Less (short-is-less), which keeps
//! a truncated line at the end of a block from reading as a match.

use std::cmp::Ordering;

/// Comparison function used for in-block line scans. Replaceable via
/// `Options::compare`; implementations must follow the prefix contract above.
pub type Compare = fn(&[u8], &[u8]) -> Ordering;

/// Compares the initial sequence of `a` against `b` (up to `len(b)` only).
/// Used as the default compare function by the searcher.
pub fn prefix_compare(a: &[u8], b: &[u8]) -> Ordering {
    // If len(a) < len(b) we compare up to len(a), but disallow equality
    if a.len() < b.len() {
        match a.cmp(&b[..a.len()]) {
            // An equal match here is short, so actually a less than
            Ordering::Equal => Ordering::Less,
            cmp => cmp,
        }
    } else {
        a[..b.len()].cmp(b)
    }
}

/// String variant of [`prefix_compare`] with identical semantics, for
/// comparing index keys (which are held as decoded strings).
pub fn prefix_compare_str(a: &str, b: &str) -> Ordering {
    prefix_compare(a.as_bytes(), b.as_bytes())
}
