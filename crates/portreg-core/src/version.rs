//! RPM-style version comparison.
//!
//! Versions are split into maximal runs of ASCII letters or ASCII digits;
//! everything else (including non-ASCII bytes) separates runs and is never
//! compared. Runs are compared pairwise:
//!
//! - a numeric run beats an alphabetic run,
//! - numeric runs compare by magnitude (leading zeros ignored),
//! - alphabetic runs compare byte-wise, a longer run winning a tie on the
//!   common prefix.
//!
//! When one version runs out of runs first, the one with characters left over
//! is greater, so `1.0 < 1.0.0` and `1.0 < 1.0a`.
//!
//! The same function backs the `VERSION` SQLite collation, so it must stay a
//! total order: `compare_versions(a, b)` is always the reverse of
//! `compare_versions(b, a)`.

use std::cmp::Ordering;

/// Compare two version (or revision) strings.
///
/// ```
/// use std::cmp::Ordering;
/// use portreg::compare_versions;
///
/// assert_eq!(compare_versions("1.2.3", "1.2.10"), Ordering::Less);
/// assert_eq!(compare_versions("7.1.002", "7.1.2"), Ordering::Equal);
/// ```
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    compare_bytes(a.as_bytes(), b.as_bytes())
}

fn compare_bytes(a: &[u8], b: &[u8]) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }

    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        i = skip_separators(a, i);
        j = skip_separators(b, j);
        if i == a.len() || j == b.len() {
            break;
        }

        let a_digit = a[i].is_ascii_digit();
        let b_digit = b[j].is_ascii_digit();
        match (a_digit, b_digit) {
            (true, false) => return Ordering::Greater,
            (false, true) => return Ordering::Less,
            _ => {}
        }

        let is_class: fn(&u8) -> bool = if a_digit {
            u8::is_ascii_digit
        } else {
            u8::is_ascii_alphabetic
        };
        let end_a = run_end(a, i, is_class);
        let end_b = run_end(b, j, is_class);

        let ordering = if a_digit {
            compare_numeric(&a[i..end_a], &b[j..end_b])
        } else {
            a[i..end_a].cmp(&b[j..end_b])
        };
        if ordering != Ordering::Equal {
            return ordering;
        }

        i = end_a;
        j = end_b;
    }

    match (i < a.len(), j < b.len()) {
        (false, false) => Ordering::Equal,
        (true, _) => Ordering::Greater,
        (false, true) => Ordering::Less,
    }
}

fn skip_separators(s: &[u8], mut pos: usize) -> usize {
    while pos < s.len() && !s[pos].is_ascii_alphanumeric() {
        pos += 1;
    }
    pos
}

fn run_end(s: &[u8], mut pos: usize, is_class: fn(&u8) -> bool) -> usize {
    while pos < s.len() && is_class(&s[pos]) {
        pos += 1;
    }
    pos
}

/// Longer digit runs win once leading zeros are gone; equal lengths compare
/// byte-wise, which for ASCII digits is numeric order.
fn compare_numeric(a: &[u8], b: &[u8]) -> Ordering {
    let a = trim_leading_zeros(a);
    let b = trim_leading_zeros(b);
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

fn trim_leading_zeros(s: &[u8]) -> &[u8] {
    let start = s.iter().position(|&c| c != b'0').unwrap_or(s.len());
    &s[start..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use Ordering::{Equal, Greater, Less};

    #[test]
    fn test_identical_strings_equal() {
        assert_eq!(compare_versions("", ""), Equal);
        assert_eq!(compare_versions("1.2.3", "1.2.3"), Equal);
        assert_eq!(compare_versions("abc", "abc"), Equal);
    }

    #[test]
    fn test_numeric_length_rule() {
        assert_eq!(compare_versions("1.2.3", "1.2.10"), Less);
        assert_eq!(compare_versions("7", "10"), Less);
        assert_eq!(compare_versions("100", "99"), Greater);
    }

    #[test]
    fn test_leading_zeros_ignored() {
        assert_eq!(compare_versions("7.1.000", "7.1.002"), Less);
        assert_eq!(compare_versions("7.1.002", "7.1.2"), Equal);
        assert_eq!(compare_versions("1.010", "1.9"), Greater);
        assert_eq!(compare_versions("000", "0"), Equal);
    }

    #[test]
    fn test_trailing_segment_makes_version_greater() {
        assert_eq!(compare_versions("1.0", "1.0.0"), Less);
        assert_eq!(compare_versions("1.0.0", "1.0"), Greater);
        assert_eq!(compare_versions("1.0", "1.0a"), Less);
    }

    #[test]
    fn test_separators_only_differ() {
        assert_eq!(compare_versions("1.0", "1_0"), Equal);
        assert_eq!(compare_versions("1-2-3", "1.2.3"), Equal);
        assert_eq!(compare_versions("1.", "1-"), Equal);
    }

    #[test]
    fn test_trailing_separator_leftover() {
        assert_eq!(compare_versions("1.", "1"), Greater);
        assert_eq!(compare_versions("1", "1."), Less);
    }

    #[test]
    fn test_digit_beats_letter() {
        assert_eq!(compare_versions("1.1", "1.a"), Greater);
        assert_eq!(compare_versions("1.a", "1.1"), Less);
        assert_eq!(compare_versions("2.0b", "2.0.1"), Less);
    }

    #[test]
    fn test_alphabetic_segments() {
        assert_eq!(compare_versions("1.0a", "1.0b"), Less);
        assert_eq!(compare_versions("beta", "alpha"), Greater);
        assert_eq!(compare_versions("1.ab", "1.abc"), Less);
        assert_eq!(compare_versions("B", "a"), Less);
    }

    #[test]
    fn test_empty_segment_after_separators_is_exhausted() {
        assert_eq!(compare_versions("1.a", "1."), Greater);
        assert_eq!(compare_versions("1.", "1.a"), Less);
        assert_eq!(compare_versions("", "."), Less);
    }

    #[test]
    fn test_non_ascii_bytes_are_separators() {
        assert_eq!(compare_versions("1é2", "1.2"), Equal);
    }

    #[test]
    fn test_antisymmetric_and_reflexive() {
        let samples = [
            "", ".", "0", "00", "1", "1.", "1.0", "1.0.0", "1_0", "1.0a", "1.0b", "1.a",
            "1.1", "1.10", "1.2.3", "1.2.10", "7.1.000", "7.1.002", "2.0b", "2.0.1",
            "alpha", "beta", "abc", "ab", "r1234", "1.2rc1", "1.2rc10", "é",
        ];
        for a in samples {
            assert_eq!(compare_versions(a, a), Equal, "{a:?} vs itself");
            for b in samples {
                assert_eq!(
                    compare_versions(a, b),
                    compare_versions(b, a).reverse(),
                    "{a:?} vs {b:?}"
                );
            }
        }
    }

    #[test]
    fn test_sorting_is_consistent() {
        let mut versions = vec!["1.10", "1.2", "1.0.0", "1.0", "1.1a", "1.1"];
        versions.sort_by(|a, b| compare_versions(a, b));
        assert_eq!(versions, vec!["1.0", "1.0.0", "1.1", "1.1a", "1.2", "1.10"]);
    }
}
