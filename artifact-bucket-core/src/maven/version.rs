//! Numeric-segment-aware version ordering.
//!
//! Versions split into segments on `.` and `-`. All-digit segments compare as
//! integers of any length; a digit segment sorts below a non-digit segment at
//! the same position; non-digit segments compare lexically. When every shared
//! segment is equal the version with fewer segments is lower, and two versions
//! with the same number of segments fall back to plain string order.

use std::cmp::Ordering;

fn segments(version: &str) -> impl Iterator<Item = &str> {
    version.split(['.', '-'])
}

fn is_numeric(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit())
}

/// Compare two digit strings as unbounded integers.
fn compare_numeric(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

fn compare_segment(a: &str, b: &str) -> Ordering {
    match (is_numeric(a), is_numeric(b)) {
        (true, true) => compare_numeric(a, b),
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => a.cmp(b),
    }
}

/// Total order over Maven version strings.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let mut left = segments(a);
    let mut right = segments(b);
    loop {
        match (left.next(), right.next()) {
            (Some(x), Some(y)) => match compare_segment(x, y) {
                Ordering::Equal => continue,
                other => return other,
            },
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (None, None) => return a.cmp(b),
        }
    }
}

/// Sort ascending and drop duplicates.
pub fn sort_versions(versions: &mut Vec<String>) {
    versions.sort_by(|a, b| compare_versions(a, b));
    versions.dedup();
}

/// Greatest version under [`compare_versions`].
pub fn max_version<'a, I>(versions: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    versions.into_iter().max_by(|a, b| compare_versions(a, b))
}
