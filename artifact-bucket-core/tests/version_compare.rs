use std::cmp::Ordering;

use artifact_bucket_core::maven::version::{compare_versions, max_version, sort_versions};

#[test]
fn numeric_segments_compare_as_integers() {
    assert_eq!(compare_versions("1.9.0", "1.10.0"), Ordering::Less);
    assert_eq!(compare_versions("2.0", "10.0"), Ordering::Less);
    assert_eq!(
        compare_versions("1.0.99999999999999999999", "1.0.100000000000000000000"),
        Ordering::Less
    );
}

#[test]
fn plain_numeric_version_sorts_before_qualified_one() {
    assert_eq!(compare_versions("1.0.1", "1.0.1-alpha"), Ordering::Less);
    assert_eq!(compare_versions("1.0-SNAPSHOT", "1.0"), Ordering::Greater);
}

#[test]
fn numeric_segment_sorts_below_text_segment() {
    assert_eq!(compare_versions("1.0.1", "1.0.beta"), Ordering::Less);
    assert_eq!(compare_versions("1.0-alpha", "1.0-beta"), Ordering::Less);
}

#[test]
fn equal_versions_compare_equal() {
    assert_eq!(compare_versions("3.2.1", "3.2.1"), Ordering::Equal);
}

#[test]
fn sort_and_max_follow_the_comparator() {
    let mut versions: Vec<String> = ["1.10.0", "1.2.0", "1.9.9", "1.2.0", "1.0.0", "2.0.0"]
        .iter()
        .map(|v| v.to_string())
        .collect();
    sort_versions(&mut versions);
    assert_eq!(versions, vec!["1.0.0", "1.2.0", "1.9.9", "1.10.0", "2.0.0"]);
    assert_eq!(max_version(versions.iter().map(String::as_str)), Some("2.0.0"));
    assert_eq!(max_version(std::iter::empty()), None);
}
