//! "Latest wins" merging of npm package documents.
//!
//! Descriptive scalars belong to whichever contributing version is the
//! semantic-version maximum. Lists and maps accumulate regardless of order.

use std::cmp::Ordering;

use serde_json::Value;
use tracing::debug;

use crate::npm::document::{compare_semver, PackageDocument};

/// Merge `incoming` into `original`.
pub fn merge(original: Option<PackageDocument>, incoming: PackageDocument) -> PackageDocument {
    let Some(mut merged) = original else {
        return incoming;
    };

    let is_latest = incoming.own_version().is_some_and(|version| {
        merged
            .versions
            .keys()
            .all(|existing| compare_semver(version, existing) == Ordering::Greater)
    });
    debug!(
        package = %merged.name,
        version = incoming.own_version().unwrap_or("-"),
        is_latest,
        "[NPM] Merging package document"
    );

    let PackageDocument {
        name: _,
        dist_tags,
        versions,
        maintainers,
        keywords,
        users,
        time,
        description,
        author,
        license,
        homepage,
        bugs,
        repository,
        readme,
        readme_filename,
        extra,
    } = incoming;

    if is_latest {
        merged.description = description;
        merged.author = author;
        merged.license = license;
        merged.homepage = homepage;
        merged.bugs = bugs;
        merged.readme = readme;
        merged.readme_filename = readme_filename;
        if repository.as_ref().is_some_and(|r| !is_empty_value(r)) {
            merged.repository = repository;
        }
        merged.extra.extend(extra);
    }

    append_unique(&mut merged.maintainers, maintainers);
    append_unique(&mut merged.keywords, keywords);
    merged.users.extend(users);
    merged.time.extend(time);

    for (tag, version) in dist_tags {
        let adopt = merged
            .dist_tags
            .get(&tag)
            .map_or(true, |current| compare_semver(&version, current) == Ordering::Greater);
        if adopt {
            merged.dist_tags.insert(tag, version);
        }
    }
    merged.versions.extend(versions);
    merged
}

/// Rebuild a package document from individual version documents, oldest
/// first. `None` when there is nothing left to rebuild from.
pub fn rebuild(mut siblings: Vec<PackageDocument>) -> Option<PackageDocument> {
    siblings.sort_by(|a, b| match (a.own_version(), b.own_version()) {
        (Some(a), Some(b)) => compare_semver(a, b),
        (a, b) => a.cmp(&b),
    });
    siblings
        .into_iter()
        .fold(None, |acc, sibling| Some(merge(acc, sibling)))
}

fn append_unique<T: PartialEq>(into: &mut Vec<T>, from: Vec<T>) {
    for item in from {
        if !into.contains(&item) {
            into.push(item);
        }
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}
