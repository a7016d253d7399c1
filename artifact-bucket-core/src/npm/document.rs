//! The package-level `package.json` document served to npm clients.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::DocumentError;
use crate::maven::compare_versions;

/// Aggregate document for one npm package name.
///
/// Only the fields the merge rules touch are typed; anything else a registry
/// put there is carried through `extra` untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PackageDocument {
    pub name: String,
    #[serde(rename = "dist-tags", default)]
    pub dist_tags: BTreeMap<String, String>,
    #[serde(default)]
    pub versions: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub maintainers: Vec<Value>,
    #[serde(default, deserialize_with = "string_or_list", skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub users: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub time: BTreeMap<String, Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bugs: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readme: Option<String>,
    #[serde(rename = "readmeFilename", default, skip_serializing_if = "Option::is_none")]
    pub readme_filename: Option<String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl PackageDocument {
    pub fn from_slice(key: &str, bytes: &[u8]) -> Result<Self, DocumentError> {
        let document: Self = serde_json::from_slice(bytes).map_err(|e| DocumentError::json(key, e))?;
        if document.name.is_empty() {
            return Err(DocumentError::MissingField {
                key: key.to_string(),
                field: "name",
            });
        }
        Ok(document)
    }

    pub fn to_json(&self) -> Result<Vec<u8>, DocumentError> {
        let mut bytes = serde_json::to_vec_pretty(self).map_err(|e| DocumentError::json(&self.name, e))?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    /// Project a single version's `package.json` into a package document
    /// holding just that version.
    pub fn from_version(key: &str, version_document: &Value) -> Result<Self, DocumentError> {
        let name = string_field(key, version_document, "name")?;
        let version = string_field(key, version_document, "version")?;
        let field = |name: &str| version_document.get(name).filter(|v| !v.is_null()).cloned();
        let text = |name: &str| version_document.get(name).and_then(Value::as_str).map(str::to_string);

        let mut maintainers: Vec<Value> = version_document
            .get("maintainers")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        if maintainers.is_empty() {
            maintainers.extend(field("author"));
        }
        let keywords = match version_document.get("keywords") {
            Some(Value::Array(words)) => words.iter().filter_map(Value::as_str).map(str::to_string).collect(),
            Some(Value::String(word)) => vec![word.clone()],
            _ => Vec::new(),
        };

        Ok(Self {
            dist_tags: BTreeMap::from([("latest".to_string(), version.clone())]),
            versions: BTreeMap::from([(version, version_document.clone())]),
            maintainers,
            keywords,
            description: text("description"),
            author: field("author"),
            license: field("license"),
            homepage: text("homepage"),
            bugs: field("bugs"),
            repository: field("repository"),
            readme: text("readme"),
            readme_filename: text("readmeFilename"),
            name,
            ..Self::default()
        })
    }

    /// Highest version held by this document.
    pub fn own_version(&self) -> Option<&str> {
        self.versions
            .keys()
            .max_by(|a, b| compare_semver(a, b))
            .map(String::as_str)
    }
}

/// Semantic-version ordering, falling back to the Maven segment comparator
/// when either side is not valid semver.
pub fn compare_semver(a: &str, b: &str) -> Ordering {
    let parse = |v: &str| semver::Version::parse(v.trim().trim_start_matches(['v', '=']));
    match (parse(a), parse(b)) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        _ => compare_versions(a, b),
    }
}

fn string_field(key: &str, document: &Value, field: &'static str) -> Result<String, DocumentError> {
    document
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| DocumentError::MissingField {
            key: key.to_string(),
            field,
        })
}

fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Keywords {
        One(String),
        Many(Vec<Value>),
        Nothing(()),
    }

    Ok(match Keywords::deserialize(deserializer)? {
        Keywords::One(word) => vec![word],
        Keywords::Many(words) => words.iter().filter_map(Value::as_str).map(str::to_string).collect(),
        Keywords::Nothing(_) => Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn semver_prerelease_sorts_before_release() {
        assert_eq!(compare_semver("1.0.0-rc.1", "1.0.0"), Ordering::Less);
        assert_eq!(compare_semver("7.15.8", "7.14.5"), Ordering::Greater);
        assert_eq!(compare_semver("1.10.0", "1.9.0"), Ordering::Greater);
    }

    #[test]
    fn version_document_projects_into_package_document() {
        let version = json!({
            "name": "@scope/widget",
            "version": "1.2.3",
            "description": "A widget",
            "keywords": "widget",
            "author": {"name": "Alice"},
            "dist": {"tarball": "https://registry.example.com/@scope/widget/-/widget-1.2.3.tgz"}
        });
        let document = PackageDocument::from_version("@scope/widget/1.2.3/package.json", &version).unwrap();
        assert_eq!(document.name, "@scope/widget");
        assert_eq!(document.dist_tags.get("latest").map(String::as_str), Some("1.2.3"));
        assert_eq!(document.own_version(), Some("1.2.3"));
        assert_eq!(document.keywords, vec!["widget".to_string()]);
        assert_eq!(document.maintainers, vec![json!({"name": "Alice"})]);
    }

    #[test]
    fn version_document_without_version_is_rejected() {
        let err = PackageDocument::from_version("k", &json!({"name": "x"})).unwrap_err();
        assert!(matches!(err, DocumentError::MissingField { field: "version", .. }));
    }

    #[test]
    fn unknown_fields_survive_a_round_trip() {
        let raw = br#"{"name":"x","dist-tags":{"latest":"1.0.0"},"versions":{},"_id":"x","keywords":null}"#;
        let document = PackageDocument::from_slice("x/package.json", raw).unwrap();
        assert_eq!(document.extra.get("_id"), Some(&json!("x")));
        assert!(document.keywords.is_empty());
        let again = PackageDocument::from_slice("x/package.json", &document.to_json().unwrap()).unwrap();
        assert_eq!(again, document);
    }
}
