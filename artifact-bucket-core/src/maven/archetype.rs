//! # archetype: merging the per-target archetype catalog
//!
//! One `archetype-catalog.xml` sits at the root of each target and lists
//! archetypes by (group, artifact, version). Releases that ship a catalog
//! merge it into the stored one on upload and subtract it again on delete.
//!
//! Entries carry no owner. Unmerging assumes the catalog entries of different
//! releases never overlap; an overlap found while merging is only warned
//! about, because rolling back either release will then remove the shared
//! entry.

use std::collections::HashSet;

use tracing::{info, warn};

use crate::config::Target;
use crate::contract::{get_optional, RemoteStore};
use crate::error::{DocumentError, StoreResult};
use crate::maven::xml::{root_name, visit, Node, XmlDocument};

pub const ARCHETYPE_CATALOG_FILE: &str = "archetype-catalog.xml";

const CATALOG_NAMESPACE: &str = "http://maven.apache.org/plugins/maven-archetype-plugin/archetype-catalog/1.0.0";
const CATALOG_SCHEMA_LOCATION: &str = "http://maven.apache.org/plugins/maven-archetype-plugin/archetype-catalog/1.0.0 http://maven.apache.org/xsd/archetype-catalog-1.0.0.xsd";
const XSI_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema-instance";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ArchetypeEntry {
    pub group_id: String,
    pub artifact_id: String,
    pub version: String,
    pub description: Option<String>,
}

impl ArchetypeEntry {
    pub fn new(group_id: impl Into<String>, artifact_id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            artifact_id: artifact_id.into(),
            version: version.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Identity used for de-duplication.
    pub fn id(&self) -> (&str, &str, &str) {
        (&self.group_id, &self.artifact_id, &self.version)
    }
}

/// What to do with the stored catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogAction {
    NoOp,
    Upload(Vec<ArchetypeEntry>),
    Delete,
}

/// State of the stored catalog on one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCatalog {
    Absent,
    Corrupt(DocumentError),
    Entries(Vec<ArchetypeEntry>),
}

pub fn parse_catalog(key: &str, bytes: &[u8]) -> Result<Vec<ArchetypeEntry>, DocumentError> {
    if root_name(key, bytes)? != "archetype-catalog" {
        return Err(DocumentError::xml(key, "root element is not <archetype-catalog>"));
    }

    let mut entries = Vec::new();
    let mut current = ArchetypeEntry::default();
    let mut incomplete = false;

    visit(key, bytes, |node| match node {
        Node::Text { path, text } => {
            let [.., parent, field] = path else {
                return;
            };
            if parent != "archetype" {
                return;
            }
            match field.as_str() {
                "groupId" => current.group_id = text.to_string(),
                "artifactId" => current.artifact_id = text.to_string(),
                "version" => current.version = text.to_string(),
                "description" => current.description = Some(text.to_string()),
                _ => {}
            }
        }
        Node::End { path } => {
            if path.last().map(String::as_str) == Some("archetype") {
                let entry = std::mem::take(&mut current);
                if entry.group_id.is_empty() || entry.artifact_id.is_empty() || entry.version.is_empty() {
                    incomplete = true;
                } else {
                    entries.push(entry);
                }
            }
        }
    })?;

    if incomplete {
        return Err(DocumentError::xml(key, "archetype entry without groupId, artifactId or version"));
    }
    Ok(entries)
}

pub fn render_catalog(entries: &[ArchetypeEntry]) -> Result<Vec<u8>, DocumentError> {
    let mut doc = XmlDocument::new(ARCHETYPE_CATALOG_FILE)?;
    doc.open(
        "archetype-catalog",
        &[
            ("xsi:schemaLocation", CATALOG_SCHEMA_LOCATION),
            ("xmlns", CATALOG_NAMESPACE),
            ("xmlns:xsi", XSI_NAMESPACE),
        ],
    )?;
    doc.open("archetypes", &[])?;
    for entry in entries {
        doc.open("archetype", &[])?;
        doc.text_element("groupId", &entry.group_id)?;
        doc.text_element("artifactId", &entry.artifact_id)?;
        doc.text_element("version", &entry.version)?;
        if let Some(description) = &entry.description {
            doc.text_element("description", description)?;
        }
        doc.close("archetype")?;
    }
    doc.close("archetypes")?;
    doc.close("archetype-catalog")?;
    Ok(doc.finish())
}

/// Read and classify the catalog stored on `target`.
pub async fn read_remote_catalog<S>(store: &S, target: &Target) -> StoreResult<RemoteCatalog>
where
    S: RemoteStore + ?Sized,
{
    let Some(bytes) = get_optional(store, target, ARCHETYPE_CATALOG_FILE).await? else {
        return Ok(RemoteCatalog::Absent);
    };
    Ok(match parse_catalog(ARCHETYPE_CATALOG_FILE, &bytes) {
        Ok(entries) => RemoteCatalog::Entries(entries),
        Err(e) => RemoteCatalog::Corrupt(e),
    })
}

/// Decide how a release's catalog (if it ships one) changes the stored one.
pub fn plan_upload(local: Option<&[ArchetypeEntry]>, remote: RemoteCatalog) -> CatalogAction {
    let Some(local) = local else {
        return CatalogAction::NoOp;
    };
    let remote = match remote {
        RemoteCatalog::Absent => return CatalogAction::Upload(local.to_vec()),
        RemoteCatalog::Corrupt(e) => {
            warn!(error = %e, "[CATALOG] Stored archetype catalog is unreadable, overwriting it");
            return CatalogAction::Upload(local.to_vec());
        }
        RemoteCatalog::Entries(entries) => entries,
    };
    if local.is_empty() {
        return CatalogAction::NoOp;
    }

    let mut seen: HashSet<(String, String, String)> = remote
        .iter()
        .map(|e| (e.group_id.clone(), e.artifact_id.clone(), e.version.clone()))
        .collect();
    let mut merged = remote.clone();
    for entry in local {
        let id = (entry.group_id.clone(), entry.artifact_id.clone(), entry.version.clone());
        if seen.insert(id) {
            merged.push(entry.clone());
        } else {
            warn!(
                group_id = %entry.group_id,
                artifact_id = %entry.artifact_id,
                version = %entry.version,
                "[CATALOG] Archetype already listed by another release; rollback of this release will be unsafe"
            );
        }
    }

    if merged.len() == remote.len() {
        CatalogAction::NoOp
    } else {
        CatalogAction::Upload(merged)
    }
}

/// Decide how rolling back a release's catalog changes the stored one.
pub fn plan_delete(local: &[ArchetypeEntry], remote: RemoteCatalog) -> CatalogAction {
    let remote = match remote {
        RemoteCatalog::Absent => return CatalogAction::NoOp,
        RemoteCatalog::Corrupt(e) => {
            warn!(error = %e, "[CATALOG] Stored archetype catalog is unreadable, removing it");
            return CatalogAction::Delete;
        }
        RemoteCatalog::Entries(entries) => entries,
    };
    if remote.is_empty() {
        return CatalogAction::Delete;
    }

    let removed: HashSet<(&str, &str, &str)> = local.iter().map(ArchetypeEntry::id).collect();
    let remaining: Vec<ArchetypeEntry> = remote
        .iter()
        .filter(|entry| !removed.contains(&entry.id()))
        .cloned()
        .collect();

    if remaining.is_empty() {
        CatalogAction::Delete
    } else if remaining.len() != remote.len() {
        CatalogAction::Upload(remaining)
    } else {
        CatalogAction::NoOp
    }
}

/// Merge a release's catalog into the one stored on `target`.
pub async fn merge_on_upload<S>(store: &S, local: Option<&[ArchetypeEntry]>, target: &Target) -> StoreResult<CatalogAction>
where
    S: RemoteStore + ?Sized,
{
    let remote = read_remote_catalog(store, target).await?;
    let action = plan_upload(local, remote);
    info!(target = %target.name, action = action_name(&action), "[CATALOG] Planned catalog merge");
    Ok(action)
}

/// Remove a release's catalog entries from the one stored on `target`.
pub async fn merge_on_delete<S>(store: &S, local: &[ArchetypeEntry], target: &Target) -> StoreResult<CatalogAction>
where
    S: RemoteStore + ?Sized,
{
    let remote = read_remote_catalog(store, target).await?;
    let action = plan_delete(local, remote);
    info!(target = %target.name, action = action_name(&action), "[CATALOG] Planned catalog unmerge");
    Ok(action)
}

fn action_name(action: &CatalogAction) -> &'static str {
    match action {
        CatalogAction::NoOp => "no-op",
        CatalogAction::Upload(_) => "upload",
        CatalogAction::Delete => "delete",
    }
}
