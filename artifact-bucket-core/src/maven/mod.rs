//! Maven-layout repositories: version ordering, per-GA version-list
//! documents, the archetype catalog and the release pipeline tying them to
//! the [`crate::sync::SyncEngine`].

pub mod archetype;
pub mod metadata;
pub mod release;
pub mod version;
mod xml;

pub use archetype::{ArchetypeEntry, CatalogAction};
pub use metadata::{GroupArtifact, VersionAggregate};
pub use version::compare_versions;
