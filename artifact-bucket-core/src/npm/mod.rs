//! npm packages: the package document model, its "latest wins" merge and the
//! release pipeline publishing tarballs next to their documents.

pub mod document;
pub mod merge;
pub mod release;

pub use document::{compare_semver, PackageDocument};
pub use merge::{merge, rebuild};
pub use release::NpmPackage;
