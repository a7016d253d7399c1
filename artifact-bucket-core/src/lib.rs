#![doc = "artifact-bucket-core: core synchronisation logic for artifact-bucket."]

//! This crate holds everything that touches the shared object store: the
//! [`contract::RemoteStore`] abstraction, the reference-counted
//! [`sync::SyncEngine`], and the aggregate documents derived from store state
//! (Maven version lists, the archetype catalog and npm package documents).
//!
//! Transport (S3) and CLI glue live in the `artifact-bucket` binary crate.
//!
//! # Usage
//! Build a [`sync::SyncEngine`] over any [`contract::RemoteStore`], then drive a
//! whole release through [`maven::release`] or [`npm::release`].

pub mod checksum;
pub mod config;
pub mod contract;
pub mod error;
pub mod maven;
pub mod memory_store;
pub mod npm;
pub mod prodinfo;
pub mod sync;
pub mod synchronise;
