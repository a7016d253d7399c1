use std::collections::HashMap;

use artifact_bucket_core::config::Target;
use artifact_bucket_core::contract::RemoteStore;
use artifact_bucket_core::error::DocumentError;
use artifact_bucket_core::maven::archetype::{
    merge_on_delete, merge_on_upload, parse_catalog, plan_delete, plan_upload, render_catalog, ArchetypeEntry,
    CatalogAction, RemoteCatalog, ARCHETYPE_CATALOG_FILE,
};
use artifact_bucket_core::memory_store::InMemoryStore;

fn entry_a() -> ArchetypeEntry {
    ArchetypeEntry::new("org.foo", "quickstart", "1.0").with_description("Quickstart")
}

fn entry_b() -> ArchetypeEntry {
    ArchetypeEntry::new("org.foo", "webapp", "2.1")
}

#[test]
fn upload_into_empty_catalog_uploads_local_entries() {
    let action = plan_upload(Some(&[entry_a()]), RemoteCatalog::Entries(Vec::new()));
    assert_eq!(action, CatalogAction::Upload(vec![entry_a()]));
}

#[test]
fn upload_of_already_listed_entries_is_a_no_op() {
    let action = plan_upload(Some(&[entry_a()]), RemoteCatalog::Entries(vec![entry_a()]));
    assert_eq!(action, CatalogAction::NoOp);
}

#[test]
fn upload_without_local_catalog_is_a_no_op() {
    assert_eq!(plan_upload(None, RemoteCatalog::Absent), CatalogAction::NoOp);
    assert_eq!(plan_upload(Some(&[]), RemoteCatalog::Entries(vec![entry_a()])), CatalogAction::NoOp);
}

#[test]
fn upload_keeps_remote_order_then_appends_new_entries() {
    let action = plan_upload(Some(&[entry_a(), entry_b()]), RemoteCatalog::Entries(vec![entry_b()]));
    assert_eq!(action, CatalogAction::Upload(vec![entry_b(), entry_a()]));
}

#[test]
fn delete_of_last_entries_deletes_catalog() {
    assert_eq!(plan_delete(&[entry_a()], RemoteCatalog::Entries(vec![entry_a()])), CatalogAction::Delete);
    assert_eq!(plan_delete(&[entry_a()], RemoteCatalog::Entries(Vec::new())), CatalogAction::Delete);
    assert_eq!(plan_delete(&[entry_a()], RemoteCatalog::Absent), CatalogAction::NoOp);
}

#[test]
fn delete_keeps_entries_of_other_releases() {
    let action = plan_delete(&[entry_a()], RemoteCatalog::Entries(vec![entry_a(), entry_b()]));
    assert_eq!(action, CatalogAction::Upload(vec![entry_b()]));

    let untouched = plan_delete(&[entry_a()], RemoteCatalog::Entries(vec![entry_b()]));
    assert_eq!(untouched, CatalogAction::NoOp);
}

#[test]
fn catalog_renders_and_parses_back() {
    let body = render_catalog(&[entry_a(), entry_b()]).unwrap();
    let text = String::from_utf8(body.clone()).unwrap();
    assert!(text.contains("<archetype-catalog"));
    assert!(text.contains("<description>Quickstart</description>"));
    assert_eq!(parse_catalog(ARCHETYPE_CATALOG_FILE, &body).unwrap(), vec![entry_a(), entry_b()]);
}

#[test]
fn incomplete_or_foreign_documents_are_rejected() {
    let incomplete = b"<archetype-catalog><archetypes><archetype><groupId>g</groupId></archetype></archetypes></archetype-catalog>";
    assert!(parse_catalog(ARCHETYPE_CATALOG_FILE, incomplete).is_err());
    assert!(parse_catalog(ARCHETYPE_CATALOG_FILE, b"<metadata/>").is_err());
    assert!(parse_catalog(ARCHETYPE_CATALOG_FILE, b"not xml at all <").is_err());
}

#[tokio::test]
async fn merge_round_trip_against_store() {
    let store = InMemoryStore::new();
    let target = Target::new("main", "releases", "");

    let first = merge_on_upload(&store, Some(&[entry_a()]), &target).await.unwrap();
    let CatalogAction::Upload(entries) = first else {
        panic!("expected upload, got {first:?}");
    };
    store
        .put(
            &target,
            ARCHETYPE_CATALOG_FILE,
            render_catalog(&entries).unwrap(),
            "application/xml",
            HashMap::new(),
        )
        .await
        .unwrap();

    let again = merge_on_upload(&store, Some(&[entry_a()]), &target).await.unwrap();
    assert_eq!(again, CatalogAction::NoOp);

    let removed = merge_on_delete(&store, &[entry_a()], &target).await.unwrap();
    assert_eq!(removed, CatalogAction::Delete);
}

#[tokio::test]
async fn corrupt_stored_catalog_is_overwritten_on_upload() {
    let store = InMemoryStore::new();
    let target = Target::new("main", "releases", "");
    store
        .put(&target, ARCHETYPE_CATALOG_FILE, b"<broken".to_vec(), "application/xml", HashMap::new())
        .await
        .unwrap();

    let action = merge_on_upload(&store, Some(&[entry_b()]), &target).await.unwrap();
    assert_eq!(action, CatalogAction::Upload(vec![entry_b()]));
}

#[test]
fn corrupt_stored_catalog_is_deleted_on_rollback() {
    let corrupt = RemoteCatalog::Corrupt(DocumentError::xml(ARCHETYPE_CATALOG_FILE, "unexpected end of input"));
    assert_eq!(plan_delete(&[entry_a()], corrupt), CatalogAction::Delete);
}

#[tokio::test]
async fn corrupt_stored_catalog_is_removed_by_unmerge() {
    let store = InMemoryStore::new();
    let target = Target::new("main", "releases", "");
    store
        .put(&target, ARCHETYPE_CATALOG_FILE, b"<broken".to_vec(), "application/xml", HashMap::new())
        .await
        .unwrap();

    let action = merge_on_delete(&store, &[entry_a()], &target).await.unwrap();
    assert_eq!(action, CatalogAction::Delete);
}
