//! Config and batch-file loading from a scratch home directory.

use assert_fs::prelude::*;
use meshsync_core::{
    batch, config,
    registry::{CollectionRegistry, SYNTHETIC_SERVICE_ENTRY_COLLECTION},
    CollectionDescriptor, CollectionId, CoreError, EngineConfig,
};
use predicates::prelude::predicate;

// ---------------------------------------------------------------------------
// 1. Config file
// ---------------------------------------------------------------------------

#[test]
fn save_writes_config_under_dot_meshsync() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    config::save_at(home.path(), &EngineConfig::default().with_cluster_id("west"))
        .expect("save");

    home.child(".meshsync/config.yaml")
        .assert(predicate::path::exists())
        .assert(predicate::str::contains("cluster_id: west"));
    home.child(".meshsync/config.yaml.tmp")
        .assert(predicate::path::missing());
}

#[test]
fn extra_collection_cannot_shadow_builtin() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child(".meshsync/config.yaml")
        .write_str(
            "collections:\n  - collection: istio/networking/v1alpha3/gateways\n    type_name: shadow\n  - collection: acme/routes\n    type_name: route\n    required_fields: [path]\n",
        )
        .expect("write");

    let registry = config::load_at(home.path()).expect("load").registry();
    let gw = registry
        .by_collection(&CollectionId::from("istio/networking/v1alpha3/gateways"))
        .expect("gateway");
    assert_eq!(gw.type_name, "gateway", "built-in descriptor must win");

    let route = registry.by_type("route").expect("route");
    assert_eq!(route.required_fields, vec!["path".to_string()]);
    assert_eq!(route.group, "networking.istio.io");
}

#[test]
fn wrong_shape_config_is_parse_error() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child(".meshsync/config.yaml")
        .write_str("- a list, not a mapping\n")
        .expect("write");
    let err = config::load_at(home.path()).unwrap_err();
    assert!(matches!(err, CoreError::Parse { .. }), "got: {err}");
}

// ---------------------------------------------------------------------------
// 2. Batch files
// ---------------------------------------------------------------------------

#[test]
fn incremental_batch_file_decodes_removals() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child("01-delta.yaml");
    file.write_str(&format!(
        "collection: {SYNTHETIC_SERVICE_ENTRY_COLLECTION}\nincremental: true\nremoved: [ns1/old]\nobjects:\n  - metadata:\n      name: ns1/new\n      version: v2\n      create_time: \"2019-11-01T10:00:00Z\"\n      annotations:\n        networking.alpha.istio.io/serviceVersion: \"1\"\n    body:\n      hosts: [new.example.com]\n"
    ))
    .expect("write");

    let batch = batch::load_batch_at(file.path()).expect("load");
    assert!(batch.incremental);
    assert_eq!(batch.removed, vec!["ns1/old".to_string()]);
    let object = &batch.objects[0];
    assert_eq!(object.metadata.version, "v2");
    assert_eq!(object.metadata.create_time.as_deref(), Some("2019-11-01T10:00:00Z"));
    assert_eq!(
        object.metadata.annotations["networking.alpha.istio.io/serviceVersion"],
        "1"
    );
}

#[test]
fn descriptor_defaults_group_and_version() {
    let descriptor: CollectionDescriptor =
        serde_yaml::from_str("collection: acme/things\ntype_name: thing\n").expect("parse");
    assert_eq!(descriptor.group, "networking.istio.io");
    assert_eq!(descriptor.version, "v1alpha3");
    assert!(descriptor.required_fields.is_empty());
    assert!(CollectionRegistry::new(vec![descriptor]).contains_type("thing"));
}
