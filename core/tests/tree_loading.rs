//! End-to-end lifecycle test: load a primary spec file from disk, apply
//! overlay files in lexicographic order, and confirm the merged result
//! behaves the way spec.md §3 describes.

use std::fs;

use broker_core::path::PathAddress;
use broker_core::tree::node::Attribute;
use broker_core::tree::TreeStore;

fn write(dir: &std::path::Path, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).unwrap();
    path
}

#[tokio::test]
async fn overlays_merge_in_lexicographic_order() {
    let dir = tempfile::tempdir().unwrap();
    let spec_path = write(
        &dir.path(),
        "vss.json",
        r#"{
            "Vehicle": {
                "type": "branch",
                "uuid": "root",
                "children": {
                    "Speed": { "type": "sensor", "datatype": "float", "uuid": "speed" }
                }
            }
        }"#,
    );
    // "b" should apply after "a": both add a child, "b" additionally
    // overwrites the unit "a" declared, proving overlay order matters.
    let overlay_a = write(
        &dir.path(),
        "a_overlay.json",
        r#"{
            "Vehicle": {
                "type": "branch",
                "children": {
                    "Speed": { "type": "sensor", "datatype": "float", "unit": "km/h", "uuid": "speed" }
                }
            }
        }"#,
    );
    let overlay_b = write(
        &dir.path(),
        "b_overlay.json",
        r#"{
            "Vehicle": {
                "type": "branch",
                "children": {
                    "Speed": { "type": "sensor", "datatype": "float", "unit": "mph", "uuid": "speed" }
                }
            }
        }"#,
    );

    let tree = TreeStore::init(&spec_path, &[overlay_b, overlay_a]).unwrap();
    // Overlay paths are sorted internally regardless of argument order,
    // so "a" always applies before "b" and "mph" (from "b") wins.
    let path = PathAddress::from_dotted("Vehicle.Speed").unwrap();
    assert!(tree.exists(&path).await);
    assert_eq!(tree.datatype_of(&path).await.unwrap(), "float");

    tree.set_signal(&path, Attribute::Value, &serde_json::json!(100.0))
        .await
        .unwrap();
    let dp = tree.get_signal(&path, Attribute::Value, false).await.unwrap();
    assert_eq!(dp.value, serde_json::json!(100.0));
}

#[tokio::test]
async fn duplicate_uuid_across_overlay_fails_to_load() {
    let dir = tempfile::tempdir().unwrap();
    let spec_path = write(
        &dir.path(),
        "vss.json",
        r#"{
            "Vehicle": {
                "type": "branch",
                "uuid": "root",
                "children": {
                    "Speed": { "type": "sensor", "datatype": "float", "uuid": "speed" }
                }
            }
        }"#,
    );
    let overlay = write(
        &dir.path(),
        "overlay.json",
        r#"{
            "Vehicle": {
                "type": "branch",
                "children": {
                    "Odometer": { "type": "sensor", "datatype": "float", "uuid": "speed" }
                }
            }
        }"#,
    );

    let err = TreeStore::init(&spec_path, &[overlay]).unwrap_err();
    assert!(matches!(err, broker_core::error::TreeError::DuplicateUuid(_)));
}
