//! Loading a VSS tree from its primary spec file and applying overlays
//! (spec.md §3's lifecycle: build once from the primary file, then merge
//! each overlay file in lexicographic order).
//!
//! Parsing builds a plain [`RawNode`] tree first; overlays are merged into
//! that plain tree (branches union children, leaves replace metadata, per
//! spec.md §3), and only the final, fully-merged tree is converted into
//! the lock-bearing runtime [`Node`] representation `TreeStore` serves
//! from.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::TreeError;
use crate::tree::node::{Branch, Leaf, LeafSpec, Node, NodeKind};
use crate::tree::value::DataType;

#[derive(Debug, Clone)]
pub enum RawNode {
    Branch {
        description: Option<String>,
        uuid: Option<String>,
        children: BTreeMap<String, RawNode>,
    },
    Leaf(LeafSpecRaw),
}

#[derive(Debug, Clone)]
pub struct LeafSpecRaw {
    pub kind: NodeKind,
    pub datatype: DataType,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub allowed: Option<Vec<String>>,
    pub unit: Option<String>,
    pub uuid: String,
    pub description: Option<String>,
}

/// Parse a single VSS node from its JSON object form.
fn parse_node(name: &str, value: &serde_json::Value) -> Result<RawNode, TreeError> {
    let obj = value.as_object().ok_or_else(|| {
        TreeError::Load(format!("node '{name}' is not a JSON object"))
    })?;
    let kind_str = obj
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or_else(|| TreeError::Load(format!("node '{name}' is missing 'type'")))?;

    if kind_str == "branch" {
        let children_json = obj
            .get("children")
            .and_then(|v| v.as_object())
            .cloned()
            .unwrap_or_default();
        let mut children = BTreeMap::new();
        for (child_name, child_value) in &children_json {
            children.insert(child_name.clone(), parse_node(child_name, child_value)?);
        }
        Ok(RawNode::Branch {
            description: obj.get("description").and_then(|v| v.as_str()).map(str::to_owned),
            uuid: obj.get("uuid").and_then(|v| v.as_str()).map(str::to_owned),
            children,
        })
    } else {
        let kind = match kind_str {
            "sensor" => NodeKind::Sensor,
            "actuator" => NodeKind::Actuator,
            "attribute" => NodeKind::Attribute,
            other => {
                return Err(TreeError::Load(format!(
                    "node '{name}' has unknown type '{other}'"
                )))
            }
        };
        let datatype_str = obj
            .get("datatype")
            .and_then(|v| v.as_str())
            .ok_or_else(|| TreeError::Load(format!("leaf '{name}' is missing 'datatype'")))?;
        let datatype = DataType::parse(datatype_str)?;
        let uuid = obj
            .get("uuid")
            .and_then(|v| v.as_str())
            .ok_or_else(|| TreeError::Load(format!("leaf '{name}' is missing 'uuid'")))?
            .to_owned();
        let min = obj.get("min").and_then(serde_json::Value::as_f64);
        let max = obj.get("max").and_then(serde_json::Value::as_f64);
        let allowed = obj.get("enum").and_then(|v| v.as_array()).map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(str::to_owned))
                .collect::<Vec<_>>()
        });
        let unit = obj.get("unit").and_then(|v| v.as_str()).map(str::to_owned);
        let description = obj
            .get("description")
            .and_then(|v| v.as_str())
            .map(str::to_owned);
        Ok(RawNode::Leaf(LeafSpecRaw {
            kind,
            datatype,
            min,
            max,
            allowed,
            unit,
            uuid,
            description,
        }))
    }
}

/// Parse an entire spec/overlay document: a single top-level branch name
/// mapped to its node (spec.md §6).
pub fn parse_document(json_text: &str) -> Result<(String, RawNode), TreeError> {
    let parsed: serde_json::Value = serde_json::from_str(json_text)
        .map_err(|e| TreeError::Load(format!("invalid JSON: {e}")))?;
    let obj = parsed
        .as_object()
        .ok_or_else(|| TreeError::Load("document root is not a JSON object".to_owned()))?;
    let (name, value) = obj
        .iter()
        .next()
        .ok_or_else(|| TreeError::Load("document has no top-level branch".to_owned()))?;
    Ok((name.clone(), parse_node(name, value)?))
}

/// Merge `overlay` into `base` in place: branches union their children
/// (recursing on shared names), leaves are replaced wholesale by the
/// overlay's leaf (spec.md §3: "leaves replace metadata").
pub fn merge_raw(base: &mut RawNode, overlay: RawNode) -> Result<(), TreeError> {
    match (base, overlay) {
        (
            RawNode::Branch {
                children: base_children,
                description: base_desc,
                uuid: base_uuid,
            },
            RawNode::Branch {
                children: overlay_children,
                description: overlay_desc,
                uuid: overlay_uuid,
            },
        ) => {
            if let Some(d) = overlay_desc {
                *base_desc = Some(d);
            }
            if let Some(u) = overlay_uuid {
                *base_uuid = Some(u);
            }
            for (name, overlay_child) in overlay_children {
                match base_children.get_mut(&name) {
                    Some(base_child) => merge_raw(base_child, overlay_child)?,
                    None => {
                        base_children.insert(name, overlay_child);
                    }
                }
            }
            Ok(())
        }
        (base @ RawNode::Leaf(_), overlay @ RawNode::Leaf(_)) => {
            *base = overlay;
            Ok(())
        }
        _ => Err(TreeError::InvalidTree(
            "overlay changes node kind (branch/leaf) of an existing node".to_owned(),
        )),
    }
}

/// Parse a partial metadata object (as given to `updateMetaData`) into a
/// full [`LeafSpec`], falling back to `current`'s fields for anything the
/// caller omitted.
pub fn parse_leaf_metadata(
    new_meta: &serde_json::Value,
    current: &LeafSpec,
) -> Result<LeafSpec, TreeError> {
    let obj = new_meta
        .as_object()
        .ok_or_else(|| TreeError::InvalidTree("updateMetaData payload is not an object".into()))?;

    let kind = match obj.get("type").and_then(|v| v.as_str()) {
        Some("sensor") => NodeKind::Sensor,
        Some("actuator") => NodeKind::Actuator,
        Some("attribute") => NodeKind::Attribute,
        Some(other) => {
            return Err(TreeError::InvalidTree(format!(
                "unknown type '{other}' in updateMetaData payload"
            )))
        }
        None => current.kind,
    };
    let datatype = match obj.get("datatype").and_then(|v| v.as_str()) {
        Some(s) => DataType::parse(s)?,
        None => current.datatype,
    };
    let min = obj
        .get("min")
        .and_then(serde_json::Value::as_f64)
        .or(current.min);
    let max = obj
        .get("max")
        .and_then(serde_json::Value::as_f64)
        .or(current.max);
    let allowed = obj
        .get("enum")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(str::to_owned))
                .collect::<Vec<_>>()
        })
        .or_else(|| current.allowed.clone());
    let unit = obj
        .get("unit")
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .or_else(|| current.unit.clone());
    let uuid = obj
        .get("uuid")
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .unwrap_or_else(|| current.uuid.clone());
    let description = obj
        .get("description")
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .or_else(|| current.description.clone());

    Ok(LeafSpec {
        kind,
        datatype,
        min,
        max,
        allowed,
        unit,
        uuid,
        description,
    })
}

/// Convert the fully-merged plain tree into the lock-bearing runtime
/// representation, rejecting duplicate `uuid`s across the whole tree
/// (spec.md §3 invariant).
pub fn into_runtime(raw: RawNode) -> Result<Arc<Node>, TreeError> {
    let mut seen_uuids = HashSet::new();
    into_runtime_inner(raw, &mut seen_uuids)
}

fn into_runtime_inner(
    raw: RawNode,
    seen_uuids: &mut HashSet<String>,
) -> Result<Arc<Node>, TreeError> {
    match raw {
        RawNode::Branch {
            description,
            uuid,
            children,
        } => {
            if let Some(uuid) = &uuid {
                if !seen_uuids.insert(uuid.clone()) {
                    return Err(TreeError::DuplicateUuid(uuid.clone()));
                }
            }
            let mut runtime_children = BTreeMap::new();
            for (name, child) in children {
                runtime_children.insert(name, into_runtime_inner(child, seen_uuids)?);
            }
            Ok(Arc::new(Node::Branch(Branch {
                description,
                uuid,
                children: runtime_children,
            })))
        }
        RawNode::Leaf(spec) => {
            if !seen_uuids.insert(spec.uuid.clone()) {
                return Err(TreeError::DuplicateUuid(spec.uuid.clone()));
            }
            Ok(Arc::new(Node::Leaf(Leaf {
                spec: LeafSpec {
                    kind: spec.kind,
                    datatype: spec.datatype,
                    min: spec.min,
                    max: spec.max,
                    allowed: spec.allowed,
                    unit: spec.unit,
                    uuid: spec.uuid,
                    description: spec.description,
                },
                value: RwLock::new(None),
                target_value: RwLock::new(None),
            })))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> &'static str {
        r#"{
            "Vehicle": {
                "type": "branch",
                "uuid": "root-uuid",
                "children": {
                    "Speed": {
                        "type": "sensor",
                        "datatype": "float",
                        "unit": "km/h",
                        "uuid": "speed-uuid"
                    }
                }
            }
        }"#
    }

    #[test]
    fn parses_minimal_tree() {
        let (name, raw) = parse_document(sample()).unwrap();
        assert_eq!(name, "Vehicle");
        let root = into_runtime(raw).unwrap();
        let branch = root.as_branch().unwrap();
        assert!(branch.children.contains_key("Speed"));
    }

    #[test]
    fn overlay_adds_sibling_without_disturbing_existing() {
        let (_, mut base) = parse_document(sample()).unwrap();
        let overlay_doc = r#"{
            "Vehicle": {
                "type": "branch",
                "children": {
                    "Width": {
                        "type": "attribute",
                        "datatype": "uint16",
                        "uuid": "width-uuid"
                    }
                }
            }
        }"#;
        let (_, overlay) = parse_document(overlay_doc).unwrap();
        merge_raw(&mut base, overlay).unwrap();
        let root = into_runtime(base).unwrap();
        let branch = root.as_branch().unwrap();
        assert!(branch.children.contains_key("Speed"));
        assert!(branch.children.contains_key("Width"));
    }

    #[test]
    fn duplicate_uuid_is_rejected() {
        let doc = r#"{
            "Vehicle": {
                "type": "branch",
                "uuid": "same",
                "children": {
                    "A": { "type": "sensor", "datatype": "uint8", "uuid": "same" }
                }
            }
        }"#;
        let (_, raw) = parse_document(doc).unwrap();
        assert!(into_runtime(raw).is_err());
    }

    #[test]
    fn overlay_cannot_change_node_kind() {
        let (_, mut base) = parse_document(sample()).unwrap();
        let overlay_doc = r#"{
            "Vehicle": {
                "type": "branch",
                "children": {
                    "Speed": {
                        "type": "branch",
                        "children": {}
                    }
                }
            }
        }"#;
        let (_, overlay) = parse_document(overlay_doc).unwrap();
        assert!(merge_raw(&mut base, overlay).is_err());
    }
}
