//! In-memory VSS tree: load from spec file, apply overlays, resolve paths
//! (including wildcard expansion), enforce datatype/range/enum on set,
//! and project metadata. Mirrors spec.md §4.2.

pub mod load;
pub mod node;
pub mod value;

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio::sync::RwLock;

use crate::channel::Channel;
use crate::error::{AccessError, Error, TreeError};
use crate::path::PathAddress;
use crate::tree::load::{into_runtime, merge_raw, parse_document, RawNode};
use crate::tree::node::{Attribute, Branch, DataPoint, Leaf, LeafSpec, Node, NodeKind};
use crate::tree::value::Value;

/// A datapoint rendered for the wire: `{ ts, value }` with `value` already
/// converted to JSON (optionally stringified, per spec.md §4.2's
/// `as_string` parameter).
#[derive(Debug, Clone, serde::Serialize)]
pub struct RenderedDataPoint {
    pub ts: chrono::DateTime<Utc>,
    pub value: serde_json::Value,
}

impl DataPoint {
    fn render(&self, as_string: bool) -> RenderedDataPoint {
        RenderedDataPoint {
            ts: self.ts,
            value: self.value.to_json(as_string),
        }
    }
}

pub struct TreeStore {
    root_name: String,
    root: RwLock<Arc<Node>>,
}

impl TreeStore {
    /// Load the primary spec file, then merge each overlay file in
    /// lexicographic order of path (spec.md §3).
    pub fn init(spec_path: &Path, overlay_paths: &[impl AsRef<Path>]) -> Result<Self, TreeError> {
        let spec_text = std::fs::read_to_string(spec_path)
            .map_err(|e| TreeError::Load(format!("cannot read {}: {e}", spec_path.display())))?;
        let (root_name, mut raw) = parse_document(&spec_text)?;

        let mut overlay_files: Vec<&Path> = overlay_paths.iter().map(AsRef::as_ref).collect();
        overlay_files.sort();
        for overlay_path in overlay_files {
            let overlay_text = std::fs::read_to_string(overlay_path).map_err(|e| {
                TreeError::Load(format!("cannot read overlay {}: {e}", overlay_path.display()))
            })?;
            let (_, overlay_raw) = parse_document(&overlay_text)?;
            merge_raw(&mut raw, overlay_raw)?;
        }

        let root = into_runtime(raw)?;
        Ok(Self {
            root_name,
            root: RwLock::new(root),
        })
    }

    /// Construct directly from an already-parsed tree, for tests.
    #[must_use]
    pub fn from_parts(root_name: String, root: Arc<Node>) -> Self {
        Self {
            root_name,
            root: RwLock::new(root),
        }
    }

    /// The tree's root branch name, e.g. `"Vehicle"`. Scope-pattern
    /// expansion (`Channel::apply_claims`) needs this to turn a bare `*`
    /// claim into a pattern `expand_leaves` can walk.
    #[must_use]
    pub fn root_name(&self) -> &str {
        &self.root_name
    }

    async fn resolve(&self, path: &PathAddress) -> Result<Arc<Node>, TreeError> {
        let root = self.root.read().await.clone();
        navigate(&root, &self.root_name, path)
    }

    async fn resolve_leaf(&self, path: &PathAddress) -> Result<Arc<Node>, TreeError> {
        let node = self.resolve(path).await?;
        if node.as_leaf().is_some() {
            Ok(node)
        } else {
            Err(TreeError::PathNotFound(path.as_origin_form()))
        }
    }

    pub async fn exists(&self, path: &PathAddress) -> bool {
        self.resolve(path).await.is_ok()
    }

    pub async fn is_readable(&self, path: &PathAddress) -> bool {
        self.resolve_leaf(path).await.is_ok()
    }

    /// Writability at the store level is not gated by node kind — the
    /// original `vssdatabase::setSignal` does not reject sensors, and
    /// whether a given channel may write a path is a token-scope decision
    /// made by `AccessChecker`, not a tree-shape one (spec.md §4.3). Any
    /// existing leaf qualifies.
    pub async fn is_writable(&self, path: &PathAddress) -> bool {
        self.resolve_leaf(path).await.is_ok()
    }

    pub async fn has_attribute(&self, path: &PathAddress, attribute: Attribute) -> bool {
        match self.resolve_leaf(path).await {
            Ok(node) => node.as_leaf().is_some_and(|l| l.has_attribute(attribute)),
            Err(_) => false,
        }
    }

    pub async fn datatype_of(&self, path: &PathAddress) -> Result<String, TreeError> {
        let node = self.resolve_leaf(path).await?;
        Ok(node.as_leaf().unwrap().spec.datatype.to_string())
    }

    /// Wildcard expansion: see spec.md §4.2 for the exact rules.
    pub async fn expand_leaves(
        &self,
        pattern: &PathAddress,
    ) -> Result<Vec<PathAddress>, TreeError> {
        let root = self.root.read().await.clone();
        let segments = pattern.segments();
        let Some((first, rest)) = segments.split_first() else {
            return Ok(Vec::new());
        };
        if first != &self.root_name {
            return Ok(Vec::new());
        }

        let mut results = Vec::new();
        let mut seen = HashSet::new();
        for mut suffix in expand_rec(&root, rest) {
            let mut full = vec![self.root_name.clone()];
            full.append(&mut suffix);
            let addr = PathAddress::from_concrete_segments(full, pattern.gen1_origin());
            if seen.insert(addr.as_slashed()) {
                results.push(addr);
            }
        }
        Ok(results)
    }

    pub async fn get_signal(
        &self,
        path: &PathAddress,
        attribute: Attribute,
        as_string: bool,
    ) -> Result<RenderedDataPoint, TreeError> {
        let node = self.resolve_leaf(path).await?;
        let leaf = node.as_leaf().unwrap();
        if !leaf.has_attribute(attribute) {
            return Err(TreeError::InvalidAttribute {
                path: path.to_string(),
                attribute: attribute.as_str().to_owned(),
            });
        }
        let guard = leaf.slot(attribute).read().await;
        guard
            .as_ref()
            .map(|dp| dp.render(as_string))
            .ok_or_else(|| TreeError::UnavailableData {
                path: path.to_string(),
                attribute: attribute.as_str().to_owned(),
            })
    }

    pub async fn set_signal(
        &self,
        path: &PathAddress,
        attribute: Attribute,
        raw_value: &serde_json::Value,
    ) -> Result<RenderedDataPoint, TreeError> {
        let node = self.resolve_leaf(path).await?;
        let leaf = node.as_leaf().unwrap();
        if !leaf.has_attribute(attribute) {
            return Err(TreeError::InvalidAttribute {
                path: path.to_string(),
                attribute: attribute.as_str().to_owned(),
            });
        }
        let value = Value::parse(
            raw_value,
            leaf.spec.datatype,
            leaf.spec.min,
            leaf.spec.max,
            leaf.spec.allowed.as_deref(),
            &path.to_string(),
        )?;
        let ts = Utc::now();
        let dp = DataPoint {
            ts,
            value: value.clone(),
        };
        {
            let mut guard = leaf.slot(attribute).write().await;
            *guard = Some(dp);
        }
        Ok(RenderedDataPoint {
            ts,
            value: value.to_json(false),
        })
    }

    /// Project a subtree's metadata (no values), wrapped in its ancestor
    /// chain for client readability (spec.md §4.2).
    pub async fn get_metadata(&self, path: &PathAddress) -> Result<serde_json::Value, TreeError> {
        let node = self.resolve(path).await?;
        let leaf_json = node_metadata_json(&node);
        let segments = path.segments();
        let mut current_key = segments.last().cloned().unwrap_or_default();
        let mut current_val = leaf_json;
        for name in segments[..segments.len() - 1].iter().rev() {
            current_val = json!({
                "type": "branch",
                "children": { current_key: current_val },
            });
            current_key = name.clone();
        }
        Ok(json!({ current_key: current_val }))
    }

    pub async fn update_tree(
        &self,
        channel: &Channel,
        new_tree_json: &str,
    ) -> Result<(), Error> {
        if !channel.modify_tree {
            return Err(AccessError::TreeModifyDenied.into());
        }
        let (overlay_root_name, overlay_raw) =
            parse_document(new_tree_json).map_err(Error::Tree)?;
        if overlay_root_name != self.root_name {
            return Err(TreeError::InvalidTree(format!(
                "overlay root '{overlay_root_name}' does not match tree root '{}'",
                self.root_name
            ))
            .into());
        }

        let mut root_guard = self.root.write().await;
        let merged = merge_runtime(&root_guard, overlay_raw).await.map_err(Error::Tree)?;
        let mut seen = HashSet::new();
        collect_uuids(&merged, &mut seen).map_err(Error::Tree)?;
        *root_guard = merged;
        Ok(())
    }

    pub async fn update_metadata(
        &self,
        channel: &Channel,
        path: &PathAddress,
        new_meta_json: &serde_json::Value,
    ) -> Result<(), Error> {
        if !channel.modify_tree {
            return Err(AccessError::TreeModifyDenied.into());
        }
        let mut root_guard = self.root.write().await;
        let segments = path.segments();
        if segments.first().map(String::as_str) != Some(self.root_name.as_str()) {
            return Err(TreeError::PathNotFound(path.as_origin_form()).into());
        }
        let current = navigate(&root_guard, &self.root_name, path).map_err(Error::Tree)?;
        let Some(current_leaf) = current.as_leaf() else {
            return Err(TreeError::InvalidTree("updateMetaData target is a branch".into()).into());
        };
        let new_spec = load::parse_leaf_metadata(new_meta_json, &current_leaf.spec)
            .map_err(Error::Tree)?;
        let replacement = Arc::new(Node::Leaf(Leaf {
            spec: new_spec,
            value: RwLock::new(current_leaf.value.read().await.clone()),
            target_value: RwLock::new(current_leaf.target_value.read().await.clone()),
        }));
        let new_root = replace_at(&root_guard, &segments[1..], replacement).map_err(Error::Tree)?;
        *root_guard = new_root;
        Ok(())
    }
}

fn navigate(
    root: &Arc<Node>,
    root_name: &str,
    path: &PathAddress,
) -> Result<Arc<Node>, TreeError> {
    let segments = path.segments();
    let Some((first, rest)) = segments.split_first() else {
        return Err(TreeError::PathNotFound(path.as_origin_form()));
    };
    if first != root_name {
        return Err(TreeError::PathNotFound(path.as_origin_form()));
    }
    let mut current = root.clone();
    for seg in rest {
        let branch = current
            .as_branch()
            .ok_or_else(|| TreeError::PathNotFound(path.as_origin_form()))?;
        current = branch
            .children
            .get(seg)
            .cloned()
            .ok_or_else(|| TreeError::PathNotFound(path.as_origin_form()))?;
    }
    Ok(current)
}

fn expand_rec(node: &Arc<Node>, segments: &[String]) -> Vec<Vec<String>> {
    match segments.split_first() {
        None => match &**node {
            Node::Leaf(_) => vec![Vec::new()],
            Node::Branch(b) => all_leaf_paths(b),
        },
        Some((seg, rest)) => match &**node {
            Node::Leaf(_) => Vec::new(),
            Node::Branch(b) => {
                if seg == crate::path::WILDCARD {
                    if rest.is_empty() {
                        b.children
                            .iter()
                            .filter(|(_, c)| c.as_leaf().is_some())
                            .map(|(name, _)| vec![name.clone()])
                            .collect()
                    } else {
                        b.children
                            .iter()
                            .filter(|(_, c)| c.as_branch().is_some())
                            .flat_map(|(name, c)| {
                                expand_rec(c, rest).into_iter().map(move |mut p| {
                                    p.insert(0, name.clone());
                                    p
                                })
                            })
                            .collect()
                    }
                } else {
                    match b.children.get(seg) {
                        None => Vec::new(),
                        Some(child) => expand_rec(child, rest)
                            .into_iter()
                            .map(|mut p| {
                                p.insert(0, seg.clone());
                                p
                            })
                            .collect(),
                    }
                }
            }
        },
    }
}

fn all_leaf_paths(branch: &Branch) -> Vec<Vec<String>> {
    let mut out = Vec::new();
    for (name, child) in &branch.children {
        match &**child {
            Node::Leaf(_) => out.push(vec![name.clone()]),
            Node::Branch(cb) => {
                for mut p in all_leaf_paths(cb) {
                    p.insert(0, name.clone());
                    out.push(p);
                }
            }
        }
    }
    out
}

fn node_metadata_json(node: &Node) -> serde_json::Value {
    match node {
        Node::Leaf(leaf) => {
            let mut obj = serde_json::Map::new();
            obj.insert(
                "type".into(),
                json!(match leaf.spec.kind {
                    NodeKind::Sensor => "sensor",
                    NodeKind::Actuator => "actuator",
                    NodeKind::Attribute => "attribute",
                    NodeKind::Branch => unreachable!(),
                }),
            );
            obj.insert("datatype".into(), json!(leaf.spec.datatype.to_string()));
            if let Some(min) = leaf.spec.min {
                obj.insert("min".into(), json!(min));
            }
            if let Some(max) = leaf.spec.max {
                obj.insert("max".into(), json!(max));
            }
            if let Some(allowed) = &leaf.spec.allowed {
                obj.insert("enum".into(), json!(allowed));
            }
            if let Some(unit) = &leaf.spec.unit {
                obj.insert("unit".into(), json!(unit));
            }
            obj.insert("uuid".into(), json!(leaf.spec.uuid));
            if let Some(desc) = &leaf.spec.description {
                obj.insert("description".into(), json!(desc));
            }
            serde_json::Value::Object(obj)
        }
        Node::Branch(branch) => {
            let children: BTreeMap<_, _> = branch
                .children
                .iter()
                .map(|(name, child)| (name.clone(), node_metadata_json(child)))
                .collect();
            let mut obj = serde_json::Map::new();
            obj.insert("type".into(), json!("branch"));
            if let Some(desc) = &branch.description {
                obj.insert("description".into(), json!(desc));
            }
            if let Some(uuid) = &branch.uuid {
                obj.insert("uuid".into(), json!(uuid));
            }
            obj.insert("children".into(), json!(children));
            serde_json::Value::Object(obj)
        }
    }
}

async fn merge_runtime(base: &Arc<Node>, overlay: RawNode) -> Result<Arc<Node>, TreeError> {
    match (&**base, overlay) {
        (
            Node::Branch(base_branch),
            RawNode::Branch {
                description,
                uuid,
                children: overlay_children,
            },
        ) => {
            let mut new_children = base_branch.children.clone();
            for (name, overlay_child) in overlay_children {
                let merged = match base_branch.children.get(&name) {
                    Some(existing) => Box::pin(merge_runtime(existing, overlay_child)).await?,
                    None => into_runtime(overlay_child)?,
                };
                new_children.insert(name, merged);
            }
            Ok(Arc::new(Node::Branch(Branch {
                description: description.or_else(|| base_branch.description.clone()),
                uuid: uuid.or_else(|| base_branch.uuid.clone()),
                children: new_children,
            })))
        }
        (Node::Leaf(base_leaf), RawNode::Leaf(overlay_leaf)) => {
            let spec = LeafSpec {
                kind: overlay_leaf.kind,
                datatype: overlay_leaf.datatype,
                min: overlay_leaf.min,
                max: overlay_leaf.max,
                allowed: overlay_leaf.allowed,
                unit: overlay_leaf.unit,
                uuid: overlay_leaf.uuid,
                description: overlay_leaf.description,
            };
            Ok(Arc::new(Node::Leaf(Leaf {
                spec,
                value: RwLock::new(base_leaf.value.read().await.clone()),
                target_value: RwLock::new(base_leaf.target_value.read().await.clone()),
            })))
        }
        _ => Err(TreeError::InvalidTree(
            "updateVSSTree overlay changes node kind of an existing node".into(),
        )),
    }
}

fn collect_uuids(node: &Arc<Node>, seen: &mut HashSet<String>) -> Result<(), TreeError> {
    match &**node {
        Node::Leaf(leaf) => {
            if !seen.insert(leaf.spec.uuid.clone()) {
                return Err(TreeError::DuplicateUuid(leaf.spec.uuid.clone()));
            }
            Ok(())
        }
        Node::Branch(branch) => {
            if let Some(uuid) = &branch.uuid {
                if !seen.insert(uuid.clone()) {
                    return Err(TreeError::DuplicateUuid(uuid.clone()));
                }
            }
            for child in branch.children.values() {
                collect_uuids(child, seen)?;
            }
            Ok(())
        }
    }
}

fn replace_at(
    node: &Arc<Node>,
    segments: &[String],
    replacement: Arc<Node>,
) -> Result<Arc<Node>, TreeError> {
    match segments.split_first() {
        None => Ok(replacement),
        Some((seg, rest)) => {
            let branch = node
                .as_branch()
                .ok_or_else(|| TreeError::PathNotFound(seg.clone()))?;
            let child = branch
                .children
                .get(seg)
                .ok_or_else(|| TreeError::PathNotFound(seg.clone()))?;
            let new_child = replace_at(child, rest, replacement)?;
            let mut new_children = branch.children.clone();
            new_children.insert(seg.clone(), new_child);
            Ok(Arc::new(Node::Branch(Branch {
                description: branch.description.clone(),
                uuid: branch.uuid.clone(),
                children: new_children,
            })))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{Channel, Transport};

    fn sample_tree() -> TreeStore {
        let doc = r#"{
            "Vehicle": {
                "type": "branch",
                "uuid": "root",
                "children": {
                    "OBD": {
                        "type": "branch",
                        "uuid": "obd",
                        "children": {
                            "EngineSpeed": {
                                "type": "sensor",
                                "datatype": "float",
                                "unit": "rpm",
                                "uuid": "engine-speed"
                            },
                            "WarmupsSinceDTCClear": {
                                "type": "sensor",
                                "datatype": "uint8",
                                "uuid": "warmups"
                            }
                        }
                    },
                    "Speed": {
                        "type": "sensor",
                        "datatype": "float",
                        "uuid": "speed"
                    },
                    "Cabin": {
                        "type": "branch",
                        "uuid": "cabin",
                        "children": {
                            "Door": {
                                "type": "actuator",
                                "datatype": "boolean",
                                "uuid": "door"
                            }
                        }
                    }
                }
            }
        }"#;
        let (name, raw) = load::parse_document(doc).unwrap();
        let root = load::into_runtime(raw).unwrap();
        TreeStore::from_parts(name, root)
    }

    #[tokio::test]
    async fn set_then_get_roundtrip() {
        let tree = sample_tree();
        let path = PathAddress::from_dotted("Vehicle.OBD.EngineSpeed").unwrap();
        tree.set_signal(&path, Attribute::Value, &json!("2345.0"))
            .await
            .unwrap();
        let dp = tree.get_signal(&path, Attribute::Value, true).await.unwrap();
        assert_eq!(dp.value, json!("2345.0"));
    }

    #[tokio::test]
    async fn out_of_bounds_is_rejected() {
        let tree = sample_tree();
        let path = PathAddress::from_dotted("Vehicle.OBD.WarmupsSinceDTCClear").unwrap();
        let err = tree
            .set_signal(&path, Attribute::Value, &json!(256))
            .await
            .unwrap_err();
        assert!(matches!(err, TreeError::OutOfBounds { .. }));
    }

    #[tokio::test]
    async fn sensors_are_writable_at_store_level() {
        // Whether a sensor may be written is a token-scope decision made by
        // `AccessChecker`, not something `TreeStore` itself gates (spec.md
        // §4.3; `examples/original_source/src/vssdatabase.cpp`'s own
        // `setSignal` does not reject sensors either).
        let tree = sample_tree();
        let path = PathAddress::from_dotted("Vehicle.Speed").unwrap();
        assert!(tree.is_writable(&path).await);
        tree.set_signal(&path, Attribute::Value, &json!(10.0))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn actuators_are_writable() {
        let tree = sample_tree();
        let path = PathAddress::from_dotted("Vehicle.Cabin.Door").unwrap();
        assert!(tree.is_writable(&path).await);
        tree.set_signal(&path, Attribute::Value, &json!(true))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn wildcard_expands_to_single_leaf() {
        let tree = sample_tree();
        let pattern = PathAddress::from_dotted("Vehicle.*.EngineSpeed").unwrap();
        let leaves = tree.expand_leaves(&pattern).await.unwrap();
        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves[0].as_dotted(), "Vehicle.OBD.EngineSpeed");
    }

    #[tokio::test]
    async fn terminal_wildcard_enumerates_leaves_only() {
        let tree = sample_tree();
        let pattern = PathAddress::from_dotted("Vehicle.OBD.*").unwrap();
        let leaves = tree.expand_leaves(&pattern).await.unwrap();
        let names: Vec<_> = leaves.iter().map(PathAddress::as_dotted).collect();
        assert_eq!(
            names,
            vec![
                "Vehicle.OBD.EngineSpeed".to_owned(),
                "Vehicle.OBD.WarmupsSinceDTCClear".to_owned()
            ]
        );
    }

    #[tokio::test]
    async fn branch_name_expands_to_descendant_leaves() {
        let tree = sample_tree();
        let pattern = PathAddress::from_dotted("Vehicle.OBD").unwrap();
        let leaves = tree.expand_leaves(&pattern).await.unwrap();
        assert_eq!(leaves.len(), 2);
    }

    #[tokio::test]
    async fn unknown_path_yields_no_leaves() {
        let tree = sample_tree();
        let pattern = PathAddress::from_dotted("Signal.*.RPM1").unwrap();
        let leaves = tree.expand_leaves(&pattern).await.unwrap();
        assert!(leaves.is_empty());
    }

    #[tokio::test]
    async fn update_metadata_requires_modify_tree() {
        let tree = sample_tree();
        let channel = Channel::new(1, Transport::Ws);
        let path = PathAddress::from_dotted("Vehicle.Speed").unwrap();
        let err = tree
            .update_metadata(&channel, &path, &json!({"unit": "mph"}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Access(AccessError::TreeModifyDenied)));
    }

    #[tokio::test]
    async fn update_metadata_preserves_existing_value() {
        let tree = sample_tree();
        let mut channel = Channel::new(1, Transport::Ws);
        channel.modify_tree = true;
        let path = PathAddress::from_dotted("Vehicle.Speed").unwrap();
        tree.set_signal(&path, Attribute::Value, &json!(42.0))
            .await
            .unwrap();
        tree.update_metadata(&channel, &path, &json!({"unit": "mph"}))
            .await
            .unwrap();
        let dp = tree.get_signal(&path, Attribute::Value, false).await.unwrap();
        assert_eq!(dp.value, json!(42.0));
    }
}
