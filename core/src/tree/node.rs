//! VSS tree node types: branches and typed leaves with their attribute
//! slots. A leaf's `value`/`targetValue` each carry their own lock so a
//! `set` only ever takes a write lock on the single attribute being
//! written, never on the tree's structure (spec.md §5).

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::tree::value::{DataType, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Branch,
    Sensor,
    Actuator,
    Attribute,
}

impl NodeKind {
    #[must_use]
    pub fn is_branch(self) -> bool {
        matches!(self, NodeKind::Branch)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribute {
    Value,
    TargetValue,
}

impl Attribute {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Attribute::Value => "value",
            Attribute::TargetValue => "targetValue",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "value" => Some(Attribute::Value),
            "targetValue" => Some(Attribute::TargetValue),
            _ => None,
        }
    }
}

/// A timestamped value, RFC-3339 nanosecond on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub ts: DateTime<Utc>,
    pub value: Value,
}

/// Static, immutable-after-load metadata for a leaf.
#[derive(Debug, Clone)]
pub struct LeafSpec {
    pub kind: NodeKind,
    pub datatype: DataType,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub allowed: Option<Vec<String>>,
    pub unit: Option<String>,
    pub uuid: String,
    pub description: Option<String>,
}

/// A leaf node: static spec plus the two mutable attribute slots, each
/// independently lockable.
#[derive(Debug)]
pub struct Leaf {
    pub spec: LeafSpec,
    pub value: RwLock<Option<DataPoint>>,
    pub target_value: RwLock<Option<DataPoint>>,
}

impl Leaf {
    #[must_use]
    pub fn slot(&self, attribute: Attribute) -> &RwLock<Option<DataPoint>> {
        match attribute {
            Attribute::Value => &self.value,
            Attribute::TargetValue => &self.target_value,
        }
    }

    #[must_use]
    pub fn has_attribute(&self, attribute: Attribute) -> bool {
        matches!(attribute, Attribute::Value | Attribute::TargetValue)
    }
}

#[derive(Debug)]
pub struct Branch {
    pub description: Option<String>,
    pub uuid: Option<String>,
    pub children: BTreeMap<String, Arc<Node>>,
}

#[derive(Debug)]
pub enum Node {
    Branch(Branch),
    Leaf(Leaf),
}

impl Node {
    #[must_use]
    pub fn as_branch(&self) -> Option<&Branch> {
        match self {
            Node::Branch(b) => Some(b),
            Node::Leaf(_) => None,
        }
    }

    #[must_use]
    pub fn as_leaf(&self) -> Option<&Leaf> {
        match self {
            Node::Leaf(l) => Some(l),
            Node::Branch(_) => None,
        }
    }

    #[must_use]
    pub fn is_branch(&self) -> bool {
        matches!(self, Node::Branch(_))
    }
}
