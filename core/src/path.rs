//! Three equivalent representations of a VSS tree path: dotted
//! (`Vehicle.Speed`), slashed (`Vehicle/Speed`) and JSON-query
//! (`$['Vehicle']['children']['Speed']`), plus wildcard-aware equality.
//!
//! Equality and hashing are defined on the slashed form, so two
//! `PathAddress` values built from different input forms but denoting the
//! same path compare equal (ref. `VSSPath` in the original C++ server,
//! which specializes `std::hash` the same way).

use std::fmt;
use std::hash::{Hash, Hasher};

use crate::error::PathError;

pub const WILDCARD: &str = "*";

/// A tree path in one of three equivalent forms.
#[derive(Debug, Clone)]
pub struct PathAddress {
    segments: Vec<String>,
    /// True if this address was produced from a dotted ("gen1") input.
    gen1_origin: bool,
}

impl PathAddress {
    fn from_segments(segments: Vec<String>, gen1_origin: bool) -> Result<Self, PathError> {
        if segments.is_empty() {
            return Err(PathError::Empty);
        }
        for seg in &segments {
            if seg.is_empty() {
                return Err(PathError::EmptySegment);
            }
            if seg != WILDCARD {
                if let Some(c) = seg.chars().find(|c| matches!(c, '.' | '/' | '[' | ']' | '$')) {
                    return Err(PathError::ReservedChar(c));
                }
            }
        }
        Ok(Self {
            segments,
            gen1_origin,
        })
    }

    /// Parse a dotted ("gen1") path, e.g. `Vehicle.OBD.EngineSpeed`.
    pub fn from_dotted(s: &str) -> Result<Self, PathError> {
        if s.is_empty() {
            return Err(PathError::Empty);
        }
        let segments = s.split('.').map(str::to_owned).collect();
        Self::from_segments(segments, true)
    }

    /// Parse a slashed ("gen2") path, e.g. `Vehicle/OBD/EngineSpeed`.
    pub fn from_slashed(s: &str) -> Result<Self, PathError> {
        if s.is_empty() {
            return Err(PathError::Empty);
        }
        let segments = s.split('/').map(str::to_owned).collect();
        Self::from_segments(segments, false)
    }

    /// Parse a JSON-query path, e.g. `$['Vehicle']['children']['OBD']`.
    pub fn from_json_query(s: &str) -> Result<Self, PathError> {
        let rest = s
            .strip_prefix('$')
            .ok_or_else(|| PathError::MalformedJsonQuery(s.to_owned()))?;
        if rest.is_empty() {
            return Self::from_segments(vec![String::new()], false).or(Err(PathError::Empty));
        }
        let mut segments = Vec::new();
        let mut cursor = rest;
        while !cursor.is_empty() {
            let body = cursor
                .strip_prefix('[')
                .and_then(|r| r.find(']').map(|end| (&r[..end], &r[end + 1..])));
            let Some((token, remainder)) = body else {
                return Err(PathError::MalformedJsonQuery(s.to_owned()));
            };
            cursor = remainder;
            if token == "children" {
                continue;
            }
            if token == "*" {
                segments.push(WILDCARD.to_owned());
                continue;
            }
            let name = token
                .strip_prefix('\'')
                .and_then(|t| t.strip_suffix('\''))
                .ok_or_else(|| PathError::MalformedJsonQuery(s.to_owned()))?;
            segments.push(name.to_owned());
        }
        Self::from_segments(segments, false)
    }

    /// Detect the input form (JSON-query by leading `$`, dotted vs slashed
    /// by which separator is present) and parse accordingly.
    pub fn from_auto(s: &str) -> Result<Self, PathError> {
        if s.starts_with('$') {
            Self::from_json_query(s)
        } else if s.contains('/') {
            Self::from_slashed(s)
        } else {
            Self::from_dotted(s)
        }
    }

    #[must_use]
    pub fn as_dotted(&self) -> String {
        self.segments.join(".")
    }

    #[must_use]
    pub fn as_slashed(&self) -> String {
        self.segments.join("/")
    }

    #[must_use]
    pub fn as_json_query(&self) -> String {
        if self.segments.len() == 1 && self.segments[0].is_empty() {
            return "$['']".to_owned();
        }
        let mut out = String::from("$");
        for (i, seg) in self.segments.iter().enumerate() {
            if i > 0 {
                out.push_str("['children']");
            }
            if seg == WILDCARD {
                out.push_str("[*]");
            } else {
                out.push_str(&format!("['{seg}']"));
            }
        }
        out
    }

    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    #[must_use]
    pub fn is_concrete(&self) -> bool {
        !self.segments.iter().any(|s| s == WILDCARD)
    }

    #[must_use]
    pub fn gen1_origin(&self) -> bool {
        self.gen1_origin
    }

    /// The path form the caller originally used, for echoing in replies.
    #[must_use]
    pub fn as_origin_form(&self) -> String {
        if self.gen1_origin {
            self.as_dotted()
        } else {
            self.as_slashed()
        }
    }

    /// Build a path directly from resolved, concrete segments (used by
    /// `TreeStore::expand_leaves` to turn a wildcard match back into a
    /// concrete address).
    #[must_use]
    pub(crate) fn from_concrete_segments(segments: Vec<String>, gen1_origin: bool) -> Self {
        Self {
            segments,
            gen1_origin,
        }
    }

    /// Append a child segment, preserving origin form.
    #[must_use]
    pub fn join(&self, child: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(child.to_owned());
        Self {
            segments,
            gen1_origin: self.gen1_origin,
        }
    }

    /// Does this (possibly wildcarded) address match `other` segment-wise,
    /// where `*` in `self` matches exactly one segment of `other`?
    #[must_use]
    pub fn matches(&self, other: &PathAddress) -> bool {
        if self.segments.len() != other.segments.len() {
            return false;
        }
        self.segments
            .iter()
            .zip(other.segments.iter())
            .all(|(a, b)| a == WILDCARD || a == b)
    }

    /// Is `other` the same path as `self`, or an ancestor prefix of it
    /// (used by `AccessChecker` to reject implicit descendant grants)?
    #[must_use]
    pub fn is_ancestor_of(&self, other: &PathAddress) -> bool {
        self.segments.len() <= other.segments.len()
            && self
                .segments
                .iter()
                .zip(other.segments.iter())
                .all(|(a, b)| a == b)
    }
}

impl PartialEq for PathAddress {
    fn eq(&self, other: &Self) -> bool {
        self.as_slashed() == other.as_slashed()
    }
}
impl Eq for PathAddress {}

impl Hash for PathAddress {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_slashed().hash(state);
    }
}

impl fmt::Display for PathAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_slashed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dotted_slashed_roundtrip() {
        let p = PathAddress::from_dotted("Vehicle.OBD.EngineSpeed").unwrap();
        assert_eq!(p.as_slashed(), "Vehicle/OBD/EngineSpeed");
        assert_eq!(p.as_dotted(), "Vehicle.OBD.EngineSpeed");
    }

    #[test]
    fn json_query_roundtrip() {
        let p = PathAddress::from_dotted("Vehicle.OBD.EngineSpeed").unwrap();
        assert_eq!(
            p.as_json_query(),
            "$['Vehicle']['children']['OBD']['children']['EngineSpeed']"
        );
        let back = PathAddress::from_json_query(&p.as_json_query()).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn json_query_wildcard() {
        let p = PathAddress::from_json_query("$['Vehicle']['children'][*]").unwrap();
        assert_eq!(p.as_dotted(), "Vehicle.*");
    }

    #[test]
    fn empty_path_is_invalid() {
        assert_eq!(PathAddress::from_dotted("").unwrap_err(), PathError::Empty);
        assert_eq!(
            PathAddress::from_dotted("Vehicle..Speed").unwrap_err(),
            PathError::EmptySegment
        );
    }

    #[test]
    fn equality_ignores_origin() {
        let a = PathAddress::from_dotted("Vehicle.Speed").unwrap();
        let b = PathAddress::from_slashed("Vehicle/Speed").unwrap();
        assert_eq!(a, b);
        assert!(a.gen1_origin());
        assert!(!b.gen1_origin());
    }

    #[test]
    fn wildcard_matches_one_segment() {
        let pattern = PathAddress::from_dotted("Vehicle.*.EngineSpeed").unwrap();
        let leaf = PathAddress::from_dotted("Vehicle.OBD.EngineSpeed").unwrap();
        assert!(pattern.matches(&leaf));
        let other = PathAddress::from_dotted("Vehicle.OBD.Extra.EngineSpeed").unwrap();
        assert!(!pattern.matches(&other));
    }

    #[test]
    fn ancestor_does_not_imply_descendant() {
        let branch = PathAddress::from_dotted("Vehicle.OBD").unwrap();
        let child = PathAddress::from_dotted("Vehicle.OBD.EngineSpeed").unwrap();
        assert!(branch.is_ancestor_of(&child));
        // matches() is the permission-relevant relation; a branch-level
        // pattern does not match a deeper concrete path by itself.
        assert!(!branch.matches(&child));
    }

    #[test]
    fn auto_detects_form() {
        assert_eq!(
            PathAddress::from_auto("Vehicle.Speed").unwrap(),
            PathAddress::from_dotted("Vehicle.Speed").unwrap()
        );
        assert_eq!(
            PathAddress::from_auto("Vehicle/Speed").unwrap(),
            PathAddress::from_dotted("Vehicle.Speed").unwrap()
        );
        assert_eq!(
            PathAddress::from_auto("$['Vehicle']['children']['Speed']").unwrap(),
            PathAddress::from_dotted("Vehicle.Speed").unwrap()
        );
    }
}
