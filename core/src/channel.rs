//! A `Channel` is the broker's view of one connected client: which
//! transport it arrived on, whether it has presented a valid bearer
//! token, and what that token's `kuksa-vss` claim grants it (spec.md
//! §4.3/§4.4).

use std::collections::HashMap;

use crate::path::PathAddress;
use crate::token::Claims;
use crate::tree::TreeStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Ws,
    WsSecure,
    Grpc,
    Http,
}

/// One path-pattern's grant, as found in a decoded `kuksa-vss` claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permission {
    pub read: bool,
    pub write: bool,
}

impl Permission {
    #[must_use]
    pub fn parse(s: &str) -> Self {
        Self {
            read: s.contains('r'),
            write: s.contains('w'),
        }
    }
}

/// Per-connection state threaded through every request the connection
/// sends (spec.md §4.1, §4.3).
#[derive(Debug, Clone)]
pub struct Channel {
    pub connection_id: u64,
    pub transport: Transport,
    pub authorized: bool,
    pub token_expiry: Option<chrono::DateTime<chrono::Utc>>,
    pub scope: HashMap<String, Permission>,
    /// `scope`'s patterns expanded to the concrete leaves they covered at
    /// the last `authorize` (spec.md §4.3, §9: "cache the expanded
    /// concrete-leaf set"), keyed by `PathAddress::as_slashed`. Stale once
    /// `updateVSSTree` changes the tree shape underneath it; re-`authorize`
    /// is what refreshes it, matching the original's own re-auth-on-change
    /// behavior.
    pub expanded_scope: HashMap<String, Permission>,
    pub modify_tree: bool,
}

impl Channel {
    #[must_use]
    pub fn new(connection_id: u64, transport: Transport) -> Self {
        Self {
            connection_id,
            transport,
            authorized: false,
            token_expiry: None,
            scope: HashMap::new(),
            expanded_scope: HashMap::new(),
            modify_tree: false,
        }
    }

    /// Apply a verified token's claims to this channel, replacing any
    /// previous authorization (re-`authorize` overwrites, per spec.md
    /// §4.4). Each `kuksa-vss` pattern is expanded through `tree` into the
    /// concrete leaf set it covers right away (spec.md §4.3), so a bare
    /// `*` claim authorizes whatever the tree actually contains rather
    /// than failing to match anything at request time.
    pub async fn apply_claims(&mut self, claims: Claims, tree: &TreeStore) {
        self.authorized = true;
        self.token_expiry = Some(claims.expiry);
        self.modify_tree = claims.modify_tree;
        self.scope = claims
            .vss_scope
            .into_iter()
            .map(|(pattern, perm)| (pattern, Permission::parse(&perm)))
            .collect();
        self.expanded_scope = Self::expand_scope(&self.scope, tree).await;
    }

    /// Expand every raw scope pattern into its covered concrete leaves. A
    /// bare `*` (no root segment, meaning "everything") is special-cased
    /// to the whole tree, since `TreeStore::expand_leaves` otherwise
    /// expects its pattern to start with the tree's root name.
    async fn expand_scope(
        scope: &HashMap<String, Permission>,
        tree: &TreeStore,
    ) -> HashMap<String, Permission> {
        let mut expanded: HashMap<String, Permission> = HashMap::new();
        for (pattern, perm) in scope {
            let pattern_addr = if pattern.trim() == crate::path::WILDCARD {
                PathAddress::from_concrete_segments(vec![tree.root_name().to_owned()], true)
            } else {
                match PathAddress::from_auto(pattern) {
                    Ok(addr) => addr,
                    Err(_) => continue,
                }
            };
            let Ok(leaves) = tree.expand_leaves(&pattern_addr).await else {
                continue;
            };
            for leaf in leaves {
                expanded
                    .entry(leaf.as_slashed())
                    .and_modify(|existing: &mut Permission| {
                        existing.read |= perm.read;
                        existing.write |= perm.write;
                    })
                    .or_insert(*perm);
            }
        }
        expanded
    }

    /// Clear authorization, e.g. once the token's `exp` has passed.
    pub fn revoke(&mut self) {
        self.authorized = false;
        self.token_expiry = None;
        self.modify_tree = false;
        self.scope.clear();
        self.expanded_scope.clear();
    }

    #[must_use]
    pub fn is_expired(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        match self.token_expiry {
            Some(exp) => now >= exp,
            None => false,
        }
    }

    /// The best-matching scope entry for `path`. Checks the expanded
    /// concrete-leaf cache first (the fast, spec-mandated path — see
    /// `apply_claims`), then falls back to matching `path` against the
    /// raw patterns directly via `PathAddress::matches` (wildcard-aware,
    /// equal segment count, not `is_ancestor_of`) — this keeps a scope
    /// entry usable even for leaves added to the tree after the channel
    /// was last authorized.
    pub(crate) fn permission_for(&self, path: &PathAddress) -> Option<Permission> {
        let mut best: Option<Permission> = self.expanded_scope.get(&path.as_slashed()).copied();
        for (pattern, perm) in &self.scope {
            let Ok(pattern_addr) = PathAddress::from_auto(pattern) else {
                continue;
            };
            if pattern_addr.matches(path) {
                best = Some(match best {
                    Some(existing) => Permission {
                        read: existing.read || perm.read,
                        write: existing.write || perm.write,
                    },
                    None => *perm,
                });
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_parses_letters() {
        let p = Permission::parse("rw");
        assert!(p.read && p.write);
        let p = Permission::parse("r");
        assert!(p.read && !p.write);
    }

    #[test]
    fn branch_scope_does_not_match_descendant() {
        let mut channel = Channel::new(1, Transport::Ws);
        channel
            .scope
            .insert("Vehicle.OBD".to_owned(), Permission::parse("rw"));
        let descendant = PathAddress::from_dotted("Vehicle.OBD.EngineSpeed").unwrap();
        assert!(channel.permission_for(&descendant).is_none());
    }

    #[test]
    fn wildcard_scope_matches_descendant() {
        let mut channel = Channel::new(1, Transport::Ws);
        channel
            .scope
            .insert("Vehicle.OBD.*".to_owned(), Permission::parse("r"));
        let descendant = PathAddress::from_dotted("Vehicle.OBD.EngineSpeed").unwrap();
        assert!(channel.permission_for(&descendant).is_some());
    }

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
                            "EngineSpeed": { "type": "sensor", "datatype": "float", "uuid": "es" }
                        }
                    }
                }
            }
        }"#;
        let (name, raw) = crate::tree::load::parse_document(doc).unwrap();
        let root = crate::tree::load::into_runtime(raw).unwrap();
        TreeStore::from_parts(name, root)
    }

    #[tokio::test]
    async fn bare_wildcard_claim_expands_to_every_leaf() {
        let tree = sample_tree();
        let mut channel = Channel::new(1, Transport::Ws);
        let claims = Claims {
            expiry: chrono::Utc::now() + chrono::Duration::hours(1),
            vss_scope: [("*".to_owned(), "rw".to_owned())].into_iter().collect(),
            modify_tree: false,
        };
        channel.apply_claims(claims, &tree).await;
        let engine_speed = PathAddress::from_dotted("Vehicle.OBD.EngineSpeed").unwrap();
        let perm = channel.permission_for(&engine_speed).expect("expanded scope grants access");
        assert!(perm.read && perm.write);
    }
}
