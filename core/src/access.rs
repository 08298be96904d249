//! Access control: does a channel's granted scope cover a given path for
//! a given operation? (spec.md §4.3)
//!
//! The one rule every check in this module exists to enforce: a scope
//! entry for a branch grants access to that branch node only, never to
//! its descendants. Only an explicit wildcard pattern (`Vehicle.OBD.*`)
//! reaches down into a subtree. `Channel::permission_for` already applies
//! `PathAddress::matches`, not `is_ancestor_of`, so this module only has
//! to turn a missing/insufficient permission into the right error.

use crate::channel::Channel;
use crate::error::AccessError;
use crate::path::PathAddress;

pub struct AccessChecker;

impl AccessChecker {
    pub fn check_read(channel: &Channel, path: &PathAddress) -> Result<(), AccessError> {
        Self::require_authorized(channel)?;
        match channel.permission_for(path) {
            Some(p) if p.read => Ok(()),
            _ => Err(AccessError::ReadDenied(path.as_origin_form())),
        }
    }

    pub fn check_write(channel: &Channel, path: &PathAddress) -> Result<(), AccessError> {
        Self::require_authorized(channel)?;
        match channel.permission_for(path) {
            Some(p) if p.write => Ok(()),
            _ => Err(AccessError::WriteDenied(path.as_origin_form())),
        }
    }

    /// Subscriptions require read access to the path they observe.
    pub fn check_subscribe(channel: &Channel, path: &PathAddress) -> Result<(), AccessError> {
        Self::require_authorized(channel)?;
        match channel.permission_for(path) {
            Some(p) if p.read => Ok(()),
            _ => Err(AccessError::SubscribeDenied(path.as_origin_form())),
        }
    }

    fn require_authorized(channel: &Channel) -> Result<(), AccessError> {
        if !channel.authorized {
            return Err(AccessError::Unauthorized);
        }
        if channel.is_expired(chrono::Utc::now()) {
            return Err(AccessError::TokenExpired);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{Permission, Transport};

    fn authorized_channel() -> Channel {
        let mut c = Channel::new(1, Transport::Ws);
        c.authorized = true;
        c.token_expiry = Some(chrono::Utc::now() + chrono::Duration::hours(1));
        c
    }

    #[test]
    fn unauthorized_channel_is_rejected() {
        let channel = Channel::new(1, Transport::Ws);
        let path = PathAddress::from_dotted("Vehicle.Speed").unwrap();
        assert_eq!(
            AccessChecker::check_read(&channel, &path).unwrap_err(),
            AccessError::Unauthorized
        );
    }

    #[test]
    fn branch_permission_does_not_grant_descendant_read() {
        let mut channel = authorized_channel();
        channel
            .scope
            .insert("Vehicle.OBD".to_owned(), Permission::parse("rw"));
        let descendant = PathAddress::from_dotted("Vehicle.OBD.EngineSpeed").unwrap();
        assert!(AccessChecker::check_read(&channel, &descendant).is_err());
    }

    #[test]
    fn wildcard_permission_grants_descendant_read() {
        let mut channel = authorized_channel();
        channel
            .scope
            .insert("Vehicle.OBD.*".to_owned(), Permission::parse("r"));
        let descendant = PathAddress::from_dotted("Vehicle.OBD.EngineSpeed").unwrap();
        assert!(AccessChecker::check_read(&channel, &descendant).is_ok());
    }

    #[test]
    fn read_scope_does_not_grant_write() {
        let mut channel = authorized_channel();
        channel
            .scope
            .insert("Vehicle.Speed".to_owned(), Permission::parse("r"));
        let path = PathAddress::from_dotted("Vehicle.Speed").unwrap();
        assert!(AccessChecker::check_read(&channel, &path).is_ok());
        assert!(AccessChecker::check_write(&channel, &path).is_err());
    }

    #[test]
    fn expired_token_is_rejected_even_with_scope() {
        let mut channel = authorized_channel();
        channel.token_expiry = Some(chrono::Utc::now() - chrono::Duration::seconds(1));
        channel
            .scope
            .insert("Vehicle.Speed".to_owned(), Permission::parse("rw"));
        let path = PathAddress::from_dotted("Vehicle.Speed").unwrap();
        assert_eq!(
            AccessChecker::check_read(&channel, &path).unwrap_err(),
            AccessError::TokenExpired
        );
    }
}
