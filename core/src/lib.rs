//! Core domain logic for the vehicle-signal broker: the VSS tree, its
//! path addressing, access control, token verification, subscriptions
//! and the action-protocol request processor. No transport, no CLI, no
//! configuration loading lives here — see the `server` crate for that.

pub mod access;
pub mod channel;
pub mod error;
pub mod interfaces;
pub mod path;
pub mod processor;
pub mod subscription;
pub mod token;
pub mod tree;
pub mod validator;

pub use channel::Channel;
pub use error::Error;
pub use path::PathAddress;
pub use processor::RequestProcessor;
pub use tree::TreeStore;
