use thiserror::Error;

/// Error taxonomy surfaced by the broker core.
///
/// Each variant maps to a `(number, reason)` pair in the action protocol's
/// error envelope via [`Error::http_status`] / [`Error::reason`].
#[derive(Error, Debug)]
pub enum Error {
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("schema validation failed: {0}")]
    Schema(#[from] ValidationError),

    #[error("path error: {0}")]
    Path(#[from] PathError),

    #[error("tree error: {0}")]
    Tree(#[from] TreeError),

    #[error("access error: {0}")]
    Access(#[from] AccessError),

    #[error("token error: {0}")]
    Token(#[from] TokenError),

    #[error("subscription error: {0}")]
    Subscription(#[from] SubscriptionError),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Errors raised while parsing or converting a [`crate::path::PathAddress`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("path is empty")]
    Empty,

    #[error("path segment is empty")]
    EmptySegment,

    #[error("path contains a reserved character: {0:?}")]
    ReservedChar(char),

    #[error("malformed JSON-query path: {0}")]
    MalformedJsonQuery(String),
}

/// Errors raised by [`crate::tree::TreeStore`].
#[derive(Error, Debug)]
pub enum TreeError {
    #[error("cannot load tree spec: {0}")]
    Load(String),

    #[error("duplicate uuid in tree: {0}")]
    DuplicateUuid(String),

    #[error("I can not find {0} in my db")]
    PathNotFound(String),

    #[error("attribute {attribute} not available on {path}")]
    InvalidAttribute { path: String, attribute: String },

    #[error("attribute {attribute} on {path} has no value yet")]
    UnavailableData { path: String, attribute: String },

    #[error("value out of bounds for {path}: {detail}")]
    OutOfBounds { path: String, detail: String },

    #[error("type mismatch for {path}: expected {expected}, got {got}")]
    TypeMismatch {
        path: String,
        expected: String,
        got: String,
    },

    #[error("invalid value for {path}: {detail}")]
    InvalidValue { path: String, detail: String },

    #[error("invalid tree overlay: {0}")]
    InvalidTree(String),
}

/// Errors raised by [`crate::access::AccessChecker`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccessError {
    #[error("channel is not authorized")]
    Unauthorized,

    #[error("token for this channel has expired")]
    TokenExpired,

    #[error("Insufficient read access to {0}")]
    ReadDenied(String),

    #[error("No write access to {0}")]
    WriteDenied(String),

    #[error("no permission to subscribe to path {0}")]
    SubscribeDenied(String),

    #[error("channel is not permitted to modify the tree")]
    TreeModifyDenied,
}

/// Errors raised by [`crate::token::TokenVerifier`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("token signature or structure is invalid: {0}")]
    Invalid(String),

    #[error("token has expired")]
    Expired,

    #[error("token is missing required claim: {0}")]
    MissingClaim(String),
}

/// Errors raised by [`crate::validator::RequestValidator`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("{0}")]
    SchemaViolation(String),
}

/// Errors raised by [`crate::subscription::SubscriptionEngine`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    #[error("subscription not found")]
    NotFound,

    #[error("{0}")]
    Path(#[from] PathError),
}

impl Error {
    /// Numeric status as used in the action protocol's error envelope.
    /// The envelope carries this as a *string*, per spec's resolved open
    /// question (standardize on string to match the newer test suite).
    #[must_use]
    pub fn number(&self) -> &'static str {
        match self {
            Error::MalformedRequest(_) | Error::Schema(_) | Error::Path(_) => "400",
            Error::Tree(TreeError::OutOfBounds { .. })
            | Error::Tree(TreeError::TypeMismatch { .. })
            | Error::Tree(TreeError::InvalidValue { .. })
            | Error::Tree(TreeError::InvalidTree(_)) => "400",
            Error::Token(_) => "401",
            Error::Access(_) => "403",
            Error::Tree(TreeError::PathNotFound(_))
            | Error::Tree(TreeError::InvalidAttribute { .. })
            | Error::Tree(TreeError::UnavailableData { .. }) => "404",
            Error::Tree(TreeError::Load(_) | TreeError::DuplicateUuid(_)) => "400",
            Error::Subscription(SubscriptionError::NotFound) => "404",
            Error::Subscription(SubscriptionError::Path(_)) => "404",
            Error::Internal(_) => "401",
        }
    }

    /// The leaf error's own message, without this enum's wrapper prefix
    /// (`"tree error: "`, `"access error: "`, …). The action protocol's
    /// error envelope wants the bare message — e.g. `"I can not find
    /// Signal.*.RPM1 in my db"`, not `"tree error: I can not find …"`.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Error::MalformedRequest(s) | Error::Internal(s) => s.clone(),
            Error::Schema(e) => e.to_string(),
            Error::Path(e) => e.to_string(),
            Error::Tree(e) => e.to_string(),
            Error::Access(e) => e.to_string(),
            Error::Token(e) => e.to_string(),
            Error::Subscription(e) => e.to_string(),
        }
    }

    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Error::MalformedRequest(_) => "Bad Request",
            Error::Schema(_) => "Bad Request",
            Error::Path(_) => "Bad Request",
            Error::Token(_) => "Invalid Token",
            Error::Access(_) => "Forbidden",
            Error::Tree(TreeError::PathNotFound(_)) => "Path not found",
            Error::Tree(TreeError::InvalidAttribute { .. } | TreeError::UnavailableData { .. }) => {
                "unavailable_data"
            }
            Error::Tree(_) => "Bad Request",
            Error::Subscription(_) => "Path not found",
            Error::Internal(_) => "Unknown error",
        }
    }
}
