//! Error types for the authorization engine

use thiserror::Error;

/// Rejected administrative mutation.
///
/// This is the only error class surfaced to callers: it is raised when a
/// role or policy mutation is invalid and the mutation is refused outright.
/// Evaluation never raises it: a request either gets a [`crate::Decision`]
/// or the engine degrades toward deny.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigurationError {
    /// Role hierarchy contains a cycle
    #[error("cyclic role hierarchy involving role '{0}'")]
    CyclicHierarchy(String),

    /// Role id already present
    #[error("duplicate role: {0}")]
    DuplicateRole(String),

    /// Role id not present
    #[error("unknown role: {0}")]
    UnknownRole(String),

    /// Policy id already present
    #[error("duplicate policy: {0}")]
    DuplicatePolicy(String),

    /// Policy id not present
    #[error("unknown policy: {0}")]
    UnknownPolicy(String),

    /// Condition operator and value type do not line up
    #[error("policy '{policy}': condition on '{attribute}': {reason}")]
    IncompatibleCondition {
        policy: String,
        attribute: String,
        reason: String,
    },

    /// Structurally invalid role or policy (empty id, etc.)
    #[error("invalid definition: {0}")]
    InvalidDefinition(String),
}

/// Authorization engine errors
#[derive(Debug, Error)]
pub enum AuthzError {
    /// Invalid administrative input
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// An attribute provider failed while resolving values.
    ///
    /// Absorbed inside the engine: the affected attributes are treated as
    /// absent and evaluation continues toward deny. Providers return this to
    /// the catalog; it never crosses the `authorize` boundary.
    #[error("attribute resolution failed: {0}")]
    AttributeResolution(String),

    /// Audit sink unavailable or failing; logged, never propagated.
    #[error("audit delivery failed: {0}")]
    AuditDelivery(String),
}

/// Result type for authorization operations
pub type Result<T, E = AuthzError> = std::result::Result<T, E>;
