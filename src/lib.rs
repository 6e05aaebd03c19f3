//! # Castellan
//!
//! Hybrid authorization engine combining hierarchical RBAC with ABAC policy
//! evaluation, decision caching, and an audit trail.
//!
//! ## Design
//!
//! - **RBAC fast path**: roles form a DAG with inherited permission sets;
//!   coarse `resource:action` checks resolve without touching policies.
//! - **ABAC policies**: prioritized condition conjunctions over a typed
//!   attribute context, combined first-applicable in priority order.
//! - **Default deny**: no grant and no match means deny, and every internal
//!   fault degrades toward deny; the engine is never fail-open.
//! - **Decision cache**: bounded-TTL memoization keyed by
//!   (principal, resource, action), with principal/resource invalidation.
//! - **Audit trail**: every decision, cached or fresh, is pushed to a
//!   pluggable sink through a non-blocking pipeline.
//!
//! The engine consumes an already-authenticated [`Principal`] and emits a
//! [`Decision`]; token issuance, session management, and transport are the
//! caller's business.
//!
//! ## Example
//!
//! ```rust
//! use castellan::{EngineBuilder, Principal, ResourceRef, Role, RoleHierarchy};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let roles = RoleHierarchy::from_roles(vec![
//!         Role::new("viewer").grant("document:read"),
//!         Role::new("editor").grant("document:write").inherits("viewer"),
//!     ])?;
//!
//!     let engine = EngineBuilder::new().roles(roles).build();
//!
//!     let principal = Principal::new("user:alice").with_role("editor");
//!     let resource = ResourceRef::new("document", "doc-1");
//!
//!     let decision = engine
//!         .authorize(&principal, &resource, "read", &Default::default())
//!         .await;
//!     assert!(decision.authorized);
//!     assert_eq!(decision.source, "rbac:document:read");
//!     Ok(())
//! }
//! ```

pub mod attributes;
pub mod engine;
pub mod error;
pub mod policy;
pub mod roles;
pub mod types;

// Re-export commonly used types
pub use attributes::{AttributeCatalog, AttributeProvider, AuthorizationContext, ClockProvider};
pub use engine::{
    AuditEvent, AuditMutation, AuditPipeline, AuditRecord, AuditSink, AuthorizationEngine,
    CacheConfig, CacheStats, CachedAuthorizer, DecisionCache, EngineBuilder, EngineConfig,
    MemoryAuditSink, TracingAuditSink,
};
pub use error::{AuthzError, ConfigurationError, Result};
pub use policy::{
    Condition, Effect, MemoryPolicyStore, Operator, Policy, PolicyEvaluator, PolicyStore,
};
pub use roles::{Role, RoleHierarchy};
pub use types::{Decision, Principal, ResourceRef, RoleId, PolicyId, Value};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
