//! Authorization engine: RBAC fast path, ABAC policy iteration, default deny
//!
//! Orchestrates attribute collection, role-hierarchy checks, and
//! priority-ordered first-applicable policy evaluation, auditing every
//! decision on the way out.
//!
//! ```text
//! Request → [super-role?] → AttributeCatalog → RBAC fast path
//!                                                  ↓ no grant
//!                                        PolicyStore (priority order)
//!                                                  ↓ no match
//!                                             default deny
//!                                 every outcome → AuditPipeline
//! ```

pub mod audit;
pub mod cache;

pub use audit::{
    AuditEvent, AuditMutation, AuditPipeline, AuditRecord, AuditSink, MemoryAuditSink,
    TracingAuditSink,
};
pub use cache::{CacheConfig, CacheStats, CachedAuthorizer, DecisionCache};

use crate::attributes::{AttributeCatalog, AuthorizationContext, ClockProvider};
use crate::error::Result;
use crate::policy::{MemoryPolicyStore, Policy, PolicyEvaluator, PolicyStore};
use crate::roles::{Role, RoleHierarchy};
use crate::types::{Decision, Principal, ResourceRef, RoleId, SOURCE_SUPER_ROLE};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Engine configuration
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Designated role that bypasses RBAC enumeration and ABAC iteration
    /// entirely, provided it actually holds the global `*` grant. An
    /// explicit escape hatch; the bypass is still audited.
    pub super_role: Option<RoleId>,
}

/// The authorization engine.
///
/// Owned by the application's composition root and passed by handle to
/// whatever presentation layer needs decisions; there is no process-wide
/// singleton. Evaluation takes read locks only; administrative mutation is
/// single-writer through [`Self::add_role`] and friends.
pub struct AuthorizationEngine {
    roles: Arc<RwLock<RoleHierarchy>>,
    policies: Arc<dyn PolicyStore>,
    catalog: Arc<AttributeCatalog>,
    evaluator: PolicyEvaluator,
    audit: AuditPipeline,
    config: EngineConfig,
}

impl AuthorizationEngine {
    /// Start building an engine
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Authorize `action` on `resource` for `principal`.
    ///
    /// Infallible by design: internal faults degrade toward deny and are
    /// flagged in the audit record, never raised to the caller. The decision
    /// is audited unconditionally before being returned.
    pub async fn authorize(
        &self,
        principal: &Principal,
        resource: &ResourceRef,
        action: &str,
        context: &HashMap<String, crate::types::Value>,
    ) -> Decision {
        let start = Instant::now();

        debug!(
            principal = %principal.id,
            resource = format_args!("{}:{}", resource.resource_type, resource.id),
            action,
            "authorization request"
        );

        // Super-role escape hatch: skips attribute collection entirely
        if let Some(super_role) = &self.config.super_role {
            if principal.roles.contains(super_role)
                && self
                    .roles
                    .read()
                    .await
                    .has_permission(std::iter::once(super_role), "*")
            {
                let decision = Decision::allow(SOURCE_SUPER_ROLE);
                let ctx = AuthorizationContext::assemble(
                    HashMap::new(),
                    principal,
                    resource,
                    action,
                    context,
                );
                return self
                    .finish(principal, resource, action, decision, &ctx, false, start);
            }
        }

        let (provider_values, degraded) =
            self.catalog.collect(principal, resource, action).await;
        let ctx =
            AuthorizationContext::assemble(provider_values, principal, resource, action, context);

        // RBAC fast path: most decisions are coarse role checks and should
        // not pay for policy iteration
        let permission = format!("{}:{}", resource.resource_type, action);
        if self
            .roles
            .read()
            .await
            .has_permission(&principal.roles, &permission)
        {
            let decision = Decision::allow(Decision::rbac_source(&permission));
            return self.finish(principal, resource, action, decision, &ctx, degraded, start);
        }

        // ABAC path: first applicable policy wins, in priority order
        for policy in self.policies.list().await {
            if self.evaluator.matches(&policy, &ctx) {
                debug!(policy = %policy.id, priority = policy.priority, "policy matched");
                let decision = match policy.effect {
                    crate::policy::Effect::Allow => Decision::allow(policy.id),
                    crate::policy::Effect::Deny => Decision::deny(policy.id),
                };
                return self.finish(principal, resource, action, decision, &ctx, degraded, start);
            }
        }

        // Nothing granted, nothing matched
        let decision = Decision::default_deny();
        self.finish(principal, resource, action, decision, &ctx, degraded, start)
    }

    fn finish(
        &self,
        principal: &Principal,
        resource: &ResourceRef,
        action: &str,
        decision: Decision,
        ctx: &AuthorizationContext,
        degraded: bool,
        start: Instant,
    ) -> Decision {
        info!(
            principal = %principal.id,
            action,
            authorized = decision.authorized,
            source = %decision.source,
            "decision"
        );

        self.audit.record(AuditEvent::for_decision(
            principal,
            resource,
            action,
            &decision,
            ctx,
            degraded,
            start.elapsed().as_micros() as u64,
        ));

        decision
    }

    // Administrative mutation API. Each operation validates before
    // accepting; role mutations take the single write lock. Callers using
    // the cached wrapper get cache invalidation layered on top.

    /// Add a policy after validating its conditions
    pub async fn add_policy(&self, policy: Policy) -> Result<()> {
        let id = policy.id.clone();
        self.policies.add(policy).await?;
        info!(policy = %id, "policy added");
        self.audit
            .record_mutation(audit::AuditMutation::new("add", "policy", id));
        Ok(())
    }

    /// Replace an existing policy
    pub async fn update_policy(&self, policy: Policy) -> Result<()> {
        let id = policy.id.clone();
        self.policies.update(policy).await?;
        info!(policy = %id, "policy updated");
        self.audit
            .record_mutation(audit::AuditMutation::new("update", "policy", id));
        Ok(())
    }

    /// Remove a policy, returning it
    pub async fn remove_policy(&self, id: &str) -> Result<Policy> {
        let removed = self.policies.remove(id).await?;
        info!(policy = id, "policy removed");
        self.audit
            .record_mutation(audit::AuditMutation::new("remove", "policy", id));
        Ok(removed)
    }

    /// Install a new role
    pub async fn add_role(&self, role: Role) -> Result<()> {
        let id = role.id.clone();
        self.roles.write().await.add_role(role)?;
        self.audit
            .record_mutation(audit::AuditMutation::new("add", "role", id));
        Ok(())
    }

    /// Replace an existing role definition
    pub async fn update_role(&self, role: Role) -> Result<()> {
        let id = role.id.clone();
        self.roles.write().await.update_role(role)?;
        self.audit
            .record_mutation(audit::AuditMutation::new("update", "role", id));
        Ok(())
    }

    /// Remove a role
    pub async fn remove_role(&self, id: &str) -> Result<Role> {
        let removed = self.roles.write().await.remove_role(id)?;
        self.audit
            .record_mutation(audit::AuditMutation::new("remove", "role", id));
        Ok(removed)
    }

    /// The policy store backing this engine
    pub fn policy_store(&self) -> &Arc<dyn PolicyStore> {
        &self.policies
    }

    pub(crate) fn audit_pipeline(&self) -> AuditPipeline {
        self.audit.clone()
    }
}

/// Composition-root constructor for [`AuthorizationEngine`].
///
/// Defaults: empty role hierarchy, [`MemoryPolicyStore`], an attribute
/// catalog with just the [`ClockProvider`], and the [`TracingAuditSink`].
pub struct EngineBuilder {
    roles: RoleHierarchy,
    policies: Option<Arc<dyn PolicyStore>>,
    catalog: Option<AttributeCatalog>,
    sink: Option<Arc<dyn AuditSink>>,
    config: EngineConfig,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            roles: RoleHierarchy::new(),
            policies: None,
            catalog: None,
            sink: None,
            config: EngineConfig::default(),
        }
    }

    /// Install the role hierarchy (already validated at construction)
    pub fn roles(mut self, roles: RoleHierarchy) -> Self {
        self.roles = roles;
        self
    }

    /// Use a specific policy store backend
    pub fn policy_store(mut self, store: Arc<dyn PolicyStore>) -> Self {
        self.policies = Some(store);
        self
    }

    /// Use a specific attribute catalog
    pub fn attribute_catalog(mut self, catalog: AttributeCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Send audit events to this sink
    pub fn audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Designate the super role for the documented escape hatch
    pub fn super_role(mut self, role: impl Into<RoleId>) -> Self {
        self.config.super_role = Some(role.into());
        self
    }

    /// Build the engine. Must be called within a Tokio runtime (the audit
    /// drain task is spawned here).
    pub fn build(self) -> AuthorizationEngine {
        let sink = self
            .sink
            .unwrap_or_else(|| Arc::new(TracingAuditSink) as Arc<dyn AuditSink>);
        let catalog = self
            .catalog
            .unwrap_or_else(|| AttributeCatalog::new().register(Arc::new(ClockProvider)));
        let policies = self
            .policies
            .unwrap_or_else(|| Arc::new(MemoryPolicyStore::new()) as Arc<dyn PolicyStore>);

        info!(
            roles = self.roles.len(),
            super_role = ?self.config.super_role,
            "authorization engine initialized"
        );

        AuthorizationEngine {
            roles: Arc::new(RwLock::new(self.roles)),
            policies,
            catalog: Arc::new(catalog),
            evaluator: PolicyEvaluator::new(),
            audit: AuditPipeline::spawn(sink),
            config: self.config,
        }
    }
}
