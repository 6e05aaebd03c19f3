//! Attribute providers and the per-evaluation context bag
//!
//! Providers form a closed registry fixed at startup: each one owns a
//! namespace and returns strongly-typed [`Value`]s. A provider fault is
//! absorbed by the catalog: the affected namespace simply contributes no
//! attributes, and conditions referencing it fail toward deny.

use crate::error::Result;
use crate::types::{Principal, ResourceRef, Value};
use async_trait::async_trait;
use chrono::{Timelike, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Resolves attribute values for one namespace on demand.
#[async_trait]
pub trait AttributeProvider: Send + Sync {
    /// Namespace the returned keys are mounted under (e.g. "environment")
    fn namespace(&self) -> &str;

    /// Compute attribute values for the request being evaluated.
    ///
    /// Errors are treated as "attributes absent" by the catalog, never
    /// propagated to the authorize caller.
    async fn resolve(
        &self,
        principal: &Principal,
        resource: &ResourceRef,
        action: &str,
    ) -> Result<HashMap<String, Value>>;
}

/// Supplies `environment.hour` from the wall clock (UTC).
pub struct ClockProvider;

#[async_trait]
impl AttributeProvider for ClockProvider {
    fn namespace(&self) -> &str {
        "environment"
    }

    async fn resolve(
        &self,
        _principal: &Principal,
        _resource: &ResourceRef,
        _action: &str,
    ) -> Result<HashMap<String, Value>> {
        let mut values = HashMap::new();
        values.insert("hour".to_string(), Value::Number(Utc::now().hour() as f64));
        Ok(values)
    }
}

/// Fixed registry of attribute providers, assembled at startup.
#[derive(Default)]
pub struct AttributeCatalog {
    providers: Vec<Arc<dyn AttributeProvider>>,
}

impl AttributeCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider. Later providers win on key collisions within
    /// the same namespace.
    pub fn register(mut self, provider: Arc<dyn AttributeProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Run every provider and merge results under `<namespace>.<key>`.
    ///
    /// Returns the merged values plus a flag signalling that at least one
    /// provider faulted (surfaced in the audit record, never to the caller).
    pub async fn collect(
        &self,
        principal: &Principal,
        resource: &ResourceRef,
        action: &str,
    ) -> (HashMap<String, Value>, bool) {
        let mut merged = HashMap::new();
        let mut degraded = false;

        for provider in &self.providers {
            match provider.resolve(principal, resource, action).await {
                Ok(values) => {
                    for (key, value) in values {
                        merged.insert(format!("{}.{}", provider.namespace(), key), value);
                    }
                }
                Err(err) => {
                    warn!(
                        namespace = provider.namespace(),
                        error = %err,
                        "attribute provider failed; treating namespace as absent"
                    );
                    degraded = true;
                }
            }
        }

        (merged, degraded)
    }
}

/// The resolved attribute bag for one evaluation.
///
/// Keys are flat dot-paths (`user.department`, `resource.owner`,
/// `environment.hour`). Built fresh per evaluation, never persisted.
#[derive(Debug, Clone, Default)]
pub struct AuthorizationContext {
    values: HashMap<String, Value>,
}

impl AuthorizationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assemble the context for a request: provider output first, then
    /// principal attributes, resource descriptor, action, and finally the
    /// caller's ad-hoc context, which wins on collisions (this is how an
    /// explicitly supplied `environment.hour` overrides the clock snapshot).
    pub fn assemble(
        provider_values: HashMap<String, Value>,
        principal: &Principal,
        resource: &ResourceRef,
        action: &str,
        caller_context: &HashMap<String, Value>,
    ) -> Self {
        let mut values = provider_values;

        values.insert("user.id".to_string(), Value::String(principal.id.clone()));
        let roles: std::collections::BTreeSet<String> =
            principal.roles.iter().cloned().collect();
        values.insert("user.roles".to_string(), Value::StringSet(roles));
        for (key, value) in &principal.attributes {
            values.insert(format!("user.{key}"), value.clone());
        }

        values.insert(
            "resource.type".to_string(),
            Value::String(resource.resource_type.clone()),
        );
        values.insert("resource.id".to_string(), Value::String(resource.id.clone()));
        for (key, value) in &resource.attributes {
            values.insert(format!("resource.{key}"), value.clone());
        }

        values.insert("action".to_string(), Value::String(action.to_string()));

        for (key, value) in caller_context {
            values.insert(key.clone(), value.clone());
        }

        Self { values }
    }

    /// Look up an attribute by dot-path
    pub fn get(&self, attribute: &str) -> Option<&Value> {
        self.values.get(attribute)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Snapshot for the audit record
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.values).unwrap_or(serde_json::Value::Null)
    }
}
