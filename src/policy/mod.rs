//! Policy definition, validation, and storage

use crate::error::{AuthzError, ConfigurationError, Result};
use crate::types::{PolicyId, Value};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

pub mod evaluator;

pub use evaluator::PolicyEvaluator;

/// Policy effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Effect {
    /// Allow the action
    Allow,
    /// Deny the action
    Deny,
}

/// Condition operator vocabulary.
///
/// A fixed, closed set: extending it means adding a variant here and its
/// semantics in the evaluator, never dynamic code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equals,
    NotEquals,
    In,
    NotIn,
    Contains,
    GreaterThan,
    LessThan,
    Regex,
    TimeRange,
}

impl Operator {
    fn name(&self) -> &'static str {
        match self {
            Operator::Equals => "equals",
            Operator::NotEquals => "not_equals",
            Operator::In => "in",
            Operator::NotIn => "not_in",
            Operator::Contains => "contains",
            Operator::GreaterThan => "greater_than",
            Operator::LessThan => "less_than",
            Operator::Regex => "regex",
            Operator::TimeRange => "time_range",
        }
    }
}

/// Single condition: attribute dot-path, operator, comparison value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Attribute name, e.g. `user.department`
    pub attribute: String,

    /// Comparison operator
    pub operator: Operator,

    /// Comparison value; its type must be compatible with the operator
    pub value: Value,
}

impl Condition {
    pub fn new(attribute: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self {
            attribute: attribute.into(),
            operator,
            value: value.into(),
        }
    }

    /// Operator/value compatibility, checked once at policy-add time so
    /// evaluation never fails on a malformed accepted policy.
    fn validate(&self, policy: &str) -> Result<(), ConfigurationError> {
        let incompatible = |reason: String| ConfigurationError::IncompatibleCondition {
            policy: policy.to_string(),
            attribute: self.attribute.clone(),
            reason,
        };

        if self.attribute.is_empty() {
            return Err(incompatible("attribute name cannot be empty".to_string()));
        }

        match (self.operator, &self.value) {
            (Operator::Equals | Operator::NotEquals, Value::Range(_, _)) => Err(incompatible(
                format!("{} cannot compare against a range", self.operator.name()),
            )),
            (Operator::Equals | Operator::NotEquals, _) => Ok(()),

            (Operator::In | Operator::NotIn, Value::StringSet(_)) => Ok(()),
            (Operator::In | Operator::NotIn, other) => Err(incompatible(format!(
                "{} requires a string-set value, got {}",
                self.operator.name(),
                other.type_name()
            ))),

            (Operator::Contains, Value::String(_)) => Ok(()),
            (Operator::Contains, other) => Err(incompatible(format!(
                "contains requires a string value, got {}",
                other.type_name()
            ))),

            (Operator::GreaterThan | Operator::LessThan, Value::Number(_)) => Ok(()),
            (Operator::GreaterThan | Operator::LessThan, other) => Err(incompatible(format!(
                "{} requires a numeric value, got {}",
                self.operator.name(),
                other.type_name()
            ))),

            (Operator::Regex, Value::String(pattern)) => match regex::Regex::new(pattern) {
                Ok(_) => Ok(()),
                Err(err) => Err(incompatible(format!("invalid regex: {err}"))),
            },
            (Operator::Regex, other) => Err(incompatible(format!(
                "regex requires a string pattern, got {}",
                other.type_name()
            ))),

            (Operator::TimeRange, Value::Range(start, end)) => {
                for hour in [*start, *end] {
                    if !(0.0..24.0).contains(&hour) {
                        return Err(incompatible(format!(
                            "time_range hours must be in [0, 24), got {hour}"
                        )));
                    }
                }
                Ok(())
            }
            (Operator::TimeRange, other) => Err(incompatible(format!(
                "time_range requires a two-element numeric range, got {}",
                other.type_name()
            ))),
        }
    }
}

/// Prioritized ABAC rule: a conjunction of conditions producing an effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    /// Unique policy identifier
    pub id: PolicyId,

    /// Policy name, for audit readability
    pub name: String,

    /// Free-text description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Conditions, all of which must hold (evaluated left to right)
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Effect when the conditions hold
    pub effect: Effect,

    /// Priority: higher is evaluated first
    #[serde(default)]
    pub priority: i32,
}

impl Policy {
    pub fn new(id: impl Into<PolicyId>, effect: Effect) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: None,
            conditions: Vec::new(),
            effect,
            priority: 0,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn when(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Structural and condition validation, run at add/update time.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.id.is_empty() {
            return Err(ConfigurationError::InvalidDefinition(
                "policy id cannot be empty".to_string(),
            ));
        }
        for condition in &self.conditions {
            condition.validate(&self.id)?;
        }
        Ok(())
    }
}

/// Pluggable policy storage.
///
/// `list` must return policies sorted by descending priority with a stable
/// insertion-order tie-break, which is the iteration order the engine's
/// first-applicable combining depends on.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Get a policy by id
    async fn get(&self, id: &str) -> Option<Policy>;

    /// Add a validated policy; duplicate ids are a configuration error
    async fn add(&self, policy: Policy) -> Result<()>;

    /// Replace an existing policy
    async fn update(&self, policy: Policy) -> Result<()>;

    /// Remove a policy, returning it
    async fn remove(&self, id: &str) -> Result<Policy>;

    /// All policies in evaluation order
    async fn list(&self) -> Vec<Policy>;
}

struct Stored {
    policy: Policy,
    seq: u64,
}

/// In-memory policy store.
pub struct MemoryPolicyStore {
    inner: RwLock<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    policies: HashMap<PolicyId, Stored>,
    next_seq: u64,
}

impl MemoryPolicyStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryInner::default()),
        }
    }
}

impl Default for MemoryPolicyStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PolicyStore for MemoryPolicyStore {
    async fn get(&self, id: &str) -> Option<Policy> {
        let inner = self.inner.read().await;
        inner.policies.get(id).map(|s| s.policy.clone())
    }

    async fn add(&self, policy: Policy) -> Result<()> {
        policy.validate()?;
        let mut inner = self.inner.write().await;
        if inner.policies.contains_key(&policy.id) {
            return Err(AuthzError::Configuration(
                ConfigurationError::DuplicatePolicy(policy.id),
            ));
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner
            .policies
            .insert(policy.id.clone(), Stored { policy, seq });
        Ok(())
    }

    async fn update(&self, policy: Policy) -> Result<()> {
        policy.validate()?;
        let mut inner = self.inner.write().await;
        match inner.policies.get_mut(&policy.id) {
            // Keeps its original insertion slot for tie-breaking
            Some(stored) => {
                stored.policy = policy;
                Ok(())
            }
            None => Err(AuthzError::Configuration(
                ConfigurationError::UnknownPolicy(policy.id),
            )),
        }
    }

    async fn remove(&self, id: &str) -> Result<Policy> {
        let mut inner = self.inner.write().await;
        inner
            .policies
            .remove(id)
            .map(|s| s.policy)
            .ok_or_else(|| {
                AuthzError::Configuration(ConfigurationError::UnknownPolicy(id.to_string()))
            })
    }

    async fn list(&self) -> Vec<Policy> {
        let inner = self.inner.read().await;
        let mut stored: Vec<(&u64, &Policy)> = inner
            .policies
            .values()
            .map(|s| (&s.seq, &s.policy))
            .collect();
        stored.sort_by(|(seq_a, a), (seq_b, b)| {
            b.priority.cmp(&a.priority).then(seq_a.cmp(seq_b))
        });
        stored.into_iter().map(|(_, p)| p.clone()).collect()
    }
}
