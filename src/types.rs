//! Core authorization types

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use uuid::Uuid;

/// Unique role identifier
pub type RoleId = String;

/// Unique policy identifier
pub type PolicyId = String;

/// Decision source for the default-deny outcome
pub const SOURCE_DEFAULT_DENY: &str = "default-deny";

/// Decision source for the super-role short-circuit
pub const SOURCE_SUPER_ROLE: &str = "rbac:*";

/// Typed attribute value.
///
/// The closed set of shapes a condition can compare against. Evaluation is
/// strictly typed: a `Number` never compares equal to a `String`, and there
/// is no coercion at evaluation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Text value
    String(String),
    /// Numeric value (integers and hours included)
    Number(f64),
    /// Set of strings, for `in` / `not_in` / `contains`
    StringSet(BTreeSet<String>),
    /// Inclusive numeric pair, for `time_range`
    Range(f64, f64),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_set(&self) -> Option<&BTreeSet<String>> {
        match self {
            Value::StringSet(s) => Some(s),
            _ => None,
        }
    }

    /// Human-readable type name, used in validation messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::Number(_) => "number",
            Value::StringSet(_) => "string-set",
            Value::Range(_, _) => "range",
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl<const N: usize> From<[&str; N]> for Value {
    fn from(items: [&str; N]) -> Self {
        Value::StringSet(items.iter().map(|s| s.to_string()).collect())
    }
}

/// Principal (user, service account, agent)
///
/// Supplied already authenticated by the caller; the engine never fetches
/// roles or attributes itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Principal {
    /// Principal identifier (e.g., "user:alice@example.com")
    pub id: String,

    /// Assigned role identifiers
    #[serde(default)]
    pub roles: HashSet<RoleId>,

    /// Additional attributes (department, clearance level, etc.)
    #[serde(default)]
    pub attributes: HashMap<String, Value>,
}

impl Principal {
    /// Create a new principal from an ID string
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            roles: HashSet::new(),
            attributes: HashMap::new(),
        }
    }

    /// Assign a role to the principal
    pub fn with_role(mut self, role: impl Into<RoleId>) -> Self {
        self.roles.insert(role.into());
        self
    }

    /// Add an attribute to the principal
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Resource descriptor for one authorization request.
///
/// Built by the caller (typically from its own data service); owner and
/// classification travel as plain attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRef {
    /// Resource type (document, api, database, etc.)
    #[serde(rename = "type")]
    pub resource_type: String,

    /// Resource identifier within its type
    pub id: String,

    /// Additional attributes (owner, classification, etc.)
    #[serde(default)]
    pub attributes: HashMap<String, Value>,
}

impl ResourceRef {
    /// Create a new resource descriptor
    pub fn new(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: id.into(),
            attributes: HashMap::new(),
        }
    }

    /// Add an attribute to the resource
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Authorization decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    /// Unique decision identifier
    pub id: String,

    /// Whether the request is allowed
    pub authorized: bool,

    /// What produced the decision: a policy id, `rbac:<permission>`,
    /// or `default-deny`
    pub source: String,

    /// Decision timestamp (milliseconds since epoch)
    pub timestamp: u64,
}

impl Decision {
    fn new(authorized: bool, source: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            authorized,
            source: source.into(),
            timestamp: chrono::Utc::now().timestamp_millis() as u64,
        }
    }

    /// Allow decision
    pub fn allow(source: impl Into<String>) -> Self {
        Self::new(true, source)
    }

    /// Deny decision
    pub fn deny(source: impl Into<String>) -> Self {
        Self::new(false, source)
    }

    /// The engine's terminal deny when nothing granted and nothing matched
    pub fn default_deny() -> Self {
        Self::new(false, SOURCE_DEFAULT_DENY)
    }

    /// Source string for an RBAC fast-path grant
    pub fn rbac_source(permission: &str) -> String {
        format!("rbac:{permission}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn principal_builder() {
        let principal = Principal::new("user:alice@example.com")
            .with_role("editor")
            .with_attribute("department", "engineering");

        assert_eq!(principal.id, "user:alice@example.com");
        assert!(principal.roles.contains("editor"));
        assert_eq!(
            principal.attributes.get("department"),
            Some(&Value::String("engineering".to_string()))
        );
    }

    #[test]
    fn resource_builder() {
        let resource = ResourceRef::new("document", "doc-123")
            .with_attribute("owner", "user:alice@example.com")
            .with_attribute("classification", "sensitive");

        assert_eq!(resource.resource_type, "document");
        assert_eq!(resource.id, "doc-123");
        assert_eq!(
            resource.attributes.get("classification"),
            Some(&Value::String("sensitive".to_string()))
        );
    }

    #[test]
    fn decision_constructors() {
        let allow = Decision::allow("P1");
        assert!(allow.authorized);
        assert_eq!(allow.source, "P1");
        assert!(!allow.id.is_empty());

        let deny = Decision::default_deny();
        assert!(!deny.authorized);
        assert_eq!(deny.source, SOURCE_DEFAULT_DENY);

        assert_eq!(Decision::rbac_source("document:read"), "rbac:document:read");
    }

    #[test]
    fn value_serde_shapes() {
        let v: Value = serde_json::from_str("\"ops\"").unwrap();
        assert_eq!(v, Value::String("ops".to_string()));

        let v: Value = serde_json::from_str("42.0").unwrap();
        assert_eq!(v.as_number(), Some(42.0));

        let v: Value = serde_json::from_str("[\"a\", \"b\"]").unwrap();
        assert!(v.as_set().is_some());
    }

    #[test]
    fn value_strict_typing() {
        assert_ne!(Value::String("5".into()), Value::Number(5.0));
        assert!(Value::String("5".into()).as_number().is_none());
    }
}
