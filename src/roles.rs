//! Role hierarchy with inheritance and permission closure
//!
//! Roles form a DAG via `inherits_from`; acyclicity is enforced with a
//! Kahn's-algorithm pass whenever the hierarchy is loaded or mutated, so a
//! bad configuration is rejected whole and never partially installed.

use crate::error::ConfigurationError;
use crate::types::RoleId;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::info;

/// Role definition: direct grants plus parent roles whose grants it inherits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    /// Unique role identifier
    pub id: RoleId,

    /// Display name
    pub name: String,

    /// Free-text description for audit readability
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Directly granted permissions, `resource:action` or wildcard form
    #[serde(default)]
    pub permissions: HashSet<String>,

    /// Parent roles this role inherits permissions from
    #[serde(default)]
    pub inherits_from: Vec<RoleId>,
}

impl Role {
    /// Create a role with no grants and no parents
    pub fn new(id: impl Into<RoleId>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: None,
            permissions: HashSet::new(),
            inherits_from: Vec::new(),
        }
    }

    /// Grant a permission directly to this role
    pub fn grant(mut self, permission: impl Into<String>) -> Self {
        self.permissions.insert(permission.into());
        self
    }

    /// Inherit from a parent role
    pub fn inherits(mut self, parent: impl Into<RoleId>) -> Self {
        self.inherits_from.push(parent.into());
        self
    }

    /// Set the description
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        if self.id.is_empty() {
            return Err(ConfigurationError::InvalidDefinition(
                "role id cannot be empty".to_string(),
            ));
        }
        if self.inherits_from.iter().any(|p| p == &self.id) {
            return Err(ConfigurationError::CyclicHierarchy(self.id.clone()));
        }
        Ok(())
    }
}

/// Immutable-during-evaluation mapping of roles to permission sets.
///
/// Mutation goes through the administrative operations, each of which
/// revalidates the whole hierarchy before committing.
#[derive(Debug, Clone, Default)]
pub struct RoleHierarchy {
    roles: HashMap<RoleId, Role>,
}

impl RoleHierarchy {
    /// Empty hierarchy
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a hierarchy from a complete role set.
    ///
    /// Fails fast on duplicate ids, unknown parents, or cycles; on failure
    /// nothing is installed.
    pub fn from_roles(roles: Vec<Role>) -> Result<Self, ConfigurationError> {
        let mut map = HashMap::with_capacity(roles.len());
        for role in roles {
            role.validate()?;
            if map.contains_key(&role.id) {
                return Err(ConfigurationError::DuplicateRole(role.id));
            }
            map.insert(role.id.clone(), role);
        }
        verify_hierarchy(&map)?;
        Ok(Self { roles: map })
    }

    /// Number of roles installed
    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }

    /// Look up a role definition
    pub fn get(&self, id: &str) -> Option<&Role> {
        self.roles.get(id)
    }

    /// Transitive permission closure for a set of assigned roles.
    ///
    /// Reachability walk over the parent DAG with a visited set, so it
    /// terminates even if a cycle somehow survived validation. Unknown role
    /// ids contribute nothing.
    pub fn permissions_for<'a, I>(&self, roles: I) -> HashSet<String>
    where
        I: IntoIterator<Item = &'a RoleId>,
    {
        let mut permissions = HashSet::new();
        let mut visited: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = roles.into_iter().map(String::as_str).collect();

        while let Some(id) = queue.pop_front() {
            if !visited.insert(id) {
                continue;
            }
            if let Some(role) = self.roles.get(id) {
                permissions.extend(role.permissions.iter().cloned());
                for parent in &role.inherits_from {
                    queue.push_back(parent);
                }
            }
        }

        permissions
    }

    /// Whether the given roles collectively hold `required`, honoring the
    /// global wildcard `*` and prefix wildcards like `document:*`.
    pub fn has_permission<'a, I>(&self, roles: I, required: &str) -> bool
    where
        I: IntoIterator<Item = &'a RoleId>,
    {
        self.permissions_for(roles)
            .iter()
            .any(|granted| permission_grants(granted, required))
    }

    /// Install a new role. Rejected if the id exists or a parent is unknown.
    pub fn add_role(&mut self, role: Role) -> Result<(), ConfigurationError> {
        role.validate()?;
        if self.roles.contains_key(&role.id) {
            return Err(ConfigurationError::DuplicateRole(role.id));
        }
        self.commit(role)
    }

    /// Replace an existing role definition.
    pub fn update_role(&mut self, role: Role) -> Result<(), ConfigurationError> {
        role.validate()?;
        if !self.roles.contains_key(&role.id) {
            return Err(ConfigurationError::UnknownRole(role.id));
        }
        self.commit(role)
    }

    /// Remove a role. Rejected if another role still inherits from it.
    pub fn remove_role(&mut self, id: &str) -> Result<Role, ConfigurationError> {
        if !self.roles.contains_key(id) {
            return Err(ConfigurationError::UnknownRole(id.to_string()));
        }
        if let Some(child) = self
            .roles
            .values()
            .find(|r| r.inherits_from.iter().any(|p| p == id))
        {
            return Err(ConfigurationError::InvalidDefinition(format!(
                "role '{}' still inherits from '{}'",
                child.id, id
            )));
        }
        let removed = self.roles.remove(id).ok_or_else(|| {
            ConfigurationError::UnknownRole(id.to_string())
        })?;
        info!(role = id, "role removed");
        Ok(removed)
    }

    /// Validate against a candidate map, then swap in. Keeps the invariant
    /// that a rejected mutation leaves the installed hierarchy untouched.
    fn commit(&mut self, role: Role) -> Result<(), ConfigurationError> {
        let mut candidate = self.roles.clone();
        candidate.insert(role.id.clone(), role.clone());
        verify_hierarchy(&candidate)?;
        info!(role = %role.id, parents = ?role.inherits_from, "role installed");
        self.roles = candidate;
        Ok(())
    }
}

/// Check every parent reference resolves and the parent graph is acyclic,
/// via Kahn's algorithm over the inheritance edges.
fn verify_hierarchy(roles: &HashMap<RoleId, Role>) -> Result<(), ConfigurationError> {
    let mut in_degree: HashMap<&str, usize> =
        roles.keys().map(|id| (id.as_str(), 0)).collect();

    for role in roles.values() {
        for parent in &role.inherits_from {
            if !roles.contains_key(parent) {
                return Err(ConfigurationError::UnknownRole(parent.clone()));
            }
            *in_degree.get_mut(parent.as_str()).unwrap() += 1;
        }
    }

    let mut queue: VecDeque<&str> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut processed = 0;

    while let Some(id) = queue.pop_front() {
        processed += 1;
        for parent in &roles[id].inherits_from {
            let degree = in_degree.get_mut(parent.as_str()).unwrap();
            *degree -= 1;
            if *degree == 0 {
                queue.push_back(parent.as_str());
            }
        }
    }

    if processed != roles.len() {
        // Any role still holding in-degree is on a cycle
        let on_cycle = in_degree
            .iter()
            .find(|(_, degree)| **degree > 0)
            .map(|(id, _)| id.to_string())
            .unwrap_or_default();
        return Err(ConfigurationError::CyclicHierarchy(on_cycle));
    }

    Ok(())
}

/// Permission matching rules: exact, global `*`, or `resource:*` prefix.
fn permission_grants(granted: &str, required: &str) -> bool {
    if granted == "*" || granted == required {
        return true;
    }
    if let Some(prefix) = granted.strip_suffix(":*") {
        if let Some(resource) = required.split(':').next() {
            return resource == prefix;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn editorial() -> RoleHierarchy {
        RoleHierarchy::from_roles(vec![
            Role::new("viewer").grant("document:read"),
            Role::new("editor").grant("document:write").inherits("viewer"),
            Role::new("admin").grant("*").inherits("editor"),
        ])
        .unwrap()
    }

    fn ids(items: &[&str]) -> Vec<RoleId> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn inherited_permissions_resolve() {
        let hierarchy = editorial();
        let roles = ids(&["editor"]);

        let permissions = hierarchy.permissions_for(&roles);
        assert!(permissions.contains("document:read"));
        assert!(permissions.contains("document:write"));

        assert!(hierarchy.has_permission(&roles, "document:read"));
        assert!(!hierarchy.has_permission(&roles, "document:delete"));
    }

    #[test]
    fn wildcard_grants() {
        let hierarchy = RoleHierarchy::from_roles(vec![
            Role::new("doc_admin").grant("document:*"),
            Role::new("root").grant("*"),
        ])
        .unwrap();

        let doc_admin = ids(&["doc_admin"]);
        assert!(hierarchy.has_permission(&doc_admin, "document:delete"));
        assert!(!hierarchy.has_permission(&doc_admin, "config:read"));

        let root = ids(&["root"]);
        assert!(hierarchy.has_permission(&root, "anything:at-all"));
    }

    #[test]
    fn unknown_role_contributes_nothing() {
        let hierarchy = editorial();
        let roles = ids(&["ghost"]);
        assert!(hierarchy.permissions_for(&roles).is_empty());
        assert!(!hierarchy.has_permission(&roles, "document:read"));
    }

    #[test]
    fn cycle_rejected_and_nothing_installed() {
        let result = RoleHierarchy::from_roles(vec![
            Role::new("a").inherits("b"),
            Role::new("b").inherits("c"),
            Role::new("c").inherits("a"),
        ]);
        assert!(matches!(
            result,
            Err(ConfigurationError::CyclicHierarchy(_))
        ));
    }

    #[test]
    fn self_reference_rejected() {
        let result = RoleHierarchy::from_roles(vec![Role::new("a").inherits("a")]);
        assert!(matches!(result, Err(ConfigurationError::CyclicHierarchy(_))));
    }

    #[test]
    fn unknown_parent_rejected() {
        let result = RoleHierarchy::from_roles(vec![Role::new("orphan").inherits("missing")]);
        assert_eq!(
            result.unwrap_err(),
            ConfigurationError::UnknownRole("missing".to_string())
        );
    }

    #[test]
    fn duplicate_role_rejected() {
        let result = RoleHierarchy::from_roles(vec![Role::new("dup"), Role::new("dup")]);
        assert_eq!(
            result.unwrap_err(),
            ConfigurationError::DuplicateRole("dup".to_string())
        );
    }

    #[test]
    fn mutation_that_introduces_cycle_is_rolled_back() {
        let mut hierarchy = editorial();
        // viewer -> admin would close the loop admin -> editor -> viewer
        let result = hierarchy.update_role(
            Role::new("viewer").grant("document:read").inherits("admin"),
        );
        assert!(matches!(result, Err(ConfigurationError::CyclicHierarchy(_))));

        // Prior state intact
        assert!(hierarchy.get("viewer").unwrap().inherits_from.is_empty());
        assert!(hierarchy.has_permission(&ids(&["editor"]), "document:read"));
    }

    #[test]
    fn remove_refused_while_inherited() {
        let mut hierarchy = editorial();
        assert!(hierarchy.remove_role("viewer").is_err());
        assert!(hierarchy.remove_role("admin").is_ok());
        assert_eq!(hierarchy.len(), 2);
    }

    #[test]
    fn diamond_inheritance_unions_once() {
        let hierarchy = RoleHierarchy::from_roles(vec![
            Role::new("base").grant("thing:read"),
            Role::new("left").inherits("base").grant("thing:write"),
            Role::new("right").inherits("base").grant("thing:share"),
            Role::new("top").inherits("left").inherits("right"),
        ])
        .unwrap();

        let permissions = hierarchy.permissions_for(&ids(&["top"]));
        assert_eq!(permissions.len(), 3);
    }

    proptest! {
        /// Monotonicity: a permission granted anywhere on the parent chain is
        /// held by every descendant of that chain.
        #[test]
        fn inheritance_is_monotonic(depth in 1usize..8, grant_at in 0usize..8) {
            let grant_at = grant_at % depth;
            let mut roles = Vec::new();
            for level in 0..depth {
                let mut role = Role::new(format!("level{level}"));
                if level == grant_at {
                    role = role.grant("vault:open");
                }
                if level > 0 {
                    role = role.inherits(format!("level{}", level - 1));
                }
                roles.push(role);
            }

            let hierarchy = RoleHierarchy::from_roles(roles).unwrap();
            for level in grant_at..depth {
                let holder = vec![format!("level{level}")];
                prop_assert!(hierarchy.has_permission(&holder, "vault:open"));
            }
        }
    }
}
