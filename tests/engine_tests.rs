//! End-to-end tests for the authorization pipeline: RBAC fast path, ABAC
//! priority ordering, default deny, caching, invalidation, and audit.

use castellan::{
    AttributeCatalog, AttributeProvider, AuthzError, CacheConfig, CachedAuthorizer, Condition,
    Effect, EngineBuilder, MemoryAuditSink, Operator, Policy, Principal, ResourceRef, Result,
    Role, RoleHierarchy, Value,
};
use async_trait::async_trait;
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("castellan=debug")),
        )
        .try_init();
}

fn editorial_roles() -> RoleHierarchy {
    RoleHierarchy::from_roles(vec![
        Role::new("viewer").grant("document:read"),
        Role::new("editor").grant("document:write").inherits("viewer"),
    ])
    .unwrap()
}

fn owner_policy() -> Policy {
    Policy::new("P1", Effect::Allow)
        .named("owner-access")
        .describe("owners may do anything to their documents")
        .when(Condition::new("user.owns_resource", Operator::Equals, "yes"))
        .with_priority(10)
}

/// Marks whether the requesting user owns the resource, by comparing ids.
struct OwnershipProvider;

#[async_trait]
impl AttributeProvider for OwnershipProvider {
    fn namespace(&self) -> &str {
        "user"
    }

    async fn resolve(
        &self,
        principal: &Principal,
        resource: &ResourceRef,
        _action: &str,
    ) -> Result<HashMap<String, Value>> {
        let owner = resource.attributes.get("owner").and_then(Value::as_str);
        let mut values = HashMap::new();
        values.insert(
            "owns_resource".to_string(),
            Value::String(if owner == Some(principal.id.as_str()) {
                "yes".to_string()
            } else {
                "no".to_string()
            }),
        );
        Ok(values)
    }
}

struct FlakyProvider;

#[async_trait]
impl AttributeProvider for FlakyProvider {
    fn namespace(&self) -> &str {
        "directory"
    }

    async fn resolve(
        &self,
        _principal: &Principal,
        _resource: &ResourceRef,
        _action: &str,
    ) -> Result<HashMap<String, Value>> {
        Err(AuthzError::AttributeResolution("ldap timeout".into()))
    }
}

#[tokio::test]
async fn editor_inherits_viewer_read() {
    init_tracing();
    let engine = EngineBuilder::new().roles(editorial_roles()).build();

    let principal = Principal::new("user:alice").with_role("editor");
    let resource = ResourceRef::new("document", "doc-1");

    let decision = engine
        .authorize(&principal, &resource, "read", &HashMap::new())
        .await;
    assert!(decision.authorized);
    assert_eq!(decision.source, "rbac:document:read");

    let decision = engine
        .authorize(&principal, &resource, "write", &HashMap::new())
        .await;
    assert!(decision.authorized);
    assert_eq!(decision.source, "rbac:document:write");
}

#[tokio::test]
async fn owner_policy_covers_what_rbac_does_not() {
    init_tracing();
    let catalog = AttributeCatalog::new().register(Arc::new(OwnershipProvider));
    let engine = EngineBuilder::new()
        .roles(editorial_roles())
        .attribute_catalog(catalog)
        .build();
    engine.add_policy(owner_policy()).await.unwrap();

    let principal = Principal::new("user:alice").with_role("editor");

    // Owner: no RBAC grant for delete, but P1 matches
    let owned = ResourceRef::new("document", "doc-1").with_attribute("owner", "user:alice");
    let decision = engine
        .authorize(&principal, &owned, "delete", &HashMap::new())
        .await;
    assert!(decision.authorized);
    assert_eq!(decision.source, "P1");

    // Not the owner: nothing applies
    let foreign = ResourceRef::new("document", "doc-2").with_attribute("owner", "user:bob");
    let decision = engine
        .authorize(&principal, &foreign, "delete", &HashMap::new())
        .await;
    assert!(!decision.authorized);
    assert_eq!(decision.source, "default-deny");
}

#[tokio::test]
async fn high_priority_deny_vetoes_admin_allow() {
    init_tracing();
    let engine = EngineBuilder::new().build();

    engine
        .add_policy(
            Policy::new("P_deny", Effect::Deny)
                .named("no-sensitive-offsite")
                .when(Condition::new(
                    "resource.classification",
                    Operator::Equals,
                    "sensitive",
                ))
                .when(Condition::new(
                    "environment.network_type",
                    Operator::Equals,
                    "external",
                ))
                .with_priority(90),
        )
        .await
        .unwrap();
    engine
        .add_policy(
            Policy::new("P_allow", Effect::Allow)
                .named("admins-may")
                .when(Condition::new("user.roles", Operator::Contains, "admin"))
                .with_priority(10),
        )
        .await
        .unwrap();

    let admin = Principal::new("user:root").with_role("admin");
    let secret =
        ResourceRef::new("document", "doc-9").with_attribute("classification", "sensitive");
    let mut context = HashMap::new();
    context.insert(
        "environment.network_type".to_string(),
        Value::from("external"),
    );

    let decision = engine.authorize(&admin, &secret, "read", &context).await;
    assert!(!decision.authorized);
    assert_eq!(decision.source, "P_deny");

    // Same admin from the internal network: the deny no longer matches
    let mut internal = HashMap::new();
    internal.insert(
        "environment.network_type".to_string(),
        Value::from("internal"),
    );
    let decision = engine.authorize(&admin, &secret, "read", &internal).await;
    assert!(decision.authorized);
    assert_eq!(decision.source, "P_allow");
}

#[tokio::test]
async fn equal_priority_resolves_by_insertion_order() {
    init_tracing();
    let engine = EngineBuilder::new().build();

    let matches_everyone =
        |id: &str, effect| Policy::new(id, effect).with_priority(5);

    engine
        .add_policy(matches_everyone("first", Effect::Allow))
        .await
        .unwrap();
    engine
        .add_policy(matches_everyone("second", Effect::Deny))
        .await
        .unwrap();

    let decision = engine
        .authorize(
            &Principal::new("user:any"),
            &ResourceRef::new("thing", "t-1"),
            "poke",
            &HashMap::new(),
        )
        .await;
    assert!(decision.authorized);
    assert_eq!(decision.source, "first");
}

#[tokio::test]
async fn missing_attribute_fails_safe() {
    init_tracing();
    let engine = EngineBuilder::new().build();
    engine
        .add_policy(
            Policy::new("dept-gate", Effect::Allow).when(Condition::new(
                "user.department",
                Operator::Equals,
                "engineering",
            )),
        )
        .await
        .unwrap();

    // Principal deliberately lacks the department attribute
    let principal = Principal::new("user:contractor");
    let decision = engine
        .authorize(
            &principal,
            &ResourceRef::new("repo", "core"),
            "push",
            &HashMap::new(),
        )
        .await;
    assert!(!decision.authorized);
    assert_eq!(decision.source, "default-deny");
}

#[tokio::test]
async fn provider_fault_degrades_to_deny_and_is_annotated() {
    init_tracing();
    let sink = Arc::new(MemoryAuditSink::new());
    let catalog = AttributeCatalog::new().register(Arc::new(FlakyProvider));
    let engine = EngineBuilder::new()
        .attribute_catalog(catalog)
        .audit_sink(sink.clone())
        .build();
    engine
        .add_policy(
            Policy::new("dir-gate", Effect::Allow).when(Condition::new(
                "directory.team",
                Operator::Equals,
                "platform",
            )),
        )
        .await
        .unwrap();

    let decision = engine
        .authorize(
            &Principal::new("user:alice"),
            &ResourceRef::new("service", "deploys"),
            "trigger",
            &HashMap::new(),
        )
        .await;
    assert!(!decision.authorized);
    assert_eq!(decision.source, "default-deny");

    tokio::time::sleep(Duration::from_millis(20)).await;
    let decisions = sink.decisions().await;
    assert_eq!(decisions.len(), 1);
    assert!(decisions[0].degraded, "audit record must flag the internal fault");
    assert!(!decisions[0].authorized);

    // The policy installation itself was audited as a mutation
    let mutations = sink.mutations().await;
    assert_eq!(mutations.len(), 1);
    assert_eq!(mutations[0].entity_kind, "policy");
}

#[tokio::test]
async fn cached_decisions_are_reaudited_with_annotation() {
    init_tracing();
    let sink = Arc::new(MemoryAuditSink::new());
    let engine = EngineBuilder::new()
        .roles(editorial_roles())
        .audit_sink(sink.clone())
        .build();
    let authorizer = CachedAuthorizer::new(engine, CacheConfig::default());

    let principal = Principal::new("user:alice").with_role("viewer");
    let resource = ResourceRef::new("document", "doc-1");

    let first = authorizer
        .authorize_cached(&principal, &resource, "read", &HashMap::new(), true)
        .await;
    let second = authorizer
        .authorize_cached(&principal, &resource, "read", &HashMap::new(), true)
        .await;
    assert!(first.authorized && second.authorized);
    assert_eq!(first.id, second.id, "second call must come from the cache");

    tokio::time::sleep(Duration::from_millis(20)).await;
    let decisions = sink.decisions().await;
    assert_eq!(decisions.len(), 2);
    assert!(!decisions[0].cache_hit);
    assert!(decisions[1].cache_hit);

    let stats = authorizer.cache_stats();
    assert_eq!(stats.hits, 1);
}

#[tokio::test]
async fn invalidate_principal_forces_reevaluation() {
    init_tracing();
    let engine = EngineBuilder::new().build();
    let authorizer = CachedAuthorizer::new(engine, CacheConfig::default());

    let principal = Principal::new("user:bob").with_role("auditor");
    let resource = ResourceRef::new("ledger", "main");

    let before = authorizer
        .authorize_cached(&principal, &resource, "read", &HashMap::new(), true)
        .await;
    assert!(!before.authorized);

    // Mutate the engine directly, bypassing the wrapper's own invalidation,
    // the way an external administrative layer might
    authorizer
        .engine()
        .add_role(Role::new("auditor").grant("ledger:read"))
        .await
        .unwrap();

    // TTL has not elapsed: the stale deny is still served
    let stale = authorizer
        .authorize_cached(&principal, &resource, "read", &HashMap::new(), true)
        .await;
    assert!(!stale.authorized);

    authorizer.invalidate_principal("user:bob");

    let fresh = authorizer
        .authorize_cached(&principal, &resource, "read", &HashMap::new(), true)
        .await;
    assert!(fresh.authorized);
    assert_eq!(fresh.source, "rbac:ledger:read");
}

#[tokio::test]
async fn policy_mutation_through_wrapper_clears_cache() {
    init_tracing();
    let engine = EngineBuilder::new().build();
    let authorizer = CachedAuthorizer::new(engine, CacheConfig::default());

    let principal = Principal::new("user:carol");
    let resource = ResourceRef::new("report", "q3");

    let before = authorizer
        .authorize_cached(&principal, &resource, "read", &HashMap::new(), true)
        .await;
    assert!(!before.authorized);

    authorizer
        .add_policy(Policy::new("open-reports", Effect::Allow).when(Condition::new(
            "resource.type",
            Operator::Equals,
            "report",
        )))
        .await
        .unwrap();

    // No stale window: the new policy is visible immediately
    let after = authorizer
        .authorize_cached(&principal, &resource, "read", &HashMap::new(), true)
        .await;
    assert!(after.authorized);
    assert_eq!(after.source, "open-reports");
}

#[tokio::test]
async fn use_cache_false_bypasses_lookup() {
    init_tracing();
    let engine = EngineBuilder::new().roles(editorial_roles()).build();
    let authorizer = CachedAuthorizer::new(engine, CacheConfig::default());

    let principal = Principal::new("user:alice").with_role("viewer");
    let resource = ResourceRef::new("document", "doc-1");

    let first = authorizer
        .authorize_cached(&principal, &resource, "read", &HashMap::new(), true)
        .await;
    let forced = authorizer
        .authorize_cached(&principal, &resource, "read", &HashMap::new(), false)
        .await;
    assert_ne!(first.id, forced.id, "bypass must re-evaluate");
    assert_eq!(authorizer.cache_stats().hits, 0);
}

#[tokio::test]
async fn time_window_policy_with_supplied_hour() {
    init_tracing();
    let engine = EngineBuilder::new().build();
    engine
        .add_policy(
            Policy::new("night-batch", Effect::Allow)
                .when(Condition {
                    attribute: "environment.hour".to_string(),
                    operator: Operator::TimeRange,
                    value: Value::Range(22.0, 6.0),
                })
                .with_priority(1),
        )
        .await
        .unwrap();

    let principal = Principal::new("svc:batch");
    let resource = ResourceRef::new("warehouse", "exports");

    // Explicit hour overrides the clock snapshot
    let mut night = HashMap::new();
    night.insert("environment.hour".to_string(), Value::Number(23.0));
    let decision = engine
        .authorize(&principal, &resource, "export", &night)
        .await;
    assert!(decision.authorized);
    assert_eq!(decision.source, "night-batch");

    let mut noon = HashMap::new();
    noon.insert("environment.hour".to_string(), Value::Number(12.0));
    let decision = engine
        .authorize(&principal, &resource, "export", &noon)
        .await;
    assert!(!decision.authorized);
}

proptest! {
    #[test]
    fn decisions_are_deterministic(
        principal_id in "user:[a-z]{3,10}",
        resource_id in "doc-[a-z0-9]{3,10}",
        action in prop::sample::select(vec!["read", "write", "delete"]),
    ) {
        tokio_test::block_on(async {
            let engine = EngineBuilder::new().roles(editorial_roles()).build();
            engine.add_policy(owner_policy()).await.unwrap();

            let principal = Principal::new(principal_id.as_str()).with_role("viewer");
            let resource = ResourceRef::new("document", resource_id.as_str());

            let first = engine
                .authorize(&principal, &resource, action, &HashMap::new())
                .await;
            let second = engine
                .authorize(&principal, &resource, action, &HashMap::new())
                .await;

            assert_eq!(first.authorized, second.authorized);
            assert_eq!(first.source, second.source);
        });
    }
}
