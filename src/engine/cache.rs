//! Decision cache and the cached authorizer envelope
//!
//! Keys stay structured (principal, resource type, resource id, action) so
//! invalidation can filter by principal or resource instead of clearing
//! blind. Entries expire on TTL; the map is capacity-bounded with a coarse
//! eviction sweep when full.

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::audit::AuditEvent;
use super::AuthorizationEngine;
use crate::error::Result;
use crate::policy::Policy;
use crate::roles::Role;
use crate::types::{Decision, Principal, ResourceRef, Value};

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries
    pub capacity: usize,

    /// Time-to-live for cached decisions
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            ttl: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    principal_id: String,
    resource_type: String,
    resource_id: String,
    action: String,
}

impl CacheKey {
    fn new(principal: &Principal, resource: &ResourceRef, action: &str) -> Self {
        Self {
            principal_id: principal.id.clone(),
            resource_type: resource.resource_type.clone(),
            resource_id: resource.id.clone(),
            action: action.to_string(),
        }
    }
}

#[derive(Clone)]
struct CachedEntry {
    decision: Decision,
    cached_at: Instant,
}

impl CachedEntry {
    fn new(decision: Decision) -> Self {
        Self {
            decision,
            cached_at: Instant::now(),
        }
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.cached_at.elapsed() > ttl
    }
}

/// Memoizes (principal, resource, action) → [`Decision`] for a bounded TTL.
pub struct DecisionCache {
    entries: DashMap<CacheKey, CachedEntry>,
    config: CacheConfig,
    hits: AtomicUsize,
    misses: AtomicUsize,
    expirations: AtomicUsize,
}

impl DecisionCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config,
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
            expirations: AtomicUsize::new(0),
        }
    }

    fn get(&self, key: &CacheKey) -> Option<Decision> {
        if let Some(entry) = self.entries.get(key) {
            if entry.is_expired(self.config.ttl) {
                drop(entry);
                self.entries.remove(key);
                self.expirations.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Some(entry.decision.clone());
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    fn put(&self, key: CacheKey, decision: Decision) {
        if self.entries.len() >= self.config.capacity {
            self.evict_slice();
        }
        self.entries.insert(key, CachedEntry::new(decision));
    }

    /// Drop expired entries, then up to a tenth of the map if still full.
    fn evict_slice(&self) {
        let ttl = self.config.ttl;
        self.entries.retain(|_, entry| !entry.is_expired(ttl));

        if self.entries.len() >= self.config.capacity {
            let target = self.config.capacity / 10;
            let mut removed = 0;
            self.entries.retain(|_, _| {
                if removed < target {
                    removed += 1;
                    false
                } else {
                    true
                }
            });
        }
    }

    /// Remove every cached decision for a principal
    pub fn invalidate_principal(&self, principal_id: &str) {
        self.entries.retain(|key, _| key.principal_id != principal_id);
        debug!(principal = principal_id, "cache invalidated for principal");
    }

    /// Remove every cached decision for a resource
    pub fn invalidate_resource(&self, resource_type: &str, resource_id: &str) {
        self.entries
            .retain(|key, _| key.resource_type != resource_type || key.resource_id != resource_id);
        debug!(
            resource = format_args!("{resource_type}:{resource_id}"),
            "cache invalidated for resource"
        );
    }

    /// Drop everything
    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            entries: self.entries.len(),
            capacity: self.config.capacity,
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub expirations: usize,
    pub entries: usize,
    pub capacity: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// [`AuthorizationEngine`] wrapped in a cache-check/cache-populate envelope.
///
/// Cache hits skip re-evaluation but are still independently audited with a
/// `cache_hit` annotation, so caching does not silently cost observability.
/// Administrative mutations pass through to the engine and then clear the
/// cache before returning, so no evaluation can observe a new policy next to
/// a stale cached decision.
pub struct CachedAuthorizer {
    engine: AuthorizationEngine,
    cache: DecisionCache,
}

impl CachedAuthorizer {
    pub fn new(engine: AuthorizationEngine, config: CacheConfig) -> Self {
        Self {
            engine,
            cache: DecisionCache::new(config),
        }
    }

    /// Authorize through the cache. `use_cache = false` forces a fresh
    /// evaluation (the result still replaces any cached entry).
    pub async fn authorize_cached(
        &self,
        principal: &Principal,
        resource: &ResourceRef,
        action: &str,
        context: &HashMap<String, Value>,
        use_cache: bool,
    ) -> Decision {
        let key = CacheKey::new(principal, resource, action);

        if use_cache {
            if let Some(decision) = self.cache.get(&key) {
                debug!(principal = %principal.id, action, "decision served from cache");
                self.audit_cache_hit(principal, resource, action, &decision);
                return decision;
            }
        }

        let decision = self.engine.authorize(principal, resource, action, context).await;
        self.cache.put(key, decision.clone());
        decision
    }

    fn audit_cache_hit(
        &self,
        principal: &Principal,
        resource: &ResourceRef,
        action: &str,
        decision: &Decision,
    ) {
        let ctx = crate::attributes::AuthorizationContext::new();
        self.engine.audit_pipeline().record(
            AuditEvent::for_decision(principal, resource, action, decision, &ctx, false, 0)
                .cached(),
        );
    }

    /// Remove cached decisions for one principal (role-assignment changes)
    pub fn invalidate_principal(&self, principal_id: &str) {
        self.cache.invalidate_principal(principal_id);
    }

    /// Remove cached decisions for one resource (related-policy changes)
    pub fn invalidate_resource(&self, resource_type: &str, resource_id: &str) {
        self.cache.invalidate_resource(resource_type, resource_id);
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// The wrapped engine, for uncached evaluation
    pub fn engine(&self) -> &AuthorizationEngine {
        &self.engine
    }

    // Administrative passthroughs. The engine does not track which
    // principals hold which role, so mutations clear the whole cache;
    // over-invalidation is safe where a stale allow is not.

    pub async fn add_policy(&self, policy: Policy) -> Result<()> {
        self.engine.add_policy(policy).await?;
        self.cache.clear();
        Ok(())
    }

    pub async fn update_policy(&self, policy: Policy) -> Result<()> {
        self.engine.update_policy(policy).await?;
        self.cache.clear();
        Ok(())
    }

    pub async fn remove_policy(&self, id: &str) -> Result<Policy> {
        let removed = self.engine.remove_policy(id).await?;
        self.cache.clear();
        Ok(removed)
    }

    pub async fn add_role(&self, role: Role) -> Result<()> {
        self.engine.add_role(role).await?;
        self.cache.clear();
        info!("decision cache cleared after role mutation");
        Ok(())
    }

    pub async fn update_role(&self, role: Role) -> Result<()> {
        self.engine.update_role(role).await?;
        self.cache.clear();
        info!("decision cache cleared after role mutation");
        Ok(())
    }

    pub async fn remove_role(&self, id: &str) -> Result<Role> {
        let removed = self.engine.remove_role(id).await?;
        self.cache.clear();
        info!("decision cache cleared after role mutation");
        Ok(removed)
    }
}
