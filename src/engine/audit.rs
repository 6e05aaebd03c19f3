//! Audit trail for authorization decisions and administrative mutations
//!
//! The engine enqueues records on an unbounded channel and returns; a drain
//! task feeds the configured [`AuditSink`]. A slow or failing sink costs the
//! authorize path nothing beyond the enqueue and never flips a decision.

use crate::attributes::AuthorizationContext;
use crate::error::Result;
use crate::types::{Decision, Principal, ResourceRef};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

/// One audited decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event id
    pub id: String,

    /// Event timestamp (milliseconds since epoch)
    pub timestamp: u64,

    /// Principal the decision was made for
    pub principal_id: String,

    /// Resource type requested
    pub resource_type: String,

    /// Resource id requested
    pub resource_id: String,

    /// Action requested
    pub action: String,

    /// Outcome
    pub authorized: bool,

    /// Policy id, `rbac:<permission>`, or `default-deny`
    pub source: String,

    /// Whether this decision was served from the cache
    pub cache_hit: bool,

    /// Whether an attribute provider faulted during evaluation
    pub degraded: bool,

    /// Evaluation latency in microseconds (zero for cache hits)
    pub latency_us: u64,

    /// Snapshot of the resolved context the decision was made against
    pub context: serde_json::Value,
}

impl AuditEvent {
    /// Build an event for a freshly evaluated decision.
    pub fn for_decision(
        principal: &Principal,
        resource: &ResourceRef,
        action: &str,
        decision: &Decision,
        ctx: &AuthorizationContext,
        degraded: bool,
        latency_us: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: decision.timestamp,
            principal_id: principal.id.clone(),
            resource_type: resource.resource_type.clone(),
            resource_id: resource.id.clone(),
            action: action.to_string(),
            authorized: decision.authorized,
            source: decision.source.clone(),
            cache_hit: false,
            degraded,
            latency_us,
            context: ctx.to_json(),
        }
    }

    /// Mark the event as served from cache.
    pub fn cached(mut self) -> Self {
        self.cache_hit = true;
        self.latency_us = 0;
        self
    }
}

/// One audited administrative mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditMutation {
    /// Unique event id
    pub id: String,

    /// Event timestamp (milliseconds since epoch)
    pub timestamp: u64,

    /// Operation performed: `add`, `update`, or `remove`
    pub operation: String,

    /// What was mutated: `role` or `policy`
    pub entity_kind: String,

    /// Id of the mutated role or policy
    pub entity_id: String,
}

impl AuditMutation {
    pub fn new(
        operation: impl Into<String>,
        entity_kind: impl Into<String>,
        entity_id: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now().timestamp_millis() as u64,
            operation: operation.into(),
            entity_kind: entity_kind.into(),
            entity_id: entity_id.into(),
        }
    }
}

/// Everything the trail carries: decisions and administrative mutations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditRecord {
    Decision(AuditEvent),
    Mutation(AuditMutation),
}

/// Append-only receiver for audit records.
///
/// Record failures are the sink's problem to report; the engine only logs
/// them. A sink backed by durable storage handles its own batching.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, record: AuditRecord) -> Result<()>;
}

/// Buffers records in memory. Suitable for tests and introspection.
#[derive(Default)]
pub struct MemoryAuditSink {
    records: RwLock<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far
    pub async fn records(&self) -> Vec<AuditRecord> {
        self.records.read().await.clone()
    }

    /// Just the decision events, in arrival order
    pub async fn decisions(&self) -> Vec<AuditEvent> {
        self.records
            .read()
            .await
            .iter()
            .filter_map(|record| match record {
                AuditRecord::Decision(event) => Some(event.clone()),
                AuditRecord::Mutation(_) => None,
            })
            .collect()
    }

    /// Just the mutation events, in arrival order
    pub async fn mutations(&self) -> Vec<AuditMutation> {
        self.records
            .read()
            .await
            .iter()
            .filter_map(|record| match record {
                AuditRecord::Mutation(mutation) => Some(mutation.clone()),
                AuditRecord::Decision(_) => None,
            })
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, record: AuditRecord) -> Result<()> {
        self.records.write().await.push(record);
        Ok(())
    }
}

/// Emits each record as a structured tracing event. The default sink.
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, record: AuditRecord) -> Result<()> {
        match record {
            AuditRecord::Decision(event) => info!(
                target: "castellan::audit",
                principal = %event.principal_id,
                resource = format_args!("{}:{}", event.resource_type, event.resource_id),
                action = %event.action,
                authorized = event.authorized,
                source = %event.source,
                cache_hit = event.cache_hit,
                degraded = event.degraded,
                "authorization decision"
            ),
            AuditRecord::Mutation(mutation) => info!(
                target: "castellan::audit",
                operation = %mutation.operation,
                entity = format_args!("{}:{}", mutation.entity_kind, mutation.entity_id),
                "administrative mutation"
            ),
        }
        Ok(())
    }
}

/// Cloneable fire-and-forget handle the engine records through.
#[derive(Clone)]
pub struct AuditPipeline {
    tx: mpsc::UnboundedSender<AuditRecord>,
}

impl AuditPipeline {
    /// Spawn the drain task for `sink` and return the sending handle.
    ///
    /// Must be called within a Tokio runtime.
    pub fn spawn(sink: Arc<dyn AuditSink>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<AuditRecord>();
        tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                if let Err(err) = sink.record(record).await {
                    warn!(error = %err, "audit delivery failed; decision unaffected");
                }
            }
        });
        Self { tx }
    }

    /// Enqueue a decision event. Never blocks, never fails the caller.
    pub fn record(&self, event: AuditEvent) {
        self.send(AuditRecord::Decision(event));
    }

    /// Enqueue an administrative mutation event.
    pub fn record_mutation(&self, mutation: AuditMutation) {
        self.send(AuditRecord::Mutation(mutation));
    }

    fn send(&self, record: AuditRecord) {
        if self.tx.send(record).is_err() {
            warn!("audit pipeline closed; record dropped");
        }
    }
}
