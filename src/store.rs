//! Persistence interfaces consumed by the pipeline, with in-memory
//! reference implementations.
//!
//! The production system backs these traits with its relational store. The
//! in-memory implementations carry the same contracts (including the atomic
//! per-order attempt counter) and are what the tests and local tooling run
//! against.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::types::{SuggestedCode, ValidationStatus};

/// Errors from the backing store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Store operation failed: {0}")]
    OperationFailed(String),
}

// ============================================================================
// Orders
// ============================================================================

/// Lifecycle status of an order as this pipeline sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    PendingValidation,
    Validated,
    Cancelled,
}

/// Minimal order row; the full order model belongs to the outer system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub organization_id: i64,
    pub created_by: i64,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

/// Order rows the pipeline needs: draft bootstrap and lookup.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Create a minimal draft order (status `PendingValidation`) so every
    /// attempt is anchored to an order id.
    async fn create_draft(&self, user_id: i64, organization_id: i64) -> Result<i64, StoreError>;

    async fn get(&self, order_id: i64) -> Result<Option<Order>, StoreError>;
}

/// In-memory order store with sequential ids.
#[derive(Default)]
pub struct InMemoryOrderStore {
    next_id: AtomicI64,
    orders: RwLock<HashMap<i64, Order>>,
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn create_draft(&self, user_id: i64, organization_id: i64) -> Result<i64, StoreError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let order = Order {
            id,
            organization_id,
            created_by: user_id,
            status: OrderStatus::PendingValidation,
            created_at: Utc::now(),
        };
        self.orders.write().await.insert(id, order);
        tracing::info!("Bootstrapped draft order {} for user {}", id, user_id);
        Ok(id)
    }

    async fn get(&self, order_id: i64) -> Result<Option<Order>, StoreError> {
        Ok(self.orders.read().await.get(&order_id).cloned())
    }
}

// ============================================================================
// Validation attempts
// ============================================================================

/// One persisted validation attempt. Append-only: rows are never mutated or
/// deleted — this is the audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationAttempt {
    pub id: Uuid,
    pub order_id: i64,
    /// Monotonically increasing per order, starting at 1.
    pub attempt_number: u32,
    /// The sanitized (post-redaction) dictation that was validated.
    pub input_text: String,
    pub status: ValidationStatus,
    pub compliance_score: f64,
    pub diagnosis_codes: Vec<SuggestedCode>,
    pub procedure_codes: Vec<SuggestedCode>,
    pub user_id: i64,
    pub created_at: DateTime<Utc>,
}

/// Attempt bookkeeping: number reservation and append-only recording.
#[async_trait]
pub trait AttemptStore: Send + Sync {
    /// Atomically reserve the next attempt number for an order.
    ///
    /// Two concurrent validations of the same order must receive distinct
    /// numbers — the counter is read-and-incremented under one lock (a
    /// database sequence or serializable transaction in production).
    async fn reserve_attempt_number(&self, order_id: i64) -> Result<u32, StoreError>;

    async fn record_attempt(&self, attempt: ValidationAttempt) -> Result<(), StoreError>;

    async fn attempts_for_order(&self, order_id: i64) -> Result<Vec<ValidationAttempt>, StoreError>;
}

/// In-memory attempt store with per-order counters.
#[derive(Default)]
pub struct InMemoryAttemptStore {
    counters: Mutex<HashMap<i64, u32>>,
    attempts: RwLock<Vec<ValidationAttempt>>,
}

impl InMemoryAttemptStore {
    /// Seed the counter for an order that already has historical attempts.
    pub async fn seed_counter(&self, order_id: i64, highest_attempt: u32) {
        self.counters.lock().await.insert(order_id, highest_attempt);
    }
}

#[async_trait]
impl AttemptStore for InMemoryAttemptStore {
    async fn reserve_attempt_number(&self, order_id: i64) -> Result<u32, StoreError> {
        let mut counters = self.counters.lock().await;
        let next = counters.get(&order_id).copied().unwrap_or(0) + 1;
        counters.insert(order_id, next);
        Ok(next)
    }

    async fn record_attempt(&self, attempt: ValidationAttempt) -> Result<(), StoreError> {
        self.attempts.write().await.push(attempt);
        Ok(())
    }

    async fn attempts_for_order(&self, order_id: i64) -> Result<Vec<ValidationAttempt>, StoreError> {
        Ok(self
            .attempts
            .read()
            .await
            .iter()
            .filter(|a| a.order_id == order_id)
            .cloned()
            .collect())
    }
}

// ============================================================================
// Model usage records
// ============================================================================

/// Usage accounting for one backend call, written whether or not the call
/// succeeded and independent of whether interpretation later succeeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelUsageRecord {
    pub id: Uuid,
    pub provider: String,
    pub model: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub latency_ms: u64,
    pub succeeded: bool,
    pub recorded_at: DateTime<Utc>,
}

#[async_trait]
pub trait UsageStore: Send + Sync {
    async fn record_usage(&self, record: ModelUsageRecord) -> Result<(), StoreError>;
}

/// In-memory usage store.
#[derive(Default)]
pub struct InMemoryUsageStore {
    records: RwLock<Vec<ModelUsageRecord>>,
}

impl InMemoryUsageStore {
    pub async fn records(&self) -> Vec<ModelUsageRecord> {
        self.records.read().await.clone()
    }
}

#[async_trait]
impl UsageStore for InMemoryUsageStore {
    async fn record_usage(&self, record: ModelUsageRecord) -> Result<(), StoreError> {
        self.records.write().await.push(record);
        Ok(())
    }
}
