//! Provider-agnostic settlement protocol.
//!
//! [`SettlementEngine::prepare`] answers "may this order be paid?" without
//! touching state. [`SettlementEngine::complete`] turns a pending order into
//! exactly one [`SettlementRecord`]:
//!
//! 1. A non-zero upstream error short-circuits to [`Outcome::Cancelled`].
//! 2. A per-order async mutex serializes completes for the same order id.
//! 3. The ledger and the order locator are read together:
//!    - record and order both present: an earlier complete stored the record
//!      but failed to remove the order. Only the removal is retried.
//!    - record only: [`Outcome::AlreadyPaid`].
//!    - neither: [`Outcome::OrderNotFound`].
//!    - order only: [`SettlementLedger::insert_if_absent`] decides the winner.
//!
//! The per-order lock covers this process only. The ledger's uniqueness
//! constraint is what guarantees at-most-once settlement.
//!
//! Every storage call runs on tokio's blocking pool under a timeout.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::error::PayError;
use crate::ledger::{SettlementLedger, SettlementRecord, SettlementStatus};
use crate::locator::OrderLocator;
use crate::notify::{NoopNotifier, SettlementEvent, SettlementNotifier};
use crate::order::PendingOrder;
use crate::providers::Provider;

/// Default bound on a single storage call.
pub const DEFAULT_STORAGE_TIMEOUT: Duration = Duration::from_millis(5000);

/// Upper bound for [`SettlementEngine::list`].
pub const MAX_LIST_LIMIT: u32 = 500;

/// How the settlement id is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdPolicy {
    /// Reuse the order id. For providers that expect a client-supplied transaction id.
    OrderId,
    /// Fresh UUID v4.
    Generated,
}

/// A complete call, already authenticated and parsed by an adapter.
#[derive(Debug, Clone)]
pub struct Completion {
    pub provider: Provider,
    pub order_id: String,
    pub amount: i64,
    /// Provider-reported failure. `Some(0)` means none.
    pub upstream_error: Option<i64>,
    pub id_policy: IdPolicy,
}

/// Generic protocol result, translated by each adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Allow,
    OrderNotFound,
    AlreadyPaid,
    Cancelled {
        code: i64,
    },
    Settled {
        id: String,
        order_id: String,
        settled_at: DateTime<Utc>,
    },
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Allow => "allow",
            Outcome::OrderNotFound => "order_not_found",
            Outcome::AlreadyPaid => "already_paid",
            Outcome::Cancelled { .. } => "cancelled",
            Outcome::Settled { .. } => "settled",
        }
    }
}

/// Run a synchronous storage call on the blocking pool, bounded by `timeout`.
///
/// The call itself cannot be cancelled; on timeout it finishes in the
/// background and its result is dropped.
pub async fn run_blocking<T, F>(timeout: Duration, f: F) -> Result<T, PayError>
where
    F: FnOnce() -> Result<T, PayError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::time::timeout(timeout, tokio::task::spawn_blocking(f)).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(PayError::Storage(format!("storage task failed: {e}"))),
        Err(_) => Err(PayError::Timeout(timeout.as_millis() as u64)),
    }
}

/// Drives prepare/complete against an order locator and a settlement ledger.
pub struct SettlementEngine {
    locator: OrderLocator,
    ledger: Arc<dyn SettlementLedger>,
    notifier: Arc<dyn SettlementNotifier>,
    /// Per-order mutex serializing completes for one order id.
    order_locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    storage_timeout: Duration,
}

impl SettlementEngine {
    /// Maximum number of live per-order locks.
    const MAX_ORDER_LOCKS: usize = 100_000;

    pub fn new(locator: OrderLocator, ledger: Arc<dyn SettlementLedger>) -> Self {
        Self {
            locator,
            ledger,
            notifier: Arc::new(NoopNotifier),
            order_locks: Arc::new(DashMap::new()),
            storage_timeout: DEFAULT_STORAGE_TIMEOUT,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn SettlementNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_storage_timeout(mut self, timeout: Duration) -> Self {
        self.storage_timeout = timeout;
        self
    }

    pub fn locator(&self) -> &OrderLocator {
        &self.locator
    }

    pub fn ledger(&self) -> &Arc<dyn SettlementLedger> {
        &self.ledger
    }

    /// Spawn a background task that drops idle per-order locks every 60 seconds.
    ///
    /// `complete` releases its own entry when it is the last user, so this
    /// only reclaims entries left behind by cancelled calls.
    pub fn start_lock_cleanup(&self) {
        let order_locks = Arc::clone(&self.order_locks);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                // A lock is idle only if nobody holds a clone and nobody holds the mutex.
                let before = order_locks.len();
                order_locks.retain(|_, lock| Arc::strong_count(lock) > 1 || lock.try_lock().is_err());
                let removed = before - order_locks.len();
                if removed > 0 {
                    tracing::info!(removed, "cleaned up idle order locks");
                }
            }
        });
    }

    fn order_lock(&self, order_id: &str) -> Result<Arc<Mutex<()>>, PayError> {
        // len() and entry() are not atomic; the cap may overshoot by the worker count.
        if self.order_locks.len() >= Self::MAX_ORDER_LOCKS && !self.order_locks.contains_key(order_id)
        {
            return Err(PayError::Storage(
                "too many concurrent order locks".to_string(),
            ));
        }
        Ok(self
            .order_locks
            .entry(order_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone())
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, PayError>
    where
        F: FnOnce() -> Result<T, PayError> + Send + 'static,
        T: Send + 'static,
    {
        run_blocking(self.storage_timeout, f).await
    }

    /// Read-only check that `order_id` is payable.
    pub async fn prepare(
        &self,
        provider: Provider,
        order_id: &str,
        amount: i64,
    ) -> Result<Outcome, PayError> {
        let locator = self.locator.clone();
        let id = order_id.to_string();
        let found = self.blocking(move || locator.locate(&id)).await?;

        let outcome = match found {
            Some(order) => {
                tracing::info!(
                    %provider,
                    order_id = %order_id,
                    kind = %order.kind(),
                    amount,
                    "prepare: order payable"
                );
                Outcome::Allow
            }
            None => {
                tracing::info!(%provider, order_id = %order_id, "prepare: order not found");
                Outcome::OrderNotFound
            }
        };
        Ok(outcome)
    }

    /// Settle an order at most once.
    pub async fn complete(&self, request: Completion) -> Result<Outcome, PayError> {
        let Completion {
            provider,
            order_id,
            amount,
            upstream_error,
            id_policy,
        } = request;

        if let Some(code) = upstream_error.filter(|c| *c != 0) {
            tracing::info!(%provider, order_id = %order_id, code, "complete: cancelled upstream");
            return Ok(Outcome::Cancelled { code });
        }

        let lock = self.order_lock(&order_id)?;
        let outcome = {
            let _guard = lock.lock().await;
            self.complete_locked(provider, &order_id, amount, id_policy)
                .await
        };
        self.release_lock(&order_id, lock);
        outcome
    }

    /// Drop the order's lock entry unless another task holds a clone of it.
    fn release_lock(&self, order_id: &str, lock: Arc<Mutex<()>>) {
        // One reference in the map, one in `lock`.
        self.order_locks
            .remove_if(order_id, |_, entry| Arc::strong_count(entry) <= 2);
        drop(lock);
    }

    async fn complete_locked(
        &self,
        provider: Provider,
        order_id: &str,
        amount: i64,
        id_policy: IdPolicy,
    ) -> Result<Outcome, PayError> {
        let (existing, pending) = {
            let ledger = Arc::clone(&self.ledger);
            let locator = self.locator.clone();
            let id = order_id.to_string();
            // Order first: a settlement is always stored before its order is removed.
            self.blocking(move || {
                let pending = locator.locate(&id)?;
                Ok((ledger.get_by_order(&id)?, pending))
            })
            .await?
        };

        match (existing, pending) {
            (Some(record), Some(order)) => {
                tracing::warn!(
                    %provider,
                    order_id = %order_id,
                    settlement_id = %record.id,
                    "complete: settled order still pending, retrying removal"
                );
                self.remove_order(order).await?;
                Ok(Outcome::Settled {
                    id: record.id,
                    order_id: record.order_id,
                    settled_at: record.date,
                })
            }
            (Some(record), None) => {
                tracing::info!(
                    %provider,
                    order_id = %order_id,
                    settlement_id = %record.id,
                    "complete: already paid"
                );
                Ok(Outcome::AlreadyPaid)
            }
            (None, None) => {
                tracing::info!(%provider, order_id = %order_id, "complete: order not found");
                Ok(Outcome::OrderNotFound)
            }
            (None, Some(order)) => self.settle(provider, order, amount, id_policy).await,
        }
    }

    async fn settle(
        &self,
        provider: Provider,
        order: PendingOrder,
        amount: i64,
        id_policy: IdPolicy,
    ) -> Result<Outcome, PayError> {
        let now = Utc::now();
        let order_id = order.id().to_string();
        let id = match id_policy {
            IdPolicy::OrderId => order_id.clone(),
            IdPolicy::Generated => uuid::Uuid::new_v4().to_string(),
        };
        let record = SettlementRecord {
            id: id.clone(),
            order_id: order_id.clone(),
            provider,
            service_data: order.clone(),
            amount,
            status: SettlementStatus::Paid,
            date: now,
            created_at: now,
            updated_at: now,
        };

        let ledger = Arc::clone(&self.ledger);
        if !self.blocking(move || ledger.insert_if_absent(record)).await? {
            tracing::info!(%provider, order_id = %order_id, "complete: lost settlement race");
            return Ok(Outcome::AlreadyPaid);
        }

        if let Err(e) = self.remove_order(order).await {
            tracing::error!(
                %provider,
                order_id = %order_id,
                error = %e,
                "order settled but not removed; next delivery retries removal"
            );
        }

        tracing::info!(
            %provider,
            order_id = %order_id,
            settlement_id = %id,
            amount,
            "complete: settled"
        );
        self.notifier.notify(&SettlementEvent {
            id: id.clone(),
            order_id: order_id.clone(),
            status: SettlementStatus::Paid,
        });

        Ok(Outcome::Settled {
            id,
            order_id,
            settled_at: now,
        })
    }

    async fn remove_order(&self, order: PendingOrder) -> Result<bool, PayError> {
        let locator = self.locator.clone();
        self.blocking(move || locator.remove(&order)).await
    }

    /// Manual status override. Emits a [`SettlementEvent`].
    pub async fn set_status(
        &self,
        settlement_id: &str,
        status: SettlementStatus,
    ) -> Result<SettlementRecord, PayError> {
        let ledger = Arc::clone(&self.ledger);
        let id = settlement_id.to_string();
        let updated = self
            .blocking(move || ledger.set_status(&id, status, Utc::now()))
            .await?
            .ok_or_else(|| PayError::NotFound(format!("settlement {settlement_id}")))?;

        tracing::info!(settlement_id = %updated.id, status = %status, "settlement status changed");
        self.notifier.notify(&SettlementEvent {
            id: updated.id.clone(),
            order_id: updated.order_id.clone(),
            status,
        });
        Ok(updated)
    }

    /// Delete every settlement. Returns the number removed.
    pub async fn clear(&self) -> Result<usize, PayError> {
        let ledger = Arc::clone(&self.ledger);
        let removed = self.blocking(move || ledger.clear()).await?;
        tracing::warn!(removed, "settlement ledger cleared");
        Ok(removed)
    }

    /// Settlements, newest first. `limit` is clamped to `1..=MAX_LIST_LIMIT`.
    pub async fn list(&self, limit: u32, offset: u32) -> Result<Vec<SettlementRecord>, PayError> {
        let ledger = Arc::clone(&self.ledger);
        let limit = limit.clamp(1, MAX_LIST_LIMIT);
        self.blocking(move || ledger.list(limit, offset)).await
    }

    /// Ledger reachability probe for health checks.
    pub async fn ping(&self) -> Result<(), PayError> {
        let ledger = Arc::clone(&self.ledger);
        self.blocking(move || ledger.count().map(|_| ())).await
    }
}
