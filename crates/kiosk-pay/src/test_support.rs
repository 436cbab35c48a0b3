//! Counting test doubles and a ready-made engine fixture.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::engine::SettlementEngine;
use crate::error::PayError;
use crate::ledger::{InMemoryLedger, SettlementLedger, SettlementRecord, SettlementStatus};
use crate::locator::OrderLocator;
use crate::notify::{BroadcastNotifier, SettlementEvent};
use crate::order::{InMemoryOrderSource, OrderKind, OrderSource, PendingOrder};

/// Order source that counts lookups and removals.
pub struct CountingSource {
    inner: InMemoryOrderSource,
    calls: AtomicUsize,
}

impl CountingSource {
    pub fn new(kind: OrderKind) -> Self {
        Self {
            inner: InMemoryOrderSource::new(kind),
            calls: AtomicUsize::new(0),
        }
    }

    /// Seed an order without counting it as an engine access.
    pub fn insert(&self, order: PendingOrder) -> Result<(), PayError> {
        self.inner.insert(order)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl OrderSource for CountingSource {
    fn kind(&self) -> OrderKind {
        self.inner.kind()
    }

    fn find(&self, id: &str) -> Result<Option<PendingOrder>, PayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.find(id)
    }

    fn remove(&self, id: &str) -> Result<bool, PayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.remove(id)
    }

    fn insert(&self, order: PendingOrder) -> Result<(), PayError> {
        self.inner.insert(order)
    }
}

/// Ledger that counts every call. Tests read state through `inner`.
#[derive(Default)]
pub struct CountingLedger {
    pub inner: InMemoryLedger,
    calls: AtomicUsize,
}

impl CountingLedger {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn hit(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

impl SettlementLedger for CountingLedger {
    fn get_by_order(&self, order_id: &str) -> Result<Option<SettlementRecord>, PayError> {
        self.hit();
        self.inner.get_by_order(order_id)
    }

    fn get(&self, id: &str) -> Result<Option<SettlementRecord>, PayError> {
        self.hit();
        self.inner.get(id)
    }

    fn insert_if_absent(&self, record: SettlementRecord) -> Result<bool, PayError> {
        self.hit();
        self.inner.insert_if_absent(record)
    }

    fn set_status(
        &self,
        id: &str,
        status: SettlementStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<SettlementRecord>, PayError> {
        self.hit();
        self.inner.set_status(id, status, at)
    }

    fn list(&self, limit: u32, offset: u32) -> Result<Vec<SettlementRecord>, PayError> {
        self.hit();
        self.inner.list(limit, offset)
    }

    fn clear(&self) -> Result<usize, PayError> {
        self.hit();
        self.inner.clear()
    }

    fn count(&self) -> Result<usize, PayError> {
        self.hit();
        self.inner.count()
    }
}

/// Ledger whose every call blocks for the given duration.
pub struct SlowLedger(pub Duration);

impl SlowLedger {
    fn wait(&self) {
        std::thread::sleep(self.0);
    }
}

impl SettlementLedger for SlowLedger {
    fn get_by_order(&self, _order_id: &str) -> Result<Option<SettlementRecord>, PayError> {
        self.wait();
        Ok(None)
    }

    fn get(&self, _id: &str) -> Result<Option<SettlementRecord>, PayError> {
        self.wait();
        Ok(None)
    }

    fn insert_if_absent(&self, _record: SettlementRecord) -> Result<bool, PayError> {
        self.wait();
        Ok(false)
    }

    fn set_status(
        &self,
        _id: &str,
        _status: SettlementStatus,
        _at: DateTime<Utc>,
    ) -> Result<Option<SettlementRecord>, PayError> {
        self.wait();
        Ok(None)
    }

    fn list(&self, _limit: u32, _offset: u32) -> Result<Vec<SettlementRecord>, PayError> {
        self.wait();
        Ok(vec![])
    }

    fn clear(&self) -> Result<usize, PayError> {
        self.wait();
        Ok(0)
    }

    fn count(&self) -> Result<usize, PayError> {
        self.wait();
        Ok(0)
    }
}

/// Ledger whose reads never see a record, as when another process settles
/// the order between this process's read and its insert. Writes go to `inner`.
#[derive(Default)]
pub struct StaleReadLedger {
    pub inner: InMemoryLedger,
}

impl SettlementLedger for StaleReadLedger {
    fn get_by_order(&self, _order_id: &str) -> Result<Option<SettlementRecord>, PayError> {
        Ok(None)
    }

    fn get(&self, id: &str) -> Result<Option<SettlementRecord>, PayError> {
        self.inner.get(id)
    }

    fn insert_if_absent(&self, record: SettlementRecord) -> Result<bool, PayError> {
        self.inner.insert_if_absent(record)
    }

    fn set_status(
        &self,
        id: &str,
        status: SettlementStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<SettlementRecord>, PayError> {
        self.inner.set_status(id, status, at)
    }

    fn list(&self, limit: u32, offset: u32) -> Result<Vec<SettlementRecord>, PayError> {
        self.inner.list(limit, offset)
    }

    fn clear(&self) -> Result<usize, PayError> {
        self.inner.clear()
    }

    fn count(&self) -> Result<usize, PayError> {
        self.inner.count()
    }
}

/// A paid record for `order`, as an earlier settlement would have stored it.
pub fn paid_record(id: &str, order: PendingOrder) -> SettlementRecord {
    let now = Utc::now();
    SettlementRecord {
        id: id.to_string(),
        order_id: order.id().to_string(),
        provider: crate::providers::Provider::Click,
        service_data: order,
        amount: 5000,
        status: SettlementStatus::Paid,
        date: now,
        created_at: now,
        updated_at: now,
    }
}

pub struct Fixture {
    pub engine: SettlementEngine,
    pub prints: Arc<CountingSource>,
    pub scans: Arc<CountingSource>,
    pub copies: Arc<CountingSource>,
    pub ledger: Arc<CountingLedger>,
    pub events: broadcast::Receiver<SettlementEvent>,
}

impl Fixture {
    /// Total locator accesses across all three sources.
    pub fn locator_calls(&self) -> usize {
        self.prints.calls() + self.scans.calls() + self.copies.calls()
    }
}

/// Engine over in-memory counting stores with a broadcast notifier.
pub fn fixture() -> Fixture {
    let prints = Arc::new(CountingSource::new(OrderKind::UploadedPrintJob));
    let scans = Arc::new(CountingSource::new(OrderKind::ScannedDocument));
    let copies = Arc::new(CountingSource::new(OrderKind::CopyRequest));
    let ledger = Arc::new(CountingLedger::default());
    let notifier = Arc::new(BroadcastNotifier::new(16));
    let events = notifier.subscribe();

    let sources: Vec<Arc<dyn OrderSource>> = vec![prints.clone(), scans.clone(), copies.clone()];
    let engine = SettlementEngine::new(OrderLocator::new(sources), ledger.clone())
        .with_notifier(notifier);

    Fixture {
        engine,
        prints,
        scans,
        copies,
        ledger,
        events,
    }
}
