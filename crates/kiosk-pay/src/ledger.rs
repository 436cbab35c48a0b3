//! Settlement ledger: at most one settlement record per order id.
//!
//! Uniqueness is enforced by the storage layer itself
//! ([`SettlementLedger::insert_if_absent`]), never by a preceding read.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::PayError;
use crate::order::PendingOrder;
use crate::providers::Provider;

/// Settlement status. `cancelled` is only reachable through the admin override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementStatus {
    Paid,
    Cancelled,
}

impl SettlementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementStatus::Paid => "paid",
            SettlementStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for SettlementStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SettlementStatus {
    type Err = PayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "paid" => Ok(SettlementStatus::Paid),
            "cancelled" => Ok(SettlementStatus::Cancelled),
            other => Err(PayError::Storage(format!("unknown settlement status: {other}"))),
        }
    }
}

/// The durable record of a settled order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementRecord {
    pub id: String,
    pub order_id: String,
    pub provider: Provider,
    /// Snapshot of the pending order at settlement time.
    pub service_data: PendingOrder,
    /// Amount as received from the provider, in that provider's unit.
    pub amount: i64,
    pub status: SettlementStatus,
    pub date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Trait for settlement storage backends.
///
/// Implementations must be thread-safe (`Send + Sync`).
pub trait SettlementLedger: Send + Sync {
    /// Fetch the settlement for an order, if any.
    fn get_by_order(&self, order_id: &str) -> Result<Option<SettlementRecord>, PayError>;

    /// Fetch a settlement by its own id.
    fn get(&self, id: &str) -> Result<Option<SettlementRecord>, PayError>;

    /// Atomically store `record` unless a settlement with the same order id
    /// (or the same settlement id) already exists.
    /// Returns `true` if this call created it, `false` if it lost to an existing record.
    fn insert_if_absent(&self, record: SettlementRecord) -> Result<bool, PayError>;

    /// Override a settlement's status. Returns the updated record, or `None`
    /// if no settlement has that id.
    fn set_status(
        &self,
        id: &str,
        status: SettlementStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<SettlementRecord>, PayError>;

    /// Settlements, newest first.
    fn list(&self, limit: u32, offset: u32) -> Result<Vec<SettlementRecord>, PayError>;

    /// Delete every settlement. Returns the number removed.
    fn clear(&self) -> Result<usize, PayError>;

    fn count(&self) -> Result<usize, PayError>;
}

/// In-memory ledger backed by DashMap. Lost on restart.
pub struct InMemoryLedger {
    by_order: DashMap<String, SettlementRecord>,
    order_by_id: DashMap<String, String>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self {
            by_order: DashMap::new(),
            order_by_id: DashMap::new(),
        }
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl SettlementLedger for InMemoryLedger {
    fn get_by_order(&self, order_id: &str) -> Result<Option<SettlementRecord>, PayError> {
        Ok(self.by_order.get(order_id).map(|r| r.value().clone()))
    }

    fn get(&self, id: &str) -> Result<Option<SettlementRecord>, PayError> {
        let order_id = match self.order_by_id.get(id) {
            Some(o) => o.value().clone(),
            None => return Ok(None),
        };
        self.get_by_order(&order_id)
    }

    fn insert_if_absent(&self, record: SettlementRecord) -> Result<bool, PayError> {
        use dashmap::mapref::entry::Entry;

        // The order-id entry lock is held while the id index is claimed, so
        // two writers for the same order can never both reach the insert.
        match self.by_order.entry(record.order_id.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(order_slot) => match self.order_by_id.entry(record.id.clone()) {
                Entry::Occupied(_) => Ok(false),
                Entry::Vacant(id_slot) => {
                    id_slot.insert(record.order_id.clone());
                    order_slot.insert(record);
                    Ok(true)
                }
            },
        }
    }

    fn set_status(
        &self,
        id: &str,
        status: SettlementStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<SettlementRecord>, PayError> {
        let order_id = match self.order_by_id.get(id) {
            Some(o) => o.value().clone(),
            None => return Ok(None),
        };
        Ok(self.by_order.get_mut(&order_id).map(|mut r| {
            r.status = status;
            r.updated_at = at;
            r.value().clone()
        }))
    }

    fn list(&self, limit: u32, offset: u32) -> Result<Vec<SettlementRecord>, PayError> {
        let mut all: Vec<SettlementRecord> =
            self.by_order.iter().map(|r| r.value().clone()).collect();
        all.sort_by(|a, b| b.date.cmp(&a.date).then_with(|| a.id.cmp(&b.id)));
        Ok(all
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    fn clear(&self) -> Result<usize, PayError> {
        let before = self.by_order.len();
        self.by_order.clear();
        self.order_by_id.clear();
        Ok(before)
    }

    fn count(&self) -> Result<usize, PayError> {
        Ok(self.by_order.len())
    }
}

/// Persistent ledger backed by SQLite. `id` is the primary key and `order_id`
/// carries a UNIQUE constraint; a constraint violation on insert means the
/// caller lost the race.
#[cfg(feature = "sqlite")]
pub struct SqliteLedger {
    db: crate::db::SqliteDb,
}

#[cfg(feature = "sqlite")]
impl SqliteLedger {
    pub fn new(db: crate::db::SqliteDb) -> Self {
        Self { db }
    }
}

#[cfg(feature = "sqlite")]
const SELECT_COLUMNS: &str =
    "SELECT id, order_id, provider, service_data, status, amount, date, created_at, updated_at FROM settlements";

#[cfg(feature = "sqlite")]
struct RawRow {
    id: String,
    order_id: String,
    provider: String,
    service_data: String,
    status: String,
    amount: i64,
    date: i64,
    created_at: i64,
    updated_at: i64,
}

#[cfg(feature = "sqlite")]
impl RawRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            order_id: row.get(1)?,
            provider: row.get(2)?,
            service_data: row.get(3)?,
            status: row.get(4)?,
            amount: row.get(5)?,
            date: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    fn into_record(self) -> Result<SettlementRecord, PayError> {
        Ok(SettlementRecord {
            id: self.id,
            order_id: self.order_id,
            provider: self.provider.parse()?,
            service_data: serde_json::from_str(&self.service_data)?,
            status: self.status.parse()?,
            amount: self.amount,
            date: from_millis(self.date)?,
            created_at: from_millis(self.created_at)?,
            updated_at: from_millis(self.updated_at)?,
        })
    }
}

#[cfg(feature = "sqlite")]
fn from_millis(ms: i64) -> Result<DateTime<Utc>, PayError> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| PayError::Storage(format!("timestamp out of range: {ms}")))
}

#[cfg(feature = "sqlite")]
impl SqliteLedger {
    fn query_one(
        &self,
        sql: &str,
        key: &str,
    ) -> Result<Option<SettlementRecord>, PayError> {
        use rusqlite::OptionalExtension;

        let conn = self.db.lock();
        let raw = conn.query_row(sql, [key], RawRow::read).optional()?;
        drop(conn);
        raw.map(RawRow::into_record).transpose()
    }
}

#[cfg(feature = "sqlite")]
impl SettlementLedger for SqliteLedger {
    fn get_by_order(&self, order_id: &str) -> Result<Option<SettlementRecord>, PayError> {
        self.query_one(&format!("{SELECT_COLUMNS} WHERE order_id = ?1"), order_id)
    }

    fn get(&self, id: &str) -> Result<Option<SettlementRecord>, PayError> {
        self.query_one(&format!("{SELECT_COLUMNS} WHERE id = ?1"), id)
    }

    fn insert_if_absent(&self, record: SettlementRecord) -> Result<bool, PayError> {
        let service_data = serde_json::to_string(&record.service_data)?;
        let conn = self.db.lock();
        let result = conn.execute(
            "INSERT INTO settlements (id, order_id, provider, service_data, status, amount, date, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                record.id,
                record.order_id,
                record.provider.as_str(),
                service_data,
                record.status.as_str(),
                record.amount,
                record.date.timestamp_millis(),
                record.created_at.timestamp_millis(),
                record.updated_at.timestamp_millis(),
            ],
        );
        match result {
            Ok(_) => Ok(true),
            Err(e) if crate::error::is_constraint_violation(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn set_status(
        &self,
        id: &str,
        status: SettlementStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<SettlementRecord>, PayError> {
        let changed = {
            let conn = self.db.lock();
            conn.execute(
                "UPDATE settlements SET status = ?1, updated_at = ?2 WHERE id = ?3",
                rusqlite::params![status.as_str(), at.timestamp_millis(), id],
            )?
        };
        if changed == 0 {
            return Ok(None);
        }
        self.get(id)
    }

    fn list(&self, limit: u32, offset: u32) -> Result<Vec<SettlementRecord>, PayError> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare(&format!(
            "{SELECT_COLUMNS} ORDER BY date DESC, id ASC LIMIT ?1 OFFSET ?2"
        ))?;
        let rows = stmt
            .query_map(rusqlite::params![limit, offset], RawRow::read)?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);
        drop(conn);
        rows.into_iter().map(RawRow::into_record).collect()
    }

    fn clear(&self) -> Result<usize, PayError> {
        let conn = self.db.lock();
        Ok(conn.execute("DELETE FROM settlements", [])?)
    }

    fn count(&self) -> Result<usize, PayError> {
        let conn = self.db.lock();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM settlements", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::fixtures::print_job;
    use std::sync::Arc;

    fn record(id: &str, order_id: &str) -> SettlementRecord {
        let now = Utc::now();
        SettlementRecord {
            id: id.to_string(),
            order_id: order_id.to_string(),
            provider: Provider::Click,
            service_data: print_job(order_id),
            amount: 5000,
            status: SettlementStatus::Paid,
            date: now,
            created_at: now,
            updated_at: now,
        }
    }

    fn exercise_insert_if_absent(ledger: &dyn SettlementLedger) {
        assert!(ledger.insert_if_absent(record("s-1", "ABC123")).unwrap());
        // Same order, different settlement id: rejected.
        assert!(!ledger.insert_if_absent(record("s-2", "ABC123")).unwrap());
        // Same settlement id, different order: rejected.
        assert!(!ledger.insert_if_absent(record("s-1", "OTHER")).unwrap());
        assert_eq!(ledger.count().unwrap(), 1);

        let stored = ledger.get_by_order("ABC123").unwrap().unwrap();
        assert_eq!(stored.id, "s-1");
        assert_eq!(stored.amount, 5000);
        assert_eq!(ledger.get("s-1").unwrap().unwrap().order_id, "ABC123");
        assert!(ledger.get("s-2").unwrap().is_none());
    }

    fn exercise_status_and_clear(ledger: &dyn SettlementLedger) {
        ledger.insert_if_absent(record("s-1", "A")).unwrap();
        ledger.insert_if_absent(record("s-2", "B")).unwrap();

        let updated = ledger
            .set_status("s-2", SettlementStatus::Cancelled, Utc::now())
            .unwrap()
            .unwrap();
        assert_eq!(updated.status, SettlementStatus::Cancelled);
        assert!(ledger
            .set_status("missing", SettlementStatus::Paid, Utc::now())
            .unwrap()
            .is_none());

        assert_eq!(ledger.list(10, 0).unwrap().len(), 2);
        assert_eq!(ledger.list(1, 1).unwrap().len(), 1);
        assert_eq!(ledger.clear().unwrap(), 2);
        assert_eq!(ledger.count().unwrap(), 0);
    }

    #[test]
    fn test_in_memory_insert_if_absent() {
        exercise_insert_if_absent(&InMemoryLedger::new());
    }

    #[test]
    fn test_in_memory_status_and_clear() {
        exercise_status_and_clear(&InMemoryLedger::new());
    }

    #[test]
    fn test_in_memory_concurrent_inserts_single_winner() {
        let ledger = Arc::new(InMemoryLedger::new());
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let ledger = Arc::clone(&ledger);
                std::thread::spawn(move || {
                    ledger
                        .insert_if_absent(record(&format!("s-{i}"), "RACE"))
                        .unwrap()
                })
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(ledger.count().unwrap(), 1);
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn test_sqlite_insert_if_absent() {
        let db = crate::db::SqliteDb::open_in_memory().unwrap();
        exercise_insert_if_absent(&SqliteLedger::new(db));
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn test_sqlite_status_and_clear() {
        let db = crate::db::SqliteDb::open_in_memory().unwrap();
        exercise_status_and_clear(&SqliteLedger::new(db));
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn test_sqlite_ledger_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");
        let path = path.to_str().unwrap();

        {
            let ledger = SqliteLedger::new(crate::db::SqliteDb::open(path).unwrap());
            assert!(ledger.insert_if_absent(record("s-1", "ABC123")).unwrap());
        }

        // A fresh handle still sees the record and still refuses a second one.
        let ledger = SqliteLedger::new(crate::db::SqliteDb::open(path).unwrap());
        let stored = ledger.get_by_order("ABC123").unwrap().unwrap();
        assert_eq!(stored.service_data.id(), "ABC123");
        assert_eq!(stored.status, SettlementStatus::Paid);
        assert!(!ledger.insert_if_absent(record("s-9", "ABC123")).unwrap());
    }
}
