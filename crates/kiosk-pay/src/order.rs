//! Pending service orders awaiting payment.
//!
//! Orders are produced upstream (upload, scan and copy-code flows) and are
//! only read and deleted here. Each kind lives in its own [`OrderSource`].

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::PayError;

/// Who queued the order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Owner {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kiosk_id: Option<String>,
}

/// A file uploaded for printing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedPrintJob {
    pub id: String,
    pub owner: Owner,
    pub file_name: String,
    pub page_count: u32,
    pub copies: u32,
    pub created_at: DateTime<Utc>,
}

/// A document scanned at a kiosk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScannedDocument {
    pub id: String,
    pub owner: Owner,
    pub file_name: String,
    pub page_count: u32,
    pub created_at: DateTime<Utc>,
}

/// A copy-code request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyRequest {
    pub id: String,
    pub owner: Owner,
    pub code: String,
    pub created_at: DateTime<Utc>,
}

/// Order kinds, in locator priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    UploadedPrintJob,
    ScannedDocument,
    CopyRequest,
}

impl OrderKind {
    /// Fixed search priority used by the order locator.
    pub const PRIORITY: [OrderKind; 3] = [
        OrderKind::UploadedPrintJob,
        OrderKind::ScannedDocument,
        OrderKind::CopyRequest,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderKind::UploadedPrintJob => "uploaded_print_job",
            OrderKind::ScannedDocument => "scanned_document",
            OrderKind::CopyRequest => "copy_request",
        }
    }

    #[cfg(feature = "sqlite")]
    fn table(&self) -> &'static str {
        match self {
            OrderKind::UploadedPrintJob => "uploaded_print_jobs",
            OrderKind::ScannedDocument => "scanned_documents",
            OrderKind::CopyRequest => "copy_requests",
        }
    }
}

impl std::fmt::Display for OrderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A queued, unpaid service request. The `kind` tag selects the variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PendingOrder {
    UploadedPrintJob(UploadedPrintJob),
    ScannedDocument(ScannedDocument),
    CopyRequest(CopyRequest),
}

impl PendingOrder {
    pub fn id(&self) -> &str {
        match self {
            PendingOrder::UploadedPrintJob(o) => &o.id,
            PendingOrder::ScannedDocument(o) => &o.id,
            PendingOrder::CopyRequest(o) => &o.id,
        }
    }

    pub fn kind(&self) -> OrderKind {
        match self {
            PendingOrder::UploadedPrintJob(_) => OrderKind::UploadedPrintJob,
            PendingOrder::ScannedDocument(_) => OrderKind::ScannedDocument,
            PendingOrder::CopyRequest(_) => OrderKind::CopyRequest,
        }
    }

    pub fn owner(&self) -> &Owner {
        match self {
            PendingOrder::UploadedPrintJob(o) => &o.owner,
            PendingOrder::ScannedDocument(o) => &o.owner,
            PendingOrder::CopyRequest(o) => &o.owner,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            PendingOrder::UploadedPrintJob(o) => o.created_at,
            PendingOrder::ScannedDocument(o) => o.created_at,
            PendingOrder::CopyRequest(o) => o.created_at,
        }
    }
}

/// Storage for one kind of pending order.
///
/// Implementations must be thread-safe (`Send + Sync`).
pub trait OrderSource: Send + Sync {
    /// The single kind this source holds.
    fn kind(&self) -> OrderKind;

    /// Look up an order by id. Must not mutate.
    fn find(&self, id: &str) -> Result<Option<PendingOrder>, PayError>;

    /// Delete an order. Returns `false` if it was already gone.
    fn remove(&self, id: &str) -> Result<bool, PayError>;

    /// Queue an order. Used by upstream producers and tests.
    fn insert(&self, order: PendingOrder) -> Result<(), PayError>;
}

fn check_kind(expected: OrderKind, order: &PendingOrder) -> Result<(), PayError> {
    if order.kind() != expected {
        return Err(PayError::Storage(format!(
            "cannot store {} in {} source",
            order.kind(),
            expected
        )));
    }
    Ok(())
}

/// In-memory order source backed by DashMap.
pub struct InMemoryOrderSource {
    kind: OrderKind,
    orders: DashMap<String, PendingOrder>,
}

impl InMemoryOrderSource {
    pub fn new(kind: OrderKind) -> Self {
        Self {
            kind,
            orders: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}

impl OrderSource for InMemoryOrderSource {
    fn kind(&self) -> OrderKind {
        self.kind
    }

    fn find(&self, id: &str) -> Result<Option<PendingOrder>, PayError> {
        Ok(self.orders.get(id).map(|o| o.value().clone()))
    }

    fn remove(&self, id: &str) -> Result<bool, PayError> {
        Ok(self.orders.remove(id).is_some())
    }

    fn insert(&self, order: PendingOrder) -> Result<(), PayError> {
        check_kind(self.kind, &order)?;
        self.orders.insert(order.id().to_string(), order);
        Ok(())
    }
}

/// Persistent order source: one SQLite table per kind, payload stored as JSON.
#[cfg(feature = "sqlite")]
pub struct SqliteOrderSource {
    db: crate::db::SqliteDb,
    kind: OrderKind,
}

#[cfg(feature = "sqlite")]
impl SqliteOrderSource {
    pub fn new(db: crate::db::SqliteDb, kind: OrderKind) -> Self {
        Self { db, kind }
    }
}

#[cfg(feature = "sqlite")]
impl OrderSource for SqliteOrderSource {
    fn kind(&self) -> OrderKind {
        self.kind
    }

    fn find(&self, id: &str) -> Result<Option<PendingOrder>, PayError> {
        use rusqlite::OptionalExtension;

        let conn = self.db.lock();
        let sql = format!("SELECT payload FROM {} WHERE id = ?1", self.kind.table());
        let payload: Option<String> = conn
            .query_row(&sql, [id], |row| row.get(0))
            .optional()?;
        match payload {
            Some(json) => {
                let order: PendingOrder = serde_json::from_str(&json)?;
                check_kind(self.kind, &order)?;
                Ok(Some(order))
            }
            None => Ok(None),
        }
    }

    fn remove(&self, id: &str) -> Result<bool, PayError> {
        let conn = self.db.lock();
        let sql = format!("DELETE FROM {} WHERE id = ?1", self.kind.table());
        Ok(conn.execute(&sql, [id])? > 0)
    }

    fn insert(&self, order: PendingOrder) -> Result<(), PayError> {
        check_kind(self.kind, &order)?;
        let payload = serde_json::to_string(&order)?;
        let conn = self.db.lock();
        let sql = format!(
            "INSERT INTO {} (id, payload, created_at) VALUES (?1, ?2, ?3)",
            self.kind.table()
        );
        conn.execute(
            &sql,
            rusqlite::params![order.id(), payload, order.created_at().timestamp()],
        )?;
        Ok(())
    }
}
