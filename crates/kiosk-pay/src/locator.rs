use std::sync::Arc;

use crate::error::PayError;
use crate::order::{OrderKind, OrderSource, PendingOrder};

/// Resolves an external order id to one pending order.
///
/// Sources are searched in [`OrderKind::PRIORITY`] order regardless of the
/// order they were registered in; the first hit wins. Two producers issuing
/// the same id is a configuration error, settled deterministically by that
/// priority.
#[derive(Clone)]
pub struct OrderLocator {
    sources: Vec<Arc<dyn OrderSource>>,
}

impl OrderLocator {
    pub fn new(mut sources: Vec<Arc<dyn OrderSource>>) -> Self {
        sources.sort_by_key(|s| priority(s.kind()));
        Self { sources }
    }

    /// Find the first pending order with `order_id`. Read-only.
    pub fn locate(&self, order_id: &str) -> Result<Option<PendingOrder>, PayError> {
        for source in &self.sources {
            if let Some(order) = source.find(order_id)? {
                return Ok(Some(order));
            }
        }
        Ok(None)
    }

    /// Delete `order` from the source that holds its kind.
    /// Returns `false` if it was already gone.
    pub fn remove(&self, order: &PendingOrder) -> Result<bool, PayError> {
        let kind = order.kind();
        match self.sources.iter().find(|s| s.kind() == kind) {
            Some(source) => source.remove(order.id()),
            None => Err(PayError::Storage(format!("no order source registered for {kind}"))),
        }
    }

    pub fn kinds(&self) -> Vec<OrderKind> {
        self.sources.iter().map(|s| s.kind()).collect()
    }
}

fn priority(kind: OrderKind) -> usize {
    OrderKind::PRIORITY
        .iter()
        .position(|k| *k == kind)
        .unwrap_or(OrderKind::PRIORITY.len())
}
