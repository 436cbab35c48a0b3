//! Settlement change notifications.
//!
//! Delivery is fire-and-forget: a notifier must never block or fail the
//! settlement that triggered it. Consumers re-read state on receipt.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::ledger::SettlementStatus;

/// Emitted when an order is settled and on every manual status edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementEvent {
    pub id: String,
    pub order_id: String,
    pub status: SettlementStatus,
}

pub trait SettlementNotifier: Send + Sync {
    fn notify(&self, event: &SettlementEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl SettlementNotifier for NoopNotifier {
    fn notify(&self, _event: &SettlementEvent) {}
}

/// In-process fan-out to realtime subscribers (dashboard push, bot replies).
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<SettlementEvent>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SettlementEvent> {
        self.tx.subscribe()
    }
}

impl SettlementNotifier for BroadcastNotifier {
    fn notify(&self, event: &SettlementEvent) {
        // No subscribers is not an error.
        let _ = self.tx.send(event.clone());
    }
}

/// Forwards every event to each inner notifier in turn.
#[derive(Clone, Default)]
pub struct FanOutNotifier {
    targets: Vec<Arc<dyn SettlementNotifier>>,
}

impl FanOutNotifier {
    pub fn new(targets: Vec<Arc<dyn SettlementNotifier>>) -> Self {
        Self { targets }
    }

    pub fn with(mut self, target: Arc<dyn SettlementNotifier>) -> Self {
        self.targets.push(target);
        self
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

impl SettlementNotifier for FanOutNotifier {
    fn notify(&self, event: &SettlementEvent) {
        for target in &self.targets {
            target.notify(event);
        }
    }
}
