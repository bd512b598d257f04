use core::fmt;
use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicU64, Ordering},
};

use serde::Serialize;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::WalletPaymentId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
pub enum ChangeKind {
    Added,
    Updated,
    Completed,
    Deleted,
    MetadataUpdated,
}

/// Payments touched by one committed ledger operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentChange {
    pub wallet_id: String,
    pub change: ChangeKind,
    #[serde(serialize_with = "serialize_ids")]
    pub ids: Vec<WalletPaymentId>,
}

fn serialize_ids<S: serde::Serializer>(
    ids: &[WalletPaymentId],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(ids.iter().map(ToString::to_string))
}

impl fmt::Display for PaymentChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: ", self.wallet_id, self.change)?;
        for (i, id) in self.ids.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{id}")?;
        }
        Ok(())
    }
}

/// Receives the changes committed to the ledger.
///
/// Listeners run after the transaction committed, so a listener reading the
/// ledger sees the change.
#[async_trait::async_trait]
pub trait PaymentChangeListener: Send + Sync {
    async fn on_change(&self, change: PaymentChange);
}

pub struct EventEmitter {
    listener_index: AtomicU64,
    listeners: RwLock<BTreeMap<String, Box<dyn PaymentChangeListener>>>,
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl EventEmitter {
    pub fn new() -> Self {
        Self {
            listener_index: AtomicU64::new(0),
            listeners: RwLock::new(BTreeMap::new()),
        }
    }

    pub async fn add_listener(&self, listener: Box<dyn PaymentChangeListener>) -> String {
        let index = self.listener_index.fetch_add(1, Ordering::Relaxed);
        let id = format!("listener_{}-{}", index, Uuid::new_v4());
        let mut listeners = self.listeners.write().await;
        listeners.insert(id.clone(), listener);
        id
    }

    pub async fn remove_listener(&self, id: &str) -> bool {
        let mut listeners = self.listeners.write().await;
        listeners.remove(id).is_some()
    }

    pub async fn emit(&self, change: &PaymentChange) {
        let listeners = self.listeners.read().await;
        for listener in listeners.values() {
            listener.on_change(change.clone()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::Mutex;

    use super::*;

    struct TestListener {
        received: Arc<Mutex<Vec<PaymentChange>>>,
    }

    #[async_trait::async_trait]
    impl PaymentChangeListener for TestListener {
        async fn on_change(&self, change: PaymentChange) {
            self.received.lock().await.push(change);
        }
    }

    fn change() -> PaymentChange {
        PaymentChange {
            wallet_id: "wallet".to_string(),
            change: ChangeKind::Added,
            ids: vec![WalletPaymentId::LightningOutgoing(Uuid::nil())],
        }
    }

    #[tokio::test]
    async fn test_change_emission() {
        let emitter = EventEmitter::new();
        let received = Arc::new(Mutex::new(Vec::new()));
        emitter
            .add_listener(Box::new(TestListener {
                received: received.clone(),
            }))
            .await;

        emitter.emit(&change()).await;

        assert_eq!(*received.lock().await, vec![change()]);
    }

    #[tokio::test]
    async fn test_remove_listener() {
        let emitter = EventEmitter::new();
        let received1 = Arc::new(Mutex::new(Vec::new()));
        let received2 = Arc::new(Mutex::new(Vec::new()));
        let id1 = emitter
            .add_listener(Box::new(TestListener {
                received: received1.clone(),
            }))
            .await;
        let id2 = emitter
            .add_listener(Box::new(TestListener {
                received: received2.clone(),
            }))
            .await;
        assert_ne!(id1, id2);

        assert!(emitter.remove_listener(&id1).await);
        assert!(!emitter.remove_listener(&id1).await);
        emitter.emit(&change()).await;

        assert!(received1.lock().await.is_empty());
        assert_eq!(received2.lock().await.len(), 1);
    }

    #[test]
    fn test_change_display() {
        let mut change = change();
        change.ids.push(WalletPaymentId::SpliceOutgoing(Uuid::nil()));
        assert_eq!(
            change.to_string(),
            "wallet Added: lightning_outgoing:00000000-0000-0000-0000-000000000000, splice_outgoing:00000000-0000-0000-0000-000000000000"
        );
    }
}
