//! PGT store: bridges the proxy-granting-ticket IOU returned by
//! `serviceValidate` with the PGT id delivered on the callback endpoint.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

/// Keyed cache mapping `pgtIou` to `pgtId`.
///
/// The callback request and the validation request that reads the entry are
/// separate HTTP calls, so implementations must make a write from one task
/// visible to a read from another; the protocol guarantees the callback
/// completes before the matching `serviceValidate` response is returned.
/// Eviction (a TTL is recommended) is the implementation's concern.
#[async_trait]
pub trait TicketStore: Send + Sync {
    async fn write(&self, pgt_iou: &str, pgt_id: &str);
    async fn read(&self, pgt_iou: &str) -> Option<String>;
}

/// In-memory PGT store, suitable for a single-process deployment.
#[derive(Debug, Default)]
pub struct MemoryTicketStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryTicketStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TicketStore for MemoryTicketStore {
    async fn write(&self, pgt_iou: &str, pgt_id: &str) {
        self.entries
            .write()
            .await
            .insert(pgt_iou.to_string(), pgt_id.to_string());
    }

    async fn read(&self, pgt_iou: &str) -> Option<String> {
        self.entries.read().await.get(pgt_iou).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_write_then_read() {
        let store = MemoryTicketStore::new();
        store.write("PGTIOU-abc", "PGT-xyz").await;
        assert_eq!(store.read("PGTIOU-abc").await.as_deref(), Some("PGT-xyz"));
    }

    #[tokio::test]
    async fn test_read_unknown_iou() {
        let store = MemoryTicketStore::new();
        assert!(store.read("PGTIOU-missing").await.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_writers_and_readers() {
        let store = Arc::new(MemoryTicketStore::new());

        let writers: Vec<_> = (0..16)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .write(&format!("PGTIOU-{i}"), &format!("PGT-{i}"))
                        .await;
                })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap();
        }

        for i in 0..16 {
            assert_eq!(
                store.read(&format!("PGTIOU-{i}")).await.as_deref(),
                Some(format!("PGT-{i}").as_str())
            );
        }
    }
}
