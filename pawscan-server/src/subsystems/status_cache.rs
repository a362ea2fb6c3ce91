//! Status read-cache for the polling endpoint
//!
//! Clients poll scan status every few seconds while a job generates. The
//! cache absorbs that read load; every writer to a scan's simulation block
//! must invalidate the entry so polls never observe a stale status.

use moka::future::Cache as MokaCache;
use std::time::Duration;
use uuid::Uuid;

/// Short TTL: entries expire on their own, but invalidation on write is the
/// real freshness mechanism.
const STATUS_TTL_SECS: u64 = 5;

#[derive(Clone)]
pub struct StatusCache {
    inner: MokaCache<Uuid, serde_json::Value>,
}

impl StatusCache {
    pub fn new() -> Self {
        Self {
            inner: MokaCache::builder()
                .max_capacity(10_000)
                .time_to_live(Duration::from_secs(STATUS_TTL_SECS))
                .build(),
        }
    }

    pub fn get(&self, scan_id: &Uuid) -> Option<serde_json::Value> {
        self.inner.get(scan_id)
    }

    pub async fn insert(&self, scan_id: Uuid, body: serde_json::Value) {
        self.inner.insert(scan_id, body).await;
    }

    pub async fn invalidate(&self, scan_id: &Uuid) {
        self.inner.invalidate(scan_id).await;
    }
}

impl Default for StatusCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_get_invalidate() {
        let cache = StatusCache::new();
        let id = Uuid::new_v4();
        assert!(cache.get(&id).is_none());

        cache
            .insert(id, serde_json::json!({"status": "generating"}))
            .await;
        assert_eq!(cache.get(&id).unwrap()["status"], "generating");

        cache.invalidate(&id).await;
        assert!(cache.get(&id).is_none());
    }
}
