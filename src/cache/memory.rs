//! In-memory cache backend on a concurrent map.

use async_trait::async_trait;
use dashmap::DashMap;

use super::{CacheMeta, CachedResponse, ResponseCache};

struct Entry {
    meta: CacheMeta,
    obj: CachedResponse,
}

/// DashMap-backed store with lazy expiry and a soft entry bound.
///
/// Suitable for a single-process mirror; a multi-node deployment would plug
/// a shared backend into [`ResponseCache`] instead.
pub struct MemoryCache {
    entries: DashMap<String, Entry>,
    max_entries: usize,
}

impl MemoryCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries: max_entries.max(1),
        }
    }

    fn evict_if_needed(&self) {
        if self.entries.len() < self.max_entries {
            return;
        }

        self.entries.retain(|_, entry| entry.meta.is_fresh());
        if self.entries.len() < self.max_entries {
            return;
        }

        // Still full of fresh entries: drop the ones expiring soonest.
        let mut by_expiry: Vec<_> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.meta.expires_at))
            .collect();
        by_expiry.sort_by_key(|(_, expires_at)| *expires_at);

        let to_evict = self.entries.len() + 1 - self.max_entries;
        for (key, _) in by_expiry.into_iter().take(to_evict) {
            self.entries.remove(&key);
        }
    }
}

#[async_trait]
impl ResponseCache for MemoryCache {
    async fn is_cached(&self, url: &str) -> bool {
        let fresh = match self.entries.get(url) {
            Some(entry) => entry.meta.is_fresh(),
            None => return false,
        };
        if !fresh {
            self.entries.remove(url);
        }
        fresh
    }

    async fn get_info(&self, url: &str) -> Option<CacheMeta> {
        self.entries
            .get(url)
            .filter(|entry| entry.meta.is_fresh())
            .map(|entry| entry.meta.clone())
    }

    async fn get_obj(&self, url: &str) -> Option<CachedResponse> {
        self.entries
            .get(url)
            .filter(|entry| entry.meta.is_fresh())
            .map(|entry| entry.obj.clone())
    }

    async fn put_obj(&self, url: &str, obj: CachedResponse, meta: CacheMeta) {
        self.evict_if_needed();
        self.entries.insert(url.to_string(), Entry { meta, obj });
    }

    async fn sweep(&self) {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.meta.is_fresh());
        let dropped = before - self.entries.len();
        if dropped > 0 {
            tracing::debug!(dropped, "swept expired cache entries");
        }
    }

    async fn flush(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use bytes::Bytes;

    use super::*;

    fn meta_in(secs: i64) -> CacheMeta {
        let expires_at = if secs >= 0 {
            Instant::now() + Duration::from_secs(secs as u64)
        } else {
            Instant::now() - Duration::from_secs((-secs) as u64)
        };
        CacheMeta {
            expires_at,
            last_modified: None,
            without_content: false,
            obj_size: 4,
        }
    }

    fn obj() -> CachedResponse {
        CachedResponse {
            status: 200,
            headers: vec![("content-type".into(), "text/html".into())],
            body: Bytes::from_static(b"body"),
        }
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let cache = MemoryCache::new(16);
        cache.put_obj("https://origin.com/", obj(), meta_in(60)).await;

        assert!(cache.is_cached("https://origin.com/").await);
        let stored = cache.get_obj("https://origin.com/").await.unwrap();
        assert_eq!(stored.status, 200);
        assert_eq!(stored.body, Bytes::from_static(b"body"));
        assert!(!cache.is_cached("https://origin.com/other").await);
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss() {
        let cache = MemoryCache::new(16);
        cache.put_obj("https://origin.com/", obj(), meta_in(-1)).await;

        assert!(!cache.is_cached("https://origin.com/").await);
        assert!(cache.get_info("https://origin.com/").await.is_none());
        assert!(cache.get_obj("https://origin.com/").await.is_none());
    }

    #[tokio::test]
    async fn test_put_replaces_entry() {
        let cache = MemoryCache::new(16);
        let mut pending = meta_in(60);
        pending.without_content = true;
        cache.put_obj("u", obj(), pending).await;
        assert!(cache.get_info("u").await.unwrap().without_content);

        cache.put_obj("u", obj(), meta_in(60)).await;
        assert!(!cache.get_info("u").await.unwrap().without_content);
    }

    #[tokio::test]
    async fn test_sweep_and_flush() {
        let cache = MemoryCache::new(16);
        cache.put_obj("fresh", obj(), meta_in(60)).await;
        cache.put_obj("stale", obj(), meta_in(-1)).await;

        cache.sweep().await;
        assert!(cache.is_cached("fresh").await);
        assert!(!cache.is_cached("stale").await);

        cache.flush().await;
        assert!(!cache.is_cached("fresh").await);
    }

    #[tokio::test]
    async fn test_eviction_bounds_entries() {
        let cache = MemoryCache::new(4);
        for i in 0..10 {
            cache.put_obj(&format!("u{i}"), obj(), meta_in(60 + i)).await;
        }
        assert!(cache.entries.len() <= 4);
        // the newest entry always survives its own insert
        assert!(cache.is_cached("u9").await);
    }
}
