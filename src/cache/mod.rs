//! Local response cache, keyed by fully-qualified origin URL.
//!
//! The backing store is pluggable behind [`ResponseCache`]; the in-memory
//! implementation ships by default. Entries are two-phase: a streaming
//! request first stores headers with `without_content` set, and the body is
//! appended after the last chunk went to the client.

mod expiry;
mod memory;

use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
pub use expiry::expires_from_mime;
pub use memory::MemoryCache;

/// Metadata attached to a cache entry.
#[derive(Debug, Clone)]
pub struct CacheMeta {
    pub expires_at: Instant,
    /// Upstream `Last-Modified`, verbatim, for `If-Modified-Since` replies.
    pub last_modified: Option<String>,
    /// Headers stored, body still pending (stream in flight). Treated as a
    /// miss for lookup but a valid target for body append.
    pub without_content: bool,
    pub obj_size: usize,
}

impl CacheMeta {
    pub fn is_fresh(&self) -> bool {
        self.expires_at > Instant::now()
    }
}

/// A stored response: our status, our rewritten headers, our body.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

/// Pluggable response store.
///
/// Implementations must be safe for concurrent use; `put_obj` replaces the
/// entry atomically, so readers see either the old or the new entry, never
/// a torn one.
#[async_trait]
pub trait ResponseCache: Send + Sync {
    /// A fresh entry exists (content present or pending).
    async fn is_cached(&self, url: &str) -> bool;

    /// Metadata of a fresh entry.
    async fn get_info(&self, url: &str) -> Option<CacheMeta>;

    /// A fresh entry's stored response.
    async fn get_obj(&self, url: &str) -> Option<CachedResponse>;

    /// Insert or replace an entry.
    async fn put_obj(&self, url: &str, obj: CachedResponse, meta: CacheMeta);

    /// Drop expired entries.
    async fn sweep(&self);

    /// Drop everything.
    async fn flush(&self);
}

/// Attach a streamed body to its headers-first entry.
///
/// No-op when the entry vanished in the meantime. Clears `without_content`,
/// so the entry starts serving lookups.
pub async fn append_stream_body(cache: &dyn ResponseCache, url: &str, mime: &str, body: Bytes) {
    if !cache.is_cached(url).await {
        return;
    }
    let Some(mut meta) = cache.get_info(url).await else {
        return;
    };
    let Some(mut obj) = cache.get_obj(url).await else {
        return;
    };

    obj.body = body;
    meta.obj_size = obj.body.len();
    meta.without_content = false;
    meta.expires_at = Instant::now() + expires_from_mime(mime);

    tracing::debug!(url, size = meta.obj_size, "cached streamed body");
    cache.put_obj(url, obj, meta).await;
}
