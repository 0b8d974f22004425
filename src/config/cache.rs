//! Local response cache settings.

use serde::Deserialize;

/// `[cache]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Keep rewritten responses in the local cache.
    pub local_cache_enable: bool,

    /// Upper bound on cached entries for the in-memory backend.
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            local_cache_enable: true,
            max_entries: 2048,
        }
    }
}
