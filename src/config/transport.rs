//! Outbound transport settings.

use serde::Deserialize;

use super::ConfigError;

/// `[transport]` section: how the proxy talks to the upstream.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Route upstream traffic through an HTTP/HTTPS proxy.
    pub use_proxy: bool,

    /// Proxy URL, e.g. `http://127.0.0.1:8123`. SOCKS is not supported;
    /// front a SOCKS proxy with an HTTP converter instead.
    pub proxy: Option<String>,

    /// Keep one pooled session per upstream hostname.
    pub connection_keep_alive_enable: bool,

    /// Relay large binary responses piece-wise instead of buffering.
    pub stream_transfer_enable: bool,

    /// Upper bound on a single relayed chunk, in bytes.
    pub stream_buffer_size: usize,

    /// Capacity of the producer/consumer queue, in chunks.
    pub stream_async_preload_max: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            use_proxy: false,
            proxy: None,
            connection_keep_alive_enable: true,
            stream_transfer_enable: true,
            stream_buffer_size: 16 * 1024,
            stream_async_preload_max: 15,
        }
    }
}

impl TransportConfig {
    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if self.use_proxy {
            let Some(proxy) = &self.proxy else {
                return Err(ConfigError::Validation(
                    "transport.use_proxy is set but transport.proxy is missing".into(),
                ));
            };
            if !proxy.starts_with("http://") && !proxy.starts_with("https://") {
                return Err(ConfigError::Validation(format!(
                    "transport.proxy must be an http:// or https:// URL, got {proxy:?} \
                     (SOCKS proxies need an HTTP converter in front)"
                )));
            }
        }
        if self.stream_buffer_size == 0 {
            return Err(ConfigError::Validation("transport.stream_buffer_size must be > 0".into()));
        }
        if self.stream_async_preload_max == 0 {
            return Err(ConfigError::Validation(
                "transport.stream_async_preload_max must be > 0".into(),
            ));
        }
        Ok(())
    }
}
