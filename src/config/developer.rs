//! Developer switches. None of these belong in a production deployment.

use serde::Deserialize;

/// `[developer]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DeveloperConfig {
    /// Skip TLS certificate verification on upstream connections.
    pub disable_ssl_verify: bool,

    /// Skip the layer-2 SSRF check before dispatching upstream requests.
    pub disable_ssrf_check: bool,

    /// Dump a context snapshot to disk whenever the error page is shown.
    pub dump_all_files: bool,

    /// When this needle appears in rewritten text, log which pipeline stage
    /// it survived. Debug aid for chasing a missed rewrite.
    pub string_trace: Option<String>,
}
