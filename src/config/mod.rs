//! Configuration for the mirror.
//!
//! The proxy is configured via a TOML file, with support for environment
//! variable interpolation using `${VAR_NAME}` syntax.
//!
//! # Example
//!
//! ```toml
//! [server]
//! my_host_name = "mirror.example"
//! my_scheme = "http://"
//!
//! [upstream]
//! target_domain = "origin.com"
//! target_scheme = "https://"
//! external_domains = ["cdn.origin.com"]
//! ```
//!
//! Unknown keys are not fatal: they produce a warning with a best-match
//! suggestion so typos do not silently disable a setting.

mod cache;
mod content;
mod cron;
mod developer;
mod server;
mod transport;
mod upstream;

use std::path::{Path, PathBuf};

pub use cache::*;
pub use content::*;
pub use cron::*;
pub use developer::*;
use regex::Regex;
use serde::Deserialize;
pub use server::*;
pub use transport::*;
pub use upstream::*;

/// Configuration load/validation errors. Fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {1}: {0}")]
    Io(std::io::Error, PathBuf),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("environment variable not set: {0}")]
    MissingEnv(String),

    #[error("invalid config: {0}")]
    Validation(String),

    #[error("invalid regex in config: {0}")]
    Pattern(#[from] regex::Error),
}

/// Root configuration for the mirror.
///
/// All sections are optional except `[upstream]`, which must at least name
/// the target domain. The struct is immutable after [`MirrorConfig::load`]
/// returns; it is shared by reference across all requests.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MirrorConfig {
    /// Mirror identity: hostname, port, scheme.
    #[serde(default)]
    pub server: ServerConfig,

    /// The mirrored site and its allied external domains.
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Outbound transport: proxy, keep-alive, stream transfer.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Charsets, text mime set, content injection, response header whitelist.
    #[serde(default)]
    pub content: ContentConfig,

    /// Local response cache.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Periodic background tasks.
    #[serde(default)]
    pub cron: CronConfig,

    /// Developer switches. Do not enable in production.
    #[serde(default)]
    pub developer: DeveloperConfig,
}

impl MirrorConfig {
    /// Load configuration from a TOML file.
    ///
    /// Environment variables in the format `${VAR_NAME}` are expanded.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e, path.as_ref().to_path_buf()))?;
        Self::parse(&contents)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(contents)?;

        // Surface typos before typed deserialization silently drops them.
        let raw: toml::Value = toml::from_str(&expanded)?;
        warn_unknown_keys(&raw);

        let mut config: MirrorConfig = toml::from_str(&expanded)?;
        config.finalize()?;
        Ok(config)
    }

    /// Resolve derived fields and validate. Called once, before the config
    /// is shared; nothing mutates it afterwards.
    pub fn finalize(&mut self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.upstream.finalize()?;
        self.transport.validate()?;
        self.content.validate()?;
        self.cron.validate()?;
        Ok(())
    }

    /// Mirror host including the port, e.g. `mirror.example:8080`.
    pub fn my_host_with_port(&self) -> String {
        match self.server.my_port {
            Some(port) => format!("{}:{}", self.server.my_host_name, port),
            None => self.server.my_host_name.clone(),
        }
    }

    /// Mirror host with scheme, e.g. `http://mirror.example:8080`.
    pub fn my_scheme_and_host(&self) -> String {
        format!("{}{}", self.server.my_scheme, self.my_host_with_port())
    }
}

/// Expand `${VAR_NAME}` references from the process environment.
fn expand_env_vars(contents: &str) -> Result<String, ConfigError> {
    let pattern = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("static regex");

    let mut missing = None;
    let expanded = pattern.replace_all(contents, |caps: &regex::Captures| {
        let name = &caps[1];
        match std::env::var(name) {
            Ok(value) => value,
            Err(_) => {
                missing.get_or_insert_with(|| name.to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(name) => Err(ConfigError::MissingEnv(name)),
        None => Ok(expanded.into_owned()),
    }
}

/// Known keys per section, used for the unknown-key warning.
const KNOWN_SECTIONS: &[(&str, &[&str])] = &[
    ("server", &["my_host_name", "my_port", "my_scheme", "is_dev", "bind_host"]),
    (
        "upstream",
        &[
            "target_domain",
            "target_scheme",
            "target_domain_alias",
            "external_domains",
            "force_https_domains",
        ],
    ),
    (
        "transport",
        &[
            "use_proxy",
            "proxy",
            "connection_keep_alive_enable",
            "stream_transfer_enable",
            "stream_buffer_size",
            "stream_async_preload_max",
        ],
    ),
    (
        "content",
        &[
            "possible_charsets",
            "force_decode_with_charsets",
            "text_like_mime_types",
            "custom_text_rewriter_enable",
            "custom_inject_content",
            "allowed_remote_response_headers",
        ],
    ),
    ("cache", &["local_cache_enable", "max_entries"]),
    ("cron", &["enable", "tasks"]),
    (
        "developer",
        &[
            "disable_ssl_verify",
            "disable_ssrf_check",
            "dump_all_files",
            "string_trace",
        ],
    ),
];

/// Warn on unsupported keys, suggesting the closest supported one.
fn warn_unknown_keys(raw: &toml::Value) {
    let Some(root) = raw.as_table() else {
        return;
    };

    let section_names: Vec<&str> = KNOWN_SECTIONS.iter().map(|(name, _)| *name).collect();
    for (key, value) in root {
        match KNOWN_SECTIONS.iter().find(|(name, _)| *name == key.as_str()) {
            None => warn_unsupported(key, &section_names),
            Some((_, known)) => {
                if let Some(table) = value.as_table() {
                    for sub_key in table.keys() {
                        if !known.contains(&sub_key.as_str())
                            // [[cron.tasks]] rows carry their own keys
                            && !(key == "cron" && sub_key == "tasks")
                        {
                            warn_unsupported(&format!("{key}.{sub_key}"), known);
                        }
                    }
                }
            }
        }
    }
}

fn warn_unsupported(key: &str, candidates: &[&str]) {
    let bare = key.rsplit('.').next().unwrap_or(key);
    match find_best_match(bare, candidates) {
        Some(guess) => {
            tracing::warn!("unsupported config item: {key}, discarded. do you mean {guess}?");
        }
        None => tracing::warn!("unsupported config item: {key}, discarded."),
    }
}

/// Find the candidate most similar to the input.
///
/// Score is the fraction of input characters present in the candidate;
/// matches below 0.6 are discarded.
fn find_best_match<'a>(input: &str, candidates: &[&'a str]) -> Option<&'a str> {
    if input.is_empty() {
        return None;
    }

    let mut best: Option<&str> = None;
    let mut best_score = 0usize;
    for candidate in candidates {
        let score = input.chars().filter(|c| candidate.contains(*c)).count();
        if score > best_score {
            best_score = score;
            best = Some(candidate);
        }
    }

    if (best_score as f64) / (input.chars().count() as f64) < 0.6 {
        return None;
    }
    best
}
