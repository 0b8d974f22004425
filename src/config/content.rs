//! Content handling: charsets, text detection, injection, header whitelist.

use std::collections::{BTreeMap, HashSet};

use serde::Deserialize;

use super::ConfigError;

/// Where injected content lands inside an HTML document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectPosition {
    /// Before the first `<script` inside `<head>`, or before `</head>` if
    /// the head has no script.
    HeadFirst,
    /// Immediately before `</head>`.
    HeadLast,
}

impl InjectPosition {
    /// Parse a `custom_inject_content` table key.
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "head_first" => Some(InjectPosition::HeadFirst),
            "head_last" => Some(InjectPosition::HeadLast),
            _ => None,
        }
    }
}

/// One injection rule: content, optionally gated by a URL pattern.
#[derive(Debug, Clone, Deserialize)]
pub struct InjectRule {
    /// Anchored regex matched against the scheme-less request URL
    /// (`host/path?query`). Absent means "every page".
    pub url_regex: Option<String>,

    /// Raw HTML injected verbatim.
    pub content: String,
}

/// `[content]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ContentConfig {
    /// Charsets tried in order when decoding text bodies.
    pub possible_charsets: Vec<String>,

    /// Skip detection and decode every text body with this charset.
    pub force_decode_with_charsets: Option<String>,

    /// Substring keywords marking a mime as rewritable text.
    pub text_like_mime_types: Vec<String>,

    /// Route response text through the registered custom rewriter.
    pub custom_text_rewriter_enable: bool,

    /// Content injected into HTML pages, keyed by position
    /// (`head_first` or `head_last`).
    pub custom_inject_content: BTreeMap<String, Vec<InjectRule>>,

    /// Whitelist of upstream response headers forwarded to the client.
    pub allowed_remote_response_headers: HashSet<String>,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            possible_charsets: vec![
                "utf-8".into(),
                "gbk".into(),
                "big5".into(),
                "latin1".into(),
            ],
            force_decode_with_charsets: None,
            text_like_mime_types: vec![
                "text".into(),
                "json".into(),
                "javascript".into(),
                "xml".into(),
            ],
            custom_text_rewriter_enable: false,
            custom_inject_content: BTreeMap::new(),
            allowed_remote_response_headers: [
                "content-type",
                "date",
                "expires",
                "cache-control",
                "last-modified",
                "server",
                "location",
                "accept-ranges",
                "access-control-allow-origin",
                "access-control-allow-headers",
                "access-control-allow-methods",
                "access-control-expose-headers",
                "access-control-max-age",
                "access-control-allow-credentials",
                "timing-allow-origin",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl ContentConfig {
    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if let Some(charset) = &self.force_decode_with_charsets {
            if encoding_rs::Encoding::for_label(charset.as_bytes()).is_none() {
                return Err(ConfigError::Validation(format!(
                    "content.force_decode_with_charsets: unknown charset {charset:?}"
                )));
            }
        }
        // Injection positions and regexes are baked into the pattern library
        // at startup; check them here so a typo fails fast, not at first hit.
        for (position, rules) in &self.custom_inject_content {
            if InjectPosition::from_key(position).is_none() {
                return Err(ConfigError::Validation(format!(
                    "content.custom_inject_content: unknown position {position:?} \
                     (expected \"head_first\" or \"head_last\")"
                )));
            }
            for rule in rules {
                if let Some(pattern) = &rule.url_regex {
                    regex::Regex::new(pattern)?;
                }
            }
        }
        Ok(())
    }
}
