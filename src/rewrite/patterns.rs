//! The compiled regex tables driving every rewrite.
//!
//! All patterns are built once, after the configuration is fully loaded, and
//! shared read-only across requests. The fragment patterns ([`COLON`],
//! [`SLASH`], [`QUOTE`]) match every URL-encoded and JSON-escaped form of
//! `:`, `/` and quotes, which makes the composite patterns robust to nested
//! escaping (`%2F`, `%252F`, `\/`, `%5C%2F`, `&quot;`, ...).
//!
//! The `regex` engine has no backreferences or conditional groups, so where
//! the patterns need "this slash uses the same escape form as that one"
//! (scheme slashes, left/right quotes) both sides are captured and the
//! rewrite callbacks enforce agreement before touching a match.

use regex::Regex;

use crate::config::{ConfigError, InjectPosition, InjectRule, MirrorConfig};

/// Every escape form of `:` — raw, `%3A`, `%253A`, both cases.
pub const COLON: &str = r"(?::|%(?:25)?3[Aa])";

/// Every escape form of `/` — raw, `\/` (any number of backslashes),
/// `\x2F`, `%2F`, `%5C%2F`, `%252F`, `%255C%252F`, both cases.
pub const SLASH: &str = r"(?:\\*(?:/|x2[Ff])|%(?:(?:25)?5[Cc]%)*(?:25)?2[Ff])";

/// Every escape form of `"` and `'`, plus `&quot;`.
pub const QUOTE: &str = r#"(?:\\*["']|%(?:(?:25)?5[Cc]%)*2(?:52)?[27]|&quot;)"#;

/// One compiled content-injection rule.
#[derive(Debug)]
pub struct CompiledInject {
    /// Anchored at the start of the scheme-less URL; `None` injects always.
    pub url_regex: Option<Regex>,
    pub content: String,
}

/// Precompiled patterns plus compiled injection rules.
#[derive(Debug)]
pub struct RegexLibrary {
    /// Locates URL-shaped candidates inside text bodies. Captures `prefix`,
    /// `quote_left`, `scheme`, `domain`, `port`, `path`, `query_string`,
    /// `quote_right`, `right_suffix`. Verification that a candidate really
    /// is a rewritable URL happens in the reassembly callback.
    pub adv_url: Regex,

    /// Matches bare `scheme://host` references (no path), with a trailing
    /// TLD alternation built from `allowed_domains`, most frequent first.
    pub basic_url: Regex,

    /// Matches `[[http(s):]//]mirror_host[/]extdomains/[https-]host` in
    /// every escape form, mirror host optional.
    pub ext_domains: Regex,

    /// Matches the mirror host (with optional port) standalone.
    pub main_domain: Regex,

    /// `domain=` attribute of a cookie.
    pub cookie_domain: Regex,

    /// `path=` attribute of a cookie (value up to the closing `;`).
    pub cookie_path: Regex,

    /// The mirror's own verification cookie fragment, stripped from
    /// forwarded `Cookie` headers.
    pub verify_header: Regex,

    /// Content injection rules grouped by position.
    pub inject: Vec<(InjectPosition, Vec<CompiledInject>)>,
}

impl RegexLibrary {
    /// Compile the full library from a finalized config.
    pub fn compile(conf: &MirrorConfig) -> Result<Self, ConfigError> {
        let my_host = my_host_pattern(conf);

        let adv_url = Regex::new(concat!(
            r#"(?i)(?P<prefix>\b(?:(?:src|href|action)\s*=|url\s*\(|@import\s*|"\s*:)\s*)"#,
            r#"(?P<quote_left>["'])?"#,
            r#"(?:(?P<scheme>(?:https?:)?\\?/\\?/)"#,
            r#"(?P<domain>(?:[-a-z0-9]+\.)+[a-z]+(?P<port>:\d{1,5})?))?"#,
            r#"(?P<path>[^\s;+$?#'"{}]*?(?P<query_string>\?[^\s?#'"]*?)?)"#,
            r#"(?P<quote_right>["')])(?P<right_suffix>\W)"#,
        ))
        .expect("advanced url pattern");

        let basic_url = Regex::new(&format!(
            "(?:(?:https?(?P<colon>{COLON}))?\
             (?P<scheme_slash>{SLASH})(?P<scheme_slash2>{SLASH})\
             |(?P<quote>{QUOTE}))\
             (?P<domain>(?:[a-zA-Z0-9-]+\\.){{1,5}}{tld})\\b\
             (?P<suffix_slash>{SLASH})?\
             (?P<quote_right>{QUOTE})?",
            tld = tld_alternation(conf),
        ))
        .expect("basic url pattern");

        let ext_domains = Regex::new(&format!(
            "(?i)(?:(?P<scheme>(?:https?(?P<colon>{COLON}))?\
             (?P<scheme_slash>{SLASH})(?P<scheme_slash2>{SLASH}))?\
             {my_host}(?P<slash2>{SLASH}))?\
             extdomains(?P<slash3>{SLASH})\
             (?P<is_https>https-)?\
             (?P<real_domain>(?:[\\w-]+\\.)+\\w+)\\b",
        ))
        .expect("ext-domains pattern");

        let main_domain = Regex::new(&my_host).expect("main-domain pattern");

        let cookie_domain =
            Regex::new(r"(?i)\b(?P<prefix>domain)=(?P<domain>\.?(?:[\w-]+\.)+\w+)\b")
                .expect("cookie domain pattern");
        let cookie_path =
            Regex::new(r"(?P<prefix>[pP]ath)=(?P<path>[\w._/-]+?;)").expect("cookie path pattern");
        let verify_header =
            Regex::new(r"zmirror_verify=[a-zA-Z0-9]+\b;? ?").expect("verify pattern");

        let mut inject = Vec::new();
        for (position, rules) in &conf.content.custom_inject_content {
            let Some(position) = InjectPosition::from_key(position) else {
                // finalize() already rejected unknown positions
                continue;
            };
            let compiled = rules
                .iter()
                .map(|rule: &InjectRule| {
                    let url_regex = match &rule.url_regex {
                        Some(pattern) => Some(Regex::new(&format!("^(?:{pattern})"))?),
                        None => None,
                    };
                    Ok(CompiledInject {
                        url_regex,
                        content: rule.content.clone(),
                    })
                })
                .collect::<Result<Vec<_>, ConfigError>>()?;
            inject.push((position, compiled));
        }

        Ok(Self {
            adv_url,
            basic_url,
            ext_domains,
            main_domain,
            cookie_domain,
            cookie_path,
            verify_header,
            inject,
        })
    }

    /// Injection rules for one position, empty when none are configured.
    pub fn inject_rules(&self, position: InjectPosition) -> &[CompiledInject] {
        self.inject
            .iter()
            .find(|(p, _)| *p == position)
            .map(|(_, rules)| rules.as_slice())
            .unwrap_or(&[])
    }
}

/// Pattern for the mirror host: `host` with an optional `:port` in any
/// colon escape form.
fn my_host_pattern(conf: &MirrorConfig) -> String {
    let host = regex::escape(&conf.server.my_host_name);
    match conf.server.my_port {
        Some(port) => format!("{host}(?:{COLON}{port})?"),
        None => host,
    }
}

/// TLD alternation over `allowed_domains`, most frequent first so the
/// engine tries the common case early.
fn tld_alternation(conf: &MirrorConfig) -> String {
    use std::collections::HashMap;

    let mut freq: HashMap<String, usize> = HashMap::new();
    for domain in conf.upstream.allowed_domains() {
        let host = domain.split(':').next().unwrap_or(domain);
        let tld = host.rsplit('.').next().unwrap_or(host);
        *freq.entry(regex::escape(tld)).or_default() += 1;
    }

    let mut tlds: Vec<(String, usize)> = freq.into_iter().collect();
    tlds.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let joined = tlds
        .into_iter()
        .map(|(tld, _)| tld)
        .collect::<Vec<_>>()
        .join("|");
    format!("(?:{joined})")
}
