//! The mirrored site: target domain, aliases, allied external domains.

use std::collections::HashSet;

use serde::{Deserialize, Deserializer};

use super::ConfigError;

/// Which domains are contacted over https regardless of how the mirror URL
/// spelled them.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ForceHttpsDomains {
    /// Every in-zone domain.
    All,
    /// No domain (plain http unless `/extdomains/https-` says otherwise).
    #[default]
    None,
    /// Only the listed domains.
    Only(HashSet<String>),
}

impl ForceHttpsDomains {
    pub fn applies_to(&self, domain: &str) -> bool {
        match self {
            ForceHttpsDomains::All => true,
            ForceHttpsDomains::None => false,
            ForceHttpsDomains::Only(set) => set.contains(domain),
        }
    }
}

impl<'de> Deserialize<'de> for ForceHttpsDomains {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Keyword(String),
            List(Vec<String>),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Keyword(word) => match word.as_str() {
                "ALL" => Ok(ForceHttpsDomains::All),
                "NONE" => Ok(ForceHttpsDomains::None),
                other => Err(serde::de::Error::custom(format!(
                    "force_https_domains must be \"ALL\", \"NONE\" or a list, got {other:?}"
                ))),
            },
            Raw::List(list) => Ok(ForceHttpsDomains::Only(list.into_iter().collect())),
        }
    }
}

/// `[upstream]` section: the target site and the allied domains reachable
/// through `/extdomains/`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// The main mirrored domain. Required.
    pub target_domain: String,

    /// Scheme used to reach the target, `https://` unless overridden.
    pub target_scheme: String,

    /// Domains treated as the main domain (served at the mirror root,
    /// not under `/extdomains/`). Always contains `target_domain`.
    pub target_domain_alias: Vec<String>,

    /// Allied external domains, reachable under `/extdomains/<host>`.
    pub external_domains: Vec<String>,

    /// Https policy for in-zone domains.
    pub force_https_domains: ForceHttpsDomains,

    /// Closure of every domain the proxy may contact. Derived.
    #[serde(skip)]
    allowed_domains: HashSet<String>,

    /// `target_domain_alias ∪ {target_domain}`. Derived.
    #[serde(skip)]
    alias_set: HashSet<String>,
}

impl UpstreamConfig {
    /// Sanitize inputs and compute the derived domain sets.
    pub(super) fn finalize(&mut self) -> Result<(), ConfigError> {
        if self.target_domain.is_empty() {
            return Err(ConfigError::Validation("upstream.target_domain must not be empty".into()));
        }
        if self.target_scheme.is_empty() {
            self.target_scheme = "https://".into();
        }
        if self.target_scheme != "http://" && self.target_scheme != "https://" {
            return Err(ConfigError::Validation(format!(
                "upstream.target_scheme must be \"http://\" or \"https://\", got {:?}",
                self.target_scheme
            )));
        }

        self.external_domains = self
            .external_domains
            .iter()
            .map(|d| {
                d.trim_matches(|c: char| "./ \t".contains(c))
                    .trim_start_matches("https://")
                    .trim_start_matches("http://")
                    .to_string()
            })
            .filter(|d| !d.is_empty())
            .collect();

        // The alias set always includes the target itself, so
        // `is_external_domain` reads as "not the main site".
        self.alias_set = self.target_domain_alias.iter().cloned().collect();
        self.alias_set.insert(self.target_domain.clone());

        self.allowed_domains = HashSet::new();
        self.allowed_domains.insert(self.target_domain.clone());
        self.allowed_domains.extend(self.alias_set.iter().cloned());
        for domain in &self.external_domains {
            self.allowed_domains.insert(domain.clone());
            // Support domains given with an explicit port.
            if let Some((host, _port)) = domain.split_once(':') {
                self.allowed_domains.insert(host.to_string());
            }
        }
        Ok(())
    }

    /// Every domain the proxy is allowed to contact.
    pub fn allowed_domains(&self) -> &HashSet<String> {
        &self.allowed_domains
    }

    /// All domains not in the alias set are external.
    pub fn is_external_domain(&self, domain: &str) -> bool {
        !self.alias_set.contains(domain)
    }

    /// Whether requests to `domain` go over https.
    pub fn is_domain_https(&self, domain: &str) -> bool {
        self.force_https_domains.applies_to(domain)
    }
}

impl UpstreamConfig {
    /// Convenience constructor for tests across the crate.
    #[doc(hidden)]
    pub fn for_tests(
        target_domain: &str,
        target_scheme: &str,
        external_domains: &[&str],
    ) -> Self {
        let mut upstream = UpstreamConfig {
            target_domain: target_domain.into(),
            target_scheme: target_scheme.into(),
            external_domains: external_domains.iter().map(|s| s.to_string()).collect(),
            ..UpstreamConfig::default()
        };
        upstream.finalize().expect("test upstream config");
        upstream
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowed_domains_closure() {
        let upstream =
            UpstreamConfig::for_tests("origin.com", "https://", &["cdn.origin.com:8080"]);

        let allowed = upstream.allowed_domains();
        assert!(allowed.contains("origin.com"));
        assert!(allowed.contains("cdn.origin.com:8080"));
        // Port-stripped hostname is allowed too.
        assert!(allowed.contains("cdn.origin.com"));
        assert!(!allowed.contains("evil.example"));
    }

    #[test]
    fn test_alias_always_contains_target() {
        let mut upstream = UpstreamConfig {
            target_domain: "origin.com".into(),
            target_domain_alias: vec!["www.origin.com".into()],
            ..UpstreamConfig::default()
        };
        upstream.finalize().unwrap();

        assert!(!upstream.is_external_domain("origin.com"));
        assert!(!upstream.is_external_domain("www.origin.com"));
        assert!(upstream.is_external_domain("cdn.origin.com"));
    }

    #[test]
    fn test_external_domain_sanitizing() {
        let mut upstream = UpstreamConfig {
            target_domain: "origin.com".into(),
            external_domains: vec!["https://cdn.origin.com/".into(), " static.origin.com ".into()],
            ..UpstreamConfig::default()
        };
        upstream.finalize().unwrap();
        assert_eq!(
            upstream.external_domains,
            vec!["cdn.origin.com".to_string(), "static.origin.com".to_string()]
        );
    }

    #[test]
    fn test_force_https_parsing() {
        #[derive(Deserialize)]
        struct Wrap {
            force_https_domains: ForceHttpsDomains,
        }

        let all: Wrap = toml::from_str("force_https_domains = \"ALL\"").unwrap();
        assert!(all.force_https_domains.applies_to("anything.example"));

        let none: Wrap = toml::from_str("force_https_domains = \"NONE\"").unwrap();
        assert!(!none.force_https_domains.applies_to("origin.com"));

        let some: Wrap = toml::from_str("force_https_domains = [\"cdn.origin.com\"]").unwrap();
        assert!(some.force_https_domains.applies_to("cdn.origin.com"));
        assert!(!some.force_https_domains.applies_to("origin.com"));

        let bad: Result<Wrap, _> = toml::from_str("force_https_domains = \"SOME\"");
        assert!(bad.is_err());
    }
}
