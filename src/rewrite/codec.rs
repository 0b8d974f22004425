//! Translation between mirror-space and origin-space URLs.
//!
//! Mirror-space URLs look like
//! `<my_scheme><my_host>[:port][/extdomains/<origin_host>]<origin_path>`;
//! origin-space URLs are what the upstream actually serves. Every URL leaving
//! the proxy toward the client must be in mirror space, every URL leaving
//! toward the upstream in origin space, and the two never mix inside a body.

use regex::Captures;

use crate::{
    config::MirrorConfig,
    rewrite::patterns::RegexLibrary,
};

/// Escape every `/` as `\/` (JSON string form).
pub fn esc_str(s: &str) -> String {
    s.replace('/', "\\/")
}

/// Undo [`esc_str`].
pub fn un_esc_str(s: &str) -> String {
    s.replace("\\/", "/")
}

/// Guess the colon escape form that pairs with a captured slash form.
///
/// `/` ⇒ `:`, `%2F` ⇒ `%3A`, `%2f` ⇒ `%3a`, `%252F` ⇒ `%253A`,
/// `%252f` ⇒ `%253a`.
pub fn guess_colon_from_slash(slash: &str) -> &'static str {
    if !slash.contains('%') {
        ":"
    } else if slash.contains("%25") {
        if slash.contains('F') { "%253A" } else { "%253a" }
    } else if slash.contains('F') {
        "%3A"
    } else {
        "%3a"
    }
}

/// Result of decoding a mirror-space URL.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedUrl {
    /// Origin host (may carry a port).
    pub domain: String,
    /// Whether the origin is contacted over https.
    pub is_https: bool,
    /// Origin path, without query string.
    pub path: String,
    /// Origin path including the query string.
    pub path_query: String,
}

/// Minimal URL splitter: scheme, authority, path, query, fragment.
///
/// Only what the codec needs; notably the authority is only recognized after
/// an explicit `//`, so `foo.bar/baz` parses as a bare path like it would in
/// a browser href.
#[derive(Debug, Default, PartialEq)]
struct SplitUrl<'a> {
    scheme: &'a str,
    netloc: &'a str,
    path: &'a str,
    query: Option<&'a str>,
    fragment: Option<&'a str>,
}

fn url_split(input: &str) -> SplitUrl<'_> {
    let mut out = SplitUrl::default();
    let mut rest = input;

    if let Some(pos) = rest.find('#') {
        out.fragment = Some(&rest[pos + 1..]);
        rest = &rest[..pos];
    }

    if let Some(pos) = rest.find("://") {
        let scheme = &rest[..pos];
        if !scheme.is_empty()
            && scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || "+-.".contains(c))
        {
            out.scheme = scheme;
            rest = &rest[pos + 1..];
        }
    }

    if let Some(stripped) = rest.strip_prefix("//") {
        let end = stripped
            .find(|c| c == '/' || c == '?')
            .unwrap_or(stripped.len());
        out.netloc = &stripped[..end];
        rest = &stripped[end..];
    }

    match rest.find('?') {
        Some(pos) => {
            out.path = &rest[..pos];
            out.query = Some(&rest[pos + 1..]);
        }
        None => out.path = rest,
    }
    out
}

/// Join a possibly-relative path against the directory of `base`,
/// normalizing `.` and `..` segments. Queries on `rel` are preserved.
fn join_paths(base: &str, rel: &str) -> String {
    let (rel_path, rel_query) = match rel.find('?') {
        Some(pos) => (&rel[..pos], Some(&rel[pos..])),
        None => (rel, None),
    };

    let merged = if rel_path.starts_with('/') {
        rel_path.to_string()
    } else {
        let dir = match base.rfind('/') {
            Some(pos) => &base[..=pos],
            None => "/",
        };
        format!("{dir}{rel_path}")
    };

    let mut normalized = remove_dot_segments(&merged);
    if let Some(query) = rel_query {
        normalized.push_str(query);
    }
    normalized
}

fn remove_dot_segments(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "." => {}
            ".." => {
                if segments.len() > 1 {
                    segments.pop();
                }
            }
            other => segments.push(other),
        }
    }

    let mut out = segments.join("/");
    if (path.ends_with('/') || path.ends_with("/.") || path.ends_with("/..")) && !out.ends_with('/')
    {
        out.push('/');
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

fn cap<'a>(caps: &'a Captures<'_>, name: &str) -> &'a str {
    caps.name(name).map(|m| m.as_str()).unwrap_or("")
}

/// The mirror↔origin URL translator.
///
/// Borrowed views of the process-wide config and regex tables; cheap to
/// construct per call site.
pub struct UrlCodec<'a> {
    pub conf: &'a MirrorConfig,
    pub lib: &'a RegexLibrary,
}

impl<'a> UrlCodec<'a> {
    pub fn new(conf: &'a MirrorConfig, lib: &'a RegexLibrary) -> Self {
        Self { conf, lib }
    }

    /// Reduce a URL to its path-and-query, `/` when the path is empty.
    pub fn extract_path_and_query(&self, full_url: &str) -> String {
        let split = url_split(full_url);
        let path = if split.path.is_empty() { "/" } else { split.path };
        match split.query {
            Some(query) if !query.is_empty() => format!("{path}?{query}"),
            _ => path.to_string(),
        }
    }

    /// Decode a mirror-space URL (or bare path) into origin-space parts.
    ///
    /// `input` may be a full URL, a path, or `None` to use the current
    /// request's path-and-query. JSON-escaped input (`\/`, `\.`) is
    /// unescaped for parsing and the escaping reapplied to the output.
    pub fn decode_mirror_url(&self, input: Option<&str>, current_path_query: &str) -> DecodedUrl {
        let mut escaped_slash = false;
        let mut escaped_dot = false;

        let work = match input {
            None => current_path_query.to_string(),
            Some(url) => {
                let mut url = url.to_string();
                if url.contains("\\/") {
                    escaped_slash = true;
                    url = url.replace("\\/", "/");
                }
                if url.contains("\\.") {
                    escaped_dot = true;
                    url = url.replace("\\.", ".");
                }
                url
            }
        };

        let mirror_path_query = self.extract_path_and_query(&work);

        let reescape = |mut s: String| {
            if escaped_dot {
                s = s.replace('.', "\\.");
            }
            if escaped_slash {
                s = esc_str(&s);
            }
            s
        };

        if let Some(rest) = mirror_path_query.strip_prefix("/extdomains/") {
            let authority_form = format!("//{}", rest.trim_start_matches('/'));
            let split = url_split(&authority_form);

            let mut real_domain = split.netloc.to_string();
            let is_https = match real_domain.strip_prefix("https-") {
                Some(stripped) => {
                    real_domain = stripped.to_string();
                    true
                }
                None => self.conf.upstream.is_domain_https(&real_domain),
            };

            let path = if split.path.is_empty() { "/" } else { split.path };
            let path_query = match split.query {
                Some(query) if !query.is_empty() => format!("{path}?{query}"),
                _ => path.to_string(),
            };
            let path_query = reescape(path_query);
            let path = path_query
                .split('?')
                .next()
                .unwrap_or(&path_query)
                .to_string();

            return DecodedUrl {
                domain: real_domain,
                is_https,
                path,
                path_query,
            };
        }

        let path_query = reescape(mirror_path_query);
        let path = path_query
            .split('?')
            .next()
            .unwrap_or(&path_query)
            .to_string();
        DecodedUrl {
            domain: self.conf.upstream.target_domain.clone(),
            is_https: self.conf.upstream.target_scheme == "https://",
            path,
            path_query,
        }
    }

    /// Encode an origin-space URL into mirror space.
    ///
    /// Already-mirror-space input and out-of-zone domains are returned
    /// unchanged. `fallback_domain` supplies the origin host for bare paths
    /// (usually the current request's remote domain).
    pub fn encode_mirror_url(
        &self,
        remote_url: &str,
        remote_domain: Option<&str>,
        has_scheme: bool,
        escaped: bool,
        fallback_domain: Option<&str>,
    ) -> String {
        let unescaped;
        let work = if escaped {
            unescaped = un_esc_str(remote_url);
            unescaped.as_str()
        } else {
            remote_url
        };

        let split = url_split(work);
        if split.path.starts_with("/extdomains/") {
            return remote_url.to_string();
        }

        let domain = remote_domain
            .filter(|d| !d.is_empty())
            .or(if split.netloc.is_empty() { None } else { Some(split.netloc) })
            .or(fallback_domain.filter(|d| !d.is_empty()))
            .unwrap_or(&self.conf.upstream.target_domain)
            .to_string();

        if !self.conf.upstream.allowed_domains().contains(&domain) {
            return remote_url.to_string();
        }

        let scheme_host = if !has_scheme {
            String::new()
        } else if work.starts_with("//") {
            format!("//{}", self.conf.my_host_with_port())
        } else if !split.scheme.is_empty() {
            self.conf.my_scheme_and_host()
        } else {
            String::new()
        };

        let middle = if self.conf.upstream.is_external_domain(&domain) {
            format!("/extdomains/{domain}")
        } else {
            String::new()
        };

        let mut path = split.path.to_string();
        if !middle.is_empty() && !path.starts_with('/') {
            path.insert(0, '/');
        }
        let mut mirror_url = format!("{scheme_host}{middle}{path}");
        if let Some(query) = split.query {
            mirror_url.push('?');
            mirror_url.push_str(query);
        }
        if let Some(fragment) = split.fragment {
            mirror_url.push('#');
            mirror_url.push_str(fragment);
        }

        if escaped {
            mirror_url = esc_str(&mirror_url);
        }
        mirror_url
    }

    /// Rewrite every bare `scheme://host` reference in `text` to mirror
    /// space, reproducing the escape forms of the source.
    pub fn rewrite_remote_to_mirror_url(&self, text: &str) -> String {
        self.lib
            .basic_url
            .replace_all(text, |caps: &Captures| self.to_mirror_url(caps))
            .into_owned()
    }

    fn to_mirror_url(&self, caps: &Captures) -> String {
        let whole = caps.get(0).map(|m| m.as_str()).unwrap_or("").to_string();

        let domain = cap(caps, "domain");
        if !self.conf.upstream.allowed_domains().contains(domain) {
            return whole;
        }

        let scheme_slash = cap(caps, "scheme_slash");
        // Both scheme slashes and any suffix slash must reuse one escape
        // form; mixed forms are left untouched.
        if !scheme_slash.is_empty() && scheme_slash != cap(caps, "scheme_slash2") {
            return whole;
        }
        let suffix_slash = cap(caps, "suffix_slash");
        if !scheme_slash.is_empty() && !suffix_slash.is_empty() && suffix_slash != scheme_slash {
            return whole;
        }
        let quote = cap(caps, "quote");
        let quote_right = cap(caps, "quote_right");
        if !quote.is_empty() && quote != quote_right {
            return whole;
        }

        let slash = if !scheme_slash.is_empty() {
            scheme_slash
        } else if !suffix_slash.is_empty() {
            suffix_slash
        } else {
            "/"
        };
        let captured_colon = caps.name("colon").map(|m| m.as_str());
        let colon = captured_colon.unwrap_or_else(|| guess_colon_from_slash(slash));

        let my_host = if self.conf.server.my_port.is_some() {
            self.conf.my_host_with_port().replace(':', colon)
        } else {
            self.conf.my_host_with_port()
        };

        let core = if self.conf.upstream.is_external_domain(domain) {
            format!("{my_host}{slash}extdomains{slash}{domain}{suffix_slash}")
        } else {
            format!("{my_host}{suffix_slash}")
        };

        if !quote.is_empty() {
            // bare quoted domain: "target.domain"
            format!("{quote}{core}{quote}")
        } else if captured_colon.is_some() {
            // absolute: http(s)://target.domain
            let scheme = self
                .conf
                .server
                .my_scheme
                .replace(':', colon)
                .replace('/', slash);
            format!("{scheme}{core}{quote_right}")
        } else {
            // scheme-relative: //target.domain
            format!("{slash}{slash}{core}{quote_right}")
        }
    }

    /// Reassemble one advanced-pattern match into mirror space, or return
    /// it verbatim when any of the drop rules applies.
    pub fn reassemble_url(
        &self,
        caps: &Captures,
        remote_domain: &str,
        remote_path: &str,
        mime: &str,
    ) -> String {
        let whole = caps.get(0).map(|m| m.as_str()).unwrap_or("").to_string();

        let prefix = cap(caps, "prefix");
        let quote_left = cap(caps, "quote_left");
        let quote_right = cap(caps, "quote_right");
        let scheme = cap(caps, "scheme");
        let match_domain = cap(caps, "domain");
        let mut path = cap(caps, "path").to_string();
        let suffix = cap(caps, "right_suffix");

        let require_slash_escape = path.contains("\\/") || scheme.contains("\\/");
        if require_slash_escape {
            path = un_esc_str(&path);
        }

        // Only url(...) and @import may be unquoted; everything else needs a
        // real left quote and must not close with a parenthesis.
        if path.is_empty()
            || (!prefix.contains("url")
                && !prefix.contains("import")
                && (quote_left.is_empty() || quote_right == ")"))
        {
            return whole;
        }
        // A "key":"value" candidate needs a '/' somewhere to count as a URL,
        // and quotes must balance.
        if (prefix.contains(':') && !path.contains('/'))
            || (!quote_left.is_empty() && quote_left != quote_right)
        {
            return whole;
        }
        // In javascript (and json "key" prefixes) only rewrite explicit
        // schemes; bare paths are too likely to be string concatenation.
        if scheme.is_empty() && (mime.contains("javascript") || prefix.contains('"')) {
            return whole;
        }

        let domain = if match_domain.is_empty() {
            remote_domain
        } else {
            match_domain
        };
        if !self.conf.upstream.allowed_domains().contains(domain) {
            return whole;
        }

        let mut path = join_paths(remote_path, &path);
        if !path.starts_with('/') {
            path.insert(0, '/');
        }
        if self.conf.upstream.is_external_domain(domain) {
            path = format!("/extdomains/{domain}{path}");
        }

        let scheme_host = if scheme.is_empty() {
            String::new()
        } else if !scheme.contains("http") {
            format!("//{}", self.conf.my_host_with_port())
        } else {
            self.conf.my_scheme_and_host()
        };

        let mut full_url = format!("{scheme_host}{path}");
        if require_slash_escape {
            full_url = esc_str(&full_url);
        }

        format!("{prefix}{quote_left}{full_url}{quote_right}{suffix}")
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::config::UpstreamConfig;

    fn test_config() -> MirrorConfig {
        let mut conf = MirrorConfig::default();
        conf.server.my_host_name = "mirror.example".into();
        conf.server.my_port = None;
        conf.upstream = UpstreamConfig::for_tests(
            "origin.com",
            "https://",
            &["cdn.origin.com", "static.origin.com"],
        );
        conf
    }

    fn with_codec<R>(conf: &MirrorConfig, f: impl FnOnce(UrlCodec<'_>) -> R) -> R {
        let lib = RegexLibrary::compile(conf).unwrap();
        f(UrlCodec::new(conf, &lib))
    }

    #[rstest]
    #[case("/", ":")]
    #[case("%2F", "%3A")]
    #[case("%2f", "%3a")]
    #[case("%252F", "%253A")]
    #[case("%252f", "%253a")]
    fn test_guess_colon_from_slash(#[case] slash: &str, #[case] colon: &str) {
        assert_eq!(guess_colon_from_slash(slash), colon);
    }

    #[test]
    fn test_url_split() {
        let split = url_split("https://origin.com:8080/a/b?x=1#frag");
        assert_eq!(split.scheme, "https");
        assert_eq!(split.netloc, "origin.com:8080");
        assert_eq!(split.path, "/a/b");
        assert_eq!(split.query, Some("x=1"));
        assert_eq!(split.fragment, Some("frag"));

        // no scheme, no authority: a bare path
        let split = url_split("foo.bar/baz");
        assert_eq!(split.netloc, "");
        assert_eq!(split.path, "foo.bar/baz");

        // scheme-relative
        let split = url_split("//cdn.origin.com/i.png");
        assert_eq!(split.netloc, "cdn.origin.com");
        assert_eq!(split.path, "/i.png");
    }

    #[test]
    fn test_join_paths() {
        assert_eq!(join_paths("/a/b.html", "c.js"), "/a/c.js");
        assert_eq!(join_paths("/a/b.html", "/c.js"), "/c.js");
        assert_eq!(join_paths("/a/b/", "../up.css"), "/a/up.css");
        assert_eq!(join_paths("/a/b.html", "c.js?x=1"), "/a/c.js?x=1");
        assert_eq!(join_paths("/", "img/i.png"), "/img/i.png");
    }

    #[test]
    fn test_decode_main_domain() {
        let conf = test_config();
        with_codec(&conf, |codec| {
            let decoded = codec.decode_mirror_url(None, "/foo/bar?x=1");
            assert_eq!(decoded.domain, "origin.com");
            assert!(decoded.is_https);
            assert_eq!(decoded.path, "/foo/bar");
            assert_eq!(decoded.path_query, "/foo/bar?x=1");
        });
    }

    #[test]
    fn test_decode_extdomains() {
        let conf = test_config();
        with_codec(&conf, |codec| {
            let decoded = codec.decode_mirror_url(Some("/extdomains/cdn.origin.com/a.js"), "/");
            assert_eq!(decoded.domain, "cdn.origin.com");
            assert!(!decoded.is_https);
            assert_eq!(decoded.path_query, "/a.js");

            let decoded =
                codec.decode_mirror_url(Some("/extdomains/https-cdn.origin.com/a.js"), "/");
            assert_eq!(decoded.domain, "cdn.origin.com");
            assert!(decoded.is_https);
        });
    }

    #[test]
    fn test_decode_full_mirror_url() {
        let conf = test_config();
        with_codec(&conf, |codec| {
            let decoded = codec.decode_mirror_url(
                Some("http://mirror.example/extdomains/cdn.origin.com/x?y=1"),
                "/",
            );
            assert_eq!(decoded.domain, "cdn.origin.com");
            assert_eq!(decoded.path_query, "/x?y=1");
        });
    }

    #[test]
    fn test_decode_respects_force_https() {
        let mut conf = test_config();
        conf.upstream.force_https_domains =
            crate::config::ForceHttpsDomains::Only(["cdn.origin.com".to_string()].into());
        with_codec(&conf, |codec| {
            let decoded = codec.decode_mirror_url(Some("/extdomains/cdn.origin.com/a.js"), "/");
            assert!(decoded.is_https);
            let decoded = codec.decode_mirror_url(Some("/extdomains/static.origin.com/a.js"), "/");
            assert!(!decoded.is_https);
        });
    }

    #[test]
    fn test_decode_json_escaped() {
        let conf = test_config();
        with_codec(&conf, |codec| {
            let decoded =
                codec.decode_mirror_url(Some(r"\/extdomains\/cdn.origin.com\/a\/b.js"), "/");
            assert_eq!(decoded.domain, "cdn.origin.com");
            // escaping restored on output
            assert_eq!(decoded.path_query, r"\/a\/b.js");
        });
    }

    #[test]
    fn test_encode_main_and_external() {
        let conf = test_config();
        with_codec(&conf, |codec| {
            assert_eq!(
                codec.encode_mirror_url("https://origin.com/baz", None, true, false, None),
                "http://mirror.example/baz"
            );
            assert_eq!(
                codec.encode_mirror_url("https://cdn.origin.com/a.js", None, true, false, None),
                "http://mirror.example/extdomains/cdn.origin.com/a.js"
            );
            // scheme-relative stays scheme-relative
            assert_eq!(
                codec.encode_mirror_url("//cdn.origin.com/a.js", None, true, false, None),
                "//mirror.example/extdomains/cdn.origin.com/a.js"
            );
            // bare path resolves against the fallback domain
            assert_eq!(
                codec.encode_mirror_url("/baz?q=1#frag", None, true, false, Some("origin.com")),
                "/baz?q=1#frag"
            );
        });
    }

    #[test]
    fn test_encode_out_of_zone_unchanged() {
        let conf = test_config();
        with_codec(&conf, |codec| {
            for url in [
                "https://google.com/x",
                "//tracker.example/t.js",
                "http://origin.com.evil.example/",
            ] {
                assert_eq!(codec.encode_mirror_url(url, None, true, false, None), url);
            }
        });
    }

    #[test]
    fn test_encode_idempotent() {
        let conf = test_config();
        with_codec(&conf, |codec| {
            let once = codec.encode_mirror_url("https://cdn.origin.com/a.js", None, true, false, None);
            let twice = codec.encode_mirror_url(&once, None, true, false, None);
            assert_eq!(once, twice);
        });
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let mut conf = test_config();
        conf.upstream.force_https_domains =
            crate::config::ForceHttpsDomains::Only(["cdn.origin.com".to_string()].into());
        with_codec(&conf, |codec| {
            // external domain, https forced by policy
            let mirror =
                codec.encode_mirror_url("https://cdn.origin.com/a/b.js?x=1", None, true, false, None);
            let decoded = codec.decode_mirror_url(Some(&mirror), "/");
            assert_eq!(decoded.domain, "cdn.origin.com");
            assert!(decoded.is_https);
            assert_eq!(decoded.path_query, "/a/b.js?x=1");

            // main domain
            let mirror = codec.encode_mirror_url("https://origin.com/p?q=2", None, true, false, None);
            let decoded = codec.decode_mirror_url(Some(&mirror), "/");
            assert_eq!(decoded.domain, "origin.com");
            assert!(decoded.is_https);
            assert_eq!(decoded.path_query, "/p?q=2");
        });
    }

    #[test]
    fn test_encode_escaped_form() {
        let conf = test_config();
        with_codec(&conf, |codec| {
            let mirror = codec.encode_mirror_url(
                r"https:\/\/origin.com\/x",
                None,
                true,
                true,
                None,
            );
            assert_eq!(mirror, r"http:\/\/mirror.example\/x");
        });
    }

    #[test]
    fn test_basic_rewrite_absolute_and_relative() {
        let conf = test_config();
        with_codec(&conf, |codec| {
            assert_eq!(
                codec.rewrite_remote_to_mirror_url("visit https://origin.com/ now"),
                "visit http://mirror.example/ now"
            );
            assert_eq!(
                codec.rewrite_remote_to_mirror_url("<img src=\"//cdn.origin.com/\">"),
                "<img src=\"//mirror.example/extdomains/cdn.origin.com/\">"
            );
        });
    }

    #[test]
    fn test_basic_rewrite_preserves_escape_forms() {
        let conf = test_config();
        with_codec(&conf, |codec| {
            // json escaped
            assert_eq!(
                codec.rewrite_remote_to_mirror_url(r"https:\/\/origin.com\/"),
                r"http:\/\/mirror.example\/"
            );
            // urlencoded, uppercase
            assert_eq!(
                codec.rewrite_remote_to_mirror_url("https%3A%2F%2Forigin.com%2F"),
                "http%3A%2F%2Fmirror.example%2F"
            );
            // urlencoded, lowercase slash picks lowercase colon
            assert_eq!(
                codec.rewrite_remote_to_mirror_url("%2f%2forigin.com%2f"),
                "%2f%2fmirror.example%2f"
            );
        });
    }

    #[test]
    fn test_basic_rewrite_out_of_zone_untouched() {
        let conf = test_config();
        with_codec(&conf, |codec| {
            let text = "see https://unrelated.com/ here";
            assert_eq!(codec.rewrite_remote_to_mirror_url(text), text);
        });
    }

    #[test]
    fn test_basic_rewrite_quoted_bare_domain() {
        let conf = test_config();
        with_codec(&conf, |codec| {
            assert_eq!(
                codec.rewrite_remote_to_mirror_url(r#"{"host":"origin.com"}"#),
                r#"{"host":"mirror.example"}"#
            );
        });
    }

    fn reassemble_all(codec: &UrlCodec<'_>, text: &str, mime: &str) -> String {
        codec
            .lib
            .adv_url
            .replace_all(text, |caps: &Captures| {
                codec.reassemble_url(caps, "origin.com", "/page/index.html", mime)
            })
            .into_owned()
    }

    #[test]
    fn test_reassemble_absolute_href() {
        let conf = test_config();
        with_codec(&conf, |codec| {
            let out = reassemble_all(
                &codec,
                r#"<a href="https://origin.com/x"> "#,
                "text/html",
            );
            assert_eq!(out, r#"<a href="http://mirror.example/x"> "#);
        });
    }

    #[test]
    fn test_reassemble_relative_resolves_against_remote_path() {
        let conf = test_config();
        with_codec(&conf, |codec| {
            let out = reassemble_all(&codec, r#"<script src="app.js"> "#, "text/html");
            assert_eq!(out, r#"<script src="/page/app.js"> "#);
        });
    }

    #[test]
    fn test_reassemble_external_gets_extdomains() {
        let conf = test_config();
        with_codec(&conf, |codec| {
            let out = reassemble_all(
                &codec,
                r#"<img src="//cdn.origin.com/i.png"> "#,
                "text/html",
            );
            assert_eq!(
                out,
                r#"<img src="//mirror.example/extdomains/cdn.origin.com/i.png"> "#
            );
        });
    }

    #[test]
    fn test_reassemble_out_of_zone_untouched() {
        let conf = test_config();
        with_codec(&conf, |codec| {
            let text = r#"<img src="https://unrelated.com/i.png"> "#;
            assert_eq!(reassemble_all(&codec, text, "text/html"), text);
        });
    }

    #[test]
    fn test_reassemble_javascript_requires_scheme() {
        let conf = test_config();
        with_codec(&conf, |codec| {
            // bare path in javascript: left alone
            let text = r#"var a = { "src": "/partial/view" };"#;
            assert_eq!(
                reassemble_all(&codec, text, "application/javascript"),
                text
            );
            // explicit scheme in javascript: rewritten
            let out = reassemble_all(
                &codec,
                r#"fetch(url("https://origin.com/api/v1")) "#,
                "application/javascript",
            );
            assert!(out.contains("http://mirror.example/api/v1"), "got: {out}");
        });
    }

    #[test]
    fn test_reassemble_json_escaped_slashes_preserved() {
        let conf = test_config();
        with_codec(&conf, |codec| {
            let out = reassemble_all(
                &codec,
                r#""url": "https:\/\/origin.com\/x\/y", "#,
                "application/json",
            );
            assert_eq!(out, r#""url": "http:\/\/mirror.example\/x\/y", "#);
        });
    }

    #[test]
    fn test_reassemble_unbalanced_quotes_untouched() {
        let conf = test_config();
        with_codec(&conf, |codec| {
            let text = r#"<a href="https://origin.com/x') "#;
            assert_eq!(reassemble_all(&codec, text, "text/html"), text);
        });
    }
}
