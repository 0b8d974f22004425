//! Request-side rewriting: mirror URL decoding, client header filtering,
//! request body text rewrite.

use std::collections::BTreeMap;

use bytes::Bytes;
use dashmap::DashMap;
use http::HeaderMap;
use regex::Captures;

use crate::{
    config::MirrorConfig,
    context::RequestContext,
    rewrite::{codec::UrlCodec, encoding_detect, patterns::RegexLibrary, string_trace},
};

fn cap<'a>(caps: &'a Captures<'_>, name: &str) -> &'a str {
    caps.name(name).map(|m| m.as_str()).unwrap_or("")
}

/// Parses the incoming request into origin-space and scrubs every trace of
/// the mirror host from what gets forwarded upstream.
pub struct RequestRewriter<'a> {
    conf: &'a MirrorConfig,
    lib: &'a RegexLibrary,
}

impl<'a> RequestRewriter<'a> {
    pub fn new(conf: &'a MirrorConfig, lib: &'a RegexLibrary) -> Self {
        Self { conf, lib }
    }

    /// Fill the context from the request line and headers.
    ///
    /// Decodes the mirror URL, assembles the origin URL, filters the client
    /// headers and records the domain in the recent-domains set.
    pub fn assemble_parse(
        &self,
        ctx: &mut RequestContext,
        request_path_query: &str,
        headers: &HeaderMap,
        recent_domains: &DashMap<String, ()>,
    ) {
        let codec = UrlCodec::new(self.conf, self.lib);
        let decoded = codec.decode_mirror_url(None, request_path_query);

        ctx.remote_domain = decoded.domain;
        ctx.is_https = decoded.is_https;
        ctx.remote_path = decoded.path;
        ctx.remote_path_query = decoded.path_query;
        ctx.is_external_domain = self.conf.upstream.is_external_domain(&ctx.remote_domain);
        ctx.remote_url = self.assemble_remote_url(ctx);
        ctx.url_no_scheme = match ctx.remote_url.find("//") {
            Some(pos) => ctx.remote_url[pos + 2..].to_string(),
            None => ctx.remote_url.clone(),
        };
        ctx.client_header = self.extract_client_header(headers);

        recent_domains.insert(ctx.remote_domain.clone(), ());

        tracing::debug!(
            remote_url = %ctx.remote_url,
            path_query = %ctx.remote_path_query,
            external = ctx.is_external_domain,
            "assembled origin request"
        );
    }

    /// The fully-qualified origin URL for this request.
    fn assemble_remote_url(&self, ctx: &RequestContext) -> String {
        if ctx.is_external_domain {
            let scheme = if ctx.is_https { "https://" } else { "http://" };
            format!("{scheme}{}{}", ctx.remote_domain, ctx.remote_path_query)
        } else {
            format!(
                "{}{}{}",
                self.conf.upstream.target_scheme,
                self.conf.upstream.target_domain,
                ctx.remote_path_query
            )
        }
    }

    /// Black-list filter the inbound headers, lowercasing all names.
    ///
    /// `host` and `content-length` are dropped and regenerated downstream;
    /// an empty `content-type` is dropped entirely; `accept-encoding` loses
    /// the encodings the upstream client cannot decode; everything else is
    /// kept after a text rewrite of its value.
    pub fn extract_client_header(&self, headers: &HeaderMap) -> BTreeMap<String, String> {
        let mut rewritten = BTreeMap::new();

        for (name, value) in headers {
            let name = name.as_str().to_ascii_lowercase();
            let Ok(value) = value.to_str() else {
                tracing::warn!(header = %name, "dropping non-utf8 request header");
                continue;
            };

            match name.as_str() {
                "host" | "content-length" => {}
                "content-type" if value.is_empty() => {}
                "accept-encoding" if value.contains("br") || value.contains("sdch") => {
                    // reqwest decodes gzip and deflate only; advertising br
                    // or sdch upstream would hand us bodies we cannot read.
                    let mut kept = String::new();
                    if value.contains("gzip") {
                        kept.push_str("gzip, ");
                    }
                    if value.contains("deflate") {
                        kept.push_str("deflate");
                    }
                    if !kept.is_empty() {
                        rewritten.insert(name, kept);
                    }
                }
                _ => {
                    let mut value = self.client_requests_text_rewrite(value);
                    if name == "cookie" {
                        value = self
                            .lib
                            .verify_header
                            .replace_all(&value, "")
                            .into_owned();
                    }
                    rewritten.insert(name, value);
                }
            }
        }

        rewritten
    }

    /// Rewrite mirror-space text back to origin space.
    ///
    /// Used on header values, query strings and request bodies; handles
    /// `/extdomains/` forms and urlencoded variants:
    ///
    /// - `http://mirror/extdomains/accounts.origin.com/x` → `http://accounts.origin.com/x`
    /// - `mirror/foobar` → `origin.com/foobar`
    /// - `http%3a%2f%2fmirror%2fextdomains%2Fa.origin.com%2f1` → `http%3a%2f%2fa.origin.com%2f1`
    pub fn client_requests_text_rewrite(&self, raw_text: &str) -> String {
        let replaced = self
            .lib
            .ext_domains
            .replace_all(raw_text, |caps: &Captures| self.replace_to_real_domain(caps));
        string_trace(self.conf, "client_requests_text_rewrite", &replaced);

        let replaced = self.lib.main_domain.replace_all(
            &replaced,
            regex::NoExpand(self.conf.upstream.target_domain.as_str()),
        );

        // belt-and-braces plain replacement after the regex passes
        replaced.replace(
            &self.conf.my_host_with_port(),
            &self.conf.upstream.target_domain,
        )
    }

    fn replace_to_real_domain(&self, caps: &Captures) -> String {
        let real_domain = cap(caps, "real_domain");
        let mut out = String::new();

        if caps.name("scheme").is_some() {
            let scheme_slash = cap(caps, "scheme_slash");
            if let Some(colon) = caps.name("colon") {
                let https = caps.name("is_https").is_some()
                    || self.conf.upstream.is_domain_https(real_domain);
                out.push_str(if https { "https" } else { "http" });
                out.push_str(colon.as_str());
            }
            out.push_str(scheme_slash);
            out.push_str(scheme_slash);
        }

        out.push_str(real_domain);
        out
    }

    /// Decode the request body and, when it is text, rewrite it to origin
    /// space. Undecodable bodies are forwarded untouched.
    pub fn try_decode_request_data(&self, body: &Bytes) -> (Option<Bytes>, Option<&'static str>) {
        if body.is_empty() {
            return (None, None);
        }

        if let Some(encoding) = encoding_detect(self.conf, body) {
            if let Some(text) = encoding.decode_without_bom_handling_and_without_replacement(body) {
                let rewritten = self.client_requests_text_rewrite(&text);
                let (encoded, _, _) = encoding.encode(&rewritten);
                return (Some(Bytes::from(encoded.into_owned())), Some(encoding.name()));
            }
        }
        (Some(body.clone()), None)
    }
}
