//! Response-side rewriting: classification, text-body URL rewriting,
//! header filtering, cookie rewriting.

use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use regex::Captures;

use crate::{
    config::{InjectPosition, MirrorConfig},
    context::RequestContext,
    hooks::{LOCATION_MIME, TextRewriter},
    mime::{extract_mime_from_content_type, is_mime_represents_text, is_mime_streamable},
    rewrite::{codec::UrlCodec, encoding_detect, inject::inject_content, patterns::RegexLibrary,
        string_trace},
};

/// Rewrites upstream responses into mirror space.
pub struct ResponseRewriter<'a> {
    conf: &'a MirrorConfig,
    lib: &'a RegexLibrary,
    hook: Option<&'a dyn TextRewriter>,
}

impl<'a> ResponseRewriter<'a> {
    pub fn new(
        conf: &'a MirrorConfig,
        lib: &'a RegexLibrary,
        hook: Option<&'a dyn TextRewriter>,
    ) -> Self {
        Self { conf, lib, hook }
    }

    fn codec(&self) -> UrlCodec<'a> {
        UrlCodec::new(self.conf, self.lib)
    }

    /// Classify the upstream response: mime, stream mode, cacheability.
    ///
    /// Cache policy is deliberately conservative: GET + 200 and none of the
    /// opt-out `Cache-Control` directives.
    pub fn parse_remote_response(&self, ctx: &mut RequestContext) {
        let Some(remote) = &ctx.remote_response else {
            return;
        };

        ctx.content_type = remote
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        ctx.mime = extract_mime_from_content_type(&ctx.content_type);

        ctx.stream_our_response =
            self.conf.transport.stream_transfer_enable && is_mime_streamable(&ctx.mime);

        let cache_control = remote
            .headers
            .get(header::CACHE_CONTROL)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        ctx.cacheable = !cache_control.contains("no-store")
            && !cache_control.contains("must-revalidate")
            && !cache_control.contains("max-age=0")
            && !cache_control.contains("private")
            && ctx.method == Method::GET
            && remote.status == StatusCode::OK;

        tracing::debug!(
            content_type = %ctx.content_type,
            streamable = ctx.stream_our_response,
            cacheable = ctx.cacheable,
            "classified upstream response"
        );
    }

    /// Rewrite all URLs in a text body to mirror space: the path-aware
    /// advanced pass first, then the bare `scheme://host` pass.
    pub fn response_text_rewrite(&self, ctx: &RequestContext, text: &str) -> String {
        let codec = self.codec();

        let text = self
            .lib
            .adv_url
            .replace_all(text, |caps: &Captures| {
                codec.reassemble_url(caps, &ctx.remote_domain, &ctx.remote_path, &ctx.mime)
            })
            .into_owned();
        string_trace(self.conf, "advanced_url_rewrite", &text);

        let text = codec.rewrite_remote_to_mirror_url(&text);
        string_trace(self.conf, "basic_mirrorlization", &text);

        text
    }

    /// Rewrite a response body. Non-text bodies pass through untouched;
    /// text bodies are decoded, run through the custom rewriter (which may
    /// skip the builtin pass), URL-rewritten, optionally injected into, and
    /// re-encoded as UTF-8.
    pub fn response_content_rewrite(&self, ctx: &RequestContext, content: Bytes) -> Bytes {
        if !is_mime_represents_text(&ctx.mime, &self.conf.content.text_like_mime_types) {
            tracing::debug!(content_type = %ctx.content_type, "binary body, not rewriting");
            return content;
        }

        let decoded = match encoding_detect(self.conf, &content) {
            Some(encoding) if self.conf.content.force_decode_with_charsets.is_some() => {
                // the operator pinned a charset; decode lossily with it
                Some(encoding.decode(&content).0.into_owned())
            }
            Some(encoding) => encoding
                .decode_without_bom_handling_and_without_replacement(&content)
                .map(|text| text.into_owned()),
            None => std::str::from_utf8(&content).ok().map(str::to_owned),
        };
        let Some(mut text) = decoded else {
            tracing::warn!(
                mime = %ctx.mime,
                "text-like body failed charset negotiation, passing through as bytes"
            );
            return content;
        };
        string_trace(self.conf, "raw_response_text", &text);

        if self.conf.content.custom_text_rewriter_enable {
            if let Some(hook) = self.hook {
                let outcome = hook.rewrite(text, &ctx.mime, &ctx.remote_url);
                text = outcome.text;
                if outcome.skip_builtin {
                    tracing::info!(url = %ctx.remote_url, "custom rewriter skipped builtin rewrite");
                    return Bytes::from(text.into_bytes());
                }
                string_trace(self.conf, "custom_text_rewrite", &text);
            }
        }

        text = self.response_text_rewrite(ctx, &text);

        if ctx.mime == "text/html" {
            for position in [InjectPosition::HeadFirst, InjectPosition::HeadLast] {
                for rule in self.lib.inject_rules(position) {
                    if let Some(url_regex) = &rule.url_regex {
                        if !url_regex.is_match(&ctx.url_no_scheme) {
                            continue;
                        }
                    }
                    text = inject_content(position, &text, &rule.content);
                }
            }
        }

        Bytes::from(text.into_bytes())
    }

    /// Whitelist-filter the upstream headers into our response headers.
    ///
    /// `Location` is translated to mirror space, text `Content-Type` gains
    /// an explicit utf-8 charset, CORS origin headers are dropped (the
    /// mirror answers CORS itself), and every `Set-Cookie` is rewritten.
    pub fn rewrite_resp_headers(&self, ctx: &RequestContext, remote_headers: &HeaderMap) -> HeaderMap {
        let mut out = HeaderMap::new();

        for (name, value) in remote_headers {
            let lower = name.as_str();

            if self
                .conf
                .content
                .allowed_remote_response_headers
                .contains(lower)
            {
                match lower {
                    "location" => {
                        let Ok(location) = value.to_str() else { continue };
                        let mut location = location.to_string();
                        if self.conf.content.custom_text_rewriter_enable {
                            if let Some(hook) = self.hook {
                                location = hook
                                    .rewrite(location, LOCATION_MIME, &ctx.remote_url)
                                    .text;
                            }
                        }
                        let mirrored = self.codec().encode_mirror_url(
                            &location,
                            None,
                            true,
                            false,
                            Some(&ctx.remote_domain),
                        );
                        if let Ok(v) = HeaderValue::from_str(&mirrored) {
                            out.insert(header::LOCATION, v);
                        }
                    }
                    "content-type" => {
                        let is_text = is_mime_represents_text(
                            &ctx.mime,
                            &self.conf.content.text_like_mime_types,
                        );
                        if is_text && !ctx.content_type.contains("utf-8") {
                            // the body is re-encoded as utf-8, say so
                            let v = format!("{}; charset=utf-8", ctx.mime);
                            if let Ok(v) = HeaderValue::from_str(&v) {
                                out.insert(header::CONTENT_TYPE, v);
                            }
                        } else {
                            out.insert(header::CONTENT_TYPE, value.clone());
                        }
                    }
                    // the mirror answers CORS itself
                    "access-control-allow-origin" | "timing-allow-origin" => {}
                    _ => {
                        out.append(name.clone(), value.clone());
                    }
                }
            }

            if lower == "set-cookie" {
                if let Ok(raw) = value.to_str() {
                    let rewritten = self.response_cookie_rewrite(ctx, raw);
                    if let Ok(v) = HeaderValue::from_str(&rewritten) {
                        out.append(header::SET_COOKIE, v);
                    }
                }
            }
        }

        out
    }

    /// Rewrite one raw `Set-Cookie` value into mirror space.
    ///
    /// `Domain=` becomes the mirror host; on external-domain responses the
    /// `Path=` is moved under `/extdomains/<host>`; `Secure` is dropped when
    /// the mirror itself is plain http (the cookie would never return).
    pub fn response_cookie_rewrite(&self, ctx: &RequestContext, cookie: &str) -> String {
        let host = &self.conf.server.my_host_name;
        let mut cookie = self
            .lib
            .cookie_domain
            .replace_all(cookie, |caps: &Captures| {
                format!("{}={}", &caps["prefix"], host)
            })
            .into_owned();

        if ctx.is_external_domain {
            let domain = &ctx.remote_domain;
            cookie = self
                .lib
                .cookie_path
                .replace_all(&cookie, |caps: &Captures| {
                    format!("{}=/extdomains/{}{}", &caps["prefix"], domain, &caps["path"])
                })
                .into_owned();
        }

        if self.conf.server.my_scheme == "http://" {
            cookie = cookie
                .split(';')
                .filter(|token| !token.trim().eq_ignore_ascii_case("secure"))
                .collect::<Vec<_>>()
                .join(";");
        }

        cookie
    }
}
