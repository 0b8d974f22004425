//! Per-request orchestration.
//!
//! Build the context → request rewrite → cache lookup → upstream fetch →
//! classify → rewrite or relay → emit. The cache is consulted before the
//! fetch and written after the response (for streams, after the last chunk
//! reached the client). Anything that prevents producing a response becomes
//! the HTML error page.

use std::{io, sync::Arc, time::Instant};

use axum::body::Body;
use bytes::Bytes;
use dashmap::DashMap;
use futures_util::StreamExt;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header};

use crate::{
    cache::{CacheMeta, CachedResponse, MemoryCache, ResponseCache, expires_from_mime},
    config::MirrorConfig,
    context::RequestContext,
    error::MirrorError,
    hooks::TextRewriter,
    pages,
    rewrite::{patterns::RegexLibrary, request::RequestRewriter, response::ResponseRewriter},
    streaming::{CachePopulate, RelayOptions, relay_stream},
    upstream::UpstreamClient,
};

/// Marker header on responses served from the local cache.
const CACHE_HIT_HEADER: &str = "x-zmirror-cache";

type Response = axum::response::Response;

/// Process-wide shared state: immutable config and regex tables, the
/// upstream client pool, the optional cache and hooks, and the monotone
/// recent-domains set.
pub struct MirrorState {
    pub conf: Arc<MirrorConfig>,
    pub lib: Arc<RegexLibrary>,
    pub upstream: UpstreamClient,
    pub cache: Option<Arc<dyn ResponseCache>>,
    pub text_rewriter: Option<Arc<dyn TextRewriter>>,
    pub recent_domains: Arc<DashMap<String, ()>>,
}

impl MirrorState {
    /// Build the state from a finalized config.
    ///
    /// The regex tables are compiled here, in a single phase after the
    /// config is fully loaded. A failing cache backend disables caching for
    /// the process instead of refusing to start.
    pub fn build(conf: MirrorConfig) -> Result<Self, MirrorError> {
        let conf = Arc::new(conf);
        let lib = Arc::new(RegexLibrary::compile(&conf)?);
        let upstream = UpstreamClient::new(conf.clone());

        let cache: Option<Arc<dyn ResponseCache>> = if conf.cache.local_cache_enable {
            Some(Arc::new(MemoryCache::new(conf.cache.max_entries)))
        } else {
            None
        };

        Ok(Self {
            conf,
            lib,
            upstream,
            cache,
            text_rewriter: None,
            recent_domains: Arc::new(DashMap::new()),
        })
    }

    /// Register the custom response text rewriter.
    pub fn with_text_rewriter(mut self, hook: Arc<dyn TextRewriter>) -> Self {
        self.text_rewriter = Some(hook);
        self
    }
}

/// Handle one mirrored request end to end. Never fails: errors become the
/// error page (with a context snapshot when dumping is enabled).
pub async fn process(
    state: &MirrorState,
    method: Method,
    path_query: &str,
    headers: &HeaderMap,
    body: Bytes,
) -> Response {
    let mut ctx = RequestContext::new(method);

    match run(state, &mut ctx, path_query, headers, body).await {
        Ok(response) => response,
        Err(err) => {
            tracing::error!(url = %ctx.remote_url, error = %err, "request failed");
            error_response(state, &ctx, &err)
        }
    }
}

async fn run(
    state: &MirrorState,
    ctx: &mut RequestContext,
    path_query: &str,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Response, MirrorError> {
    let conf = state.conf.as_ref();
    let request_rw = RequestRewriter::new(conf, &state.lib);
    request_rw.assemble_parse(ctx, path_query, headers, &state.recent_domains);

    if let Some(response) = try_serve_from_cache(state, ctx, headers).await {
        return Ok(response);
    }

    let (request_data, request_encoding) = request_rw.try_decode_request_data(&body);
    ctx.request_data = request_data.clone();
    ctx.request_data_encoding = request_encoding;

    let remote_url = ctx.remote_url.clone();
    let remote = state
        .upstream
        .send(
            ctx.method.clone(),
            &remote_url,
            &ctx.client_header,
            request_data,
            &mut ctx.time,
        )
        .await?;
    ctx.remote_response = Some(remote);

    let hook = state.text_rewriter.as_deref();
    let response_rw = ResponseRewriter::new(conf, &state.lib, hook);
    response_rw.parse_remote_response(ctx);

    let remote = ctx
        .remote_response
        .take()
        .ok_or_else(|| MirrorError::Rewrite("remote response vanished mid-pipeline".into()))?;
    let status = remote.status;
    let last_modified = remote
        .headers
        .get(header::LAST_MODIFIED)
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    let mut our_headers = response_rw.rewrite_resp_headers(ctx, &remote.headers);
    // snapshot for the cache before the per-request extras go on
    let cache_headers = headermap_to_vec(&our_headers);

    if ctx.stream_our_response {
        let mut populate = None;
        if ctx.cacheable {
            if let Some(cache) = &state.cache {
                // headers-first entry; the body is appended by the relay
                // after the final chunk is emitted
                cache
                    .put_obj(
                        &ctx.remote_url,
                        CachedResponse {
                            status: status.as_u16(),
                            headers: cache_headers,
                            body: Bytes::new(),
                        },
                        CacheMeta {
                            expires_at: Instant::now() + expires_from_mime(&ctx.mime),
                            last_modified,
                            without_content: true,
                            obj_size: 0,
                        },
                    )
                    .await;
                populate = Some(CachePopulate {
                    cache: cache.clone(),
                    url: ctx.remote_url.clone(),
                    mime: ctx.mime.clone(),
                });
            }
        }

        append_extra_headers(ctx, &mut our_headers, false);

        let options = RelayOptions {
            capacity: conf.transport.stream_async_preload_max,
            chunk_size: conf.transport.stream_buffer_size,
            ..RelayOptions::default()
        };
        let upstream_stream = remote
            .body
            .into_stream()
            .map(|chunk| chunk.map_err(io::Error::other))
            .boxed();
        let relay = relay_stream(upstream_stream, options, populate);

        let mut response = Response::new(Body::from_stream(relay));
        *response.status_mut() = status;
        *response.headers_mut() = our_headers;
        return Ok(response);
    }

    let body_start = Instant::now();
    let raw_body = remote.body.into_bytes().await?;
    ctx.time.req_time_body = Some(body_start.elapsed());

    let rewritten = response_rw.response_content_rewrite(ctx, raw_body);

    if ctx.cacheable {
        if let Some(cache) = &state.cache {
            cache
                .put_obj(
                    &ctx.remote_url,
                    CachedResponse {
                        status: status.as_u16(),
                        headers: cache_headers,
                        body: rewritten.clone(),
                    },
                    CacheMeta {
                        expires_at: Instant::now() + expires_from_mime(&ctx.mime),
                        last_modified,
                        without_content: false,
                        obj_size: rewritten.len(),
                    },
                )
                .await;
        }
    }

    append_extra_headers(ctx, &mut our_headers, true);

    let mut response = Response::new(Body::from(rewritten));
    *response.status_mut() = status;
    *response.headers_mut() = our_headers;
    Ok(response)
}

/// Serve a fresh, content-complete cache entry, or revalidate it with the
/// client's `If-Modified-Since`. `None` falls through to the fetch.
async fn try_serve_from_cache(
    state: &MirrorState,
    ctx: &RequestContext,
    headers: &HeaderMap,
) -> Option<Response> {
    let cache = state.cache.as_ref()?;
    if ctx.method != Method::GET {
        return None;
    }

    let info = cache.get_info(&ctx.remote_url).await?;
    if info.without_content {
        return None;
    }

    if let (Some(since), Some(last_modified)) = (
        headers
            .get(header::IF_MODIFIED_SINCE)
            .and_then(|v| v.to_str().ok()),
        info.last_modified.as_deref(),
    ) {
        if since == last_modified {
            tracing::debug!(url = %ctx.remote_url, "cache revalidation hit");
            let mut response = Response::new(Body::empty());
            *response.status_mut() = StatusCode::NOT_MODIFIED;
            if let Ok(v) = HeaderValue::from_str(last_modified) {
                response.headers_mut().insert(header::LAST_MODIFIED, v);
            }
            response
                .headers_mut()
                .insert(CACHE_HIT_HEADER, HeaderValue::from_static("FileHit"));
            return Some(response);
        }
    }

    let obj = cache.get_obj(&ctx.remote_url).await?;
    tracing::debug!(url = %ctx.remote_url, "serving from local cache");

    let mut response = Response::new(Body::from(obj.body));
    *response.status_mut() =
        StatusCode::from_u16(obj.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    *response.headers_mut() = vec_to_headermap(&obj.headers);
    response
        .headers_mut()
        .insert(CACHE_HIT_HEADER, HeaderValue::from_static("FileHit"));
    response.headers_mut().insert(
        "x-powered-by",
        HeaderValue::from_static(pages::POWERED_BY),
    );
    Some(response)
}

/// The always-added extra headers: timings, version banner, extra cookies.
/// Body timing and compute time are only meaningful for buffered responses.
fn append_extra_headers(ctx: &mut RequestContext, headers: &mut HeaderMap, buffered: bool) {
    if let Some(header_time) = ctx.time.req_time_header {
        if header_time.as_secs_f64() >= 0.00001 {
            ctx.set_extra_resp_header(
                "X-Header-Req-Time",
                format!("{:.4}", header_time.as_secs_f64()),
            );
        }
    }
    if buffered {
        let body_time = ctx.time.req_time_body.unwrap_or_default();
        ctx.set_extra_resp_header("X-Body-Req-Time", format!("{:.4}", body_time.as_secs_f64()));
        ctx.set_extra_resp_header(
            "X-Compute-Time",
            format!("{:.4}", ctx.time.start.elapsed().as_secs_f64()),
        );
    }
    ctx.set_extra_resp_header("X-Powered-By", pages::POWERED_BY);

    for (name, value) in &ctx.extra_resp_headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            headers.insert(name, value);
        }
    }
    for cookie in ctx.extra_cookies.values() {
        if let Ok(value) = HeaderValue::from_str(cookie) {
            headers.append(header::SET_COOKIE, value);
        }
    }
}

fn error_response(state: &MirrorState, ctx: &RequestContext, err: &MirrorError) -> Response {
    let dump_path = pages::dump_snapshot(&state.conf, ctx, &err.to_string());
    let html = pages::error_page(&state.conf, ctx, err, dump_path.as_deref());

    let mut response = Response::new(Body::from(html));
    *response.status_mut() = err.status();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    response
}

fn headermap_to_vec(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

fn vec_to_headermap(headers: &[(String, String)]) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            out.append(name, value);
        }
    }
    out
}
