//! Per-request state, owned by the pipeline for the request's lifetime.

use std::{
    collections::BTreeMap,
    time::{Duration, Instant},
};

use bytes::Bytes;
use futures_util::stream::BoxStream;
use http::{HeaderMap, Method, StatusCode};

/// Named timestamps for the timing response headers.
#[derive(Debug, Clone, Copy)]
pub struct RequestTiming {
    /// Request entry.
    pub start: Instant,
    /// Just before the upstream request is dispatched.
    pub req_start: Option<Instant>,
    /// Dispatch → upstream headers received.
    pub req_time_header: Option<Duration>,
    /// Upstream body download time (buffered responses only).
    pub req_time_body: Option<Duration>,
}

impl Default for RequestTiming {
    fn default() -> Self {
        Self {
            start: Instant::now(),
            req_start: None,
            req_time_header: None,
            req_time_body: None,
        }
    }
}

/// Body handle of an upstream response.
pub enum RemoteBody {
    /// Not yet read from the wire; reading it is where streaming happens.
    Pending(reqwest::Response),
    /// Fully buffered (cache hits, tests).
    Buffered(Bytes),
}

impl RemoteBody {
    /// Read the whole body into memory.
    pub async fn into_bytes(self) -> Result<Bytes, reqwest::Error> {
        match self {
            RemoteBody::Pending(response) => response.bytes().await,
            RemoteBody::Buffered(bytes) => Ok(bytes),
        }
    }

    /// Turn the body into a chunk stream.
    pub fn into_stream(self) -> BoxStream<'static, Result<Bytes, reqwest::Error>> {
        use futures_util::StreamExt;
        match self {
            RemoteBody::Pending(response) => response.bytes_stream().boxed(),
            RemoteBody::Buffered(bytes) => {
                futures_util::stream::iter([Ok(bytes)]).boxed()
            }
        }
    }
}

impl std::fmt::Debug for RemoteBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemoteBody::Pending(_) => f.write_str("RemoteBody::Pending"),
            RemoteBody::Buffered(bytes) => write!(f, "RemoteBody::Buffered({} bytes)", bytes.len()),
        }
    }
}

/// The upstream's answer: status, headers, body handle.
#[derive(Debug)]
pub struct RemoteResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: RemoteBody,
}

impl RemoteResponse {
    pub fn from_bytes(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body: RemoteBody::Buffered(body),
        }
    }
}

/// One in-flight mirrored request.
///
/// Created at request entry, released at response completion (for streams,
/// when the relay emits its terminal sentinel). Exclusively owned; the
/// pipeline passes it explicitly instead of relying on ambient storage.
#[derive(Debug, Default)]
pub struct RequestContext {
    pub method: Method,

    /// Origin host this request resolves to (may carry a port).
    pub remote_domain: String,
    /// Origin path without query.
    pub remote_path: String,
    /// Origin path including query.
    pub remote_path_query: String,
    /// Fully-qualified origin URL; also the cache key.
    pub remote_url: String,
    /// `remote_url` without the scheme (`host/path?query`).
    pub url_no_scheme: String,

    /// Whether the upstream is contacted over https.
    pub is_https: bool,
    /// Not the main domain or one of its aliases.
    pub is_external_domain: bool,

    /// Filtered and rewritten client headers, lowercase keys.
    pub client_header: BTreeMap<String, String>,

    /// Request body after optional text rewrite.
    pub request_data: Option<Bytes>,
    /// Charset label the body was decoded with, when it was text.
    pub request_data_encoding: Option<&'static str>,

    /// Upstream response, set after the fetch.
    pub remote_response: Option<RemoteResponse>,
    /// Upstream `Content-Type`, verbatim.
    pub content_type: String,
    /// Bare mime extracted from `content_type`.
    pub mime: String,
    /// Response may be stored in the local cache.
    pub cacheable: bool,
    /// Response is relayed piece-wise instead of buffered.
    pub stream_our_response: bool,

    /// Headers appended to our response after the whitelist pass.
    pub extra_resp_headers: Vec<(String, String)>,
    /// Extra `Set-Cookie` values, by cookie name.
    pub extra_cookies: BTreeMap<String, String>,

    pub time: RequestTiming,
}

impl RequestContext {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            ..Self::default()
        }
    }

    pub fn set_extra_resp_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.extra_resp_headers.push((name.into(), value.into()));
    }
}
