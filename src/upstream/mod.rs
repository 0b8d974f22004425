//! The upstream HTTP client: SSRF gate, per-host keep-alive sessions,
//! no-redirect streaming fetch.

use std::{collections::BTreeMap, sync::Arc, time::Instant};

use bytes::Bytes;
use dashmap::DashMap;
use http::Method;
use reqwest::{Client, Proxy, redirect};
use url::Url;

use crate::{
    config::MirrorConfig,
    context::{RemoteBody, RemoteResponse, RequestTiming},
    error::MirrorError,
};

/// Sends origin-space requests upstream.
///
/// One pooled [`Client`] per upstream hostname when keep-alive is on, a
/// throwaway client per request otherwise. Redirects are never followed:
/// the response rewriter turns `Location` into mirror space and the client
/// follows it itself.
pub struct UpstreamClient {
    conf: Arc<MirrorConfig>,
    sessions: DashMap<String, Client>,
}

impl UpstreamClient {
    pub fn new(conf: Arc<MirrorConfig>) -> Self {
        Self {
            conf,
            sessions: DashMap::new(),
        }
    }

    fn build_client(&self) -> Result<Client, MirrorError> {
        let mut builder = Client::builder().redirect(redirect::Policy::none());

        if self.conf.developer.disable_ssl_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }
        if self.conf.transport.use_proxy {
            if let Some(proxy) = &self.conf.transport.proxy {
                builder = builder.proxy(Proxy::all(proxy)?);
            }
        }

        Ok(builder.build()?)
    }

    /// The pooled session for a hostname, created lazily on first use.
    fn session_for(&self, host: &str) -> Result<Client, MirrorError> {
        if !self.conf.transport.connection_keep_alive_enable {
            return self.build_client();
        }
        if let Some(client) = self.sessions.get(host) {
            return Ok(client.clone());
        }
        let client = self.build_client()?;
        self.sessions.insert(host.to_string(), client.clone());
        Ok(client)
    }

    /// Dispatch one request upstream.
    ///
    /// The final pre-dispatch SSRF check lives here: whatever path derived
    /// the URL, the destination host must be in `allowed_domains`. An empty
    /// body is sent as absent, not as `Content-Length: 0`. Records the
    /// header round-trip time into `timing`.
    pub async fn send(
        &self,
        method: Method,
        url: &str,
        headers: &BTreeMap<String, String>,
        body: Option<Bytes>,
        timing: &mut RequestTiming,
    ) -> Result<RemoteResponse, MirrorError> {
        let parsed = Url::parse(url)
            .map_err(|e| MirrorError::Rewrite(format!("invalid upstream url {url:?}: {e}")))?;
        let final_hostname = match parsed.port() {
            Some(port) => format!("{}:{port}", parsed.host_str().unwrap_or("")),
            None => parsed.host_str().unwrap_or("").to_string(),
        };
        tracing::debug!(url, host = %final_hostname, "dispatching upstream request");

        // SSRF layer 2: only in-zone domains are reachable, no matter how
        // the URL was derived.
        if !self.conf.upstream.allowed_domains().contains(&final_hostname)
            && !self.conf.developer.disable_ssrf_check
        {
            return Err(MirrorError::SsrfBlocked {
                host: final_hostname,
            });
        }

        let client = self.session_for(&final_hostname)?;
        let mut request = client.request(method, parsed);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(body) = body.filter(|b| !b.is_empty()) {
            request = request.body(body);
        }

        let req_start = Instant::now();
        timing.req_start = Some(req_start);
        let response = request.send().await?;
        timing.req_time_header = Some(req_start.elapsed());

        tracing::debug!(
            status = %response.status(),
            header_time_ms = req_start.elapsed().as_millis() as u64,
            "upstream headers received"
        );

        Ok(RemoteResponse {
            status: response.status(),
            headers: response.headers().clone(),
            body: RemoteBody::Pending(response),
        })
    }
}
