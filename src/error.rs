//! Unified error handling for the mirroring pipeline.
//!
//! Everything that can prevent a response from being produced funnels into
//! [`MirrorError`]; the pipeline turns it into the HTML error page. Decode
//! failures and header anomalies are recovered locally by the rewriters and
//! never surface here.

use http::StatusCode;

use crate::config::ConfigError;

/// Errors raised by the request/response mirroring pipeline.
#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    /// Bad or missing configuration; fatal at startup.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The outbound hostname is not in `allowed_domains` (SSRF layer 2).
    #[error("blocked request to out-of-zone domain: {host}")]
    SsrfBlocked { host: String },

    /// Transport, TLS or timeout failure while talking to the upstream.
    #[error("upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),

    /// No configured charset decodes a body that had to be decoded.
    #[error("unable to decode body with any configured charset")]
    Decode,

    /// The stream producer or consumer timed out.
    #[error("stream transfer timed out on the {0} side")]
    StreamTimeout(&'static str),

    /// Unexpected failure inside the rewrite pipeline.
    #[error("rewrite failed: {0}")]
    Rewrite(String),
}

impl MirrorError {
    /// HTTP status the error page should carry.
    pub fn status(&self) -> StatusCode {
        match self {
            MirrorError::SsrfBlocked { .. } => StatusCode::FORBIDDEN,
            MirrorError::Upstream(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let ssrf = MirrorError::SsrfBlocked {
            host: "evil.example".into(),
        };
        assert_eq!(ssrf.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            MirrorError::Rewrite("boom".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            MirrorError::StreamTimeout("producer").status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_display_contains_host() {
        let err = MirrorError::SsrfBlocked {
            host: "attacker.test".into(),
        };
        assert!(err.to_string().contains("attacker.test"));
    }
}
