//! MIME classification helpers shared by the response rewriter and the cache.

/// MIME keywords that select stream mode: large binary payloads are relayed
/// piece-wise instead of buffered and rewritten.
const STREAMED_MIME_KEYWORDS: &[&str] = &[
    "video",
    "audio",
    "binary",
    "octet-stream",
    "x-compress",
    "application/zip",
    "pdf",
    "msword",
    "powerpoint",
    "vnd.ms-excel",
    "image",
];

/// Extract the bare mime from a `Content-Type` value.
///
/// `"text/html; charset=utf-8"` becomes `"text/html"`, lowercased.
pub fn extract_mime_from_content_type(content_type: &str) -> String {
    match content_type.find(';') {
        Some(pos) => content_type[..pos].trim().to_ascii_lowercase(),
        None => content_type.trim().to_ascii_lowercase(),
    }
}

/// Whether a response body with this mime should be relayed in stream mode.
pub fn is_mime_streamable(mime: &str) -> bool {
    STREAMED_MIME_KEYWORDS.iter().any(|kw| mime.contains(kw))
}

/// Whether a mime represents rewritable text (`text/html` yes, `image/png` no).
///
/// Membership is by substring over the configured keyword set, so `"json"`
/// covers both `application/json` and vendor types like
/// `application/vnd.api+json`.
pub fn is_mime_represents_text(mime: &str, text_like_keywords: &[String]) -> bool {
    let mime = mime.to_ascii_lowercase();
    text_like_keywords.iter().any(|kw| mime.contains(kw.as_str()))
}
