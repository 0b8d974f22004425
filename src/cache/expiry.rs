//! MIME-derived cache lifetimes.

use std::time::Duration;

/// How long an entry with this mime stays fresh.
///
/// Markup changes often, assets rarely, fonts basically never.
pub fn expires_from_mime(mime: &str) -> Duration {
    if mime.contains("html") {
        Duration::from_secs(3600 * 2)
    } else if mime.contains("css") || mime.contains("javascript") {
        Duration::from_secs(3600 * 6)
    } else if mime.contains("image") {
        Duration::from_secs(3600 * 24)
    } else if mime.contains("font") {
        Duration::from_secs(3600 * 24 * 7)
    } else {
        Duration::from_secs(3600)
    }
}
