//! The rewriting engine: regex tables, URL codec, request- and
//! response-side rewriters, HTML injection.

pub mod codec;
pub mod inject;
pub mod patterns;
pub mod request;
pub mod response;

use encoding_rs::Encoding;

use crate::config::MirrorConfig;

/// Pick the charset a byte body decodes with.
///
/// A forced charset wins unconditionally; otherwise the configured
/// candidates are tried in order and the first that decodes cleanly is
/// used. `None` means nothing applied.
pub fn encoding_detect(conf: &MirrorConfig, bytes: &[u8]) -> Option<&'static Encoding> {
    if let Some(label) = &conf.content.force_decode_with_charsets {
        return Encoding::for_label(label.as_bytes());
    }
    for label in &conf.content.possible_charsets {
        if let Some(encoding) = Encoding::for_label(label.as_bytes()) {
            if encoding
                .decode_without_bom_handling_and_without_replacement(bytes)
                .is_some()
            {
                return Some(encoding);
            }
        }
    }
    None
}

/// Debug aid: log when the configured trace needle survives a rewrite stage.
pub fn string_trace(conf: &MirrorConfig, stage: &str, text: &str) {
    if let Some(needle) = &conf.developer.string_trace {
        if text.contains(needle.as_str()) {
            tracing::info!(stage, "string-trace needle present");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoding_detect_utf8_first() {
        let conf = MirrorConfig::default();
        let encoding = encoding_detect(&conf, "héllo wörld".as_bytes()).unwrap();
        assert_eq!(encoding.name(), "UTF-8");
    }

    #[test]
    fn test_encoding_detect_gbk() {
        let conf = MirrorConfig::default();
        // "你好" in GBK, not valid UTF-8
        let gbk_bytes: &[u8] = &[0xc4, 0xe3, 0xba, 0xc3];
        let encoding = encoding_detect(&conf, gbk_bytes).unwrap();
        assert_eq!(encoding.name(), "GBK");
    }

    #[test]
    fn test_encoding_detect_forced() {
        let mut conf = MirrorConfig::default();
        conf.content.force_decode_with_charsets = Some("big5".into());
        let encoding = encoding_detect(&conf, b"plain ascii").unwrap();
        assert_eq!(encoding.name(), "Big5");
    }

    #[test]
    fn test_encoding_detect_none_when_no_candidate() {
        let mut conf = MirrorConfig::default();
        conf.content.possible_charsets = vec!["utf-8".into()];
        // invalid UTF-8 and no other candidates
        assert!(encoding_detect(&conf, &[0xff, 0xfe, 0x00, 0xff]).is_none());
    }
}
