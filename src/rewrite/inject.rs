//! Custom content injection into HTML heads.

use crate::config::InjectPosition;

/// Inject `content` into `html` at the given position.
///
/// Pages without a `</head>` are returned untouched.
pub fn inject_content(position: InjectPosition, html: &str, content: &str) -> String {
    match position {
        InjectPosition::HeadFirst => inject_head_first(html, content),
        InjectPosition::HeadLast => inject_head_last(html, content),
    }
}

/// Insert before the first `<script` within `<head>…</head>`; if the head
/// has no script, insert before `</head>`.
fn inject_head_first(html: &str, content: &str) -> String {
    let Some(head_end) = html.find("</head") else {
        return html.to_string();
    };
    let insert_at = match html.find("<script") {
        Some(script_begin) if script_begin < head_end => script_begin,
        _ => head_end,
    };
    let mut out = String::with_capacity(html.len() + content.len());
    out.push_str(&html[..insert_at]);
    out.push_str(content);
    out.push_str(&html[insert_at..]);
    out
}

/// Insert immediately before `</head>`.
fn inject_head_last(html: &str, content: &str) -> String {
    let Some(head_end) = html.find("</head") else {
        return html.to_string();
    };
    let mut out = String::with_capacity(html.len() + content.len());
    out.push_str(&html[..head_end]);
    out.push_str(content);
    out.push_str(&html[head_end..]);
    out
}
