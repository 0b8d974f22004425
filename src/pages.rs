//! Generated pages: welcome, error page, context snapshot dump.

use std::path::{Path, PathBuf};

use crate::{config::MirrorConfig, context::RequestContext, error::MirrorError};

/// Value of the `X-Powered-By` header.
pub const POWERED_BY: &str = concat!("zmirror/", env!("CARGO_PKG_VERSION"));

/// Replace HTML metacharacters with entities, quotes included.
pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

fn truncate(value: &str, max_len: usize) -> String {
    if value.len() <= max_len {
        return value.to_string();
    }
    let mut end = max_len;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}....(total:{})", &value[..end], value.len())
}

/// Context attributes shown on the error page and dumped in snapshots.
fn context_attributes(ctx: &RequestContext) -> Vec<(&'static str, String)> {
    vec![
        ("method", ctx.method.to_string()),
        ("remote_domain", ctx.remote_domain.clone()),
        ("remote_path", ctx.remote_path.clone()),
        ("remote_path_query", ctx.remote_path_query.clone()),
        ("remote_url", ctx.remote_url.clone()),
        ("url_no_scheme", ctx.url_no_scheme.clone()),
        ("is_https", ctx.is_https.to_string()),
        ("is_external_domain", ctx.is_external_domain.to_string()),
        ("content_type", ctx.content_type.clone()),
        ("mime", ctx.mime.clone()),
        ("cacheable", ctx.cacheable.to_string()),
        ("stream_our_response", ctx.stream_our_response.to_string()),
        ("client_header", truncate(&format!("{:?}", ctx.client_header), 1024)),
    ]
}

/// The landing page served on `GET /`.
pub fn welcome_page(conf: &MirrorConfig) -> String {
    format!(
        r#"<!doctype html><html lang="en"><head><meta charset="utf-8">
<title>zmirror</title></head>
<body>
<h1>Mirror is up</h1>
<p>This host mirrors <code>{target}</code>. Append a path to browse it,
for example <a href="/robots.txt">/robots.txt</a>.</p>
<div style="font-size: smaller">Powered by <em>{powered_by}</em></div>
</body></html>"#,
        target = html_escape(&conf.upstream.target_domain),
        powered_by = POWERED_BY,
    )
}

/// Serialize the request context through an opaque writer.
///
/// The format is operator-visible but not stable. Returns the dump path, or
/// `None` when dumping is disabled or fails (a failed dump never masks the
/// original error).
pub fn dump_snapshot(
    conf: &MirrorConfig,
    ctx: &RequestContext,
    error: &str,
) -> Option<PathBuf> {
    if !conf.developer.dump_all_files {
        return None;
    }

    let dir = Path::new("error_dump");
    std::fs::create_dir_all(dir).ok()?;

    let now = chrono::Local::now();
    let path = dir.join(format!("snapshot_{}.json", now.format("%Y-%m-%d_%H-%M-%S%.3f")));

    let mut context = serde_json::Map::new();
    for (name, value) in context_attributes(ctx) {
        context.insert(name.to_string(), serde_json::Value::String(value));
    }
    let snapshot = serde_json::json!({
        "time": now.to_rfc3339(),
        "error": error,
        "context": context,
    });

    std::fs::write(&path, serde_json::to_vec_pretty(&snapshot).ok()?).ok()?;
    Some(path)
}

/// The HTML error page.
pub fn error_page(
    conf: &MirrorConfig,
    ctx: &RequestContext,
    error: &MirrorError,
    dump_path: Option<&Path>,
) -> String {
    let detail_rows: String = context_attributes(ctx)
        .into_iter()
        .map(|(name, value)| {
            format!(
                "<tr><td>{}</td><td>{}</td></tr>\n",
                name,
                html_escape(&value)
            )
        })
        .collect();

    let dump_note = match dump_path {
        Some(path) => format!(
            "<h3>Snapshot Dump</h3>\nA snapshot has been dumped to <code>{}</code><br>\n\
             It contains information which may be helpful for debugging.",
            html_escape(&path.display().to_string())
        ),
        None => String::new(),
    };

    let detail = if conf.server.is_dev {
        format!(
            "<h3>Detail</h3>\n<table border=\"1\"><tr><th>Attrib</th><th>Value</th></tr>\n{detail_rows}</table>"
        )
    } else {
        String::new()
    };

    format!(
        r#"<!doctype html><html lang="en"><head><meta charset="utf-8">
<title>zmirror internal error</title>
<style>code{{background-color: #cccaca;}}</style>
</head>
<body>
<h1>zmirror internal error</h1>
<p>This mirror is temporarily unable to serve the page. If you are a
visitor, please retry later or contact the site admin.</p>
<p>If you are the admin, the full detail is in the server log.</p>
<h3>Error</h3>
<pre>{error}</pre>
{dump_note}
{detail}
<hr>
<div style="font-size: smaller">Powered by <em>{powered_by}</em></div>
</body></html>"#,
        error = html_escape(&error.to_string()),
        dump_note = dump_note,
        detail = detail,
        powered_by = POWERED_BY,
    )
}
