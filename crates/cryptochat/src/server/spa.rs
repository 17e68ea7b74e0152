//! Embedded single-page frontend.
//!
//! The SPA bundle is compiled into the binary. Routing rules: `/` and any
//! unknown path serve `index.html` (client-side routing), `/assets/*` is
//! looked up with the prefix stripped, and exact asset paths are served
//! directly. Request paths are normalized first, so `//a/../b` resolves to
//! `/b`.

use axum::body::Body;
use axum::http::{header, StatusCode, Uri};
use axum::response::Response;

static INDEX_HTML: &str = include_str!("../../static/index.html");

/// Embedded asset tree: path (no leading slash), content type, body.
static ASSETS: &[(&str, &str, &str)] = &[
    ("index.html", "text/html; charset=utf-8", INDEX_HTML),
    (
        "app.js",
        "text/javascript; charset=utf-8",
        include_str!("../../static/assets/app.js"),
    ),
    (
        "style.css",
        "text/css; charset=utf-8",
        include_str!("../../static/assets/style.css"),
    ),
];

pub async fn handler(uri: Uri) -> Response {
    let path = normalize_path(uri.path());

    if path == "/" {
        return asset_response("text/html; charset=utf-8", INDEX_HTML);
    }

    let key = path
        .strip_prefix("/assets/")
        .or_else(|| path.strip_prefix('/'))
        .unwrap_or(&path);

    match lookup(key) {
        Some((content_type, body)) => asset_response(content_type, body),
        // Unknown path: serve index.html so client-side routing works.
        None => asset_response("text/html; charset=utf-8", INDEX_HTML),
    }
}

fn lookup(key: &str) -> Option<(&'static str, &'static str)> {
    ASSETS
        .iter()
        .find(|(path, _, _)| *path == key)
        .map(|(_, content_type, body)| (*content_type, *body))
}

fn asset_response(content_type: &'static str, body: &'static str) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .body(Body::from(body))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

/// Resolve `.`/`..` segments and duplicate slashes to a rooted path.
fn normalize_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }

    let mut normalized = String::from("/");
    normalized.push_str(&segments.join("/"));
    normalized
}
