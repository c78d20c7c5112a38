//! Preview serving: resolve a published build, fetch the asset from object
//! storage, rewrite it for the proxy path, and attach the caching policy.

use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use crate::api::{ApiError, SharedState};
use crate::config::AtelierConfig;
use crate::db::DbHandle;
use crate::models::Build;
use crate::rewrite::{rewrite_html, rewrite_js};
use crate::util::{file_extension, is_safe_rel_path};

/// Extensions that denote real build assets. A storage miss on one of these
/// is a 404; anything else is treated as a client-side route and falls back
/// to the entry document.
const ASSET_EXTENSIONS: &[&str] = &[
    "js", "mjs", "css", "map", "json", "png", "jpg", "jpeg", "gif", "svg", "webp", "avif", "ico",
    "woff", "woff2", "ttf", "otf", "eot", "txt", "wasm", "webmanifest",
];

/// Content-addressed by the hashed filenames vite emits, so these can be
/// cached hard.
const IMMUTABLE_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "svg", "webp", "avif", "ico", "woff", "woff2", "ttf", "otf",
    "eot",
];

const CACHE_HTML: &str = "no-cache, no-store, must-revalidate";
const CACHE_IMMUTABLE: &str = "public, max-age=31536000, immutable";
const CACHE_SHORT: &str = "public, max-age=600";

fn is_known_asset(ext: &str) -> bool {
    ASSET_EXTENSIONS.contains(&ext)
}

fn cache_control_for(ext: &str) -> &'static str {
    if ext == "html" || ext == "htm" {
        CACHE_HTML
    } else if IMMUTABLE_EXTENSIONS.contains(&ext) {
        CACHE_IMMUTABLE
    } else {
        CACHE_SHORT
    }
}

#[derive(Debug, Deserialize)]
pub struct PreviewParams {
    pub path: Option<String>,
    /// Cache-bust token carried through into rewritten asset URLs.
    pub t: Option<String>,
    /// Pin a specific version instead of the latest completed build.
    pub v: Option<i64>,
}

/// Base URL the preview for `{owner_id}/{project_id}` is served under.
pub(crate) fn proxy_base(config: &AtelierConfig, owner_id: &str, project_id: &str) -> String {
    match &config.preview.public_base {
        Some(base) => format!(
            "{}/preview/{owner_id}/{project_id}",
            base.trim_end_matches('/')
        ),
        None => format!("/preview/{owner_id}/{project_id}"),
    }
}

async fn resolve_build(
    db: &DbHandle,
    project_id: &str,
    version: Option<i64>,
) -> Result<Build, ApiError> {
    let project_id = project_id.to_string();
    let build = db
        .call(move |db| match version {
            Some(v) => db.build_by_version(&project_id, v),
            None => db.latest_completed_build(&project_id),
        })
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    build.ok_or_else(|| ApiError::NotFound("No published build for this project".to_string()))
}

/// Rewrite and package one artifact file as an HTTP response.
fn serve_asset(path: &str, bytes: Vec<u8>, proxy_base: &str, bust: Option<&str>) -> Response {
    let ext = file_extension(path);
    let mime = mime_guess::from_path(path).first_or(mime_guess::mime::TEXT_HTML);
    let body: Vec<u8> = match ext.as_str() {
        "html" | "htm" => {
            rewrite_html(&String::from_utf8_lossy(&bytes), proxy_base, bust).into_bytes()
        }
        "js" | "mjs" => rewrite_js(&String::from_utf8_lossy(&bytes), proxy_base, bust).into_bytes(),
        _ => bytes,
    };
    (
        [
            (header::CONTENT_TYPE, mime.to_string()),
            (header::CACHE_CONTROL, cache_control_for(&ext).to_string()),
        ],
        body,
    )
        .into_response()
}

pub async fn preview_handler(
    State(state): State<SharedState>,
    Path((owner_id, project_id)): Path<(String, String)>,
    Query(params): Query<PreviewParams>,
) -> Result<Response, ApiError> {
    let build = resolve_build(&state.db, &project_id, params.v).await?;
    let Some(locator) = build.artifact_locator.clone() else {
        return Err(ApiError::NotFound(format!(
            "Build v{} has no stored artifact",
            build.version
        )));
    };

    let entry = state.config.build.entry_document.clone();
    let rel_path = match params.path.as_deref() {
        Some(p) if !p.is_empty() => p.to_string(),
        _ => entry.clone(),
    };
    if !is_safe_rel_path(&rel_path) {
        return Err(ApiError::NotFound(format!("Asset '{rel_path}' not found")));
    }

    let base = proxy_base(&state.config, &owner_id, &project_id);
    let bust = params.t.as_deref();

    let fetched = state
        .store
        .get(&format!("{locator}/{rel_path}"))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    if let Some(bytes) = fetched {
        return Ok(serve_asset(&rel_path, bytes, &base, bust));
    }

    if is_known_asset(&file_extension(&rel_path)) {
        return Err(ApiError::NotFound(format!("Asset '{rel_path}' not found")));
    }

    // SPA fallback: unknown extensionless paths are client-side routes and
    // resolve to the app shell.
    let shell = state
        .store
        .get(&format!("{locator}/{entry}"))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    match shell {
        Some(bytes) => Ok(serve_asset(&entry, bytes, &base, bust)),
        None => Err(ApiError::NotFound(
            "Artifact has no entry document".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_text(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_cache_policy_by_extension() {
        assert_eq!(cache_control_for("html"), CACHE_HTML);
        assert_eq!(cache_control_for("png"), CACHE_IMMUTABLE);
        assert_eq!(cache_control_for("woff2"), CACHE_IMMUTABLE);
        assert_eq!(cache_control_for("js"), CACHE_SHORT);
        assert_eq!(cache_control_for("css"), CACHE_SHORT);
        assert_eq!(cache_control_for(""), CACHE_SHORT);
    }

    #[test]
    fn test_known_asset_extensions() {
        assert!(is_known_asset("js"));
        assert!(is_known_asset("woff2"));
        assert!(!is_known_asset("html"));
        assert!(!is_known_asset(""));
    }

    #[test]
    fn test_proxy_base_honors_public_base() {
        let mut config = AtelierConfig::default();
        assert_eq!(proxy_base(&config, "u1", "p1"), "/preview/u1/p1");

        config.preview.public_base = Some("https://previews.example.com/".to_string());
        assert_eq!(
            proxy_base(&config, "u1", "p1"),
            "https://previews.example.com/preview/u1/p1"
        );
    }

    #[tokio::test]
    async fn test_serve_asset_rewrites_html_and_sets_headers() {
        let html = r#"<html><head></head><body><script src="/assets/app.js"></script></body></html>"#;
        let response = serve_asset("index.html", html.as_bytes().to_vec(), "/preview/u/p", None);

        assert_eq!(
            response.headers()[header::CACHE_CONTROL.as_str()],
            CACHE_HTML
        );
        assert!(
            response.headers()[header::CONTENT_TYPE.as_str()]
                .to_str()
                .unwrap()
                .starts_with("text/html")
        );
        let body = body_text(response).await;
        assert!(body.contains("path=assets%2Fapp.js"));
        assert!(body.contains("__atelierResolveAsset"));
    }

    #[tokio::test]
    async fn test_serve_asset_passes_binary_through() {
        let payload = vec![0x89, 0x50, 0x4e, 0x47];
        let response = serve_asset("logo.png", payload.clone(), "/preview/u/p", None);

        assert_eq!(
            response.headers()[header::CACHE_CONTROL.as_str()],
            CACHE_IMMUTABLE
        );
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(bytes.to_vec(), payload);
    }
}
