//! Payload rewriting that lets a bundled app render under the preview
//! proxy.
//!
//! Builds are produced with a pinned bundler base path
//! (`/__atelier_base__/`), so every emitted URL carries a recognizable
//! token instead of a guessed deploy prefix. At serve time those URLs are
//! rewritten to proxy form, `{proxy_base}?path=<rel>`. Rewritten values
//! always contain `?`, and the attribute pattern never matches a value with
//! `?` in it, which is what makes the rewrite idempotent.

use std::sync::LazyLock;

use regex::{Captures, Regex};

/// The pinned Vite `base` baked into every scaffold build.
pub const BUNDLER_BASE_TOKEN: &str = "/__atelier_base__/";

// Compile regexes once using LazyLock. The regex crate has no
// backreferences, so double- and single-quoted values are matched as an
// alternation; `?` is excluded from values to keep the rewrite idempotent.
static ATTR_URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?P<attr>href|src)=(?P<quoted>"[^"?]*"|'[^'?]*')"#).unwrap()
});

/// Asset-resolution bootstrap, installed once per document. Exposes
/// `window.__atelierResolveAsset` and watches for dynamically-inserted
/// `<img>` elements with relative sources, pointing them back through the
/// proxy. It does not patch property descriptors on platform objects.
const ASSET_SHIM_JS: &str = r#"(function () {
  if (typeof window === "undefined" || window.__atelierResolveAsset) { return; }
  var base = "__ATELIER_PROXY_BASE__";
  var bust = "__ATELIER_BUST__";
  window.__atelierResolveAsset = function (path) {
    var rel = String(path || "");
    if (/^(https?:)?\/\//.test(rel) || rel.indexOf("?") !== -1) { return rel; }
    var token = "__atelier_base__/";
    var at = rel.indexOf(token);
    if (at !== -1) { rel = rel.slice(at + token.length); }
    rel = rel.replace(/^\.?\//, "");
    var url = base + "?path=" + encodeURIComponent(rel);
    if (bust) { url += "&t=" + bust; }
    return url;
  };
  var observer = new MutationObserver(function (records) {
    records.forEach(function (record) {
      Array.prototype.forEach.call(record.addedNodes, function (node) {
        if (node && node.tagName === "IMG") {
          var src = node.getAttribute("src");
          if (src && src.indexOf("?") === -1 && /^\.?\//.test(src)) {
            node.setAttribute("src", window.__atelierResolveAsset(src));
          }
        }
      });
    });
  });
  observer.observe(document.documentElement, { childList: true, subtree: true });
})();"#;

fn shim_js(proxy_base: &str, bust: Option<&str>) -> String {
    ASSET_SHIM_JS
        .replace("__ATELIER_PROXY_BASE__", proxy_base)
        .replace("__ATELIER_BUST__", bust.unwrap_or(""))
}

/// Build the proxied URL for one artifact-relative path.
pub fn proxied_url(proxy_base: &str, rel_path: &str, bust: Option<&str>) -> String {
    let mut url = format!("{proxy_base}?path={}", urlencoding::encode(rel_path));
    if let Some(bust) = bust {
        url.push_str("&t=");
        url.push_str(bust);
    }
    url
}

/// Relative target of an attribute value, or `None` when the value should
/// be left alone (external, protocol-relative, anchors, bare relatives).
fn rewrite_target(value: &str) -> Option<&str> {
    if let Some(rel) = value.strip_prefix(BUNDLER_BASE_TOKEN) {
        return Some(rel);
    }
    if let Some(rel) = value.strip_prefix("./") {
        return Some(rel);
    }
    if value.starts_with("//") {
        return None;
    }
    if let Some(rel) = value.strip_prefix('/') {
        return Some(rel);
    }
    None
}

/// Rewrite an HTML document for serving under `proxy_base` and inject the
/// asset-resolution bootstrap ahead of application code.
pub fn rewrite_html(html: &str, proxy_base: &str, bust: Option<&str>) -> String {
    let mut rewritten = ATTR_URL_REGEX
        .replace_all(html, |caps: &Captures| {
            let quoted = &caps["quoted"];
            let quote = &quoted[..1];
            let value = &quoted[1..quoted.len() - 1];
            match rewrite_target(value) {
                Some(rel) if !rel.is_empty() => format!(
                    "{}={quote}{}{quote}",
                    &caps["attr"],
                    proxied_url(proxy_base, rel, bust)
                ),
                _ => caps[0].to_string(),
            }
        })
        .into_owned();

    if !rewritten.contains("__atelierResolveAsset") {
        let shim = format!("<script>{}</script>\n", shim_js(proxy_base, bust));
        if let Some(pos) = rewritten.find("<script") {
            rewritten.insert_str(pos, &shim);
        } else if let Some(pos) = rewritten.find("</head>") {
            rewritten.insert_str(pos, &shim);
        } else {
            rewritten.push_str(&shim);
        }
    }

    rewritten
}

/// Rewrite a script payload: neutralize the bundler base token and prepend
/// the bootstrap (its own guard makes repeat installs a no-op).
pub fn rewrite_js(js: &str, proxy_base: &str, bust: Option<&str>) -> String {
    let body = js.replace(BUNDLER_BASE_TOKEN, "/");
    if js.contains("__atelierResolveAsset") {
        return body;
    }
    let mut out = shim_js(proxy_base, bust);
    out.push('\n');
    out.push_str(&body);
    out
}
