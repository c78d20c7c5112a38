//! Shared utility functions for the Atelier crate.

/// Check that a client-supplied path is safe to use relative to a project
/// or storage root: non-empty, relative, and free of `..` traversal.
pub fn is_safe_rel_path(path: &str) -> bool {
    if path.is_empty() || path.starts_with('/') || path.starts_with('\\') {
        return false;
    }
    // Windows-style drive prefixes are never valid project paths.
    if path.len() >= 2 && path.as_bytes()[1] == b':' {
        return false;
    }
    !path
        .split(['/', '\\'])
        .any(|seg| seg == ".." || seg.is_empty())
}

/// Current wall-clock time as milliseconds since the Unix epoch.
pub fn epoch_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Lower-cased extension of a path, without the dot. Empty when absent.
pub fn file_extension(path: &str) -> String {
    let name = path.rsplit('/').next().unwrap_or(path);
    match name.rfind('.') {
        Some(idx) if idx + 1 < name.len() => name[idx + 1..].to_ascii_lowercase(),
        _ => String::new(),
    }
}
