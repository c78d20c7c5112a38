//! Artifact storage: an object-store seam with a filesystem backend.
//!
//! Keys are relative slash-separated paths. A build's artifact lives under
//! its locator (`{owner_id}/{project_id}/v{version}`), one object per file.
//! Locators embed the version, so a published artifact is never overwritten
//! by a later build.

use std::path::PathBuf;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::errors::StoreError;
use crate::models::ArtifactFile;
use crate::util::is_safe_rel_path;

/// Build the storage locator for one published artifact.
pub fn artifact_locator(owner_id: &str, project_id: &str, version: i64) -> String {
    format!("{owner_id}/{project_id}/v{version}")
}

/// Content hash of an artifact: SHA-256 over the files in ascending path
/// order, feeding each path, a NUL separator, then the content. The NUL
/// keeps `("ab", "c")` and `("a", "bc")` from hashing alike; the ordering
/// makes the hash a function of the file set, not of collection order.
pub fn artifact_hash(files: &[ArtifactFile]) -> String {
    let mut ordered: Vec<&ArtifactFile> = files.iter().collect();
    ordered.sort_by(|a, b| a.path.cmp(&b.path));

    let mut hasher = Sha256::new();
    for file in ordered {
        hasher.update(file.path.as_bytes());
        hasher.update([0u8]);
        hasher.update(&file.content);
    }
    hex::encode(hasher.finalize())
}

/// Minimal object-store surface the preview path needs. A missing object is
/// not an error: `get` returns `Ok(None)` so callers can fall back (SPA
/// routes) without matching on error variants.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError>;
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
}

/// Store every file of an artifact under its locator.
pub async fn put_artifact(
    store: &dyn ObjectStore,
    locator: &str,
    files: &[ArtifactFile],
) -> Result<(), StoreError> {
    for file in files {
        let key = format!("{locator}/{}", file.path);
        store.put(&key, &file.content).await?;
    }
    debug!(locator, files = files.len(), "Stored artifact");
    Ok(())
}

/// Filesystem-backed object store rooted at one directory.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, StoreError> {
        if !is_safe_rel_path(key) {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| StoreError::WriteFailed {
                    key: key.to_string(),
                    source,
                })?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|source| StoreError::WriteFailed {
                key: key.to_string(),
                source,
            })
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.resolve(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::ReadFailed {
                key: key.to_string(),
                source,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str, content: &str) -> ArtifactFile {
        ArtifactFile {
            path: path.to_string(),
            content: content.as_bytes().to_vec(),
        }
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());

        store.put("u1/p1/v1/index.html", b"<html>").await.unwrap();
        let got = store.get("u1/p1/v1/index.html").await.unwrap();
        assert_eq!(got.as_deref(), Some(b"<html>".as_slice()));
    }

    #[tokio::test]
    async fn test_get_missing_is_none_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());

        assert!(store.get("u1/p1/v1/nope.js").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_traversal_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());

        let err = store.get("u1/../../etc/passwd").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidKey(_)));
        let err = store.put("/abs/key", b"x").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidKey(_)));
    }

    #[tokio::test]
    async fn test_put_artifact_stores_every_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        let files = vec![
            file("index.html", "<html>"),
            file("assets/app.js", "console.log(1)"),
        ];

        put_artifact(&store, "u1/p1/v3", &files).await.unwrap();
        assert!(store.get("u1/p1/v3/index.html").await.unwrap().is_some());
        assert!(store.get("u1/p1/v3/assets/app.js").await.unwrap().is_some());
    }

    #[test]
    fn test_locator_shape() {
        assert_eq!(artifact_locator("u1", "p1", 4), "u1/p1/v4");
    }

    #[test]
    fn test_hash_is_order_independent() {
        let a = vec![file("a.js", "one"), file("b.js", "two")];
        let b = vec![file("b.js", "two"), file("a.js", "one")];
        assert_eq!(artifact_hash(&a), artifact_hash(&b));
    }

    #[test]
    fn test_hash_changes_with_content() {
        let a = vec![file("a.js", "one")];
        let b = vec![file("a.js", "two")];
        assert_ne!(artifact_hash(&a), artifact_hash(&b));
    }

    #[test]
    fn test_hash_separates_path_from_content() {
        // Without the NUL separator these would concatenate identically.
        let a = vec![file("ab", "c")];
        let b = vec![file("a", "bc")];
        assert_ne!(artifact_hash(&a), artifact_hash(&b));
    }

    #[test]
    fn test_hash_is_hex_sha256() {
        let digest = artifact_hash(&[file("index.html", "x")]);
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
