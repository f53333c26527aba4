//! Blob store adapter for uploaded files.

use async_trait::async_trait;
use axum::body::Bytes;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BlobError {
    #[error("invalid object name: {0}")]
    InvalidName(String),

    #[error("blob store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Clone, Debug)]
pub struct StoredBlob {
    pub content_type: String,
    pub bytes: Bytes,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, content_type: &str, bytes: Bytes) -> Result<(), BlobError>;

    async fn get(&self, key: &str) -> Result<Option<StoredBlob>, BlobError>;

    /// Returns whether an object was removed.
    async fn delete(&self, key: &str) -> Result<bool, BlobError>;

    fn public_url(&self, key: &str) -> String;

    /// Inverse of `public_url`; `None` for links that point elsewhere.
    fn key_from_url(&self, url: &str) -> Option<String>;
}

// Object key: "<tenant>/<kind>/<unix ts>_<digest prefix>_<sanitized name>"
pub fn object_key(tenant: &str, kind: &str, file_name: &str, bytes: &[u8], unix_ts: i64) -> Result<String, BlobError> {
    let name = sanitize_file_name(file_name);
    if name.is_empty() {
        return Err(BlobError::InvalidName(file_name.to_string()));
    }
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = format!("{:x}", hasher.finalize());
    Ok(format!("{tenant}/{kind}/{unix_ts}_{}_{name}", &digest[..12]))
}

// Keep [A-Za-z0-9._-], turn spaces into '_', drop everything else
fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    base.chars()
        .filter_map(|c| match c {
            ' ' => Some('_'),
            c if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') => Some(c),
            _ => None,
        })
        .collect::<String>()
        .trim_start_matches('.')
        .to_string()
}

/// Blob store kept in process memory, served back under `<base>/files/<key>`.
pub struct MemoryBlobStore {
    base_url: String,
    objects: DashMap<String, StoredBlob>,
    unavailable: AtomicBool,
}

impl MemoryBlobStore {
    pub fn new(public_base_url: &str) -> Arc<Self> {
        Arc::new(Self {
            base_url: public_base_url.trim_end_matches('/').to_string(),
            objects: DashMap::new(),
            unavailable: AtomicBool::new(false),
        })
    }

    /// While set, every object operation fails with [`BlobError::Unavailable`].
    pub fn set_unavailable(&self, down: bool) {
        self.unavailable.store(down, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), BlobError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BlobError::Unavailable("memory blob store switched off".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, content_type: &str, bytes: Bytes) -> Result<(), BlobError> {
        self.check_available()?;
        self.objects.insert(
            key.to_string(),
            StoredBlob {
                content_type: content_type.to_string(),
                bytes,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<StoredBlob>, BlobError> {
        self.check_available()?;
        Ok(self.objects.get(key).map(|entry| entry.value().clone()))
    }

    async fn delete(&self, key: &str) -> Result<bool, BlobError> {
        self.check_available()?;
        Ok(self.objects.remove(key).is_some())
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/files/{}", self.base_url, key)
    }

    fn key_from_url(&self, url: &str) -> Option<String> {
        url.strip_prefix(&self.base_url)?
            .strip_prefix("/files/")
            .filter(|key| !key.is_empty())
            .map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_key_layout() {
        let key = object_key("ecomm", "pdf", "my document.pdf", b"hello", 1_700_000_000).unwrap();

        assert!(key.starts_with("ecomm/pdf/1700000000_"));
        assert!(key.ends_with("_my_document.pdf"));
        // sha256("hello") = 2cf24dba5fb0...
        assert!(key.contains("_2cf24dba5fb0_"));
    }

    #[test]
    fn object_key_strips_paths_and_specials() {
        let key = object_key("crm", "image", "../../etc/pa$$wd.png", b"", 1).unwrap();
        assert!(key.ends_with("_pawd.png"));

        assert!(object_key("crm", "image", "@#$%", b"", 1).is_err());
        assert!(object_key("crm", "image", "", b"", 1).is_err());
    }

    #[tokio::test]
    async fn url_round_trip_only_for_own_urls() {
        let store = MemoryBlobStore::new("http://localhost:8080/");
        let url = store.public_url("ecomm/video/1_ab_clip.mp4");

        assert_eq!(url, "http://localhost:8080/files/ecomm/video/1_ab_clip.mp4");
        assert_eq!(store.key_from_url(&url).as_deref(), Some("ecomm/video/1_ab_clip.mp4"));
        assert_eq!(store.key_from_url("https://youtube.com/watch?v=1"), None);
        assert_eq!(store.key_from_url("http://localhost:8080/files/"), None);
    }

    #[tokio::test]
    async fn put_get_delete() {
        let store = MemoryBlobStore::new("http://h");
        store.put("k", "text/plain", Bytes::from_static(b"hi")).await.unwrap();

        let blob = store.get("k").await.unwrap().unwrap();
        assert_eq!(blob.bytes, Bytes::from_static(b"hi"));
        assert!(store.delete("k").await.unwrap());
        assert!(!store.delete("k").await.unwrap());
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn switched_off_store_fails_every_operation() {
        let store = MemoryBlobStore::new("http://h");
        store.put("k", "text/plain", Bytes::from_static(b"hi")).await.unwrap();
        store.set_unavailable(true);

        assert!(matches!(store.get("k").await, Err(BlobError::Unavailable(_))));
        assert!(matches!(
            store.put("j", "text/plain", Bytes::new()).await,
            Err(BlobError::Unavailable(_))
        ));
        assert!(matches!(store.delete("k").await, Err(BlobError::Unavailable(_))));

        store.set_unavailable(false);
        assert!(store.get("k").await.unwrap().is_some());
    }
}
