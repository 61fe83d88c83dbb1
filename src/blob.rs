use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use dashmap::DashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("blob '{0}' not found in store")]
    Missing(String),

    #[error("failed to read blob: {0}")]
    Io(#[from] std::io::Error),

    #[error("blob is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("decoded blob is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, BlobError>;
}

// One file per key inside `dir`
pub struct FileBlobStore {
    dir: PathBuf,
}

impl FileBlobStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl BlobStore for FileBlobStore {
    async fn get(&self, key: &str) -> Result<Option<String>, BlobError> {
        match tokio::fs::read_to_string(self.dir.join(key)).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

// Blobs handed over in-process, e.g. straight from an environment secret
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: DashMap<String, String>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: impl Into<String>, value: impl Into<String>) {
        self.blobs.insert(key.into(), value.into());
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, key: &str) -> Result<Option<String>, BlobError> {
        Ok(self.blobs.get(key).map(|blob| blob.clone()))
    }
}

pub async fn load_subscription(store: &dyn BlobStore, key: &str) -> Result<String, BlobError> {
    let encoded = store
        .get(key)
        .await?
        .ok_or_else(|| BlobError::Missing(key.to_string()))?;
    decode_subscription(&encoded)
}

// Whitespace (line wrapping, trailing newline) is ignored
pub fn decode_subscription(encoded: &str) -> Result<String, BlobError> {
    let compact: String = encoded.split_whitespace().collect();
    let bytes = STANDARD.decode(compact)?;
    Ok(String::from_utf8(bytes)?)
}
