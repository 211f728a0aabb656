use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use decolorize_common::Timestamp;

use crate::config::UploadConfig;

pub const DEFAULT_BUCKET: &str = "images";
pub const DEFAULT_PATH_PREFIX: &str = "uploads";
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";
const CACHE_CONTROL: &str = "3600";

/// Errors from the upload collaborator.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("object storage not configured: set {missing}")]
    NotConfigured { missing: &'static str },
    #[error("object `{0}` already exists")]
    AlreadyExists(String),
    #[error("object storage error: {0}")]
    Storage(String),
}

/// A file handed to the uploader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadFile {
    pub name: String,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadOptions {
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default)]
    pub path_prefix: Option<String>,
}

/// Where an uploaded file ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedObject {
    pub path: String,
    pub public_url: Option<String>,
    pub key: String,
}

/// Upload a file and report where it is stored.
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(
        &self,
        file: UploadFile,
        options: UploadOptions,
    ) -> Result<UploadedObject, UploadError>;
}

/// Request body for [`ObjectStorage::put_object`].
#[derive(Debug, Clone)]
pub struct PutObject {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub cache_control: String,
    pub upsert: bool,
}

/// Hosted object storage, as seen by the uploader.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Store an object; returns the backend's key for it, if it reports one.
    async fn put_object(
        &self,
        bucket: &str,
        path: &str,
        object: PutObject,
    ) -> Result<Option<String>, UploadError>;

    fn public_url(&self, endpoint: &str, bucket: &str, path: &str) -> Option<String>;
}

/// Uploader that writes through an [`ObjectStorage`] backend.
pub struct StorageUploader<S> {
    config: UploadConfig,
    backend: S,
}

impl<S: ObjectStorage> StorageUploader<S> {
    pub fn new(config: UploadConfig, backend: S) -> Self {
        if let Some(missing) = config.missing() {
            warn!(missing, "object storage not configured; uploads will fail");
        }
        Self { config, backend }
    }

    pub fn backend(&self) -> &S {
        &self.backend
    }
}

#[async_trait]
impl<S: ObjectStorage> Uploader for StorageUploader<S> {
    async fn upload(
        &self,
        file: UploadFile,
        options: UploadOptions,
    ) -> Result<UploadedObject, UploadError> {
        let (Some(endpoint), Some(_)) = (&self.config.endpoint, &self.config.access_key) else {
            let missing = self.config.missing().unwrap_or(crate::config::ENDPOINT_VAR);
            return Err(UploadError::NotConfigured { missing });
        };

        let bucket = options.bucket.as_deref().unwrap_or(DEFAULT_BUCKET);
        let prefix = options.path_prefix.as_deref().unwrap_or(DEFAULT_PATH_PREFIX);
        let path = object_path(prefix, Timestamp::now(), &file.name);

        let object = PutObject {
            content_type: file
                .content_type
                .filter(|ct| !ct.is_empty())
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            bytes: file.bytes,
            cache_control: CACHE_CONTROL.to_string(),
            upsert: false,
        };
        let key = self.backend.put_object(bucket, &path, object).await?;
        debug!(bucket, path = %path, "uploaded object");

        Ok(UploadedObject {
            public_url: self.backend.public_url(endpoint, bucket, &path),
            key: key.unwrap_or_else(|| path.clone()),
            path,
        })
    }
}

/// `{prefix}/{millis}_{name}` with every character outside `[A-Za-z0-9_.-]`
/// in the name replaced by `_`.
pub fn object_path(prefix: &str, at: Timestamp, file_name: &str) -> String {
    format!("{prefix}/{}_{}", at.0, sanitize_file_name(file_name))
}

pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub cache_control: String,
}

/// In-memory object storage. Clones share the same buckets.
#[derive(Debug, Clone, Default)]
pub struct MemoryObjectStorage {
    objects: Arc<Mutex<BTreeMap<(String, String), StoredObject>>>,
    failure: Arc<Mutex<Option<String>>>,
}

impl MemoryObjectStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `put_object` fail with `message`.
    pub fn fail_with(&self, message: impl Into<String>) {
        *self.failure.lock() = Some(message.into());
    }

    pub fn get(&self, bucket: &str, path: &str) -> Option<StoredObject> {
        self.objects
            .lock()
            .get(&(bucket.to_string(), path.to_string()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.lock().is_empty()
    }
}

#[async_trait]
impl ObjectStorage for MemoryObjectStorage {
    async fn put_object(
        &self,
        bucket: &str,
        path: &str,
        object: PutObject,
    ) -> Result<Option<String>, UploadError> {
        if let Some(message) = self.failure.lock().clone() {
            return Err(UploadError::Storage(message));
        }
        let mut objects = self.objects.lock();
        let slot = (bucket.to_string(), path.to_string());
        if !object.upsert && objects.contains_key(&slot) {
            return Err(UploadError::AlreadyExists(path.to_string()));
        }
        objects.insert(
            slot,
            StoredObject {
                bytes: object.bytes,
                content_type: object.content_type,
                cache_control: object.cache_control,
            },
        );
        Ok(Some(path.to_string()))
    }

    fn public_url(&self, endpoint: &str, bucket: &str, path: &str) -> Option<String> {
        Some(public_object_url(endpoint, bucket, path))
    }
}

/// Object storage backed by a local directory, one subdirectory per bucket.
#[derive(Debug, Clone)]
pub struct FileObjectStorage {
    root: PathBuf,
}

impl FileObjectStorage {
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn object_file(&self, bucket: &str, path: &str) -> PathBuf {
        self.root.join(bucket).join(path)
    }
}

#[async_trait]
impl ObjectStorage for FileObjectStorage {
    async fn put_object(
        &self,
        bucket: &str,
        path: &str,
        object: PutObject,
    ) -> Result<Option<String>, UploadError> {
        let bad_bucket = bucket.is_empty() || bucket.starts_with('.') || bucket.contains(['/', '\\']);
        let bad_path = path.starts_with('/') || path.split('/').any(|part| part == "..");
        if bad_bucket || bad_path {
            return Err(UploadError::Storage(format!(
                "invalid object location `{bucket}/{path}`"
            )));
        }
        let target = self.object_file(bucket, path);
        let key = path.to_string();
        // Filesystem work runs on the blocking pool, off the async workers.
        tokio::task::spawn_blocking(move || {
            if !object.upsert && target.exists() {
                return Err(UploadError::AlreadyExists(key));
            }
            let write = || -> io::Result<()> {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(&target, &object.bytes)
            };
            write().map_err(|err| UploadError::Storage(err.to_string()))
        })
        .await
        .map_err(|err| UploadError::Storage(format!("object write did not finish: {err}")))??;
        Ok(Some(format!("{bucket}/{path}")))
    }

    fn public_url(&self, endpoint: &str, bucket: &str, path: &str) -> Option<String> {
        Some(public_object_url(endpoint, bucket, path))
    }
}

fn public_object_url(endpoint: &str, bucket: &str, path: &str) -> String {
    format!(
        "{}/storage/v1/object/public/{bucket}/{path}",
        endpoint.trim_end_matches('/')
    )
}
