//! Image upload collaborator.
//!
//! Uploads a file to hosted object storage and returns its path, public URL
//! and key. Failures are the storage backend's own errors, forwarded as is.
//! The network client itself lives behind [`ObjectStorage`]; a directory
//! backend and an in-memory backend are provided for local runs and tests.

mod client;
mod config;

pub use client::{
    DEFAULT_BUCKET, DEFAULT_CONTENT_TYPE, DEFAULT_PATH_PREFIX, FileObjectStorage, MemoryObjectStorage,
    ObjectStorage, PutObject, StorageUploader, StoredObject, UploadError, UploadFile, UploadOptions,
    UploadedObject, Uploader, object_path, sanitize_file_name,
};
pub use config::{ACCESS_KEY_VAR, ENDPOINT_VAR, UploadConfig};
