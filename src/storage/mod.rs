//! Raw document bytes, addressed as `{document_id}/{file_name}`.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::core::errors::ApiError;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, document_id: &str, file_name: &str, bytes: &[u8]) -> Result<(), ApiError>;

    /// `ApiError::NotFound` when the object does not exist.
    async fn fetch(&self, document_id: &str, file_name: &str) -> Result<Vec<u8>, ApiError>;

    async fn delete(&self, document_id: &str, file_name: &str) -> Result<(), ApiError>;
}

/// Local directory tree implementation.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn object_dir(&self, document_id: &str) -> Result<PathBuf, ApiError> {
        let component = single_component(document_id)
            .ok_or_else(|| ApiError::BadRequest(format!("Invalid document id: {}", document_id)))?;
        Ok(self.root.join(component))
    }

    fn object_path(&self, document_id: &str, file_name: &str) -> Result<PathBuf, ApiError> {
        let name = single_component(file_name)
            .ok_or_else(|| ApiError::BadRequest(format!("Invalid file name: {}", file_name)))?;
        Ok(self.object_dir(document_id)?.join(name))
    }
}

/// The final path component, rejecting anything that would escape the root.
fn single_component(raw: &str) -> Option<&str> {
    let name = Path::new(raw).file_name()?.to_str()?;
    if name.is_empty() || name == "." || name == ".." {
        None
    } else {
        Some(name)
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, document_id: &str, file_name: &str, bytes: &[u8]) -> Result<(), ApiError> {
        let path = self.object_path(document_id, file_name)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(ApiError::internal)?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| ApiError::Internal(format!("Failed to store document {}: {}", document_id, e)))
    }

    async fn fetch(&self, document_id: &str, file_name: &str) -> Result<Vec<u8>, ApiError> {
        let path = self.object_path(document_id, file_name)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(ApiError::NotFound(format!(
                "Object {}/{} not found",
                document_id, file_name
            ))),
            Err(e) => Err(ApiError::internal(e)),
        }
    }

    async fn delete(&self, document_id: &str, file_name: &str) -> Result<(), ApiError> {
        let path = self.object_path(document_id, file_name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ApiError::NotFound(format!(
                    "Object {}/{} not found",
                    document_id, file_name
                )))
            }
            Err(e) => return Err(ApiError::internal(e)),
        }
        // Best effort: the directory only ever holds this one object.
        let _ = tokio::fs::remove_dir(self.object_dir(document_id)?).await;
        Ok(())
    }
}
