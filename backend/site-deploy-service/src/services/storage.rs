// Origin storage target - where deploys write site assets

use crate::error::StorageError;
use async_trait::async_trait;
use bytes::Bytes;
use s3_utils::S3Operations;

/// Authoritative store the edge reads from
///
/// Implementations must be read-after-write consistent: once `put` returns
/// `Ok`, the edge may fetch the new object.
#[async_trait]
pub trait StorageTarget: Send + Sync {
    /// Stable identity, used to serialise deploys against the same target
    fn id(&self) -> String;

    /// Write one object; re-writing identical content is a no-op
    async fn put(&self, path: &str, body: Bytes, content_type: &str) -> Result<(), StorageError>;

    /// Read one object, `None` when absent
    async fn get(&self, path: &str) -> Result<Option<Bytes>, StorageError>;

    /// Remove one object; removing a missing object succeeds
    async fn delete(&self, path: &str) -> Result<(), StorageError>;
}

/// S3 bucket origin
#[derive(Clone)]
pub struct S3StorageTarget {
    ops: S3Operations,
}

impl S3StorageTarget {
    pub fn new(ops: S3Operations) -> Self {
        Self { ops }
    }
}

#[async_trait]
impl StorageTarget for S3StorageTarget {
    fn id(&self) -> String {
        self.ops.config().target_id()
    }

    async fn put(&self, path: &str, body: Bytes, content_type: &str) -> Result<(), StorageError> {
        Ok(self.ops.put_object(path, body, content_type).await?)
    }

    async fn get(&self, path: &str) -> Result<Option<Bytes>, StorageError> {
        Ok(self.ops.get_object(path).await?)
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        Ok(self.ops.delete_object(path).await?)
    }
}
