/// S3 object operations used to publish site assets
use crate::config::S3Config;
use crate::error::{classify, S3Error};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct S3Operations {
    client: Arc<Client>,
    config: S3Config,
}

impl S3Operations {
    pub fn new(client: Arc<Client>, config: S3Config) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &S3Config {
        &self.config
    }

    /// Upload object; overwriting identical content is harmless
    pub async fn put_object(
        &self,
        path: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<(), S3Error> {
        let key = self.config.object_key(path);
        debug!(bucket = %self.config.bucket, key = %key, size = body.len(), "PutObject");

        self.client
            .put_object()
            .bucket(&self.config.bucket)
            .key(&key)
            .content_type(content_type)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| classify(&key, e))?;

        Ok(())
    }

    /// Download object, `None` when the key does not exist
    pub async fn get_object(&self, path: &str) -> Result<Option<Bytes>, S3Error> {
        let key = self.config.object_key(path);

        let response = match self
            .client
            .get_object()
            .bucket(&self.config.bucket)
            .key(&key)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) if e.as_service_error().map(|se| se.is_no_such_key()).unwrap_or(false) => {
                return Ok(None);
            }
            Err(e) => return Err(classify(&key, e)),
        };

        let body = response.body.collect().await.map_err(|e| S3Error::Body {
            key: key.clone(),
            message: e.to_string(),
        })?;

        Ok(Some(body.into_bytes()))
    }

    /// Delete object; deleting a missing key succeeds
    pub async fn delete_object(&self, path: &str) -> Result<(), S3Error> {
        let key = self.config.object_key(path);
        debug!(bucket = %self.config.bucket, key = %key, "DeleteObject");

        self.client
            .delete_object()
            .bucket(&self.config.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| classify(&key, e))?;

        Ok(())
    }
}
