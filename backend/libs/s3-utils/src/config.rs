/// S3 configuration for the site origin bucket
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct S3Config {
    /// Origin bucket name
    pub bucket: String,
    /// AWS region
    pub region: String,
    /// Custom endpoint (LocalStack, MinIO); `None` uses the regional AWS endpoint
    pub endpoint_url: Option<String>,
    /// Whether to use path-style URLs (false = virtual-hosted-style)
    pub path_style: bool,
    /// Key prefix prepended to every object, without leading or trailing slash
    pub key_prefix: Option<String>,
}

impl S3Config {
    /// Config for a bucket with every other setting at its default
    pub fn for_bucket(bucket: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            region: region.into(),
            endpoint_url: None,
            path_style: false,
            key_prefix: None,
        }
    }

    /// Full object key for a site-relative path
    pub fn object_key(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        match &self.key_prefix {
            Some(prefix) => format!("{}/{}", prefix.trim_matches('/'), path),
            None => path.to_string(),
        }
    }

    /// Stable identity of this origin, used to key deploy locks
    pub fn target_id(&self) -> String {
        match &self.key_prefix {
            Some(prefix) => format!("s3://{}/{}", self.bucket, prefix.trim_matches('/')),
            None => format!("s3://{}", self.bucket),
        }
    }
}
