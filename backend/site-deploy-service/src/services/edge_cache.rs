// Edge cache - purge requests against the content-delivery layer
// Acceptance is asynchronous: the purge completes globally some time later.

use crate::error::EdgeCacheError;
use crate::services::invalidation::InvalidationRequest;
use async_trait::async_trait;
use aws_sdk_cloudfront::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_cloudfront::types::{InvalidationBatch, Paths};
use aws_sdk_cloudfront::Client;
use tracing::{debug, info};

#[async_trait]
pub trait EdgeCache: Send + Sync {
    /// Submit a purge; returns the provider's invalidation id once accepted
    async fn invalidate(&self, request: &InvalidationRequest) -> Result<String, EdgeCacheError>;
}

/// CloudFront distribution
#[derive(Clone)]
pub struct CloudFrontEdgeCache {
    client: Client,
    distribution_id: String,
}

impl CloudFrontEdgeCache {
    pub fn new(client: Client, distribution_id: impl Into<String>) -> Self {
        Self {
            client,
            distribution_id: distribution_id.into(),
        }
    }

    fn batch(request: &InvalidationRequest) -> Result<InvalidationBatch, EdgeCacheError> {
        let items: Vec<String> = request.path_patterns.iter().cloned().collect();

        let paths = Paths::builder()
            .quantity(items.len() as i32)
            .set_items(Some(items))
            .build()
            .map_err(|e| EdgeCacheError::InvalidRequest(e.to_string()))?;

        InvalidationBatch::builder()
            .paths(paths)
            .caller_reference(&request.caller_reference)
            .build()
            .map_err(|e| EdgeCacheError::InvalidRequest(e.to_string()))
    }
}

const RETRYABLE_CODES: &[&str] = &[
    "TooManyInvalidationsInProgress",
    "Throttling",
    "ServiceUnavailable",
];

const REJECTED_CODES: &[&str] = &[
    "InvalidArgument",
    "BatchTooLarge",
    "NoSuchDistribution",
    "AccessDenied",
    "MissingBody",
];

#[async_trait]
impl EdgeCache for CloudFrontEdgeCache {
    async fn invalidate(&self, request: &InvalidationRequest) -> Result<String, EdgeCacheError> {
        if request.is_empty() {
            return Err(EdgeCacheError::InvalidRequest(
                "invalidation needs at least one path".into(),
            ));
        }

        debug!(
            distribution_id = %self.distribution_id,
            caller_reference = %request.caller_reference,
            paths = request.len(),
            "CreateInvalidation"
        );

        let response = self
            .client
            .create_invalidation()
            .distribution_id(&self.distribution_id)
            .invalidation_batch(Self::batch(request)?)
            .send()
            .await
            .map_err(|err| {
                let code = err.as_service_error().and_then(|e| e.code()).map(str::to_string);
                let message = DisplayErrorContext(&err).to_string();
                match code.as_deref() {
                    Some(code) if REJECTED_CODES.contains(&code) => {
                        EdgeCacheError::InvalidRequest(message)
                    }
                    Some(code) => EdgeCacheError::Request {
                        retryable: RETRYABLE_CODES.contains(&code),
                        message,
                    },
                    None => EdgeCacheError::Request {
                        retryable: matches!(
                            err,
                            SdkError::TimeoutError(_)
                                | SdkError::DispatchFailure(_)
                                | SdkError::ResponseError(_)
                        ),
                        message,
                    },
                }
            })?;

        let invalidation_id = response
            .invalidation()
            .map(|inv| inv.id().to_string())
            .unwrap_or_default();

        info!(
            distribution_id = %self.distribution_id,
            invalidation_id = %invalidation_id,
            "Invalidation accepted"
        );

        Ok(invalidation_id)
    }
}
