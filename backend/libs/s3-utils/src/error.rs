use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use thiserror::Error;

/// S3 operation errors
#[derive(Debug, Error)]
pub enum S3Error {
    /// Request failed at the SDK, transport or service level
    #[error("S3 request for {key} failed: {message}")]
    Request {
        key: String,
        message: String,
        retryable: bool,
    },

    /// Response body could not be read
    #[error("S3 body for {key} could not be read: {message}")]
    Body { key: String, message: String },
}

impl S3Error {
    /// Throttling, 5xx and transport failures are worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            S3Error::Request { retryable, .. } => *retryable,
            S3Error::Body { .. } => true,
        }
    }
}

const RETRYABLE_CODES: &[&str] = &["SlowDown", "RequestTimeout", "InternalError", "ServiceUnavailable"];

pub(crate) fn classify<E>(key: &str, err: SdkError<E, HttpResponse>) -> S3Error
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let retryable = match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => true,
        SdkError::ServiceError(ctx) => {
            let status = ctx.raw().status().as_u16();
            status == 429
                || status >= 500
                || ctx
                    .err()
                    .code()
                    .map(|code| RETRYABLE_CODES.contains(&code))
                    .unwrap_or(false)
        }
        _ => false,
    };

    S3Error::Request {
        key: key.to_string(),
        message: DisplayErrorContext(&err).to_string(),
        retryable,
    }
}
