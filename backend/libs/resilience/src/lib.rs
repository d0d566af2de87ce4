/// Resilience patterns for remote calls
///
/// This library provides:
/// - **Retry**: Exponential backoff with jitter, with a caller-supplied
///   classifier that separates transient from permanent errors
/// - **Timeout**: Per-attempt time limits on external calls
/// - **Preset Configurations**: Pre-tuned settings for object storage,
///   edge invalidation and credential exchange
///
/// # Example: Storage write with retry and timeout
///
/// ```rust,no_run
/// use resilience::{presets, timeout::with_timeout, with_retry};
///
/// #[tokio::main]
/// async fn main() {
///     let config = presets::object_storage_config();
///
///     let result = with_retry(&config.retry, || async {
///         with_timeout(config.timeout.duration, async {
///             // Your storage call here
///         })
///         .await
///     })
///     .await;
/// }
/// ```

pub mod metrics;
pub mod presets;
pub mod retry;
pub mod timeout;

// Re-export main types for convenience
pub use presets::{
    credential_exchange_config, edge_invalidation_config, object_storage_config, ServiceConfig,
};
pub use retry::{with_retry, with_retry_if, RetryConfig, RetryError};
pub use timeout::{with_timeout, with_timeout_result, TimeoutConfig, TimeoutError};
