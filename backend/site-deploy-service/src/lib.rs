//! Static site deploy: edge request rewriting, deploy-time cache
//! invalidation and CI deploy identity trust.

pub mod config;
pub mod error;
pub mod metrics;
pub mod rewrite;
pub mod services;
pub mod snapshot;

pub use config::{DeployConfig, SiteConfig, TrustConfig};
pub use error::{DeployError, Result};
pub use rewrite::{rewrite_path, RequestRewriter};
pub use snapshot::{AssetSnapshot, SnapshotManifest};
