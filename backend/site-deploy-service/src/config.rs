//! Configuration for the site deploy service.
//!
//! Two layers:
//! - [`SiteConfig`]: the immutable rules shared by the edge rewriter and the
//!   deploy invalidator (static extensions, section prefixes, root document).
//!   Loaded once at process start and passed around as `Arc<SiteConfig>`.
//! - [`DeployConfig`]: per-run settings read from `SITE_DEPLOY_*` environment
//!   variables (bucket, distribution, concurrency, retry budgets).

use crate::error::ConfigError;
use resilience::{presets, ServiceConfig};
use s3_utils::S3Config;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const DEFAULT_STATIC_EXTENSIONS: &[&str] = &[
    "html", "js", "css", "json", "png", "jpg", "jpeg", "gif", "svg", "ico", "woff", "woff2", "ttf",
    "eot", "xml", "txt", "pdf", "zip",
];

const DEFAULT_SECTION_PREFIXES: &[&str] = &[
    "/tutorials/*",
    "/pt-br/*",
    "/en/*",
    "/authors/*",
    "/categories/*",
    "/series/*",
    "/tags/*",
];

/// Object key of the manifest written next to the site assets
pub const MANIFEST_KEY: &str = ".deploy-manifest.json";

/// Site rules shared by request rewriting and deploy invalidation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    /// Extensions (without dot, lowercase) served as-is by the edge rewriter
    pub static_extensions: Vec<String>,
    /// Edge path patterns invalidated on every deploy
    pub section_prefixes: Vec<String>,
    /// Document served for directory-like paths
    pub root_document: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            static_extensions: DEFAULT_STATIC_EXTENSIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            section_prefixes: DEFAULT_SECTION_PREFIXES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            root_document: "index.html".to_string(),
        }
    }
}

impl SiteConfig {
    /// Load from a JSON file; missing fields take their defaults
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: SiteConfig = serde_json::from_str(&raw)?;
        config.normalized()
    }

    /// Lowercase extensions and check every rule is usable
    pub fn normalized(mut self) -> Result<Self, ConfigError> {
        for ext in self.static_extensions.iter_mut() {
            let trimmed = ext.trim_start_matches('.').to_ascii_lowercase();
            if trimmed.is_empty() || trimmed.contains('/') || trimmed.contains('.') {
                return Err(ConfigError::Invalid(format!(
                    "static extension {:?} must be a bare token",
                    ext
                )));
            }
            *ext = trimmed;
        }

        for prefix in &self.section_prefixes {
            if !prefix.starts_with('/') {
                return Err(ConfigError::Invalid(format!(
                    "section prefix {:?} must start with '/'",
                    prefix
                )));
            }
            if prefix.strip_suffix('*').unwrap_or(prefix).contains('*') {
                return Err(ConfigError::Invalid(format!(
                    "section prefix {:?} may only use '*' as the last character",
                    prefix
                )));
            }
        }

        if self.root_document.is_empty() || self.root_document.contains('/') {
            return Err(ConfigError::Invalid(format!(
                "root document {:?} must be a bare file name",
                self.root_document
            )));
        }

        Ok(self)
    }

    /// Case-insensitive membership test against the configured extensions
    pub fn is_static_extension(&self, ext: &str) -> bool {
        self.static_extensions
            .iter()
            .any(|known| known.eq_ignore_ascii_case(ext))
    }

    /// `/index.html` for the default root document
    pub fn root_document_path(&self) -> String {
        format!("/{}", self.root_document)
    }

    /// Paths invalidated on every deploy besides the section prefixes:
    /// the root document and the bare root
    pub fn root_paths(&self) -> [String; 2] {
        [self.root_document_path(), "/".to_string()]
    }
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_source_dir() -> PathBuf {
    PathBuf::from("public")
}

fn default_upload_concurrency() -> usize {
    8
}

fn default_prune() -> bool {
    true
}

fn default_max_invalidation_paths() -> usize {
    3000
}

fn default_upload_max_retries() -> u32 {
    presets::object_storage_config().retry.max_retries
}

fn default_invalidation_max_retries() -> u32 {
    presets::edge_invalidation_config().retry.max_retries
}

fn default_manifest_key() -> String {
    MANIFEST_KEY.to_string()
}

/// Per-run deploy settings, read from `SITE_DEPLOY_*` variables
#[derive(Debug, Clone, Deserialize)]
pub struct DeployConfig {
    /// Origin bucket
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Edge distribution to invalidate
    pub distribution_id: String,
    /// Directory holding the built site
    #[serde(default = "default_source_dir")]
    pub source_dir: PathBuf,
    #[serde(default)]
    pub key_prefix: Option<String>,
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default)]
    pub path_style: bool,
    #[serde(default = "default_upload_concurrency")]
    pub upload_concurrency: usize,
    /// Delete origin objects that are no longer part of the site
    #[serde(default = "default_prune")]
    pub prune: bool,
    /// Above this many paths the invalidation collapses to `/*`
    #[serde(default = "default_max_invalidation_paths")]
    pub max_invalidation_paths: usize,
    #[serde(default = "default_upload_max_retries")]
    pub upload_max_retries: u32,
    #[serde(default = "default_invalidation_max_retries")]
    pub invalidation_max_retries: u32,
    #[serde(default = "default_manifest_key")]
    pub manifest_key: String,
    /// Optional JSON file overriding [`SiteConfig`] defaults
    #[serde(default)]
    pub site_config_path: Option<PathBuf>,
}

impl DeployConfig {
    pub const ENV_PREFIX: &'static str = "SITE_DEPLOY_";

    /// Load from the process environment (after `.env`, if present)
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_vars(std::env::vars())
    }

    /// Load from an explicit set of variables
    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config: DeployConfig = envy::prefixed(Self::ENV_PREFIX).from_iter(vars)?;
        config.validate()
    }

    fn validate(self) -> Result<Self, ConfigError> {
        if self.bucket.trim().is_empty() {
            return Err(ConfigError::Invalid("bucket must not be empty".into()));
        }
        if self.distribution_id.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "distribution_id must not be empty".into(),
            ));
        }
        if self.upload_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "upload_concurrency must be at least 1".into(),
            ));
        }
        if self.max_invalidation_paths < 16 {
            return Err(ConfigError::Invalid(
                "max_invalidation_paths must leave room for the fixed patterns".into(),
            ));
        }
        Ok(self)
    }

    /// Site rules: the JSON override when configured, defaults otherwise
    pub fn load_site_config(&self) -> Result<SiteConfig, ConfigError> {
        match &self.site_config_path {
            Some(path) => SiteConfig::from_json_file(path),
            None => SiteConfig::default().normalized(),
        }
    }

    pub fn s3_config(&self) -> S3Config {
        S3Config {
            bucket: self.bucket.clone(),
            region: self.region.clone(),
            endpoint_url: self.endpoint_url.clone(),
            path_style: self.path_style,
            key_prefix: self.key_prefix.clone(),
        }
    }

    /// Upload policy: object storage preset with the configured retry budget
    pub fn upload_policy(&self) -> ServiceConfig {
        let mut policy = presets::object_storage_config();
        policy.retry = policy.retry.with_max_retries(self.upload_max_retries);
        policy
    }

    /// Invalidation policy: edge preset with the configured retry budget
    pub fn invalidation_policy(&self) -> ServiceConfig {
        let mut policy = presets::edge_invalidation_config();
        policy.retry = policy.retry.with_max_retries(self.invalidation_max_retries);
        policy
    }
}

fn default_trust_audience() -> String {
    "sts.amazonaws.com".to_string()
}

/// OIDC trust settings, read from `SITE_DEPLOY_TRUST_*` variables
#[derive(Debug, Clone, Deserialize)]
pub struct TrustConfig {
    #[serde(default = "default_trust_audience")]
    pub audience: String,
    /// Comma-separated subject patterns, e.g. `repo:acme/site:*`
    pub subjects: Vec<String>,
    /// Role assumed with the web identity token
    pub role_arn: String,
    #[serde(default = "default_region")]
    pub region: String,
}

impl TrustConfig {
    pub const ENV_PREFIX: &'static str = "SITE_DEPLOY_TRUST_";

    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config: TrustConfig = envy::prefixed(Self::ENV_PREFIX).from_iter(vars)?;
        if config.subjects.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one trusted subject pattern is required".into(),
            ));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_site_config_defaults() {
        let config = SiteConfig::default();

        assert_eq!(config.static_extensions.len(), 18);
        assert_eq!(config.section_prefixes.len(), 7);
        assert!(config.section_prefixes.contains(&"/pt-br/*".to_string()));
        assert_eq!(config.root_paths(), ["/index.html".to_string(), "/".to_string()]);
    }

    #[test]
    fn test_static_extension_case_insensitive() {
        let config = SiteConfig::default();

        assert!(config.is_static_extension("PNG"));
        assert!(config.is_static_extension("woff2"));
        assert!(!config.is_static_extension("webp"));
    }

    #[test]
    fn test_normalized_lowercases_and_strips_dots() {
        let config = SiteConfig {
            static_extensions: vec![".HTML".into(), "Css".into()],
            ..SiteConfig::default()
        }
        .normalized()
        .unwrap();

        assert_eq!(config.static_extensions, vec!["html", "css"]);
    }

    #[test]
    fn test_normalized_rejects_bad_rules() {
        let relative_prefix = SiteConfig {
            section_prefixes: vec!["en/*".into()],
            ..SiteConfig::default()
        };
        assert!(relative_prefix.normalized().is_err());

        let mid_wildcard = SiteConfig {
            section_prefixes: vec!["/en/*/posts".into()],
            ..SiteConfig::default()
        };
        assert!(mid_wildcard.normalized().is_err());

        let multibyte_mid_wildcard = SiteConfig {
            section_prefixes: vec!["/caf*é".into()],
            ..SiteConfig::default()
        };
        assert!(multibyte_mid_wildcard.normalized().is_err());

        let nested_root = SiteConfig {
            root_document: "docs/index.html".into(),
            ..SiteConfig::default()
        };
        assert!(nested_root.normalized().is_err());
    }

    #[test]
    fn test_normalized_accepts_non_ascii_prefixes() {
        let config = SiteConfig {
            section_prefixes: vec!["/café".into(), "/pt-br/ação/*".into()],
            ..SiteConfig::default()
        }
        .normalized()
        .unwrap();

        assert_eq!(config.section_prefixes[0], "/café");
    }

    #[test]
    fn test_site_config_partial_json() {
        let config: SiteConfig =
            serde_json::from_str(r#"{"section_prefixes": ["/blog/*"]}"#).unwrap();

        assert_eq!(config.section_prefixes, vec!["/blog/*"]);
        assert_eq!(config.root_document, "index.html");
    }

    #[test]
    fn test_deploy_config_from_vars() {
        let config = DeployConfig::from_vars(vars(&[
            ("SITE_DEPLOY_BUCKET", "site-bucket"),
            ("SITE_DEPLOY_DISTRIBUTION_ID", "E123ABC"),
            ("SITE_DEPLOY_UPLOAD_CONCURRENCY", "4"),
            ("SITE_DEPLOY_PRUNE", "false"),
            ("UNRELATED", "ignored"),
        ]))
        .unwrap();

        assert_eq!(config.bucket, "site-bucket");
        assert_eq!(config.region, "us-east-1");
        assert_eq!(config.source_dir, PathBuf::from("public"));
        assert_eq!(config.upload_concurrency, 4);
        assert!(!config.prune);
        assert_eq!(config.manifest_key, MANIFEST_KEY);
        assert_eq!(config.s3_config().target_id(), "s3://site-bucket");
    }

    #[test]
    fn test_deploy_config_requires_distribution() {
        let result = DeployConfig::from_vars(vars(&[("SITE_DEPLOY_BUCKET", "site-bucket")]));
        assert!(matches!(result, Err(ConfigError::Env(_))));
    }

    #[test]
    fn test_deploy_config_rejects_zero_concurrency() {
        let result = DeployConfig::from_vars(vars(&[
            ("SITE_DEPLOY_BUCKET", "site-bucket"),
            ("SITE_DEPLOY_DISTRIBUTION_ID", "E123ABC"),
            ("SITE_DEPLOY_UPLOAD_CONCURRENCY", "0"),
        ]));
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_retry_budgets_override_presets() {
        let config = DeployConfig::from_vars(vars(&[
            ("SITE_DEPLOY_BUCKET", "site-bucket"),
            ("SITE_DEPLOY_DISTRIBUTION_ID", "E123ABC"),
            ("SITE_DEPLOY_UPLOAD_MAX_RETRIES", "1"),
            ("SITE_DEPLOY_INVALIDATION_MAX_RETRIES", "9"),
        ]))
        .unwrap();

        assert_eq!(config.upload_policy().retry.max_retries, 1);
        assert_eq!(config.invalidation_policy().retry.max_retries, 9);
    }

    #[test]
    fn test_trust_config_subjects_list() {
        let config = TrustConfig::from_vars(vars(&[
            (
                "SITE_DEPLOY_TRUST_SUBJECTS",
                "repo:acme/site:*,repo:acme/site:ref:refs/heads/main",
            ),
            ("SITE_DEPLOY_TRUST_ROLE_ARN", "arn:aws:iam::123456789012:role/Deploy"),
        ]))
        .unwrap();

        assert_eq!(config.audience, "sts.amazonaws.com");
        assert_eq!(config.subjects.len(), 2);
    }
}
