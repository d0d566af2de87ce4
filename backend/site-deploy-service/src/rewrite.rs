//! Edge request rewriting.
//!
//! Runs once per viewer request before the cache lookup. Directory-like paths
//! are mapped onto their index document so the origin bucket, which has no
//! notion of directories, can serve them:
//!
//! | request            | effective path          |
//! |--------------------|-------------------------|
//! | `/`                | `/index.html`           |
//! | `/blog`            | `/blog/index.html`      |
//! | `/blog/`           | `/blog/index.html`      |
//! | `/app.js`          | `/app.js`               |
//! | `/docs/index.html` | `/docs/index.html`      |
//!
//! The rewrite is pure and bounded by the length of the final path segment;
//! it never fails and never touches the query string or fragment.

use crate::config::SiteConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Viewer request as seen by the edge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeRequest {
    /// Raw request target, possibly with `?query` and `#fragment`
    pub uri: String,
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl EdgeRequest {
    pub fn get(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            method: "GET".to_string(),
            headers: BTreeMap::new(),
        }
    }
}

/// Outcome of rewriting one request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewriteDecision {
    /// Path the origin is asked for
    pub effective_path: String,
    /// `?query` and/or `#fragment`, carried over verbatim
    pub suffix: String,
}

impl RewriteDecision {
    /// Effective path with the original query and fragment reattached
    pub fn uri(&self) -> String {
        format!("{}{}", self.effective_path, self.suffix)
    }
}

/// Split a request target into its path and the `?query#fragment` tail
pub fn split_uri(uri: &str) -> (&str, &str) {
    match uri.find(&['?', '#'][..]) {
        Some(idx) => uri.split_at(idx),
        None => (uri, ""),
    }
}

/// Extension of the final path segment, if any
///
/// Only the text after the last `.` of the last segment counts, so
/// `/v1.2/resource` has no extension.
fn final_segment_extension(path: &str) -> Option<&str> {
    let segment = match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    };
    segment.rfind('.').map(|idx| &segment[idx + 1..])
}

/// Effective path for `path` under `config`
pub fn rewrite_path(config: &SiteConfig, path: &str) -> String {
    if path.is_empty() {
        return config.root_document_path();
    }

    if let Some(ext) = final_segment_extension(path) {
        if config.is_static_extension(ext) {
            return path.to_string();
        }
    }

    // Must end with "/<root>", not merely "<root>".
    let root = &config.root_document;
    if path.len() > root.len()
        && path.ends_with(root.as_str())
        && path.as_bytes()[path.len() - root.len() - 1] == b'/'
    {
        return path.to_string();
    }

    if path.ends_with('/') {
        format!("{}{}", path, root)
    } else {
        format!("{}/{}", path, root)
    }
}

/// Stateless per-request rewriter
#[derive(Debug, Clone)]
pub struct RequestRewriter {
    config: Arc<SiteConfig>,
}

impl RequestRewriter {
    pub fn new(config: Arc<SiteConfig>) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SiteConfig {
        &self.config
    }

    /// Effective path for a bare path component
    pub fn rewrite(&self, path: &str) -> String {
        rewrite_path(&self.config, path)
    }

    /// Rewrite the path of a full request target, keeping query and fragment
    pub fn rewrite_uri(&self, uri: &str) -> String {
        self.decide(uri).uri()
    }

    pub fn decide(&self, uri: &str) -> RewriteDecision {
        let (path, suffix) = split_uri(uri);
        RewriteDecision {
            effective_path: self.rewrite(path),
            suffix: suffix.to_string(),
        }
    }

    pub fn handle(&self, request: &EdgeRequest) -> RewriteDecision {
        self.decide(&request.uri)
    }

    /// JavaScript viewer-request handler applying the same rule at the edge
    ///
    /// The edge runtime passes `request.uri` without the query string, so the
    /// generated code only deals with the path.
    pub fn edge_function_source(&self) -> String {
        let extensions = self
            .config
            .static_extensions
            .iter()
            .map(|ext| format!("'{}'", ext.to_ascii_lowercase()))
            .collect::<Vec<_>>()
            .join(", ");
        let root = &self.config.root_document;

        format!(
            r#"var STATIC_EXTENSIONS = [{extensions}];
var ROOT_DOCUMENT = '{root}';

function handler(event) {{
  var request = event.request;
  var uri = request.uri;

  if (uri === '') {{
    request.uri = '/' + ROOT_DOCUMENT;
    return request;
  }}

  var segment = uri.substring(uri.lastIndexOf('/') + 1);
  var dot = segment.lastIndexOf('.');
  if (dot !== -1 && STATIC_EXTENSIONS.indexOf(segment.substring(dot + 1).toLowerCase()) !== -1) {{
    return request;
  }}

  if (uri.endsWith('/' + ROOT_DOCUMENT)) {{
    return request;
  }}

  request.uri = uri.endsWith('/') ? uri + ROOT_DOCUMENT : uri + '/' + ROOT_DOCUMENT;
  return request;
}}
"#
        )
    }
}

impl Default for RequestRewriter {
    fn default() -> Self {
        Self::new(Arc::new(SiteConfig::default()))
    }
}
