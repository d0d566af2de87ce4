//! Invalidation path-set computation.
//!
//! Every deploy purges:
//! - the configured section prefixes (`/en/*`, `/tags/*`, ...), which change on
//!   every build;
//! - the root document and `/`, which back the default root object and the
//!   404 fallback;
//! - the edge paths of files added, modified or removed since the previous
//!   manifest that no section prefix already covers.
//!
//! Without a previous manifest nothing is known about the cache, so `/*` is
//! added. Paths a previous deploy failed to purge are carried into the next
//! plan. Plans that grow past `max_paths` collapse to `/*` as well.

use crate::config::SiteConfig;
use crate::snapshot::SnapshotDiff;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

pub const WILDCARD_ALL: &str = "/*";

/// Set of edge path patterns to purge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationRequest {
    pub path_patterns: BTreeSet<String>,
    /// Idempotency token; retries of the same request reuse it
    pub caller_reference: String,
}

impl InvalidationRequest {
    pub fn new(path_patterns: BTreeSet<String>) -> Self {
        Self {
            path_patterns,
            caller_reference: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn contains(&self, pattern: &str) -> bool {
        self.path_patterns.contains(pattern)
    }

    pub fn len(&self) -> usize {
        self.path_patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.path_patterns.is_empty()
    }
}

/// True when `pattern` (`/exact` or `/prefix/*`) covers `path`
pub fn pattern_covers(pattern: &str, path: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => path.starts_with(prefix),
        None => pattern == path,
    }
}

/// Computes the path patterns for a deploy
#[derive(Debug, Clone)]
pub struct InvalidationPlanner {
    config: Arc<SiteConfig>,
    max_paths: usize,
}

impl InvalidationPlanner {
    pub fn new(config: Arc<SiteConfig>, max_paths: usize) -> Self {
        Self { config, max_paths }
    }

    /// Patterns purged on every deploy regardless of what changed
    pub fn fixed_patterns(&self) -> BTreeSet<String> {
        self.config
            .section_prefixes
            .iter()
            .cloned()
            .chain(self.config.root_paths())
            .collect()
    }

    /// Edge paths that may hold a cached copy of the object at `key`
    ///
    /// Index documents are also reachable through their directory, with and
    /// without the trailing slash, because the rewriter maps both onto them.
    pub fn edge_paths(&self, key: &str) -> Vec<String> {
        let mut paths = vec![format!("/{}", key)];

        let root = self.config.root_document.as_str();
        if key == root {
            paths.push("/".to_string());
        } else if let Some(dir) = key
            .strip_suffix(root)
            .and_then(|rest| rest.strip_suffix('/'))
        {
            paths.push(format!("/{}/", dir));
            paths.push(format!("/{}", dir));
        }

        paths
    }

    /// Plan the invalidation for a deploy; `None` means no previous manifest
    pub fn plan(&self, diff: Option<&SnapshotDiff>) -> BTreeSet<String> {
        self.plan_with(diff, &BTreeSet::new())
    }

    /// Like [`plan`](Self::plan), also purging `carried` paths left over from
    /// a deferred invalidation
    pub fn plan_with(
        &self,
        diff: Option<&SnapshotDiff>,
        carried: &BTreeSet<String>,
    ) -> BTreeSet<String> {
        let mut patterns = self.fixed_patterns();

        let diff = match diff {
            Some(diff) => diff,
            None => {
                patterns.insert(WILDCARD_ALL.to_string());
                return patterns;
            }
        };

        let fixed: Vec<String> = patterns.iter().cloned().collect();
        let touched = diff.touched().flat_map(|key| self.edge_paths(key));
        for path in touched.chain(carried.iter().cloned()) {
            if !fixed.iter().any(|pattern| pattern_covers(pattern, &path)) {
                patterns.insert(path);
            }
        }

        if patterns.len() > self.max_paths {
            let mut collapsed = self.fixed_patterns();
            collapsed.insert(WILDCARD_ALL.to_string());
            return collapsed;
        }

        patterns
    }
}
