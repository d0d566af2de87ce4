//! Asset snapshots and their manifests.
//!
//! An [`AssetSnapshot`] is the full content of one build of the site, keyed by
//! site-relative path (`en/index.html`, `app.js`). It is immutable once built.
//! Its [`SnapshotManifest`] keeps only the hashes and is what survives a deploy,
//! so the next deploy can tell which paths changed.

use crate::error::SnapshotError;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// One file of a snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetFile {
    pub content: Bytes,
    /// Lowercase hex SHA-256 of `content`
    pub hash: String,
    pub content_type: String,
}

impl AssetFile {
    pub fn new(path: &str, content: impl Into<Bytes>) -> Self {
        let content = content.into();
        Self {
            hash: hex::encode(Sha256::digest(&content)),
            content_type: content_type_for(path),
            content,
        }
    }
}

/// Content type from the file extension
pub fn content_type_for(path: &str) -> String {
    let ext = path
        .rsplit('/')
        .next()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "html" | "htm" => mime::TEXT_HTML_UTF_8.to_string(),
        "css" => mime::TEXT_CSS_UTF_8.to_string(),
        "js" | "mjs" => mime::APPLICATION_JAVASCRIPT_UTF_8.to_string(),
        "json" => mime::APPLICATION_JSON.to_string(),
        "xml" => mime::TEXT_XML.to_string(),
        "txt" => mime::TEXT_PLAIN_UTF_8.to_string(),
        "png" => mime::IMAGE_PNG.to_string(),
        "jpg" | "jpeg" => mime::IMAGE_JPEG.to_string(),
        "gif" => mime::IMAGE_GIF.to_string(),
        "svg" => mime::IMAGE_SVG.to_string(),
        "ico" => "image/x-icon".to_string(),
        "woff" => mime::FONT_WOFF.to_string(),
        "woff2" => mime::FONT_WOFF2.to_string(),
        "ttf" => "font/ttf".to_string(),
        "eot" => "application/vnd.ms-fontobject".to_string(),
        "pdf" => mime::APPLICATION_PDF.to_string(),
        "zip" => "application/zip".to_string(),
        _ => mime::APPLICATION_OCTET_STREAM.to_string(),
    }
}

/// Normalise a site-relative path: forward slashes, no leading slash,
/// no empty, `.` or `..` segments
fn normalize_path(path: &str) -> Result<String, SnapshotError> {
    let cleaned = path.replace('\\', "/");
    let cleaned = cleaned.trim_start_matches('/');

    if cleaned.is_empty()
        || cleaned
            .split('/')
            .any(|seg| seg.is_empty() || seg == "." || seg == "..")
    {
        return Err(SnapshotError::InvalidPath(path.to_string()));
    }

    Ok(cleaned.to_string())
}

/// Immutable set of files published by one deploy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetSnapshot {
    files: BTreeMap<String, AssetFile>,
    root_document: String,
}

impl AssetSnapshot {
    /// Start an empty snapshot
    pub fn builder(root_document: impl Into<String>) -> SnapshotBuilder {
        SnapshotBuilder {
            files: BTreeMap::new(),
            root_document: root_document.into(),
        }
    }

    /// Read every regular file below `dir`, skipping `exclude` (relative keys)
    ///
    /// Hidden files are included; ignore files are not honoured, the build
    /// output is published as-is.
    pub fn from_dir(
        dir: &Path,
        root_document: &str,
        exclude: &[&str],
    ) -> Result<Self, SnapshotError> {
        let mut builder = Self::builder(root_document);

        let walker = ignore::WalkBuilder::new(dir)
            .standard_filters(false)
            .follow_links(true)
            .build();

        for entry in walker {
            let entry = entry?;
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }

            let relative = entry
                .path()
                .strip_prefix(dir)
                .map_err(|_| SnapshotError::InvalidPath(entry.path().display().to_string()))?;
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            if exclude.contains(&key.as_str()) {
                continue;
            }

            let content = std::fs::read(entry.path()).map_err(|source| SnapshotError::Io {
                path: entry.path().to_path_buf(),
                source,
            })?;
            builder = builder.file(&key, content)?;
        }

        Ok(builder.build())
    }

    pub fn files(&self) -> &BTreeMap<String, AssetFile> {
        &self.files
    }

    pub fn get(&self, path: &str) -> Option<&AssetFile> {
        self.files.get(path.trim_start_matches('/'))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn root_document(&self) -> &str {
        &self.root_document
    }

    /// Total bytes across all files
    pub fn total_size(&self) -> usize {
        self.files.values().map(|f| f.content.len()).sum()
    }

    /// The root document must be part of every published snapshot: the edge
    /// serves it for `/` and as the 404 fallback.
    pub fn validate(&self) -> Result<(), SnapshotError> {
        if self.files.contains_key(&self.root_document) {
            Ok(())
        } else {
            Err(SnapshotError::MissingRootDocument(self.root_document.clone()))
        }
    }

    pub fn manifest(&self) -> SnapshotManifest {
        SnapshotManifest {
            root_document: self.root_document.clone(),
            generated_at: Utc::now(),
            files: self
                .files
                .iter()
                .map(|(path, file)| (path.clone(), file.hash.clone()))
                .collect(),
            pending_invalidation: BTreeSet::new(),
        }
    }

    /// Paths added, modified or removed relative to `previous`
    pub fn diff(&self, previous: &SnapshotManifest) -> SnapshotDiff {
        let mut diff = SnapshotDiff::default();

        for (path, file) in &self.files {
            match previous.files.get(path) {
                None => {
                    diff.added.insert(path.clone());
                }
                Some(hash) if *hash != file.hash => {
                    diff.modified.insert(path.clone());
                }
                Some(_) => {}
            }
        }

        diff.removed = previous
            .files
            .keys()
            .filter(|path| !self.files.contains_key(*path))
            .cloned()
            .collect();

        diff
    }
}

/// Incremental constructor for [`AssetSnapshot`]
#[derive(Debug)]
pub struct SnapshotBuilder {
    files: BTreeMap<String, AssetFile>,
    root_document: String,
}

impl SnapshotBuilder {
    pub fn file(mut self, path: &str, content: impl Into<Bytes>) -> Result<Self, SnapshotError> {
        let key = normalize_path(path)?;
        let file = AssetFile::new(&key, content);
        self.files.insert(key, file);
        Ok(self)
    }

    pub fn build(self) -> AssetSnapshot {
        AssetSnapshot {
            files: self.files,
            root_document: self.root_document,
        }
    }
}

/// Hash-only record of a published snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotManifest {
    pub root_document: String,
    pub generated_at: DateTime<Utc>,
    /// Site-relative path → SHA-256 hex
    pub files: BTreeMap<String, String>,
    /// Edge paths whose purge was deferred; the next deploy purges them too
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub pending_invalidation: BTreeSet<String>,
}

impl SnapshotManifest {
    pub fn to_json(&self) -> Result<Vec<u8>, SnapshotError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn from_json(raw: &[u8]) -> Result<Self, SnapshotError> {
        Ok(serde_json::from_slice(raw)?)
    }
}

/// Changes between two snapshots
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotDiff {
    pub added: BTreeSet<String>,
    pub modified: BTreeSet<String>,
    pub removed: BTreeSet<String>,
}

impl SnapshotDiff {
    /// Every path whose cached copy is stale after the deploy
    pub fn touched(&self) -> impl Iterator<Item = &String> {
        self.added
            .iter()
            .chain(self.modified.iter())
            .chain(self.removed.iter())
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }
}
