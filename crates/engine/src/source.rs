//! Where raw recipient lists come from.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dropwell_core::RawEntry;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed recipient manifest: {0}")]
    Parse(String),
}

/// Yields `(address, weight)` pairs for one airdrop.
#[async_trait]
pub trait RecipientSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<RawEntry>, SourceError>;

    /// Collection the entries were enumerated from.
    fn policy_id(&self) -> Option<&str> {
        None
    }
}

/// A manifest is either a bare list of entries or an object carrying one.
///
/// ```json
/// { "policy_id": "abc", "recipients": [{ "address": "addr1...", "quantity": 3 }] }
/// ```
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Manifest {
    List(Vec<RawEntry>),
    Document {
        #[serde(default)]
        policy_id: Option<String>,
        #[serde(alias = "holders")]
        recipients: Vec<RawEntry>,
    },
}

/// Parse manifest JSON into entries and an optional policy id.
pub fn parse_manifest(json: &str) -> Result<(Vec<RawEntry>, Option<String>), SourceError> {
    let manifest: Manifest =
        serde_json::from_str(json).map_err(|e| SourceError::Parse(e.to_string()))?;
    Ok(match manifest {
        Manifest::List(entries) => (entries, None),
        Manifest::Document {
            policy_id,
            recipients,
        } => (recipients, policy_id),
    })
}

/// Recipients read from a JSON manifest on disk.
#[derive(Debug, Clone)]
pub struct ManifestFile {
    path: PathBuf,
    entries: Vec<RawEntry>,
    policy_id: Option<String>,
}

impl ManifestFile {
    /// Read and parse the manifest at `path`.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, SourceError> {
        let path = path.into();
        let json = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| SourceError::Io {
                path: path.display().to_string(),
                source,
            })?;
        let (entries, policy_id) = parse_manifest(&json)?;
        debug!(path = %path.display(), entries = entries.len(), "manifest loaded");
        Ok(Self {
            path,
            entries,
            policy_id,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RecipientSource for ManifestFile {
    async fn fetch(&self) -> Result<Vec<RawEntry>, SourceError> {
        Ok(self.entries.clone())
    }

    fn policy_id(&self) -> Option<&str> {
        self.policy_id.as_deref()
    }
}

/// A fixed list of entries.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    entries: Vec<RawEntry>,
    policy_id: Option<String>,
}

impl StaticSource {
    pub fn new(entries: Vec<RawEntry>) -> Self {
        Self {
            entries,
            policy_id: None,
        }
    }

    pub fn with_policy(mut self, policy_id: impl Into<String>) -> Self {
        self.policy_id = Some(policy_id.into());
        self
    }
}

#[async_trait]
impl RecipientSource for StaticSource {
    async fn fetch(&self) -> Result<Vec<RawEntry>, SourceError> {
        Ok(self.entries.clone())
    }

    fn policy_id(&self) -> Option<&str> {
        self.policy_id.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list() {
        let (entries, policy) =
            parse_manifest(r#"[{"address":"addr1a","weight":3},{"address":"addr1b","quantity":-1}]"#)
                .unwrap();
        assert_eq!(entries, vec![RawEntry::new("addr1a", 3), RawEntry::new("addr1b", -1)]);
        assert!(policy.is_none());
    }

    #[test]
    fn test_parse_document() {
        let (entries, policy) = parse_manifest(
            r#"{"policy_id":"pol1","holders":[{"address":"addr1a","quantity":2}]}"#,
        )
        .unwrap();
        assert_eq!(entries, vec![RawEntry::new("addr1a", 2)]);
        assert_eq!(policy.as_deref(), Some("pol1"));
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(parse_manifest("{\"nope\": 1}"), Err(SourceError::Parse(_))));
    }

    #[tokio::test]
    async fn test_manifest_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drop.json");
        std::fs::write(&path, r#"{"policy_id":"p","recipients":[{"address":"addr1x","weight":1}]}"#).unwrap();

        let source = ManifestFile::open(&path).await.unwrap();
        assert_eq!(source.policy_id(), Some("p"));
        assert_eq!(source.path(), path.as_path());
        assert_eq!(source.fetch().await.unwrap(), vec![RawEntry::new("addr1x", 1)]);

        assert!(matches!(
            ManifestFile::open(dir.path().join("missing.json")).await,
            Err(SourceError::Io { .. })
        ));

        std::fs::write(&path, "[{\"address\": 1}]").unwrap();
        assert!(matches!(ManifestFile::open(&path).await, Err(SourceError::Parse(_))));
    }

    #[tokio::test]
    async fn test_static_source() {
        let source = StaticSource::new(vec![RawEntry::new("addr1a", 1)]).with_policy("pol");
        assert_eq!(source.fetch().await.unwrap().len(), 1);
        assert_eq!(source.policy_id(), Some("pol"));
    }
}
