use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::store::{self, StoreError};

/// Package alias → clone URL, persisted as one JSON object.
#[derive(Debug, Clone, Default)]
pub struct RepoRegistry {
    path: PathBuf,
    repos: BTreeMap<String, String>,
}

impl RepoRegistry {
    /// An empty registry bound to `path`; nothing is read.
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            repos: BTreeMap::new(),
        }
    }

    /// Read the registry from disk. An absent or corrupt file yields an empty map.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let repos = store::read_json_lenient(&path)?.unwrap_or_default();
        Ok(Self { path, repos })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn add(&mut self, alias: &str, url: &str) -> Result<(), StoreError> {
        self.repos.insert(alias.to_string(), url.to_string());
        tracing::info!(alias, url, "repository added");
        self.save()
    }

    /// Returns `false` without touching the file when `alias` is unknown.
    pub fn update(&mut self, alias: &str, url: &str) -> Result<bool, StoreError> {
        match self.repos.get_mut(alias) {
            Some(existing) => {
                *existing = url.to_string();
                tracing::info!(alias, url, "repository URL updated");
                self.save()?;
                Ok(true)
            }
            None => {
                tracing::warn!(alias, "repository not found");
                Ok(false)
            }
        }
    }

    /// Returns `false` without touching the file when `alias` is unknown.
    pub fn remove(&mut self, alias: &str) -> Result<bool, StoreError> {
        if self.repos.remove(alias).is_none() {
            tracing::warn!(alias, "repository not found");
            return Ok(false);
        }
        tracing::info!(alias, "repository removed");
        self.save()?;
        Ok(true)
    }

    pub fn resolve(&self, alias: &str) -> Option<&str> {
        self.repos.get(alias).map(String::as_str)
    }

    pub fn list(&self) -> impl Iterator<Item = (&str, &str)> {
        self.repos.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.repos.is_empty()
    }

    fn save(&self) -> Result<(), StoreError> {
        let _lock = store::FileLock::acquire(&self.path)?;
        store::write_json_atomic(&self.path, &self.repos)?;
        tracing::debug!(path = %self.path.display(), "repository registry saved");
        Ok(())
    }
}
