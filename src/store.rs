//! Site store: the structured per-site configuration record.
//!
//! Every lifecycle component reads its inputs from this file and the site
//! initializer and provisioner write back into it. The on-disk format is
//! TOML:
//!
//! ```toml
//! [sites.acme]
//! root = "/srv/sites/acme"
//!
//! [sites.acme.environments.staging]
//! ssh_host = "203.0.113.10"
//! ssh_user = "deploy"
//! domain = "staging.acme.test"
//! db_name = "acme_db"
//! ```
//!
//! Reads distinguish "absent" from "configured as empty": [`SiteStore::get`]
//! returns `None` only when the key does not exist.
//!
//! Writes replace the whole file atomically (temp file in the same
//! directory, then rename), so a crash mid-write leaves the previous record
//! intact. The store assumes a single writer at a time.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::LifecycleError;
use crate::models::Environment;

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    sites: BTreeMap<String, SiteRecord>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct SiteRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    root: Option<PathBuf>,
    #[serde(default)]
    environments: BTreeMap<String, BTreeMap<String, String>>,
}

/// In-memory view of the site store file.
#[derive(Debug)]
pub struct SiteStore {
    path: PathBuf,
    data: StoreFile,
}

impl SiteStore {
    /// Load an existing store. A missing file is a configuration error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(LifecycleError::Configuration(format!(
                "site store not found: {}",
                path.display()
            ))
            .into());
        }
        Self::open(path)
    }

    /// Load a store, starting empty if the file does not exist yet.
    pub fn open(path: &Path) -> Result<Self> {
        let data = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read site store: {}", path.display()))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse site store: {}", path.display()))?
        } else {
            StoreFile::default()
        };
        Ok(Self {
            path: path.to_path_buf(),
            data,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains_site(&self, site: &str) -> bool {
        self.data.sites.contains_key(site)
    }

    pub fn sites(&self) -> Vec<&str> {
        self.data.sites.keys().map(String::as_str).collect()
    }

    pub fn root(&self, site: &str) -> Option<&Path> {
        self.data.sites.get(site)?.root.as_deref()
    }

    /// Environments that have at least one field recorded for `site`.
    pub fn environments(&self, site: &str) -> Vec<&str> {
        self.data
            .sites
            .get(site)
            .map(|s| s.environments.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn get(&self, site: &str, environment: Environment, key: &str) -> Option<&str> {
        self.data
            .sites
            .get(site)?
            .environments
            .get(environment.as_str())?
            .get(key)
            .map(String::as_str)
    }

    pub fn set_root(&mut self, site: &str, root: &Path) {
        self.data.sites.entry(site.to_string()).or_default().root = Some(root.to_path_buf());
    }

    /// Merge `fields` into the environment record, overwriting keys that
    /// already exist and leaving every other key untouched.
    pub fn merge<I, K, V>(&mut self, site: &str, environment: Environment, fields: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let record = self
            .data
            .sites
            .entry(site.to_string())
            .or_default()
            .environments
            .entry(environment.as_str().to_string())
            .or_default();
        for (k, v) in fields {
            record.insert(k.into(), v.into());
        }
    }

    /// Persist the store atomically with owner-only permissions.
    pub fn save(&self) -> Result<()> {
        let content =
            toml::to_string_pretty(&self.data).context("Failed to serialize site store")?;
        write_atomic(&self.path, content.as_bytes(), 0o600)
    }
}

/// Write `bytes` to `path` by writing a sibling temp file and renaming it
/// over the target.
pub fn write_atomic(path: &Path, bytes: &[u8], mode: u32) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create directory: {}", dir.display()))?;

    let mut tmp = tempfile::NamedTempFile::new_in(&dir)
        .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    set_mode(tmp.path(), mode)?;
    tmp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

#[cfg(unix)]
pub fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .with_context(|| format!("Failed to set permissions on {}", path.display()))
}

#[cfg(not(unix))]
pub fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_absent_is_not_empty() {
        let tmp = TempDir::new().unwrap();
        let mut store = SiteStore::open(&tmp.path().join("sites.toml")).unwrap();
        store.merge("acme", Environment::Staging, [("db_host", "")]);

        assert_eq!(store.get("acme", Environment::Staging, "db_host"), Some(""));
        assert_eq!(store.get("acme", Environment::Staging, "db_pass"), None);
        assert_eq!(store.get("acme", Environment::Production, "db_host"), None);
        assert_eq!(store.get("other", Environment::Staging, "db_host"), None);
    }

    #[test]
    fn test_merge_keeps_unrelated_keys() {
        let tmp = TempDir::new().unwrap();
        let mut store = SiteStore::open(&tmp.path().join("sites.toml")).unwrap();
        store.merge("acme", Environment::Staging, [("db_name", "a"), ("db_user", "b")]);
        store.merge("acme", Environment::Staging, [("db_user", "c")]);

        assert_eq!(store.get("acme", Environment::Staging, "db_name"), Some("a"));
        assert_eq!(store.get("acme", Environment::Staging, "db_user"), Some("c"));
    }

    #[test]
    fn test_save_and_reload() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config").join("sites.toml");
        let mut store = SiteStore::open(&path).unwrap();
        store.set_root("acme", Path::new("/srv/acme"));
        store.merge("acme", Environment::Production, [("domain", "acme.test")]);
        store.save().unwrap();

        let reloaded = SiteStore::load(&path).unwrap();
        assert_eq!(reloaded.root("acme"), Some(Path::new("/srv/acme")));
        assert_eq!(
            reloaded.get("acme", Environment::Production, "domain"),
            Some("acme.test")
        );
        assert_eq!(reloaded.sites(), vec!["acme"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_save_restricts_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("sites.toml");
        let store = SiteStore::open(&path).unwrap();
        store.save().unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_load_missing_is_configuration_error() {
        let tmp = TempDir::new().unwrap();
        let err = SiteStore::load(&tmp.path().join("nope.toml")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LifecycleError>(),
            Some(LifecycleError::Configuration(_))
        ));
    }

    #[test]
    fn test_failed_parse_leaves_file_untouched() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("sites.toml");
        std::fs::write(&path, "not = [valid").unwrap();
        assert!(SiteStore::load(&path).is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "not = [valid");
    }
}
