//! Core data models shared by every lifecycle component.
//!
//! These types describe sites, their environments, step outcomes and backup
//! snapshots as they flow between the site store, the provisioning pipeline,
//! the deployment executor and the backup manager.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::Result;
use chrono::{DateTime, NaiveDateTime, Utc};

use crate::error::LifecycleError;
use crate::store::SiteStore;

/// A deployment target for a site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Environment {
    Local,
    Staging,
    Production,
}

impl Environment {
    pub const ALL: [Environment; 3] = [
        Environment::Local,
        Environment::Staging,
        Environment::Production,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }

    pub fn is_remote(&self) -> bool {
        !matches!(self, Environment::Local)
    }

    /// File name of the per-environment secret file inside the site root.
    pub fn secret_file_name(&self) -> &'static str {
        match self {
            Environment::Local => ".env",
            Environment::Staging => ".env.staging",
            Environment::Production => ".env.production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = LifecycleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(Environment::Local),
            "staging" => Ok(Environment::Staging),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(LifecycleError::Configuration(format!(
                "unknown environment '{}'. Must be local, staging, or production.",
                other
            ))),
        }
    }
}

/// Field names of an environment record in the site store.
///
/// `object_store_uploads_path` is accepted and shown but not read by any
/// operation; snapshots keep both artifacts under one directory.
pub const ENVIRONMENT_FIELDS: [&str; 13] = [
    "ssh_host",
    "ssh_user",
    "web_user",
    "remote_path",
    "domain",
    "db_name",
    "db_user",
    "db_pass",
    "db_host",
    "object_store_remote",
    "object_store_uploads_path",
    "local_uploads_path",
    "local_db_dump_path",
];

const CORE_FIELDS: [&str; 11] = [
    "ssh_host",
    "ssh_user",
    "web_user",
    "remote_path",
    "domain",
    "db_name",
    "db_user",
    "db_pass",
    "db_host",
    "local_uploads_path",
    "local_db_dump_path",
];

const OBJECT_STORE_FIELDS: [&str; 12] = [
    "ssh_host",
    "ssh_user",
    "web_user",
    "remote_path",
    "domain",
    "db_name",
    "db_user",
    "db_pass",
    "db_host",
    "local_uploads_path",
    "local_db_dump_path",
    "object_store_remote",
];

/// Fields an operation requires before it may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldSet {
    /// Host, paths and database. Provisioning, DNS wait, deploy, db sync.
    Core,
    /// `Core` plus the object-storage remote. Backup and restore.
    ObjectStore,
}

impl FieldSet {
    pub fn required(self) -> &'static [&'static str] {
        match self {
            FieldSet::Core => &CORE_FIELDS,
            FieldSet::ObjectStore => &OBJECT_STORE_FIELDS,
        }
    }
}

/// Fully-resolved configuration for one (site, environment) pair.
///
/// Only constructed through [`EnvironmentConfig::from_store`], which refuses
/// to build a record with a required field absent.
#[derive(Clone)]
pub struct EnvironmentConfig {
    pub site: String,
    pub environment: Environment,
    pub site_root: PathBuf,
    pub ssh_host: String,
    pub ssh_user: String,
    pub web_user: String,
    pub remote_path: String,
    pub domain: String,
    pub db_name: String,
    pub db_user: String,
    pub db_pass: String,
    pub db_host: String,
    /// Empty unless loaded with [`FieldSet::ObjectStore`] or set anyway.
    pub object_store_remote: String,
    pub local_uploads_path: PathBuf,
    pub local_db_dump_path: PathBuf,
}

impl fmt::Debug for EnvironmentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvironmentConfig")
            .field("site", &self.site)
            .field("environment", &self.environment)
            .field("ssh_host", &self.ssh_host)
            .field("domain", &self.domain)
            .field("db_name", &self.db_name)
            .field("db_user", &self.db_user)
            .field("db_pass", &"<redacted>")
            .finish_non_exhaustive()
    }
}

impl EnvironmentConfig {
    /// Build the typed record from the store, failing with
    /// [`LifecycleError::MissingFields`] naming every absent key that
    /// `needs` requires.
    pub fn from_store(
        store: &SiteStore,
        site: &str,
        environment: Environment,
        needs: FieldSet,
    ) -> Result<Self> {
        let site_root = store.root(site).ok_or_else(|| {
            LifecycleError::Configuration(format!("site '{}' is not registered", site))
        })?;

        let missing: Vec<String> = needs
            .required()
            .iter()
            .filter(|key| store.get(site, environment, key).is_none())
            .map(|key| key.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(LifecycleError::MissingFields {
                site: site.to_string(),
                environment: environment.to_string(),
                fields: missing,
            }
            .into());
        }

        // Required keys are present past this point; the rest default to empty.
        let field = |key: &str| store.get(site, environment, key).unwrap_or_default().to_string();

        Ok(Self {
            site: site.to_string(),
            environment,
            site_root: site_root.to_path_buf(),
            ssh_host: field("ssh_host"),
            ssh_user: field("ssh_user"),
            web_user: field("web_user"),
            remote_path: field("remote_path"),
            domain: field("domain"),
            db_name: field("db_name"),
            db_user: field("db_user"),
            db_pass: field("db_pass"),
            db_host: field("db_host"),
            object_store_remote: field("object_store_remote"),
            local_uploads_path: PathBuf::from(field("local_uploads_path")),
            local_db_dump_path: PathBuf::from(field("local_db_dump_path")),
        })
    }

    /// Public base URL of the environment.
    pub fn url(&self) -> String {
        if self.domain.starts_with("http://") || self.domain.starts_with("https://") {
            self.domain.trim_end_matches('/').to_string()
        } else if self.environment == Environment::Local {
            format!("http://{}", self.domain)
        } else {
            format!("https://{}", self.domain)
        }
    }

    /// Uploads directory on the remote host, relative to `remote_path`.
    pub fn remote_uploads_path(&self) -> String {
        format!("{}/web/app/uploads", self.remote_path.trim_end_matches('/'))
    }

    pub fn credentials(&self) -> DatabaseCredentials {
        DatabaseCredentials {
            db_name: self.db_name.clone(),
            db_user: self.db_user.clone(),
            db_pass: self.db_pass.clone(),
            db_host: self.db_host.clone(),
        }
    }
}

/// Database connection values for one environment.
#[derive(Clone, PartialEq, Eq)]
pub struct DatabaseCredentials {
    pub db_name: String,
    pub db_user: String,
    pub db_pass: String,
    pub db_host: String,
}

impl fmt::Debug for DatabaseCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseCredentials")
            .field("db_name", &self.db_name)
            .field("db_user", &self.db_user)
            .field("db_pass", &"<redacted>")
            .field("db_host", &self.db_host)
            .finish()
    }
}

/// Outcome of one idempotent provisioning step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Created,
    AlreadyExists,
    Failed(String),
}

impl StepOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, StepOutcome::Failed(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            StepOutcome::Created => "created",
            StepOutcome::AlreadyExists => "already_exists",
            StepOutcome::Failed(_) => "failed",
        }
    }
}

/// Timestamp format used to key backup snapshots.
pub const SNAPSHOT_TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

/// A backup snapshot: a database dump and an uploads archive sharing one
/// timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub site: String,
    pub environment: Environment,
    pub timestamp: String,
}

impl Snapshot {
    pub fn new(site: &str, environment: Environment, at: DateTime<Utc>) -> Self {
        Self {
            site: site.to_string(),
            environment,
            timestamp: at.format(SNAPSHOT_TIMESTAMP_FORMAT).to_string(),
        }
    }

    pub fn from_timestamp(site: &str, environment: Environment, timestamp: &str) -> Result<Self> {
        parse_snapshot_timestamp(timestamp).ok_or_else(|| {
            LifecycleError::Configuration(format!(
                "invalid snapshot timestamp '{}', expected YYYYMMDD-HHMMSS",
                timestamp
            ))
        })?;
        Ok(Self {
            site: site.to_string(),
            environment,
            timestamp: timestamp.to_string(),
        })
    }

    pub fn dump_name(&self) -> String {
        format!("{}-{}-{}.sql.gz", self.site, self.environment, self.timestamp)
    }

    pub fn archive_name(&self) -> String {
        format!(
            "{}-{}-{}-uploads.tar.gz",
            self.site, self.environment, self.timestamp
        )
    }

    /// Remote directory holding this snapshot's two artifacts.
    pub fn remote_dir(&self, remote: &str) -> String {
        format!(
            "{}/{}",
            snapshot_namespace(remote, &self.site, self.environment),
            self.timestamp
        )
    }

    pub fn local_dump(&self, dir: &Path) -> PathBuf {
        dir.join(self.dump_name())
    }

    pub fn local_archive(&self, dir: &Path) -> PathBuf {
        dir.join(self.archive_name())
    }
}

/// Remote prefix under which every snapshot of a (site, environment) lives.
pub fn snapshot_namespace(remote: &str, site: &str, environment: Environment) -> String {
    format!(
        "{}/backups/{}/{}",
        remote.trim_end_matches('/'),
        site,
        environment
    )
}

pub fn parse_snapshot_timestamp(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, SNAPSHOT_TIMESTAMP_FORMAT).ok()
}
