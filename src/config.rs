//! Fleet-wide configuration (`wpfleet.toml`).
//!
//! Per-site values live in the site store ([`crate::store`]); this file holds
//! the settings shared by every site: where sites and templates live, which
//! DNS provider and hosting panel to talk to, polling windows and backup
//! retention.
//!
//! ```toml
//! [paths]
//! sites_file = "config/sites.toml"
//! sites_root = "sites"
//! template_dir = "template"
//!
//! [dns]
//! zone_id = "023e105f4ecef8ad9ca31a8372d0c353"
//! api_token_env = "CLOUDFLARE_API_TOKEN"
//!
//! [panel]
//! email = "ops@example.com"
//!
//! [backup]
//! retention = 7
//! ```
//!
//! API tokens are never stored here; the config names the environment
//! variable to read them from.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retry::RetryPolicy;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub paths: PathsConfig,
    #[serde(default)]
    pub secrets: SecretsConfig,
    #[serde(default)]
    pub dns: DnsConfig,
    #[serde(default)]
    pub panel: PanelConfig,
    #[serde(default)]
    pub verify: VerifyConfig,
    #[serde(default)]
    pub backup: BackupConfig,
    #[serde(default)]
    pub deploy: DeployConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    pub sites_file: PathBuf,
    pub sites_root: PathBuf,
    pub template_dir: PathBuf,
    /// Template files that receive placeholder substitution.
    #[serde(default = "default_template_globs")]
    pub template_globs: Vec<String>,
}

fn default_template_globs() -> Vec<String> {
    [
        "**/*.yml",
        "**/*.yaml",
        "**/*.conf",
        "**/*.json",
        "**/*.php",
        "**/*.env*",
        "**/.env*",
        "**/*.md",
        "**/Dockerfile",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SecretsConfig {
    #[serde(default = "default_salt_url")]
    pub salt_url: String,
    #[serde(default = "default_password_length")]
    pub password_length: usize,
    #[serde(default = "default_salt_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            salt_url: default_salt_url(),
            password_length: default_password_length(),
            timeout_secs: default_salt_timeout_secs(),
        }
    }
}

fn default_salt_url() -> String {
    "https://api.wordpress.org/secret-key/1.1/salt/".to_string()
}
fn default_password_length() -> usize {
    24
}
fn default_salt_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct DnsConfig {
    #[serde(default = "default_dns_provider")]
    pub provider: String,
    #[serde(default)]
    pub zone_id: Option<String>,
    #[serde(default = "default_api_token_env")]
    pub api_token_env: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// `1` means "automatic" for Cloudflare.
    #[serde(default = "default_ttl")]
    pub ttl: u32,
    #[serde(default)]
    pub proxied: bool,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            provider: default_dns_provider(),
            zone_id: None,
            api_token_env: default_api_token_env(),
            api_base: default_api_base(),
            ttl: default_ttl(),
            proxied: false,
        }
    }
}

fn default_dns_provider() -> String {
    "cloudflare".to_string()
}
fn default_api_token_env() -> String {
    "CLOUDFLARE_API_TOKEN".to_string()
}
fn default_api_base() -> String {
    "https://api.cloudflare.com/client/v4".to_string()
}
fn default_ttl() -> u32 {
    1
}

#[derive(Debug, Deserialize, Clone)]
pub struct PanelConfig {
    #[serde(default = "default_panel_kind")]
    pub kind: String,
    /// SSH user with panel CLI rights on the target server.
    #[serde(default = "default_panel_ssh_user")]
    pub ssh_user: String,
    #[serde(default = "default_panel_owner")]
    pub owner: String,
    #[serde(default = "default_panel_package")]
    pub package: String,
    #[serde(default = "default_php")]
    pub php: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default = "default_vhost_root")]
    pub vhost_root: String,
    #[serde(default = "default_restart_command")]
    pub restart_command: String,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            kind: default_panel_kind(),
            ssh_user: default_panel_ssh_user(),
            owner: default_panel_owner(),
            package: default_panel_package(),
            php: default_php(),
            email: None,
            vhost_root: default_vhost_root(),
            restart_command: default_restart_command(),
        }
    }
}

fn default_panel_kind() -> String {
    "cyberpanel".to_string()
}
fn default_panel_ssh_user() -> String {
    "root".to_string()
}
fn default_panel_owner() -> String {
    "admin".to_string()
}
fn default_panel_package() -> String {
    "Default".to_string()
}
fn default_php() -> String {
    "8.2".to_string()
}
fn default_vhost_root() -> String {
    "/usr/local/lsws/conf/vhosts".to_string()
}
fn default_restart_command() -> String {
    "systemctl restart lsws".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct VerifyConfig {
    #[serde(default = "default_verify_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_verify_timeout")]
    pub timeout_secs: u64,
    /// Resolver queried by `dig` (e.g. `"1.1.1.1"`); system default when unset.
    #[serde(default)]
    pub resolver: Option<String>,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_verify_interval(),
            timeout_secs: default_verify_timeout(),
            resolver: None,
        }
    }
}

impl VerifyConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(
            Duration::from_secs(self.interval_secs),
            Duration::from_secs(self.timeout_secs),
        )
    }
}

fn default_verify_interval() -> u64 {
    15
}
fn default_verify_timeout() -> u64 {
    600
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackupConfig {
    #[serde(default = "default_retention")]
    pub retention: usize,
    #[serde(default = "default_auth_attempts")]
    pub auth_attempts: u32,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            retention: default_retention(),
            auth_attempts: default_auth_attempts(),
        }
    }
}

fn default_retention() -> usize {
    7
}
fn default_auth_attempts() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct DeployConfig {
    /// Prefix remote ownership/permission commands with `sudo -n`.
    #[serde(default)]
    pub sudo: bool,
    /// Extra rsync exclude patterns on top of the built-in ones.
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl Config {
    /// Config with every optional section at its default, rooted at `dir`.
    pub fn with_root(dir: &Path) -> Self {
        Self {
            paths: PathsConfig {
                sites_file: dir.join("config").join("sites.toml"),
                sites_root: dir.join("sites"),
                template_dir: dir.join("template"),
                template_globs: default_template_globs(),
            },
            secrets: SecretsConfig::default(),
            dns: DnsConfig::default(),
            panel: PanelConfig::default(),
            verify: VerifyConfig::default(),
            backup: BackupConfig::default(),
            deploy: DeployConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.secrets.password_length < 12 {
        anyhow::bail!("secrets.password_length must be >= 12");
    }

    if config.backup.retention == 0 {
        anyhow::bail!("backup.retention must be >= 1");
    }

    if config.backup.auth_attempts == 0 {
        anyhow::bail!("backup.auth_attempts must be >= 1");
    }

    if config.verify.interval_secs == 0 {
        anyhow::bail!("verify.interval_secs must be > 0");
    }

    if config.verify.timeout_secs < config.verify.interval_secs {
        anyhow::bail!("verify.timeout_secs must be >= verify.interval_secs");
    }

    match config.dns.provider.as_str() {
        "cloudflare" | "disabled" => {}
        other => anyhow::bail!(
            "Unknown DNS provider: '{}'. Must be cloudflare or disabled.",
            other
        ),
    }

    match config.panel.kind.as_str() {
        "cyberpanel" => {}
        other => anyhow::bail!("Unknown hosting panel: '{}'. Must be cyberpanel.", other),
    }

    Ok(())
}
