//! Per-site credential generation.
//!
//! WordPress needs eight authentication keys/salts. They are fetched from
//! the WordPress secret-key service when reachable; on any failure (network
//! error, unexpected body, fewer than eight entries) they are generated
//! locally from the OS RNG instead. The fallback is silent to callers apart
//! from a log line and never fails site creation.
//!
//! Secret values are never logged.

use anyhow::{bail, Result};
use rand::distributions::{Alphanumeric, Uniform};
use rand::rngs::OsRng;
use rand::Rng;
use regex::Regex;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::config::SecretsConfig;

/// The eight keys Bedrock reads from its environment file, in order.
pub const SALT_KEYS: [&str; 8] = [
    "AUTH_KEY",
    "SECURE_AUTH_KEY",
    "LOGGED_IN_KEY",
    "NONCE_KEY",
    "AUTH_SALT",
    "SECURE_AUTH_SALT",
    "LOGGED_IN_SALT",
    "NONCE_SALT",
];

const SALT_LENGTH: usize = 64;

/// Characters used for locally generated salts. Excludes quotes, backslash
/// and `$` so values survive dotenv files and shell scripts unescaped.
const SALT_CHARSET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789!#%&()*+,-./:;<=>?@[]^_{|}~";

/// Where a set of salts came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaltSource {
    Remote,
    Local,
}

/// The eight WordPress authentication secrets.
#[derive(Clone)]
pub struct Salts {
    values: BTreeMap<String, String>,
    pub source: SaltSource,
}

impl std::fmt::Debug for Salts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Salts")
            .field("keys", &self.values.len())
            .field("source", &self.source)
            .finish()
    }
}

impl Salts {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// `(key, value)` pairs in [`SALT_KEYS`] order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        SALT_KEYS
            .iter()
            .filter_map(move |k| self.values.get(*k).map(|v| (*k, v.as_str())))
    }

    pub fn generate_local() -> Self {
        let values = SALT_KEYS
            .iter()
            .map(|k| (k.to_string(), random_from_charset(SALT_CHARSET, SALT_LENGTH)))
            .collect();
        Self {
            values,
            source: SaltSource::Local,
        }
    }
}

/// Fetch salts from the configured service, falling back to local
/// generation on any failure.
pub async fn generate_salts(config: &SecretsConfig) -> Salts {
    resolve_salts(fetch_salts(config).await)
}

/// Decide between a fetched response body and the local fallback.
pub fn resolve_salts(fetched: Result<String>) -> Salts {
    match fetched.and_then(|body| parse_salt_response(&body)) {
        Ok(salts) => salts,
        Err(e) => {
            tracing::warn!(error = %e, "salt service unavailable; generating salts locally");
            Salts::generate_local()
        }
    }
}

async fn fetch_salts(config: &SecretsConfig) -> Result<String> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;
    let response = client.get(&config.salt_url).send().await?;
    let status = response.status();
    if !status.is_success() {
        bail!("salt service returned {}", status);
    }
    Ok(response.text().await?)
}

/// Parse `define('AUTH_KEY', '...');` lines as served by the WordPress
/// secret-key API. All eight keys must be present.
pub fn parse_salt_response(body: &str) -> Result<Salts> {
    let re = Regex::new(r#"define\(\s*'([A-Z_]+)'\s*,\s*'((?:[^'\\]|\\.)*)'\s*\)"#)?;

    let mut values = BTreeMap::new();
    for cap in re.captures_iter(body) {
        let key = &cap[1];
        if SALT_KEYS.contains(&key) {
            let value = cap[2].replace("\\'", "'").replace("\\\\", "\\");
            if !value.is_empty() {
                values.insert(key.to_string(), value);
            }
        }
    }

    if values.len() < SALT_KEYS.len() {
        bail!(
            "salt response contained {} of {} required keys",
            values.len(),
            SALT_KEYS.len()
        );
    }

    Ok(Salts {
        values,
        source: SaltSource::Remote,
    })
}

/// Random alphanumeric password of `len` characters.
pub fn generate_password(len: usize) -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

fn random_from_charset(charset: &[u8], len: usize) -> String {
    let dist = Uniform::from(0..charset.len());
    (0..len)
        .map(|_| charset[OsRng.sample(dist)] as char)
        .collect()
}

/// Derive a database identifier base from a site name: lower-case, with
/// every non-alphanumeric character mapped to `_`.
pub fn db_slug(site: &str) -> String {
    site.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

pub fn default_db_name(site: &str) -> String {
    format!("{}_db", db_slug(site))
}

pub fn default_db_user(site: &str) -> String {
    format!("{}_user", db_slug(site))
}
