//! Site scaffolding.
//!
//! Creates `<sites_root>/<name>` from the template directory, renders every
//! template file, writes the three per-environment secret files and records
//! the site in the site store.
//!
//! Workflow:
//! 1. Refuse if the site directory or store entry already exists.
//! 2. Derive database credentials and fetch (or generate) salts.
//! 3. Copy the template tree, skipping VCS and dependency directories.
//! 4. Render files matching `paths.template_globs`.
//! 5. Write `.env`, `.env.staging`, `.env.production` with mode `0600`.
//! 6. Merge known environment fields into the store and save it.
//! 7. Report every placeholder left unresolved.
//!
//! A failure after the directory was created removes it again, so a retry
//! starts from a clean slate.

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::Config;
use crate::error::LifecycleError;
use crate::models::{DatabaseCredentials, Environment};
use crate::secrets::{self, SaltSource, Salts};
use crate::store::{write_atomic, SiteStore};
use crate::template::{self, Placeholders, Unresolved};

/// Inputs for a new site.
#[derive(Debug, Clone)]
pub struct InitRequest {
    pub name: String,
    /// Local HTTP port for the development stack.
    pub port: u16,
    /// Production domain, e.g. `acme.com`.
    pub domain: String,
    /// Defaults to `staging.<domain>`.
    pub staging_domain: Option<String>,
    pub db_host: String,
    /// Generated when absent.
    pub db_password: Option<String>,
}

impl InitRequest {
    pub fn staging_domain(&self) -> String {
        self.staging_domain
            .clone()
            .unwrap_or_else(|| format!("staging.{}", self.domain))
    }

    pub fn local_url(&self) -> String {
        format!("http://localhost:{}", self.port)
    }
}

#[derive(Debug)]
pub struct InitReport {
    pub site_root: PathBuf,
    pub files_copied: usize,
    pub files_rendered: usize,
    pub salt_source: SaltSource,
    pub credentials: DatabaseCredentials,
    pub unresolved: Vec<Unresolved>,
}

pub async fn init_site(
    config: &Config,
    store: &mut SiteStore,
    request: &InitRequest,
) -> Result<InitReport> {
    validate_name(&request.name)?;

    let site_root = config.paths.sites_root.join(&request.name);
    if site_root.exists() {
        return Err(LifecycleError::Configuration(format!(
            "site directory already exists: {}",
            site_root.display()
        ))
        .into());
    }
    if store.contains_site(&request.name) {
        return Err(LifecycleError::Configuration(format!(
            "site '{}' is already registered in {}",
            request.name,
            store.path().display()
        ))
        .into());
    }
    if !config.paths.template_dir.is_dir() {
        return Err(LifecycleError::Configuration(format!(
            "template directory not found: {}",
            config.paths.template_dir.display()
        ))
        .into());
    }

    let credentials = DatabaseCredentials {
        db_name: secrets::default_db_name(&request.name),
        db_user: secrets::default_db_user(&request.name),
        db_pass: request
            .db_password
            .clone()
            .unwrap_or_else(|| secrets::generate_password(config.secrets.password_length)),
        db_host: request.db_host.clone(),
    };
    let salts = secrets::generate_salts(&config.secrets).await;

    match scaffold(config, store, request, &site_root, &credentials, &salts) {
        Ok((files_copied, files_rendered, unresolved)) => {
            tracing::info!(
                site = %request.name,
                root = %site_root.display(),
                files_copied,
                "site created"
            );
            Ok(InitReport {
                site_root,
                files_copied,
                files_rendered,
                salt_source: salts.source,
                credentials,
                unresolved,
            })
        }
        Err(e) => {
            if let Err(cleanup) = std::fs::remove_dir_all(&site_root) {
                tracing::warn!(
                    root = %site_root.display(),
                    error = %cleanup,
                    "failed to remove partially created site"
                );
            }
            Err(e)
        }
    }
}

fn scaffold(
    config: &Config,
    store: &mut SiteStore,
    request: &InitRequest,
    site_root: &Path,
    credentials: &DatabaseCredentials,
    salts: &Salts,
) -> Result<(usize, usize, Vec<Unresolved>)> {
    let mut values = Placeholders::new();
    values
        .set("SITE_NAME", request.name.as_str())
        .set("PORT", request.port.to_string())
        .set("LOCAL_URL", request.local_url())
        .set("DOMAIN", request.domain.as_str())
        .set("STAGING_DOMAIN", request.staging_domain())
        .set("DB_NAME", credentials.db_name.as_str())
        .set("DB_USER", credentials.db_user.as_str())
        .set("DB_PASSWORD", credentials.db_pass.as_str())
        .set("DB_HOST", credentials.db_host.as_str());

    let render_set = build_globset(&config.paths.template_globs)?;

    let template_dir = &config.paths.template_dir;
    let mut copied = 0usize;
    let mut rendered = 0usize;
    let mut unresolved = Vec::new();

    std::fs::create_dir_all(site_root)
        .with_context(|| format!("Failed to create {}", site_root.display()))?;

    let walker = WalkDir::new(template_dir)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| !is_skipped_dir(e));
    for entry in walker {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(template_dir)
            .unwrap_or(entry.path());
        let rel_str = relative.to_string_lossy().to_string();

        let dest = site_root.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&dest)?;
            continue;
        }
        if !entry.file_type().is_file() {
            continue;
        }

        std::fs::copy(entry.path(), &dest).with_context(|| {
            format!(
                "Failed to copy {} to {}",
                entry.path().display(),
                dest.display()
            )
        })?;
        copied += 1;

        if render_set.is_match(&rel_str) {
            unresolved.extend(template::render_file(&dest, &values)?);
            rendered += 1;
        }
    }

    let domains = [
        (Environment::Local, format!("localhost:{}", request.port)),
        (Environment::Staging, request.staging_domain()),
        (Environment::Production, request.domain.clone()),
    ];

    for (environment, domain) in &domains {
        let home = match environment {
            Environment::Local => request.local_url(),
            _ => format!("https://{}", domain),
        };
        let path = site_root.join(environment.secret_file_name());
        let content = env_file_contents(*environment, credentials, &home, salts);
        write_atomic(&path, content.as_bytes(), 0o600)?;
        for (line, marker) in template::find_unresolved(&content) {
            tracing::warn!(file = %path.display(), line, marker = %marker, "unresolved placeholder");
            unresolved.push(Unresolved {
                file: path.clone(),
                line,
                marker,
            });
        }
    }

    store.set_root(&request.name, site_root);
    for (environment, domain) in &domains {
        let mut fields = vec![
            ("domain", domain.clone()),
            ("db_name", credentials.db_name.clone()),
            ("db_user", credentials.db_user.clone()),
            ("db_pass", credentials.db_pass.clone()),
            ("db_host", credentials.db_host.clone()),
        ];
        match environment {
            Environment::Local => {
                let user = std::env::var("USER").unwrap_or_else(|_| "www-data".to_string());
                fields.push(("ssh_host", "localhost".to_string()));
                fields.push(("ssh_user", user.clone()));
                fields.push(("web_user", user));
                fields.push(("remote_path", site_root.display().to_string()));
                fields.push((
                    "local_uploads_path",
                    site_root.join("web/app/uploads").display().to_string(),
                ));
                fields.push((
                    "local_db_dump_path",
                    site_root.join("backups").display().to_string(),
                ));
            }
            _ => {
                let remote_path = format!("/home/{}/public_html", domain);
                fields.push(("local_uploads_path", format!("{}/web/app/uploads", remote_path)));
                fields.push(("local_db_dump_path", format!("/home/{}/backups", domain)));
                fields.push(("remote_path", remote_path));
            }
        }
        store.merge(&request.name, *environment, fields);
    }
    store.save()?;

    Ok((copied, rendered, unresolved))
}

/// Bedrock environment file for one environment.
pub fn env_file_contents(
    environment: Environment,
    credentials: &DatabaseCredentials,
    home: &str,
    salts: &Salts,
) -> String {
    let wp_env = match environment {
        Environment::Local => "development",
        Environment::Staging => "staging",
        Environment::Production => "production",
    };

    let mut out = String::new();
    let mut line = |k: &str, v: &str| {
        out.push_str(&format!("{}='{}'\n", k, escape_env_value(v)));
    };
    line("DB_NAME", &credentials.db_name);
    line("DB_USER", &credentials.db_user);
    line("DB_PASSWORD", &credentials.db_pass);
    line("DB_HOST", &credentials.db_host);
    line("WP_ENV", wp_env);
    line("WP_HOME", home);
    for (k, v) in salts.iter() {
        line(k, v);
    }
    out.push_str("WP_SITEURL=\"${WP_HOME}/wp\"\n");
    out
}

/// Replace the `DB_*` lines of an existing secret file with `credentials`,
/// keeping every other line. Used after provisioning creates a database.
pub fn update_secret_file(path: &Path, credentials: &DatabaseCredentials) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read secret file: {}", path.display()))?;
    let updates = [
        ("DB_NAME", credentials.db_name.as_str()),
        ("DB_USER", credentials.db_user.as_str()),
        ("DB_PASSWORD", credentials.db_pass.as_str()),
        ("DB_HOST", credentials.db_host.as_str()),
    ];

    let mut seen = [false; 4];
    let mut lines: Vec<String> = content
        .lines()
        .map(|l| {
            for (i, (key, value)) in updates.iter().enumerate() {
                if l.starts_with(&format!("{}=", key)) {
                    seen[i] = true;
                    return format!("{}='{}'", key, escape_env_value(value));
                }
            }
            l.to_string()
        })
        .collect();
    for (i, (key, value)) in updates.iter().enumerate() {
        if !seen[i] {
            lines.push(format!("{}='{}'", key, escape_env_value(value)));
        }
    }

    let mut out = lines.join("\n");
    out.push('\n');
    write_atomic(path, out.as_bytes(), 0o600)
}

fn escape_env_value(v: &str) -> String {
    v.replace('\\', "\\\\").replace('\'', "\\'")
}

fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= 48
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !name.starts_with('-');
    if !valid {
        return Err(LifecycleError::Configuration(format!(
            "invalid site name '{}': use lowercase letters, digits and '-'",
            name
        ))
        .into());
    }
    Ok(())
}

/// Never copied from the template: VCS metadata and installed dependencies.
const SKIPPED_DIRS: [&str; 3] = [".git", "node_modules", "vendor"];

fn is_skipped_dir(entry: &walkdir::DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map(|name| SKIPPED_DIRS.contains(&name))
            .unwrap_or(false)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> DatabaseCredentials {
        DatabaseCredentials {
            db_name: "acme_db".into(),
            db_user: "acme_user".into(),
            db_pass: "pa'ss".into(),
            db_host: "localhost".into(),
        }
    }

    #[test]
    fn test_env_file_has_all_keys() {
        let salts = Salts::generate_local();
        let content = env_file_contents(
            Environment::Staging,
            &creds(),
            "https://staging.acme.test",
            &salts,
        );
        for key in secrets::SALT_KEYS {
            assert!(content.contains(&format!("{}='", key)), "missing {}", key);
        }
        assert!(content.contains("WP_ENV='staging'"));
        assert!(content.contains("DB_PASSWORD='pa\\'ss'"));
        assert!(content.contains("WP_SITEURL=\"${WP_HOME}/wp\""));
        assert!(template::find_unresolved(&content).is_empty());
    }

    #[test]
    fn test_update_secret_file_replaces_db_lines_only() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join(".env.production");
        std::fs::write(&path, "DB_NAME='old'\nDB_PASSWORD='old'\nAUTH_KEY='k'\n").unwrap();

        let mut c = creds();
        c.db_pass = "fresh".into();
        update_secret_file(&path, &c).unwrap();

        let out = std::fs::read_to_string(&path).unwrap();
        assert!(out.contains("DB_NAME='acme_db'"));
        assert!(out.contains("DB_PASSWORD='fresh'"));
        assert!(out.contains("AUTH_KEY='k'"));
        assert!(out.contains("DB_USER='acme_user'"));
        assert!(out.contains("DB_HOST='localhost'"));
        assert!(!out.contains("'old'"));
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("acme-shop").is_ok());
        assert!(validate_name("Acme").is_err());
        assert!(validate_name("").is_err());
        assert!(validate_name("-x").is_err());
        assert!(validate_name("a/b").is_err());
    }
}
