//! Code deployment to a remote environment.
//!
//! Builds production dependencies locally, mirrors the site root to the
//! server with rsync, then normalizes ownership and permissions remotely.
//! Every sub-step is named so a failure reports exactly where it stopped.
//! Secret files, VCS metadata and the uploads directory are never pushed.

use anyhow::Result;

use crate::config::DeployConfig;
use crate::error::LifecycleError;
use crate::exec::{quote, run_checked, CommandRunner, CommandSpec, Target};
use crate::models::EnvironmentConfig;

/// Paths rsync never sends or deletes on the server.
pub const DEFAULT_EXCLUDES: [&str; 5] = [".env*", ".git", ".DS_Store", "Thumbs.db", "web/app/uploads/"];

#[derive(Debug, Clone, Default)]
pub struct DeployOptions {
    /// Show what rsync would transfer; skip composer and remote commands.
    pub dry_run: bool,
    pub sudo: bool,
    pub extra_excludes: Vec<String>,
}

impl DeployOptions {
    pub fn from_config(config: &DeployConfig, dry_run: bool) -> Self {
        Self {
            dry_run,
            sudo: config.sudo,
            extra_excludes: config.exclude.clone(),
        }
    }

    fn excludes(&self) -> impl Iterator<Item = &str> {
        DEFAULT_EXCLUDES
            .iter()
            .copied()
            .chain(self.extra_excludes.iter().map(String::as_str))
    }
}

#[derive(Debug, Default)]
pub struct DeployReport {
    /// Sub-steps that ran, in order.
    pub steps: Vec<&'static str>,
    pub dry_run: bool,
    /// rsync's itemized change list (dry runs only).
    pub changes: String,
}

pub fn composer_command(env: &EnvironmentConfig) -> CommandSpec {
    CommandSpec::new("composer")
        .args([
            "install",
            "--no-dev",
            "--optimize-autoloader",
            "--no-interaction",
        ])
        .current_dir(&env.site_root)
}

pub fn rsync_command(env: &EnvironmentConfig, options: &DeployOptions) -> CommandSpec {
    let mut spec = CommandSpec::new("rsync").args(["-az", "--delete"]);
    for pattern in options.excludes() {
        spec = spec.arg(format!("--exclude={}", pattern));
    }
    if options.dry_run {
        spec = spec.args(["--dry-run", "--itemize-changes"]);
    }
    spec.args(["-e", "ssh -o BatchMode=yes"])
        .arg(format!("{}/", env.site_root.to_string_lossy().trim_end_matches('/')))
        .arg(format!(
            "{}@{}:{}/",
            env.ssh_user,
            env.ssh_host,
            env.remote_path.trim_end_matches('/')
        ))
}

/// Remote ownership and permission fix-ups as `(step, script)` pairs.
pub fn permission_scripts(env: &EnvironmentConfig, sudo: bool) -> Vec<(&'static str, String)> {
    let s = if sudo { "sudo -n " } else { "" };
    let root = quote(env.remote_path.trim_end_matches('/'));
    let uploads = quote(&env.remote_uploads_path());
    let secret = quote(&format!(
        "{}/.env",
        env.remote_path.trim_end_matches('/')
    ));
    let owner = quote(&format!("{0}:{0}", env.web_user));

    vec![
        ("chown", format!("{s}chown -R {owner} {root}")),
        (
            "chmod directories",
            format!("{s}find {root} -type d -exec chmod 755 {{}} +"),
        ),
        (
            "chmod files",
            format!("{s}find {root} -type f -exec chmod 644 {{}} +"),
        ),
        (
            "chmod uploads",
            format!(
                "{s}mkdir -p {uploads} && {s}chown {owner} {uploads} && {s}find {uploads} -type d -exec chmod 775 {{}} + && {s}find {uploads} -type f -exec chmod 664 {{}} +"
            ),
        ),
        (
            "chmod secrets",
            format!("if [ -f {secret} ]; then {s}chmod 400 {secret}; fi"),
        ),
    ]
}

/// Deploy the site root to `env`.
pub async fn deploy(
    runner: &dyn CommandRunner,
    env: &EnvironmentConfig,
    options: &DeployOptions,
) -> Result<DeployReport> {
    if !env.environment.is_remote() {
        return Err(LifecycleError::Configuration(
            "deploy targets staging or production; the local environment is the source".into(),
        )
        .into());
    }
    let target = Target::for_environment(env);
    let mut report = DeployReport {
        dry_run: options.dry_run,
        ..Default::default()
    };
    tracing::info!(site = %env.site, env = %env.environment, %target, dry_run = options.dry_run, "deploy");

    // Step 1: Production dependencies
    if !options.dry_run {
        run_checked(runner, "composer install", &composer_command(env)).await?;
        report.steps.push("composer install");
    }

    // Step 2: Sync code
    let output = run_checked(runner, "rsync", &rsync_command(env, options)).await?;
    report.steps.push("rsync");
    if options.dry_run {
        report.changes = output.stdout;
        return Ok(report);
    }

    // Step 3: Ownership and permissions
    for (step, script) in permission_scripts(env, options.sudo) {
        run_checked(runner, step, &target.shell(&script)).await?;
        report.steps.push(step);
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Environment;
    use std::path::PathBuf;

    fn env() -> EnvironmentConfig {
        EnvironmentConfig {
            site: "acme".into(),
            environment: Environment::Production,
            site_root: PathBuf::from("/work/sites/acme"),
            ssh_host: "203.0.113.10".into(),
            ssh_user: "deploy".into(),
            web_user: "acme".into(),
            remote_path: "/home/acme.test/public_html/".into(),
            domain: "acme.test".into(),
            db_name: "acme_db".into(),
            db_user: "acme_user".into(),
            db_pass: "pw".into(),
            db_host: "localhost".into(),
            object_store_remote: "b2:fleet".into(),
            local_uploads_path: PathBuf::from("/home/acme.test/public_html/web/app/uploads"),
            local_db_dump_path: PathBuf::from("/home/acme.test/backups"),
        }
    }

    #[test]
    fn test_rsync_excludes_secrets_and_uploads() {
        let options = DeployOptions {
            extra_excludes: vec!["node_modules".into()],
            ..Default::default()
        };
        let spec = rsync_command(&env(), &options);
        let line = spec.command_line();
        assert!(line.starts_with("rsync -az --delete --exclude=.env* --exclude=.git"));
        assert!(line.contains("--exclude=web/app/uploads/"));
        assert!(line.contains("--exclude=node_modules"));
        assert!(!line.contains("--dry-run"));
        assert!(line.ends_with("/work/sites/acme/ deploy@203.0.113.10:/home/acme.test/public_html/"));
    }

    #[test]
    fn test_permission_order_and_sudo() {
        let scripts = permission_scripts(&env(), true);
        let names: Vec<_> = scripts.iter().map(|(n, _)| *n).collect();
        assert_eq!(
            names,
            vec!["chown", "chmod directories", "chmod files", "chmod uploads", "chmod secrets"]
        );
        assert_eq!(
            scripts[0].1,
            "sudo -n chown -R acme:acme /home/acme.test/public_html"
        );
        assert!(scripts[3].1.contains("-type d -exec chmod 775"));
        assert!(scripts[4].1.contains("sudo -n chmod 400 /home/acme.test/public_html/.env"));
    }

    #[test]
    fn test_no_sudo_prefix_by_default() {
        assert!(permission_scripts(&env(), false)
            .iter()
            .all(|(_, s)| !s.contains("sudo")));
    }
}
