//! Snapshot backups to object storage, retention, and restore.
//!
//! A snapshot is a gzip database dump plus a tar.gz of the uploads
//! directory, uploaded together with rclone under
//! `<remote>/backups/<site>/<env>/<timestamp>/`. Everything runs on the
//! machine that holds the environment ([`Target::for_environment`]): the
//! local machine for `local`, the server over SSH otherwise.
//!
//! # Backup
//!
//! 1. Database authentication check (bounded retry with operator prompt)
//! 2. Dump database
//! 3. Archive uploads
//! 4. Upload both artifacts
//! 5. Remove local artifacts (warning on failure)
//! 6. Purge snapshots beyond the retention count (warning on failure)
//!
//! A failed dump or archive means nothing is uploaded; a failed upload
//! means retention does not run.
//!
//! # Restore
//!
//! Confirmation first, then the snapshot listing is checked for both
//! artifacts before anything is downloaded or overwritten.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};

use crate::database::{authenticate_with_retry, dump_command, import_command};
use crate::error::LifecycleError;
use crate::exec::{quote, run_checked, CommandRunner, Target};
use crate::models::{
    parse_snapshot_timestamp, snapshot_namespace, DatabaseCredentials, EnvironmentConfig, Snapshot,
};
use crate::prompt::{require_confirmation, Confirmer, CredentialPrompter};

#[derive(Debug, Clone, Copy)]
pub struct BackupOptions {
    /// Number of most recent snapshots to keep.
    pub retention: usize,
    pub auth_attempts: u32,
}

#[derive(Debug)]
pub struct BackupReport {
    pub snapshot: Snapshot,
    pub remote_dir: String,
    pub purged: Vec<String>,
}

#[derive(Debug)]
pub struct RestoreReport {
    pub snapshot: Snapshot,
}

/// Everything needed to run commands for one environment.
pub struct BackupContext<'a> {
    pub runner: &'a dyn CommandRunner,
    pub env: &'a EnvironmentConfig,
    pub prompter: &'a dyn CredentialPrompter,
    target: Target,
}

impl<'a> BackupContext<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        env: &'a EnvironmentConfig,
        prompter: &'a dyn CredentialPrompter,
    ) -> Self {
        Self {
            runner,
            env,
            prompter,
            target: Target::for_environment(env),
        }
    }

    fn namespace(&self) -> String {
        snapshot_namespace(&self.env.object_store_remote, &self.env.site, self.env.environment)
    }

    fn dump_dir(&self) -> String {
        self.env.local_db_dump_path.to_string_lossy().to_string()
    }

    /// Local paths of the dump and the uploads archive for `snapshot`.
    fn local_artifacts(&self, snapshot: &Snapshot) -> (String, String) {
        let dir = &self.env.local_db_dump_path;
        (
            snapshot.local_dump(dir).to_string_lossy().to_string(),
            snapshot.local_archive(dir).to_string_lossy().to_string(),
        )
    }

    async fn run(&self, step: &str, script: &str) -> Result<String> {
        let spec = self.target.shell(script);
        Ok(run_checked(self.runner, step, &spec).await?.stdout)
    }

    /// Working credentials, possibly corrected by the operator.
    async fn authenticate(&self, attempts: u32) -> Result<DatabaseCredentials> {
        let mut credentials = self.env.credentials();
        authenticate_with_retry(
            self.runner,
            &self.target,
            &mut credentials,
            self.prompter,
            attempts,
        )
        .await?;
        Ok(credentials)
    }

    /// Best-effort removal of a partially uploaded snapshot directory.
    async fn discard_remote(&self, remote_dir: &str) {
        let script = format!("rclone purge {}", quote(remote_dir));
        match self.runner.run(&self.target.shell(&script)).await {
            Ok(out) if out.success() => {
                tracing::info!(%remote_dir, "removed incomplete snapshot");
            }
            Ok(out) => tracing::warn!(
                %remote_dir,
                output = %out.combined(),
                "could not remove incomplete snapshot"
            ),
            Err(e) => tracing::warn!(%remote_dir, error = %e, "could not remove incomplete snapshot"),
        }
    }

    async fn remove_local(&self, paths: &[String]) {
        let script = format!(
            "rm -f {}",
            paths.iter().map(|p| quote(p)).collect::<Vec<_>>().join(" ")
        );
        match self.runner.run(&self.target.shell(&script)).await {
            Ok(out) if out.success() => {}
            Ok(out) => tracing::warn!(output = %out.combined(), "could not remove local artifacts"),
            Err(e) => tracing::warn!(error = %e, "could not remove local artifacts"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Backup
// ═══════════════════════════════════════════════════════════════════════

/// Take a snapshot stamped `now` and enforce retention.
pub async fn backup(
    ctx: &BackupContext<'_>,
    options: BackupOptions,
    now: DateTime<Utc>,
) -> Result<BackupReport> {
    let env = ctx.env;
    let snapshot = Snapshot::new(&env.site, env.environment, now);
    let remote_dir = snapshot.remote_dir(&env.object_store_remote);
    let (dump, archive) = ctx.local_artifacts(&snapshot);
    tracing::info!(site = %env.site, env = %env.environment, ts = %snapshot.timestamp, target = %ctx.target, "backup");

    // Step 1: Credentials
    let credentials = ctx.authenticate(options.auth_attempts).await?;

    // Step 2: Database dump
    let spec = dump_command(&ctx.target, &credentials, &dump);
    run_checked(ctx.runner, "database dump", &spec).await?;

    // Step 3: Uploads archive
    let (parent, base) = split_uploads_path(&env.local_uploads_path.to_string_lossy())?;
    ctx.run(
        "uploads archive",
        &format!(
            "tar -czf {} -C {} {}",
            quote(&archive),
            quote(&parent),
            quote(&base)
        ),
    )
    .await?;

    // Step 4: Upload both artifacts
    ctx.run(
        "upload database dump",
        &format!(
            "rclone copyto {} {}",
            quote(&dump),
            quote(&format!("{}/{}", remote_dir, snapshot.dump_name()))
        ),
    )
    .await?;
    let archive_upload = ctx
        .run(
            "upload uploads archive",
            &format!(
                "rclone copyto {} {}",
                quote(&archive),
                quote(&format!("{}/{}", remote_dir, snapshot.archive_name()))
            ),
        )
        .await;
    if let Err(e) = archive_upload {
        // A lone dump must not count as a snapshot.
        ctx.discard_remote(&remote_dir).await;
        return Err(e);
    }

    // Step 5: Local cleanup
    ctx.remove_local(&[dump, archive]).await;

    // Step 6: Retention
    let purged = enforce_retention(ctx, options.retention).await;

    Ok(BackupReport {
        snapshot,
        remote_dir,
        purged,
    })
}

/// Snapshot directory names past the `keep` newest, oldest last.
///
/// Entries that are not snapshot timestamps are ignored, never purged.
pub fn select_expired(names: &[String], keep: usize) -> Vec<String> {
    let mut timestamps: Vec<String> = names
        .iter()
        .map(|n| n.trim().trim_end_matches('/').to_string())
        .filter(|n| parse_snapshot_timestamp(n).is_some())
        .collect();
    timestamps.sort_unstable_by(|a, b| b.cmp(a));
    timestamps.dedup();
    timestamps.into_iter().skip(keep).collect()
}

async fn enforce_retention(ctx: &BackupContext<'_>, keep: usize) -> Vec<String> {
    let names = match list_snapshots(ctx).await {
        Ok(names) => names,
        Err(e) => {
            tracing::warn!(error = %format!("{:#}", e), "could not list snapshots; retention skipped");
            return Vec::new();
        }
    };

    let namespace = ctx.namespace();
    let mut purged = Vec::new();
    for ts in select_expired(&names, keep) {
        let script = format!("rclone purge {}", quote(&format!("{}/{}", namespace, ts)));
        match ctx.run("purge snapshot", &script).await {
            Ok(_) => {
                tracing::info!(snapshot = %ts, "purged expired snapshot");
                purged.push(ts);
            }
            Err(e) => tracing::warn!(snapshot = %ts, error = %e, "could not purge snapshot"),
        }
    }
    purged
}

/// Snapshot timestamps for the environment, newest first.
pub async fn list_snapshots(ctx: &BackupContext<'_>) -> Result<Vec<String>> {
    let stdout = ctx
        .run(
            "list snapshots",
            &format!("rclone lsf --dirs-only {}/", quote(&ctx.namespace())),
        )
        .await?;
    let names: Vec<String> = stdout.lines().map(str::to_string).collect();
    Ok(select_expired(&names, 0))
}

fn split_uploads_path(path: &str) -> Result<(String, String)> {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(i) if i + 1 < trimmed.len() => {
            let parent = if i == 0 { "/" } else { &trimmed[..i] };
            Ok((parent.to_string(), trimmed[i + 1..].to_string()))
        }
        _ => bail!(LifecycleError::Configuration(format!(
            "local_uploads_path '{}' must be an absolute directory path",
            path
        ))),
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Restore
// ═══════════════════════════════════════════════════════════════════════

/// Restore the snapshot at `timestamp`, or the newest one when `None`.
pub async fn restore(
    ctx: &BackupContext<'_>,
    confirmer: &dyn Confirmer,
    timestamp: Option<&str>,
    auth_attempts: u32,
) -> Result<RestoreReport> {
    let env = ctx.env;
    let timestamp = match timestamp {
        Some(ts) => ts.to_string(),
        None => list_snapshots(ctx).await?.into_iter().next().ok_or_else(|| {
            LifecycleError::Configuration(format!(
                "no snapshots found under {}",
                ctx.namespace()
            ))
        })?,
    };
    let snapshot = Snapshot::from_timestamp(&env.site, env.environment, &timestamp)?;
    let remote_dir = snapshot.remote_dir(&env.object_store_remote);

    require_confirmation(
        confirmer,
        "restore",
        &format!(
            "Restore {}/{} from snapshot {}? This overwrites the database and uploads on {}.",
            env.site, env.environment, snapshot.timestamp, ctx.target
        ),
    )?;

    // Both artifacts must exist before anything is touched.
    let listing = ctx
        .run("list snapshot", &format!("rclone lsf {}/", quote(&remote_dir)))
        .await?;
    let present: Vec<&str> = listing.lines().map(str::trim).collect();
    let missing: Vec<String> = [snapshot.dump_name(), snapshot.archive_name()]
        .into_iter()
        .filter(|name| !present.contains(&name.as_str()))
        .collect();
    if !missing.is_empty() {
        return Err(LifecycleError::MissingArtifact {
            timestamp: snapshot.timestamp.clone(),
            missing,
        }
        .into());
    }

    let (dump, archive) = ctx.local_artifacts(&snapshot);

    ctx.run(
        "download snapshot",
        &format!(
            "mkdir -p {dir} && rclone copyto {rd} {dump} && rclone copyto {ra} {archive}",
            dir = quote(&ctx.dump_dir()),
            rd = quote(&format!("{}/{}", remote_dir, snapshot.dump_name())),
            dump = quote(&dump),
            ra = quote(&format!("{}/{}", remote_dir, snapshot.archive_name())),
            archive = quote(&archive),
        ),
    )
    .await?;

    let credentials = ctx.authenticate(auth_attempts).await?;

    let spec = import_command(&ctx.target, &credentials, &dump);
    run_checked(ctx.runner, "database import", &spec).await?;

    let (parent, _) = split_uploads_path(&env.local_uploads_path.to_string_lossy())?;
    ctx.run(
        "extract uploads",
        &format!(
            "mkdir -p {parent} && tar -xzf {archive} -C {parent}",
            parent = quote(&parent),
            archive = quote(&archive)
        ),
    )
    .await?;

    ctx.remove_local(&[dump, archive]).await;

    Ok(RestoreReport { snapshot })
}
