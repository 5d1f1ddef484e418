//! Database copy between the local environment and a remote one.
//!
//! `pull` brings a remote database down to local; `push` sends the local
//! database up and asks for confirmation first because it overwrites a
//! live site. Both export with WP-CLI, move the gzip dump with `scp`,
//! import on the other side and rewrite URLs with `wp search-replace`.

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::error::LifecycleError;
use crate::exec::{quote, run_checked, CommandRunner, CommandSpec, Target};
use crate::models::{EnvironmentConfig, Snapshot};
use crate::prompt::{require_confirmation, Confirmer};

#[derive(Debug)]
pub struct SyncReport {
    pub from_url: String,
    pub to_url: String,
    pub dump_name: String,
}

/// Directory WP-CLI runs in for `env`.
fn wp_root(env: &EnvironmentConfig) -> String {
    if env.environment.is_remote() {
        env.remote_path.trim_end_matches('/').to_string()
    } else {
        env.site_root.to_string_lossy().trim_end_matches('/').to_string()
    }
}

fn dump_path(env: &EnvironmentConfig, name: &str) -> String {
    format!(
        "{}/{}",
        env.local_db_dump_path.to_string_lossy().trim_end_matches('/'),
        name
    )
}

fn scp_command(from: &str, to: &str) -> CommandSpec {
    CommandSpec::new("scp").args(["-q", "-o", "BatchMode=yes", from, to])
}

fn remote_ref(env: &EnvironmentConfig, path: &str) -> String {
    format!("{}@{}:{}", env.ssh_user, env.ssh_host, path)
}

/// Copy the remote database over the local one.
pub async fn pull_database(
    runner: &dyn CommandRunner,
    local: &EnvironmentConfig,
    remote: &EnvironmentConfig,
    now: DateTime<Utc>,
) -> Result<SyncReport> {
    transfer(runner, remote, local, now).await
}

/// Copy the local database over the remote one, after confirmation.
pub async fn push_database(
    runner: &dyn CommandRunner,
    local: &EnvironmentConfig,
    remote: &EnvironmentConfig,
    confirmer: &dyn Confirmer,
    now: DateTime<Utc>,
) -> Result<SyncReport> {
    require_confirmation(
        confirmer,
        "database push",
        &format!(
            "Overwrite the {} database of {} ({}) with your local copy?",
            remote.environment,
            remote.site,
            remote.url()
        ),
    )?;
    transfer(runner, local, remote, now).await
}

async fn transfer(
    runner: &dyn CommandRunner,
    source: &EnvironmentConfig,
    dest: &EnvironmentConfig,
    now: DateTime<Utc>,
) -> Result<SyncReport> {
    if source.environment.is_remote() == dest.environment.is_remote() {
        return Err(LifecycleError::Configuration(format!(
            "database sync needs one local and one remote environment, got {} and {}",
            source.environment, dest.environment
        ))
        .into());
    }

    let source_target = Target::for_environment(source);
    let dest_target = Target::for_environment(dest);
    let name = Snapshot::new(&source.site, source.environment, now).dump_name();
    let source_file = dump_path(source, &name);
    let dest_file = dump_path(dest, &name);
    let (from_url, to_url) = (source.url(), dest.url());
    tracing::info!(from = %from_url, to = %to_url, "database sync");

    // Step 1: Export on the source
    let export = format!(
        "set -o pipefail; mkdir -p {dir} && cd {root} && wp db export - | gzip > {file}",
        dir = quote(&source.local_db_dump_path.to_string_lossy()),
        root = quote(&wp_root(source)),
        file = quote(&source_file),
    );
    run_checked(runner, "database export", &source_target.shell(&export)).await?;

    // Step 2: Move the dump
    let prepare = format!(
        "mkdir -p {}",
        quote(&dest.local_db_dump_path.to_string_lossy())
    );
    run_checked(runner, "prepare destination", &dest_target.shell(&prepare)).await?;
    let copy = if source.environment.is_remote() {
        scp_command(&remote_ref(source, &source_file), &dest_file)
    } else {
        scp_command(&source_file, &remote_ref(dest, &dest_file))
    };
    run_checked(runner, "transfer dump", &copy).await?;

    // Step 3: Import and rewrite URLs on the destination
    let import = format!(
        "set -o pipefail; cd {root} && gunzip -c {file} | wp db import -",
        root = quote(&wp_root(dest)),
        file = quote(&dest_file),
    );
    run_checked(runner, "database import", &dest_target.shell(&import)).await?;

    let replace = format!(
        "cd {root} && wp search-replace {from} {to} --all-tables --skip-columns=guid",
        root = quote(&wp_root(dest)),
        from = quote(&from_url),
        to = quote(&to_url),
    );
    run_checked(runner, "search-replace", &dest_target.shell(&replace)).await?;

    // Step 4: Cleanup
    for (target, file) in [(&source_target, &source_file), (&dest_target, &dest_file)] {
        let spec = target.shell(&format!("rm -f {}", quote(file)));
        match runner.run(&spec).await {
            Ok(out) if out.success() => {}
            _ => tracing::warn!(%target, file = %file, "could not remove temporary dump"),
        }
    }

    Ok(SyncReport {
        from_url,
        to_url,
        dump_name: name,
    })
}
