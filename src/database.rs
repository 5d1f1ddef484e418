//! MySQL access on the machine that holds an environment.
//!
//! Scripts are built as shell strings and run through [`Target::shell`], so
//! the same code path serves the local environment and remote ones over
//! SSH. The password travels in `MYSQL_PWD` and is registered as a secret
//! on every command so it never reaches logs.

use anyhow::Result;

use crate::error::LifecycleError;
use crate::exec::{quote, CommandRunner, CommandSpec, Target};
use crate::models::DatabaseCredentials;
use crate::prompt::CredentialPrompter;

fn client_prefix(credentials: &DatabaseCredentials) -> String {
    format!("MYSQL_PWD={}", quote(&credentials.db_pass))
}

fn connection_flags(credentials: &DatabaseCredentials) -> String {
    format!(
        "-h {} -u {}",
        quote(&credentials.db_host),
        quote(&credentials.db_user)
    )
}

/// Register the password in every form it can take on the command line:
/// raw, shell-quoted, and re-escaped by the SSH wrapper. Longest first.
fn with_secret(spec: CommandSpec, credentials: &DatabaseCredentials) -> CommandSpec {
    let ssh_escape = |s: &str| s.replace('\'', r"'\''");
    let quoted = quote(&credentials.db_pass);
    spec.secret(ssh_escape(&quoted))
        .secret(quoted)
        .secret(ssh_escape(&credentials.db_pass))
        .secret(credentials.db_pass.clone())
}

/// `SELECT 1` against the site database.
pub fn auth_check_command(target: &Target, credentials: &DatabaseCredentials) -> CommandSpec {
    let script = format!(
        "{} mysql {} -e 'SELECT 1' {}",
        client_prefix(credentials),
        connection_flags(credentials),
        quote(&credentials.db_name)
    );
    with_secret(target.shell(&script), credentials)
}

/// Consistent gzip-compressed dump written to `output`.
pub fn dump_command(target: &Target, credentials: &DatabaseCredentials, output: &str) -> CommandSpec {
    let dir = parent_dir(output);
    let script = format!(
        "set -o pipefail; mkdir -p {dir} && {pwd} mysqldump --single-transaction --quick --no-tablespaces {conn} {db} | gzip > {out}",
        dir = quote(dir),
        pwd = client_prefix(credentials),
        conn = connection_flags(credentials),
        db = quote(&credentials.db_name),
        out = quote(output),
    );
    with_secret(target.shell(&script), credentials)
}

/// Load a gzip-compressed dump into the site database.
pub fn import_command(target: &Target, credentials: &DatabaseCredentials, input: &str) -> CommandSpec {
    let script = format!(
        "set -o pipefail; gunzip -c {input} | {pwd} mysql {conn} {db}",
        input = quote(input),
        pwd = client_prefix(credentials),
        conn = connection_flags(credentials),
        db = quote(&credentials.db_name),
    );
    with_secret(target.shell(&script), credentials)
}

fn parent_dir(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) => "/",
        Some(i) => &path[..i],
        None => ".",
    }
}

/// Check the credentials, asking the operator for a corrected password
/// after each rejection. `credentials.db_pass` holds the working password
/// on success.
///
/// Gives up with [`LifecycleError::AuthenticationFailed`] after `attempts`
/// rejections. Any other failure returns
/// [`LifecycleError::ExternalTool`] at once without prompting.
pub async fn authenticate_with_retry(
    runner: &dyn CommandRunner,
    target: &Target,
    credentials: &mut DatabaseCredentials,
    prompter: &dyn CredentialPrompter,
    attempts: u32,
) -> Result<()> {
    let mut last_output = String::new();

    for attempt in 1..=attempts {
        let spec = auth_check_command(target, credentials);
        let output = runner.run(&spec).await?;
        if output.success() {
            tracing::info!(attempt, user = %credentials.db_user, "database authentication ok");
            return Ok(());
        }

        last_output = spec.redact(&output.combined());
        if !is_access_denied(&last_output) {
            // Unreachable host, unknown database and the like: a new
            // password would not help.
            return Err(LifecycleError::external(
                "database authentication",
                output.status,
                last_output,
            )
            .into());
        }
        tracing::warn!(attempt, attempts, user = %credentials.db_user, "database authentication failed");
        if attempt < attempts {
            credentials.db_pass = prompter.password(&format!(
                "Password for database user '{}' on {}:",
                credentials.db_user, target
            ))?;
        }
    }

    Err(LifecycleError::AuthenticationFailed {
        attempts,
        output: last_output,
    }
    .into())
}

/// MySQL rejected the user or password (`ERROR 1045`).
fn is_access_denied(output: &str) -> bool {
    output.contains("ERROR 1045") || output.contains("Access denied for user")
}
