//! # wpfleet CLI
//!
//! The `wpfleet` binary drives every lifecycle operation for the sites in
//! the site store.
//!
//! ## Usage
//!
//! ```bash
//! wpfleet --config ./config/wpfleet.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `wpfleet site init <name>` | Scaffold a site from the template and register it |
//! | `wpfleet site list` | List registered sites |
//! | `wpfleet site show <site> <env>` | Print an environment record (password hidden) |
//! | `wpfleet site set <site> <env> key=value...` | Update environment fields |
//! | `wpfleet provision <site> <env>` | DNS, panel website and database, vhost, restart |
//! | `wpfleet dns wait <site> <env>` | Block until the domain resolves to the server |
//! | `wpfleet deploy <site> <env>` | Build and rsync code, fix permissions |
//! | `wpfleet backup run <site> <env>` | Snapshot database and uploads to object storage |
//! | `wpfleet backup list <site> <env>` | List snapshots, newest first |
//! | `wpfleet restore <site> <env>` | Restore a snapshot |
//! | `wpfleet db pull <site> <env>` | Copy a remote database to local |
//! | `wpfleet db push <site> <env>` | Copy the local database to a remote |
//!
//! Reports go to stdout; logs go to stderr.

use anyhow::{bail, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use wpfleet::backup::{self, BackupContext, BackupOptions};
use wpfleet::config::{self, Config};
use wpfleet::deploy::{self, DeployOptions};
use wpfleet::dns;
use wpfleet::dns_verify::{self, DigResolver, RecordType};
use wpfleet::exec::SystemRunner;
use wpfleet::logging;
use wpfleet::models::{Environment, EnvironmentConfig, FieldSet, StepOutcome, ENVIRONMENT_FIELDS};
use wpfleet::panel::CyberPanel;
use wpfleet::prompt::{AssumeYes, Confirmer, TerminalPrompt};
use wpfleet::provision::{ProvisionRequest, Provisioner};
use wpfleet::site_init::{self, InitRequest};
use wpfleet::store::SiteStore;
use wpfleet::sync;
use wpfleet::vhost::OpenLiteSpeed;

/// wpfleet: lifecycle automation for self-hosted WordPress (Bedrock) sites.
///
/// All commands accept a `--config` flag pointing to the fleet TOML file.
/// See `config/wpfleet.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "wpfleet",
    about = "Provision, deploy, back up and restore self-hosted WordPress (Bedrock) sites",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/wpfleet.toml")]
    config: PathBuf,

    /// Debug-level logging (RUST_LOG overrides).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create and inspect sites.
    Site {
        #[command(subcommand)]
        action: SiteAction,
    },

    /// Provision server resources for a remote environment.
    ///
    /// Runs DNS record, panel website, panel database, vhost and restart in
    /// order. Safe to re-run: existing resources are reported, not recreated.
    Provision {
        site: String,
        env: Environment,
        /// Address for the A record. Defaults to the environment's ssh_host.
        #[arg(long)]
        ip: Option<String>,
    },

    /// DNS propagation.
    Dns {
        #[command(subcommand)]
        action: DnsAction,
    },

    /// Deploy the site's code to a remote environment.
    Deploy {
        site: String,
        env: Environment,
        /// Show what would be transferred without changing anything.
        #[arg(long)]
        dry_run: bool,
    },

    /// Database and uploads snapshots.
    Backup {
        #[command(subcommand)]
        action: BackupAction,
    },

    /// Restore a snapshot over the environment's database and uploads.
    Restore {
        site: String,
        env: Environment,
        /// Snapshot timestamp (YYYYMMDD-HHMMSS). Defaults to the newest.
        #[arg(long)]
        timestamp: Option<String>,
        /// Skip the confirmation prompt.
        #[arg(long)]
        yes: bool,
    },

    /// Copy databases between local and a remote environment.
    Db {
        #[command(subcommand)]
        action: DbAction,
    },
}

#[derive(Subcommand)]
enum SiteAction {
    /// Scaffold a new site from the template directory.
    Init {
        name: String,
        /// Local development port.
        #[arg(long)]
        port: u16,
        /// Production domain.
        #[arg(long)]
        domain: String,
        /// Staging domain. Defaults to `staging.<domain>`.
        #[arg(long)]
        staging_domain: Option<String>,
        #[arg(long, default_value = "localhost")]
        db_host: String,
        /// Database password. Generated when omitted.
        #[arg(long)]
        db_password: Option<String>,
    },
    /// List registered sites.
    List,
    /// Show one environment record.
    Show { site: String, env: Environment },
    /// Set environment fields (`key=value`).
    Set {
        site: String,
        env: Environment,
        #[arg(required = true)]
        fields: Vec<String>,
    },
}

#[derive(Subcommand)]
enum DnsAction {
    /// Wait until the environment's domain resolves to the expected value.
    Wait {
        site: String,
        env: Environment,
        /// Expected answer. Defaults to the environment's ssh_host.
        #[arg(long)]
        expect: Option<String>,
        #[arg(long = "type", default_value = "A")]
        record_type: RecordType,
        /// Override verify.timeout_secs.
        #[arg(long)]
        timeout: Option<u64>,
    },
}

#[derive(Subcommand)]
enum BackupAction {
    /// Take a snapshot and apply retention.
    Run {
        site: String,
        env: Environment,
        /// Snapshots to keep. Overrides backup.retention.
        #[arg(long)]
        retention: Option<usize>,
    },
    /// List snapshots, newest first.
    List { site: String, env: Environment },
}

#[derive(Subcommand)]
enum DbAction {
    /// Replace the local database with the remote one.
    Pull { site: String, env: Environment },
    /// Replace the remote database with the local one.
    Push {
        site: String,
        env: Environment,
        /// Skip the confirmation prompt.
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Site { action } => match action {
            SiteAction::Init {
                name,
                port,
                domain,
                staging_domain,
                db_host,
                db_password,
            } => {
                let request = InitRequest {
                    name,
                    port,
                    domain,
                    staging_domain,
                    db_host,
                    db_password,
                };
                run_site_init(&cfg, &request).await?;
            }
            SiteAction::List => run_site_list(&cfg)?,
            SiteAction::Show { site, env } => run_site_show(&cfg, &site, env)?,
            SiteAction::Set { site, env, fields } => run_site_set(&cfg, &site, env, &fields)?,
        },
        Commands::Provision { site, env, ip } => {
            run_provision(&cfg, &site, env, ip.as_deref()).await?;
        }
        Commands::Dns { action } => match action {
            DnsAction::Wait {
                site,
                env,
                expect,
                record_type,
                timeout,
            } => {
                run_dns_wait(&cfg, &site, env, expect, record_type, timeout).await?;
            }
        },
        Commands::Deploy { site, env, dry_run } => {
            run_deploy(&cfg, &site, env, dry_run).await?;
        }
        Commands::Backup { action } => match action {
            BackupAction::Run {
                site,
                env,
                retention,
            } => {
                run_backup(&cfg, &site, env, retention).await?;
            }
            BackupAction::List { site, env } => run_backup_list(&cfg, &site, env).await?,
        },
        Commands::Restore {
            site,
            env,
            timestamp,
            yes,
        } => {
            run_restore(&cfg, &site, env, timestamp.as_deref(), yes).await?;
        }
        Commands::Db { action } => match action {
            DbAction::Pull { site, env } => run_db_sync(&cfg, &site, env, false, false).await?,
            DbAction::Push { site, env, yes } => run_db_sync(&cfg, &site, env, true, yes).await?,
        },
    }

    Ok(())
}

fn confirmer(yes: bool) -> Box<dyn Confirmer> {
    if yes {
        Box::new(AssumeYes)
    } else {
        Box::new(TerminalPrompt)
    }
}

fn load_env(
    cfg: &Config,
    site: &str,
    env: Environment,
    needs: FieldSet,
) -> Result<(SiteStore, EnvironmentConfig)> {
    let store = SiteStore::load(&cfg.paths.sites_file)?;
    let environment = EnvironmentConfig::from_store(&store, site, env, needs)?;
    Ok((store, environment))
}

fn require_remote(env: Environment, command: &str) -> Result<()> {
    if !env.is_remote() {
        bail!("{} targets staging or production, not {}", command, env);
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════
// Sites
// ═══════════════════════════════════════════════════════════════════════

async fn run_site_init(cfg: &Config, request: &InitRequest) -> Result<()> {
    let mut store = SiteStore::open(&cfg.paths.sites_file)?;
    let report = site_init::init_site(cfg, &mut store, request).await?;

    println!("Site:        {}", request.name);
    println!("Root:        {}", report.site_root.display());
    println!(
        "Files:       {} copied, {} rendered",
        report.files_copied, report.files_rendered
    );
    println!("Salts:       {:?}", report.salt_source);
    println!("DB name:     {}", report.credentials.db_name);
    println!("DB user:     {}", report.credentials.db_user);
    if report.unresolved.is_empty() {
        println!("Placeholders: all resolved");
    } else {
        println!("Unresolved placeholders:");
        for u in &report.unresolved {
            println!("  {}:{} {}", u.file.display(), u.line, u.marker);
        }
    }
    println!("ok");
    Ok(())
}

fn run_site_list(cfg: &Config) -> Result<()> {
    let store = SiteStore::open(&cfg.paths.sites_file)?;
    let sites = store.sites();
    if sites.is_empty() {
        println!("No sites registered.");
        return Ok(());
    }
    println!("{:<24} {:<28} ROOT", "SITE", "ENVIRONMENTS");
    for site in sites {
        let root = store
            .root(site)
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<24} {:<28} {}",
            site,
            store.environments(site).join(","),
            root
        );
    }
    Ok(())
}

fn run_site_show(cfg: &Config, site: &str, env: Environment) -> Result<()> {
    let store = SiteStore::load(&cfg.paths.sites_file)?;
    if !store.contains_site(site) {
        bail!("site '{}' is not registered", site);
    }
    println!("{}/{}", site, env);
    for key in ENVIRONMENT_FIELDS {
        let value = match store.get(site, env, key) {
            Some(_) if key == "db_pass" => "<set>".to_string(),
            Some(v) => v.to_string(),
            None => "<missing>".to_string(),
        };
        println!("  {:<26} {}", key, value);
    }
    Ok(())
}

fn run_site_set(cfg: &Config, site: &str, env: Environment, fields: &[String]) -> Result<()> {
    let mut store = SiteStore::load(&cfg.paths.sites_file)?;
    if !store.contains_site(site) {
        bail!("site '{}' is not registered", site);
    }

    let mut parsed = Vec::with_capacity(fields.len());
    for field in fields {
        let Some((key, value)) = field.split_once('=') else {
            bail!("expected key=value, got '{}'", field);
        };
        if !ENVIRONMENT_FIELDS.contains(&key) {
            bail!(
                "unknown field '{}'. Known fields: {}",
                key,
                ENVIRONMENT_FIELDS.join(", ")
            );
        }
        parsed.push((key.to_string(), value.to_string()));
    }

    let count = parsed.len();
    store.merge(site, env, parsed);
    store.save()?;
    println!("Updated {} field(s) for {}/{}", count, site, env);
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════
// Provisioning and DNS
// ═══════════════════════════════════════════════════════════════════════

async fn run_provision(cfg: &Config, site: &str, env: Environment, ip: Option<&str>) -> Result<()> {
    require_remote(env, "provision")?;
    let (mut store, environment) = load_env(cfg, site, env, FieldSet::Core)?;

    let runner = SystemRunner;
    let dns = dns::create_provider(&cfg.dns)?;
    let panel = CyberPanel::new(&runner, &cfg.panel, &environment.ssh_host);
    let web = OpenLiteSpeed::new(&runner, &cfg.panel, &environment.ssh_host);
    let request =
        ProvisionRequest::for_environment(&environment, &cfg.panel, ip, cfg.secrets.password_length);

    let report = Provisioner::new(dns.as_ref(), &panel, &web)
        .run(&request)
        .await;

    for step in &report.steps {
        println!("{:<16} {}", step.step, step.outcome.label());
    }

    if let Some(credentials) = &report.credentials {
        store.merge(
            site,
            env,
            [
                ("db_name", credentials.db_name.clone()),
                ("db_user", credentials.db_user.clone()),
                ("db_pass", credentials.db_pass.clone()),
                ("db_host", credentials.db_host.clone()),
            ],
        );
        store.save()?;
        let secret_file = environment.site_root.join(env.secret_file_name());
        if secret_file.exists() {
            site_init::update_secret_file(&secret_file, credentials)?;
        }
        println!("Database credentials saved for {}/{}", site, env);
    }

    if let Some(compensation) = &report.compensation {
        match &compensation.error {
            None => println!("Rolled back website {}", compensation.domain),
            Some(e) => println!("Rollback of website {} failed: {}", compensation.domain, e),
        }
    }

    if let Some(failed) = report.failed_step() {
        let reason = match &failed.outcome {
            StepOutcome::Failed(r) => r.as_str(),
            _ => "",
        };
        bail!("provisioning failed at step '{}':\n{}", failed.step, reason);
    }
    println!("ok");
    Ok(())
}

async fn run_dns_wait(
    cfg: &Config,
    site: &str,
    env: Environment,
    expect: Option<String>,
    record_type: RecordType,
    timeout: Option<u64>,
) -> Result<()> {
    let (_, environment) = load_env(cfg, site, env, FieldSet::Core)?;
    let expected = expect.unwrap_or_else(|| environment.ssh_host.clone());
    let domain = environment
        .domain
        .split(':')
        .next()
        .unwrap_or(&environment.domain)
        .to_string();

    let mut verify = cfg.verify.clone();
    if let Some(t) = timeout {
        verify.timeout_secs = t;
    }

    let runner = SystemRunner;
    let resolver = DigResolver::new(&runner, verify.resolver.clone());
    let answers =
        dns_verify::wait_for_record(&resolver, &domain, &expected, record_type, &verify.policy())
            .await?;
    println!("{} {} -> {}", domain, record_type, answers.join(", "));
    println!("ok");
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════
// Deploy, backup, restore, database sync
// ═══════════════════════════════════════════════════════════════════════

async fn run_deploy(cfg: &Config, site: &str, env: Environment, dry_run: bool) -> Result<()> {
    require_remote(env, "deploy")?;
    let (_, environment) = load_env(cfg, site, env, FieldSet::Core)?;
    let options = DeployOptions::from_config(&cfg.deploy, dry_run);

    let report = deploy::deploy(&SystemRunner, &environment, &options).await?;
    if report.dry_run {
        print!("{}", report.changes);
        println!("dry run: nothing changed on {}", environment.ssh_host);
    } else {
        for step in &report.steps {
            println!("{:<20} done", step);
        }
    }
    println!("ok");
    Ok(())
}

async fn run_backup(
    cfg: &Config,
    site: &str,
    env: Environment,
    retention: Option<usize>,
) -> Result<()> {
    let (_, environment) = load_env(cfg, site, env, FieldSet::ObjectStore)?;
    let options = BackupOptions {
        retention: retention.unwrap_or(cfg.backup.retention),
        auth_attempts: cfg.backup.auth_attempts,
    };
    if options.retention == 0 {
        bail!("--retention must be >= 1");
    }

    let runner = SystemRunner;
    let ctx = BackupContext::new(&runner, &environment, &TerminalPrompt);
    let report = backup::backup(&ctx, options, Utc::now()).await?;

    println!("Snapshot:  {}", report.snapshot.timestamp);
    println!("Location:  {}", report.remote_dir);
    if !report.purged.is_empty() {
        println!("Purged:    {}", report.purged.join(", "));
    }
    println!("ok");
    Ok(())
}

async fn run_backup_list(cfg: &Config, site: &str, env: Environment) -> Result<()> {
    let (_, environment) = load_env(cfg, site, env, FieldSet::ObjectStore)?;
    let runner = SystemRunner;
    let ctx = BackupContext::new(&runner, &environment, &TerminalPrompt);
    let snapshots = backup::list_snapshots(&ctx).await?;
    if snapshots.is_empty() {
        println!("No snapshots for {}/{}.", site, env);
    }
    for ts in snapshots {
        println!("{}", ts);
    }
    Ok(())
}

async fn run_restore(
    cfg: &Config,
    site: &str,
    env: Environment,
    timestamp: Option<&str>,
    yes: bool,
) -> Result<()> {
    let (_, environment) = load_env(cfg, site, env, FieldSet::ObjectStore)?;
    let runner = SystemRunner;
    let ctx = BackupContext::new(&runner, &environment, &TerminalPrompt);
    let confirm = confirmer(yes);

    let report =
        backup::restore(&ctx, confirm.as_ref(), timestamp, cfg.backup.auth_attempts).await?;
    println!("Restored {}/{} from {}", site, env, report.snapshot.timestamp);
    println!("ok");
    Ok(())
}

async fn run_db_sync(
    cfg: &Config,
    site: &str,
    env: Environment,
    push: bool,
    yes: bool,
) -> Result<()> {
    require_remote(env, if push { "db push" } else { "db pull" })?;
    let (store, remote) = load_env(cfg, site, env, FieldSet::Core)?;
    let local = EnvironmentConfig::from_store(&store, site, Environment::Local, FieldSet::Core)?;
    let runner = SystemRunner;

    let report = if push {
        let confirm = confirmer(yes);
        sync::push_database(&runner, &local, &remote, confirm.as_ref(), Utc::now()).await?
    } else {
        sync::pull_database(&runner, &local, &remote, Utc::now()).await?
    };
    println!("{} -> {}", report.from_url, report.to_url);
    println!("ok");
    Ok(())
}
