//! Provisioning pipeline.
//!
//! Brings a remote environment from "nothing" to "serving Bedrock" in five
//! ordered steps, each of which is safe to re-run:
//!
//! | # | Step | Seam |
//! |---|------|------|
//! | 1 | DNS A record | [`DnsProvider`] |
//! | 2 | Panel website | [`HostingPanel::create_website`] |
//! | 3 | Panel database + user | [`HostingPanel::create_database`] |
//! | 4 | Virtual host | [`WebServer`] + [`rewrite_vhost`] |
//! | 5 | Web server restart | [`WebServer::restart`] |
//!
//! The pipeline halts on the first [`StepOutcome::Failed`]. When the
//! database step fails after the website was created in the same run, the
//! website is deleted again so the next attempt starts from a clean panel.
//! DNS is never rolled back.
//!
//! The restart runs when an earlier step changed something, or when a
//! previous run wrote the vhost but never restarted successfully (the web
//! server keeps a pending marker until then). A converged re-run performs
//! no remote mutation.

use anyhow::Result;
use std::fmt;

use crate::config::PanelConfig;
use crate::dns::DnsProvider;
use crate::models::{DatabaseCredentials, EnvironmentConfig, StepOutcome};
use crate::panel::{HostingPanel, WebsiteSpec};
use crate::secrets::generate_password;
use crate::vhost::{bedrock_doc_root, rewrite_vhost, WebServer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionStep {
    Dns,
    Website,
    Database,
    Vhost,
    Restart,
}

impl ProvisionStep {
    pub const ALL: [ProvisionStep; 5] = [
        ProvisionStep::Dns,
        ProvisionStep::Website,
        ProvisionStep::Database,
        ProvisionStep::Vhost,
        ProvisionStep::Restart,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProvisionStep::Dns => "dns record",
            ProvisionStep::Website => "panel website",
            ProvisionStep::Database => "panel database",
            ProvisionStep::Vhost => "vhost",
            ProvisionStep::Restart => "restart",
        }
    }
}

impl fmt::Display for ProvisionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub step: ProvisionStep,
    pub outcome: StepOutcome,
}

/// Result of the compensating website delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compensation {
    pub domain: String,
    /// `None` when the delete succeeded.
    pub error: Option<String>,
}

impl Compensation {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Default)]
pub struct ProvisionReport {
    pub steps: Vec<StepReport>,
    /// Set only when this run created the database; the caller persists it.
    pub credentials: Option<DatabaseCredentials>,
    pub compensation: Option<Compensation>,
}

impl ProvisionReport {
    /// True when every step ran and none failed.
    pub fn success(&self) -> bool {
        self.failed_step().is_none() && self.steps.len() == ProvisionStep::ALL.len()
    }

    pub fn failed_step(&self) -> Option<&StepReport> {
        self.steps.iter().find(|s| !s.outcome.is_success())
    }

    pub fn outcome(&self, step: ProvisionStep) -> Option<&StepOutcome> {
        self.steps
            .iter()
            .find(|s| s.step == step)
            .map(|s| &s.outcome)
    }

    fn changed_anything(&self) -> bool {
        self.steps.iter().any(|s| s.outcome == StepOutcome::Created)
    }

    /// Record `outcome`; returns whether the pipeline may continue.
    fn record(&mut self, step: ProvisionStep, outcome: StepOutcome) -> bool {
        match &outcome {
            StepOutcome::Failed(reason) => {
                tracing::error!(step = step.as_str(), %reason, "provisioning step failed")
            }
            ok => tracing::info!(step = step.as_str(), outcome = ok.label(), "provisioning step"),
        }
        let proceed = outcome.is_success();
        self.steps.push(StepReport { step, outcome });
        proceed
    }
}

/// Everything the pipeline needs to know about the environment.
#[derive(Debug, Clone)]
pub struct ProvisionRequest {
    pub domain: String,
    pub server_ip: String,
    pub remote_path: String,
    pub website: WebsiteSpec,
    pub db_name: String,
    pub db_user: String,
    pub db_host: String,
    pub password_length: usize,
}

impl ProvisionRequest {
    /// Derive a request from a stored environment. `server_ip` defaults to
    /// the environment's SSH host.
    pub fn for_environment(
        env: &EnvironmentConfig,
        panel: &PanelConfig,
        server_ip: Option<&str>,
        password_length: usize,
    ) -> Self {
        let email = panel
            .email
            .clone()
            .unwrap_or_else(|| format!("admin@{}", env.domain));
        Self {
            domain: env.domain.clone(),
            server_ip: server_ip.unwrap_or(&env.ssh_host).to_string(),
            remote_path: env.remote_path.clone(),
            website: WebsiteSpec {
                domain: env.domain.clone(),
                owner: panel.owner.clone(),
                package: panel.package.clone(),
                email,
                php: panel.php.clone(),
            },
            db_name: env.db_name.clone(),
            db_user: env.db_user.clone(),
            db_host: env.db_host.clone(),
            password_length,
        }
    }
}

pub struct Provisioner<'a> {
    dns: &'a dyn DnsProvider,
    panel: &'a dyn HostingPanel,
    web: &'a dyn WebServer,
}

impl<'a> Provisioner<'a> {
    pub fn new(
        dns: &'a dyn DnsProvider,
        panel: &'a dyn HostingPanel,
        web: &'a dyn WebServer,
    ) -> Self {
        Self { dns, panel, web }
    }

    /// Run the pipeline. Step failures are reported, not returned as `Err`.
    pub async fn run(&self, request: &ProvisionRequest) -> ProvisionReport {
        let mut report = ProvisionReport::default();
        tracing::info!(domain = %request.domain, dns = self.dns.name(), "provisioning");

        // Step 1: DNS record
        let dns = settle(
            self.dns
                .create_a_record(&request.domain, &request.server_ip)
                .await,
        );
        if !report.record(ProvisionStep::Dns, dns) {
            return report;
        }

        // Step 2: Panel website
        let website = settle(self.panel.create_website(&request.website).await);
        let website_created = website == StepOutcome::Created;
        if !report.record(ProvisionStep::Website, website) {
            return report;
        }

        // Step 3: Database with a fresh password (compensate on failure)
        let credentials = DatabaseCredentials {
            db_name: request.db_name.clone(),
            db_user: request.db_user.clone(),
            db_pass: generate_password(request.password_length),
            db_host: request.db_host.clone(),
        };
        let database = settle(
            self.panel
                .create_database(&request.domain, &credentials)
                .await,
        );
        if database == StepOutcome::Created {
            report.credentials = Some(credentials);
        }
        if !report.record(ProvisionStep::Database, database) {
            if website_created {
                report.compensation = Some(self.compensate(&request.domain).await);
            }
            return report;
        }

        // Step 4: Virtual host
        let vhost = settle(self.configure_vhost(request).await);
        if !report.record(ProvisionStep::Vhost, vhost) {
            return report;
        }

        // Step 5: Restart when this run changed something or an earlier
        // run wrote the vhost without a successful restart
        let changed = report.changed_anything();
        let restart = settle(self.restart_if_needed(&request.domain, changed).await);
        report.record(ProvisionStep::Restart, restart);

        report
    }

    async fn configure_vhost(&self, request: &ProvisionRequest) -> Result<StepOutcome> {
        let current = self.web.read_vhost(&request.domain).await?;
        let desired = rewrite_vhost(&current, &bedrock_doc_root(&request.remote_path));
        if desired == current {
            return Ok(StepOutcome::AlreadyExists);
        }
        let backup = self.web.backup_vhost(&request.domain).await?;
        tracing::info!(%backup, "previous vhost saved");
        self.web.write_vhost(&request.domain, &desired).await?;
        Ok(StepOutcome::Created)
    }

    async fn restart_if_needed(&self, domain: &str, changed: bool) -> Result<StepOutcome> {
        if !changed && !self.web.restart_pending(domain).await? {
            tracing::info!("nothing changed; skipping web server restart");
            return Ok(StepOutcome::AlreadyExists);
        }
        self.web.restart(domain).await?;
        Ok(StepOutcome::Created)
    }

    async fn compensate(&self, domain: &str) -> Compensation {
        tracing::warn!(domain, "database creation failed; deleting website created in this run");
        match self.panel.delete_website(domain).await {
            Ok(()) => Compensation {
                domain: domain.to_string(),
                error: None,
            },
            Err(e) => {
                tracing::error!(domain, error = %e, "compensating website delete failed");
                Compensation {
                    domain: domain.to_string(),
                    error: Some(format!("{:#}", e)),
                }
            }
        }
    }
}

/// Adapter errors become a failed step rather than aborting the report.
fn settle(result: Result<StepOutcome>) -> StepOutcome {
    result.unwrap_or_else(|e| StepOutcome::Failed(format!("{:#}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_success_requires_all_steps() {
        let mut report = ProvisionReport::default();
        assert!(report.record(ProvisionStep::Dns, StepOutcome::AlreadyExists));
        assert!(!report.success());
        for step in &ProvisionStep::ALL[1..] {
            report.record(*step, StepOutcome::Created);
        }
        assert!(report.success());
    }

    #[test]
    fn test_failed_step_is_reported() {
        let mut report = ProvisionReport::default();
        report.record(ProvisionStep::Dns, StepOutcome::Created);
        assert!(!report.record(ProvisionStep::Website, StepOutcome::Failed("quota".into())));
        let failed = report.failed_step().unwrap();
        assert_eq!(failed.step, ProvisionStep::Website);
        assert!(!report.success());
    }

    #[test]
    fn test_settle_maps_errors() {
        assert_eq!(
            settle(Err(anyhow::anyhow!("ssh: connection refused"))),
            StepOutcome::Failed("ssh: connection refused".into())
        );
    }
}
