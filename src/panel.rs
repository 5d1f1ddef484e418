//! Hosting-panel adapter.
//!
//! The provisioning pipeline creates websites and databases through a
//! [`HostingPanel`]. The shipped implementation drives the CyberPanel CLI
//! over SSH.
//!
//! CyberPanel reports results inconsistently: most commands print a JSON
//! object (`{"success": 1, "errorMessage": "None"}`), some print plain text,
//! and "already exists" only shows up inside the error message. That
//! brittleness is confined to the [`ResponseClassifier`] strategies here:
//!
//! - [`JsonClassifier`] reads structured `success`/`status` fields.
//! - [`TextPatternClassifier`] pattern-matches plain text.
//! - [`ChainClassifier`] tries each in order.

use anyhow::{bail, Result};
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;

use crate::config::PanelConfig;
use crate::exec::{quote, CommandOutput, CommandRunner, Target};
use crate::models::{DatabaseCredentials, StepOutcome};

// ═══════════════════════════════════════════════════════════════════════
// Response classification
// ═══════════════════════════════════════════════════════════════════════

/// Turns raw panel output into a step outcome.
pub trait ResponseClassifier: Send + Sync {
    /// `None` when this strategy cannot interpret the output.
    fn classify(&self, output: &CommandOutput) -> Option<StepOutcome>;
}

fn default_exists_patterns() -> Vec<Regex> {
    [r"(?i)already exists", r"(?i)already taken", r"(?i)already been created"]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
}

/// Structured responses: a JSON object somewhere in stdout.
pub struct JsonClassifier {
    exists: Vec<Regex>,
}

impl Default for JsonClassifier {
    fn default() -> Self {
        Self {
            exists: default_exists_patterns(),
        }
    }
}

impl JsonClassifier {
    fn extract(stdout: &str) -> Option<Value> {
        let start = stdout.find('{')?;
        let end = stdout.rfind('}')?;
        if end < start {
            return None;
        }
        serde_json::from_str(&stdout[start..=end]).ok()
    }
}

fn truthy(v: &Value) -> Option<bool> {
    match v {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|n| n == 1),
        Value::String(s) => match s.as_str() {
            "1" | "true" | "success" => Some(true),
            "0" | "false" | "error" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

impl ResponseClassifier for JsonClassifier {
    fn classify(&self, output: &CommandOutput) -> Option<StepOutcome> {
        let json = Self::extract(&output.stdout)?;
        let ok = ["success", "status"]
            .iter()
            .find_map(|k| json.get(*k).and_then(truthy))?;
        if ok {
            return Some(StepOutcome::Created);
        }

        let message = ["errorMessage", "error_message", "message"]
            .iter()
            .find_map(|k| json.get(*k).and_then(Value::as_str))
            .unwrap_or("panel reported failure without a message")
            .to_string();
        if self.exists.iter().any(|re| re.is_match(&message)) {
            Some(StepOutcome::AlreadyExists)
        } else {
            Some(StepOutcome::Failed(message))
        }
    }
}

/// Plain-text responses.
pub struct TextPatternClassifier {
    success: Vec<Regex>,
    exists: Vec<Regex>,
}

impl Default for TextPatternClassifier {
    fn default() -> Self {
        let success = [
            r"(?i)successfully (created|deleted)",
            r"(?i)\bcreated successfully\b",
            r"(?i)\bdeleted successfully\b",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect();
        Self {
            success,
            exists: default_exists_patterns(),
        }
    }
}

impl ResponseClassifier for TextPatternClassifier {
    fn classify(&self, output: &CommandOutput) -> Option<StepOutcome> {
        let text = output.combined();
        if self.exists.iter().any(|re| re.is_match(&text)) {
            return Some(StepOutcome::AlreadyExists);
        }
        if output.success() && self.success.iter().any(|re| re.is_match(&text)) {
            return Some(StepOutcome::Created);
        }
        if text.is_empty() {
            return Some(StepOutcome::Failed(format!(
                "panel exited with status {:?} and no output",
                output.status
            )));
        }
        Some(StepOutcome::Failed(text))
    }
}

/// Tries each classifier in order; the first opinion wins.
pub struct ChainClassifier {
    strategies: Vec<Box<dyn ResponseClassifier>>,
}

impl ChainClassifier {
    pub fn new(strategies: Vec<Box<dyn ResponseClassifier>>) -> Self {
        Self { strategies }
    }

    /// JSON first, then text patterns.
    pub fn cyberpanel() -> Self {
        Self::new(vec![
            Box::new(JsonClassifier::default()),
            Box::new(TextPatternClassifier::default()),
        ])
    }
}

impl ResponseClassifier for ChainClassifier {
    fn classify(&self, output: &CommandOutput) -> Option<StepOutcome> {
        self.strategies.iter().find_map(|s| s.classify(output))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Panel trait
// ═══════════════════════════════════════════════════════════════════════

/// Website parameters for [`HostingPanel::create_website`].
#[derive(Debug, Clone)]
pub struct WebsiteSpec {
    pub domain: String,
    pub owner: String,
    pub package: String,
    pub email: String,
    pub php: String,
}

#[async_trait]
pub trait HostingPanel: Send + Sync {
    async fn create_website(&self, website: &WebsiteSpec) -> Result<StepOutcome>;

    /// Create a database and a user scoped to it.
    async fn create_database(
        &self,
        domain: &str,
        credentials: &DatabaseCredentials,
    ) -> Result<StepOutcome>;

    /// Remove a website; used to compensate a failed first provisioning.
    async fn delete_website(&self, domain: &str) -> Result<()>;
}

// ═══════════════════════════════════════════════════════════════════════
// CyberPanel
// ═══════════════════════════════════════════════════════════════════════

/// CyberPanel CLI driven over SSH.
pub struct CyberPanel<'a> {
    runner: &'a dyn CommandRunner,
    target: Target,
    classifier: Box<dyn ResponseClassifier>,
}

impl<'a> CyberPanel<'a> {
    pub fn new(runner: &'a dyn CommandRunner, config: &PanelConfig, host: &str) -> Self {
        Self {
            runner,
            target: Target::remote(&config.ssh_user, host),
            classifier: Box::new(ChainClassifier::cyberpanel()),
        }
    }

    async fn call(
        &self,
        subcommand: &str,
        args: &[(&str, &str)],
        secret: Option<&str>,
    ) -> Result<StepOutcome> {
        let mut script = format!("cyberpanel {}", subcommand);
        for (flag, value) in args {
            script.push_str(&format!(" --{} {}", flag, quote(value)));
        }
        let mut spec = self.target.shell(&script);
        if let Some(s) = secret {
            spec = spec.secret(s);
        }

        let output = self.runner.run(&spec).await?;
        let outcome = self
            .classifier
            .classify(&output)
            .unwrap_or_else(|| StepOutcome::Failed(output.combined()));
        Ok(match outcome {
            StepOutcome::Failed(msg) => StepOutcome::Failed(spec.redact(&msg)),
            other => other,
        })
    }
}

#[async_trait]
impl HostingPanel for CyberPanel<'_> {
    async fn create_website(&self, website: &WebsiteSpec) -> Result<StepOutcome> {
        self.call(
            "createWebsite",
            &[
                ("package", website.package.as_str()),
                ("owner", website.owner.as_str()),
                ("domainName", website.domain.as_str()),
                ("email", website.email.as_str()),
                ("php", website.php.as_str()),
            ],
            None,
        )
        .await
    }

    async fn create_database(
        &self,
        domain: &str,
        credentials: &DatabaseCredentials,
    ) -> Result<StepOutcome> {
        self.call(
            "createDatabase",
            &[
                ("databaseWebsite", domain),
                ("dbName", credentials.db_name.as_str()),
                ("dbUsername", credentials.db_user.as_str()),
                ("dbPassword", credentials.db_pass.as_str()),
            ],
            Some(&credentials.db_pass),
        )
        .await
    }

    async fn delete_website(&self, domain: &str) -> Result<()> {
        match self
            .call("deleteWebsite", &[("domainName", domain)], None)
            .await?
        {
            StepOutcome::Failed(msg) => bail!("failed to delete website {}: {}", domain, msg),
            _ => Ok(()),
        }
    }
}
