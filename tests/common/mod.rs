#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use wpfleet::dns::DnsProvider;
use wpfleet::exec::{CommandOutput, CommandRunner, CommandSpec};
use wpfleet::models::{DatabaseCredentials, Environment, EnvironmentConfig, StepOutcome};
use wpfleet::panel::{HostingPanel, WebsiteSpec};
use wpfleet::prompt::{Confirmer, CredentialPrompter};
use wpfleet::vhost::WebServer;

// ═══════════════════════════════════════════════════════════════════════
// Command runner
// ═══════════════════════════════════════════════════════════════════════

struct Rule {
    pattern: String,
    responses: VecDeque<CommandOutput>,
}

/// Records every command and answers from scripted rules.
///
/// The first rule whose pattern occurs in the command line answers. A rule
/// with several responses hands them out in order and then repeats the
/// last one. Commands matching no rule succeed with empty output.
#[derive(Default)]
pub struct RecordingRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<CommandSpec>>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, pattern: &str, output: CommandOutput) -> &Self {
        let mut rules = self.rules.lock().unwrap();
        match rules.iter_mut().find(|r| r.pattern == pattern) {
            Some(rule) => rule.responses.push_back(output),
            None => rules.push(Rule {
                pattern: pattern.to_string(),
                responses: VecDeque::from([output]),
            }),
        }
        self
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    /// Unredacted command lines, in call order.
    pub fn lines(&self) -> Vec<String> {
        self.calls().iter().map(CommandSpec::command_line).collect()
    }

    pub fn count(&self, pattern: &str) -> usize {
        self.lines().iter().filter(|l| l.contains(pattern)).count()
    }

    /// Index of the first call containing `pattern`.
    pub fn position(&self, pattern: &str) -> Option<usize> {
        self.lines().iter().position(|l| l.contains(pattern))
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.calls.lock().unwrap().push(spec.clone());
        let line = spec.command_line();
        let mut rules = self.rules.lock().unwrap();
        for rule in rules.iter_mut() {
            if line.contains(&rule.pattern) {
                let output = if rule.responses.len() > 1 {
                    rule.responses.pop_front()
                } else {
                    rule.responses.front().cloned()
                };
                return Ok(output.unwrap_or_else(|| CommandOutput::ok("")));
            }
        }
        Ok(CommandOutput::ok(""))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Provisioning fakes
// ═══════════════════════════════════════════════════════════════════════

/// Remembers created records; duplicates report `AlreadyExists`.
#[derive(Default)]
pub struct FakeDns {
    pub records: Mutex<HashSet<String>>,
    pub calls: AtomicUsize,
    pub fail_with: Option<String>,
}

impl FakeDns {
    pub fn with_record(domain: &str) -> Self {
        let dns = Self::default();
        dns.records.lock().unwrap().insert(domain.to_string());
        dns
    }
}

#[async_trait]
impl DnsProvider for FakeDns {
    fn name(&self) -> &str {
        "fake"
    }

    async fn create_a_record(&self, domain: &str, _ip: &str) -> Result<StepOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = &self.fail_with {
            bail!("{}", e);
        }
        if self.records.lock().unwrap().insert(domain.to_string()) {
            Ok(StepOutcome::Created)
        } else {
            Ok(StepOutcome::AlreadyExists)
        }
    }
}

#[derive(Default)]
pub struct FakePanel {
    pub websites: Mutex<HashSet<String>>,
    pub databases: Mutex<HashSet<String>>,
    pub database_failure: Option<String>,
    pub deleted: Mutex<Vec<String>>,
    pub passwords: Mutex<Vec<String>>,
    pub calls: AtomicUsize,
}

impl FakePanel {
    pub fn with_website(domain: &str) -> Self {
        let panel = Self::default();
        panel.websites.lock().unwrap().insert(domain.to_string());
        panel
    }

    pub fn failing_database(reason: &str) -> Self {
        Self {
            database_failure: Some(reason.to_string()),
            ..Default::default()
        }
    }
}

#[async_trait]
impl HostingPanel for FakePanel {
    async fn create_website(&self, website: &WebsiteSpec) -> Result<StepOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.websites.lock().unwrap().insert(website.domain.clone()) {
            Ok(StepOutcome::Created)
        } else {
            Ok(StepOutcome::AlreadyExists)
        }
    }

    async fn create_database(
        &self,
        _domain: &str,
        credentials: &DatabaseCredentials,
    ) -> Result<StepOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = &self.database_failure {
            return Ok(StepOutcome::Failed(reason.clone()));
        }
        self.passwords
            .lock()
            .unwrap()
            .push(credentials.db_pass.clone());
        if self
            .databases
            .lock()
            .unwrap()
            .insert(credentials.db_name.clone())
        {
            Ok(StepOutcome::Created)
        } else {
            Ok(StepOutcome::AlreadyExists)
        }
    }

    async fn delete_website(&self, domain: &str) -> Result<()> {
        self.websites.lock().unwrap().remove(domain);
        self.deleted.lock().unwrap().push(domain.to_string());
        Ok(())
    }
}

pub const PANEL_VHOST: &str = "docRoot                   $VH_ROOT/public_html\nvhDomain                  $VH_NAME\n\nrewrite  {\n  enable                  1\n  autoLoadHtaccess        1\n}\n";

/// In-memory vhost file.
pub struct FakeWebServer {
    pub content: Mutex<String>,
    pub reads: AtomicUsize,
    pub writes: AtomicUsize,
    pub backups: AtomicUsize,
    /// Successful restarts only.
    pub restarts: AtomicUsize,
    pub restart_attempts: AtomicUsize,
    /// Restarts still to fail before one succeeds.
    pub failing_restarts: AtomicUsize,
    pub pending: AtomicBool,
}

impl FakeWebServer {
    pub fn new(content: &str) -> Self {
        Self {
            content: Mutex::new(content.to_string()),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
            backups: AtomicUsize::new(0),
            restarts: AtomicUsize::new(0),
            restart_attempts: AtomicUsize::new(0),
            failing_restarts: AtomicUsize::new(0),
            pending: AtomicBool::new(false),
        }
    }

    pub fn with_failing_restarts(content: &str, failures: usize) -> Self {
        let web = Self::new(content);
        web.failing_restarts.store(failures, Ordering::SeqCst);
        web
    }
}

#[async_trait]
impl WebServer for FakeWebServer {
    async fn read_vhost(&self, _domain: &str) -> Result<String> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.content.lock().unwrap().clone())
    }

    async fn backup_vhost(&self, domain: &str) -> Result<String> {
        self.backups.fetch_add(1, Ordering::SeqCst);
        Ok(format!("/usr/local/lsws/conf/vhosts/{}/vhost.conf.bak", domain))
    }

    async fn write_vhost(&self, _domain: &str, content: &str) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        *self.content.lock().unwrap() = content.to_string();
        self.pending.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn restart_pending(&self, _domain: &str) -> Result<bool> {
        Ok(self.pending.load(Ordering::SeqCst))
    }

    async fn restart(&self, _domain: &str) -> Result<()> {
        self.restart_attempts.fetch_add(1, Ordering::SeqCst);
        let left = self.failing_restarts.load(Ordering::SeqCst);
        if left > 0 {
            self.failing_restarts.store(left - 1, Ordering::SeqCst);
            bail!("lsws: failed to restart");
        }
        self.restarts.fetch_add(1, Ordering::SeqCst);
        self.pending.store(false, Ordering::SeqCst);
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Prompts
// ═══════════════════════════════════════════════════════════════════════

/// Hands out scripted passwords and counts how often it was asked.
pub struct ScriptedPrompter {
    answers: Mutex<VecDeque<String>>,
    pub asked: AtomicUsize,
}

impl ScriptedPrompter {
    pub fn new(answers: &[&str]) -> Self {
        Self {
            answers: Mutex::new(answers.iter().map(|s| s.to_string()).collect()),
            asked: AtomicUsize::new(0),
        }
    }

    pub fn asked(&self) -> usize {
        self.asked.load(Ordering::SeqCst)
    }
}

impl CredentialPrompter for ScriptedPrompter {
    fn password(&self, _prompt: &str) -> Result<String> {
        self.asked.fetch_add(1, Ordering::SeqCst);
        match self.answers.lock().unwrap().pop_front() {
            Some(a) => Ok(a),
            None => bail!("no scripted password left"),
        }
    }
}

pub struct Answer(pub bool);

impl Confirmer for Answer {
    fn confirm(&self, _question: &str) -> Result<bool> {
        Ok(self.0)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Fixtures
// ═══════════════════════════════════════════════════════════════════════

pub fn environment(env: Environment, root: &Path) -> EnvironmentConfig {
    let (domain, remote_path) = match env {
        Environment::Local => ("localhost:8081".to_string(), root.display().to_string()),
        _ => (
            "acme.test".to_string(),
            "/home/acme.test/public_html".to_string(),
        ),
    };
    let base = if env.is_remote() {
        PathBuf::from(&remote_path)
    } else {
        root.to_path_buf()
    };
    EnvironmentConfig {
        site: "acme".into(),
        environment: env,
        site_root: root.to_path_buf(),
        ssh_host: "203.0.113.10".into(),
        ssh_user: "deploy".into(),
        web_user: "acme".into(),
        remote_path,
        domain,
        db_name: "acme_db".into(),
        db_user: "acme_user".into(),
        db_pass: "first-pass".into(),
        db_host: "localhost".into(),
        object_store_remote: "b2:fleet".into(),
        local_uploads_path: base.join("web/app/uploads"),
        local_db_dump_path: if env.is_remote() {
            PathBuf::from("/home/acme.test/backups")
        } else {
            root.join("backups")
        },
    }
}
