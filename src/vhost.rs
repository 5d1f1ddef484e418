//! Virtual-host configuration for Bedrock sites on OpenLiteSpeed.
//!
//! Bedrock serves from `<site>/web` and needs a front-controller rewrite
//! that leaves `/wp-admin` and `wp-login.php` alone. [`rewrite_vhost`] is a
//! pure transformation of the panel-generated `vhost.conf`: it replaces the
//! top-level `docRoot` directive and the top-level `rewrite { ... }` block
//! (adding either when missing) and leaves every other line untouched.
//! Applying it twice yields the same text, which is what makes the
//! provisioning step idempotent.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use std::sync::OnceLock;

use crate::config::PanelConfig;
use crate::exec::{quote, run_checked, CommandRunner, CommandSpec, Target};

const REWRITE_BLOCK: &str = r"rewrite  {
  enable                  1
  autoLoadHtaccess        0
  rules                   <<<END_rules
RewriteEngine On
RewriteRule ^/?wp-admin$ /wp/wp-admin/ [R=301,L]
RewriteCond %{REQUEST_URI} !^/wp-admin
RewriteCond %{REQUEST_URI} !wp-login\.php
RewriteCond %{REQUEST_FILENAME} !-f
RewriteCond %{REQUEST_FILENAME} !-d
RewriteRule ^(.*)$ /index.php [L]
  END_rules
}";

fn doc_root_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\s*)docRoot(\s|$)").expect("valid regex"))
}

fn rewrite_open_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*rewrite\s*\{").expect("valid regex"))
}

fn heredoc_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<<<(\w+)\s*$").expect("valid regex"))
}

/// Bedrock web root under a site's remote path.
pub fn bedrock_doc_root(remote_path: &str) -> String {
    format!("{}/web", remote_path.trim_end_matches('/'))
}

/// Point `docRoot` at `doc_root` and install the Bedrock rewrite block.
pub fn rewrite_vhost(content: &str, doc_root: &str) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let mut out: Vec<String> = Vec::with_capacity(lines.len() + 16);

    let mut depth: i32 = 0;
    let mut heredoc: Option<String> = None;
    let mut doc_root_written = false;
    let mut rewrite_written = false;
    // Depth at which the rewrite block being skipped started.
    let mut skipping: Option<i32> = None;

    for line in lines {
        if let Some(token) = &heredoc {
            if line.trim() == token {
                heredoc = None;
            }
            if skipping.is_none() {
                out.push(line.to_string());
            }
            continue;
        }
        if let Some(caps) = heredoc_regex().captures(line) {
            heredoc = Some(caps[1].to_string());
        }

        let opened = line.matches('{').count() as i32;
        let closed = line.matches('}').count() as i32;

        if let Some(start_depth) = skipping {
            depth += opened - closed;
            if depth <= start_depth {
                skipping = None;
            }
            continue;
        }

        if depth == 0 && rewrite_open_regex().is_match(line) {
            if !rewrite_written {
                out.push(REWRITE_BLOCK.to_string());
                rewrite_written = true;
            }
            let start_depth = depth;
            depth += opened - closed;
            if depth > start_depth {
                skipping = Some(start_depth);
            }
            continue;
        }

        if depth == 0 {
            if let Some(caps) = doc_root_regex().captures(line) {
                if !doc_root_written {
                    out.push(format!("{}docRoot                   {}", &caps[1], doc_root));
                    doc_root_written = true;
                }
                continue;
            }
        }

        depth += opened - closed;
        out.push(line.to_string());
    }

    if !doc_root_written {
        out.insert(0, format!("docRoot                   {}", doc_root));
    }
    if !rewrite_written {
        if out.last().is_some_and(|l| !l.trim().is_empty()) {
            out.push(String::new());
        }
        out.push(REWRITE_BLOCK.to_string());
    }

    let mut text = out.join("\n");
    text.push('\n');
    text
}

/// Operations the provisioning pipeline needs from the web server.
#[async_trait]
pub trait WebServer: Send + Sync {
    async fn read_vhost(&self, domain: &str) -> Result<String>;

    /// Copy the current config aside; returns the backup path.
    async fn backup_vhost(&self, domain: &str) -> Result<String>;

    /// Write the new config and leave a restart pending for `domain`.
    async fn write_vhost(&self, domain: &str, content: &str) -> Result<()>;

    /// Whether a written config has not yet been picked up by a
    /// successful restart.
    async fn restart_pending(&self, domain: &str) -> Result<bool>;

    /// Restart the server and clear the pending marker for `domain`.
    async fn restart(&self, domain: &str) -> Result<()>;
}

/// OpenLiteSpeed as installed by CyberPanel, managed over SSH.
pub struct OpenLiteSpeed<'a> {
    runner: &'a dyn CommandRunner,
    target: Target,
    vhost_root: String,
    restart_command: String,
}

impl<'a> OpenLiteSpeed<'a> {
    pub fn new(runner: &'a dyn CommandRunner, config: &PanelConfig, host: &str) -> Self {
        Self {
            runner,
            target: Target::remote(&config.ssh_user, host),
            vhost_root: config.vhost_root.trim_end_matches('/').to_string(),
            restart_command: config.restart_command.clone(),
        }
    }

    fn vhost_path(&self, domain: &str) -> String {
        format!("{}/{}/vhost.conf", self.vhost_root, domain)
    }

    /// Survives an interrupted run so the next one still restarts.
    fn pending_marker(&self, domain: &str) -> String {
        format!("{}/{}/.restart-pending", self.vhost_root, domain)
    }

    fn shell(&self, script: &str) -> CommandSpec {
        self.target.shell(script)
    }
}

#[async_trait]
impl WebServer for OpenLiteSpeed<'_> {
    async fn read_vhost(&self, domain: &str) -> Result<String> {
        let spec = self.shell(&format!("cat {}", quote(&self.vhost_path(domain))));
        Ok(run_checked(self.runner, "read vhost", &spec).await?.stdout)
    }

    async fn backup_vhost(&self, domain: &str) -> Result<String> {
        let path = self.vhost_path(domain);
        let backup = format!("{}.bak-{}", path, Utc::now().format("%Y%m%d-%H%M%S"));
        let spec = self.shell(&format!("cp -p {} {}", quote(&path), quote(&backup)));
        run_checked(self.runner, "backup vhost", &spec).await?;
        Ok(backup)
    }

    async fn write_vhost(&self, domain: &str, content: &str) -> Result<()> {
        let path = self.vhost_path(domain);
        let tmp = format!("{}.tmp", path);
        let spec = self
            .shell(&format!(
                "cat > {tmp} && chmod --reference={path} {tmp} && touch {marker} && mv {tmp} {path}",
                tmp = quote(&tmp),
                path = quote(&path),
                marker = quote(&self.pending_marker(domain)),
            ))
            .stdin(content.as_bytes().to_vec());
        run_checked(self.runner, "write vhost", &spec).await?;
        Ok(())
    }

    async fn restart_pending(&self, domain: &str) -> Result<bool> {
        let spec = self.shell(&format!(
            "if [ -e {} ]; then echo pending; fi",
            quote(&self.pending_marker(domain))
        ));
        let out = run_checked(self.runner, "check pending restart", &spec).await?;
        Ok(out.stdout.trim() == "pending")
    }

    async fn restart(&self, domain: &str) -> Result<()> {
        let spec = self.shell(&format!(
            "{} && rm -f {}",
            self.restart_command,
            quote(&self.pending_marker(domain))
        ));
        run_checked(self.runner, "restart web server", &spec).await?;
        Ok(())
    }
}
