//! DNS propagation gate.
//!
//! [`wait_for_record`] polls a [`Resolver`] until `domain` resolves to the
//! expected value or the policy's timeout elapses. It only gates; steps
//! that depend on propagation (certificate issuance, first HTTP check) are
//! run by the caller afterwards.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;

use crate::error::LifecycleError;
use crate::exec::{CommandRunner, CommandSpec};
use crate::retry::{poll_until, Check, RetryPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    A,
    Aaaa,
    Cname,
    Txt,
}

impl RecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::A => "A",
            RecordType::Aaaa => "AAAA",
            RecordType::Cname => "CNAME",
            RecordType::Txt => "TXT",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordType {
    type Err = LifecycleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "A" => Ok(RecordType::A),
            "AAAA" => Ok(RecordType::Aaaa),
            "CNAME" => Ok(RecordType::Cname),
            "TXT" => Ok(RecordType::Txt),
            other => Err(LifecycleError::Configuration(format!(
                "unsupported record type '{}'",
                other
            ))),
        }
    }
}

#[async_trait]
pub trait Resolver: Send + Sync {
    /// Current answers for `domain`. An empty list means "no record yet".
    async fn resolve(&self, domain: &str, record_type: RecordType) -> Result<Vec<String>>;
}

/// Resolves with `dig +short`, optionally against a specific server.
pub struct DigResolver<'a> {
    runner: &'a dyn CommandRunner,
    server: Option<String>,
}

impl<'a> DigResolver<'a> {
    pub fn new(runner: &'a dyn CommandRunner, server: Option<String>) -> Self {
        Self { runner, server }
    }
}

#[async_trait]
impl Resolver for DigResolver<'_> {
    async fn resolve(&self, domain: &str, record_type: RecordType) -> Result<Vec<String>> {
        let mut spec = CommandSpec::new("dig").arg("+short");
        if let Some(server) = &self.server {
            spec = spec.arg(format!("@{}", server));
        }
        let spec = spec.arg(record_type.as_str()).arg(domain);

        let output = self.runner.run(&spec).await?;
        if !output.success() {
            bail!("dig failed: {}", output.combined());
        }
        Ok(parse_dig_short(&output.stdout))
    }
}

/// Normalize `dig +short` output: one answer per line, trailing dots and
/// TXT quotes removed, comment lines dropped.
pub fn parse_dig_short(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with(';'))
        .map(normalize)
        .collect()
}

fn normalize(value: &str) -> String {
    value
        .trim()
        .trim_matches('"')
        .trim_end_matches('.')
        .to_ascii_lowercase()
}

pub fn record_matches(answers: &[String], expected: &str) -> bool {
    let expected = normalize(expected);
    answers.iter().any(|a| normalize(a) == expected)
}

/// Poll until `domain` has a `record_type` answer equal to `expected`.
///
/// Resolver errors count as "not yet" so transient lookup failures do not
/// end the wait early. On timeout returns [`LifecycleError::Timeout`].
pub async fn wait_for_record(
    resolver: &dyn Resolver,
    domain: &str,
    expected: &str,
    record_type: RecordType,
    policy: &RetryPolicy,
) -> Result<Vec<String>> {
    let what = format!("{} {} -> {}", domain, record_type, expected);
    tracing::info!(%what, timeout_secs = policy.timeout.as_secs(), "waiting for DNS propagation");

    poll_until(&what, policy, move || async move {
        match resolver.resolve(domain, record_type).await {
            Ok(answers) if record_matches(&answers, expected) => Ok(Check::Ready(answers)),
            Ok(answers) if answers.is_empty() => Ok(Check::Pending("no answer".to_string())),
            Ok(answers) => Ok(Check::Pending(answers.join(", "))),
            Err(e) => Ok(Check::Pending(format!("lookup error: {}", e))),
        }
    })
    .await
}
