//! DNS record creation.
//!
//! The provisioning pipeline only needs one operation from a DNS provider:
//! "make `domain` point at `ip`". [`DnsProvider::create_a_record`] reports
//! [`StepOutcome::AlreadyExists`] when the provider rejects the record as a
//! duplicate so re-runs stay green.
//!
//! # Cloudflare
//!
//! `POST {api_base}/zones/{zone_id}/dns_records` with a bearer token read
//! from the environment variable named by `dns.api_token_env`. Error codes
//! `81057` ("record already exists") and `81058` ("an identical record
//! already exists") map to `AlreadyExists`; every other error is fatal.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::config::DnsConfig;
use crate::models::StepOutcome;

const CLOUDFLARE_DUPLICATE_CODES: [i64; 2] = [81057, 81058];

#[async_trait]
pub trait DnsProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Create an A record for `domain` pointing at `ip`.
    async fn create_a_record(&self, domain: &str, ip: &str) -> Result<StepOutcome>;
}

/// Build the provider selected by `dns.provider`.
pub fn create_provider(config: &DnsConfig) -> Result<Box<dyn DnsProvider>> {
    match config.provider.as_str() {
        "cloudflare" => Ok(Box::new(CloudflareDns::new(config)?)),
        "disabled" => Ok(Box::new(DisabledDns)),
        other => bail!("Unknown DNS provider: {}", other),
    }
}

/// DNS managed outside this tool; the step always reports the record as
/// present.
pub struct DisabledDns;

#[async_trait]
impl DnsProvider for DisabledDns {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn create_a_record(&self, domain: &str, _ip: &str) -> Result<StepOutcome> {
        tracing::info!(domain, "DNS provider disabled; assuming record is managed externally");
        Ok(StepOutcome::AlreadyExists)
    }
}

pub struct CloudflareDns {
    api_base: String,
    zone_id: String,
    token: String,
    ttl: u32,
    proxied: bool,
    client: reqwest::Client,
}

impl CloudflareDns {
    pub fn new(config: &DnsConfig) -> Result<Self> {
        let zone_id = config
            .zone_id
            .clone()
            .ok_or_else(|| anyhow::anyhow!("dns.zone_id required for Cloudflare provider"))?;
        let token = std::env::var(&config.api_token_env)
            .map_err(|_| anyhow::anyhow!("{} environment variable not set", config.api_token_env))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            api_base: config.api_base.trim_end_matches('/').to_string(),
            zone_id,
            token,
            ttl: config.ttl,
            proxied: config.proxied,
            client,
        })
    }
}

#[async_trait]
impl DnsProvider for CloudflareDns {
    fn name(&self) -> &str {
        "cloudflare"
    }

    async fn create_a_record(&self, domain: &str, ip: &str) -> Result<StepOutcome> {
        let url = format!("{}/zones/{}/dns_records", self.api_base, self.zone_id);
        let body = serde_json::json!({
            "type": "A",
            "name": domain,
            "content": ip,
            "ttl": self.ttl,
            "proxied": self.proxied,
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;
        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_default();
        let json: Value = serde_json::from_str(&text).unwrap_or(Value::Null);

        Ok(classify_record_response(status, &json, &text))
    }
}

/// Map a Cloudflare record-create response to a step outcome.
pub fn classify_record_response(status: u16, json: &Value, raw: &str) -> StepOutcome {
    if json.get("success").and_then(Value::as_bool) == Some(true) {
        return StepOutcome::Created;
    }

    let errors = json
        .get("errors")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let duplicate = errors.iter().any(|e| {
        e.get("code")
            .and_then(Value::as_i64)
            .is_some_and(|c| CLOUDFLARE_DUPLICATE_CODES.contains(&c))
    });
    if duplicate {
        return StepOutcome::AlreadyExists;
    }

    let messages: Vec<String> = errors
        .iter()
        .map(|e| {
            format!(
                "{} {}",
                e.get("code").and_then(Value::as_i64).unwrap_or_default(),
                e.get("message").and_then(Value::as_str).unwrap_or_default()
            )
        })
        .collect();
    if messages.is_empty() {
        StepOutcome::Failed(format!("Cloudflare API error {}: {}", status, raw.trim()))
    } else {
        StepOutcome::Failed(format!(
            "Cloudflare API error {}: {}",
            status,
            messages.join("; ")
        ))
    }
}
