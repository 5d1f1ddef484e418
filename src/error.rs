//! Error taxonomy for lifecycle operations.
//!
//! Library functions return [`anyhow::Result`]; the variants below are the
//! typed failures carried inside those errors so callers can tell a
//! configuration problem from a tool failure or a propagation timeout with
//! `err.downcast_ref::<LifecycleError>()`.
//!
//! "Already exists" is deliberately absent: it is a
//! [`StepOutcome`](crate::models::StepOutcome), not an error.

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    /// A file is missing or a value is invalid. Never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Required environment fields are absent from the site store.
    #[error("{site}/{environment} is missing required field(s): {}", .fields.join(", "))]
    MissingFields {
        site: String,
        environment: String,
        fields: Vec<String>,
    },

    /// An external command exited non-zero or could not be spawned.
    #[error("step '{step}' failed (exit {}):\n{output}", exit_label(.status))]
    ExternalTool {
        step: String,
        status: Option<i32>,
        output: String,
    },

    /// A polled condition did not hold before the deadline.
    #[error("timed out after {}s waiting for {what} (last observed: {last_observed})", .waited.as_secs())]
    Timeout {
        what: String,
        waited: Duration,
        last_observed: String,
    },

    /// The operator declined a destructive action.
    #[error("{action} declined by operator; nothing was changed")]
    Declined { action: String },

    /// Database credentials were rejected on every attempt.
    #[error("database authentication failed after {attempts} attempts: {output}")]
    AuthenticationFailed { attempts: u32, output: String },

    /// A snapshot is incomplete; restore refuses to run.
    #[error("snapshot {timestamp} is missing artifact(s): {}", .missing.join(", "))]
    MissingArtifact {
        timestamp: String,
        missing: Vec<String>,
    },
}

fn exit_label(status: &Option<i32>) -> String {
    match status {
        Some(code) => code.to_string(),
        None => "signal".to_string(),
    }
}

impl LifecycleError {
    pub fn external(step: impl Into<String>, status: Option<i32>, output: impl Into<String>) -> Self {
        LifecycleError::ExternalTool {
            step: step.into(),
            status,
            output: output.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_lists_every_field() {
        let err = LifecycleError::MissingFields {
            site: "acme".to_string(),
            environment: "staging".to_string(),
            fields: vec!["ssh_host".to_string(), "db_pass".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("acme/staging"));
        assert!(msg.contains("ssh_host, db_pass"));
    }

    #[test]
    fn test_external_tool_keeps_output_verbatim() {
        let err = LifecycleError::external("rsync", Some(23), "rsync: change_dir failed");
        let msg = err.to_string();
        assert!(msg.contains("'rsync'"));
        assert!(msg.contains("exit 23"));
        assert!(msg.ends_with("rsync: change_dir failed"));
    }

    #[test]
    fn test_downcast_through_anyhow() {
        let err: anyhow::Error = LifecycleError::Declined {
            action: "restore".to_string(),
        }
        .into();
        assert!(matches!(
            err.downcast_ref::<LifecycleError>(),
            Some(LifecycleError::Declined { .. })
        ));
    }
}
