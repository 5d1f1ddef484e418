//! Operator interaction.
//!
//! Destructive actions (restore, database push) ask for confirmation and the
//! database authentication check asks for a corrected password. Both go
//! through traits so tests can script the answers and `--yes` can skip the
//! confirmation.

use anyhow::Result;

use crate::error::LifecycleError;

pub trait Confirmer: Send + Sync {
    fn confirm(&self, question: &str) -> Result<bool>;
}

pub trait CredentialPrompter: Send + Sync {
    /// Ask for a secret value. The answer is never echoed.
    fn password(&self, prompt: &str) -> Result<String>;
}

/// Interactive prompts on the controlling terminal.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompt;

impl Confirmer for TerminalPrompt {
    fn confirm(&self, question: &str) -> Result<bool> {
        Ok(inquire::Confirm::new(question)
            .with_default(false)
            .prompt()?)
    }
}

impl CredentialPrompter for TerminalPrompt {
    fn password(&self, prompt: &str) -> Result<String> {
        Ok(inquire::Password::new(prompt)
            .without_confirmation()
            .with_help_message("Input is hidden")
            .prompt()?)
    }
}

/// Confirms everything; backs the `--yes` flag.
#[derive(Debug, Default, Clone, Copy)]
pub struct AssumeYes;

impl Confirmer for AssumeYes {
    fn confirm(&self, question: &str) -> Result<bool> {
        tracing::info!(question, "confirmed by --yes");
        Ok(true)
    }
}

/// Ask `question`; a "no" becomes [`LifecycleError::Declined`] for `action`.
pub fn require_confirmation(confirmer: &dyn Confirmer, action: &str, question: &str) -> Result<()> {
    if confirmer.confirm(question)? {
        Ok(())
    } else {
        Err(LifecycleError::Declined {
            action: action.to_string(),
        }
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Never;

    impl Confirmer for Never {
        fn confirm(&self, _question: &str) -> Result<bool> {
            Ok(false)
        }
    }

    #[test]
    fn test_decline_is_typed() {
        let err = require_confirmation(&Never, "restore", "Overwrite?").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LifecycleError>(),
            Some(LifecycleError::Declined { action }) if action == "restore"
        ));
    }

    #[test]
    fn test_assume_yes() {
        assert!(require_confirmation(&AssumeYes, "push", "Overwrite?").is_ok());
    }
}
