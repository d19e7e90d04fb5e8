//! Cloud account verification.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::error::RandomizerError;
use crate::io::config::IdentityConfig;
use crate::io::process::{command_from_argv, run_command_with_timeout};

/// Reports which account the ambient credentials belong to.
pub trait AccountVerifier {
    fn current_account(&self) -> Result<String>;
}

/// Output limit for the identity command; its JSON is tiny.
const IDENTITY_OUTPUT_LIMIT: usize = 64 * 1024;

#[derive(Debug, Deserialize)]
struct CallerIdentity {
    #[serde(rename = "Account")]
    account: String,
}

/// Verifier that runs `aws sts get-caller-identity` (or the configured equivalent).
#[derive(Debug, Clone)]
pub struct AwsCliIdentity {
    config: IdentityConfig,
    region: Option<String>,
}

impl AwsCliIdentity {
    pub fn new(config: IdentityConfig) -> Self {
        Self {
            config,
            region: None,
        }
    }

    /// Export `AWS_REGION` / `AWS_DEFAULT_REGION` to the identity command.
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }
}

impl AccountVerifier for AwsCliIdentity {
    #[instrument(skip_all)]
    fn current_account(&self) -> Result<String> {
        let mut cmd = command_from_argv(&self.config.command)?;
        if let Some(region) = &self.region {
            cmd.env("AWS_REGION", region).env("AWS_DEFAULT_REGION", region);
        }
        let timeout = Duration::from_secs(self.config.timeout_secs);
        let output = run_command_with_timeout(cmd, timeout, IDENTITY_OUTPUT_LIMIT)
            .context("run identity command")?;
        if !output.succeeded() {
            return Err(anyhow!("identity command failed: {}", output.failure_message()));
        }
        let account = parse_caller_identity(&output.stdout.lossy())?;
        debug!(account = %account, "resolved caller account");
        Ok(account)
    }
}

/// Extract the `Account` field from caller-identity JSON.
pub fn parse_caller_identity(json: &str) -> Result<String> {
    let identity: CallerIdentity =
        serde_json::from_str(json).context("parse caller identity json")?;
    Ok(identity.account)
}

/// Fail with [`RandomizerError::AccountMismatch`] unless the credentials belong to `expected`.
pub fn verify_account(verifier: &dyn AccountVerifier, expected: &str) -> Result<()> {
    let actual = verifier
        .current_account()
        .context("determine current account")?;
    if actual != expected {
        return Err(RandomizerError::AccountMismatch {
            expected: expected.to_string(),
            actual,
        }
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::exit_code_for;
    use crate::exit_codes;
    use crate::test_support::FakeAccount;

    #[test]
    fn parses_account_field() {
        let json = r#"{"UserId":"AIDA","Account":"123456789012","Arn":"arn:aws:iam::123456789012:user/x"}"#;
        assert_eq!(parse_caller_identity(json).expect("parse"), "123456789012");
        assert!(parse_caller_identity("{}").is_err());
    }

    #[test]
    fn mismatch_maps_to_its_exit_code() {
        let verifier = FakeAccount::new("999999999999");
        let err = verify_account(&verifier, "123456789012").unwrap_err();
        assert_eq!(exit_code_for(&err), exit_codes::ACCOUNT_MISMATCH);
        assert!(err.to_string().contains("999999999999"));
    }

    #[test]
    fn matching_account_passes() {
        let verifier = FakeAccount::new("123456789012");
        verify_account(&verifier, "123456789012").expect("verify");
    }

    #[cfg(unix)]
    #[test]
    fn cli_identity_reads_command_output() {
        let config = IdentityConfig {
            command: vec![
                "sh".to_string(),
                "-c".to_string(),
                r#"printf '{"Account":"%s"}' 210987654321"#.to_string(),
            ],
            timeout_secs: 10,
        };
        let account = AwsCliIdentity::new(config)
            .with_region("eu-west-1")
            .current_account()
            .expect("account");
        assert_eq!(account, "210987654321");
    }
}
