//! Secure secret management module
//!
//! Loads the exchange API credentials. The secret is kept in a
//! `Zeroizing<String>` so it is wiped from memory when dropped.
//!
//! # Sources
//! - 1Password CLI (`op read <reference>`) when a reference is configured
//! - Environment variable fallback with a warning

use std::env;
use tracing::{error, info, warn};
use zeroize::Zeroizing;

/// Error type for secret loading operations
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("Secret not found: {0}")]
    NotFound(String),

    #[error("1Password CLI error: {0}")]
    OnePasswordError(String),

    #[error("Environment variable not set: {0}")]
    EnvVarNotSet(String),

    #[error("Secret validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration for secret loading
#[derive(Debug, Clone)]
pub struct SecretConfig {
    /// Whether to allow loading secrets from environment variables
    pub allow_env_vars: bool,

    /// Whether to require 1Password CLI
    pub require_op_cli: bool,
}

impl Default for SecretConfig {
    fn default() -> Self {
        Self {
            allow_env_vars: true,
            require_op_cli: false,
        }
    }
}

/// API key and secret for a signed REST API
pub struct ApiCredentials {
    pub api_key: String,
    pub api_secret: Zeroizing<String>,
}

impl std::fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("api_key", &mask(&self.api_key))
            .field("api_secret", &"***")
            .finish()
    }
}

/// Show only the first four characters of a key
pub fn mask(value: &str) -> String {
    let visible: String = value.chars().take(4).collect();
    format!("{}***", visible)
}

/// Load a secret from 1Password CLI or environment variable (with fallback)
///
/// A `None` reference skips 1Password and reads the environment variable
/// directly.
pub fn load_secret(
    op_reference: Option<&str>,
    env_var_name: &str,
    config: &SecretConfig,
) -> Result<Zeroizing<String>, SecretError> {
    if let Some(reference) = op_reference {
        match load_from_op_cli(reference) {
            Ok(secret) => {
                info!("✓ Loaded secret from 1Password CLI: {}", env_var_name);
                return Ok(secret);
            }
            Err(e) => {
                if config.require_op_cli {
                    error!("1Password CLI required but failed: {}", e);
                    return Err(e);
                }
                warn!("1Password CLI not available: {}", e);
            }
        }
    } else if config.require_op_cli {
        return Err(SecretError::NotFound(format!(
            "{} (no 1Password reference configured)",
            env_var_name
        )));
    }

    if config.allow_env_vars {
        warn!(
            "⚠️  Loading secret from environment variable: {} (prefer a 1Password reference)",
            env_var_name
        );
        load_from_env(env_var_name)
    } else {
        error!(
            "Secret loading failed: 1Password CLI unavailable and env vars disabled for {}",
            env_var_name
        );
        Err(SecretError::NotFound(env_var_name.to_string()))
    }
}

/// Load a secret from 1Password CLI
fn load_from_op_cli(reference: &str) -> Result<Zeroizing<String>, SecretError> {
    use std::process::Command;

    let output = Command::new("op")
        .arg("read")
        .arg(reference)
        .output()
        .map_err(|e| {
            SecretError::OnePasswordError(format!(
                "Failed to execute 'op' command: {}. Install 1Password CLI from https://developer.1password.com/docs/cli",
                e
            ))
        })?;

    if !output.status.success() {
        let error_msg = String::from_utf8_lossy(&output.stderr);
        return Err(SecretError::OnePasswordError(format!(
            "1Password CLI failed: {}",
            error_msg
        )));
    }

    let secret = Zeroizing::new(
        String::from_utf8(output.stdout)
            .map_err(|e| {
                SecretError::OnePasswordError(format!("Invalid UTF-8 from 1Password: {}", e))
            })?
            .trim()
            .to_string(),
    );

    if secret.is_empty() {
        return Err(SecretError::OnePasswordError(
            "1Password returned empty secret".to_string(),
        ));
    }

    Ok(secret)
}

/// Load a secret from environment variable (wrapped in Zeroizing)
fn load_from_env(env_var_name: &str) -> Result<Zeroizing<String>, SecretError> {
    match env::var(env_var_name) {
        Ok(value) if !value.trim().is_empty() => Ok(Zeroizing::new(value.trim().to_string())),
        _ => Err(SecretError::EnvVarNotSet(env_var_name.to_string())),
    }
}

/// Reject empty or obviously placeholder values
pub fn validate_secret_strength(secret: &str, min_length: usize) -> Result<(), SecretError> {
    if secret.len() < min_length {
        return Err(SecretError::ValidationFailed(format!(
            "Secret too short: {} characters (minimum: {})",
            secret.len(),
            min_length
        )));
    }

    let placeholders = ["your_api", "changeme", "placeholder", "xxxxxxxx"];
    let secret_lower = secret.to_lowercase();

    for pattern in &placeholders {
        if secret_lower.contains(pattern) {
            return Err(SecretError::ValidationFailed(format!(
                "Secret looks like a placeholder: {}",
                pattern
            )));
        }
    }

    Ok(())
}

/// Load the Binance key pair.
///
/// The API key comes from `BINANCE_API_KEY`. The secret is read through
/// `op read` when `BINANCE_API_SECRET_OP_REF` is set, otherwise from
/// `BINANCE_API_SECRET`.
pub fn load_binance_credentials(config: &SecretConfig) -> Result<ApiCredentials, SecretError> {
    let api_key = load_from_env("BINANCE_API_KEY")?;
    validate_secret_strength(&api_key, 16)?;

    let op_reference = env::var("BINANCE_API_SECRET_OP_REF")
        .ok()
        .filter(|r| !r.trim().is_empty());
    let api_secret = load_secret(op_reference.as_deref(), "BINANCE_API_SECRET", config)?;
    validate_secret_strength(&api_secret, 16)?;

    info!("Using Binance API key {}", mask(&api_key));

    Ok(ApiCredentials {
        api_key: api_key.to_string(),
        api_secret,
    })
}
