//! Configuration module for the vault system.
//!
//! A single TOML file describes one vault deployment: the vault address, the
//! EIP-712 domain its validator signs under, the trusted authorizer, the
//! storage backend and optionally the account used for offline signing.
//! `${VAR}` and `${VAR:-default}` placeholders are resolved from the
//! environment before parsing, so keys never need to live in the file.

pub mod builders {
	pub mod config;
}

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use vault_types::{Address, Domain, InsufficientFundsPolicy};

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error that occurs during file I/O operations.
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	/// Error that occurs when parsing TOML configuration.
	#[error("Configuration error: {0}")]
	Parse(String),
	/// Error that occurs when configuration validation fails.
	#[error("Validation error: {0}")]
	Validation(String),
}

impl From<toml::de::Error> for ConfigError {
	fn from(err: toml::de::Error) -> Self {
		// Keep only the message, not the echoed input.
		ConfigError::Parse(err.message().to_string())
	}
}

/// Main configuration structure for a vault deployment.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
	/// The vault instance itself.
	pub vault: VaultConfig,
	/// EIP-712 domain the validator signs under.
	pub domain: DomainConfig,
	/// The signer whose approvals release funds.
	pub authorizer: AuthorizerConfig,
	/// Configuration for the storage backend.
	pub storage: StorageConfig,
	/// Key material for producing signatures. Only the signing tooling needs it.
	#[serde(default)]
	pub account: Option<AccountConfig>,
}

/// Configuration specific to the vault instance.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VaultConfig {
	/// Address identifying this vault. Authorizations must name it.
	pub address: Address,
	/// Nonce handling when a verified withdrawal exceeds the balance.
	#[serde(default)]
	pub insufficient_funds_policy: InsufficientFundsPolicy,
}

/// EIP-712 domain parameters.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DomainConfig {
	pub name: String,
	pub version: String,
	pub chain_id: u64,
	/// Address of the validator the domain is bound to.
	pub verifying_contract: Address,
}

impl DomainConfig {
	pub fn to_domain(&self) -> Domain {
		Domain::new(
			self.name.clone(),
			self.version.clone(),
			self.chain_id,
			self.verifying_contract,
		)
	}
}

/// The trusted authorizer.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthorizerConfig {
	pub address: Address,
}

/// Configuration for the storage backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
	/// Which implementation to use as primary.
	pub primary: String,
	/// Map of storage implementation names to their configurations.
	pub implementations: HashMap<String, toml::Value>,
	/// How long a consumed nonce is kept after its deadline passes.
	/// Defaults to 3600 seconds.
	#[serde(default = "default_nonce_retention_seconds")]
	pub nonce_retention_seconds: u64,
}

fn default_nonce_retention_seconds() -> u64 {
	3600
}

/// Configuration for account management.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccountConfig {
	/// Which implementation to use as primary.
	pub primary: String,
	/// Map of account implementation names to their configurations.
	pub implementations: HashMap<String, toml::Value>,
}

/// Resolves environment variables in a string.
///
/// Replaces ${VAR_NAME} with the value of the environment variable VAR_NAME.
/// Supports default values with ${VAR_NAME:-default_value}.
///
/// Input strings are limited to 1MB.
pub(crate) fn resolve_env_vars(input: &str) -> Result<String, ConfigError> {
	const MAX_INPUT_SIZE: usize = 1024 * 1024;
	if input.len() > MAX_INPUT_SIZE {
		return Err(ConfigError::Validation(format!(
			"Configuration file too large: {} bytes (max: {} bytes)",
			input.len(),
			MAX_INPUT_SIZE
		)));
	}

	let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]{0,127})(?::-([^}]{0,256}))?\}")
		.map_err(|e| ConfigError::Parse(format!("Regex error: {}", e)))?;

	let mut result = String::with_capacity(input.len());
	let mut last_end = 0;

	for cap in re.captures_iter(input) {
		let (Some(full_match), Some(var_name)) = (cap.get(0), cap.get(1)) else {
			continue;
		};
		let value = match (std::env::var(var_name.as_str()), cap.get(2)) {
			(Ok(v), _) => v,
			(Err(_), Some(default)) => default.as_str().to_string(),
			(Err(_), None) => {
				return Err(ConfigError::Validation(format!(
					"Environment variable '{}' not found",
					var_name.as_str()
				)));
			},
		};

		result.push_str(&input[last_end..full_match.start()]);
		result.push_str(&value);
		last_end = full_match.end();
	}
	result.push_str(&input[last_end..]);

	Ok(result)
}

impl Config {
	/// Loads configuration from a file, resolving environment variables.
	pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let content = tokio::fs::read_to_string(path.as_ref()).await?;
		content.parse()
	}

	/// Returns the EIP-712 domain described by this configuration.
	pub fn domain(&self) -> Domain {
		self.domain.to_domain()
	}

	/// Validates cross-field constraints serde cannot express.
	fn validate(&self) -> Result<(), ConfigError> {
		if self.domain.name.is_empty() {
			return Err(ConfigError::Validation(
				"Domain name cannot be empty".into(),
			));
		}
		if self.domain.version.is_empty() {
			return Err(ConfigError::Validation(
				"Domain version cannot be empty".into(),
			));
		}
		if self.domain.chain_id == 0 {
			return Err(ConfigError::Validation(
				"Domain chain_id must be non-zero".into(),
			));
		}
		if self.vault.address.is_zero() {
			return Err(ConfigError::Validation(
				"Vault address cannot be the zero address".into(),
			));
		}
		if self.authorizer.address.is_zero() {
			return Err(ConfigError::Validation(
				"Authorizer address cannot be the zero address".into(),
			));
		}

		if self.storage.implementations.is_empty() {
			return Err(ConfigError::Validation(
				"At least one storage implementation must be configured".into(),
			));
		}
		if !self
			.storage
			.implementations
			.contains_key(&self.storage.primary)
		{
			return Err(ConfigError::Validation(format!(
				"Primary storage '{}' not found in implementations",
				self.storage.primary
			)));
		}

		if let Some(account) = &self.account {
			if !account.implementations.contains_key(&account.primary) {
				return Err(ConfigError::Validation(format!(
					"Primary account '{}' not found in implementations",
					account.primary
				)));
			}
		}

		Ok(())
	}
}

/// Parses TOML, resolving environment variables first and validating after.
impl FromStr for Config {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let resolved = resolve_env_vars(s)?;
		let config: Config = toml::from_str(&resolved)?;
		config.validate()?;
		Ok(config)
	}
}
