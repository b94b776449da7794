//! Builder for assembling a vault from configuration.
//!
//! Storage and account backends are created through named factory functions,
//! so the binary decides which implementations exist and the configuration
//! decides which one is primary.

use crate::clock::{Clock, SystemClock};
use crate::validator::AuthorizationValidator;
use crate::vault::Vault;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use vault_account::{AccountError, AccountInterface, AccountService};
use vault_config::Config;
use vault_storage::{StorageError, StorageInterface, StorageService};

/// Errors that can occur while assembling a vault.
#[derive(Debug, Error)]
pub enum BuilderError {
	#[error("Configuration error: {0}")]
	Config(String),
	#[error("Missing required component: {0}")]
	MissingComponent(String),
}

/// Factory functions for each pluggable component, keyed by implementation name.
pub struct VaultFactories<SF, AF> {
	pub storage_factories: HashMap<String, SF>,
	pub account_factories: HashMap<String, AF>,
}

/// Builds a [`Vault`] and, on request, the signing account described by a [`Config`].
pub struct VaultBuilder {
	config: Config,
	clock: Arc<dyn Clock>,
}

impl VaultBuilder {
	pub fn new(config: Config) -> Self {
		Self {
			config,
			clock: Arc::new(SystemClock),
		}
	}

	/// Overrides the validator's time source.
	pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
		self.clock = clock;
		self
	}

	pub fn config(&self) -> &Config {
		&self.config
	}

	/// Creates the primary storage backend.
	pub fn build_storage<SF, AF>(
		&self,
		factories: &VaultFactories<SF, AF>,
	) -> Result<Arc<StorageService>, BuilderError>
	where
		SF: Fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>,
	{
		let primary = &self.config.storage.primary;
		let config = self
			.config
			.storage
			.implementations
			.get(primary)
			.ok_or_else(|| {
				BuilderError::Config(format!(
					"Primary storage '{}' not found in implementations",
					primary
				))
			})?;
		let factory = factories.storage_factories.get(primary).ok_or_else(|| {
			BuilderError::MissingComponent(format!("storage implementation '{}'", primary))
		})?;

		let backend = factory(config).map_err(|e| {
			tracing::error!(
				component = "storage",
				implementation = %primary,
				error = %e,
				"Failed to create storage implementation"
			);
			BuilderError::Config(format!(
				"Failed to create storage implementation '{}': {}",
				primary, e
			))
		})?;
		tracing::info!(component = "storage", implementation = %primary, "Loaded");

		Ok(Arc::new(StorageService::new(backend)))
	}

	/// Creates the validator and vault over the primary storage backend.
	pub fn build<SF, AF>(&self, factories: &VaultFactories<SF, AF>) -> Result<Vault, BuilderError>
	where
		SF: Fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>,
	{
		let storage = self.build_storage(factories)?;
		let domain = self.config.domain();

		let validator = AuthorizationValidator::new(
			domain,
			self.config.vault.address,
			self.config.authorizer.address,
			storage.clone(),
		)
		.with_clock(self.clock.clone())
		.with_nonce_retention(Duration::from_secs(
			self.config.storage.nonce_retention_seconds,
		));

		tracing::info!(
			vault = %self.config.vault.address,
			authorizer = %self.config.authorizer.address,
			chain_id = self.config.domain.chain_id,
			domain_separator = %validator.domain_separator(),
			policy = %self.config.vault.insufficient_funds_policy,
			"Vault initialized"
		);

		Ok(
			Vault::new(self.config.vault.address, Arc::new(validator), storage)
				.with_policy(self.config.vault.insufficient_funds_policy),
		)
	}

	/// Creates the signing account from the `[account]` section.
	pub async fn build_account<SF, AF>(
		&self,
		factories: &VaultFactories<SF, AF>,
	) -> Result<AccountService, BuilderError>
	where
		AF: Fn(&toml::Value) -> Result<Box<dyn AccountInterface>, AccountError>,
	{
		let account = self
			.config
			.account
			.as_ref()
			.ok_or_else(|| BuilderError::MissingComponent("[account] section".into()))?;
		let primary = &account.primary;
		let config = account.implementations.get(primary).ok_or_else(|| {
			BuilderError::Config(format!(
				"Primary account '{}' not found in implementations",
				primary
			))
		})?;
		let factory = factories.account_factories.get(primary).ok_or_else(|| {
			BuilderError::MissingComponent(format!("account implementation '{}'", primary))
		})?;

		let implementation = factory(config).map_err(|e| {
			BuilderError::Config(format!(
				"Failed to create account implementation '{}': {}",
				primary, e
			))
		})?;
		let service = AccountService::new(implementation);

		let address = service
			.get_address()
			.await
			.map_err(|e| BuilderError::Config(format!("Failed to get account address: {}", e)))?;
		if address != self.config.authorizer.address {
			tracing::warn!(
				account = %address,
				authorizer = %self.config.authorizer.address,
				"Signing account is not the configured authorizer"
			);
		}
		tracing::info!(component = "account", implementation = %primary, address = %address, "Loaded");

		Ok(service)
	}
}
