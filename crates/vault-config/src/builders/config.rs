//! Configuration builder for test and development configurations.

use crate::{AccountConfig, AuthorizerConfig, Config, DomainConfig, StorageConfig, VaultConfig};
use std::collections::HashMap;
use vault_types::{Address, InsufficientFundsPolicy};

/// Builder for creating `Config` instances with a fluent API.
///
/// Defaults describe a local development chain with in-memory storage.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
	vault_address: Address,
	policy: InsufficientFundsPolicy,
	domain_name: String,
	domain_version: String,
	chain_id: u64,
	verifying_contract: Address,
	authorizer: Address,
	storage_primary: String,
	storage_implementations: HashMap<String, toml::Value>,
	nonce_retention_seconds: u64,
	account: Option<AccountConfig>,
}

impl Default for ConfigBuilder {
	fn default() -> Self {
		Self::new()
	}
}

impl ConfigBuilder {
	pub fn new() -> Self {
		let mut storage_implementations = HashMap::new();
		storage_implementations.insert(
			"memory".to_string(),
			toml::Value::Table(toml::map::Map::new()),
		);

		Self {
			vault_address: Address::repeat_byte(0x11),
			policy: InsufficientFundsPolicy::default(),
			domain_name: "SecureVaultAuth".to_string(),
			domain_version: "1".to_string(),
			chain_id: 31337,
			verifying_contract: Address::repeat_byte(0x22),
			authorizer: Address::repeat_byte(0x33),
			storage_primary: "memory".to_string(),
			storage_implementations,
			nonce_retention_seconds: 3600,
			account: None,
		}
	}

	pub fn vault_address(mut self, address: Address) -> Self {
		self.vault_address = address;
		self
	}

	pub fn insufficient_funds_policy(mut self, policy: InsufficientFundsPolicy) -> Self {
		self.policy = policy;
		self
	}

	pub fn chain_id(mut self, chain_id: u64) -> Self {
		self.chain_id = chain_id;
		self
	}

	pub fn verifying_contract(mut self, address: Address) -> Self {
		self.verifying_contract = address;
		self
	}

	pub fn authorizer(mut self, address: Address) -> Self {
		self.authorizer = address;
		self
	}

	/// Selects the primary storage backend and its settings.
	pub fn storage(mut self, primary: impl Into<String>, config: toml::Value) -> Self {
		let primary = primary.into();
		self.storage_implementations.insert(primary.clone(), config);
		self.storage_primary = primary;
		self
	}

	pub fn nonce_retention_seconds(mut self, seconds: u64) -> Self {
		self.nonce_retention_seconds = seconds;
		self
	}

	/// Configures a local signing account from a hex private key.
	pub fn local_account(mut self, private_key: &str) -> Self {
		let mut table = toml::map::Map::new();
		table.insert(
			"private_key".to_string(),
			toml::Value::String(private_key.to_string()),
		);
		let mut implementations = HashMap::new();
		implementations.insert("local".to_string(), toml::Value::Table(table));

		self.account = Some(AccountConfig {
			primary: "local".to_string(),
			implementations,
		});
		self
	}

	pub fn build(self) -> Config {
		Config {
			vault: VaultConfig {
				address: self.vault_address,
				insufficient_funds_policy: self.policy,
			},
			domain: DomainConfig {
				name: self.domain_name,
				version: self.domain_version,
				chain_id: self.chain_id,
				verifying_contract: self.verifying_contract,
			},
			authorizer: AuthorizerConfig {
				address: self.authorizer,
			},
			storage: StorageConfig {
				primary: self.storage_primary,
				implementations: self.storage_implementations,
				nonce_retention_seconds: self.nonce_retention_seconds,
			},
			account: self.account,
		}
	}
}
