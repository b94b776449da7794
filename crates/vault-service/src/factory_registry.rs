//! Registry of every backend implementation compiled into the binary.
//!
//! Configuration refers to implementations by name; this module maps those
//! names to factory functions and wires them into the vault builder.

use std::collections::HashMap;
use std::sync::OnceLock;
use vault_account::AccountFactory;
use vault_config::Config;
use vault_core::{VaultBuilder, VaultFactories};
use vault_storage::StorageFactory;

/// Registry for all implementation factories.
#[derive(Default)]
pub struct FactoryRegistry {
	pub storage: HashMap<String, StorageFactory>,
	pub account: HashMap<String, AccountFactory>,
}

impl FactoryRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register_storage(&mut self, name: impl Into<String>, factory: StorageFactory) {
		self.storage.insert(name.into(), factory);
	}

	pub fn register_account(&mut self, name: impl Into<String>, factory: AccountFactory) {
		self.account.insert(name.into(), factory);
	}
}

static REGISTRY: OnceLock<FactoryRegistry> = OnceLock::new();

/// Returns the global registry, populating it on first use.
pub fn get_registry() -> &'static FactoryRegistry {
	REGISTRY.get_or_init(|| {
		let mut registry = FactoryRegistry::new();

		for (name, factory) in vault_storage::get_all_implementations() {
			tracing::debug!("Registering storage implementation: {}", name);
			registry.register_storage(name, factory);
		}

		for (name, factory) in vault_account::get_all_implementations() {
			tracing::debug!("Registering account implementation: {}", name);
			registry.register_account(name, factory);
		}

		registry
	})
}

/// Picks the factories named in `implementations` out of `available`.
fn select<F: Copy>(
	available: &HashMap<String, F>,
	implementations: &HashMap<String, toml::Value>,
	kind: &str,
) -> Result<HashMap<String, F>, String> {
	let mut factories = HashMap::new();
	for name in implementations.keys() {
		match available.get(name) {
			Some(factory) => {
				factories.insert(name.clone(), *factory);
			},
			None => {
				let mut known: Vec<_> = available.keys().cloned().collect();
				known.sort();
				return Err(format!(
					"Unknown {} implementation '{}'. Available: [{}]",
					kind,
					name,
					known.join(", ")
				));
			},
		}
	}
	Ok(factories)
}

/// Creates a builder plus the factories its configuration refers to.
pub fn builder_from_config(
	config: Config,
) -> Result<(VaultBuilder, VaultFactories<StorageFactory, AccountFactory>), String> {
	let registry = get_registry();

	let storage_factories = select(&registry.storage, &config.storage.implementations, "storage")?;
	let account_factories = match &config.account {
		Some(account) => select(&registry.account, &account.implementations, "account")?,
		None => HashMap::new(),
	};

	Ok((
		VaultBuilder::new(config),
		VaultFactories {
			storage_factories,
			account_factories,
		},
	))
}
