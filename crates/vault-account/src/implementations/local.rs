//! Local private key wallet.

use crate::{AccountError, AccountFactory, AccountInterface, AccountRegistry};
use alloy_signer::Signer;
use alloy_signer_local::PrivateKeySigner;
use async_trait::async_trait;
use vault_types::{
	without_0x_prefix, Address, AuthorizationSignature, ConfigSchema, Field, FieldType,
	ImplementationRegistry, Schema, SecretString, ValidationError, B256,
};

/// Wallet that keeps the authorizer key in process memory.
///
/// Suitable for development and for operators that load the key from an
/// environment variable through configuration substitution.
#[derive(Debug)]
pub struct LocalWallet {
	signer: PrivateKeySigner,
}

impl LocalWallet {
	/// Creates a wallet from a hex-encoded private key (with or without 0x).
	pub fn new(private_key: &SecretString) -> Result<Self, AccountError> {
		let signer = private_key.with_exposed(|key| {
			key.parse::<PrivateKeySigner>()
				.map_err(|e| AccountError::InvalidKey(format!("Invalid private key: {}", e)))
		})?;

		Ok(Self { signer })
	}
}

fn validate_private_key(value: &toml::Value) -> Result<(), String> {
	let key = value
		.as_str()
		.ok_or_else(|| "Expected string value for private_key".to_string())?;
	let key = without_0x_prefix(key);

	if key.len() != 64 {
		return Err("Private key must be 64 hex characters (32 bytes)".to_string());
	}
	if hex::decode(key).is_err() {
		return Err("Private key must be valid hexadecimal".to_string());
	}
	Ok(())
}

/// Configuration schema for LocalWallet.
pub struct LocalWalletSchema;

impl ConfigSchema for LocalWalletSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		Schema::new(
			vec![Field::new("private_key", FieldType::String).with_validator(validate_private_key)],
			vec![],
		)
		.validate(config)
	}
}

#[async_trait]
impl AccountInterface for LocalWallet {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(LocalWalletSchema)
	}

	async fn address(&self) -> Result<Address, AccountError> {
		Ok(self.signer.address())
	}

	async fn sign_digest(&self, digest: &B256) -> Result<AuthorizationSignature, AccountError> {
		let signature = self
			.signer
			.sign_hash(digest)
			.await
			.map_err(|e| AccountError::SigningFailed(e.to_string()))?;

		Ok(signature.into())
	}
}

/// Factory function to create a local wallet from configuration.
///
/// Configuration parameters:
/// - `private_key`: hex-encoded secp256k1 key (required)
pub fn create_account(config: &toml::Value) -> Result<Box<dyn AccountInterface>, AccountError> {
	LocalWalletSchema
		.validate(config)
		.map_err(|e| AccountError::InvalidKey(format!("Invalid configuration: {}", e)))?;

	let private_key = config
		.get("private_key")
		.and_then(|v| v.as_str())
		.map(SecretString::from)
		.ok_or_else(|| AccountError::InvalidKey("private_key is missing".to_string()))?;

	Ok(Box::new(LocalWallet::new(&private_key)?))
}

/// Registry for the local account implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "local";
	type Factory = AccountFactory;

	fn factory() -> Self::Factory {
		create_account
	}
}

impl AccountRegistry for Registry {}
