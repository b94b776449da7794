//! Storage module for the vault system.
//!
//! This module provides the key-value abstraction behind the two pieces of
//! persistent vault state: the set of consumed nonces and the balance ledger.
//! Backends are pluggable (in-memory, file-based) and selected by name from
//! configuration.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use vault_types::{ConfigSchema, ImplementationRegistry};

/// Re-export implementations
pub mod implementations {
	pub mod file;
	pub mod memory;
}

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
	/// Error that occurs when a requested item is not found.
	#[error("Not found")]
	NotFound,
	/// Error that occurs during serialization/deserialization.
	#[error("Serialization error: {0}")]
	Serialization(String),
	/// Error that occurs in the storage backend.
	#[error("Backend error: {0}")]
	Backend(String),
	/// Error that occurs during configuration validation.
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// Guard for a storage-wide critical section.
///
/// Dropping the guard releases the lock.
pub struct StorageLock {
	_guard: Option<Box<dyn Send + Sync>>,
}

impl StorageLock {
	/// A guard that holds nothing, for backends that are never shared
	/// between processes.
	pub fn unlocked() -> Self {
		Self { _guard: None }
	}

	pub fn new<G: Send + Sync + 'static>(guard: G) -> Self {
		Self {
			_guard: Some(Box::new(guard)),
		}
	}
}

/// Trait defining the low-level interface for storage backends.
///
/// Backends provide byte-level key-value operations. `set_bytes_if_absent`
/// must be atomic: of any number of concurrent callers racing on the same
/// key, exactly one observes `true`.
#[async_trait]
pub trait StorageInterface: Send + Sync {
	/// Retrieves raw bytes for the given key.
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError>;

	/// Stores raw bytes, overwriting any value.
	async fn set_bytes(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError>;

	/// Stores raw bytes only if no value exists under `key`.
	///
	/// Returns `true` if the value was written, `false` if the key was taken.
	async fn set_bytes_if_absent(&self, key: &str, value: Vec<u8>) -> Result<bool, StorageError>;

	/// Deletes the value associated with the given key.
	async fn delete(&self, key: &str) -> Result<(), StorageError>;

	/// Checks if a value exists for the key.
	async fn exists(&self, key: &str) -> Result<bool, StorageError>;

	/// Lists all stored keys starting with `prefix`.
	async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

	/// Acquires the exclusive lock called `name`.
	///
	/// Backends whose data can be opened by several processes at once must
	/// make the lock exclusive across those processes.
	async fn lock(&self, _name: &str) -> Result<StorageLock, StorageError> {
		Ok(StorageLock::unlocked())
	}

	/// Returns the configuration schema for validation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;
}

/// Type alias for storage factory functions.
pub type StorageFactory = fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>;

/// Registry trait for storage implementations.
pub trait StorageRegistry: ImplementationRegistry<Factory = StorageFactory> {}

/// Get all registered storage implementations as (name, factory) pairs.
pub fn get_all_implementations() -> Vec<(&'static str, StorageFactory)> {
	use implementations::{file, memory};

	vec![
		(file::Registry::NAME, file::Registry::factory()),
		(memory::Registry::NAME, memory::Registry::factory()),
	]
}

/// High-level storage service that provides typed operations.
///
/// Values are serialized to JSON and stored under `namespace:id` keys.
pub struct StorageService {
	/// The underlying storage backend implementation.
	backend: Box<dyn StorageInterface>,
}

impl StorageService {
	/// Creates a new StorageService with the specified backend.
	pub fn new(backend: Box<dyn StorageInterface>) -> Self {
		Self { backend }
	}

	fn key(namespace: &str, id: &str) -> String {
		format!("{}:{}", namespace, id)
	}

	fn encode<T: Serialize>(data: &T) -> Result<Vec<u8>, StorageError> {
		serde_json::to_vec(data).map_err(|e| StorageError::Serialization(e.to_string()))
	}

	/// Stores a serializable value, overwriting any previous one.
	pub async fn store<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
	) -> Result<(), StorageError> {
		let bytes = Self::encode(data)?;
		self.backend.set_bytes(&Self::key(namespace, id), bytes).await
	}

	/// Stores a value only if the key is not already taken.
	///
	/// Returns `true` if this call inserted the value.
	pub async fn insert_if_absent<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
	) -> Result<bool, StorageError> {
		let bytes = Self::encode(data)?;
		self.backend
			.set_bytes_if_absent(&Self::key(namespace, id), bytes)
			.await
	}

	/// Retrieves and deserializes a value from storage.
	pub async fn retrieve<T: DeserializeOwned>(
		&self,
		namespace: &str,
		id: &str,
	) -> Result<T, StorageError> {
		let bytes = self.backend.get_bytes(&Self::key(namespace, id)).await?;
		serde_json::from_slice(&bytes).map_err(|e| StorageError::Serialization(e.to_string()))
	}

	/// Like [`StorageService::retrieve`], mapping `NotFound` to `None`.
	pub async fn retrieve_optional<T: DeserializeOwned>(
		&self,
		namespace: &str,
		id: &str,
	) -> Result<Option<T>, StorageError> {
		match self.retrieve(namespace, id).await {
			Ok(value) => Ok(Some(value)),
			Err(StorageError::NotFound) => Ok(None),
			Err(e) => Err(e),
		}
	}

	/// Removes a value from storage.
	pub async fn remove(&self, namespace: &str, id: &str) -> Result<(), StorageError> {
		self.backend.delete(&Self::key(namespace, id)).await
	}

	/// Checks if a value exists in storage.
	pub async fn exists(&self, namespace: &str, id: &str) -> Result<bool, StorageError> {
		self.backend.exists(&Self::key(namespace, id)).await
	}

	/// Ids in `namespace` that start with `id_prefix`.
	pub async fn list_ids(
		&self,
		namespace: &str,
		id_prefix: &str,
	) -> Result<Vec<String>, StorageError> {
		let prefix = Self::key(namespace, id_prefix);
		let keys = self.backend.list_keys(&prefix).await?;
		Ok(keys
			.into_iter()
			.filter_map(|key| {
				key.strip_prefix(namespace)
					.and_then(|rest| rest.strip_prefix(':'))
					.map(str::to_string)
			})
			.collect())
	}

	/// Locks `namespace` for a read-modify-write sequence.
	pub async fn lock(&self, namespace: &str) -> Result<StorageLock, StorageError> {
		self.backend.lock(namespace).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use implementations::memory::MemoryStorage;
	use serde::Deserialize;

	#[derive(Debug, PartialEq, Serialize, Deserialize)]
	struct Record {
		deadline: u64,
	}

	#[tokio::test]
	async fn test_typed_round_trip() {
		let service = StorageService::new(Box::new(MemoryStorage::new()));
		service
			.store("used_nonces", "0xab", &Record { deadline: 7 })
			.await
			.unwrap();

		let record: Record = service.retrieve("used_nonces", "0xab").await.unwrap();
		assert_eq!(record, Record { deadline: 7 });
		assert!(service.exists("used_nonces", "0xab").await.unwrap());
		assert!(!service.exists("balances", "0xab").await.unwrap());
	}

	#[tokio::test]
	async fn test_retrieve_optional() {
		let service = StorageService::new(Box::new(MemoryStorage::new()));
		let missing: Option<Record> = service.retrieve_optional("balances", "x").await.unwrap();
		assert!(missing.is_none());
	}

	#[tokio::test]
	async fn test_insert_if_absent_only_once() {
		let service = StorageService::new(Box::new(MemoryStorage::new()));
		let first = service
			.insert_if_absent("used_nonces", "n", &Record { deadline: 1 })
			.await
			.unwrap();
		let second = service
			.insert_if_absent("used_nonces", "n", &Record { deadline: 2 })
			.await
			.unwrap();

		assert!(first);
		assert!(!second);
		let stored: Record = service.retrieve("used_nonces", "n").await.unwrap();
		assert_eq!(stored.deadline, 1);
	}

	#[tokio::test]
	async fn test_list_ids_strips_namespace() {
		let service = StorageService::new(Box::new(MemoryStorage::new()));
		for id in ["0xaa:0x01", "0xaa:0x02", "0xbb:0x01"] {
			service
				.store("used_nonces", id, &Record { deadline: 1 })
				.await
				.unwrap();
		}
		service
			.store("balances", "0xaa", &Record { deadline: 1 })
			.await
			.unwrap();

		let mut ids = service.list_ids("used_nonces", "0xaa:").await.unwrap();
		ids.sort();
		assert_eq!(ids, vec!["0xaa:0x01", "0xaa:0x02"]);
		assert_eq!(service.list_ids("used_nonces", "").await.unwrap().len(), 3);
	}

	#[test]
	fn test_all_implementations_registered() {
		let names: Vec<_> = get_all_implementations()
			.into_iter()
			.map(|(name, _)| name)
			.collect();
		assert_eq!(names, vec!["file", "memory"]);
	}
}
