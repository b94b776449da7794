//! File-based storage backend.
//!
//! Each key is one file under the base directory, named after the key with
//! path separators escaped. Files start with a fixed header identifying the
//! format. Writes go to a temporary file first and are then published with a
//! rename (overwrite) or a hard link (insert-if-absent), so a reader never
//! observes a half-written value and two writers racing on the same nonce
//! cannot both succeed. Read-modify-write sequences are serialized across
//! processes with `flock`-style lock files.

use crate::{StorageError, StorageFactory, StorageInterface, StorageLock, StorageRegistry};
use async_trait::async_trait;
use fs2::FileExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use vault_types::{ConfigSchema, Field, FieldType, ImplementationRegistry, Schema, ValidationError};

/// Fixed-size file header.
///
/// Binary layout (32 bytes total):
/// - [0-3]: Magic bytes "VLTS"
/// - [4-5]: Version (u16, little-endian)
/// - [6-31]: Reserved
#[derive(Debug, Clone, PartialEq, Eq)]
struct FileHeader {
	version: u16,
}

impl FileHeader {
	const MAGIC: &'static [u8; 4] = b"VLTS";
	const VERSION: u16 = 1;
	const SIZE: usize = 32;

	fn new() -> Self {
		Self {
			version: Self::VERSION,
		}
	}

	fn serialize(&self) -> [u8; Self::SIZE] {
		let mut bytes = [0u8; Self::SIZE];
		bytes[0..4].copy_from_slice(Self::MAGIC);
		bytes[4..6].copy_from_slice(&self.version.to_le_bytes());
		bytes
	}

	fn deserialize(bytes: &[u8]) -> Result<Self, StorageError> {
		if bytes.len() < Self::SIZE {
			return Err(StorageError::Backend("File too small for header".into()));
		}
		if &bytes[0..4] != Self::MAGIC {
			return Err(StorageError::Backend("Unrecognized file format".into()));
		}

		let version = u16::from_le_bytes([bytes[4], bytes[5]]);
		if version > Self::VERSION {
			return Err(StorageError::Backend(format!(
				"Unsupported file version: {}",
				version
			)));
		}

		Ok(Self { version })
	}
}

/// Escapes characters that cannot appear in a file name.
fn encode_key(key: &str) -> String {
	let mut encoded = String::with_capacity(key.len());
	for c in key.chars() {
		match c {
			'%' | '/' | '\\' | ':' => encoded.push_str(&format!("%{:02X}", c as u32)),
			_ => encoded.push(c),
		}
	}
	encoded
}

/// Inverse of [`encode_key`]. `None` for names this backend did not write.
fn decode_key(name: &str) -> Option<String> {
	let mut decoded = String::with_capacity(name.len());
	let mut chars = name.chars();
	while let Some(c) = chars.next() {
		if c == '%' {
			let hex: String = chars.by_ref().take(2).collect();
			let byte = u8::from_str_radix(&hex, 16).ok()?;
			decoded.push(char::from(byte));
		} else {
			decoded.push(c);
		}
	}
	Some(decoded)
}

fn backend_error(e: std::io::Error) -> StorageError {
	StorageError::Backend(e.to_string())
}

/// File-based storage implementation.
pub struct FileStorage {
	/// Base directory path for storing files.
	base_path: PathBuf,
	/// Distinguishes temporary files of concurrent writers.
	tmp_counter: AtomicU64,
}

impl FileStorage {
	pub fn new(base_path: PathBuf) -> Self {
		Self {
			base_path,
			tmp_counter: AtomicU64::new(0),
		}
	}

	/// Converts a storage key to a filesystem-safe path with a .bin extension.
	fn get_file_path(&self, key: &str) -> PathBuf {
		self.base_path.join(format!("{}.bin", encode_key(key)))
	}

	/// Writes header and payload to a fresh temporary file and returns its path.
	async fn write_temp(&self, path: &Path, value: &[u8]) -> Result<PathBuf, StorageError> {
		fs::create_dir_all(&self.base_path)
			.await
			.map_err(backend_error)?;

		let mut file_data = Vec::with_capacity(FileHeader::SIZE + value.len());
		file_data.extend_from_slice(&FileHeader::new().serialize());
		file_data.extend_from_slice(value);

		let seq = self.tmp_counter.fetch_add(1, Ordering::Relaxed);
		let temp_path = path.with_extension(format!("{}.{}.tmp", std::process::id(), seq));
		fs::write(&temp_path, file_data)
			.await
			.map_err(backend_error)?;
		Ok(temp_path)
	}

	/// Reads a file and returns its payload, `None` if missing.
	async fn read_entry(&self, path: &Path) -> Result<Option<Vec<u8>>, StorageError> {
		let data = match fs::read(path).await {
			Ok(data) => data,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
			Err(e) => return Err(backend_error(e)),
		};
		FileHeader::deserialize(&data)?;
		Ok(Some(data[FileHeader::SIZE..].to_vec()))
	}
}

#[async_trait]
impl StorageInterface for FileStorage {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		self.read_entry(&self.get_file_path(key))
			.await?
			.ok_or(StorageError::NotFound)
	}

	async fn set_bytes(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
		let path = self.get_file_path(key);
		let temp_path = self.write_temp(&path, &value).await?;

		fs::rename(&temp_path, &path).await.map_err(backend_error)
	}

	async fn set_bytes_if_absent(&self, key: &str, value: Vec<u8>) -> Result<bool, StorageError> {
		let path = self.get_file_path(key);
		let temp_path = self.write_temp(&path, &value).await?;

		// link(2) fails if the target exists, which makes the insert exclusive
		// even across processes sharing the directory.
		let result = fs::hard_link(&temp_path, &path).await;
		let _ = fs::remove_file(&temp_path).await;
		match result {
			Ok(()) => Ok(true),
			Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
			Err(e) => Err(backend_error(e)),
		}
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		match fs::remove_file(self.get_file_path(key)).await {
			Ok(_) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(backend_error(e)),
		}
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		fs::try_exists(self.get_file_path(key))
			.await
			.map_err(backend_error)
	}

	async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
		let mut entries = match fs::read_dir(&self.base_path).await {
			Ok(entries) => entries,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
			Err(e) => return Err(backend_error(e)),
		};

		let mut keys = Vec::new();
		while let Some(entry) = entries.next_entry().await.map_err(backend_error)? {
			let path = entry.path();
			if path.extension() != Some(std::ffi::OsStr::new("bin")) {
				continue;
			}
			let Some(key) = path
				.file_stem()
				.and_then(|stem| stem.to_str())
				.and_then(decode_key)
			else {
				tracing::debug!("Skipping file {:?}", path);
				continue;
			};
			if key.starts_with(prefix) {
				keys.push(key);
			}
		}
		Ok(keys)
	}

	async fn lock(&self, name: &str) -> Result<StorageLock, StorageError> {
		fs::create_dir_all(&self.base_path)
			.await
			.map_err(|e| StorageError::Backend(format!("Failed to create lock directory: {e}")))?;
		let lock_path = self.base_path.join(format!("{}.lock", encode_key(name)));

		// flock blocks the calling thread.
		let lock_file = tokio::task::spawn_blocking(move || {
			let lock_file = std::fs::OpenOptions::new()
				.create(true)
				.truncate(false)
				.write(true)
				.open(&lock_path)
				.map_err(|e| StorageError::Backend(format!("Failed to open lock file: {e}")))?;
			FileExt::lock_exclusive(&lock_file)
				.map_err(|e| StorageError::Backend(format!("Failed to acquire lock: {e}")))?;
			Ok::<_, StorageError>(lock_file)
		})
		.await
		.map_err(|e| StorageError::Backend(format!("Failed to spawn blocking task: {e}")))??;

		Ok(StorageLock::new(lock_file))
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(FileStorageSchema)
	}
}

/// Configuration schema for FileStorage.
pub struct FileStorageSchema;

impl ConfigSchema for FileStorageSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let optional_fields = vec![Field::new("storage_path", FieldType::String)
			.with_validator(|v| match v.as_str() {
				Some("") => Err("storage_path cannot be empty".to_string()),
				_ => Ok(()),
			})];

		Schema::new(vec![], optional_fields).validate(config)?;

		// Stored balances and nonces must never disappear on their own.
		if let Some(field) = config
			.as_table()
			.and_then(|table| table.keys().find(|key| key.starts_with("ttl_")))
		{
			return Err(ValidationError::InvalidValue {
				field: field.clone(),
				message: "file storage entries do not expire".to_string(),
			});
		}
		Ok(())
	}
}

/// Factory function to create a file storage backend from configuration.
///
/// Configuration parameters:
/// - `storage_path`: Base directory for file storage (default: "./data/vault")
pub fn create_storage(config: &toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> {
	FileStorageSchema
		.validate(config)
		.map_err(|e| StorageError::Configuration(e.to_string()))?;

	let storage_path = config
		.get("storage_path")
		.and_then(|v| v.as_str())
		.unwrap_or("./data/vault");

	Ok(Box::new(FileStorage::new(PathBuf::from(storage_path))))
}

/// Registry for the file storage implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "file";
	type Factory = StorageFactory;

	fn factory() -> Self::Factory {
		create_storage
	}
}

impl StorageRegistry for Registry {}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Arc;
	use std::time::Duration;
	use tempfile::TempDir;

	fn storage(dir: &TempDir) -> FileStorage {
		FileStorage::new(dir.path().to_path_buf())
	}

	#[test]
	fn test_header_layout() {
		let header = FileHeader::new();
		let bytes = header.serialize();
		assert_eq!(&bytes[0..4], b"VLTS");
		assert_eq!(FileHeader::deserialize(&bytes).unwrap(), header);
		assert!(FileHeader::deserialize(&bytes[..10]).is_err());
		assert!(FileHeader::deserialize(&[0u8; 32]).is_err());
	}

	#[test]
	fn test_key_encoding_is_reversible() {
		let key = "used_nonces:0xab:0x%3A/\\";
		let encoded = encode_key(key);
		assert!(!encoded.contains([':', '/', '\\']));
		assert_eq!(decode_key(&encoded).as_deref(), Some(key));
		assert_eq!(decode_key("bad%zz"), None);
	}

	#[tokio::test]
	async fn test_persists_across_instances() {
		let dir = TempDir::new().unwrap();
		storage(&dir)
			.set_bytes("balances:0x01", b"10".to_vec())
			.await
			.unwrap();

		let reopened = storage(&dir);
		assert_eq!(
			reopened.get_bytes("balances:0x01").await.unwrap(),
			b"10".to_vec()
		);
		assert!(reopened.exists("balances:0x01").await.unwrap());
	}

	#[tokio::test]
	async fn test_overwrite_and_delete() {
		let dir = TempDir::new().unwrap();
		let storage = storage(&dir);

		storage.set_bytes("k", b"a".to_vec()).await.unwrap();
		storage.set_bytes("k", b"b".to_vec()).await.unwrap();
		assert_eq!(storage.get_bytes("k").await.unwrap(), b"b".to_vec());

		storage.delete("k").await.unwrap();
		storage.delete("k").await.unwrap();
		assert!(!storage.exists("k").await.unwrap());
		assert!(matches!(
			storage.get_bytes("k").await,
			Err(StorageError::NotFound)
		));
	}

	#[tokio::test]
	async fn test_set_if_absent_is_exclusive() {
		let dir = TempDir::new().unwrap();
		let storage = Arc::new(storage(&dir));

		let mut handles = Vec::new();
		for i in 0..8u8 {
			let storage = Arc::clone(&storage);
			handles.push(tokio::spawn(async move {
				storage
					.set_bytes_if_absent("used_nonces:0xaa", vec![i])
					.await
					.unwrap()
			}));
		}

		let mut winners = 0;
		for handle in handles {
			if handle.await.unwrap() {
				winners += 1;
			}
		}
		assert_eq!(winners, 1);

		// No temporary files are left behind.
		let mut entries = fs::read_dir(dir.path()).await.unwrap();
		let mut count = 0;
		while let Some(entry) = entries.next_entry().await.unwrap() {
			assert_eq!(entry.path().extension().unwrap(), "bin");
			count += 1;
		}
		assert_eq!(count, 1);
	}

	#[tokio::test]
	async fn test_list_keys_skips_foreign_files() {
		let dir = TempDir::new().unwrap();
		let storage = storage(&dir);
		storage.set_bytes("used_nonces:0xaa:0x01", vec![1]).await.unwrap();
		storage.set_bytes("used_nonces:0xbb:0x01", vec![2]).await.unwrap();
		storage.set_bytes("balances:0xaa", vec![3]).await.unwrap();
		let _lock = storage.lock("balances").await.unwrap();
		fs::write(dir.path().join("notes.txt"), b"x").await.unwrap();

		assert_eq!(
			storage.list_keys("used_nonces:0xaa:").await.unwrap(),
			vec!["used_nonces:0xaa:0x01".to_string()]
		);
		assert_eq!(storage.list_keys("").await.unwrap().len(), 3);

		let missing = FileStorage::new(dir.path().join("missing"));
		assert!(missing.list_keys("").await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_lock_excludes_other_instances() {
		let dir = TempDir::new().unwrap();
		let first = storage(&dir);
		let second = Arc::new(storage(&dir));

		let guard = first.lock("balances").await.unwrap();
		let waiter = {
			let second = Arc::clone(&second);
			tokio::spawn(async move { second.lock("balances").await.map(|_| ()) })
		};
		tokio::time::sleep(Duration::from_millis(50)).await;
		assert!(!waiter.is_finished());

		// Other names are independent.
		second.lock("used_nonces").await.unwrap();

		drop(guard);
		tokio::time::timeout(Duration::from_secs(5), waiter)
			.await
			.unwrap()
			.unwrap()
			.unwrap();
	}

	#[test]
	fn test_config_validation() {
		let valid: toml::Value = toml::from_str("storage_path = \"/tmp/vault\"").unwrap();
		assert!(create_storage(&valid).is_ok());
		assert!(create_storage(&toml::Value::Table(Default::default())).is_ok());

		let empty_path: toml::Value = toml::from_str("storage_path = \"\"").unwrap();
		assert!(matches!(
			create_storage(&empty_path),
			Err(StorageError::Configuration(_))
		));

		let wrong_type: toml::Value = toml::from_str("storage_path = 5").unwrap();
		assert!(create_storage(&wrong_type).is_err());
	}

	#[test]
	fn test_rejects_expiring_namespaces() {
		for setting in ["ttl_balances = 1", "ttl_used_nonces = 60"] {
			let config: toml::Value =
				toml::from_str(&format!("storage_path = \"/tmp/vault\"\n{setting}")).unwrap();
			assert!(matches!(
				create_storage(&config),
				Err(StorageError::Configuration(message)) if message.contains("ttl_")
			));
		}
	}
}
