//! Shared fixtures for unit tests.

use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use std::sync::Arc;
use vault_storage::{implementations::memory::MemoryStorage, StorageService};
use vault_types::{AuthorizationSignature, B256};

/// Fixed "current" time used with `ManualClock`.
pub const NOW: u64 = 1_700_000_000;
/// A deadline one hour after `NOW`.
pub const DEADLINE: u64 = NOW + 3600;

pub fn signer(seed: u8) -> PrivateKeySigner {
	PrivateKeySigner::from_bytes(&B256::repeat_byte(seed)).unwrap()
}

pub fn authorizer() -> PrivateKeySigner {
	signer(0x42)
}

pub fn sign(signer: &PrivateKeySigner, digest: &B256) -> AuthorizationSignature {
	signer.sign_hash_sync(digest).unwrap().into()
}

pub fn storage() -> Arc<StorageService> {
	Arc::new(StorageService::new(Box::new(MemoryStorage::new())))
}
