//! Storage keys and persisted record shapes.

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Storage namespaces for the two pieces of persistent state.
///
/// Typed variants instead of string literals keep every reader and writer on
/// the same key layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKey {
	/// Consumed authorization nonces, keyed by nonce hex.
	UsedNonces,
	/// Ledger balances, keyed by account address.
	Balances,
}

impl StorageKey {
	/// Returns the string representation of the storage key.
	pub fn as_str(&self) -> &'static str {
		match self {
			StorageKey::UsedNonces => "used_nonces",
			StorageKey::Balances => "balances",
		}
	}

	/// Returns an iterator over all StorageKey variants.
	pub fn all() -> impl Iterator<Item = Self> {
		[Self::UsedNonces, Self::Balances].into_iter()
	}
}

impl FromStr for StorageKey {
	type Err = ();

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"used_nonces" => Ok(Self::UsedNonces),
			"balances" => Ok(Self::Balances),
			_ => Err(()),
		}
	}
}

impl From<StorageKey> for &'static str {
	fn from(key: StorageKey) -> Self {
		key.as_str()
	}
}

/// Marker stored for every consumed nonce.
///
/// The deadline is kept so spent records can be pruned once the
/// authorization could no longer verify anyway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsedNonceRecord {
	/// Deadline of the authorization that consumed the nonce.
	pub deadline: u64,
	/// Unix timestamp of consumption.
	pub consumed_at: u64,
	/// Recovered signer of the consuming authorization.
	pub signer: Address,
}
