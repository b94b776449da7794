//! Domain and authorization request types.
//!
//! An authorization is signed off-line over the EIP-712 digest of
//! `(Domain, AuthorizationRequest)`. The hand-rolled encoding here is the
//! canonical one; the `sol!` struct exists so callers holding an
//! `alloy_sol_types::Eip712Domain` can hash the same record through alloy.

use crate::utils::eip712::{
	compute_domain_hash, compute_final_digest, Eip712AbiEncoder, AUTHORIZATION_TYPE,
};
use alloy_primitives::{keccak256, Address, B256, U256};
use alloy_sol_types::{sol, Eip712Domain};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

sol! {
	/// Withdrawal authorization as seen by EIP-712 wallets.
	#[derive(Debug, PartialEq, Eq)]
	struct Authorization {
		address vault;
		address recipient;
		uint256 amount;
		bytes32 nonce;
		uint256 deadline;
	}
}

/// Deployment context mixed into every digest.
///
/// Two validators that differ in any field produce disjoint digests, so a
/// signature minted for one can never verify against the other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Domain {
	pub name: String,
	pub version: String,
	pub chain_id: u64,
	pub verifying_contract: Address,
}

impl Domain {
	pub fn new(
		name: impl Into<String>,
		version: impl Into<String>,
		chain_id: u64,
		verifying_contract: Address,
	) -> Self {
		Self {
			name: name.into(),
			version: version.into(),
			chain_id,
			verifying_contract,
		}
	}

	/// Computes the domain separator hash.
	pub fn separator(&self) -> B256 {
		compute_domain_hash(
			&self.name,
			&self.version,
			self.chain_id,
			&self.verifying_contract,
		)
	}

	/// Converts to alloy's domain representation.
	pub fn to_eip712(&self) -> Eip712Domain {
		Eip712Domain::new(
			Some(Cow::Owned(self.name.clone())),
			Some(Cow::Owned(self.version.clone())),
			Some(U256::from(self.chain_id)),
			Some(self.verifying_contract),
			None,
		)
	}
}

/// The record an authorizer signs to release `amount` from `vault` to `recipient`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationRequest {
	/// Vault the approval targets.
	pub vault: Address,
	/// Receiver of the funds.
	pub recipient: Address,
	/// Amount to transfer, must be non-zero.
	pub amount: U256,
	/// Single-use token chosen by the requester.
	pub nonce: B256,
	/// Unix timestamp (seconds) after which the record is invalid.
	pub deadline: u64,
}

impl AuthorizationRequest {
	/// Convert to the EIP-712 struct.
	pub fn to_eip712(&self) -> Authorization {
		Authorization {
			vault: self.vault,
			recipient: self.recipient,
			amount: self.amount,
			nonce: self.nonce,
			deadline: U256::from(self.deadline),
		}
	}

	/// Compute the EIP-712 struct hash.
	pub fn struct_hash(&self) -> B256 {
		let mut enc = Eip712AbiEncoder::new();
		enc.push_b256(&keccak256(AUTHORIZATION_TYPE.as_bytes()));
		enc.push_address(&self.vault);
		enc.push_address(&self.recipient);
		enc.push_u256(self.amount);
		enc.push_b256(&self.nonce);
		enc.push_u64(self.deadline);
		keccak256(enc.finish())
	}

	/// Compute the digest the authorizer signs under `domain`.
	pub fn signing_hash(&self, domain: &Domain) -> B256 {
		compute_final_digest(&domain.separator(), &self.struct_hash())
	}
}
