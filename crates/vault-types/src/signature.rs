//! Compact secp256k1 signatures and signer recovery.
//!
//! A signature is the 65-byte `r || s || v` encoding produced by Ethereum
//! wallets. Recovery enforces the same malleability rules as on-chain ECDSA
//! verifiers: non-zero components, `r` below the curve order, `s` in the lower
//! half of the curve order and a recovery id of 0/1 or 27/28. Anything else is
//! reported as a [`SignatureError`], never as a wrong-signer outcome.

use crate::utils::formatting::{with_0x_prefix, without_0x_prefix};
use alloy_primitives::{uint, Address, Signature as PrimitiveSignature, B256, U256};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Order of the secp256k1 group.
pub const SECP256K1_N: U256 =
	uint!(0xFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFEBAAEDCE6AF48A03BBFD25E8CD0364141_U256);
/// Largest `s` accepted, `n / 2`.
pub const SECP256K1_HALF_N: U256 =
	uint!(0x7FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFF5D576E7357A4501DDFE92F46681B20A0_U256);

/// Reasons a signature cannot be used for recovery.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
	#[error("Signature must be {expected} bytes, got {actual}", expected = AuthorizationSignature::LENGTH)]
	InvalidLength { actual: usize },
	#[error("Invalid hex encoding: {0}")]
	InvalidHex(String),
	#[error("Invalid recovery id: {0}")]
	InvalidRecoveryId(u8),
	#[error("Signature component {0} is zero")]
	ZeroComponent(&'static str),
	#[error("Signature r value is not below the curve order")]
	ROutOfRange,
	#[error("Signature s value is in the upper half of the curve order")]
	HighS,
	#[error("Signer recovery failed: {0}")]
	Recovery(String),
}

/// A compact ECDSA signature over an authorization digest.
///
/// Carries no identity on its own; [`AuthorizationSignature::recover`]
/// derives the signer from the signature and the signed digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct AuthorizationSignature {
	r: B256,
	s: B256,
	v: u8,
}

impl AuthorizationSignature {
	/// Encoded length in bytes.
	pub const LENGTH: usize = 65;

	pub fn new(r: B256, s: B256, v: u8) -> Self {
		Self { r, s, v }
	}

	/// Splits a 65-byte `r || s || v` encoding. Only the length is checked here.
	pub fn from_bytes(bytes: &[u8]) -> Result<Self, SignatureError> {
		if bytes.len() != Self::LENGTH {
			return Err(SignatureError::InvalidLength {
				actual: bytes.len(),
			});
		}
		Ok(Self {
			r: B256::from_slice(&bytes[..32]),
			s: B256::from_slice(&bytes[32..64]),
			v: bytes[64],
		})
	}

	pub fn to_bytes(&self) -> [u8; Self::LENGTH] {
		let mut out = [0u8; Self::LENGTH];
		out[..32].copy_from_slice(self.r.as_slice());
		out[32..64].copy_from_slice(self.s.as_slice());
		out[64] = self.v;
		out
	}

	pub fn r(&self) -> B256 {
		self.r
	}

	pub fn s(&self) -> B256 {
		self.s
	}

	pub fn v(&self) -> u8 {
		self.v
	}

	/// Maps the recovery id to the y-parity bit.
	pub fn y_parity(&self) -> Result<bool, SignatureError> {
		match self.v {
			0 | 27 => Ok(false),
			1 | 28 => Ok(true),
			other => Err(SignatureError::InvalidRecoveryId(other)),
		}
	}

	/// Recovers the address that produced this signature over `digest`.
	pub fn recover(&self, digest: &B256) -> Result<Address, SignatureError> {
		let y_parity = self.y_parity()?;
		let r = U256::from_be_slice(self.r.as_slice());
		let s = U256::from_be_slice(self.s.as_slice());

		if r.is_zero() {
			return Err(SignatureError::ZeroComponent("r"));
		}
		if s.is_zero() {
			return Err(SignatureError::ZeroComponent("s"));
		}
		if r >= SECP256K1_N {
			return Err(SignatureError::ROutOfRange);
		}
		if s > SECP256K1_HALF_N {
			return Err(SignatureError::HighS);
		}

		PrimitiveSignature::new(r, s, y_parity)
			.recover_address_from_prehash(digest)
			.map_err(|e| SignatureError::Recovery(e.to_string()))
	}
}

impl From<PrimitiveSignature> for AuthorizationSignature {
	fn from(sig: PrimitiveSignature) -> Self {
		Self {
			r: B256::from(sig.r().to_be_bytes::<32>()),
			s: B256::from(sig.s().to_be_bytes::<32>()),
			v: 27 + u8::from(sig.v()),
		}
	}
}

impl FromStr for AuthorizationSignature {
	type Err = SignatureError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let bytes = hex::decode(without_0x_prefix(s.trim()))
			.map_err(|e| SignatureError::InvalidHex(e.to_string()))?;
		Self::from_bytes(&bytes)
	}
}

impl fmt::Display for AuthorizationSignature {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", with_0x_prefix(&hex::encode(self.to_bytes())))
	}
}

impl fmt::Debug for AuthorizationSignature {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("AuthorizationSignature")
			.field("r", &self.r)
			.field("s", &self.s)
			.field("v", &self.v)
			.finish()
	}
}

impl Serialize for AuthorizationSignature {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_str(&self.to_string())
	}
}

impl<'de> Deserialize<'de> for AuthorizationSignature {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		let s = String::deserialize(deserializer)?;
		s.parse().map_err(serde::de::Error::custom)
	}
}
