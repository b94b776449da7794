//! Utility functions shared across the vault crates.
//!
//! This module provides the EIP-712 hashing primitives plus small helpers for
//! hex formatting and time used by logging and the CLI.

pub mod eip712;
pub mod formatting;
pub mod helpers;

pub use eip712::{
	compute_domain_hash, compute_final_digest, Eip712AbiEncoder, AUTHORIZATION_TYPE, DOMAIN_TYPE,
};
pub use formatting::{truncate_id, with_0x_prefix, without_0x_prefix};
pub use helpers::current_timestamp;
