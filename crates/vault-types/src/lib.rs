//! Common types for the signed-withdrawal vault.
//!
//! This crate holds the data shared by every other crate in the workspace:
//! the EIP-712 domain and authorization records, compact signatures, vault
//! events, storage keys and the configuration validation framework.

/// Domain and authorization request types with their EIP-712 encoding.
pub mod authorization;
/// Vault events for external observers.
pub mod events;
/// Configurable withdrawal policies.
pub mod policy;
/// Registry trait for named, factory-built implementations.
pub mod registry;
/// Redacting wrapper for secrets such as signer keys.
pub mod secret_string;
/// Compact secp256k1 signatures and signer recovery.
pub mod signature;
/// Storage keys and persisted record shapes.
pub mod storage;
/// Utility functions for hashing, hex handling and time.
pub mod utils;
/// Configuration validation types.
pub mod validation;

pub use alloy_primitives::{Address, B256, U256};
pub use authorization::{Authorization, AuthorizationRequest, Domain};
pub use events::VaultEvent;
pub use policy::InsufficientFundsPolicy;
pub use registry::ImplementationRegistry;
pub use secret_string::SecretString;
pub use signature::{AuthorizationSignature, SignatureError};
pub use storage::{StorageKey, UsedNonceRecord};
pub use utils::{current_timestamp, truncate_id, with_0x_prefix, without_0x_prefix};
pub use validation::*;
