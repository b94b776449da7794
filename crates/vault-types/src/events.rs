//! Event types published by a vault.
//!
//! Events flow through the vault's broadcast bus so that monitoring can react
//! to deposits and withdrawals without polling storage. Transport beyond the
//! in-process bus is left to subscribers.

use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

/// Notifications emitted after a state-mutating vault operation succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VaultEvent {
	/// Funds were added to the vault.
	Deposited {
		vault: Address,
		amount: U256,
		/// Vault balance after the deposit.
		balance: U256,
	},
	/// An authorized withdrawal moved funds to `recipient`.
	Withdrawn {
		vault: Address,
		recipient: Address,
		amount: U256,
		nonce: B256,
	},
}

impl VaultEvent {
	/// Address of the vault that emitted the event.
	pub fn vault(&self) -> Address {
		match self {
			VaultEvent::Deposited { vault, .. } | VaultEvent::Withdrawn { vault, .. } => *vault,
		}
	}
}
