//! Withdrawal policies selectable through configuration.

use serde::{Deserialize, Serialize};
use std::fmt;

/// What happens to an authorization's nonce when the vault cannot cover it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsufficientFundsPolicy {
	/// The nonce stays unused and the same authorization may succeed after a
	/// later deposit.
	#[default]
	Refund,
	/// The nonce is consumed; the authorization is spent even though no funds
	/// moved.
	Consume,
}

impl fmt::Display for InsufficientFundsPolicy {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Refund => write!(f, "refund"),
			Self::Consume => write!(f, "consume"),
		}
	}
}
