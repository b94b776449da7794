//! The vault: a balance that only moves on a valid authorization.
//!
//! A withdrawal runs as one unit under the vault lock:
//! authorize, check balance, consume nonce, transfer. A failure at any
//! step leaves both the nonce set and the ledger as they were, except under
//! [`InsufficientFundsPolicy::Consume`] where an unaffordable authorization
//! is spent on purpose.

use crate::event_bus::EventBus;
use crate::ledger::{BalanceLedger, LedgerError};
use crate::validator::{AuthorizationError, AuthorizationValidator};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use vault_storage::{StorageError, StorageService};
use vault_types::{
	Address, AuthorizationRequest, AuthorizationSignature, InsufficientFundsPolicy,
	SignatureError, VaultEvent, B256, U256,
};

/// Capacity of each vault's event channel.
const EVENT_CAPACITY: usize = 256;

/// Errors returned by vault operations.
#[derive(Debug, Error)]
pub enum VaultError {
	#[error("Malformed signature: {0}")]
	MalformedSignature(SignatureError),
	#[error("Authorization bound to vault {requested}, presented by {caller}")]
	WrongVaultBinding { requested: Address, caller: Address },
	#[error("Signer {0} is not the trusted authorizer")]
	UnauthorizedSigner(Address),
	#[error("Authorization expired at {deadline} (now {now})")]
	Expired { deadline: u64, now: u64 },
	#[error("Nonce {0} already used")]
	NonceAlreadyUsed(B256),
	#[error("Insufficient funds: available {available}, required {required}")]
	InsufficientFunds { available: U256, required: U256 },
	#[error("Invalid amount: {0}")]
	InvalidAmount(String),
	#[error("Storage error: {0}")]
	Storage(#[from] StorageError),
}

impl From<AuthorizationError> for VaultError {
	fn from(err: AuthorizationError) -> Self {
		match err {
			AuthorizationError::MalformedSignature(e) => VaultError::MalformedSignature(e),
			AuthorizationError::WrongVaultBinding { requested, caller } => {
				VaultError::WrongVaultBinding { requested, caller }
			},
			AuthorizationError::UnauthorizedSigner(signer) => VaultError::UnauthorizedSigner(signer),
			AuthorizationError::Expired { deadline, now } => VaultError::Expired { deadline, now },
			AuthorizationError::NonceAlreadyUsed(nonce) => VaultError::NonceAlreadyUsed(nonce),
			AuthorizationError::Storage(e) => VaultError::Storage(e),
		}
	}
}

impl From<LedgerError> for VaultError {
	fn from(err: LedgerError) -> Self {
		match err {
			LedgerError::InsufficientFunds {
				available,
				required,
			} => VaultError::InsufficientFunds {
				available,
				required,
			},
			LedgerError::Overflow => {
				VaultError::InvalidAmount("amount overflows the receiving balance".into())
			},
			LedgerError::Storage(e) => VaultError::Storage(e),
		}
	}
}

/// A custodian that releases funds only against authorizations from its
/// validator's trusted signer.
pub struct Vault {
	address: Address,
	validator: Arc<AuthorizationValidator>,
	ledger: Arc<BalanceLedger>,
	policy: InsufficientFundsPolicy,
	event_bus: EventBus,
	/// Makes each withdrawal and deposit indivisible.
	lock: Mutex<()>,
}

impl Vault {
	/// Creates a vault with its own ledger over `storage`.
	pub fn new(
		address: Address,
		validator: Arc<AuthorizationValidator>,
		storage: Arc<StorageService>,
	) -> Self {
		Self::with_ledger(address, validator, Arc::new(BalanceLedger::new(storage)))
	}

	/// Creates a vault on a ledger that other vaults may share.
	pub fn with_ledger(
		address: Address,
		validator: Arc<AuthorizationValidator>,
		ledger: Arc<BalanceLedger>,
	) -> Self {
		Self {
			address,
			validator,
			ledger,
			policy: InsufficientFundsPolicy::default(),
			event_bus: EventBus::new(EVENT_CAPACITY),
			lock: Mutex::new(()),
		}
	}

	pub fn with_policy(mut self, policy: InsufficientFundsPolicy) -> Self {
		self.policy = policy;
		self
	}

	pub fn address(&self) -> Address {
		self.address
	}

	pub fn policy(&self) -> InsufficientFundsPolicy {
		self.policy
	}

	pub fn validator(&self) -> &Arc<AuthorizationValidator> {
		&self.validator
	}

	/// Subscribes to deposit and withdrawal events.
	pub fn subscribe(&self) -> broadcast::Receiver<VaultEvent> {
		self.event_bus.subscribe()
	}

	fn emit(&self, event: VaultEvent) {
		// No subscribers is fine.
		let _ = self.event_bus.publish(event);
	}

	pub async fn balance(&self) -> Result<U256, VaultError> {
		Ok(self.ledger.balance_of(&self.address).await?)
	}

	/// Balance of any account on this vault's ledger, such as a recipient.
	pub async fn balance_of(&self, account: &Address) -> Result<U256, VaultError> {
		Ok(self.ledger.balance_of(account).await?)
	}

	/// Adds `amount` to the vault and returns the new balance.
	pub async fn deposit(&self, amount: U256) -> Result<U256, VaultError> {
		if amount.is_zero() {
			return Err(VaultError::InvalidAmount("deposit must be non-zero".into()));
		}

		let _guard = self.lock.lock().await;
		let balance = self.ledger.credit(&self.address, amount).await?;

		tracing::info!(vault = %self.address, amount = %amount, balance = %balance, "Deposited");
		self.emit(VaultEvent::Deposited {
			vault: self.address,
			amount,
			balance,
		});
		Ok(balance)
	}

	/// Transfers `amount` to `recipient` if `signature` is the authorizer's
	/// approval of exactly this withdrawal from this vault.
	///
	/// Returns the vault balance after the transfer.
	pub async fn withdraw(
		&self,
		recipient: Address,
		amount: U256,
		nonce: B256,
		deadline: u64,
		signature: &AuthorizationSignature,
	) -> Result<U256, VaultError> {
		if amount.is_zero() {
			return Err(VaultError::InvalidAmount(
				"withdrawal must be non-zero".into(),
			));
		}

		let request = AuthorizationRequest {
			vault: self.address,
			recipient,
			amount,
			nonce,
			deadline,
		};

		let _guard = self.lock.lock().await;

		let authorization = self
			.validator
			.authorize(self.address, &request, signature)
			.await
			.inspect_err(|e| {
				tracing::warn!(vault = %self.address, nonce = %nonce, error = %e, "Withdrawal rejected");
			})?;

		let available = self.ledger.balance_of(&self.address).await?;
		if available < amount {
			if self.policy == InsufficientFundsPolicy::Consume {
				self.validator.consume(authorization).await?;
			}
			tracing::warn!(
				vault = %self.address,
				nonce = %nonce,
				available = %available,
				required = %amount,
				policy = %self.policy,
				"Insufficient funds"
			);
			return Err(VaultError::InsufficientFunds {
				available,
				required: amount,
			});
		}

		let signer = self.validator.consume(authorization).await?;

		let remaining = match self.ledger.transfer(&self.address, &recipient, amount).await {
			Ok(remaining) => remaining,
			Err(e) => {
				if let Err(release_err) = self.validator.release(&nonce).await {
					tracing::error!(
						vault = %self.address,
						nonce = %nonce,
						error = %release_err,
						"Failed to release nonce after transfer failure"
					);
				}
				return Err(e.into());
			},
		};

		tracing::info!(
			vault = %self.address,
			recipient = %recipient,
			amount = %amount,
			signer = %signer,
			"Withdrawn"
		);
		self.emit(VaultEvent::Withdrawn {
			vault: self.address,
			recipient,
			amount,
			nonce,
		});
		Ok(remaining)
	}
}
