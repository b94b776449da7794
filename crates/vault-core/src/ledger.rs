//! Balance ledger over the storage service.
//!
//! Balances live under `balances:<address>` as JSON-encoded `U256` values.
//! Absent entries read as zero. Every read-modify-write runs under the
//! ledger's lock and the storage lock on the `balances` namespace, so neither
//! vaults sharing one ledger nor processes sharing one storage directory lose
//! an update.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};
use vault_storage::{StorageError, StorageLock, StorageService};
use vault_types::{Address, StorageKey, U256};

#[derive(Debug, Error)]
pub enum LedgerError {
	#[error("Insufficient funds: available {available}, required {required}")]
	InsufficientFunds { available: U256, required: U256 },
	#[error("Balance overflow")]
	Overflow,
	#[error("Storage error: {0}")]
	Storage(#[from] StorageError),
}

pub struct BalanceLedger {
	storage: Arc<StorageService>,
	lock: Mutex<()>,
}

impl BalanceLedger {
	pub fn new(storage: Arc<StorageService>) -> Self {
		Self {
			storage,
			lock: Mutex::new(()),
		}
	}

	fn key(account: &Address) -> String {
		format!("{:#x}", account)
	}

	/// Takes the in-process lock, then the storage-wide one. The storage lock
	/// is released first.
	async fn acquire(&self) -> Result<(StorageLock, MutexGuard<'_, ()>), StorageError> {
		let guard = self.lock.lock().await;
		let storage_lock = self.storage.lock(StorageKey::Balances.as_str()).await?;
		Ok((storage_lock, guard))
	}

	async fn read(&self, account: &Address) -> Result<U256, StorageError> {
		Ok(self
			.storage
			.retrieve_optional::<U256>(StorageKey::Balances.as_str(), &Self::key(account))
			.await?
			.unwrap_or(U256::ZERO))
	}

	async fn write(&self, account: &Address, balance: U256) -> Result<(), StorageError> {
		self.storage
			.store(StorageKey::Balances.as_str(), &Self::key(account), &balance)
			.await
	}

	/// Current balance of `account`, zero if it never held funds.
	pub async fn balance_of(&self, account: &Address) -> Result<U256, LedgerError> {
		Ok(self.read(account).await?)
	}

	/// Adds `amount` to `account` and returns the new balance.
	pub async fn credit(&self, account: &Address, amount: U256) -> Result<U256, LedgerError> {
		let _guard = self.acquire().await?;
		let balance = self
			.read(account)
			.await?
			.checked_add(amount)
			.ok_or(LedgerError::Overflow)?;
		self.write(account, balance).await?;
		Ok(balance)
	}

	/// Moves `amount` from `from` to `to`.
	///
	/// Nothing is written unless both sides can be updated. If the credit
	/// write fails the debit is rolled back.
	pub async fn transfer(
		&self,
		from: &Address,
		to: &Address,
		amount: U256,
	) -> Result<U256, LedgerError> {
		let _guard = self.acquire().await?;

		let from_balance = self.read(from).await?;
		let remaining =
			from_balance
				.checked_sub(amount)
				.ok_or(LedgerError::InsufficientFunds {
					available: from_balance,
					required: amount,
				})?;
		if from == to {
			return Ok(from_balance);
		}

		let credited = self
			.read(to)
			.await?
			.checked_add(amount)
			.ok_or(LedgerError::Overflow)?;

		self.write(from, remaining).await?;
		if let Err(e) = self.write(to, credited).await {
			if let Err(rollback) = self.write(from, from_balance).await {
				tracing::error!(
					account = %from,
					error = %rollback,
					"Failed to roll back debit after credit failure"
				);
			}
			return Err(e.into());
		}

		Ok(remaining)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use vault_storage::implementations::{file::FileStorage, memory::MemoryStorage};

	fn ledger() -> BalanceLedger {
		BalanceLedger::new(Arc::new(StorageService::new(Box::new(
			MemoryStorage::new(),
		))))
	}

	#[tokio::test]
	async fn test_unknown_account_is_zero() {
		let ledger = ledger();
		assert_eq!(
			ledger.balance_of(&Address::repeat_byte(9)).await.unwrap(),
			U256::ZERO
		);
	}

	#[tokio::test]
	async fn test_credit_and_transfer() {
		let ledger = ledger();
		let vault = Address::repeat_byte(1);
		let recipient = Address::repeat_byte(2);

		assert_eq!(
			ledger.credit(&vault, U256::from(10)).await.unwrap(),
			U256::from(10)
		);
		assert_eq!(
			ledger
				.transfer(&vault, &recipient, U256::from(4))
				.await
				.unwrap(),
			U256::from(6)
		);
		assert_eq!(ledger.balance_of(&vault).await.unwrap(), U256::from(6));
		assert_eq!(ledger.balance_of(&recipient).await.unwrap(), U256::from(4));
	}

	#[tokio::test]
	async fn test_transfer_more_than_balance_writes_nothing() {
		let ledger = ledger();
		let vault = Address::repeat_byte(1);
		let recipient = Address::repeat_byte(2);
		ledger.credit(&vault, U256::from(3)).await.unwrap();

		let err = ledger
			.transfer(&vault, &recipient, U256::from(4))
			.await
			.unwrap_err();
		assert!(matches!(
			err,
			LedgerError::InsufficientFunds { available, required }
				if available == U256::from(3) && required == U256::from(4)
		));
		assert_eq!(ledger.balance_of(&vault).await.unwrap(), U256::from(3));
		assert_eq!(ledger.balance_of(&recipient).await.unwrap(), U256::ZERO);
	}

	#[tokio::test]
	async fn test_self_transfer_keeps_balance() {
		let ledger = ledger();
		let vault = Address::repeat_byte(1);
		ledger.credit(&vault, U256::from(5)).await.unwrap();

		ledger.transfer(&vault, &vault, U256::from(5)).await.unwrap();
		assert_eq!(ledger.balance_of(&vault).await.unwrap(), U256::from(5));
	}

	#[tokio::test]
	async fn test_credit_overflow() {
		let ledger = ledger();
		let vault = Address::repeat_byte(1);
		ledger.credit(&vault, U256::MAX).await.unwrap();

		assert!(matches!(
			ledger.credit(&vault, U256::from(1)).await,
			Err(LedgerError::Overflow)
		));
		assert_eq!(ledger.balance_of(&vault).await.unwrap(), U256::MAX);
	}

	#[tokio::test]
	async fn test_separate_ledgers_over_one_directory() {
		let dir = tempfile::TempDir::new().unwrap();
		let open = || {
			Arc::new(BalanceLedger::new(Arc::new(StorageService::new(Box::new(
				FileStorage::new(dir.path().to_path_buf()),
			)))))
		};
		let vault = Address::repeat_byte(1);
		open().credit(&vault, U256::from(40)).await.unwrap();

		// Each ledger stands in for a separate process on the same directory.
		let mut handles = Vec::new();
		for i in 0..8u8 {
			let ledger = open();
			handles.push(tokio::spawn(async move {
				let recipient = Address::repeat_byte(0x10 + i % 2);
				for _ in 0..5 {
					ledger.transfer(&vault, &recipient, U256::from(1)).await.unwrap();
				}
			}));
		}
		for handle in handles {
			handle.await.unwrap();
		}

		let ledger = open();
		assert_eq!(ledger.balance_of(&vault).await.unwrap(), U256::ZERO);
		assert_eq!(
			ledger.balance_of(&Address::repeat_byte(0x10)).await.unwrap(),
			U256::from(20)
		);
		assert_eq!(
			ledger.balance_of(&Address::repeat_byte(0x11)).await.unwrap(),
			U256::from(20)
		);
	}
}
