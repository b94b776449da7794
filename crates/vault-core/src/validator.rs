//! Authorization validation and nonce bookkeeping.
//!
//! Verification runs in two phases:
//! 1. `authorize` recomputes the EIP-712 digest, recovers the signer and
//!    checks vault binding, authorizer, deadline and nonce without mutating
//!    anything.
//! 2. `consume` marks the nonce as used. It is the only mutation and is
//!    atomic with respect to other consumers of the same nonce.
//!
//! Signature checks come before the nonce lookup so that a forged request can
//! never burn a nonce that belongs to a genuine authorization.

use crate::clock::{Clock, SystemClock};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use vault_storage::{StorageError, StorageService};
use vault_types::{
	truncate_id, utils::compute_final_digest, Address, AuthorizationRequest,
	AuthorizationSignature, Domain, SignatureError, StorageKey, UsedNonceRecord, B256,
};

/// Default time a spent nonce is retained after its deadline.
pub const DEFAULT_NONCE_RETENTION: Duration = Duration::from_secs(3600);

/// Reasons an authorization is rejected.
#[derive(Debug, Error)]
pub enum AuthorizationError {
	#[error("Malformed signature: {0}")]
	MalformedSignature(#[from] SignatureError),
	#[error("Authorization bound to vault {requested}, presented by {caller}")]
	WrongVaultBinding { requested: Address, caller: Address },
	#[error("Signer {0} is not the trusted authorizer")]
	UnauthorizedSigner(Address),
	#[error("Authorization expired at {deadline} (now {now})")]
	Expired { deadline: u64, now: u64 },
	#[error("Nonce {0} already used")]
	NonceAlreadyUsed(B256),
	#[error("Storage error: {0}")]
	Storage(#[from] StorageError),
}

/// A request that passed every read-only check.
///
/// Produced by [`AuthorizationValidator::authorize`] and spent by
/// [`AuthorizationValidator::consume`]. Not `Clone`, so one verification
/// consumes at most one nonce.
#[derive(Debug)]
pub struct VerifiedAuthorization {
	request: AuthorizationRequest,
	signer: Address,
	digest: B256,
}

impl VerifiedAuthorization {
	pub fn request(&self) -> &AuthorizationRequest {
		&self.request
	}

	pub fn signer(&self) -> Address {
		self.signer
	}

	pub fn digest(&self) -> B256 {
		self.digest
	}

	pub fn nonce(&self) -> B256 {
		self.request.nonce
	}
}

/// Verifies authorizations for exactly one vault under one EIP-712 domain.
pub struct AuthorizationValidator {
	domain: Domain,
	domain_separator: B256,
	/// The only vault allowed to present authorizations.
	vault: Address,
	/// The only signer whose approvals are accepted.
	authorizer: Address,
	storage: Arc<StorageService>,
	clock: Arc<dyn Clock>,
	nonce_retention: Duration,
	/// Serializes nonce check-and-insert.
	nonce_lock: Mutex<()>,
}

impl AuthorizationValidator {
	pub fn new(
		domain: Domain,
		vault: Address,
		authorizer: Address,
		storage: Arc<StorageService>,
	) -> Self {
		let domain_separator = domain.separator();
		Self {
			domain,
			domain_separator,
			vault,
			authorizer,
			storage,
			clock: Arc::new(SystemClock),
			nonce_retention: DEFAULT_NONCE_RETENTION,
			nonce_lock: Mutex::new(()),
		}
	}

	/// Replaces the time source used for deadline checks.
	pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
		self.clock = clock;
		self
	}

	/// Sets how long spent nonces are kept past their deadline before
	/// [`prune_spent_nonces`](Self::prune_spent_nonces) may drop them.
	pub fn with_nonce_retention(mut self, retention: Duration) -> Self {
		self.nonce_retention = retention;
		self
	}

	pub fn domain(&self) -> &Domain {
		&self.domain
	}

	pub fn domain_separator(&self) -> B256 {
		self.domain_separator
	}

	pub fn vault(&self) -> Address {
		self.vault
	}

	pub fn authorizer(&self) -> Address {
		self.authorizer
	}

	/// The digest the authorizer must sign for `request`.
	pub fn digest(&self, request: &AuthorizationRequest) -> B256 {
		compute_final_digest(&self.domain_separator, &request.struct_hash())
	}

	/// Prefix of every nonce id of this vault. Scoped by vault so validators
	/// sharing a backend keep separate nonce sets.
	fn nonce_prefix(&self) -> String {
		format!("{:#x}:", self.vault)
	}

	fn nonce_id(&self, nonce: &B256) -> String {
		format!("{}{}", self.nonce_prefix(), nonce)
	}

	/// Checks `request` and `signature` without consuming the nonce.
	pub async fn authorize(
		&self,
		caller: Address,
		request: &AuthorizationRequest,
		signature: &AuthorizationSignature,
	) -> Result<VerifiedAuthorization, AuthorizationError> {
		let digest = self.digest(request);

		let signer = signature.recover(&digest).inspect_err(|e| {
			tracing::debug!(nonce = %truncate_id(&request.nonce.to_string()), error = %e, "Malformed signature");
		})?;

		if request.vault != caller || caller != self.vault {
			tracing::debug!(
				requested = %request.vault,
				caller = %caller,
				bound = %self.vault,
				"Vault binding mismatch"
			);
			return Err(AuthorizationError::WrongVaultBinding {
				requested: request.vault,
				caller,
			});
		}

		if signer != self.authorizer {
			tracing::debug!(signer = %signer, "Signer is not the authorizer");
			return Err(AuthorizationError::UnauthorizedSigner(signer));
		}

		self.check_deadline(request.deadline)?;

		if self.is_nonce_used(&request.nonce).await? {
			return Err(AuthorizationError::NonceAlreadyUsed(request.nonce));
		}

		Ok(VerifiedAuthorization {
			request: request.clone(),
			signer,
			digest,
		})
	}

	fn check_deadline(&self, deadline: u64) -> Result<u64, AuthorizationError> {
		let now = self.clock.now();
		if now > deadline {
			return Err(AuthorizationError::Expired { deadline, now });
		}
		Ok(now)
	}

	/// Marks the nonce of a verified authorization as used.
	///
	/// Of several concurrent consumers of the same nonce exactly one succeeds;
	/// the rest get `NonceAlreadyUsed`. Returns the recovered signer.
	pub async fn consume(
		&self,
		authorization: VerifiedAuthorization,
	) -> Result<Address, AuthorizationError> {
		let _guard = self.nonce_lock.lock().await;

		let request = &authorization.request;
		// Time may have passed since `authorize`.
		let now = self.check_deadline(request.deadline)?;

		let record = UsedNonceRecord {
			deadline: request.deadline,
			consumed_at: now,
			signer: authorization.signer,
		};
		let inserted = self
			.storage
			.insert_if_absent(
				StorageKey::UsedNonces.as_str(),
				&self.nonce_id(&request.nonce),
				&record,
			)
			.await?;
		if !inserted {
			return Err(AuthorizationError::NonceAlreadyUsed(request.nonce));
		}

		tracing::info!(
			nonce = %truncate_id(&request.nonce.to_string()),
			signer = %authorization.signer,
			"Nonce consumed"
		);
		Ok(authorization.signer)
	}

	/// Full verification: checks the authorization and consumes its nonce.
	pub async fn verify(
		&self,
		caller: Address,
		request: &AuthorizationRequest,
		signature: &AuthorizationSignature,
	) -> Result<Address, AuthorizationError> {
		let authorization = self.authorize(caller, request, signature).await?;
		self.consume(authorization).await
	}

	/// Returns a consumed nonce to the unused set.
	///
	/// Only for undoing a consumption whose follow-up state change failed.
	pub(crate) async fn release(&self, nonce: &B256) -> Result<(), AuthorizationError> {
		let _guard = self.nonce_lock.lock().await;
		self.storage
			.remove(StorageKey::UsedNonces.as_str(), &self.nonce_id(nonce))
			.await?;
		tracing::warn!(nonce = %nonce, "Nonce released");
		Ok(())
	}

	pub async fn is_nonce_used(&self, nonce: &B256) -> Result<bool, AuthorizationError> {
		Ok(self
			.storage
			.exists(StorageKey::UsedNonces.as_str(), &self.nonce_id(nonce))
			.await?)
	}

	/// Looks up the record left by the consumption of `nonce`.
	pub async fn used_nonce_record(
		&self,
		nonce: &B256,
	) -> Result<Option<UsedNonceRecord>, AuthorizationError> {
		Ok(self
			.storage
			.retrieve_optional(StorageKey::UsedNonces.as_str(), &self.nonce_id(nonce))
			.await?)
	}

	/// Drops nonce records of this vault whose deadline plus the retention
	/// window has passed on the validator's clock.
	///
	/// A record is dropped only once `now > deadline`. From then on its
	/// authorization fails with `Expired` before the nonce is looked up, so
	/// forgetting the nonce cannot enable a replay.
	pub async fn prune_spent_nonces(&self) -> Result<usize, AuthorizationError> {
		let _guard = self.nonce_lock.lock().await;
		let now = self.clock.now();
		let retention = self.nonce_retention.as_secs();
		let namespace = StorageKey::UsedNonces.as_str();

		let mut removed = 0;
		for id in self.storage.list_ids(namespace, &self.nonce_prefix()).await? {
			let record = match self
				.storage
				.retrieve_optional::<UsedNonceRecord>(namespace, &id)
				.await
			{
				Ok(Some(record)) => record,
				Ok(None) => continue,
				Err(e) => {
					tracing::warn!(id = %id, error = %e, "Skipping unreadable nonce record");
					continue;
				},
			};
			if now > record.deadline.saturating_add(retention) {
				self.storage.remove(namespace, &id).await?;
				removed += 1;
			}
		}

		if removed > 0 {
			tracing::info!(removed, "Pruned spent nonces");
		}
		Ok(removed)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::clock::ManualClock;
	use crate::test_utils::{authorizer, sign, storage, DEADLINE, NOW};
	use std::collections::HashSet;
	use vault_storage::implementations::file::FileStorage;
	use vault_types::U256;

	const VAULT: Address = Address::new([0x11; 20]);
	const RECIPIENT: Address = Address::new([0x44; 20]);

	fn domain() -> Domain {
		Domain::new("SecureVaultAuth", "1", 31337, Address::repeat_byte(0x22))
	}

	fn validator_with(domain: Domain, clock: Arc<ManualClock>) -> AuthorizationValidator {
		AuthorizationValidator::new(domain, VAULT, authorizer().address(), storage())
			.with_clock(clock)
	}

	fn validator() -> (AuthorizationValidator, Arc<ManualClock>) {
		let clock = Arc::new(ManualClock::new(NOW));
		(validator_with(domain(), clock.clone()), clock)
	}

	fn request(nonce: u8) -> AuthorizationRequest {
		AuthorizationRequest {
			vault: VAULT,
			recipient: RECIPIENT,
			amount: U256::from(1),
			nonce: B256::repeat_byte(nonce),
			deadline: DEADLINE,
		}
	}

	#[tokio::test]
	async fn test_digest_matches_request_signing_hash() {
		let (validator, _) = validator();
		let request = request(1);

		assert_eq!(validator.digest(&request), request.signing_hash(&domain()));
		assert_eq!(validator.domain_separator(), domain().separator());
	}

	#[tokio::test]
	async fn test_verify_returns_signer_and_consumes() {
		let (validator, _) = validator();
		let request = request(1);
		let signature = sign(&authorizer(), &validator.digest(&request));

		assert!(!validator.is_nonce_used(&request.nonce).await.unwrap());
		let signer = validator.verify(VAULT, &request, &signature).await.unwrap();
		assert_eq!(signer, authorizer().address());
		assert!(validator.is_nonce_used(&request.nonce).await.unwrap());

		let record = validator
			.used_nonce_record(&request.nonce)
			.await
			.unwrap()
			.unwrap();
		assert_eq!(record.deadline, DEADLINE);
		assert_eq!(record.consumed_at, NOW);
		assert_eq!(record.signer, signer);
	}

	#[tokio::test]
	async fn test_replay_rejected() {
		let (validator, _) = validator();
		let request = request(1);
		let signature = sign(&authorizer(), &validator.digest(&request));

		validator.verify(VAULT, &request, &signature).await.unwrap();
		assert!(matches!(
			validator.verify(VAULT, &request, &signature).await,
			Err(AuthorizationError::NonceAlreadyUsed(n)) if n == request.nonce
		));
	}

	#[tokio::test]
	async fn test_authorize_does_not_mutate() {
		let (validator, _) = validator();
		let request = request(1);
		let signature = sign(&authorizer(), &validator.digest(&request));

		let first = validator.authorize(VAULT, &request, &signature).await.unwrap();
		let second = validator.authorize(VAULT, &request, &signature).await.unwrap();
		assert!(!validator.is_nonce_used(&request.nonce).await.unwrap());

		validator.consume(first).await.unwrap();
		assert!(matches!(
			validator.consume(second).await,
			Err(AuthorizationError::NonceAlreadyUsed(_))
		));
	}

	#[tokio::test]
	async fn test_deadline_boundary() {
		let (validator, clock) = validator();

		let mut at_deadline = request(1);
		at_deadline.deadline = NOW;
		let signature = sign(&authorizer(), &validator.digest(&at_deadline));
		assert!(validator.verify(VAULT, &at_deadline, &signature).await.is_ok());

		let mut expired = request(2);
		expired.deadline = NOW - 1;
		let signature = sign(&authorizer(), &validator.digest(&expired));
		assert!(matches!(
			validator.verify(VAULT, &expired, &signature).await,
			Err(AuthorizationError::Expired { deadline, now }) if deadline == NOW - 1 && now == NOW
		));
		assert!(!validator.is_nonce_used(&expired.nonce).await.unwrap());

		// Expiry between authorize and consume is caught at consume time.
		let pending = request(3);
		let signature = sign(&authorizer(), &validator.digest(&pending));
		let verified = validator.authorize(VAULT, &pending, &signature).await.unwrap();
		clock.set(DEADLINE + 1);
		assert!(matches!(
			validator.consume(verified).await,
			Err(AuthorizationError::Expired { .. })
		));
	}

	#[tokio::test]
	async fn test_foreign_domain_never_verifies() {
		let clock = Arc::new(ManualClock::new(NOW));
		let validator = validator_with(domain(), clock.clone());
		let request = request(1);

		let mut other_chain = domain();
		other_chain.chain_id = 1;
		let mut other_contract = domain();
		other_contract.verifying_contract = Address::repeat_byte(0x23);

		for foreign in [other_chain, other_contract] {
			let foreign_validator = validator_with(foreign, clock.clone());
			let signature = sign(&authorizer(), &foreign_validator.digest(&request));

			assert!(matches!(
				validator.verify(VAULT, &request, &signature).await,
				Err(AuthorizationError::UnauthorizedSigner(_))
			));
		}
		assert!(!validator.is_nonce_used(&request.nonce).await.unwrap());
	}

	#[tokio::test]
	async fn test_tampered_fields_recover_other_signer() {
		let (validator, _) = validator();
		let original = request(1);
		let signature = sign(&authorizer(), &validator.digest(&original));

		let mut amount = original.clone();
		amount.amount = U256::from(2);
		let mut recipient = original.clone();
		recipient.recipient = Address::repeat_byte(0x45);
		let mut nonce = original.clone();
		nonce.nonce = B256::repeat_byte(0x02);
		let mut deadline = original.clone();
		deadline.deadline += 1;

		for tampered in [amount, recipient, nonce, deadline] {
			assert!(matches!(
				validator.verify(VAULT, &tampered, &signature).await,
				Err(AuthorizationError::UnauthorizedSigner(_))
			));
		}

		// Signed for another vault, then rebound to this one.
		let mut signed_for_other = original.clone();
		signed_for_other.vault = Address::repeat_byte(0x12);
		let rebound = sign(&authorizer(), &validator.digest(&signed_for_other));
		assert!(matches!(
			validator.verify(VAULT, &original, &rebound).await,
			Err(AuthorizationError::UnauthorizedSigner(s)) if s != authorizer().address()
		));
		assert!(!validator.is_nonce_used(&original.nonce).await.unwrap());
	}

	#[tokio::test]
	async fn test_wrong_vault_binding() {
		let (validator, _) = validator();
		let other_vault = Address::repeat_byte(0x12);

		// Request names another vault, presented by the bound vault.
		let mut foreign = request(1);
		foreign.vault = other_vault;
		let signature = sign(&authorizer(), &validator.digest(&foreign));
		assert!(matches!(
			validator.verify(VAULT, &foreign, &signature).await,
			Err(AuthorizationError::WrongVaultBinding { requested, caller })
				if requested == other_vault && caller == VAULT
		));

		// Consistent request, but presented by a vault this validator does not serve.
		assert!(matches!(
			validator.verify(other_vault, &foreign, &signature).await,
			Err(AuthorizationError::WrongVaultBinding { .. })
		));
	}

	#[tokio::test]
	async fn test_unauthorized_signer() {
		let (validator, _) = validator();
		let request = request(1);
		let intruder = crate::test_utils::signer(0x77);
		let signature = sign(&intruder, &validator.digest(&request));

		assert!(matches!(
			validator.verify(VAULT, &request, &signature).await,
			Err(AuthorizationError::UnauthorizedSigner(s)) if s == intruder.address()
		));
	}

	#[tokio::test]
	async fn test_malformed_signature_is_distinct() {
		let (validator, _) = validator();
		let request = request(1);
		let valid = sign(&authorizer(), &validator.digest(&request));

		let bad_v = AuthorizationSignature::new(valid.r(), valid.s(), 29);
		let zero_r = AuthorizationSignature::new(B256::ZERO, valid.s(), valid.v());
		let high_s = AuthorizationSignature::new(valid.r(), B256::repeat_byte(0xff), valid.v());

		for signature in [bad_v, zero_r, high_s] {
			assert!(matches!(
				validator.verify(VAULT, &request, &signature).await,
				Err(AuthorizationError::MalformedSignature(_))
			));
		}
		assert!(!validator.is_nonce_used(&request.nonce).await.unwrap());
	}

	#[tokio::test]
	async fn test_concurrent_consumers_single_winner() {
		let (validator, _) = validator();
		let validator = Arc::new(validator);
		let request = request(1);
		let signature = sign(&authorizer(), &validator.digest(&request));

		let mut handles = Vec::new();
		for _ in 0..16 {
			let validator = Arc::clone(&validator);
			let request = request.clone();
			handles.push(tokio::spawn(async move {
				validator.verify(VAULT, &request, &signature).await
			}));
		}

		let mut successes = 0;
		for handle in handles {
			match handle.await.unwrap() {
				Ok(_) => successes += 1,
				Err(AuthorizationError::NonceAlreadyUsed(_)) => {},
				Err(e) => panic!("unexpected error: {e}"),
			}
		}
		assert_eq!(successes, 1);
	}

	#[tokio::test]
	async fn test_release_returns_nonce() {
		let (validator, _) = validator();
		let request = request(1);
		let signature = sign(&authorizer(), &validator.digest(&request));

		validator.verify(VAULT, &request, &signature).await.unwrap();
		validator.release(&request.nonce).await.unwrap();
		assert!(!validator.is_nonce_used(&request.nonce).await.unwrap());
		assert!(validator.verify(VAULT, &request, &signature).await.is_ok());
	}

	async fn assert_pruning_keeps_replay_protection(storage: Arc<StorageService>) {
		let clock = Arc::new(ManualClock::new(NOW));
		let validator = AuthorizationValidator::new(domain(), VAULT, authorizer().address(), storage)
			.with_clock(clock.clone())
			.with_nonce_retention(Duration::ZERO);

		let mut request = request(1);
		request.deadline = NOW + 1;
		let signature = sign(&authorizer(), &validator.digest(&request));
		validator.verify(VAULT, &request, &signature).await.unwrap();

		// At the deadline the request is still valid, so the nonce must stay.
		clock.set(NOW + 1);
		assert_eq!(validator.prune_spent_nonces().await.unwrap(), 0);
		assert!(validator.is_nonce_used(&request.nonce).await.unwrap());
		assert!(matches!(
			validator.verify(VAULT, &request, &signature).await,
			Err(AuthorizationError::NonceAlreadyUsed(_))
		));

		clock.set(NOW + 2);
		assert_eq!(validator.prune_spent_nonces().await.unwrap(), 1);
		assert!(!validator.is_nonce_used(&request.nonce).await.unwrap());
		assert!(matches!(
			validator.verify(VAULT, &request, &signature).await,
			Err(AuthorizationError::Expired { .. })
		));
	}

	#[tokio::test]
	async fn test_prune_keeps_replay_protection_in_memory() {
		assert_pruning_keeps_replay_protection(storage()).await;
	}

	#[tokio::test]
	async fn test_prune_keeps_replay_protection_on_disk() {
		let dir = tempfile::TempDir::new().unwrap();
		let storage = Arc::new(StorageService::new(Box::new(FileStorage::new(
			dir.path().to_path_buf(),
		))));
		assert_pruning_keeps_replay_protection(storage).await;
	}

	#[tokio::test]
	async fn test_prune_honours_retention_and_vault_scope() {
		let clock = Arc::new(ManualClock::new(NOW));
		let shared = storage();
		let validator =
			AuthorizationValidator::new(domain(), VAULT, authorizer().address(), shared.clone())
				.with_clock(clock.clone())
				.with_nonce_retention(Duration::from_secs(60));
		let other_vault = Address::repeat_byte(0x12);
		let neighbour =
			AuthorizationValidator::new(domain(), other_vault, authorizer().address(), shared)
				.with_clock(clock.clone())
				.with_nonce_retention(Duration::ZERO);

		let request = request(1);
		let signature = sign(&authorizer(), &validator.digest(&request));
		validator.verify(VAULT, &request, &signature).await.unwrap();

		let mut foreign = request.clone();
		foreign.vault = other_vault;
		let signature = sign(&authorizer(), &neighbour.digest(&foreign));
		neighbour.verify(other_vault, &foreign, &signature).await.unwrap();

		clock.set(DEADLINE + 60);
		assert_eq!(validator.prune_spent_nonces().await.unwrap(), 0);
		clock.set(DEADLINE + 61);
		assert_eq!(validator.prune_spent_nonces().await.unwrap(), 1);

		// Pruning one vault leaves the other vault's records alone.
		assert!(neighbour.is_nonce_used(&foreign.nonce).await.unwrap());
		assert_eq!(neighbour.prune_spent_nonces().await.unwrap(), 1);
	}

	#[tokio::test]
	async fn test_nonces_are_independent() {
		let (validator, _) = validator();
		let mut seen = HashSet::new();
		for n in 1..=3u8 {
			let request = request(n);
			let signature = sign(&authorizer(), &validator.digest(&request));
			validator.verify(VAULT, &request, &signature).await.unwrap();
			seen.insert(request.nonce);
		}
		assert_eq!(seen.len(), 3);
	}
}
