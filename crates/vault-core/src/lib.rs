//! Core logic of the signed-withdrawal vault.
//!
//! A [`Vault`] holds a balance and releases it only against authorizations
//! that its [`AuthorizationValidator`] accepts: an EIP-712 signature by the
//! trusted authorizer over `(vault, recipient, amount, nonce, deadline)`,
//! bound to one domain, not yet expired and carrying an unused nonce.

pub mod builder;
pub mod clock;
pub mod event_bus;
pub mod ledger;
pub mod validator;
pub mod vault;

#[cfg(test)]
mod test_utils;

pub use builder::{BuilderError, VaultBuilder, VaultFactories};
pub use clock::{Clock, ManualClock, SystemClock};
pub use event_bus::EventBus;
pub use ledger::{BalanceLedger, LedgerError};
pub use validator::{AuthorizationError, AuthorizationValidator, VerifiedAuthorization};
pub use vault::{Vault, VaultError};
