//! Time sources for deadline checks.

use std::sync::atomic::{AtomicU64, Ordering};
use vault_types::current_timestamp;

/// Source of the current Unix time in seconds.
pub trait Clock: Send + Sync {
	fn now(&self) -> u64;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
	fn now(&self) -> u64 {
		current_timestamp()
	}
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
	now: AtomicU64,
}

impl ManualClock {
	pub fn new(now: u64) -> Self {
		Self {
			now: AtomicU64::new(now),
		}
	}

	pub fn set(&self, now: u64) {
		self.now.store(now, Ordering::SeqCst);
	}

	pub fn advance(&self, seconds: u64) {
		self.now.fetch_add(seconds, Ordering::SeqCst);
	}
}

impl Clock for ManualClock {
	fn now(&self) -> u64 {
		self.now.load(Ordering::SeqCst)
	}
}
