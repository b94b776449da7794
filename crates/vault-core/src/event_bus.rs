//! Event bus for vault notifications.
//!
//! A broadcast channel carrying [`VaultEvent`]s. Each subscriber receives its
//! own copy of every event published after it subscribed; slow subscribers
//! lose the oldest events once the channel capacity is exceeded.

use tokio::sync::broadcast;
use vault_types::VaultEvent;

/// Broadcast bus shared by a vault and its observers.
pub struct EventBus {
	sender: broadcast::Sender<VaultEvent>,
}

impl EventBus {
	/// Creates a new EventBus buffering up to `capacity` events per subscriber.
	pub fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity);
		Self { sender }
	}

	pub fn subscribe(&self) -> broadcast::Receiver<VaultEvent> {
		self.sender.subscribe()
	}

	/// Publishes an event to all current subscribers.
	///
	/// Returns an error if there are no active subscribers. Callers treat
	/// that as a no-op.
	pub fn publish(&self, event: VaultEvent) -> Result<(), broadcast::error::SendError<VaultEvent>> {
		self.sender.send(event)?;
		Ok(())
	}
}

impl Clone for EventBus {
	fn clone(&self) -> Self {
		Self {
			sender: self.sender.clone(),
		}
	}
}
