//! Live feed of settled wagers.

use fairbet_types::api::ActivityEvent;
use fairbet_types::Wager;
use tokio::sync::broadcast;

pub const DEFAULT_ACTIVITY_CAPACITY: usize = 1024;

/// Broadcasts every settled wager to any number of subscribers.
///
/// Slow subscribers lag and skip events; publishing never blocks settlement.
#[derive(Clone)]
pub struct ActivityFeed {
    sender: broadcast::Sender<ActivityEvent>,
}

impl Default for ActivityFeed {
    fn default() -> Self {
        Self::new(DEFAULT_ACTIVITY_CAPACITY)
    }
}

impl ActivityFeed {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn publish(&self, wager: &Wager) {
        // No subscribers is not an error.
        let _ = self.sender.send(ActivityEvent::from(wager));
    }

    /// Re-announce an event settled elsewhere (another server instance).
    pub fn relay(&self, event: ActivityEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ActivityEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
