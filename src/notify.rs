use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::limits::NOTIFY_CHANNEL_CAPACITY;
use crate::model::Event;

/// Per-asset broadcast of committed ledger events.
#[derive(Default)]
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to one asset's events. Creates the channel if needed.
    pub fn subscribe(&self, asset_id: Ulid) -> broadcast::Receiver<Event> {
        self.channels
            .entry(asset_id)
            .or_insert_with(|| broadcast::channel(NOTIFY_CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// No-op if nobody is listening. Channels whose receivers are all gone are dropped.
    pub fn send(&self, event: &Event) {
        let asset_id = event.asset_id();
        let orphaned = match self.channels.get(&asset_id) {
            Some(sender) => sender.send(event.clone()).is_err(),
            None => false,
        };
        if orphaned {
            self.channels
                .remove_if(&asset_id, |_, sender| sender.receiver_count() == 0);
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}
