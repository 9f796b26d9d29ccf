use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::TimelineEvent;

const CHANNEL_CAPACITY: usize = 256;

/// Channel key for the unassigned pool. Engineer ids are never empty.
const UNASSIGNED: &str = "";

/// Broadcast hub for committed timeline changes, one channel per engineer.
pub struct NotifyHub {
    channels: DashMap<String, broadcast::Sender<TimelineEvent>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to an engineer's timeline. Creates the channel if needed.
    pub fn subscribe(&self, engineer_id: &str) -> broadcast::Receiver<TimelineEvent> {
        let sender = self
            .channels
            .entry(engineer_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, engineer_id: &str, event: &TimelineEvent) {
        if let Some(sender) = self.channels.get(engineer_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Subscribe to changes of the unassigned pool.
    pub fn subscribe_unassigned(&self) -> broadcast::Receiver<TimelineEvent> {
        self.subscribe(UNASSIGNED)
    }

    pub fn send_unassigned(&self, event: &TimelineEvent) {
        self.send(UNASSIGNED, event);
    }

    pub fn subscriber_count(&self, engineer_id: &str) -> usize {
        self.channels
            .get(engineer_id)
            .map_or(0, |s| s.receiver_count())
    }
}
