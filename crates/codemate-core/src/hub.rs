// In-memory fan-out of persisted events to per-task subscribers. Publishing
// never blocks: a subscriber that lags simply loses its own backlog and is
// expected to reconcile from the snapshot it received on connect.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;

use crate::types::EventRecord;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Clone, Default)]
pub struct EventHub {
    channels: Arc<Mutex<HashMap<String, broadcast::Sender<EventRecord>>>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events for one task. The receiver sees only events
    /// published after this call; history comes from the store snapshot.
    pub fn subscribe(&self, task_id: &str) -> broadcast::Receiver<EventRecord> {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels
            .entry(task_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Deliver an event to every current subscriber of the task. Channels
    /// whose receivers have all dropped are pruned here, which makes
    /// unsubscription (dropping the receiver) idempotent.
    pub fn publish(&self, task_id: &str, event: &EventRecord) {
        let sender = {
            let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
            match channels.get(task_id) {
                Some(sender) if sender.receiver_count() == 0 => {
                    channels.remove(task_id);
                    return;
                }
                Some(sender) => sender.clone(),
                None => return,
            }
        };
        // Send outside the registry lock; the only failure is zero receivers.
        let _ = sender.send(event.clone());
    }

    pub fn subscriber_count(&self, task_id: &str) -> usize {
        let channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels
            .get(task_id)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }
}
