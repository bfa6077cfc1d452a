//! Change notifications for the UI layer.

use tokio::sync::broadcast;

use crate::busy::BusySnapshot;
use crate::types::{CityRecord, PendingBackgroundUpdate, StatusMessage};

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    /// Cities, selection or pending updates changed; re-read the snapshot
    Changed,
    Busy(BusySnapshot),
    /// One user-facing message, e.g. a failed manual refresh
    Notification(StatusMessage),
}

/// Everything the UI renders from, copied out at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreSnapshot {
    pub cities: Vec<CityRecord>,
    pub current_index: usize,
    pub pending_updates: Vec<PendingBackgroundUpdate>,
    pub busy: BusySnapshot,
}

/// Cloneable sender half shared by the service and the refresher.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<StoreEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.sender.subscribe()
    }

    /// Send to current subscribers. Having none is not an error.
    pub fn emit(&self, event: StoreEvent) {
        let _ = self.sender.send(event);
    }
}
