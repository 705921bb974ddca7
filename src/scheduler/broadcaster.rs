use std::sync::Arc;
use tokio::sync::watch;

use crate::models::StatusEvent;

/// Latest-value fan-out of monitor status. Publishing never waits on, or
/// fails for lack of, subscribers.
#[derive(Clone)]
pub struct StatusBroadcaster {
    tx: Arc<watch::Sender<Option<StatusEvent>>>,
}

impl StatusBroadcaster {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    pub fn publish(&self, event: StatusEvent) {
        self.tx.send_replace(Some(event));
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<StatusEvent>> {
        self.tx.subscribe()
    }

    pub fn latest(&self) -> Option<StatusEvent> {
        self.tx.borrow().clone()
    }
}

impl Default for StatusBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}
