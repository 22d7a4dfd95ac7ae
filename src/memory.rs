//! Memory-pressure notifications
//!
//! The host platform calls [`MemoryPressure::notify`] when it is short on
//! memory. Subscribers (the synthesis cache) drop what they can rebuild.

use tokio::sync::broadcast;

/// Buffered notifications per subscriber; extra signals collapse into one
const CHANNEL_CAPACITY: usize = 4;

/// Zero-argument broadcast signal for memory pressure
#[derive(Debug, Clone)]
pub struct MemoryPressure {
    tx: broadcast::Sender<()>,
}

impl MemoryPressure {
    /// Create a signal with no subscribers
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Deliver a memory-pressure notification, returning how many
    /// subscribers received it
    pub fn notify(&self) -> usize {
        let receivers = self.tx.send(()).unwrap_or(0);
        tracing::debug!(receivers, "memory pressure signalled");
        receivers
    }

    /// Subscribe to notifications
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }
}

impl Default for MemoryPressure {
    fn default() -> Self {
        Self::new()
    }
}
