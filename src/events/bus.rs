use tokio::sync::broadcast;
use super::types::*;

/// Buffered events per subscriber before slow receivers start lagging
const CHANNEL_CAPACITY: usize = 1000;

/// Event bus for in-process agent event distribution
pub struct EventBus {
    sender: broadcast::Sender<AgentEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Emit an event to all subscribers
    pub fn emit(&self, event: AgentEvent) {
        // Ignore the error if there are no receivers
        let _ = self.sender.send(event);
    }

    /// Emit an event with convenience parameters
    pub fn emit_kind(&self, kind: AgentEventKind, source: &str) {
        self.emit(AgentEvent::new(kind, source));
    }

    /// Subscribe to receive events
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
