//! Presence event bus.
//!
//! The poller publishes join/leave events on a broadcast channel. Every
//! listener owns its receiver and runs on its own task, so a slow or failing
//! listener never holds up the others.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::EngineError;
use crate::model::{Player, ServerSnapshot};

/// Default channel capacity (events)
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub enum PresenceEvent {
    Joined {
        old: Arc<ServerSnapshot>,
        new: Arc<ServerSnapshot>,
        player: Player,
    },
    Left {
        old: Arc<ServerSnapshot>,
        new: Arc<ServerSnapshot>,
        player: Player,
    },
    /// Everyone who joined during one tick.
    JoinedBatch {
        old: Arc<ServerSnapshot>,
        new: Arc<ServerSnapshot>,
        players: Vec<Player>,
    },
    /// Everyone who left during one tick.
    LeftBatch {
        old: Arc<ServerSnapshot>,
        new: Arc<ServerSnapshot>,
        players: Vec<Player>,
    },
}

impl PresenceEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            PresenceEvent::Joined { .. } => "joined",
            PresenceEvent::Left { .. } => "left",
            PresenceEvent::JoinedBatch { .. } => "joined_batch",
            PresenceEvent::LeftBatch { .. } => "left_batch",
        }
    }
}

pub struct EventBus {
    tx: broadcast::Sender<PresenceEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Fire-and-forget: with no subscribers the event is dropped.
    pub fn emit(&self, event: PresenceEvent) {
        debug!(event_type = event.event_type(), "EventBus::emit");
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PresenceEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

/// Consumer of presence events.
#[async_trait]
pub trait PresenceListener: Send + Sync {
    fn name(&self) -> &'static str;

    async fn on_event(&self, event: &PresenceEvent) -> Result<(), EngineError>;
}

/// Drive `listener` from `rx` until cancelled or the bus is dropped.
///
/// An error from one event is logged and the next event is handled
/// normally. An event being handled when cancellation arrives is finished
/// first.
pub async fn run_listener(
    listener: Arc<dyn PresenceListener>,
    mut rx: broadcast::Receiver<PresenceEvent>,
    token: CancellationToken,
) {
    info!(listener = listener.name(), "listener started");
    loop {
        let event = tokio::select! {
            _ = token.cancelled() => break,
            received = rx.recv() => received,
        };

        match event {
            Ok(event) => {
                if let Err(err) = listener.on_event(&event).await {
                    error!(
                        listener = listener.name(),
                        event_type = event.event_type(),
                        %err,
                        "listener failed to handle event"
                    );
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(listener = listener.name(), skipped, "listener lagged, events dropped");
            }
            Err(RecvError::Closed) => break,
        }
    }
    info!(listener = listener.name(), "listener stopped");
}
