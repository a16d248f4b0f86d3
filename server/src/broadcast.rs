//! Real-time fan-out to connected subscribers.
//!
//! [`BroadcastHub`] owns the subscriber side of the relay. It wraps a tokio
//! broadcast channel and hands out one [`Subscription`] per WebSocket
//! connection. Every emitted event is delivered as a [`HubMessage`] frame.
//!
//! # Lifecycle
//!
//! The hub is constructed once by the composition root (`main`) and shared by
//! cloning the handle. It starts unbound; [`BroadcastHub::initialize`] binds it
//! to the transport by creating the channel. Until then emits are dropped and
//! connections are refused, which lets request handlers run before startup
//! finishes without crashing the process.
//!
//! # Example
//!
//! ```rust
//! use instarelay_server::broadcast::BroadcastHub;
//!
//! let hub = BroadcastHub::new();
//! assert_eq!(hub.emit("instagram_message", &"ignored"), 0);
//!
//! assert!(hub.initialize());
//! assert!(!hub.initialize());
//!
//! let mut subscription = hub.connect().expect("hub is initialized");
//! assert_eq!(hub.emit("instagram_message", &serde_json::json!({"x": 1})), 1);
//!
//! let frame = subscription.try_recv().unwrap();
//! assert_eq!(frame.event, "instagram_message");
//! ```

use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError, Receiver, Sender};
use tracing::{debug, error, info, trace};
use uuid::Uuid;

/// Default channel capacity.
///
/// A subscriber that falls more than this many events behind skips the
/// oldest ones and observes `RecvError::Lagged`.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// One frame delivered to subscribers: an event name and its JSON data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubMessage {
    pub event: String,
    pub data: serde_json::Value,
}

/// Central fan-out hub shared by the webhook processor and the WebSocket
/// endpoint.
///
/// `BroadcastHub` is `Clone`; all clones share the same binding and the same
/// subscribers.
#[derive(Debug, Clone)]
pub struct BroadcastHub {
    sender: Arc<OnceLock<Sender<HubMessage>>>,
    capacity: usize,
}

impl BroadcastHub {
    /// Creates an unbound hub with [`DEFAULT_CHANNEL_CAPACITY`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Creates an unbound hub with the given channel capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            sender: Arc::new(OnceLock::new()),
            capacity,
        }
    }

    /// Binds the hub to the transport.
    ///
    /// Returns `true` if this call performed the binding and `false` if the
    /// hub was already initialized, in which case nothing changes.
    ///
    /// # Panics
    ///
    /// Panics if the hub was built with a capacity of 0.
    pub fn initialize(&self) -> bool {
        if self.sender.get().is_some() {
            debug!("Broadcast hub already initialized");
            return false;
        }

        let (sender, _) = broadcast::channel(self.capacity);
        let bound = self.sender.set(sender).is_ok();
        if bound {
            info!(capacity = self.capacity, "Broadcast hub initialized");
        }
        bound
    }

    /// Returns `true` once [`initialize`](Self::initialize) has run.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.sender.get().is_some()
    }

    /// Broadcasts `data` under `event` to every connected subscriber.
    ///
    /// Returns the number of subscribers the frame was queued for. Emitting
    /// with no subscribers, or before initialization, is a silent no-op that
    /// returns 0. This method never blocks.
    pub fn emit<T: Serialize + ?Sized>(&self, event: &str, data: &T) -> usize {
        let Some(sender) = self.sender.get() else {
            trace!(event = %event, "Broadcast hub not initialized, dropping event");
            return 0;
        };

        let data = match serde_json::to_value(data) {
            Ok(value) => value,
            Err(err) => {
                error!(event = %event, error = %err, "Failed to serialize event data");
                return 0;
            }
        };

        let frame = HubMessage {
            event: event.to_string(),
            data,
        };

        match sender.send(frame) {
            Ok(receivers) => {
                trace!(event = %event, receivers, "Event emitted");
                receivers
            }
            Err(_) => {
                debug!(event = %event, "No connected subscribers for event");
                0
            }
        }
    }

    /// Registers a new subscriber.
    ///
    /// Returns `None` if the hub is not initialized. The subscriber is
    /// deregistered when the returned [`Subscription`] is dropped.
    #[must_use]
    pub fn connect(&self) -> Option<Subscription> {
        let sender = self.sender.get()?;
        let subscription = Subscription {
            id: Uuid::new_v4(),
            receiver: sender.subscribe(),
        };

        info!(
            subscriber_id = %subscription.id,
            subscriber_count = sender.receiver_count(),
            "Subscriber connected"
        );

        Some(subscription)
    }

    /// Returns the number of currently connected subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.get().map_or(0, Sender::receiver_count)
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}

/// A registered subscriber connection.
///
/// Holds the receiving end of the hub channel. Dropping it deregisters the
/// subscriber.
#[derive(Debug)]
pub struct Subscription {
    id: Uuid,
    receiver: Receiver<HubMessage>,
}

impl Subscription {
    /// Connection identifier used in logs.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Waits for the next frame.
    ///
    /// # Errors
    ///
    /// Returns [`RecvError::Lagged`] if frames were skipped and
    /// [`RecvError::Closed`] if the hub was dropped.
    pub async fn recv(&mut self) -> Result<HubMessage, RecvError> {
        self.receiver.recv().await
    }

    /// Returns the next frame if one is already queued.
    ///
    /// # Errors
    ///
    /// Returns [`TryRecvError::Empty`] if nothing is queued.
    pub fn try_recv(&mut self) -> Result<HubMessage, TryRecvError> {
        self.receiver.try_recv()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        info!(subscriber_id = %self.id, "Subscriber disconnected");
    }
}
