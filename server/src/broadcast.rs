//! Event fan-out infrastructure for the Ripple server.
//!
//! Two pieces make up the broadcast hub:
//!
//! - [`FeedBroadcaster`] - wraps a tokio broadcast channel and delivers every
//!   mutation event to all current subscribers. Fan-out is unscoped: every
//!   live connection receives every event, including the mutating user's own.
//! - [`ConnectionRegistry`] - the explicit live set of authenticated
//!   connections, each tagged with the user id resolved during the
//!   handshake. Mutated only by connect/disconnect; broadcast never touches
//!   its structure, it only iterates channel subscribers.
//!
//! Connection lifecycle: a connection that passes the handshake guard joins
//! the registry and subscribes; on disconnect it leaves and its receiver is
//! dropped. A connection that fails the guard is rejected before either
//! happens and never observes an event.
//!
//! # Example
//!
//! ```rust
//! use ripple_server::broadcast::FeedBroadcaster;
//! use ripple_server::types::{Post, ServerEvent};
//! use chrono::Utc;
//!
//! let broadcaster = FeedBroadcaster::new();
//! let _rx = broadcaster.subscribe();
//!
//! let post = Post::new("hello".to_string(), Utc::now());
//! let receivers = broadcaster.broadcast(ServerEvent::NewPostData(post));
//! assert_eq!(receivers, 1);
//! ```

use std::collections::HashMap;
use std::sync::RwLock;

use tokio::sync::broadcast::{self, Receiver, Sender};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::types::ServerEvent;

/// Default channel capacity.
///
/// If subscribers fall further behind than this, they start receiving
/// `RecvError::Lagged` on their next receive attempt and miss events.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Central distribution hub for feed events.
///
/// Wraps a tokio broadcast channel. Cloning is cheap and clones share the
/// channel, so the broadcaster can be handed to every handler through the
/// application state.
#[derive(Debug, Clone)]
pub struct FeedBroadcaster {
    sender: Sender<ServerEvent>,
}

impl FeedBroadcaster {
    /// Creates a broadcaster with the default channel capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Creates a broadcaster with the specified channel capacity.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        debug!(capacity, "Created feed broadcaster");
        Self { sender }
    }

    /// Subscribes to receive events broadcast after this call.
    #[must_use]
    pub fn subscribe(&self) -> Receiver<ServerEvent> {
        let rx = self.sender.subscribe();
        debug!(
            subscriber_count = self.subscriber_count(),
            "New subscriber added"
        );
        rx
    }

    /// Broadcasts an event to all current subscribers.
    ///
    /// Returns the number of subscribers that received the event. Never
    /// blocks; with no subscribers the event is dropped and 0 is returned.
    pub fn broadcast(&self, event: ServerEvent) -> usize {
        trace!(event = event.name(), "Broadcasting event");

        match self.sender.send(event) {
            Ok(receivers) => {
                trace!(receivers, "Event broadcast successful");
                receivers
            }
            Err(_) => {
                warn!("No active subscribers to receive event");
                0
            }
        }
    }

    /// Returns the current number of active subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for FeedBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

/// The live set of authenticated connections.
///
/// Each entry maps a connection id (minted on join) to the user id resolved
/// by the handshake guard. The registry is an explicit object passed by
/// reference through the application state rather than ambient global state,
/// so connect/disconnect bookkeeping stays visible at the call sites.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<Uuid, Uuid>>,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection for the given user and returns its
    /// connection id.
    pub fn join(&self, user_id: Uuid) -> Uuid {
        let connection_id = Uuid::new_v4();
        let mut connections = self.connections.write().unwrap();
        connections.insert(connection_id, user_id);
        debug!(
            connection_id = %connection_id,
            user_id = %user_id,
            live = connections.len(),
            "Connection joined"
        );
        connection_id
    }

    /// Removes a connection. Returns the user id it was tagged with, or
    /// `None` if the connection was not registered.
    pub fn leave(&self, connection_id: Uuid) -> Option<Uuid> {
        let mut connections = self.connections.write().unwrap();
        let user_id = connections.remove(&connection_id);
        if let Some(user_id) = user_id {
            debug!(
                connection_id = %connection_id,
                user_id = %user_id,
                live = connections.len(),
                "Connection left"
            );
        }
        user_id
    }

    /// Returns the user id a live connection is tagged with.
    #[must_use]
    pub fn user_of(&self, connection_id: Uuid) -> Option<Uuid> {
        self.connections.read().unwrap().get(&connection_id).copied()
    }

    /// Number of live connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.read().unwrap().len()
    }

    /// Returns true if no connections are live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.read().unwrap().is_empty()
    }
}
