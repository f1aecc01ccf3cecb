//! CMAP and SDAM monitoring events. A `Client` publishes these to any registered
//! [`EventHandler`] so applications can observe pool and topology behavior without coupling to
//! internals.

use std::{fmt, sync::Arc};

use crate::options::ServerAddress;

#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub struct PoolCreatedEvent {
    pub address: ServerAddress,
}

#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub struct PoolReadyEvent {
    pub address: ServerAddress,
}

#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub struct PoolClearedEvent {
    pub address: ServerAddress,
    pub service_id: Option<crate::bson::oid::ObjectId>,
}

#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub struct PoolClosedEvent {
    pub address: ServerAddress,
}

#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub struct ConnectionCreatedEvent {
    pub address: ServerAddress,
    pub connection_id: u32,
}

#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub struct ConnectionReadyEvent {
    pub address: ServerAddress,
    pub connection_id: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConnectionClosedReason {
    Idle,
    PoolClosed,
    Stale,
    Error,
    Dropped,
}

#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub struct ConnectionClosedEvent {
    pub address: ServerAddress,
    pub connection_id: u32,
    pub reason: ConnectionClosedReason,
}

#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub struct ConnectionCheckOutStartedEvent {
    pub address: ServerAddress,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConnectionCheckoutFailedReason {
    PoolClosed,
    Timeout,
    ConnectionError,
}

#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub struct ConnectionCheckOutFailedEvent {
    pub address: ServerAddress,
    pub reason: ConnectionCheckoutFailedReason,
}

#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub struct ConnectionCheckedOutEvent {
    pub address: ServerAddress,
    pub connection_id: u32,
}

#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub struct ConnectionCheckedInEvent {
    pub address: ServerAddress,
    pub connection_id: u32,
}

/// Emitted whenever a server's description changes as a result of a `hello` response (or a
/// monitoring error).
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub struct ServerDescriptionChangedEvent {
    pub address: ServerAddress,
    pub previous_server_type: crate::sdam::description::ServerType,
    pub new_server_type: crate::sdam::description::ServerType,
}

#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub struct ServerHeartbeatStartedEvent {
    pub address: ServerAddress,
}

#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub struct ServerHeartbeatSucceededEvent {
    pub address: ServerAddress,
    pub duration: std::time::Duration,
}

#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub struct ServerHeartbeatFailedEvent {
    pub address: ServerAddress,
    pub duration: std::time::Duration,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub struct TopologyOpeningEvent {
    pub topology_id: crate::bson::oid::ObjectId,
}

#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub struct TopologyClosedEvent {
    pub topology_id: crate::bson::oid::ObjectId,
}

/// One CMAP or SDAM event; dispatched to [`EventHandler`] as it happens.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum Event {
    PoolCreated(PoolCreatedEvent),
    PoolReady(PoolReadyEvent),
    PoolCleared(PoolClearedEvent),
    PoolClosed(PoolClosedEvent),
    ConnectionCreated(ConnectionCreatedEvent),
    ConnectionReady(ConnectionReadyEvent),
    ConnectionClosed(ConnectionClosedEvent),
    ConnectionCheckOutStarted(ConnectionCheckOutStartedEvent),
    ConnectionCheckOutFailed(ConnectionCheckOutFailedEvent),
    ConnectionCheckedOut(ConnectionCheckedOutEvent),
    ConnectionCheckedIn(ConnectionCheckedInEvent),
    ServerDescriptionChanged(ServerDescriptionChangedEvent),
    ServerHeartbeatStarted(ServerHeartbeatStartedEvent),
    ServerHeartbeatSucceeded(ServerHeartbeatSucceededEvent),
    ServerHeartbeatFailed(ServerHeartbeatFailedEvent),
    TopologyOpening(TopologyOpeningEvent),
    TopologyClosed(TopologyClosedEvent),
}

/// Receives events as a `Client` emits them. The default implementations are no-ops, so
/// implementors only override the events they care about.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: Event) {
        let _ = event;
    }
}

impl<F> EventHandler for F
where
    F: Fn(Event) + Send + Sync,
{
    fn handle(&self, event: Event) {
        (self)(event)
    }
}

/// Broadcasts events to zero or more registered handlers. Cheaply cloneable; every clone shares
/// the same handler list.
#[derive(Clone, Default)]
pub struct EventBroadcaster {
    handlers: Arc<Vec<Arc<dyn EventHandler>>>,
}

impl fmt::Debug for EventBroadcaster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBroadcaster")
            .field("handler_count", &self.handlers.len())
            .finish()
    }
}

impl EventBroadcaster {
    pub fn new(handlers: Vec<Arc<dyn EventHandler>>) -> Self {
        Self {
            handlers: Arc::new(handlers),
        }
    }

    pub fn emit(&self, event: Event) {
        for handler in self.handlers.iter() {
            handler.handle(event.clone());
        }
    }
}
