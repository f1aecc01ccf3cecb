//! Server discovery and monitoring: server/topology descriptions, the heartbeat monitor, and
//! server selection.

pub mod description;
pub mod monitor;
pub mod server_selection;
pub mod topology;

use std::sync::Arc;

use tokio::sync::{Notify, RwLock};

use crate::{event::EventBroadcaster, options::ClientOptions};

use self::topology::TopologyDescription;

/// The shared, lock-protected topology state. Every monitor updates it; every server-selection
/// call reads from it and is woken by `changed` when an update may have satisfied its criteria.
pub struct TopologyState {
    pub description: RwLock<TopologyDescription>,
    pub changed: Notify,
    pub events: EventBroadcaster,
}

impl TopologyState {
    pub fn new(options: &ClientOptions, events: EventBroadcaster) -> Arc<Self> {
        Arc::new(Self {
            description: RwLock::new(TopologyDescription::new(options)),
            changed: Notify::new(),
            events,
        })
    }

    pub async fn update(&self, server_description: description::ServerDescription) {
        let mut description = self.description.write().await;
        let previous_type = description
            .servers
            .get(&server_description.address)
            .map(|s| s.server_type)
            .unwrap_or_default();
        let new_type = server_description.server_type;
        let address = server_description.address.clone();
        description.update(server_description);
        drop(description);
        if previous_type != new_type {
            self.events.emit(crate::event::Event::ServerDescriptionChanged(
                crate::event::ServerDescriptionChangedEvent {
                    address,
                    previous_server_type: previous_type,
                    new_server_type: new_type,
                },
            ));
        }
        self.changed.notify_waiters();
    }

    pub async fn mark_server_unknown(&self, address: &crate::options::ServerAddress, error: crate::error::Error) {
        let mut description = self.description.write().await;
        description.mark_server_unknown(address, error);
        drop(description);
        self.changed.notify_waiters();
    }
}
