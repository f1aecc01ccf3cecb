//! Pool-level configuration, carved out of [`crate::options::ClientOptions`] so the pool doesn't
//! need to know about every other client knob.

use std::time::Duration;

use crate::{event::EventBroadcaster, options::ClientOptions};

#[derive(Clone)]
pub struct ConnectionPoolOptions {
    pub max_pool_size: u32,
    pub min_pool_size: u32,
    pub max_connecting: u32,
    pub max_idle_time: Option<Duration>,
    pub wait_queue_timeout: Duration,
    pub connect_timeout: Duration,
    pub load_balanced: bool,
    pub events: EventBroadcaster,
}

impl ConnectionPoolOptions {
    pub fn from_client_options(options: &ClientOptions, events: EventBroadcaster) -> Self {
        Self {
            max_pool_size: options.max_pool_size.max(1),
            min_pool_size: options.min_pool_size,
            max_connecting: options.max_connecting.max(1),
            max_idle_time: options.max_idle_time,
            wait_queue_timeout: options.wait_queue_timeout,
            connect_timeout: options.connect_timeout,
            load_balanced: options.load_balanced,
            events,
        }
    }
}
