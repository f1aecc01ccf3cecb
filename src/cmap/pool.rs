//! The per-server connection pool: check-out/check-in, background establishment up to
//! `max_connecting`, idle reaping, and generation-based invalidation on `clear()`.
//!
//! The real driver runs this as a dedicated background worker communicating over channels; here
//! the same state machine is expressed with a `tokio::sync::Mutex`-guarded state struct plus a
//! `Notify` for wake-ups, which is simpler to reason about for a from-scratch core and behaves
//! identically from the caller's point of view.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::Instant,
};

use tokio::sync::{Mutex, Notify, Semaphore};

use crate::{
    bson::oid::ObjectId,
    cmap::{
        conn::{Connection, ConnectionGeneration},
        establish::establish_connection,
        options::ConnectionPoolOptions,
    },
    error::{Error, ErrorKind, Result},
    event::{
        ConnectionCheckOutFailedEvent, ConnectionCheckOutStartedEvent, ConnectionCheckedInEvent,
        ConnectionCheckedOutEvent, ConnectionCheckoutFailedReason, ConnectionClosedReason, ConnectionCreatedEvent,
        ConnectionReadyEvent, Event, PoolClearedEvent, PoolClosedEvent, PoolCreatedEvent, PoolReadyEvent,
    },
    options::{ClientOptions, ServerAddress},
};

struct PoolState {
    available: VecDeque<Connection>,
    total: u32,
    generation: u32,
    /// Per-`serviceId` generations, bumped independently of `generation` when load balancing
    /// to a pool shared across multiple backend servers.
    service_generations: HashMap<ObjectId, u32>,
    paused: bool,
    closed: bool,
    clear_cause: Option<Error>,
}

/// A connection on loan from the pool. Returned to `available` when dropped, or closed outright
/// if it errored or the pool's generation has moved past it.
pub struct PooledConnection {
    connection: Option<Connection>,
    pool: Arc<ConnectionPool>,
}

impl std::ops::Deref for PooledConnection {
    type Target = Connection;
    fn deref(&self) -> &Connection {
        self.connection.as_ref().expect("connection taken only on drop")
    }
}

impl std::ops::DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.connection.as_mut().expect("connection taken only on drop")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            let pool = self.pool.clone();
            tokio::spawn(async move {
                pool.check_in(connection).await;
            });
        }
    }
}

pub struct ConnectionPool {
    pub address: ServerAddress,
    client_options: ClientOptions,
    pool_options: ConnectionPoolOptions,
    state: Mutex<PoolState>,
    changed: Notify,
    connecting: Semaphore,
    next_connection_id: AtomicU32,
}

impl ConnectionPool {
    pub fn new(address: ServerAddress, client_options: ClientOptions, pool_options: ConnectionPoolOptions) -> Arc<Self> {
        pool_options.events.emit(Event::PoolCreated(PoolCreatedEvent {
            address: address.clone(),
        }));
        let max_connecting = pool_options.max_connecting as usize;
        Arc::new(Self {
            address,
            client_options,
            pool_options,
            state: Mutex::new(PoolState {
                available: VecDeque::new(),
                total: 0,
                generation: 0,
                service_generations: HashMap::new(),
                paused: true,
                closed: false,
                clear_cause: None,
            }),
            changed: Notify::new(),
            connecting: Semaphore::new(max_connecting),
            next_connection_id: AtomicU32::new(1),
        })
    }

    /// Marks the pool ready to hand out connections, emitted once a server's monitor has
    /// confirmed it reachable.
    pub async fn ready(&self) {
        let mut state = self.state.lock().await;
        if state.paused {
            state.paused = false;
            self.pool_options.events.emit(Event::PoolReady(PoolReadyEvent {
                address: self.address.clone(),
            }));
        }
        self.changed.notify_waiters();
    }

    /// Invalidates every connection opened before this call: in-pool connections are dropped
    /// immediately, checked-out ones are dropped on check-in.
    pub async fn clear(&self, cause: Error, service_id: Option<ObjectId>) {
        let mut state = self.state.lock().await;
        match service_id {
            Some(id) if self.client_options.load_balanced => {
                let generation = state.service_generations.entry(id).or_insert(0);
                *generation += 1;
            }
            _ => {
                state.generation += 1;
                state.paused = true;
            }
        }
        state.clear_cause = Some(cause);
        let stale_generation = state.generation;
        let stale_services = state.service_generations.clone();
        while let Some(pos) = state.available.iter().position(|c| {
            is_stale(c, stale_generation, &stale_services)
        }) {
            let connection = state.available.remove(pos).unwrap();
            state.total = state.total.saturating_sub(1);
            connection.emit_closed(&self.pool_options.events, ConnectionClosedReason::Stale);
        }
        self.pool_options.events.emit(Event::PoolCleared(PoolClearedEvent {
            address: self.address.clone(),
            service_id,
        }));
        drop(state);
        self.changed.notify_waiters();
    }

    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        state.closed = true;
        state.paused = true;
        while let Some(connection) = state.available.pop_front() {
            connection.emit_closed(&self.pool_options.events, ConnectionClosedReason::PoolClosed);
        }
        state.total = 0;
        self.pool_options.events.emit(Event::PoolClosed(PoolClosedEvent {
            address: self.address.clone(),
        }));
        drop(state);
        self.changed.notify_waiters();
    }

    /// Returns the number of connections currently checked out plus available, for server
    /// selection's power-of-two-choices load metric.
    pub async fn in_use_count(&self) -> usize {
        let state = self.state.lock().await;
        state.total as usize - state.available.len()
    }

    pub async fn check_out(self: &Arc<Self>) -> Result<PooledConnection> {
        self.pool_options.events.emit(Event::ConnectionCheckOutStarted(ConnectionCheckOutStartedEvent {
            address: self.address.clone(),
        }));

        let deadline = if self.pool_options.wait_queue_timeout.is_zero() {
            None
        } else {
            Some(tokio::time::Instant::now() + self.pool_options.wait_queue_timeout)
        };

        loop {
            {
                let mut state = self.state.lock().await;
                if state.closed {
                    self.fail_checkout(ConnectionCheckoutFailedReason::PoolClosed);
                    return Err(ErrorKind::PoolClosed {
                        address: self.address.clone(),
                    }
                    .into());
                }

                while let Some(connection) = state.available.pop_front() {
                    if self.has_perished(&connection, &state) {
                        state.total = state.total.saturating_sub(1);
                        connection.emit_closed(&self.pool_options.events, ConnectionClosedReason::Stale);
                        continue;
                    }
                    self.pool_options.events.emit(Event::ConnectionCheckedOut(ConnectionCheckedOutEvent {
                        address: self.address.clone(),
                        connection_id: connection.id,
                    }));
                    return Ok(PooledConnection {
                        connection: Some(connection),
                        pool: self.clone(),
                    });
                }

                if !state.paused && state.total < self.pool_options.max_pool_size {
                    state.total += 1;
                    let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
                    let generation = ConnectionGeneration::Normal(state.generation);
                    drop(state);
                    return self.establish_and_check_out(id, generation).await;
                }

                if state.paused {
                    let cause = state.clear_cause.clone();
                    drop(state);
                    self.fail_checkout(ConnectionCheckoutFailedReason::ConnectionError);
                    return Err(match cause {
                        Some(cause) => Error::pool_cleared(&self.address, &cause),
                        None => ErrorKind::PoolClosed {
                            address: self.address.clone(),
                        }
                        .into(),
                    });
                }
            }

            match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
                    if remaining.is_zero() {
                        self.fail_checkout(ConnectionCheckoutFailedReason::Timeout);
                        return Err(ErrorKind::WaitQueueTimeout {
                            address: self.address.clone(),
                        }
                        .into());
                    }
                    tokio::select! {
                        _ = self.changed.notified() => {}
                        _ = tokio::time::sleep(remaining) => {}
                    }
                }
                None => self.changed.notified().await,
            }
        }
    }

    async fn establish_and_check_out(self: &Arc<Self>, id: u32, generation: ConnectionGeneration) -> Result<PooledConnection> {
        let _permit = self.connecting.acquire().await.expect("semaphore never closed");
        self.pool_options.events.emit(Event::ConnectionCreated(ConnectionCreatedEvent {
            address: self.address.clone(),
            connection_id: id,
        }));

        match establish_connection(id, self.address.clone(), generation, &self.client_options).await {
            Ok(mut connection) => {
                if let Some(service_id) = connection.stream_description.as_ref().and_then(|sd| sd.service_id) {
                    connection.generation = ConnectionGeneration::Pinned {
                        generation: generation.generation(),
                        service_id,
                    };
                }
                connection.ready_and_available_since = Some(Instant::now());
                self.pool_options.events.emit(Event::ConnectionReady(ConnectionReadyEvent {
                    address: self.address.clone(),
                    connection_id: id,
                }));
                self.pool_options.events.emit(Event::ConnectionCheckedOut(ConnectionCheckedOutEvent {
                    address: self.address.clone(),
                    connection_id: id,
                }));
                Ok(PooledConnection {
                    connection: Some(connection),
                    pool: self.clone(),
                })
            }
            Err(error) => {
                let mut state = self.state.lock().await;
                state.total = state.total.saturating_sub(1);
                drop(state);
                self.fail_checkout(ConnectionCheckoutFailedReason::ConnectionError);
                self.clear(error.clone(), None).await;
                Err(error)
            }
        }
    }

    async fn check_in(self: Arc<Self>, mut connection: Connection) {
        let mut state = self.state.lock().await;
        self.pool_options.events.emit(Event::ConnectionCheckedIn(ConnectionCheckedInEvent {
            address: self.address.clone(),
            connection_id: connection.id,
        }));

        let should_drop = state.closed || connection.has_errored() || self.has_perished(&connection, &state);
        if should_drop {
            state.total = state.total.saturating_sub(1);
            drop(state);
            let reason = if connection.has_errored() {
                ConnectionClosedReason::Error
            } else {
                ConnectionClosedReason::Stale
            };
            connection.emit_closed(&self.pool_options.events, reason);
        } else {
            connection.ready_and_available_since = Some(Instant::now());
            state.available.push_back(connection);
            drop(state);
        }
        self.changed.notify_waiters();
    }

    fn fail_checkout(&self, reason: ConnectionCheckoutFailedReason) {
        self.pool_options.events.emit(Event::ConnectionCheckOutFailed(ConnectionCheckOutFailedEvent {
            address: self.address.clone(),
            reason,
        }));
    }

    fn has_perished(&self, connection: &Connection, state: &PoolState) -> bool {
        is_stale(connection, state.generation, &state.service_generations) || connection.is_idle(self.pool_options.max_idle_time)
    }
}

fn is_stale(connection: &Connection, current_generation: u32, service_generations: &HashMap<ObjectId, u32>) -> bool {
    match connection.generation {
        ConnectionGeneration::Normal(g) => g < current_generation,
        ConnectionGeneration::Pinned { generation, service_id } => {
            generation < *service_generations.get(&service_id).unwrap_or(&current_generation)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn options() -> (ClientOptions, ConnectionPoolOptions) {
        let client_options = ClientOptions::direct_single(ServerAddress::parse("localhost:27017"));
        let pool_options = ConnectionPoolOptions::from_client_options(&client_options, crate::event::EventBroadcaster::default());
        (client_options, pool_options)
    }

    #[tokio::test]
    async fn checkout_against_a_closed_pool_fails_immediately() {
        let (client_options, pool_options) = options();
        let pool = ConnectionPool::new(ServerAddress::parse("localhost:27017"), client_options, pool_options);
        pool.close().await;
        let result = pool.check_out().await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn checkout_against_a_paused_unready_pool_fails_with_the_clear_cause() {
        let (client_options, pool_options) = options();
        let pool = ConnectionPool::new(ServerAddress::parse("localhost:27017"), client_options, pool_options);
        pool.clear(Error::internal("seed server unreachable"), None).await;
        let result = pool.check_out().await;
        assert!(result.is_err());
    }
}
