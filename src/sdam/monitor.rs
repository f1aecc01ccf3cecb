//! The per-server heartbeat monitor: connects once, then issues `hello` in a loop (streaming via
//! `topologyVersion`/`maxAwaitTimeMS` once the server has advertised one), folding each reply or
//! failure into the shared [`TopologyState`].

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::sync::Notify;

use crate::{
    bson::{document::Document, Bson},
    cmap::ConnectionPool,
    error::{Error, Result},
    event::{Event, ServerHeartbeatFailedEvent, ServerHeartbeatStartedEvent, ServerHeartbeatSucceededEvent},
    options::{ClientOptions, DriverInfo, ServerAddress},
    sdam::{
        description::{HelloCommandResponse, HelloReply, ServerDescription, TopologyVersion},
        TopologyState,
    },
    transport::Transport,
    wire::{self, header::next_request_id, message::Message},
};

/// The floor under which heartbeats never run faster, even under repeated `requestImmediateCheck`
/// calls.
pub const MIN_HEARTBEAT_FREQUENCY: Duration = Duration::from_millis(500);

const RTT_EWMA_ALPHA: f64 = 0.2;

pub struct Monitor {
    address: ServerAddress,
    options: ClientOptions,
    state: Arc<TopologyState>,
    pool: Arc<ConnectionPool>,
    connection: Option<Transport>,
    average_rtt: Option<Duration>,
    topology_version: Option<TopologyVersion>,
    cancel: Arc<Notify>,
}

impl Monitor {
    pub fn new(
        address: ServerAddress,
        options: ClientOptions,
        state: Arc<TopologyState>,
        pool: Arc<ConnectionPool>,
    ) -> (Self, Arc<Notify>) {
        let cancel = Arc::new(Notify::new());
        (
            Self {
                address,
                options,
                state,
                pool,
                connection: None,
                average_rtt: None,
                topology_version: None,
                cancel: cancel.clone(),
            },
            cancel,
        )
    }

    pub async fn run(mut self) {
        loop {
            self.check_server().await;

            let wait = tokio::time::sleep(MIN_HEARTBEAT_FREQUENCY.max(
                self.options.heartbeat_frequency.saturating_sub(MIN_HEARTBEAT_FREQUENCY),
            ));
            tokio::select! {
                _ = self.cancel.notified() => return,
                _ = wait => {}
            }
        }
    }

    async fn check_server(&mut self) {
        #[cfg(feature = "tracing-unstable")]
        let _span = tracing::trace_span!("heartbeat", address = %self.address).entered();

        self.state.events.emit(Event::ServerHeartbeatStarted(ServerHeartbeatStartedEvent {
            address: self.address.clone(),
        }));

        let start = Instant::now();
        let result = self.perform_hello().await;
        let duration = start.elapsed();

        match result {
            Ok(reply) => {
                self.average_rtt = Some(match self.average_rtt {
                    Some(previous) => ewma(previous, duration),
                    None => duration,
                });
                self.state.events.emit(Event::ServerHeartbeatSucceeded(ServerHeartbeatSucceededEvent {
                    address: self.address.clone(),
                    duration,
                }));

                // A streaming hello can race a cancelled-and-restarted exchange on the same
                // socket; drop a reply whose topologyVersion doesn't advance past the last one we
                // folded in, rather than overwriting newer state with stale state.
                let incoming_topology_version = reply.command_response.topology_version;
                let is_stale = match (incoming_topology_version, self.topology_version) {
                    (Some(incoming), Some(previous)) => !incoming.is_more_recent_than(previous),
                    _ => false,
                };
                self.pool.ready().await;
                if is_stale {
                    return;
                }
                self.topology_version = incoming_topology_version;
                let description = ServerDescription::new_from_hello_reply(
                    self.address.clone(),
                    reply,
                    self.average_rtt.unwrap_or(duration),
                );
                self.state.update(description).await;
            }
            Err(error) => {
                self.connection = None;
                self.average_rtt = None;
                self.topology_version = None;
                #[cfg(feature = "tracing-unstable")]
                tracing::debug!(address = %self.address, %error, "heartbeat failed");
                self.state.events.emit(Event::ServerHeartbeatFailed(ServerHeartbeatFailedEvent {
                    address: self.address.clone(),
                    duration,
                    message: error.to_string(),
                }));
                // A state-change error (not master / shutting down / recovering) invalidates the
                // pool too, since a state-change error means the server's identity is unknown.
                self.pool.clear(error.clone(), None).await;
                let description = ServerDescription::new_from_error(self.address.clone(), error);
                self.state.update(description).await;
            }
        }
    }

    async fn perform_hello(&mut self) -> Result<HelloReply> {
        if self.connection.is_none() {
            let transport = Transport::connect(
                &self.address,
                self.options.connect_timeout,
                #[cfg(feature = "rustls-tls")]
                None,
            )
            .await?;
            self.connection = Some(transport);
            self.topology_version = None;
        }

        let command = self.build_hello_command();
        let read_timeout = self
            .topology_version
            .map(|_| self.options.connect_timeout + self.options.heartbeat_frequency);

        let result = self.send_hello(command, read_timeout).await;
        if result.is_err() {
            self.connection = None;
        }
        result
    }

    fn build_hello_command(&self) -> Document {
        let mut command = Document::new();
        command.insert("hello", Bson::Int32(1));
        command.insert("helloOk", Bson::Boolean(true));
        if let Some(topology_version) = self.topology_version {
            let mut tv = Document::new();
            tv.insert("processId", Bson::ObjectId(topology_version.process_id));
            tv.insert("counter", Bson::Int64(topology_version.counter));
            command.insert("topologyVersion", Bson::Document(tv));
            command.insert(
                "maxAwaitTimeMS",
                Bson::Int64(self.options.heartbeat_frequency.as_millis() as i64),
            );
        } else {
            let driver_info = DriverInfo::default();
            let mut client = Document::new();
            let mut driver = Document::new();
            driver.insert("name", Bson::String(driver_info.name));
            driver.insert("version", Bson::String(driver_info.version));
            client.insert("driver", Bson::Document(driver));
            if let Some(app_name) = &self.options.app_name {
                let mut application = Document::new();
                application.insert("name", Bson::String(app_name.clone()));
                client.insert("application", Bson::Document(application));
            }
            command.insert("client", Bson::Document(client));
        }
        command.insert("$db", Bson::String("admin".to_string()));
        command
    }

    async fn send_hello(&mut self, command: Document, read_timeout: Option<Duration>) -> Result<HelloReply> {
        let transport = self.connection.as_mut().expect("connection established above");
        let request_id = next_request_id();
        let frame = wire::message::encode_request(request_id, &Message::with_document(command));

        transport.write_all(&frame, Some(self.options.connect_timeout)).await?;

        let mut header_bytes = [0u8; wire::header::HEADER_LEN];
        transport.read_exact(&mut header_bytes, read_timeout).await?;
        let header = wire::header::Header::from_bytes(header_bytes);
        let body_len = header.length as usize - wire::header::HEADER_LEN;
        let mut body = vec![0u8; body_len];
        transport.read_exact(&mut body, read_timeout).await?;

        let message = wire::message::decode_frame(header, &body)?;
        let reply_document = message
            .command_document()
            .cloned()
            .ok_or_else(|| Error::invalid_argument("hello reply carried no command document"))?;

        let ok = matches!(reply_document.get("ok"), Some(Bson::Double(n)) if *n == 1.0)
            || matches!(reply_document.get("ok"), Some(Bson::Int32(1)));
        if !ok {
            return Err(Error::invalid_argument("hello command failed"));
        }

        Ok(HelloReply {
            command_response: HelloCommandResponse::from_document(&reply_document),
            cluster_time: crate::cluster_time::ClusterTime::from_document(&reply_document),
        })
    }
}

fn ewma(previous: Duration, latest: Duration) -> Duration {
    let previous = previous.as_secs_f64();
    let latest = latest.as_secs_f64();
    Duration::from_secs_f64(RTT_EWMA_ALPHA * latest + (1.0 - RTT_EWMA_ALPHA) * previous)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ewma_smooths_toward_the_latest_sample() {
        let previous = Duration::from_millis(100);
        let latest = Duration::from_millis(200);
        let smoothed = ewma(previous, latest);
        assert!(smoothed > previous && smoothed < latest);
    }
}
