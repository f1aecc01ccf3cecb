//! Orchestrates a single logical operation: select a server, check out a connection, build and
//! send the command, classify the reply, and retry at most once.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex as StdMutex},
};

use tokio::sync::{Notify, RwLock};

use crate::{
    bson::{document::Document, Bson},
    cluster_time::ClusterTime,
    cmap::{ConnectionPool, ConnectionPoolOptions},
    error::{
        CommandError, Error, ErrorKind, Result, WriteConcernError, RETRYABLE_WRITE_ERROR, TRANSIENT_TRANSACTION_ERROR,
    },
    event::EventBroadcaster,
    operation::{Operation, Retryability},
    options::{ClientOptions, ServerAddress},
    sdam::{monitor::Monitor, server_selection, TopologyState},
    session::ClientSession,
};

/// Owns the topology state, the per-server connection pools and their monitors, and the
/// client-wide gossiped `$clusterTime`. A `Client` is a thin handle around one of these.
pub struct Executor {
    pub topology: Arc<TopologyState>,
    pub options: ClientOptions,
    pools: RwLock<HashMap<ServerAddress, Arc<ConnectionPool>>>,
    monitor_cancels: StdMutex<HashMap<ServerAddress, Arc<Notify>>>,
    cluster_time: StdMutex<Option<ClusterTime>>,
    events: EventBroadcaster,
}

impl Executor {
    pub fn new(options: ClientOptions, events: EventBroadcaster) -> Arc<Self> {
        let topology = TopologyState::new(&options, events.clone());
        let executor = Arc::new(Self {
            topology,
            pools: RwLock::new(HashMap::new()),
            monitor_cancels: StdMutex::new(HashMap::new()),
            cluster_time: StdMutex::new(None),
            options,
            events,
        });
        let seeds = executor.options.hosts.clone();
        for address in seeds {
            executor.start_monitored_pool(address);
        }
        executor
    }

    pub fn cluster_time(&self) -> Option<ClusterTime> {
        self.cluster_time.lock().expect("mutex poisoned").clone()
    }

    fn advance_cluster_time(&self, candidate: Option<ClusterTime>) {
        let mut current = self.cluster_time.lock().expect("mutex poisoned");
        crate::cluster_time::advance(&mut current, candidate);
    }

    /// Looks up the pool for `address`, creating it (and its paired monitor) on first use — for
    /// hosts discovered via a replica-set member list rather than the original seed list.
    async fn pool_for(self: &Arc<Self>, address: &ServerAddress) -> Arc<ConnectionPool> {
        if let Some(pool) = self.pools.read().await.get(address) {
            return pool.clone();
        }
        let mut pools = self.pools.write().await;
        if let Some(pool) = pools.get(address) {
            return pool.clone();
        }
        let pool_options = ConnectionPoolOptions::from_client_options(&self.options, self.events.clone());
        let pool = ConnectionPool::new(address.clone(), self.options.clone(), pool_options);
        pools.insert(address.clone(), pool.clone());
        drop(pools);
        self.spawn_monitor_for(address.clone(), pool.clone());
        pool
    }

    /// Creates a pool for `address`, inserts it synchronously (only called from [`Self::new`],
    /// before any other task can contend for the map), and spawns its paired monitor.
    fn start_monitored_pool(self: &Arc<Self>, address: ServerAddress) -> Arc<ConnectionPool> {
        let pool_options = ConnectionPoolOptions::from_client_options(&self.options, self.events.clone());
        let pool = ConnectionPool::new(address.clone(), self.options.clone(), pool_options);
        self.pools
            .try_write()
            .expect("pool map is uncontended during construction")
            .insert(address.clone(), pool.clone());
        self.spawn_monitor_for(address, pool.clone());
        pool
    }

    /// Spawns the heartbeat monitor for `address`, wired to feed `ready()`/`clear()` calls into
    /// `pool` as checks succeed or fail.
    fn spawn_monitor_for(self: &Arc<Self>, address: ServerAddress, pool: Arc<ConnectionPool>) {
        let (monitor, cancel) = Monitor::new(address.clone(), self.options.clone(), self.topology.clone(), pool);
        self.monitor_cancels.lock().expect("mutex poisoned").insert(address, cancel);
        tokio::spawn(monitor.run());
    }

    /// Executes `op` against a server satisfying its selection criteria, applying the retryable
    /// reads/writes policy: at most one retry, against a possibly different server, never
    /// reusing the failed connection.
    pub async fn execute<Op: Operation>(self: &Arc<Self>, op: &Op, session: Option<&ClientSession>) -> Result<Op::Output> {
        self.execute_with_address(op, session).await.map(|(_address, output)| output)
    }

    /// Like [`Self::execute`], but also returns the address of the server the (possibly retried)
    /// attempt actually succeeded against — needed to pin a freshly opened cursor to its owner.
    pub async fn execute_with_address<Op: Operation>(
        self: &Arc<Self>,
        op: &Op,
        session: Option<&ClientSession>,
    ) -> Result<(ServerAddress, Op::Output)> {
        // Reserved once per logical write, outside the retry loop, so a retry reuses the exact
        // txnNumber the server saw on the original attempt instead of minting a new one.
        let reserved_txn_number = self.reserve_txn_number(op, session);
        match self.execute_attempt(op, session, reserved_txn_number).await {
            Ok(result) => Ok(result),
            Err(original_error) => {
                if !self.should_retry(op, &original_error, session) {
                    return Err(original_error);
                }
                match self.execute_attempt(op, session, reserved_txn_number).await {
                    Ok(result) => Ok(result),
                    Err(retry_error) => {
                        // If the retry itself fails with a network error, surface the *original*
                        // failure, not the retry's.
                        if retry_error.is_network_error() {
                            Err(original_error)
                        } else {
                            Err(retry_error)
                        }
                    }
                }
            }
        }
    }

    /// Reserves the `txnNumber` a standalone (non-transaction) retryable write will use, once per
    /// logical operation. Transactions don't go through this path: their `txnNumber` is fixed for
    /// the whole transaction by `ClientSession::start_transaction`.
    fn reserve_txn_number<Op: Operation>(&self, op: &Op, session: Option<&ClientSession>) -> Option<i64> {
        let session = session?;
        if !matches!(op.retryability(), Retryability::Write) || !self.options.retry_writes {
            return None;
        }
        if !matches!(session.transaction_state(), crate::session::TransactionState::None) {
            return None;
        }
        Some(session.advance_txn_number())
    }

    fn should_retry<Op: Operation>(&self, op: &Op, error: &Error, session: Option<&ClientSession>) -> bool {
        match op.retryability() {
            Retryability::None => false,
            Retryability::Read => self.options.retry_reads && (error.is_network_error() || error.is_read_retryable()),
            Retryability::Write => {
                let txn_active = session
                    .map(|s| !matches!(s.transaction_state(), crate::session::TransactionState::None))
                    .unwrap_or(false);
                let retry_enabled = self.options.retry_writes || txn_active;
                retry_enabled
                    && (error.is_network_error()
                        || error.contains_label(RETRYABLE_WRITE_ERROR)
                        || error.contains_label(TRANSIENT_TRANSACTION_ERROR)
                        || error.write_concern_error_is_retryable())
            }
        }
    }

    /// Executes `op` against a specific server, bypassing selection entirely — used to drive and
    /// kill a cursor against the server that opened it, which must never move.
    pub async fn execute_pinned<Op: Operation>(
        self: &Arc<Self>,
        op: &Op,
        address: &ServerAddress,
        session: Option<&ClientSession>,
    ) -> Result<Op::Output> {
        let reserved_txn_number = self.reserve_txn_number(op, session);
        self.execute_attempt_at(op, address.clone(), session, reserved_txn_number)
            .await
            .map(|(_address, output)| output)
    }

    async fn execute_attempt<Op: Operation>(
        self: &Arc<Self>,
        op: &Op,
        session: Option<&ClientSession>,
        reserved_txn_number: Option<i64>,
    ) -> Result<(ServerAddress, Op::Output)> {
        let address = match session.and_then(ClientSession::pinned_mongos) {
            Some(pinned) => pinned,
            None => {
                let criteria = op.selection_criteria().cloned().unwrap_or_default();
                // In-flight load per address isn't tracked here; every candidate is weighted
                // equally and power-of-two-choices degrades to picking a random one.
                server_selection::select_server(&self.topology, &criteria, self.options.server_selection_timeout, &|_addr| 0)
                    .await?
            }
        };
        self.execute_attempt_at(op, address, session, reserved_txn_number).await
    }

    async fn execute_attempt_at<Op: Operation>(
        self: &Arc<Self>,
        op: &Op,
        address: ServerAddress,
        session: Option<&ClientSession>,
        reserved_txn_number: Option<i64>,
    ) -> Result<(ServerAddress, Op::Output)> {
        let pool = self.pool_for(&address).await;
        let mut connection = pool.check_out().await?;

        let stream_description = connection.stream_description.clone().unwrap_or_default();
        let command = self.build_command(op, session, &stream_description, reserved_txn_number);

        let deadline = self.options.socket_timeout.or(self.options.timeout);
        let send_result = connection.send_command(command, deadline).await;

        let reply = match send_result {
            Ok(reply) => reply,
            Err(error) => {
                connection.mark_errored(&error);
                self.topology.mark_server_unknown(&address, error.clone()).await;
                pool.clear(error.clone(), stream_description.service_id).await;
                return Err(error);
            }
        };

        if let Some(session) = session {
            session.process_reply(&reply);
        }
        self.advance_cluster_time(ClusterTime::from_document(&reply));

        if let Some(mut error) = extract_error(&reply) {
            if error.sdam_code().is_some() && (error.is_notwritableprimary() || error.is_recovering() || error.is_shutting_down()) {
                connection.mark_errored(&error);
                self.topology.mark_server_unknown(&address, error.clone()).await;
                pool.clear(error.clone(), stream_description.service_id).await;
            }
            if op.is_write() && error.should_add_retryable_write_label(stream_description.max_wire_version) {
                error.add_label(RETRYABLE_WRITE_ERROR);
                connection.mark_errored(&error);
            }
            return Err(error);
        }

        op.handle_response(&reply, &stream_description).map(|output| (address, output))
    }

    fn build_command<Op: Operation>(
        &self,
        op: &Op,
        session: Option<&ClientSession>,
        _description: &crate::cmap::StreamDescription,
        reserved_txn_number: Option<i64>,
    ) -> Document {
        let mut command = op.build_command();
        command.insert("$db", Bson::String(op.target_db().to_string()));

        if let Some(session) = session {
            if let Some(Bson::Document(lsid)) = session.server_session.to_document().get("lsid").cloned() {
                command.insert("lsid", Bson::Document(lsid));
            }
            if !matches!(session.transaction_state(), crate::session::TransactionState::None) {
                command.insert("txnNumber", Bson::Int64(session.txn_number()));
                command.insert("autocommit", Bson::Boolean(false));
                if session.transaction_state() == crate::session::TransactionState::Starting {
                    command.insert("startTransaction", Bson::Boolean(true));
                    let options = session.transaction_options();
                    if let Some(read_concern) = options.read_concern.as_ref().and_then(|rc| rc.to_document()) {
                        command.insert("readConcern", Bson::Document(read_concern));
                    }
                    session.mark_transaction_in_progress();
                }
            } else if let Some(txn_number) = reserved_txn_number {
                command.insert("txnNumber", Bson::Int64(txn_number));
            }

            if session.causally_consistent {
                if let Some(operation_time) = session.operation_time() {
                    command.insert("afterClusterTime", Bson::Timestamp(operation_time));
                }
            }
        }

        let gossiped = match session.and_then(ClientSession::cluster_time) {
            Some(session_time) => {
                let executor_time = self.cluster_time();
                match executor_time {
                    Some(executor_time) if executor_time > session_time => Some(executor_time),
                    _ => Some(session_time),
                }
            }
            None => self.cluster_time(),
        };
        if let Some(cluster_time) = gossiped {
            command.insert("$clusterTime", Bson::Document(cluster_time.to_document()));
        }

        command
    }
}

/// Builds an [`Error`] out of an `ok: 0` reply, or a successful reply that still carries an
/// embedded `writeConcernError`.
fn extract_error(reply: &Document) -> Option<Error> {
    let ok = matches!(reply.get("ok"), Some(Bson::Double(n)) if *n == 1.0) || matches!(reply.get("ok"), Some(Bson::Int32(1)));

    let labels: Vec<String> = match reply.get("errorLabels") {
        Some(Bson::Array(items)) => items
            .iter()
            .filter_map(|b| match b {
                Bson::String(s) => Some(s.clone()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };

    if !ok {
        let code = match reply.get("code") {
            Some(Bson::Int32(c)) => *c,
            Some(Bson::Int64(c)) => *c as i32,
            Some(Bson::Double(c)) => *c as i32,
            _ => 0,
        };
        let code_name = match reply.get("codeName") {
            Some(Bson::String(s)) => s.clone(),
            _ => String::new(),
        };
        let message = match reply.get("errmsg") {
            Some(Bson::String(s)) => s.clone(),
            _ => "command failed".to_string(),
        };
        return Some(Error::new(
            ErrorKind::Command(CommandError {
                code,
                code_name,
                message,
                error_labels: labels.clone(),
                raw: reply.clone(),
            }),
            labels,
        ));
    }

    if let Some(Bson::Document(wce)) = reply.get("writeConcernError") {
        let code = match wce.get("code") {
            Some(Bson::Int32(c)) => *c,
            Some(Bson::Int64(c)) => *c as i32,
            _ => 0,
        };
        let code_name = match wce.get("codeName") {
            Some(Bson::String(s)) => s.clone(),
            _ => String::new(),
        };
        let message = match wce.get("errmsg") {
            Some(Bson::String(s)) => s.clone(),
            _ => "write concern error".to_string(),
        };
        return Some(Error::new(
            ErrorKind::WriteConcern(WriteConcernError { code, code_name, message }),
            labels,
        ));
    }

    None
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::operation::RunCommand;

    fn executor() -> Arc<Executor> {
        let options = ClientOptions::direct_single(ServerAddress::parse("localhost:27017"));
        Executor::new(options, EventBroadcaster::default())
    }

    fn op_with_retryability(retryability: Retryability) -> RunCommand {
        let mut op = RunCommand::new("admin", Document::new());
        op.retryability = retryability;
        op
    }

    #[tokio::test]
    async fn non_retryable_operations_never_retry_regardless_of_error() {
        let executor = executor();
        let op = op_with_retryability(Retryability::None);
        assert!(!executor.should_retry(&op, &Error::network_timeout(), None));
    }

    #[tokio::test]
    async fn reads_retry_on_network_errors_when_retry_reads_is_enabled() {
        let executor = executor();
        let op = op_with_retryability(Retryability::Read);
        assert!(executor.should_retry(&op, &Error::network_timeout(), None));
    }

    #[tokio::test]
    async fn reads_do_not_retry_when_retry_reads_is_disabled() {
        let options = ClientOptions::builder()
            .hosts(vec![ServerAddress::parse("localhost:27017")])
            .retry_reads(false)
            .build();
        let executor = Executor::new(options, EventBroadcaster::default());
        let op = op_with_retryability(Retryability::Read);
        assert!(!executor.should_retry(&op, &Error::network_timeout(), None));
    }

    #[tokio::test]
    async fn writes_retry_on_a_retryable_write_error_label() {
        let executor = executor();
        let op = op_with_retryability(Retryability::Write);
        let mut error = Error::internal("duplicate key");
        error.add_label(RETRYABLE_WRITE_ERROR);
        assert!(executor.should_retry(&op, &error, None));
    }

    #[tokio::test]
    async fn writes_do_not_retry_on_an_unlabeled_non_network_error() {
        let executor = executor();
        let op = op_with_retryability(Retryability::Write);
        let error = Error::internal("duplicate key");
        assert!(!executor.should_retry(&op, &error, None));
    }

    #[test]
    fn extract_error_reports_command_failures() {
        let mut reply = Document::new();
        reply.insert("ok", Bson::Double(0.0));
        reply.insert("code", Bson::Int32(11600));
        reply.insert("codeName", Bson::String("InterruptedAtShutdown".to_string()));
        reply.insert("errmsg", Bson::String("shutting down".to_string()));

        let error = extract_error(&reply).expect("ok:0 reply must produce an error");
        assert!(error.is_shutting_down());
    }

    #[test]
    fn extract_error_reports_embedded_write_concern_errors_on_an_otherwise_ok_reply() {
        let mut wce = Document::new();
        wce.insert("code", Bson::Int32(64));
        wce.insert("errmsg", Bson::String("waiting for replication timed out".to_string()));

        let mut reply = Document::new();
        reply.insert("ok", Bson::Double(1.0));
        reply.insert("writeConcernError", Bson::Document(wce));

        let error = extract_error(&reply).expect("embedded writeConcernError must produce an error");
        assert!(error.write_concern_error_is_retryable());
    }

    #[test]
    fn extract_error_returns_none_for_a_clean_ok_reply() {
        let mut reply = Document::new();
        reply.insert("ok", Bson::Double(1.0));
        reply.insert("n", Bson::Int32(1));
        assert!(extract_error(&reply).is_none());
    }
}
