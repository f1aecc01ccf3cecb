//! Causally consistent sessions, `$clusterTime` gossip, and the transaction state machine.

use std::sync::{
    atomic::{AtomicI64, Ordering},
    Mutex,
};

use crate::{
    bson::{document::Document, oid::ObjectId, Bson},
    cluster_time::ClusterTime,
    concern::{ReadConcern, WriteConcern},
    error::{Error, Result, TRANSIENT_TRANSACTION_ERROR, UNKNOWN_TRANSACTION_COMMIT_RESULT},
    selection_criteria::SelectionCriteria,
};

/// A process-wide pool of freed logical session ids, so a long-lived client doesn't exhaust the
/// server's session table by minting a fresh one per operation.
#[derive(Default)]
pub struct ServerSessionPool {
    free: Mutex<Vec<ServerSession>>,
}

impl ServerSessionPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks a session id out of the free list, or mints a new one. `timeout_minutes` comes
    /// from the most recent `hello` reply; sessions closer to expiring than one minute are
    /// discarded rather than reused.
    pub fn check_out(&self, timeout_minutes: Option<i64>) -> ServerSession {
        let mut free = self.free.lock().expect("session pool mutex poisoned");
        while let Some(session) = free.pop() {
            if !session.is_about_to_expire(timeout_minutes) {
                return session;
            }
        }
        ServerSession::new()
    }

    pub fn check_in(&self, session: ServerSession) {
        if session.is_dirty {
            return;
        }
        let mut free = self.free.lock().expect("session pool mutex poisoned");
        free.push(session);
    }
}

/// The server-facing half of a session: just an id and a last-use timestamp, reusable across
/// many logical [`ClientSession`]s over its lifetime.
#[derive(Clone, Debug)]
pub struct ServerSession {
    pub id: ObjectId,
    last_used: std::time::Instant,
    /// Set once an operation on this session has failed with a network error. A dirty session
    /// must never be reused.
    pub is_dirty: bool,
}

impl ServerSession {
    fn new() -> Self {
        Self {
            id: ObjectId::new(),
            last_used: std::time::Instant::now(),
            is_dirty: false,
        }
    }

    fn is_about_to_expire(&self, timeout_minutes: Option<i64>) -> bool {
        match timeout_minutes {
            Some(minutes) => {
                let timeout = std::time::Duration::from_secs((minutes.max(0) as u64) * 60);
                let buffer = std::time::Duration::from_secs(60);
                self.last_used.elapsed() + buffer >= timeout
            }
            None => false,
        }
    }

    pub fn mark_used(&mut self) {
        self.last_used = std::time::Instant::now();
    }

    pub fn to_document(&self) -> Document {
        let mut id = Document::new();
        id.insert("id", Bson::ObjectId(self.id));
        let mut doc = Document::new();
        doc.insert("lsid", Bson::Document(id));
        doc
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransactionState {
    None,
    Starting,
    InProgress,
    Committed,
    Aborted,
}

#[derive(Clone, Debug, Default)]
pub struct TransactionOptions {
    pub read_concern: Option<ReadConcern>,
    pub write_concern: Option<WriteConcern>,
    pub selection_criteria: Option<SelectionCriteria>,
}

struct TransactionData {
    state: TransactionState,
    options: TransactionOptions,
    pinned_mongos: Option<crate::options::ServerAddress>,
}

/// A logical, causally consistent session: gossips `$clusterTime` and `operationTime`, carries a
/// monotonic `txnNumber` for retryable writes, and drives the transaction state machine.
pub struct ClientSession {
    pub server_session: ServerSession,
    cluster_time: Mutex<Option<ClusterTime>>,
    operation_time: Mutex<Option<crate::bson::Timestamp>>,
    txn_number: AtomicI64,
    transaction: Mutex<TransactionData>,
    pub causally_consistent: bool,
    recovery_token: Mutex<Option<Document>>,
}

impl ClientSession {
    pub fn new(server_session: ServerSession, causally_consistent: bool) -> Self {
        Self {
            server_session,
            cluster_time: Mutex::new(None),
            operation_time: Mutex::new(None),
            txn_number: AtomicI64::new(0),
            transaction: Mutex::new(TransactionData {
                state: TransactionState::None,
                options: TransactionOptions::default(),
                pinned_mongos: None,
            }),
            causally_consistent,
            recovery_token: Mutex::new(None),
        }
    }

    pub fn cluster_time(&self) -> Option<ClusterTime> {
        self.cluster_time.lock().expect("mutex poisoned").clone()
    }

    pub fn advance_cluster_time(&self, candidate: Option<ClusterTime>) {
        let mut current = self.cluster_time.lock().expect("mutex poisoned");
        crate::cluster_time::advance(&mut current, candidate);
    }

    pub fn operation_time(&self) -> Option<crate::bson::Timestamp> {
        *self.operation_time.lock().expect("mutex poisoned")
    }

    pub fn advance_operation_time(&self, candidate: Option<crate::bson::Timestamp>) {
        let Some(candidate) = candidate else { return };
        let mut current = self.operation_time.lock().expect("mutex poisoned");
        if current.is_none_or_older(candidate) {
            *current = Some(candidate);
        }
    }

    /// Folds the `$clusterTime` and `operationTime` fields of a command reply into this
    /// session's gossiped state.
    pub fn process_reply(&self, reply: &Document) {
        self.advance_cluster_time(ClusterTime::from_document(reply));
        let operation_time = match reply.get("operationTime") {
            Some(Bson::Timestamp(ts)) => Some(*ts),
            _ => None,
        };
        self.advance_operation_time(operation_time);
        if let Some(Bson::Document(recovery_token)) = reply.get("recoveryToken") {
            *self.recovery_token.lock().expect("mutex poisoned") = Some(recovery_token.clone());
        }
    }

    /// The next `txnNumber` for a retryable write or transaction on this session.
    pub fn advance_txn_number(&self) -> i64 {
        self.txn_number.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn txn_number(&self) -> i64 {
        self.txn_number.load(Ordering::SeqCst)
    }

    pub fn transaction_state(&self) -> TransactionState {
        self.transaction.lock().expect("mutex poisoned").state
    }

    pub fn start_transaction(&self, options: TransactionOptions) -> Result<()> {
        let mut transaction = self.transaction.lock().expect("mutex poisoned");
        if matches!(transaction.state, TransactionState::Starting | TransactionState::InProgress) {
            return Err(Error::internal("transaction already in progress"));
        }
        transaction.state = TransactionState::Starting;
        transaction.options = options;
        transaction.pinned_mongos = None;
        self.advance_txn_number();
        *self.recovery_token.lock().expect("mutex poisoned") = None;
        Ok(())
    }

    pub fn mark_transaction_in_progress(&self) {
        let mut transaction = self.transaction.lock().expect("mutex poisoned");
        if transaction.state == TransactionState::Starting {
            transaction.state = TransactionState::InProgress;
        }
    }

    pub fn transaction_options(&self) -> TransactionOptions {
        self.transaction.lock().expect("mutex poisoned").options.clone()
    }

    pub fn pin_mongos(&self, address: crate::options::ServerAddress) {
        self.transaction.lock().expect("mutex poisoned").pinned_mongos = Some(address);
    }

    pub fn pinned_mongos(&self) -> Option<crate::options::ServerAddress> {
        self.transaction.lock().expect("mutex poisoned").pinned_mongos.clone()
    }

    pub fn commit_transaction(&self) -> Result<()> {
        let mut transaction = self.transaction.lock().expect("mutex poisoned");
        match transaction.state {
            TransactionState::Starting | TransactionState::InProgress => {
                transaction.state = TransactionState::Committed;
                Ok(())
            }
            _ => Err(Error::internal("no transaction is in progress")),
        }
    }

    pub fn abort_transaction(&self) -> Result<()> {
        let mut transaction = self.transaction.lock().expect("mutex poisoned");
        match transaction.state {
            TransactionState::Starting | TransactionState::InProgress => {
                transaction.state = TransactionState::Aborted;
                transaction.pinned_mongos = None;
                Ok(())
            }
            _ => Err(Error::internal("no transaction is in progress")),
        }
    }

    /// Whether `error` qualifies for an automatic single retry of the commit.
    pub fn should_retry_commit(error: &Error) -> bool {
        error.contains_label(UNKNOWN_TRANSACTION_COMMIT_RESULT) || error.is_network_error()
    }

    pub fn is_transient_transaction_error(error: &Error) -> bool {
        error.contains_label(TRANSIENT_TRANSACTION_ERROR)
    }
}

impl std::fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSession")
            .field("id", &self.server_session.id)
            .field("txn_number", &self.txn_number())
            .field("transaction_state", &self.transaction_state())
            .finish()
    }
}

trait OlderThan {
    fn is_none_or_older(&self, candidate: crate::bson::Timestamp) -> bool;
}

impl OlderThan for Option<crate::bson::Timestamp> {
    fn is_none_or_older(&self, candidate: crate::bson::Timestamp) -> bool {
        match self {
            Some(current) => candidate > *current,
            None => true,
        }
    }
}
