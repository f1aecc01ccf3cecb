//! The top-level handle: wires the executor to the session pool and exposes the operations a
//! caller actually issues.

use std::sync::Arc;

use crate::{
    cursor::Cursor,
    error::{Error, Result},
    event::EventBroadcaster,
    operation::{
        AbortTransaction, Aggregate, CommitTransaction, Find, ListCollections, ListIndexes, Namespace, Operation,
        RunCommand,
    },
    options::ClientOptions,
    session::{ClientSession, ServerSession, ServerSessionPool, TransactionOptions},
    bson::document::Document,
};

/// A handle to a MongoDB deployment. Cheaply cloneable; every clone shares the same topology
/// state, connection pools, and session pool.
#[derive(Clone)]
pub struct Client {
    executor: Arc<crate::executor::Executor>,
    session_pool: Arc<ServerSessionPool>,
}

impl Client {
    pub fn with_options(options: ClientOptions) -> Self {
        Self::with_options_and_events(options, EventBroadcaster::default())
    }

    pub fn with_options_and_events(options: ClientOptions, events: EventBroadcaster) -> Self {
        Self {
            executor: crate::executor::Executor::new(options, events),
            session_pool: Arc::new(ServerSessionPool::new()),
        }
    }

    pub fn options(&self) -> &ClientOptions {
        &self.executor.options
    }

    /// Starts a new causally consistent (by default) logical session.
    pub fn start_session(&self, causally_consistent: bool) -> ClientSession {
        let timeout_minutes = self
            .executor
            .topology
            .description
            .try_read()
            .ok()
            .and_then(|d| d.logical_session_timeout)
            .map(|timeout| (timeout.as_secs() / 60) as i64);
        let server_session = self.session_pool.check_out(timeout_minutes);
        ClientSession::new(server_session, causally_consistent)
    }

    /// Returns a session's server-facing id to the pool, so a future session can reuse it.
    pub fn return_session(&self, session: ClientSession) {
        self.session_pool.check_in(session.into_server_session());
    }

    pub async fn run_command(&self, db: impl Into<String>, command: Document, session: Option<&ClientSession>) -> Result<Document> {
        let op = RunCommand::new(db, command);
        self.executor.execute(&op, session).await
    }

    pub async fn find(&self, namespace: Namespace, filter: Document, session: Option<&ClientSession>) -> Result<Cursor> {
        let op = Find::new(namespace, filter);
        self.open_cursor(&op, op.batch_size, session).await
    }

    pub async fn aggregate(&self, namespace: Namespace, pipeline: Vec<Document>, session: Option<&ClientSession>) -> Result<Cursor> {
        let op = Aggregate {
            namespace,
            pipeline,
            batch_size: None,
            allow_disk_use: None,
        };
        self.open_cursor(&op, op.batch_size, session).await
    }

    pub async fn list_collections(&self, db: impl Into<String>, filter: Option<Document>, session: Option<&ClientSession>) -> Result<Cursor> {
        let op = ListCollections {
            db: db.into(),
            filter,
            name_only: false,
        };
        self.open_cursor(&op, None, session).await
    }

    pub async fn list_indexes(&self, namespace: Namespace, session: Option<&ClientSession>) -> Result<Cursor> {
        let op = ListIndexes { namespace, batch_size: None };
        self.open_cursor(&op, op.batch_size, session).await
    }

    async fn open_cursor<Op>(&self, op: &Op, batch_size: Option<i32>, session: Option<&ClientSession>) -> Result<Cursor>
    where
        Op: Operation<Output = crate::operation::CursorSpec>,
    {
        let (address, spec) = self.executor.execute_with_address(op, session).await?;
        Ok(Cursor::new(self.executor.clone(), address, spec, batch_size))
    }

    /// Starts a multi-statement transaction on `session`.
    pub fn start_transaction(&self, session: &ClientSession, options: TransactionOptions) -> Result<()> {
        session.start_transaction(options)
    }

    /// Commits the transaction in progress on `session`, retrying once on a network error or
    /// an `UnknownTransactionCommitResult` label.
    pub async fn commit_transaction(&self, session: &ClientSession) -> Result<()> {
        let options = session.transaction_options();
        let op = CommitTransaction {
            max_commit_time: None,
            write_concern: options.write_concern,
        };
        match self.executor.execute(&op, Some(session)).await {
            Ok(()) => {
                session.commit_transaction()?;
                Ok(())
            }
            Err(error) if ClientSession::should_retry_commit(&error) => match self.executor.execute(&op, Some(session)).await {
                Ok(()) => {
                    session.commit_transaction()?;
                    Ok(())
                }
                Err(retry_error) => Err(retry_error),
            },
            Err(error) => Err(error),
        }
    }

    /// Aborts the transaction in progress on `session`. Best-effort: a failed `abortTransaction`
    /// still leaves the session out of the transaction.
    pub async fn abort_transaction(&self, session: &ClientSession) -> Result<()> {
        let options = session.transaction_options();
        let op = AbortTransaction {
            write_concern: options.write_concern,
        };
        let result = self.executor.execute(&op, Some(session)).await;
        session.abort_transaction()?;
        result.or(Ok(()))
    }
}

impl ClientSession {
    /// Consumes the session, returning its server-facing half so it can be pooled.
    pub fn into_server_session(self) -> ServerSession {
        self.server_session
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").finish_non_exhaustive()
    }
}

/// Shorthand used by callers that don't need to distinguish driver errors from their own.
pub type ClientResult<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod test {
    use super::*;
    use crate::options::ServerAddress;

    fn client() -> Client {
        let options = ClientOptions::direct_single(ServerAddress::parse("localhost:27017"));
        Client::with_options(options)
    }

    #[tokio::test]
    async fn returned_sessions_are_reused_by_a_later_start_session() {
        let client = client();
        let session = client.start_session(true);
        let id = session.server_session.id;
        client.return_session(session);

        let reused = client.start_session(true);
        assert_eq!(reused.server_session.id, id);
    }

    #[tokio::test]
    async fn a_dirty_session_is_not_returned_to_the_pool() {
        let client = client();
        let mut session = client.start_session(true);
        let id = session.server_session.id;
        session.server_session.is_dirty = true;
        client.return_session(session);

        let fresh = client.start_session(true);
        assert_ne!(fresh.server_session.id, id);
    }

    #[tokio::test]
    async fn options_reflects_what_the_client_was_constructed_with() {
        let client = client();
        assert!(client.options().direct_connection);
    }
}
