//! Server-side operations: each type here knows how to build its own command body and parse its
//! own reply; everything generic (session/cluster-time/read-write-concern merging, retry) lives
//! in the executor instead.

mod abort_transaction;
mod aggregate;
mod commit_transaction;
mod find;
mod get_more;
mod kill_cursors;
mod list_collections;
mod list_indexes;
mod run_command;

pub use abort_transaction::AbortTransaction;
pub use aggregate::Aggregate;
pub use commit_transaction::CommitTransaction;
pub use find::Find;
pub use get_more::GetMore;
pub use kill_cursors::KillCursors;
pub use list_collections::ListCollections;
pub use list_indexes::ListIndexes;
pub use run_command::RunCommand;

use crate::{
    bson::{document::Document, Bson},
    cmap::StreamDescription,
    error::{Error, Result},
    selection_criteria::SelectionCriteria,
};

/// A fully-qualified `database.collection` pair.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Namespace {
    pub db: String,
    pub collection: String,
}

impl Namespace {
    pub fn new(db: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            collection: collection.into(),
        }
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.db, self.collection)
    }
}

/// How the executor is allowed to retry an operation that fails.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Retryability {
    None,
    Read,
    Write,
}

/// The cursor-shaped part of a command reply (`find`, `aggregate`, `listCollections`,
/// `listIndexes`, `getMore` all return this shape).
#[derive(Clone, Debug)]
pub struct CursorSpec {
    pub id: i64,
    pub namespace: Namespace,
    pub initial_batch: Vec<Document>,
}

/// Parses a `{cursor: {id, ns, firstBatch|nextBatch}}` reply, as returned by every
/// cursor-producing command.
pub(crate) fn parse_cursor_reply(reply: &Document, fallback_namespace: &Namespace) -> Result<CursorSpec> {
    let cursor = match reply.get("cursor") {
        Some(Bson::Document(d)) => d,
        _ => return Err(Error::invalid_argument("reply did not contain a cursor document")),
    };
    let id = match cursor.get("id") {
        Some(Bson::Int64(id)) => *id,
        Some(Bson::Int32(id)) => *id as i64,
        _ => 0,
    };
    let namespace = match cursor.get("ns") {
        Some(Bson::String(ns)) => match ns.split_once('.') {
            Some((db, collection)) => Namespace::new(db, collection),
            None => fallback_namespace.clone(),
        },
        _ => fallback_namespace.clone(),
    };
    let initial_batch = match cursor.get("firstBatch").or_else(|| cursor.get("nextBatch")) {
        Some(Bson::Array(items)) => items
            .iter()
            .filter_map(|b| match b {
                Bson::Document(d) => Some(d.clone()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };
    Ok(CursorSpec {
        id,
        namespace,
        initial_batch,
    })
}

/// A server-side operation: builds its own command body and parses its own reply. Everything
/// generic to every command (session id, `$clusterTime`, read/write concern, `txnNumber`,
/// `$db`, retry) is merged in by [`crate::executor`] rather than duplicated per operation.
pub trait Operation: Send + Sync {
    type Output: Send;

    /// The database this command targets, written into `$db` by the executor.
    fn target_db(&self) -> &str;

    /// The command body, without `$db` or any session/transaction/concern fields — the executor
    /// adds those uniformly.
    fn build_command(&self) -> Document;

    fn handle_response(&self, reply: &Document, description: &StreamDescription) -> Result<Self::Output>;

    /// `None` defers to the caller's (or session's) default read preference.
    fn selection_criteria(&self) -> Option<&SelectionCriteria> {
        None
    }

    fn is_write(&self) -> bool {
        false
    }

    fn retryability(&self) -> Retryability {
        Retryability::None
    }
}
