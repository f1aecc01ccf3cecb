//! The `Error` and `Result` types used throughout the crate.

use std::{collections::HashSet, fmt, sync::Arc};

use thiserror::Error;

use crate::{bson::document::Document, options::ServerAddress};

/// Codes that indicate the server is transitioning state (stepping down, recovering, shutting
/// down) and that a read or write may succeed against a different server.
const NOT_WRITABLE_PRIMARY_CODES: [i32; 3] = [10107, 13435, 10058];
const NODE_IS_RECOVERING_CODES: [i32; 5] = [11600, 11602, 13436, 189, 91];
const SHUTDOWN_CODES: [i32; 2] = [11600, 91];
const RETRYABLE_READ_CODES: [i32; 13] = [
    11600, 11602, 10107, 13435, 13436, 189, 91, 7, 6, 89, 9001, 262, 10058,
];
const RETRYABLE_WRITE_CODES: [i32; 12] = [
    11600, 11602, 10107, 13435, 13436, 189, 91, 7, 6, 89, 9001, 262,
];
const WRITE_CONCERN_RETRYABLE_CODES: [i32; 7] = [64, 75, 79, 100, 11602, 189, 91];

pub const RETRYABLE_WRITE_ERROR: &str = "RetryableWriteError";
pub const TRANSIENT_TRANSACTION_ERROR: &str = "TransientTransactionError";
pub const UNKNOWN_TRANSACTION_COMMIT_RESULT: &str = "UnknownTransactionCommitResult";

pub type Result<T> = std::result::Result<T, Error>;

/// An error produced by the core driver. Cloneable so the same error can be observed by a
/// command-failed event and by the caller that receives it.
#[derive(Clone, Debug, Error)]
#[error("{kind}")]
pub struct Error {
    pub kind: Box<ErrorKind>,
    labels: HashSet<String>,
    pub(crate) wire_version: Option<i32>,
    #[source]
    pub(crate) source: Option<Box<Error>>,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind, labels: impl IntoIterator<Item = String>) -> Self {
        Self {
            kind: Box::new(kind),
            labels: labels.into_iter().collect(),
            wire_version: None,
            source: None,
        }
    }

    pub(crate) fn with_source(mut self, source: Error) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        ErrorKind::InvalidArgument {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        ErrorKind::Internal {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn authentication(message: impl Into<String>) -> Self {
        ErrorKind::Authentication {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn network_timeout() -> Self {
        ErrorKind::Io(Arc::new(std::io::Error::from(std::io::ErrorKind::TimedOut))).into()
    }

    pub(crate) fn pool_cleared(address: &ServerAddress, cause: &Error) -> Self {
        ErrorKind::ConnectionPoolCleared {
            message: format!("connection pool for {address} cleared because of: {cause}"),
        }
        .into()
    }

    pub(crate) fn server_selection_timeout(message: impl Into<String>) -> Self {
        ErrorKind::ServerSelectionTimeout {
            message: message.into(),
        }
        .into()
    }

    /// Attach an error label, used by the executor to mark retryable/transient errors.
    pub fn add_label(&mut self, label: impl Into<String>) {
        self.labels.insert(label.into());
    }

    pub fn labels(&self) -> &HashSet<String> {
        &self.labels
    }

    pub fn contains_label(&self, label: &str) -> bool {
        self.labels.contains(label)
    }

    pub(crate) fn is_network_error(&self) -> bool {
        matches!(
            *self.kind,
            ErrorKind::Io(..) | ErrorKind::ConnectionPoolCleared { .. }
        )
    }

    pub(crate) fn is_network_timeout(&self) -> bool {
        matches!(&*self.kind, ErrorKind::Io(e) if e.kind() == std::io::ErrorKind::TimedOut)
    }

    pub(crate) fn is_server_selection_error(&self) -> bool {
        matches!(*self.kind, ErrorKind::ServerSelectionTimeout { .. })
    }

    /// The `code` field of the underlying command/write-concern error, used to drive SDAM
    /// updates and retry classification. Write-error (as opposed to write-concern-error) codes
    /// are intentionally not surfaced here.
    pub(crate) fn sdam_code(&self) -> Option<i32> {
        match &*self.kind {
            ErrorKind::Command(c) => Some(c.code),
            ErrorKind::WriteConcern(wc) => Some(wc.code),
            _ => None,
        }
        .or_else(|| self.source.as_ref().and_then(|s| s.sdam_code()))
    }

    pub(crate) fn is_notwritableprimary(&self) -> bool {
        self.sdam_code()
            .is_some_and(|c| NOT_WRITABLE_PRIMARY_CODES.contains(&c))
    }

    pub(crate) fn is_recovering(&self) -> bool {
        self.sdam_code()
            .is_some_and(|c| NODE_IS_RECOVERING_CODES.contains(&c))
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.sdam_code().is_some_and(|c| SHUTDOWN_CODES.contains(&c))
    }

    pub(crate) fn is_state_change_error(&self) -> bool {
        self.is_recovering() || self.is_notwritableprimary() || self.is_shutting_down()
    }

    pub(crate) fn is_read_retryable(&self) -> bool {
        if self.is_network_error() {
            return true;
        }
        self.sdam_code().is_some_and(|c| RETRYABLE_READ_CODES.contains(&c))
    }

    /// Whether a `RetryableWriteError` label should be attached to this error: on 4.4+ (wire
    /// version > 8) only network errors qualify by code; older servers also qualify via the
    /// explicit code table.
    pub(crate) fn should_add_retryable_write_label(&self, max_wire_version: i32) -> bool {
        if self.is_network_error() {
            return true;
        }
        if max_wire_version > 8 {
            return false;
        }
        self.sdam_code().is_some_and(|c| RETRYABLE_WRITE_CODES.contains(&c))
    }

    pub(crate) fn is_write_retryable(&self) -> bool {
        self.contains_label(RETRYABLE_WRITE_ERROR)
    }

    pub(crate) fn write_concern_error_is_retryable(&self) -> bool {
        matches!(&*self.kind, ErrorKind::WriteConcern(wc) if WRITE_CONCERN_RETRYABLE_CODES.contains(&wc.code))
    }

    pub(crate) fn is_pool_cleared(&self) -> bool {
        matches!(*self.kind, ErrorKind::ConnectionPoolCleared { .. })
    }

    pub(crate) fn code(&self) -> Option<i32> {
        match &*self.kind {
            ErrorKind::Command(c) => Some(c.code),
            ErrorKind::WriteConcern(wc) => Some(wc.code),
            _ => None,
        }
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error::new(kind, std::iter::empty())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        ErrorKind::Io(Arc::new(e)).into()
    }
}

impl From<crate::bson::error::Error> for Error {
    fn from(e: crate::bson::error::Error) -> Self {
        ErrorKind::Bson(e).into()
    }
}

impl From<crate::wire::WireError> for Error {
    fn from(e: crate::wire::WireError) -> Self {
        ErrorKind::Wire(e).into()
    }
}

/// The underlying kind of [`Error`]. Matched on by the executor to decide retry behavior; never
/// matched on by user code against anything but the label/classification methods on `Error`.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum ErrorKind {
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("authentication failure: {message}")]
    Authentication { message: String },

    #[error("bson error: {0}")]
    Bson(crate::bson::error::Error),

    #[error("wire protocol error: {0}")]
    Wire(crate::wire::WireError),

    #[error("command failed: {0}")]
    Command(CommandError),

    #[error("write concern error: {0}")]
    WriteConcern(WriteConcernError),

    #[error("internal error: {message}")]
    Internal { message: String },

    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("{message}")]
    ConnectionPoolCleared { message: String },

    #[error("connection pool for {address} is closed")]
    PoolClosed { address: ServerAddress },

    #[error("timed out waiting for a connection from the pool for {address}")]
    WaitQueueTimeout { address: ServerAddress },

    #[error("the server returned an invalid reply: {message}")]
    InvalidResponse { message: String },

    #[error("server selection timed out: {message}")]
    ServerSelectionTimeout { message: String },

    #[error("{message}")]
    Transaction { message: String },

    #[error("internal invariant violated: {message}")]
    InvariantViolation { message: String },
}

impl ErrorKind {
    pub(crate) fn boxed(self) -> Box<Self> {
        Box::new(self)
    }
}

/// `ok: 0` response from the server.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct CommandError {
    pub code: i32,
    pub code_name: String,
    pub message: String,
    pub error_labels: Vec<String>,
    pub raw: Document,
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}) {}: {}", self.code_name, self.code, self.message)
    }
}

#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct WriteConcernError {
    pub code: i32,
    pub code_name: String,
    pub message: String,
}

impl fmt::Display for WriteConcernError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}) {}: {}", self.code_name, self.code, self.message)
    }
}
