//! Core BSON codec, wire protocol, server discovery/monitoring, connection pooling, and operation
//! execution for a MongoDB driver — no URI parsing, authentication mechanisms, GridFS, change
//! streams, or CSFLE; those live in layers built on top of this crate.

pub mod bson;
pub mod client;
pub mod cluster_time;
pub mod cmap;
pub mod concern;
pub mod cursor;
pub mod error;
pub mod event;
pub mod executor;
pub mod operation;
pub mod options;
pub mod sdam;
pub mod selection_criteria;
pub mod session;
pub mod transport;
pub mod wire;

pub use client::Client;
pub use cursor::Cursor;
pub use error::{Error, ErrorKind, Result};
pub use session::ClientSession;
