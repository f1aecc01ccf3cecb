//! Connection monitoring and pooling: a handshaken [`Connection`] per server connection, drawn
//! from a per-server [`ConnectionPool`].

pub mod conn;
pub mod establish;
pub mod options;
pub mod pool;

pub use conn::{Connection, ConnectionGeneration, StreamDescription};
pub use options::ConnectionPoolOptions;
pub use pool::{ConnectionPool, PooledConnection};
