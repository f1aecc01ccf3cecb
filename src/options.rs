//! Configuration types. The core assumes a URI has already been parsed into this typed form;
//! URI/SRV parsing itself is out of scope.

use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::{
    concern::{ReadConcern, WriteConcern},
    selection_criteria::SelectionCriteria,
};

/// The address of a single server: either a `host:port` pair or a Unix domain socket path.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
#[non_exhaustive]
pub enum ServerAddress {
    Tcp { host: String, port: u16 },
    Unix { path: String },
}

impl ServerAddress {
    pub fn parse(s: &str) -> Self {
        match s.rsplit_once(':') {
            Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => Self::Tcp {
                host: host.to_string(),
                port: port.parse().unwrap_or(27017),
            },
            _ => Self::Tcp {
                host: s.to_string(),
                port: 27017,
            },
        }
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerAddress::Tcp { host, port } => write!(f, "{host}:{port}"),
            ServerAddress::Unix { path } => write!(f, "{path}"),
        }
    }
}

/// The compression algorithms a client is willing to use, in preference order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompressorName {
    Snappy,
    Zlib,
    Zstd,
}

/// Every configuration knob a deployment needs. Parsing a connection string into this struct
/// is out of scope; callers build it directly or via a URI-parsing layer that sits outside the
/// core.
#[derive(Clone, Debug, TypedBuilder)]
#[builder(field_defaults(default, setter(strip_option)))]
pub struct ClientOptions {
    #[builder(!default, setter(!strip_option))]
    pub hosts: Vec<ServerAddress>,

    pub app_name: Option<String>,
    pub replica_set: Option<String>,

    #[builder(default = Duration::from_secs(10), setter(!strip_option))]
    pub connect_timeout: Duration,
    pub socket_timeout: Option<Duration>,
    pub timeout: Option<Duration>,
    #[builder(default = Duration::from_secs(30), setter(!strip_option))]
    pub server_selection_timeout: Duration,
    #[builder(default = Duration::from_secs(10), setter(!strip_option))]
    pub heartbeat_frequency: Duration,
    #[builder(default = Duration::from_millis(15), setter(!strip_option))]
    pub local_threshold: Duration,

    #[builder(default = 10, setter(!strip_option))]
    pub max_pool_size: u32,
    #[builder(default = 0, setter(!strip_option))]
    pub min_pool_size: u32,
    #[builder(default = 2, setter(!strip_option))]
    pub max_connecting: u32,
    pub max_idle_time: Option<Duration>,
    #[builder(default = Duration::from_millis(0), setter(!strip_option))]
    pub wait_queue_timeout: Duration,

    #[builder(default, setter(!strip_option))]
    pub tls: bool,
    pub tls_ca_file: Option<String>,
    pub tls_certificate_key_file: Option<String>,
    #[builder(default, setter(!strip_option))]
    pub tls_allow_invalid_certificates: bool,
    #[builder(default, setter(!strip_option))]
    pub tls_allow_invalid_hostnames: bool,
    #[builder(default, setter(!strip_option))]
    pub tls_insecure: bool,

    pub auth_source: Option<String>,
    pub auth_mechanism: Option<String>,

    pub read_preference: Option<SelectionCriteria>,
    pub read_concern: Option<ReadConcern>,
    pub write_concern: Option<WriteConcern>,

    #[builder(default, setter(!strip_option))]
    pub compressors: Vec<CompressorName>,
    pub zlib_compression_level: Option<i32>,

    #[builder(default = true, setter(!strip_option))]
    pub retry_reads: bool,
    #[builder(default = true, setter(!strip_option))]
    pub retry_writes: bool,

    #[builder(default, setter(!strip_option))]
    pub load_balanced: bool,
    #[builder(default, setter(!strip_option))]
    pub direct_connection: bool,
}

impl ClientOptions {
    pub fn direct_single(address: ServerAddress) -> Self {
        Self::builder()
            .hosts(vec![address])
            .direct_connection(true)
            .build()
    }
}

/// Client metadata sent in the `hello` handshake's `client` field.
#[derive(Clone, Debug, Serialize)]
pub struct DriverInfo {
    pub name: String,
    pub version: String,
}

impl Default for DriverInfo {
    fn default() -> Self {
        Self {
            name: "mongodb-core".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
