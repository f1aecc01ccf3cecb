//! Server descriptions: the most up-to-date information known about a single server, built from
//! its last `hello` reply or monitoring error.

use std::time::Duration;

use crate::{
    bson::{document::Document, oid::ObjectId, Bson, DateTime},
    error::{Error, ErrorKind, Result},
    options::ServerAddress,
    selection_criteria::TagSet,
};

fn get_bool(doc: &Document, key: &str) -> Option<bool> {
    match doc.get(key)? {
        Bson::Boolean(b) => Some(*b),
        _ => None,
    }
}

fn get_i32(doc: &Document, key: &str) -> Option<i32> {
    match doc.get(key)? {
        Bson::Int32(n) => Some(*n),
        Bson::Int64(n) => Some(*n as i32),
        Bson::Double(n) => Some(*n as i32),
        _ => None,
    }
}

fn get_i64(doc: &Document, key: &str) -> Option<i64> {
    match doc.get(key)? {
        Bson::Int32(n) => Some(*n as i64),
        Bson::Int64(n) => Some(*n),
        Bson::Double(n) => Some(*n as i64),
        _ => None,
    }
}

fn get_str(doc: &Document, key: &str) -> Option<String> {
    match doc.get(key)? {
        Bson::String(s) => Some(s.clone()),
        _ => None,
    }
}

fn get_str_array(doc: &Document, key: &str) -> Option<Vec<String>> {
    match doc.get(key)? {
        Bson::Array(items) => Some(
            items
                .iter()
                .filter_map(|item| match item {
                    Bson::String(s) => Some(s.clone()),
                    _ => None,
                })
                .collect(),
        ),
        _ => None,
    }
}

fn get_object_id(doc: &Document, key: &str) -> Option<ObjectId> {
    match doc.get(key)? {
        Bson::ObjectId(oid) => Some(*oid),
        _ => None,
    }
}

fn get_tags(doc: &Document, key: &str) -> Option<TagSet> {
    match doc.get(key)? {
        Bson::Document(tags) => Some(
            tags.iter()
                .filter_map(|(k, v)| match v {
                    Bson::String(s) => Some((k.clone(), s.clone())),
                    _ => None,
                })
                .collect(),
        ),
        _ => None,
    }
}

/// The possible types for a server, inferred from its `hello` response.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
#[non_exhaustive]
pub enum ServerType {
    Standalone,
    Mongos,
    RsPrimary,
    RsSecondary,
    RsArbiter,
    RsOther,
    RsGhost,
    LoadBalancer,
    #[default]
    Unknown,
}

impl ServerType {
    pub fn can_auth(self) -> bool {
        !matches!(self, ServerType::RsArbiter)
    }

    pub fn is_data_bearing(self) -> bool {
        matches!(
            self,
            ServerType::Standalone
                | ServerType::RsPrimary
                | ServerType::RsSecondary
                | ServerType::Mongos
                | ServerType::LoadBalancer
        )
    }

    pub fn is_available(self) -> bool {
        !matches!(self, ServerType::Unknown)
    }
}

/// The `topologyVersion` field on hello replies, used to drop stale monitoring responses.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct TopologyVersion {
    pub process_id: ObjectId,
    pub counter: i64,
}

impl TopologyVersion {
    pub fn is_more_recent_than(&self, existing: TopologyVersion) -> bool {
        self.process_id != existing.process_id || self.counter > existing.counter
    }

    fn from_document(doc: &Document) -> Option<Self> {
        Some(Self {
            process_id: get_object_id(doc, "processId")?,
            counter: get_i64(doc, "counter")?,
        })
    }
}

/// The fields of a `hello`/legacy-`hello` command response the core cares about. Other fields
/// (e.g. authentication mechanisms) are out of scope.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HelloCommandResponse {
    pub ok: f64,
    pub is_writable_primary: Option<bool>,
    pub ismaster: Option<bool>,
    pub max_wire_version: Option<i32>,
    pub min_wire_version: Option<i32>,
    pub me: Option<String>,
    pub hosts: Option<Vec<String>>,
    pub passives: Option<Vec<String>>,
    pub arbiters: Option<Vec<String>>,
    pub tags: Option<TagSet>,
    pub set_name: Option<String>,
    pub set_version: Option<i32>,
    pub election_id: Option<ObjectId>,
    pub primary: Option<String>,
    pub logical_session_timeout_minutes: Option<i64>,
    pub topology_version: Option<TopologyVersion>,
    pub last_write_date: Option<crate::bson::DateTime>,
    pub msg: Option<String>,
    pub hidden: Option<bool>,
    pub secondary: Option<bool>,
    pub arbiter_only: Option<bool>,
    pub is_replica_set: Option<bool>,
    pub service_id: Option<ObjectId>,
    pub max_message_size_bytes: Option<i64>,
    pub max_write_batch_size: Option<i64>,
    pub max_bson_object_size: Option<i64>,
    pub compression: Option<Vec<String>>,
}

impl HelloCommandResponse {
    pub fn server_type(&self) -> ServerType {
        if self.msg.as_deref() == Some("isdbgrid") {
            return ServerType::Mongos;
        }
        if self.set_name.is_some() {
            if self.hidden == Some(true) {
                return ServerType::RsOther;
            }
            if self.is_writable_primary == Some(true) || self.ismaster == Some(true) {
                return ServerType::RsPrimary;
            }
            if self.secondary == Some(true) {
                return ServerType::RsSecondary;
            }
            if self.arbiter_only == Some(true) {
                return ServerType::RsArbiter;
            }
            return ServerType::RsOther;
        }
        if self.is_replica_set == Some(true) {
            return ServerType::RsGhost;
        }
        if self.ok == 1.0 {
            return ServerType::Standalone;
        }
        ServerType::Unknown
    }

    pub fn max_wire_version(&self) -> i32 {
        self.max_wire_version.unwrap_or(0)
    }

    pub fn from_document(doc: &Document) -> Self {
        Self {
            ok: match doc.get("ok") {
                Some(Bson::Double(n)) => *n,
                Some(Bson::Int32(n)) => *n as f64,
                Some(Bson::Int64(n)) => *n as f64,
                _ => 0.0,
            },
            is_writable_primary: get_bool(doc, "isWritablePrimary"),
            ismaster: get_bool(doc, "ismaster"),
            max_wire_version: get_i32(doc, "maxWireVersion"),
            min_wire_version: get_i32(doc, "minWireVersion"),
            me: get_str(doc, "me"),
            hosts: get_str_array(doc, "hosts"),
            passives: get_str_array(doc, "passives"),
            arbiters: get_str_array(doc, "arbiters"),
            tags: get_tags(doc, "tags"),
            set_name: get_str(doc, "setName"),
            set_version: get_i32(doc, "setVersion"),
            election_id: get_object_id(doc, "electionId"),
            primary: get_str(doc, "primary"),
            logical_session_timeout_minutes: get_i64(doc, "logicalSessionTimeoutMinutes"),
            topology_version: doc
                .get("topologyVersion")
                .and_then(|v| match v {
                    Bson::Document(d) => TopologyVersion::from_document(d),
                    _ => None,
                }),
            last_write_date: doc
                .get("lastWrite")
                .and_then(|v| match v {
                    Bson::Document(d) => d.get("lastWriteDate"),
                    _ => None,
                })
                .and_then(Bson::as_datetime),
            msg: get_str(doc, "msg"),
            hidden: get_bool(doc, "hidden"),
            secondary: get_bool(doc, "secondary"),
            arbiter_only: get_bool(doc, "arbiterOnly"),
            is_replica_set: get_bool(doc, "isreplicaset"),
            service_id: get_object_id(doc, "serviceId"),
            max_message_size_bytes: get_i64(doc, "maxMessageSizeBytes"),
            max_write_batch_size: get_i64(doc, "maxWriteBatchSize"),
            max_bson_object_size: get_i64(doc, "maxBsonObjectSize"),
            compression: get_str_array(doc, "compression"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct HelloReply {
    pub command_response: HelloCommandResponse,
    pub cluster_time: Option<crate::cluster_time::ClusterTime>,
}

/// The most up-to-date information known about a single server.
#[derive(Debug, Clone)]
pub struct ServerDescription {
    pub address: ServerAddress,
    pub server_type: ServerType,
    pub last_update_time: Option<DateTime>,
    pub average_round_trip_time: Option<Duration>,
    pub reply: std::result::Result<Option<HelloReply>, Error>,
}

impl PartialEq for ServerDescription {
    fn eq(&self, other: &Self) -> bool {
        if self.address != other.address || self.server_type != other.server_type {
            return false;
        }
        match (&self.reply, &other.reply) {
            (Ok(a), Ok(b)) => a.as_ref().map(|r| &r.command_response) == b.as_ref().map(|r| &r.command_response),
            (Err(a), Err(b)) => match (a.kind.as_ref(), b.kind.as_ref()) {
                (ErrorKind::Command(x), ErrorKind::Command(y)) => x.code == y.code,
                _ => a.to_string() == b.to_string(),
            },
            _ => false,
        }
    }
}

impl ServerDescription {
    pub fn new(address: ServerAddress) -> Self {
        let address = match address {
            ServerAddress::Tcp { host, port } => ServerAddress::Tcp {
                host: host.to_lowercase(),
                port,
            },
            other => other,
        };
        Self {
            address,
            server_type: ServerType::default(),
            last_update_time: None,
            average_round_trip_time: None,
            reply: Ok(None),
        }
    }

    pub fn new_from_hello_reply(address: ServerAddress, mut reply: HelloReply, average_rtt: Duration) -> Self {
        let mut description = Self::new(address);
        description.average_round_trip_time = Some(average_rtt);
        description.last_update_time = Some(DateTime::now());
        description.server_type = reply.command_response.server_type();

        for field in [
            &mut reply.command_response.hosts,
            &mut reply.command_response.passives,
            &mut reply.command_response.arbiters,
        ] {
            if let Some(hostnames) = field {
                for host in hostnames.iter_mut() {
                    *host = host.to_lowercase();
                }
            }
        }

        description.reply = Ok(Some(reply));
        description
    }

    pub fn new_from_error(address: ServerAddress, error: Error) -> Self {
        let mut description = Self::new(address);
        description.last_update_time = Some(DateTime::now());
        description.reply = Err(error);
        description
    }

    pub fn hello_reply(&self) -> Result<Option<&HelloReply>> {
        match &self.reply {
            Ok(reply) => Ok(reply.as_ref()),
            Err(e) => Err(e.clone()),
        }
    }

    pub fn max_wire_version(&self) -> Option<i32> {
        self.reply
            .as_ref()
            .ok()
            .and_then(|r| r.as_ref())
            .map(|r| r.command_response.max_wire_version())
    }

    pub fn set_name(&self) -> Option<&str> {
        self.reply
            .as_ref()
            .ok()
            .and_then(|r| r.as_ref())
            .and_then(|r| r.command_response.set_name.as_deref())
    }

    /// The `(setVersion, electionId)` pair from the last `hello` reply, used to order competing
    /// primaries: a higher pair always wins, `setVersion` taking precedence on a tie.
    pub fn election_tuple(&self) -> Option<(Option<i32>, Option<ObjectId>)> {
        let reply = self.reply.as_ref().ok().and_then(|r| r.as_ref())?;
        Some((reply.command_response.set_version, reply.command_response.election_id))
    }

    pub fn last_write_date(&self) -> Option<DateTime> {
        self.reply
            .as_ref()
            .ok()
            .and_then(|r| r.as_ref())
            .and_then(|r| r.command_response.last_write_date)
    }

    pub fn tags(&self) -> Option<&TagSet> {
        self.reply
            .as_ref()
            .ok()
            .and_then(|r| r.as_ref())
            .and_then(|r| r.command_response.tags.as_ref())
    }

    pub fn known_hosts(&self) -> Vec<String> {
        let Ok(Some(reply)) = &self.reply else {
            return Vec::new();
        };
        let r = &reply.command_response;
        r.hosts
            .iter()
            .flatten()
            .chain(r.passives.iter().flatten())
            .chain(r.arbiters.iter().flatten())
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn mongos_is_detected_from_isdbgrid() {
        let response = HelloCommandResponse {
            ok: 1.0,
            msg: Some("isdbgrid".to_string()),
            ..Default::default()
        };
        assert_eq!(response.server_type(), ServerType::Mongos);
    }

    #[test]
    fn replica_set_primary_is_detected() {
        let response = HelloCommandResponse {
            ok: 1.0,
            set_name: Some("rs0".to_string()),
            is_writable_primary: Some(true),
            ..Default::default()
        };
        assert_eq!(response.server_type(), ServerType::RsPrimary);
    }

    #[test]
    fn arbiter_is_not_data_bearing() {
        assert!(!ServerType::RsArbiter.is_data_bearing());
        assert!(ServerType::RsPrimary.is_data_bearing());
    }
}
