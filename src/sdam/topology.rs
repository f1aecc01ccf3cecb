//! The topology description: the aggregate, most up-to-date view of every server the client
//! knows about, and the state machine that folds new server descriptions into it.

use std::{
    collections::{HashMap, HashSet},
    time::Duration,
};

use crate::{
    cluster_time::ClusterTime,
    error::{Error, Result},
    options::{ClientOptions, ServerAddress},
    sdam::description::{ServerDescription, ServerType},
};

#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
#[non_exhaustive]
pub enum TopologyType {
    Single,
    ReplicaSetNoPrimary,
    ReplicaSetWithPrimary,
    Sharded,
    LoadBalanced,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum TransactionSupportStatus {
    Undetermined,
    Supported,
    Unsupported,
}

/// The aggregate view of every server the client knows about.
#[derive(Debug, Clone)]
pub struct TopologyDescription {
    pub topology_type: TopologyType,
    pub set_name: Option<String>,
    pub max_election_id: Option<crate::bson::oid::ObjectId>,
    pub max_set_version: Option<i32>,
    pub compatibility_error: Option<String>,
    pub logical_session_timeout: Option<Duration>,
    pub transaction_support_status: TransactionSupportStatus,
    pub cluster_time: Option<ClusterTime>,
    pub local_threshold: Option<Duration>,
    pub heartbeat_frequency: Duration,
    pub servers: HashMap<ServerAddress, ServerDescription>,
}

impl PartialEq for TopologyDescription {
    fn eq(&self, other: &Self) -> bool {
        self.compatibility_error == other.compatibility_error
            && self.servers == other.servers
            && self.topology_type == other.topology_type
    }
}

impl TopologyDescription {
    pub fn new(options: &ClientOptions) -> Self {
        let topology_type = if options.direct_connection {
            TopologyType::Single
        } else if options.load_balanced {
            TopologyType::LoadBalanced
        } else if options.replica_set.is_some() {
            TopologyType::ReplicaSetNoPrimary
        } else {
            TopologyType::Unknown
        };

        let transaction_support_status = if topology_type == TopologyType::LoadBalanced {
            TransactionSupportStatus::Supported
        } else {
            TransactionSupportStatus::Undetermined
        };

        let servers = options
            .hosts
            .iter()
            .cloned()
            .map(|address| (address.clone(), ServerDescription::new(address)))
            .collect();

        Self {
            topology_type,
            set_name: options.replica_set.clone(),
            max_election_id: None,
            max_set_version: None,
            compatibility_error: None,
            logical_session_timeout: None,
            transaction_support_status,
            cluster_time: None,
            local_threshold: Some(options.local_threshold),
            heartbeat_frequency: options.heartbeat_frequency,
            servers,
        }
    }

    pub fn server_addresses(&self) -> impl Iterator<Item = &ServerAddress> {
        self.servers.keys()
    }

    pub fn has_readable_server(&self) -> bool {
        self.servers.values().any(|s| s.server_type.is_available())
    }

    pub fn has_writable_server(&self) -> bool {
        match self.topology_type {
            TopologyType::Single => self.has_readable_server(),
            _ => self
                .servers
                .values()
                .any(|s| matches!(s.server_type, ServerType::RsPrimary | ServerType::Mongos | ServerType::Standalone)),
        }
    }

    pub fn advance_cluster_time(&mut self, candidate: Option<ClusterTime>) {
        crate::cluster_time::advance(&mut self.cluster_time, candidate);
    }

    /// Marks a server unknown; used when a connection to it fails outside of monitoring (e.g. a
    /// "not writable primary" error observed during an operation).
    pub fn mark_server_unknown(&mut self, address: &ServerAddress, error: Error) {
        if self.servers.contains_key(address) {
            self.update(ServerDescription::new_from_error(address.clone(), error));
        }
    }

    /// Folds a freshly observed server description into the topology, updating topology type and
    /// related bookkeeping per the server discovery and monitoring state machine.
    pub fn update(&mut self, server_description: ServerDescription) {
        if !self.servers.contains_key(&server_description.address) {
            return;
        }

        self.update_logical_session_timeout(&server_description);
        self.update_transaction_support_status(&server_description);

        match self.topology_type {
            TopologyType::Single => {
                self.servers.insert(server_description.address.clone(), server_description);
            }
            TopologyType::LoadBalanced => {
                self.servers.insert(server_description.address.clone(), server_description);
            }
            TopologyType::Unknown => self.update_unknown(server_description),
            TopologyType::Sharded => self.update_sharded(server_description),
            TopologyType::ReplicaSetNoPrimary | TopologyType::ReplicaSetWithPrimary => {
                self.update_replica_set(server_description)
            }
        }

        self.check_compatibility();
    }

    fn update_unknown(&mut self, sd: ServerDescription) {
        match sd.server_type {
            ServerType::Standalone => {
                self.servers.insert(sd.address.clone(), sd);
                if self.servers.len() == 1 {
                    self.topology_type = TopologyType::Single;
                }
            }
            ServerType::Mongos => {
                self.topology_type = TopologyType::Sharded;
                self.servers.insert(sd.address.clone(), sd);
            }
            ServerType::RsPrimary => {
                self.topology_type = TopologyType::ReplicaSetWithPrimary;
                self.record_replica_set_member(sd);
            }
            ServerType::RsSecondary | ServerType::RsArbiter | ServerType::RsOther => {
                self.topology_type = TopologyType::ReplicaSetNoPrimary;
                self.record_replica_set_member(sd);
            }
            ServerType::Unknown | ServerType::RsGhost => {
                self.servers.insert(sd.address.clone(), sd);
            }
            ServerType::LoadBalancer => {
                self.servers.insert(sd.address.clone(), sd);
            }
        }
    }

    fn update_sharded(&mut self, sd: ServerDescription) {
        match sd.server_type {
            ServerType::Mongos | ServerType::Unknown => {
                self.servers.insert(sd.address.clone(), sd);
            }
            _ => {
                // A non-mongos, non-unknown reply against a sharded topology is treated as a
                // monitoring anomaly: the server is dropped back to unknown rather than trusted.
                self.servers.insert(
                    sd.address.clone(),
                    ServerDescription::new(sd.address),
                );
            }
        }
    }

    fn update_replica_set(&mut self, mut sd: ServerDescription) {
        if let Some(expected) = self.set_name.clone() {
            if sd.server_type.is_available() {
                match sd.set_name() {
                    Some(name) if name == expected => {}
                    _ => {
                        sd = ServerDescription::new_from_error(
                            sd.address.clone(),
                            Error::invalid_argument(format!(
                                "replica set name {expected:?} does not match server's reported name"
                            )),
                        );
                    }
                }
            }
        } else if let Some(name) = sd.set_name() {
            self.set_name = Some(name.to_string());
        }

        match sd.server_type {
            ServerType::RsPrimary => {
                if self.is_stale_primary(&sd) {
                    self.servers.insert(sd.address.clone(), ServerDescription::new(sd.address));
                    return;
                }
                self.record_max_election_tuple(&sd);
                self.demote_other_primaries(&sd.address);
                let known_hosts: HashSet<ServerAddress> =
                    sd.known_hosts().iter().map(|host| ServerAddress::parse(host)).collect();
                self.record_replica_set_member(sd);
                if !known_hosts.is_empty() {
                    self.sync_hosts(known_hosts);
                }
                self.topology_type = TopologyType::ReplicaSetWithPrimary;
            }
            ServerType::RsSecondary | ServerType::RsArbiter | ServerType::RsOther => {
                self.record_replica_set_member(sd);
            }
            ServerType::Unknown | ServerType::RsGhost => {
                self.servers.insert(sd.address.clone(), sd);
            }
            _ => {
                self.servers.remove(&sd.address);
            }
        }

        if !self.servers.values().any(|s| s.server_type == ServerType::RsPrimary) {
            self.topology_type = TopologyType::ReplicaSetNoPrimary;
        }
    }

    /// True if `sd`'s `electionId` is older than the newest one this topology has already seen,
    /// comparing `setVersion` first and `electionId` on a tie. A server with no `electionId`
    /// never counts as stale here (pre-3.2 primaries don't report one).
    fn is_stale_primary(&self, sd: &ServerDescription) -> bool {
        let Some((set_version, Some(election_id))) = sd.election_tuple() else {
            return false;
        };
        let (Some(max_set_version), Some(max_election_id)) = (self.max_set_version, self.max_election_id) else {
            return false;
        };
        let set_version = set_version.unwrap_or(0);
        max_set_version > set_version || (max_set_version == set_version && max_election_id > election_id)
    }

    fn record_max_election_tuple(&mut self, sd: &ServerDescription) {
        let Some((set_version, election_id)) = sd.election_tuple() else {
            return;
        };
        if let Some(election_id) = election_id {
            self.max_election_id = Some(election_id);
        }
        if let Some(set_version) = set_version {
            let is_newer = match self.max_set_version {
                Some(current) => set_version > current,
                None => true,
            };
            if is_newer {
                self.max_set_version = Some(set_version);
            }
        }
    }

    fn demote_other_primaries(&mut self, new_primary: &ServerAddress) {
        for (address, description) in self.servers.iter_mut() {
            if address != new_primary && description.server_type == ServerType::RsPrimary {
                *description = ServerDescription::new(address.clone());
            }
        }
    }

    fn record_replica_set_member(&mut self, sd: ServerDescription) {
        let known_hosts: Vec<ServerAddress> =
            sd.known_hosts().iter().map(|host| ServerAddress::parse(host)).collect();
        self.servers.insert(sd.address.clone(), sd);
        for host in known_hosts {
            self.servers.entry(host.clone()).or_insert_with(|| ServerDescription::new(host));
        }
    }

    /// Drops any server not in `hosts`; called when a primary's host list is the authoritative
    /// statement of replica set membership.
    fn sync_hosts(&mut self, hosts: HashSet<ServerAddress>) {
        self.servers.retain(|address, _| hosts.contains(address));
        for host in hosts {
            self.servers.entry(host.clone()).or_insert_with(|| ServerDescription::new(host));
        }
    }

    fn update_logical_session_timeout(&mut self, sd: &ServerDescription) {
        if !sd.server_type.is_data_bearing() {
            return;
        }
        let Some(reply) = sd.reply.as_ref().ok().and_then(|r| r.as_ref()) else {
            self.logical_session_timeout = None;
            return;
        };
        match reply.command_response.logical_session_timeout_minutes {
            Some(minutes) => {
                let new_timeout = Duration::from_secs((minutes.max(0) as u64) * 60);
                self.logical_session_timeout = Some(match self.logical_session_timeout {
                    Some(current) => current.min(new_timeout),
                    None => new_timeout,
                });
            }
            None => self.logical_session_timeout = None,
        }
    }

    fn update_transaction_support_status(&mut self, sd: &ServerDescription) {
        if self.topology_type == TopologyType::LoadBalanced {
            return;
        }
        if self.logical_session_timeout.is_none() {
            self.transaction_support_status = TransactionSupportStatus::Unsupported;
            return;
        }
        if let Some(max_wire_version) = sd.max_wire_version() {
            self.transaction_support_status = if max_wire_version < 7
                || (max_wire_version < 8 && self.topology_type == TopologyType::Sharded)
            {
                TransactionSupportStatus::Unsupported
            } else {
                TransactionSupportStatus::Supported
            };
        }
    }

    fn check_compatibility(&mut self) {
        self.compatibility_error = None;
        const MIN_SUPPORTED_WIRE_VERSION: i32 = 7;
        for server in self.servers.values() {
            if let Some(max_wire_version) = server.max_wire_version() {
                if max_wire_version < MIN_SUPPORTED_WIRE_VERSION {
                    self.compatibility_error = Some(format!(
                        "server at {} reports wire version {}, but this driver requires at least {}",
                        server.address, max_wire_version, MIN_SUPPORTED_WIRE_VERSION
                    ));
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::sdam::description::{HelloCommandResponse, HelloReply};

    fn options(hosts: &[&str]) -> ClientOptions {
        ClientOptions::builder()
            .hosts(hosts.iter().map(|h| ServerAddress::parse(h)).collect())
            .build()
    }

    fn hello_reply(response: HelloCommandResponse) -> HelloReply {
        HelloReply {
            command_response: response,
            cluster_time: None,
        }
    }

    #[test]
    fn single_seed_starts_unknown_and_becomes_single_on_standalone_reply() {
        let opts = options(&["a:27017"]);
        let mut topology = TopologyDescription::new(&opts);
        assert_eq!(topology.topology_type, TopologyType::Unknown);

        let address = ServerAddress::parse("a:27017");
        let sd = ServerDescription::new_from_hello_reply(
            address,
            hello_reply(HelloCommandResponse {
                ok: 1.0,
                max_wire_version: Some(17),
                ..Default::default()
            }),
            Duration::from_millis(1),
        );
        topology.update(sd);
        assert_eq!(topology.topology_type, TopologyType::Single);
    }

    #[test]
    fn replica_set_gains_a_primary() {
        let opts = options(&["a:27017", "b:27017"]);
        let mut topology = TopologyDescription::new(&opts);
        topology.topology_type = TopologyType::ReplicaSetNoPrimary;
        topology.set_name = Some("rs0".to_string());

        let address = ServerAddress::parse("a:27017");
        let sd = ServerDescription::new_from_hello_reply(
            address,
            hello_reply(HelloCommandResponse {
                ok: 1.0,
                set_name: Some("rs0".to_string()),
                is_writable_primary: Some(true),
                max_wire_version: Some(17),
                hosts: Some(vec!["a:27017".to_string(), "b:27017".to_string()]),
                ..Default::default()
            }),
            Duration::from_millis(1),
        );
        topology.update(sd);
        assert_eq!(topology.topology_type, TopologyType::ReplicaSetWithPrimary);
    }

    #[test]
    fn mongos_reply_makes_the_topology_sharded() {
        let opts = options(&["a:27017"]);
        let mut topology = TopologyDescription::new(&opts);
        let address = ServerAddress::parse("a:27017");
        let sd = ServerDescription::new_from_hello_reply(
            address,
            hello_reply(HelloCommandResponse {
                ok: 1.0,
                msg: Some("isdbgrid".to_string()),
                max_wire_version: Some(17),
                ..Default::default()
            }),
            Duration::from_millis(1),
        );
        topology.update(sd);
        assert_eq!(topology.topology_type, TopologyType::Sharded);
    }
}
