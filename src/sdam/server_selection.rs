//! Server selection: filtering the topology down to servers that satisfy a [`SelectionCriteria`],
//! then picking one via power-of-two-choices load balancing.

use std::{sync::Arc, time::Duration};

use rand::seq::SliceRandom;

use crate::{
    error::{Error, Result},
    options::ServerAddress,
    sdam::{
        description::{ServerDescription, ServerType},
        topology::{TopologyDescription, TopologyType},
        TopologyState,
    },
    selection_criteria::{ReadPreference, SelectionCriteria, TagSet},
};

const DEFAULT_LOCAL_THRESHOLD: Duration = Duration::from_millis(15);

/// Narrows the topology down to the servers that satisfy `criteria`, within the local latency
/// window of the fastest candidate.
pub fn suitable_servers<'a>(
    topology: &'a TopologyDescription,
    criteria: &SelectionCriteria,
) -> Result<Vec<&'a ServerDescription>> {
    if let Some(message) = &topology.compatibility_error {
        return Err(Error::invalid_argument(message.clone()));
    }

    let read_preference = criteria.read_preference();
    let mut candidates = match topology.topology_type {
        TopologyType::Unknown => Vec::new(),
        TopologyType::Single | TopologyType::LoadBalanced => topology.servers.values().collect(),
        TopologyType::Sharded => servers_with_type(topology, &[ServerType::Mongos]),
        TopologyType::ReplicaSetWithPrimary | TopologyType::ReplicaSetNoPrimary => {
            let candidates = suitable_replica_set_servers(topology, &read_preference);
            filter_by_max_staleness(topology, candidates, read_preference.max_staleness)?
        }
    };

    retain_within_latency_window(topology, &mut candidates);
    Ok(candidates)
}

/// The minimum gap the server allows between successive oplog writes being visible on a
/// secondary; part of the `maxStalenessSeconds` floor alongside `heartbeatFrequencyMS`.
const IDLE_WRITE_PERIOD: Duration = Duration::from_secs(10);

/// Rejects servers staler than `max_staleness`, per the standard replica-set staleness formulas,
/// and validates `max_staleness` itself against the `heartbeatFrequencyMS + idleWritePeriodMS`
/// floor.
fn filter_by_max_staleness<'a>(
    topology: &TopologyDescription,
    candidates: Vec<&'a ServerDescription>,
    max_staleness: Option<Duration>,
) -> Result<Vec<&'a ServerDescription>> {
    let Some(max_staleness) = max_staleness else {
        return Ok(candidates);
    };

    let floor = topology.heartbeat_frequency + IDLE_WRITE_PERIOD;
    if max_staleness < floor {
        return Err(Error::invalid_argument(format!(
            "maxStalenessSeconds ({:?}) must be at least heartbeatFrequencyMS + idleWritePeriodMS ({:?})",
            max_staleness, floor
        )));
    }

    let primary = topology.servers.values().find(|s| s.server_type == ServerType::RsPrimary);
    let max_secondary_write = topology
        .servers
        .values()
        .filter(|s| s.server_type == ServerType::RsSecondary)
        .filter_map(|s| s.last_write_date())
        .max();

    Ok(candidates
        .into_iter()
        .filter(|candidate| match server_staleness(topology, primary, max_secondary_write, candidate) {
            Some(staleness) => staleness <= max_staleness,
            None => true,
        })
        .collect())
}

/// `None` means staleness couldn't be computed (missing `lastWrite` data); such a server is never
/// filtered out by this step, since SDAM can't yet say whether it's stale.
fn server_staleness(
    topology: &TopologyDescription,
    primary: Option<&ServerDescription>,
    max_secondary_write: Option<crate::bson::DateTime>,
    candidate: &ServerDescription,
) -> Option<Duration> {
    if candidate.server_type == ServerType::RsPrimary {
        return Some(Duration::ZERO);
    }
    let heartbeat_frequency_millis = topology.heartbeat_frequency.as_millis() as i64;

    let staleness_millis = match primary {
        Some(primary) => {
            let secondary_lag = candidate.last_update_time?.millis() - candidate.last_write_date()?.millis();
            let primary_lag = primary.last_update_time?.millis() - primary.last_write_date()?.millis();
            secondary_lag - primary_lag + heartbeat_frequency_millis
        }
        None => max_secondary_write?.millis() - candidate.last_write_date()?.millis() + heartbeat_frequency_millis,
    };

    Some(Duration::from_millis(staleness_millis.max(0) as u64))
}

fn servers_with_type<'a>(topology: &'a TopologyDescription, types: &[ServerType]) -> Vec<&'a ServerDescription> {
    topology.servers.values().filter(|s| types.contains(&s.server_type)).collect()
}

fn suitable_replica_set_servers<'a>(
    topology: &'a TopologyDescription,
    read_preference: &ReadPreference,
) -> Vec<&'a ServerDescription> {
    use crate::selection_criteria::ReadPreferenceMode::*;

    let primaries = servers_with_type(topology, &[ServerType::RsPrimary]);
    let secondaries: Vec<&ServerDescription> = servers_with_type(topology, &[ServerType::RsSecondary])
        .into_iter()
        .filter(|s| matches_any_tag_set(s.tags(), &read_preference.tag_sets))
        .collect();

    match read_preference.mode {
        Primary => primaries,
        PrimaryPreferred => {
            if primaries.is_empty() {
                secondaries
            } else {
                primaries
            }
        }
        Secondary => secondaries,
        SecondaryPreferred => {
            if secondaries.is_empty() {
                primaries
            } else {
                secondaries
            }
        }
        Nearest => {
            // Nearest treats a primary as an ordinary candidate alongside secondaries, so it gets
            // the same tag-set filtering instead of the exemption primary-biased modes give it.
            let tagged_primaries = primaries
                .into_iter()
                .filter(|s| matches_any_tag_set(s.tags(), &read_preference.tag_sets));
            tagged_primaries.chain(secondaries).collect()
        }
    }
}

fn matches_any_tag_set(server_tags: Option<&TagSet>, tag_sets: &[TagSet]) -> bool {
    if tag_sets.is_empty() {
        return true;
    }
    let Some(server_tags) = server_tags else {
        return false;
    };
    tag_sets
        .iter()
        .any(|set| set.iter().all(|(k, v)| server_tags.get(k) == Some(v)))
}

fn retain_within_latency_window(topology: &TopologyDescription, candidates: &mut Vec<&ServerDescription>) {
    let shortest = candidates
        .iter()
        .filter_map(|s| s.average_round_trip_time)
        .min();
    let local_threshold = topology.local_threshold.unwrap_or(DEFAULT_LOCAL_THRESHOLD);
    let Some(shortest) = shortest else {
        candidates.retain(|s| s.server_type == ServerType::LoadBalancer);
        return;
    };
    let max_rtt = shortest.checked_add(local_threshold).unwrap_or(Duration::MAX);
    candidates.retain(|s| match s.average_round_trip_time {
        Some(rtt) => rtt <= max_rtt,
        None => s.server_type == ServerType::LoadBalancer,
    });
}

/// Picks one address from `candidates` via power-of-two-choices: sample two at random and return
/// the one that's currently serving fewer in-flight operations.
pub fn pick_power_of_two_choices<'a>(
    candidates: &[&'a ServerAddress],
    in_flight: &dyn Fn(&ServerAddress) -> usize,
) -> Option<&'a ServerAddress> {
    match candidates.len() {
        0 => None,
        1 => Some(candidates[0]),
        _ => {
            let mut rng = rand::thread_rng();
            let sample: Vec<&&ServerAddress> = candidates.choose_multiple(&mut rng, 2).collect();
            sample.into_iter().min_by_key(|address| in_flight(address)).copied()
        }
    }
}

/// Blocks until a server satisfying `criteria` is available, retrying as the topology changes,
/// or fails with a `ServerSelectionTimeout` once `timeout` elapses.
pub async fn select_server(
    state: &Arc<TopologyState>,
    criteria: &SelectionCriteria,
    timeout: Duration,
    in_flight: &dyn Fn(&ServerAddress) -> usize,
) -> Result<ServerAddress> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        {
            let description = state.description.read().await;
            let candidates = suitable_servers(&description, criteria)?;
            let addresses: Vec<&ServerAddress> = candidates.iter().map(|s| &s.address).collect();
            if let Some(address) = pick_power_of_two_choices(&addresses, in_flight) {
                return Ok(address.clone());
            }
        }
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            let description = state.description.read().await;
            return Err(Error::server_selection_timeout(format!(
                "no server available for {:?} after {:?}; topology type {:?}",
                criteria, timeout, description.topology_type
            )));
        }
        tokio::select! {
            _ = state.changed.notified() => {}
            _ = tokio::time::sleep(remaining) => {}
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        bson::DateTime,
        sdam::description::{HelloCommandResponse, HelloReply},
    };

    fn server(server_type: ServerType, rtt_ms: u64) -> ServerDescription {
        let mut sd = ServerDescription::new(ServerAddress::parse("a:27017"));
        sd.server_type = server_type;
        sd.average_round_trip_time = Some(Duration::from_millis(rtt_ms));
        sd
    }

    fn server_with_staleness_data(
        address: &str,
        server_type: ServerType,
        last_update_millis: i64,
        last_write_millis: i64,
    ) -> ServerDescription {
        let mut sd = ServerDescription::new(ServerAddress::parse(address));
        sd.server_type = server_type;
        sd.average_round_trip_time = Some(Duration::from_millis(1));
        sd.last_update_time = Some(DateTime::from_millis(last_update_millis));
        sd.reply = Ok(Some(HelloReply {
            command_response: HelloCommandResponse {
                last_write_date: Some(DateTime::from_millis(last_write_millis)),
                set_name: Some("rs0".to_string()),
                ..Default::default()
            },
            cluster_time: None,
        }));
        sd
    }

    #[test]
    fn secondary_preferred_falls_back_to_primary_when_no_secondaries() {
        let mut topology = TopologyDescription::new(&crate::options::ClientOptions::direct_single(
            ServerAddress::parse("a:27017"),
        ));
        topology.topology_type = TopologyType::ReplicaSetWithPrimary;
        topology.servers.insert(ServerAddress::parse("a:27017"), server(ServerType::RsPrimary, 1));

        let criteria = SelectionCriteria::from(ReadPreference::secondary_preferred());
        let selected = suitable_servers(&topology, &criteria).unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].server_type, ServerType::RsPrimary);
    }

    #[test]
    fn power_of_two_choices_picks_the_less_loaded_server() {
        let a = ServerAddress::parse("a:27017");
        let b = ServerAddress::parse("b:27017");
        let candidates = vec![&a, &b];
        let picked = pick_power_of_two_choices(&candidates, &|addr| if *addr == a { 5 } else { 0 });
        assert_eq!(picked, Some(&b));
    }

    #[test]
    fn nearest_excludes_a_primary_whose_tags_do_not_match() {
        let mut topology = TopologyDescription::new(&crate::options::ClientOptions::direct_single(
            ServerAddress::parse("a:27017"),
        ));
        topology.topology_type = TopologyType::ReplicaSetWithPrimary;
        let mut primary = server(ServerType::RsPrimary, 1);
        primary.reply = Ok(Some(HelloReply {
            command_response: HelloCommandResponse {
                tags: Some([("region".to_string(), "east".to_string())].into_iter().collect()),
                set_name: Some("rs0".to_string()),
                ..Default::default()
            },
            cluster_time: None,
        }));
        topology.servers.insert(ServerAddress::parse("a:27017"), primary);

        let mut read_preference = ReadPreference::default();
        read_preference.mode = crate::selection_criteria::ReadPreferenceMode::Nearest;
        read_preference.tag_sets = vec![[("region".to_string(), "west".to_string())].into_iter().collect()];
        let criteria = SelectionCriteria::from(read_preference);

        let selected = suitable_servers(&topology, &criteria).unwrap();
        assert!(selected.is_empty());
    }

    #[test]
    fn max_staleness_below_the_heartbeat_floor_is_rejected() {
        let mut topology = TopologyDescription::new(&crate::options::ClientOptions::direct_single(
            ServerAddress::parse("a:27017"),
        ));
        topology.topology_type = TopologyType::ReplicaSetWithPrimary;
        topology.heartbeat_frequency = Duration::from_secs(10);
        topology.servers.insert(ServerAddress::parse("a:27017"), server(ServerType::RsPrimary, 1));

        let mut read_preference = ReadPreference::secondary_preferred();
        read_preference.max_staleness = Some(Duration::from_secs(5));
        let criteria = SelectionCriteria::from(read_preference);

        let error = suitable_servers(&topology, &criteria).unwrap_err();
        assert!(error.to_string().contains("maxStalenessSeconds"));
    }

    #[test]
    fn a_secondary_staler_than_max_staleness_is_excluded() {
        let mut topology = TopologyDescription::new(&crate::options::ClientOptions::direct_single(
            ServerAddress::parse("a:27017"),
        ));
        topology.topology_type = TopologyType::ReplicaSetWithPrimary;
        topology.heartbeat_frequency = Duration::from_secs(10);

        let primary = server_with_staleness_data("a:27017", ServerType::RsPrimary, 100_000, 100_000);
        let fresh_secondary = server_with_staleness_data("b:27017", ServerType::RsSecondary, 100_000, 99_000);
        let stale_secondary = server_with_staleness_data("c:27017", ServerType::RsSecondary, 100_000, 10_000);
        topology.servers.insert(ServerAddress::parse("a:27017"), primary);
        topology.servers.insert(ServerAddress::parse("b:27017"), fresh_secondary);
        topology.servers.insert(ServerAddress::parse("c:27017"), stale_secondary);

        let mut read_preference = ReadPreference::secondary_preferred();
        read_preference.max_staleness = Some(Duration::from_secs(90));
        let criteria = SelectionCriteria::from(read_preference);

        let selected = suitable_servers(&topology, &criteria).unwrap();
        let addresses: Vec<_> = selected.iter().map(|s| s.address.clone()).collect();
        assert!(addresses.contains(&ServerAddress::parse("b:27017")));
        assert!(!addresses.contains(&ServerAddress::parse("c:27017")));
    }
}
