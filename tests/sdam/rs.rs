use framework::{
    description_from_reply, errored_description, host, primary_count, primary_reply,
    primary_reply_versioned, replica_set_topology, secondary_reply, unknown_topology,
};

use mongo_sdam::topology::server::ServerType;
use mongo_sdam::topology::TopologyType;

const LOW_ELECTION_ID: &'static str = "000000000000000000000001";
const HIGH_ELECTION_ID: &'static str = "ffffffffffffffffffffffff";

#[test]
fn primary_report_establishes_replica_set() {
    let alpha = host("alpha.example.com", 27017);
    let beta = host("beta.example.com", 27017);
    let description = unknown_topology(&[&alpha, &beta]);

    let updated = description.update(description_from_reply(
        alpha.clone(),
        primary_reply("mars", &[&alpha, &beta]),
        4,
    ));

    assert_eq!(TopologyType::ReplicaSetWithPrimary, updated.topology_type);
    assert_eq!("mars", updated.set_name);
    assert_eq!(
        ServerType::RSPrimary,
        updated.servers.get(&alpha).unwrap().server_type
    );
    assert_eq!(
        ServerType::Unknown,
        updated.servers.get(&beta).unwrap().server_type
    );
}

#[test]
fn bound_unknown_topology_accepts_matching_primary() {
    let alpha = host("alpha.example.com", 27017);
    let beta = host("beta.example.com", 27017);
    let mut description = unknown_topology(&[&alpha, &beta]);
    description.set_name = "mars".to_owned();

    let updated = description.update(description_from_reply(
        alpha.clone(),
        primary_reply("mars", &[&alpha, &beta]),
        4,
    ));

    assert_eq!(TopologyType::ReplicaSetWithPrimary, updated.topology_type);
    assert_eq!(1, primary_count(&updated));
}

#[test]
fn primary_host_list_replaces_membership() {
    let alpha = host("alpha.example.com", 27017);
    let beta = host("beta.example.com", 27017);
    let gamma = host("gamma.example.com", 27017);
    let description = replica_set_topology("mars", &[&alpha, &beta]);

    let updated = description.update(description_from_reply(
        alpha.clone(),
        primary_reply("mars", &[&alpha, &gamma]),
        4,
    ));

    assert_eq!(TopologyType::ReplicaSetWithPrimary, updated.topology_type);
    assert!(updated.servers.contains_key(&alpha));
    assert!(!updated.servers.contains_key(&beta));
    assert_eq!(
        ServerType::Unknown,
        updated.servers.get(&gamma).unwrap().server_type
    );
}

#[test]
fn newer_primary_demotes_the_older_one() {
    let alpha = host("alpha.example.com", 27017);
    let beta = host("beta.example.com", 27017);
    let description = replica_set_topology("mars", &[&alpha, &beta]);

    let first = description.update(description_from_reply(
        alpha.clone(),
        primary_reply_versioned("mars", &[&alpha, &beta], 1, LOW_ELECTION_ID),
        4,
    ));
    assert_eq!(
        ServerType::RSPrimary,
        first.servers.get(&alpha).unwrap().server_type
    );

    let second = first.update(description_from_reply(
        beta.clone(),
        primary_reply_versioned("mars", &[&alpha, &beta], 1, HIGH_ELECTION_ID),
        4,
    ));

    assert_eq!(
        ServerType::RSPrimary,
        second.servers.get(&beta).unwrap().server_type
    );
    assert_eq!(
        ServerType::Unknown,
        second.servers.get(&alpha).unwrap().server_type
    );
    assert_eq!(1, primary_count(&second));
}

#[test]
fn stale_primary_claim_is_ignored() {
    let alpha = host("alpha.example.com", 27017);
    let beta = host("beta.example.com", 27017);
    let description = replica_set_topology("mars", &[&alpha, &beta]);

    let first = description.update(description_from_reply(
        alpha.clone(),
        primary_reply_versioned("mars", &[&alpha, &beta], 1, HIGH_ELECTION_ID),
        4,
    ));

    let second = first.update(description_from_reply(
        beta.clone(),
        primary_reply_versioned("mars", &[&alpha, &beta], 1, LOW_ELECTION_ID),
        4,
    ));

    assert_eq!(TopologyType::ReplicaSetWithPrimary, second.topology_type);
    assert_eq!(
        ServerType::RSPrimary,
        second.servers.get(&alpha).unwrap().server_type
    );
    assert_eq!(
        ServerType::Unknown,
        second.servers.get(&beta).unwrap().server_type
    );
}

#[test]
fn set_name_mismatch_demotes_the_member() {
    let alpha = host("alpha.example.com", 27017);
    let beta = host("beta.example.com", 27017);
    let description = replica_set_topology("mars", &[&alpha, &beta]);

    let updated = description.update(description_from_reply(
        beta.clone(),
        secondary_reply("venus", &[&alpha, &beta], None),
        4,
    ));

    assert_eq!("mars", updated.set_name);
    assert!(updated.servers.contains_key(&alpha));
    assert_eq!(
        ServerType::Unknown,
        updated.servers.get(&beta).unwrap().server_type
    );
}

#[test]
fn losing_the_primary_reverts_to_no_primary() {
    let alpha = host("alpha.example.com", 27017);
    let beta = host("beta.example.com", 27017);
    let description = replica_set_topology("mars", &[&alpha, &beta]);

    let with_primary = description.update(description_from_reply(
        alpha.clone(),
        primary_reply("mars", &[&alpha, &beta]),
        4,
    ));
    assert_eq!(TopologyType::ReplicaSetWithPrimary, with_primary.topology_type);

    let degraded = with_primary.update(errored_description(alpha.clone()));

    assert_eq!(TopologyType::ReplicaSetNoPrimary, degraded.topology_type);
    let entry = degraded.servers.get(&alpha).unwrap();
    assert_eq!(ServerType::Unknown, entry.server_type);
    assert!(entry.err.is_some());
}

#[test]
fn member_report_marks_a_possible_primary() {
    let alpha = host("alpha.example.com", 27017);
    let beta = host("beta.example.com", 27017);
    let description = replica_set_topology("mars", &[&alpha, &beta]);

    let updated = description.update(description_from_reply(
        alpha.clone(),
        secondary_reply("mars", &[&alpha, &beta], Some(&beta)),
        4,
    ));

    assert_eq!(TopologyType::ReplicaSetNoPrimary, updated.topology_type);
    assert_eq!(
        ServerType::PossiblePrimary,
        updated.servers.get(&beta).unwrap().server_type
    );
}

#[test]
fn refolding_an_identical_description_is_stable() {
    let alpha = host("alpha.example.com", 27017);
    let beta = host("beta.example.com", 27017);
    let description = replica_set_topology("mars", &[&alpha, &beta]);

    let observed = description_from_reply(
        alpha.clone(),
        primary_reply("mars", &[&alpha, &beta]),
        4,
    );

    let first = description.update(observed.clone());
    let second = first.update(observed);

    assert_eq!(first, second);
}

#[test]
fn fold_sequences_never_yield_two_primaries() {
    let alpha = host("alpha.example.com", 27017);
    let beta = host("beta.example.com", 27017);
    let mut current = replica_set_topology("mars", &[&alpha, &beta]);

    for round in 0..6 {
        let claimant = if round % 2 == 0 { &alpha } else { &beta };
        let election_hex = format!("{:024x}", round + 1);
        let reply =
            primary_reply_versioned("mars", &[&alpha, &beta], 1, &election_hex);

        current = current.update(description_from_reply(claimant.clone(), reply, 4));

        assert!(primary_count(&current) <= 1);
        assert_eq!(
            ServerType::RSPrimary,
            current.servers.get(claimant).unwrap().server_type
        );
    }
}
