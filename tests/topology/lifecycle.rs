use framework::{
    count, description_from_reply, errored_description, host, primary_reply_versioned,
    standalone_reply, wait_for, ScriptedRunner,
};

use mongo_sdam::apm::Event;
use mongo_sdam::connstring::ConnectionString;
use mongo_sdam::topology::server::ServerType;
use mongo_sdam::topology::{ThreadedTopology, Topology};
use mongo_sdam::TopologyOptions;

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

fn fast_options() -> TopologyOptions {
    let mut options = TopologyOptions::new();
    options.heartbeat_frequency_ms = 50;
    options.server_selection_timeout_ms = 5000;
    options
}

#[test]
fn connect_publishes_the_opening_sequence() {
    static EVENTS: Mutex<Vec<String>> = Mutex::new(Vec::new());
    fn record(event: &Event) {
        EVENTS.lock().unwrap().push(event.name().to_owned());
    }

    let alpha = host("alpha.example.com", 27017);
    let runner = Arc::new(ScriptedRunner::new());
    runner.set_reply(alpha.clone(), standalone_reply());

    let topology = Topology::with_config(
        ConnectionString::with_host(alpha),
        Some(fast_options()),
        runner,
    )
    .unwrap();
    topology.add_event_hook(record).unwrap();
    topology.connect().unwrap();

    {
        let events = EVENTS.lock().unwrap();
        assert_eq!("topologyOpening", events[0]);
        assert_eq!("topologyDescriptionChanged", events[1]);
        assert_eq!("serverOpening", events[2]);
    }

    topology.close().unwrap();
}

#[test]
fn double_close_produces_no_duplicate_events() {
    static EVENTS: Mutex<Vec<String>> = Mutex::new(Vec::new());
    fn record(event: &Event) {
        EVENTS.lock().unwrap().push(event.name().to_owned());
    }

    let alpha = host("alpha.example.com", 27017);
    let runner = Arc::new(ScriptedRunner::new());

    let topology = Topology::with_config(
        ConnectionString::with_host(alpha),
        Some(fast_options()),
        runner,
    )
    .unwrap();
    topology.add_event_hook(record).unwrap();
    topology.connect().unwrap();

    topology.close().unwrap();
    topology.close().unwrap();

    {
        let events = EVENTS.lock().unwrap();
        assert_eq!(1, count(&events, "topologyClosed"));
        assert_eq!(1, count(&events, "serverClosed"));
    }

    // A closed topology refuses further operations.
    assert!(topology.select_server(None).is_err());
    assert!(topology.connect().is_err());
}

#[test]
fn stale_updates_are_discarded_silently() {
    static EVENTS: Mutex<Vec<String>> = Mutex::new(Vec::new());
    fn record(event: &Event) {
        EVENTS.lock().unwrap().push(event.name().to_owned());
    }

    let alpha = host("alpha.example.com", 27017);
    let runner = Arc::new(ScriptedRunner::new());

    let topology = Topology::with_config(
        ConnectionString::with_host(alpha.clone()),
        Some(fast_options()),
        runner,
    )
    .unwrap();
    topology.add_event_hook(record).unwrap();

    let stranger = errored_description(host("stranger.example.com", 27017));
    topology.on_server_update(stranger).unwrap();

    let description = topology.description().unwrap();
    assert_eq!(1, description.servers.len());
    assert!(description.servers.contains_key(&alpha));
    assert!(EVENTS.lock().unwrap().is_empty());
}

#[test]
fn selection_resolves_the_existing_handle() {
    let alpha = host("alpha.example.com", 27017);
    let runner = Arc::new(ScriptedRunner::new());
    runner.set_reply(alpha.clone(), standalone_reply());

    let topology = Topology::with_config(
        ConnectionString::with_host(alpha.clone()),
        Some(fast_options()),
        runner,
    )
    .unwrap();
    topology.connect().unwrap();

    assert!(wait_for(5000, || {
        let description = topology.description().unwrap();
        description
            .servers
            .get(&alpha)
            .map_or(false, |server| server.server_type == ServerType::Standalone)
    }));

    let server = topology.select_server(None).unwrap();
    assert_eq!(alpha, server.host);

    // Selection looked a handle up instead of growing the monitor map.
    assert_eq!(1, topology.addresses().unwrap().len());

    topology.close().unwrap();
}

#[test]
fn identical_heartbeats_do_not_republish_changes() {
    static EVENTS: Mutex<Vec<String>> = Mutex::new(Vec::new());
    fn record(event: &Event) {
        EVENTS.lock().unwrap().push(event.name().to_owned());
    }

    let alpha = host("alpha.example.com", 27017);
    let runner = Arc::new(ScriptedRunner::new());
    runner.set_reply(alpha.clone(), standalone_reply());

    let topology = Topology::with_config(
        ConnectionString::with_host(alpha.clone()),
        Some(fast_options()),
        runner,
    )
    .unwrap();
    topology.add_event_hook(record).unwrap();
    topology.connect().unwrap();

    assert!(wait_for(5000, || {
        let description = topology.description().unwrap();
        description
            .servers
            .get(&alpha)
            .map_or(false, |server| server.server_type == ServerType::Standalone)
    }));

    // Several more identical heartbeat cycles come and go.
    thread::sleep(Duration::from_millis(400));

    {
        let events = EVENTS.lock().unwrap();
        assert_eq!(1, count(&events, "serverDescriptionChanged"));
        assert_eq!(2, count(&events, "topologyDescriptionChanged"));
        assert!(count(&events, "serverHeartbeatSucceeded") >= 2);
    }

    topology.close().unwrap();
}

#[test]
fn concurrent_primary_claims_keep_at_most_one_primary() {
    let alpha = host("alpha.example.com", 27017);
    let beta = host("beta.example.com", 27017);

    let mut options = fast_options();
    options.replica_set = Some("mars".to_owned());

    let runner = Arc::new(ScriptedRunner::new());
    let topology = Topology::with_config(
        ConnectionString::with_hosts(vec![alpha.clone(), beta.clone()]),
        Some(options),
        runner,
    )
    .unwrap();

    let mut workers = Vec::new();
    for worker in 0..2 {
        let topology = topology.clone();
        let alpha = alpha.clone();
        let beta = beta.clone();

        workers.push(thread::spawn(move || {
            let claimant = if worker == 0 { alpha.clone() } else { beta.clone() };
            for round in 0..20 {
                let election_hex = format!("{:020x}{:02x}{:02x}", round, worker, round);
                let reply = primary_reply_versioned(
                    "mars",
                    &[&alpha, &beta],
                    1,
                    &election_hex,
                );
                let description = description_from_reply(claimant.clone(), reply, 4);
                topology.on_server_update(description).unwrap();
            }
        }));
    }

    for worker in workers {
        worker.join().unwrap();
    }

    let description = topology.description().unwrap();
    let primaries = description
        .servers
        .values()
        .filter(|server| server.server_type == ServerType::RSPrimary)
        .count();
    assert!(primaries <= 1);

    topology.close().unwrap();
}
