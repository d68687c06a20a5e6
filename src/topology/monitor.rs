//! Asynchronous server and topology discovery and monitoring using ismaster results.
use error::Error::ResponseError;
use Result;

use bson::{self, oid, Bson};
use bson::{bson, doc};
use chrono::{DateTime, Utc};

use apm::{Event, Listener};
use command::CommandRunner;
use common::timestamp_ms;
use connstring::{self, Host};

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::time::Duration;

use super::server::ServerDescription;
use super::{ThreadedTopology, TopologyInner};

/// The result of an ismaster status command.
#[derive(Clone, Debug, PartialEq)]
pub struct IsMasterResult {
    pub ok: bool,
    pub is_master: bool,
    pub is_secondary: bool,
    pub arbiter_only: bool,
    pub is_replica_set: bool,
    pub hidden: bool,

    /// Shard-specific. mongos instances will add this field to the
    /// ismaster reply, and it will contain the value "isdbgrid".
    pub msg: String,

    pub me: Option<Host>,
    pub hosts: Vec<Host>,
    pub passives: Vec<Host>,
    pub arbiters: Vec<Host>,
    pub tags: BTreeMap<String, String>,
    pub set_name: String,
    pub set_version: Option<i64>,
    pub election_id: Option<oid::ObjectId>,
    pub primary: Option<Host>,
    pub min_wire_version: i64,
    pub max_wire_version: i64,
    pub local_time: Option<DateTime<Utc>>,
}

fn document_bool(doc: &bson::Document, key: &str) -> bool {
    match doc.get(key) {
        Some(&Bson::Boolean(value)) => value,
        _ => false,
    }
}

fn document_i64(doc: &bson::Document, key: &str) -> Option<i64> {
    match doc.get(key) {
        Some(&Bson::I32(value)) => Some(value as i64),
        Some(&Bson::I64(value)) => Some(value),
        Some(&Bson::FloatingPoint(value)) => Some(value as i64),
        _ => None,
    }
}

fn document_string(doc: &bson::Document, key: &str) -> String {
    match doc.get(key) {
        Some(&Bson::String(ref value)) => value.to_owned(),
        _ => String::new(),
    }
}

fn document_hosts(doc: &bson::Document, key: &str) -> Vec<Host> {
    match doc.get(key) {
        Some(&Bson::Array(ref entries)) => entries
            .iter()
            .filter_map(|entry| match *entry {
                Bson::String(ref value) => connstring::parse_host(value).ok(),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

impl IsMasterResult {
    /// Parses an ismaster response document from the server.
    pub fn new(doc: bson::Document) -> Result<IsMasterResult> {
        let ok = match doc.get("ok") {
            Some(&Bson::I32(v)) => v != 0,
            Some(&Bson::I64(v)) => v != 0,
            Some(&Bson::FloatingPoint(v)) => v != 0.0,
            _ => return Err(ResponseError("ismaster reply does not contain `ok`.".to_owned())),
        };

        let mut result = IsMasterResult {
            ok: ok,
            is_master: document_bool(&doc, "ismaster"),
            is_secondary: document_bool(&doc, "secondary"),
            arbiter_only: document_bool(&doc, "arbiterOnly"),
            is_replica_set: document_bool(&doc, "isreplicaset"),
            hidden: document_bool(&doc, "hidden"),
            msg: document_string(&doc, "msg"),
            me: None,
            hosts: document_hosts(&doc, "hosts"),
            passives: document_hosts(&doc, "passives"),
            arbiters: document_hosts(&doc, "arbiters"),
            tags: BTreeMap::new(),
            set_name: document_string(&doc, "setName"),
            set_version: document_i64(&doc, "setVersion"),
            election_id: None,
            primary: None,
            min_wire_version: document_i64(&doc, "minWireVersion").unwrap_or(-1),
            max_wire_version: document_i64(&doc, "maxWireVersion").unwrap_or(-1),
            local_time: None,
        };

        if let Some(&Bson::String(ref host)) = doc.get("me") {
            result.me = Some(connstring::parse_host(host)?);
        }

        if let Some(&Bson::String(ref host)) = doc.get("primary") {
            result.primary = Some(connstring::parse_host(host)?);
        }

        if let Some(&Bson::UtcDatetime(ref datetime)) = doc.get("localTime") {
            result.local_time = Some(datetime.clone());
        }

        if let Some(&Bson::Document(ref tags)) = doc.get("tags") {
            for (key, value) in tags.iter() {
                if let Bson::String(ref tag) = *value {
                    result.tags.insert(key.to_owned(), tag.to_owned());
                }
            }
        }

        match doc.get("electionId") {
            Some(&Bson::ObjectId(ref id)) => result.election_id = Some(id.clone()),
            Some(&Bson::Document(ref wrapper)) => {
                if let Some(&Bson::String(ref hex)) = wrapper.get("$oid") {
                    result.election_id = Some(oid::ObjectId::with_string(hex)?);
                }
            }
            _ => (),
        }

        Ok(result)
    }
}

/// Monitors a single server and feeds observed descriptions into the topology.
pub struct Monitor {
    // Host being monitored.
    host: Host,
    // Executes the ismaster status command.
    runner: Arc<dyn CommandRunner>,
    // Receives heartbeat lifecycle events.
    listener: Arc<Listener>,
    // Topology fed by this monitor. Weak, so a dropped topology shuts the
    // monitor down instead of being kept alive by it.
    topology: Weak<TopologyInner>,
    // The delay between two heartbeat cycles.
    heartbeat_frequency_ms: u64,
    // Used for condvar functionality.
    dummy_lock: Mutex<()>,
    // To allow the topology to request an immediate update, this
    // condvar can be notified to wake up the monitor.
    condvar: Condvar,
    // While true, the monitor checks server connection health at the
    // heartbeat frequency rate.
    running: AtomicBool,
}

impl Monitor {
    pub fn new(
        topology: Weak<TopologyInner>,
        host: Host,
        runner: Arc<dyn CommandRunner>,
        listener: Arc<Listener>,
        heartbeat_frequency_ms: u64,
    ) -> Monitor {
        Monitor {
            host: host,
            runner: runner,
            listener: listener,
            topology: topology,
            heartbeat_frequency_ms: heartbeat_frequency_ms,
            dummy_lock: Mutex::new(()),
            condvar: Condvar::new(),
            running: AtomicBool::new(true),
        }
    }

    /// Wakes the monitor for an immediate health check.
    pub fn request_update(&self) {
        self.condvar.notify_one();
    }

    /// Signals the monitor to stop after its current cycle.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.condvar.notify_one();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    // Executes one heartbeat: run ismaster through the command runner, time
    // it, and hand the resulting description to the topology.
    fn heartbeat(&self) {
        let topology = match self.topology.upgrade() {
            Some(topology) => topology,
            None => {
                self.running.store(false, Ordering::SeqCst);
                return;
            }
        };

        self.listener.publish(&Event::ServerHeartbeatStarted {
            address: self.host.clone(),
        });

        let time_start = timestamp_ms();
        let result = self
            .runner
            .command(&self.host, "local.$cmd", &doc! { "ismaster": 1 });
        let duration = timestamp_ms() - time_start;

        // A destroy signal during the round trip abandons the cycle silently.
        if !self.running.load(Ordering::SeqCst) {
            return;
        }

        let mut description = ServerDescription::new(self.host.clone());

        match result {
            Ok(reply) => {
                self.listener.publish(&Event::ServerHeartbeatSucceeded {
                    address: self.host.clone(),
                    duration_ms: duration,
                    reply: reply.clone(),
                });

                match IsMasterResult::new(reply) {
                    Ok(ismaster) => {
                        let round_trip_time = self.smoothed_round_trip_time(&topology, duration);
                        description.update(ismaster, round_trip_time);
                    }
                    Err(err) => description.set_err(Arc::new(err)),
                }
            }
            Err(err) => {
                let err = Arc::new(err);
                self.listener.publish(&Event::ServerHeartbeatFailed {
                    address: self.host.clone(),
                    duration_ms: duration,
                    error: err.clone(),
                });
                description.set_err(err);
            }
        }

        let _ = topology.on_server_update(description);
    }

    // Averages the new measurement into the previous round-trip time over a
    // five-check window, as if the last five checks were weighted evenly.
    fn smoothed_round_trip_time(&self, topology: &Arc<TopologyInner>, measured: i64) -> i64 {
        let previous = match topology.description() {
            Ok(snapshot) => snapshot
                .servers
                .get(&self.host)
                .and_then(|server| server.round_trip_time),
            Err(_) => None,
        };

        match previous {
            Some(old) => (old * 4 + measured) / 5,
            None => measured,
        }
    }

    /// Runs the monitoring loop until stopped or the topology goes away.
    pub fn run(&self) {
        let mut guard = match self.dummy_lock.lock() {
            Ok(guard) => guard,
            Err(_) => return,
        };

        while self.running.load(Ordering::SeqCst) {
            self.heartbeat();

            if !self.running.load(Ordering::SeqCst) {
                break;
            }

            let frequency = Duration::from_millis(self.heartbeat_frequency_ms);
            guard = match self.condvar.wait_timeout(guard, frequency) {
                Ok(result) => result.0,
                Err(_) => break,
            };
        }
    }
}
