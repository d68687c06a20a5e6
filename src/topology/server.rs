use error::Error;
use error::Error::OperationError;
use Result;

use bson::oid;
use chrono::{DateTime, Utc};

use apm::Listener;
use command::CommandRunner;
use connstring::Host;

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::{Arc, Weak};
use std::thread;

use super::monitor::{IsMasterResult, Monitor};
use super::TopologyInner;

/// The smallest wire version this driver can speak.
pub const DRIVER_MIN_WIRE_VERSION: i64 = 0;
/// The largest wire version this driver can speak.
pub const DRIVER_MAX_WIRE_VERSION: i64 = 6;

/// Describes the server role within a deployment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServerType {
    /// Standalone server.
    Standalone,
    /// Shard router.
    Mongos,
    /// Replica set primary.
    RSPrimary,
    /// Replica set secondary.
    RSSecondary,
    /// Replica set arbiter.
    RSArbiter,
    /// Replica set member of some other type.
    RSOther,
    /// Replica set ghost member.
    RSGhost,
    /// Another member reported this server as the primary, but it has not
    /// been heard from itself yet.
    PossiblePrimary,
    /// The server's advertised wire version range does not overlap ours.
    Mismatch,
    /// Server type is currently unknown.
    Unknown,
}

impl FromStr for ServerType {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "Standalone" => ServerType::Standalone,
            "Mongos" => ServerType::Mongos,
            "RSPrimary" => ServerType::RSPrimary,
            "RSSecondary" => ServerType::RSSecondary,
            "RSArbiter" => ServerType::RSArbiter,
            "RSOther" => ServerType::RSOther,
            "RSGhost" => ServerType::RSGhost,
            "PossiblePrimary" => ServerType::PossiblePrimary,
            "Mismatch" => ServerType::Mismatch,
            _ => ServerType::Unknown,
        })
    }
}

/// An immutable snapshot of one server's observed state.
///
/// Monitors build a fresh description on every heartbeat and hand it to the
/// topology; a published description is never mutated afterwards.
#[derive(Clone, Debug)]
pub struct ServerDescription {
    /// The address this description was observed from.
    pub address: Host,
    /// The server type.
    pub server_type: ServerType,
    /// Any error encountered while monitoring this server.
    pub err: Option<Arc<Error>>,
    /// The smoothed round-trip time of recent heartbeats, in milliseconds.
    pub round_trip_time: Option<i64>,
    /// When this description was produced.
    pub last_update_time: Option<DateTime<Utc>>,
    /// The minimum wire version supported by this server.
    pub min_wire_version: i64,
    /// The maximum wire version supported by this server.
    pub max_wire_version: i64,
    /// All hosts in the replica set known by this server.
    pub hosts: Vec<Host>,
    /// All passive members of the replica set known by this server.
    pub passives: Vec<Host>,
    /// All arbiters in the replica set known by this server.
    pub arbiters: Vec<Host>,
    /// Server tags for targeted read operations on specific members.
    pub tags: BTreeMap<String, String>,
    /// The replica set name.
    pub set_name: String,
    /// The replica set version reported by a primary.
    pub set_version: Option<i64>,
    /// The server's current election id, if it believes it is a primary.
    pub election_id: Option<oid::ObjectId>,
    /// The server's opinion of who the primary is.
    pub primary: Option<Host>,
}

impl ServerDescription {
    /// Returns a default, unknown server description for the address.
    pub fn new(address: Host) -> ServerDescription {
        ServerDescription {
            address: address,
            server_type: ServerType::Unknown,
            err: None,
            round_trip_time: None,
            last_update_time: None,
            min_wire_version: -1,
            max_wire_version: -1,
            hosts: Vec::new(),
            passives: Vec::new(),
            arbiters: Vec::new(),
            tags: BTreeMap::new(),
            set_name: String::new(),
            set_version: None,
            election_id: None,
            primary: None,
        }
    }

    /// Updates the description from an ismaster status reply.
    pub fn update(&mut self, ismaster: IsMasterResult, round_trip_time: i64) {
        if !ismaster.ok {
            self.set_err(Arc::new(OperationError(
                "ismaster returned a not-ok response.".to_owned(),
            )));
            return;
        }

        self.err = None;
        self.round_trip_time = Some(round_trip_time);
        self.last_update_time = Some(Utc::now());
        self.min_wire_version = ismaster.min_wire_version;
        self.max_wire_version = ismaster.max_wire_version;
        self.hosts = ismaster.hosts;
        self.passives = ismaster.passives;
        self.arbiters = ismaster.arbiters;
        self.tags = ismaster.tags;
        self.set_name = ismaster.set_name;
        self.set_version = ismaster.set_version;
        self.election_id = ismaster.election_id;
        self.primary = ismaster.primary;

        let set_name_empty = self.set_name.is_empty();
        let msg_empty = ismaster.msg.is_empty();

        self.server_type = if msg_empty && set_name_empty && !ismaster.is_replica_set {
            ServerType::Standalone
        } else if !msg_empty {
            ServerType::Mongos
        } else if ismaster.is_master && !set_name_empty {
            ServerType::RSPrimary
        } else if ismaster.is_secondary && !set_name_empty {
            ServerType::RSSecondary
        } else if ismaster.arbiter_only && !set_name_empty {
            ServerType::RSArbiter
        } else if !set_name_empty {
            ServerType::RSOther
        } else if ismaster.is_replica_set {
            ServerType::RSGhost
        } else {
            ServerType::Unknown
        };

        // A server outside our wire version range is unusable whatever its role.
        if self.min_wire_version >= 0
            && self.max_wire_version >= 0
            && (self.min_wire_version > DRIVER_MAX_WIRE_VERSION
                || self.max_wire_version < DRIVER_MIN_WIRE_VERSION)
        {
            self.server_type = ServerType::Mismatch;
        }
    }

    // Sets an encountered error, reverts the server type to Unknown and
    // resets the round-trip history.
    pub fn set_err(&mut self, err: Arc<Error>) {
        self.err = Some(err);
        self.server_type = ServerType::Unknown;
        self.set_name = String::new();
        self.set_version = None;
        self.election_id = None;
        self.round_trip_time = None;
        self.last_update_time = Some(Utc::now());
    }
}

// Equality tracks the observed server state; round-trip time, the update
// timestamp and error identity are transient, so two descriptions produced
// by identical heartbeats compare equal and suppress duplicate change events.
impl PartialEq for ServerDescription {
    fn eq(&self, other: &ServerDescription) -> bool {
        self.address == other.address
            && self.server_type == other.server_type
            && self.min_wire_version == other.min_wire_version
            && self.max_wire_version == other.max_wire_version
            && self.hosts == other.hosts
            && self.passives == other.passives
            && self.arbiters == other.arbiters
            && self.tags == other.tags
            && self.set_name == other.set_name
            && self.set_version == other.set_version
            && self.election_id == other.election_id
            && self.primary == other.primary
            && err_message(&self.err) == err_message(&other.err)
    }
}

fn err_message(err: &Option<Arc<Error>>) -> Option<String> {
    err.as_ref().map(|err| err.to_string())
}

/// The long-lived handle for a single monitored server. Server selection
/// resolves to one of these; it never constructs a connection.
#[derive(Clone)]
pub struct Server {
    /// Host connection details.
    pub host: Host,
    // The monitor that keeps this server's description current.
    monitor: Arc<Monitor>,
}

impl Server {
    /// Returns a new server handle, spawning its monitor thread.
    pub fn new(
        topology: Weak<TopologyInner>,
        host: Host,
        runner: Arc<dyn CommandRunner>,
        listener: Arc<Listener>,
        heartbeat_frequency_ms: u64,
    ) -> Server {
        let monitor = Arc::new(Monitor::new(
            topology,
            host.clone(),
            runner,
            listener,
            heartbeat_frequency_ms,
        ));

        let thread_monitor = monitor.clone();
        thread::spawn(move || {
            thread_monitor.run();
        });

        Server {
            host: host,
            monitor: monitor,
        }
    }

    /// Wakes the monitor for an immediate health check.
    pub fn request_update(&self) {
        self.monitor.request_update();
    }

    /// Stops the monitor. A stopped monitor emits nothing further.
    pub fn close(&self) {
        self.monitor.stop();
    }
}
