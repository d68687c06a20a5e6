use std::fmt;
use std::sync::Arc;

use bson::oid;
use bson::Document;

use connstring::Host;
use error::Error;
use topology::server::ServerDescription;
use topology::TopologyDescription;

/// A lifecycle or change event published by the topology core.
///
/// Description snapshots are carried by reference-counted pointer, so hooks
/// may retain them without copying the full server map.
#[derive(Clone, Debug)]
pub enum Event {
    ServerOpening {
        topology_id: oid::ObjectId,
        address: Host,
    },
    ServerClosed {
        topology_id: oid::ObjectId,
        address: Host,
    },
    ServerDescriptionChanged {
        topology_id: oid::ObjectId,
        address: Host,
        previous: ServerDescription,
        current: ServerDescription,
    },
    TopologyOpening {
        topology_id: oid::ObjectId,
    },
    TopologyClosed {
        topology_id: oid::ObjectId,
    },
    TopologyDescriptionChanged {
        topology_id: oid::ObjectId,
        previous: Arc<TopologyDescription>,
        current: Arc<TopologyDescription>,
    },
    ServerHeartbeatStarted {
        address: Host,
    },
    ServerHeartbeatSucceeded {
        address: Host,
        duration_ms: i64,
        reply: Document,
    },
    ServerHeartbeatFailed {
        address: Host,
        duration_ms: i64,
        error: Arc<Error>,
    },
}

impl Event {
    /// The canonical name of the event.
    pub fn name(&self) -> &'static str {
        match *self {
            Event::ServerOpening { .. } => "serverOpening",
            Event::ServerClosed { .. } => "serverClosed",
            Event::ServerDescriptionChanged { .. } => "serverDescriptionChanged",
            Event::TopologyOpening { .. } => "topologyOpening",
            Event::TopologyClosed { .. } => "topologyClosed",
            Event::TopologyDescriptionChanged { .. } => "topologyDescriptionChanged",
            Event::ServerHeartbeatStarted { .. } => "serverHeartbeatStarted",
            Event::ServerHeartbeatSucceeded { .. } => "serverHeartbeatSucceeded",
            Event::ServerHeartbeatFailed { .. } => "serverHeartbeatFailed",
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Event::ServerOpening {
                ref topology_id,
                ref address,
            } => write!(fmt, "SERVER.{} OPENING (topology {})", address, topology_id),
            Event::ServerClosed {
                ref topology_id,
                ref address,
            } => write!(fmt, "SERVER.{} CLOSED (topology {})", address, topology_id),
            Event::ServerDescriptionChanged {
                ref address,
                ref previous,
                ref current,
                ..
            } => write!(
                fmt,
                "SERVER.{} CHANGED: {:?} to {:?}",
                address, previous.server_type, current.server_type
            ),
            Event::TopologyOpening { ref topology_id } => {
                write!(fmt, "TOPOLOGY.{} OPENING", topology_id)
            }
            Event::TopologyClosed { ref topology_id } => {
                write!(fmt, "TOPOLOGY.{} CLOSED", topology_id)
            }
            Event::TopologyDescriptionChanged {
                ref topology_id,
                ref previous,
                ref current,
            } => write!(
                fmt,
                "TOPOLOGY.{} CHANGED: {:?} to {:?}",
                topology_id, previous.topology_type, current.topology_type
            ),
            Event::ServerHeartbeatStarted { ref address } => {
                write!(fmt, "HEARTBEAT.{} STARTED", address)
            }
            Event::ServerHeartbeatSucceeded {
                ref address,
                duration_ms,
                ..
            } => write!(fmt, "HEARTBEAT.{} SUCCEEDED ({} ms)", address, duration_ms),
            Event::ServerHeartbeatFailed {
                ref address,
                duration_ms,
                ref error,
            } => write!(
                fmt,
                "HEARTBEAT.{} FAILED: {} ({} ms)",
                address, error, duration_ms
            ),
        }
    }
}
