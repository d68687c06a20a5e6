//! This crate contains the server discovery and monitoring core of a MongoDB
//! driver. It maintains a live view of a deployment - a standalone server, a
//! replica set, or a sharded cluster - by running a heartbeat monitor against
//! every known server, and selects an eligible server for each operation
//! within a latency window and a selection timeout.
//!
//! Topology state is modeled as immutable snapshots: every accepted heartbeat
//! folds one `ServerDescription` into the current `TopologyDescription` and
//! swaps in the replacement wholesale, so readers never lock against the
//! monitors. Wire-level messaging, connection pooling and authentication are
//! external collaborators reached through the `CommandRunner` trait.
extern crate bson;
extern crate chrono;
extern crate rand;
extern crate time;

pub mod apm;
pub mod command;
pub mod common;
pub mod connstring;
pub mod error;
pub mod topology;

pub use command::CommandRunner;
pub use common::TopologyOptions;
pub use error::{Error, Result};
pub use topology::{ThreadedTopology, Topology};
