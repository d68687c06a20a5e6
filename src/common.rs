use connstring::ConnectionString;
use error::Error::ArgumentError;
use error::Result;

use time;

/// Default latency window on top of the fastest round-trip time, in milliseconds.
pub const DEFAULT_LOCAL_THRESHOLD_MS: i64 = 15;
/// Default bound on a server selection attempt, in milliseconds.
pub const DEFAULT_SERVER_SELECTION_TIMEOUT_MS: i64 = 10000;
/// Default server connection health check frequency, in milliseconds.
pub const DEFAULT_HEARTBEAT_FREQUENCY_MS: u64 = 30000;

/// Topology configuration recognized by the discovery and monitoring core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyOptions {
    /// Width of the latency window used to trim selected servers.
    pub local_threshold_ms: i64,
    /// How long a selection attempt may block waiting for an eligible server.
    pub server_selection_timeout_ms: i64,
    /// Delay between two heartbeat cycles of a server monitor.
    pub heartbeat_frequency_ms: u64,
    /// The expected replica set name, if connecting to a replica set.
    pub replica_set: Option<String>,
}

impl TopologyOptions {
    /// Returns the default topology configuration.
    pub fn new() -> TopologyOptions {
        TopologyOptions {
            local_threshold_ms: DEFAULT_LOCAL_THRESHOLD_MS,
            server_selection_timeout_ms: DEFAULT_SERVER_SELECTION_TIMEOUT_MS,
            heartbeat_frequency_ms: DEFAULT_HEARTBEAT_FREQUENCY_MS,
            replica_set: None,
        }
    }

    /// Reads the recognized options out of a parsed connection string.
    pub fn from_connection_string(config: &ConnectionString) -> Result<TopologyOptions> {
        let mut options = TopologyOptions::new();

        if let Some(ref config_options) = config.options {
            if let Some(value) = config_options.get("localThresholdMS") {
                options.local_threshold_ms = parse_ms("localThresholdMS", value)?;
            }

            if let Some(value) = config_options.get("serverSelectionTimeoutMS") {
                options.server_selection_timeout_ms = parse_ms("serverSelectionTimeoutMS", value)?;
            }

            if let Some(value) = config_options.get("heartbeatFrequencyMS") {
                options.heartbeat_frequency_ms = parse_ms("heartbeatFrequencyMS", value)? as u64;
            }

            let set_name = config_options
                .get("replicaSet")
                .or_else(|| config_options.get("replicaset"));
            if let Some(name) = set_name {
                options.replica_set = Some(name.to_owned());
            }
        }

        Ok(options)
    }
}

fn parse_ms(key: &str, value: &str) -> Result<i64> {
    match value.parse::<i64>() {
        Ok(ms) if ms >= 0 => Ok(ms),
        _ => Err(ArgumentError(format!(
            "{} must be a non-negative integer, got '{}'.",
            key, value
        ))),
    }
}

/// Returns the current wall-clock time in milliseconds.
pub fn timestamp_ms() -> i64 {
    let now = time::get_time();
    now.sec * 1000 + now.nsec as i64 / 1000000
}
