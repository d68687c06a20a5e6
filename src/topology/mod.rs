//! Tracks the live topology of a deployment and selects servers for operations.
pub mod monitor;
pub mod server;

use error::Error::{self, ArgumentError, OperationError};
use error::{Result, SelectionTimeoutError};

use bson::oid;
use rand::{thread_rng, Rng};

use apm::{Event, EventHook, Listener};
use command::CommandRunner;
use common::{timestamp_ms, TopologyOptions};
use connstring::{ConnectionString, Host};

use std::cmp;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use std::time::Duration;

use self::server::{Server, ServerDescription, ServerType};
use self::server::{DRIVER_MAX_WIRE_VERSION, DRIVER_MIN_WIRE_VERSION};

// Delay between two selection attempts while waiting for an eligible server.
const SELECTION_RETRY_DELAY_MS: i64 = 500;

/// Describes the type of topology for a server set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TopologyType {
    Single,
    ReplicaSetNoPrimary,
    ReplicaSetWithPrimary,
    Sharded,
    Unknown,
}

impl FromStr for TopologyType {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "Single" => TopologyType::Single,
            "ReplicaSetNoPrimary" => TopologyType::ReplicaSetNoPrimary,
            "ReplicaSetWithPrimary" => TopologyType::ReplicaSetWithPrimary,
            "Sharded" => TopologyType::Sharded,
            _ => TopologyType::Unknown,
        })
    }
}

/// A predicate narrowing the member list during server selection. Errors
/// propagate to the selection caller verbatim and are never retried.
pub type SelectionPredicate =
    fn(&TopologyDescription, &[ServerDescription]) -> Result<Vec<ServerDescription>>;

/// An immutable snapshot of the whole deployment.
///
/// Updates never mutate a snapshot in place: folding a server description
/// produces a structurally new value, so references handed out earlier stay
/// valid and readers never observe a partially applied update.
#[derive(Clone, Debug, PartialEq)]
pub struct TopologyDescription {
    pub topology_type: TopologyType,
    /// The set name for a replica set topology. If the topology is not a
    /// replica set, this will be an empty string.
    pub set_name: String,
    /// Known servers within the topology.
    pub servers: HashMap<Host, ServerDescription>,
    /// The configuration this snapshot was built under.
    pub options: TopologyOptions,
    // The largest (set version, election id) pair seen from a primary in
    // the topology. Claims below it are stale.
    max_set_version: Option<i64>,
    max_election_id: Option<oid::ObjectId>,
    // If false, some server in the topology speaks a wire version range
    // incompatible with this driver.
    compatible: bool,
    compat_error: String,
}

impl TopologyDescription {
    /// Returns a default, unknown topology description.
    pub fn new(options: TopologyOptions) -> TopologyDescription {
        TopologyDescription {
            topology_type: TopologyType::Unknown,
            set_name: String::new(),
            servers: HashMap::new(),
            options: options,
            max_set_version: None,
            max_election_id: None,
            compatible: true,
            compat_error: String::new(),
        }
    }

    pub fn is_compatible(&self) -> bool {
        self.compatible
    }

    /// Folds an updated server description into this snapshot, returning the
    /// successor snapshot. An update for an address that is not a current
    /// member is discarded and the successor is structurally identical.
    pub fn update(&self, description: ServerDescription) -> TopologyDescription {
        let mut next = self.clone();

        if !self.servers.contains_key(&description.address) {
            return next;
        }

        next.apply(description);
        next.recompute_compatibility();
        next
    }

    // Dispatches the update on the governing topology type.
    fn apply(&mut self, description: ServerDescription) {
        let address = description.address.clone();
        let server_type = description.server_type;

        match self.topology_type {
            // A single topology never re-types; only the entry is replaced.
            TopologyType::Single => {
                self.servers.insert(address, description);
            }
            TopologyType::Unknown => match server_type {
                ServerType::Standalone => self.update_unknown_with_standalone(description),
                ServerType::Mongos => {
                    self.topology_type = TopologyType::Sharded;
                    self.servers.insert(address, description);
                }
                ServerType::RSPrimary => self.update_rs_from_primary(description),
                ServerType::RSSecondary
                | ServerType::RSArbiter
                | ServerType::RSOther
                | ServerType::RSGhost => self.update_rs_from_member(description),
                _ => {
                    self.servers.insert(address, description);
                }
            },
            TopologyType::ReplicaSetNoPrimary | TopologyType::ReplicaSetWithPrimary => {
                match server_type {
                    // A standalone or router cannot be part of the set.
                    ServerType::Standalone | ServerType::Mongos => {
                        self.servers.remove(&address);
                        self.check_if_has_primary();
                    }
                    ServerType::RSPrimary => self.update_rs_from_primary(description),
                    ServerType::RSSecondary
                    | ServerType::RSArbiter
                    | ServerType::RSOther
                    | ServerType::RSGhost => self.update_rs_from_member(description),
                    _ => {
                        self.servers.insert(address, description);
                        self.check_if_has_primary();
                    }
                }
            }
            TopologyType::Sharded => match server_type {
                // Membership is open: any routable node is accepted, with no
                // host-list pruning.
                ServerType::Unknown | ServerType::Mongos => {
                    self.servers.insert(address, description);
                }
                _ => {
                    self.servers.remove(&address);
                }
            },
        }
    }

    // Sets the correct replica set topology type.
    fn check_if_has_primary(&mut self) {
        let has_primary = self
            .servers
            .values()
            .any(|server| server.server_type == ServerType::RSPrimary);

        self.topology_type = if has_primary {
            TopologyType::ReplicaSetWithPrimary
        } else {
            TopologyType::ReplicaSetNoPrimary
        };
    }

    // Updates an unknown topology with a new standalone server description.
    fn update_unknown_with_standalone(&mut self, description: ServerDescription) {
        if self.servers.len() == 1 {
            self.topology_type = TopologyType::Single;
            self.servers.insert(description.address.clone(), description);
        } else {
            // A standalone among multiple seeds cannot be part of the
            // deployment being discovered.
            self.servers.remove(&description.address);
        }
    }

    // Updates a replica set topology with a new primary server description.
    fn update_rs_from_primary(&mut self, description: ServerDescription) {
        let address = description.address.clone();

        if self.set_name.is_empty() {
            self.set_name = description.set_name.clone();
        } else if self.set_name != description.set_name {
            // Primary found, but from the wrong replica set: the member is
            // demoted and can no longer be trusted for primary status.
            self.servers
                .insert(address.clone(), ServerDescription::new(address));
            self.check_if_has_primary();
            return;
        }

        if let (Some(set_version), Some(election_id)) =
            (description.set_version, description.election_id.clone())
        {
            if self.stale_primary_claim(set_version, &election_id) {
                self.servers
                    .insert(address.clone(), ServerDescription::new(address));
                self.check_if_has_primary();
                return;
            }
            self.max_set_version = Some(set_version);
            self.max_election_id = Some(election_id);
        } else if let Some(set_version) = description.set_version {
            if self.max_set_version.map_or(true, |max| set_version > max) {
                self.max_set_version = Some(set_version);
            }
        }

        // Invalidate any old primaries.
        let demoted: Vec<Host> = self
            .servers
            .iter()
            .filter(|&(host, server)| {
                *host != address && server.server_type == ServerType::RSPrimary
            })
            .map(|(host, _)| host.clone())
            .collect();
        for host in demoted {
            self.servers
                .insert(host.clone(), ServerDescription::new(host));
        }

        self.servers.insert(address, description.clone());
        self.sync_members(&description);
        self.check_if_has_primary();
    }

    // Updates a replica set topology with a non-primary member description.
    fn update_rs_from_member(&mut self, description: ServerDescription) {
        let address = description.address.clone();

        if !description.set_name.is_empty() {
            if self.set_name.is_empty() {
                self.set_name = description.set_name.clone();
            } else if self.set_name != description.set_name {
                self.servers
                    .insert(address.clone(), ServerDescription::new(address));
                self.check_if_has_primary();
                return;
            }
        }

        self.servers.insert(address, description.clone());
        self.sync_members(&description);

        // A member's view of the primary seeds discovery before that server
        // has reported in itself.
        if let Some(ref primary) = description.primary {
            let no_primary = !self
                .servers
                .values()
                .any(|server| server.server_type == ServerType::RSPrimary);

            if no_primary {
                let unknown = self
                    .servers
                    .get(primary)
                    .map_or(false, |server| server.server_type == ServerType::Unknown);
                if unknown {
                    let mut hinted = ServerDescription::new(primary.clone());
                    hinted.server_type = ServerType::PossiblePrimary;
                    self.servers.insert(primary.clone(), hinted);
                }
            }
        }

        self.check_if_has_primary();
    }

    // Replaces the membership with the member lists carried by the report:
    // hosts missing from the report are dropped and newly reported hosts
    // join as Unknown until their own heartbeat arrives. Reports without
    // member lists (ghosts, for one) leave the membership alone.
    fn sync_members(&mut self, description: &ServerDescription) {
        if description.hosts.is_empty()
            && description.passives.is_empty()
            && description.arbiters.is_empty()
        {
            return;
        }

        for host in description
            .hosts
            .iter()
            .chain(description.passives.iter())
            .chain(description.arbiters.iter())
        {
            if !self.servers.contains_key(host) {
                self.servers
                    .insert(host.clone(), ServerDescription::new(host.clone()));
            }
        }

        let absent: Vec<Host> = self
            .servers
            .keys()
            .filter(|host| {
                !description.hosts.contains(host)
                    && !description.passives.contains(host)
                    && !description.arbiters.contains(host)
            })
            .cloned()
            .collect();

        for host in absent {
            self.servers.remove(&host);
        }
    }

    // True if the claimed (set version, election id) pair is below the
    // largest pair already observed.
    fn stale_primary_claim(&self, set_version: i64, election_id: &oid::ObjectId) -> bool {
        match (self.max_set_version, self.max_election_id.as_ref()) {
            (Some(max_version), Some(max_id)) => {
                max_version > set_version || (max_version == set_version && max_id > election_id)
            }
            _ => false,
        }
    }

    fn recompute_compatibility(&mut self) {
        self.compatible = true;
        self.compat_error = String::new();

        for (host, server) in self.servers.iter() {
            if server.server_type == ServerType::Mismatch {
                self.compatible = false;
                self.compat_error = format!(
                    "Server at {} is incompatible with driver wire versions [{}, {}].",
                    host, DRIVER_MIN_WIRE_VERSION, DRIVER_MAX_WIRE_VERSION
                );
                break;
            }
        }
    }

    /// Applies the selection predicate over the current member list.
    pub fn choose_servers(&self, predicate: SelectionPredicate) -> Result<Vec<ServerDescription>> {
        let members: Vec<ServerDescription> = self.servers.values().cloned().collect();
        predicate(self, &members)
    }

    /// Trims the candidates down to the latency window: only servers within
    /// `localThresholdMS` of the fastest observed round-trip time survive.
    /// When no candidate has a measurement yet, all of them are kept.
    pub fn filter_latency_servers(&self, servers: &mut Vec<ServerDescription>) {
        let fastest = servers
            .iter()
            .filter_map(|server| server.round_trip_time)
            .min();

        if let Some(fastest) = fastest {
            let cap = fastest + self.options.local_threshold_ms;
            servers.retain(|server| match server.round_trip_time {
                Some(rtt) => rtt <= cap,
                None => false,
            });
        }
    }
}

/// The default selection predicate: every member that has reported in with a
/// usable role. Unknown members, wire-version mismatches and primaries only
/// known by hearsay are not contactable and are left out.
pub fn default_predicate(
    _description: &TopologyDescription,
    members: &[ServerDescription],
) -> Result<Vec<ServerDescription>> {
    Ok(members
        .iter()
        .filter(|member| match member.server_type {
            ServerType::Unknown | ServerType::PossiblePrimary | ServerType::Mismatch => false,
            _ => true,
        })
        .cloned()
        .collect())
}

/// Picks one server uniformly at random from the candidate slice. The random
/// source is injectable so selection can be driven deterministically in tests.
pub fn pick_server<'a, R: Rng>(
    rng: &mut R,
    servers: &'a [ServerDescription],
) -> Option<&'a ServerDescription> {
    if servers.is_empty() {
        return None;
    }
    servers.get(rng.gen_range(0, servers.len()))
}

/// Holds status and monitoring state for a whole deployment. Use through the
/// `Topology` alias and the `ThreadedTopology` trait.
pub struct TopologyInner {
    /// Unique identifier carried on every event published by this topology.
    pub id: oid::ObjectId,
    /// The initial connection configuration.
    pub config: ConnectionString,
    /// Recognized topology configuration.
    pub options: TopologyOptions,
    // The current snapshot. The write half is held only to swap in a
    // replacement; readers clone the Arc and compute without locking.
    description: RwLock<Arc<TopologyDescription>>,
    // Live monitor handles, keyed by address.
    servers: RwLock<HashMap<Host, Server>>,
    // Serializes fold-then-reconcile. Concurrent unsynchronized folds could
    // leave two members marked primary.
    update_lock: Mutex<()>,
    listener: Arc<Listener>,
    runner: Arc<dyn CommandRunner>,
    closed: AtomicBool,
}

/// A threadsafe handle to a monitored topology.
pub type Topology = Arc<TopologyInner>;

pub trait ThreadedTopology: Sized {
    /// Builds a topology over the seed list in `config`. The initial type is
    /// inferred from the seed list shape unless a replica set name forces
    /// `ReplicaSetNoPrimary`. No monitoring starts until `connect`.
    fn with_config(
        config: ConnectionString,
        options: Option<TopologyOptions>,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Topology>;

    /// Starts one monitor per seed and returns without waiting for any
    /// heartbeat to complete.
    fn connect(&self) -> Result<()>;

    /// Selects one eligible server for an operation, retrying against fresh
    /// snapshots until the selection timeout elapses. Resolves to the
    /// existing long-lived handle for the chosen address.
    fn select_server(&self, predicate: Option<SelectionPredicate>) -> Result<Server>;

    /// The sole mutation entry point: folds a monitor-observed description
    /// into the current snapshot, publishes change events and reconciles the
    /// monitor map with the new membership.
    fn on_server_update(&self, description: ServerDescription) -> Result<()>;

    /// Stops all monitors and forbids further mutation. Idempotent.
    fn close(&self) -> Result<()>;
}

impl TopologyInner {
    /// Returns the current topology snapshot.
    pub fn description(&self) -> Result<Arc<TopologyDescription>> {
        Ok(self.description.read()?.clone())
    }

    /// Registers a hook run on every published event.
    pub fn add_event_hook(&self, hook: EventHook) -> Result<()> {
        self.listener.add_hook(hook)
    }

    /// The addresses currently being monitored.
    pub fn addresses(&self) -> Result<Vec<Host>> {
        Ok(self.servers.read()?.keys().cloned().collect())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

// Emits a server opening event and spawns the monitor for a new address.
fn open_server(topology: &Topology, servers: &mut HashMap<Host, Server>, host: &Host) {
    topology.listener.publish(&Event::ServerOpening {
        topology_id: topology.id.clone(),
        address: host.clone(),
    });

    let server = Server::new(
        Arc::downgrade(topology),
        host.clone(),
        topology.runner.clone(),
        topology.listener.clone(),
        topology.options.heartbeat_frequency_ms,
    );
    servers.insert(host.clone(), server);
}

// Aligns the monitor map with the membership of the new snapshot, in both
// directions: dropped members lose their monitor, new members gain one.
fn reconcile(topology: &Topology, current: &TopologyDescription) -> Result<()> {
    let mut servers = topology.servers.write()?;

    let dropped: Vec<Host> = servers
        .keys()
        .filter(|host| !current.servers.contains_key(host))
        .cloned()
        .collect();

    for host in dropped {
        if let Some(server) = servers.remove(&host) {
            server.close();
        }
        topology.listener.publish(&Event::ServerClosed {
            topology_id: topology.id.clone(),
            address: host,
        });
    }

    for host in current.servers.keys() {
        if !servers.contains_key(host) {
            open_server(topology, &mut servers, host);
        }
    }

    Ok(())
}

impl ThreadedTopology for Topology {
    fn with_config(
        config: ConnectionString,
        options: Option<TopologyOptions>,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Topology> {
        if config.hosts.is_empty() {
            return Err(ArgumentError(
                "At least one seed host is required.".to_owned(),
            ));
        }

        let options = match options {
            Some(options) => options,
            None => TopologyOptions::from_connection_string(&config)?,
        };

        let mut description = TopologyDescription::new(options.clone());

        if let Some(ref name) = options.replica_set {
            description.topology_type = TopologyType::ReplicaSetNoPrimary;
            description.set_name = name.to_owned();
        } else if config.hosts.len() == 1 {
            description.topology_type = TopologyType::Single;
        }

        for host in config.hosts.iter() {
            description
                .servers
                .insert(host.clone(), ServerDescription::new(host.clone()));
        }

        Ok(Arc::new(TopologyInner {
            id: oid::ObjectId::new()?,
            config: config,
            options: options,
            description: RwLock::new(Arc::new(description)),
            servers: RwLock::new(HashMap::new()),
            update_lock: Mutex::new(()),
            listener: Arc::new(Listener::new()),
            runner: runner,
            closed: AtomicBool::new(false),
        }))
    }

    fn connect(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(OperationError("The topology has been closed.".to_owned()));
        }

        let current = self.description()?;

        self.listener.publish(&Event::TopologyOpening {
            topology_id: self.id.clone(),
        });

        // The first change event starts from a synthetic unknown snapshot.
        let initial = Arc::new(TopologyDescription::new(self.options.clone()));
        self.listener.publish(&Event::TopologyDescriptionChanged {
            topology_id: self.id.clone(),
            previous: initial,
            current: current.clone(),
        });

        let mut servers = self.servers.write()?;
        for host in current.servers.keys() {
            if !servers.contains_key(host) {
                open_server(self, &mut servers, host);
            }
        }

        Ok(())
    }

    fn select_server(&self, predicate: Option<SelectionPredicate>) -> Result<Server> {
        let predicate = predicate.unwrap_or(default_predicate);
        let timeout = self.options.server_selection_timeout_ms;
        let start_time = timestamp_ms();

        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(OperationError("The topology has been closed.".to_owned()));
            }

            let description = self.description()?;

            if !description.is_compatible() {
                return Err(OperationError(description.compat_error.clone()));
            }

            let mut candidates = description.choose_servers(predicate)?;
            description.filter_latency_servers(&mut candidates);

            if !candidates.is_empty() {
                let choice = {
                    let mut rng = thread_rng();
                    match pick_server(&mut rng, &candidates) {
                        Some(chosen) => chosen.address.clone(),
                        None => unreachable!(),
                    }
                };

                let servers = self.servers.read()?;
                if let Some(server) = servers.get(&choice) {
                    return Ok(server.clone());
                }
                // The chosen address lost its monitor after the snapshot was
                // taken; fall through and retry against a fresh one.
            }

            let elapsed = timestamp_ms() - start_time;
            if elapsed >= timeout {
                return Err(Error::SelectionTimeoutError(SelectionTimeoutError {
                    elapsed_ms: elapsed,
                    timeout_ms: timeout,
                }));
            }

            // Ask every monitor for an immediate check rather than waiting
            // out a full heartbeat interval.
            {
                let servers = self.servers.read()?;
                for server in servers.values() {
                    server.request_update();
                }
            }

            let wait = cmp::min(SELECTION_RETRY_DELAY_MS, timeout - elapsed);
            thread::sleep(Duration::from_millis(wait as u64));
        }
    }

    fn on_server_update(&self, description: ServerDescription) -> Result<()> {
        let _guard = self.update_lock.lock()?;

        if self.closed.load(Ordering::SeqCst) {
            return Ok(());
        }

        let previous = self.description()?;

        let previous_server = match previous.servers.get(&description.address) {
            Some(server) => server.clone(),
            // A racing removal already dropped this address; the update is
            // stale and silently discarded.
            None => return Ok(()),
        };

        let address = description.address.clone();
        let unchanged = previous_server == description;
        let current = Arc::new(previous.update(description.clone()));

        {
            let mut slot = self.description.write()?;
            *slot = current.clone();
        }

        // An identical observation still refreshes the snapshot (round-trip
        // times move), but produces no events and no membership changes.
        if unchanged {
            return Ok(());
        }

        let current_server = match current.servers.get(&address) {
            Some(server) => server.clone(),
            None => description,
        };

        self.listener.publish(&Event::ServerDescriptionChanged {
            topology_id: self.id.clone(),
            address: address,
            previous: previous_server,
            current: current_server,
        });

        reconcile(self, &current)?;

        self.listener.publish(&Event::TopologyDescriptionChanged {
            topology_id: self.id.clone(),
            previous: previous,
            current: current,
        });

        Ok(())
    }

    fn close(&self) -> Result<()> {
        let _guard = self.update_lock.lock()?;

        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut servers = self.servers.write()?;
        for (host, server) in servers.drain() {
            server.close();
            self.listener.publish(&Event::ServerClosed {
                topology_id: self.id.clone(),
                address: host,
            });
        }

        self.listener.publish(&Event::TopologyClosed {
            topology_id: self.id.clone(),
        });

        Ok(())
    }
}
