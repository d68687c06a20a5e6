//! Connection target types produced by an external connection-string parser.
use error::Error::ArgumentError;
use error::Result;

use std::collections::BTreeMap;
use std::fmt;

pub const DEFAULT_PORT: u16 = 27017;

/// Encapsulates the hostname and port of a server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Host {
    pub host_name: String,
    pub port: u16,
}

impl Host {
    /// Creates a new Host struct.
    pub fn new(host_name: String, port: u16) -> Host {
        Host {
            host_name: host_name,
            port: port,
        }
    }
}

impl fmt::Display for Host {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}:{}", self.host_name, self.port)
    }
}

/// Parses a `host` or `host:port` entity into a Host.
pub fn parse_host(entity: &str) -> Result<Host> {
    if entity.is_empty() {
        return Err(ArgumentError("Host entities cannot be empty.".to_owned()));
    }

    match entity.find(':') {
        Some(index) => {
            let host_name = &entity[..index];
            match entity[index + 1..].parse::<u16>() {
                Ok(port) => Ok(Host::new(host_name.to_ascii_lowercase(), port)),
                Err(_) => Err(ArgumentError("Port must be an unsigned integer.".to_owned())),
            }
        }
        None => Ok(Host::new(entity.to_ascii_lowercase(), DEFAULT_PORT)),
    }
}

/// Encapsulates the options of a MongoDB connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionOptions {
    pub options: BTreeMap<String, String>,
}

impl ConnectionOptions {
    /// Creates a new ConnectionOptions struct.
    pub fn new(options: BTreeMap<String, String>) -> ConnectionOptions {
        ConnectionOptions { options: options }
    }

    // Helper method to retrieve an option from the map.
    pub fn get(&self, key: &str) -> Option<&String> {
        self.options.get(key)
    }
}

/// The parsed form of a connection string. Parsing itself is an external
/// collaborator; the topology consumes only this shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionString {
    pub hosts: Vec<Host>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    pub options: Option<ConnectionOptions>,
}

impl ConnectionString {
    /// Creates a new ConnectionString for a single, unreplicated host.
    pub fn new(host_name: &str, port: u16) -> ConnectionString {
        ConnectionString::with_host(Host::new(host_name.to_owned(), port))
    }

    /// Creates a new ConnectionString for a single Host.
    pub fn with_host(host: Host) -> ConnectionString {
        ConnectionString::with_hosts(vec![host])
    }

    /// Creates a new ConnectionString over a seed list.
    pub fn with_hosts(hosts: Vec<Host>) -> ConnectionString {
        ConnectionString {
            hosts: hosts,
            user: None,
            password: None,
            database: None,
            options: None,
        }
    }
}
