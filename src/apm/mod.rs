//! Topology Monitoring
//!
//! The APM module provides an interface for monitoring and responding to
//! runtime information about the topology and its servers. Every lifecycle
//! transition - servers opening and closing, description changes, heartbeat
//! attempts - triggers the hooks registered on the topology's listener,
//! strictly after the corresponding state change has been committed.
mod event;
mod listener;

pub use self::event::Event;
pub use self::listener::{EventHook, Listener};
