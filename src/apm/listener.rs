use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use apm::event::Event;
use error::Result;

pub type EventHook = fn(&Event);

/// Holds the hooks notified on every published topology event.
pub struct Listener {
    no_hooks: AtomicBool,
    hooks: RwLock<Vec<EventHook>>,
}

impl Listener {
    pub fn new() -> Listener {
        Listener {
            no_hooks: AtomicBool::new(true),
            hooks: RwLock::new(Vec::new()),
        }
    }

    pub fn add_hook(&self, hook: EventHook) -> Result<()> {
        let mut guard = self.hooks.write()?;
        self.no_hooks.store(false, Ordering::SeqCst);
        guard.push(hook);
        Ok(())
    }

    /// Runs every registered hook against the event, in registration order.
    pub fn publish(&self, event: &Event) {
        if self.no_hooks.load(Ordering::SeqCst) {
            return;
        }

        if let Ok(guard) = self.hooks.read() {
            for hook in guard.iter() {
                hook(event);
            }
        }
    }
}
