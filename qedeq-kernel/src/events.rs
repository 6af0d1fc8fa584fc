//! Registry events and observers

use crate::state::StateChange;
use parking_lot::RwLock;
use qedeq_logic::ModuleAddress;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Something that happened in the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistryEvent {
    ModuleCreated {
        address: ModuleAddress,
    },
    StateChanged {
        address: ModuleAddress,
        change: StateChange,
    },
    ModuleRemoved {
        address: ModuleAddress,
    },
    Cleared,
    Halted {
        reason: String,
    },
}

impl RegistryEvent {
    pub fn address(&self) -> Option<&ModuleAddress> {
        match self {
            RegistryEvent::ModuleCreated { address }
            | RegistryEvent::StateChanged { address, .. }
            | RegistryEvent::ModuleRemoved { address } => Some(address),
            RegistryEvent::Cleared | RegistryEvent::Halted { .. } => None,
        }
    }
}

/// Receives registry events
///
/// Observers are called after the module lock is released, possibly from
/// several processes at once.
pub trait RegistryObserver: Send + Sync {
    /// Called when a module is created on first reference
    fn on_module_created(&self, _address: &ModuleAddress) {}

    /// Called after every state transition
    fn on_state_changed(&self, _address: &ModuleAddress, _change: &StateChange) {}

    /// Called when a module is unregistered
    fn on_module_removed(&self, _address: &ModuleAddress) {}

    /// Called when the registry is emptied
    fn on_cleared(&self) {}

    /// Called when an invariant violation halts the registry
    fn on_halted(&self, _reason: &str) {}
}

/// Observer writing every event to `tracing`
#[derive(Debug, Default)]
pub struct TracingObserver;

impl RegistryObserver for TracingObserver {
    fn on_module_created(&self, address: &ModuleAddress) {
        debug!(%address, "module created");
    }

    fn on_state_changed(&self, address: &ModuleAddress, change: &StateChange) {
        debug!(%address, %change, "state changed");
    }

    fn on_module_removed(&self, address: &ModuleAddress) {
        info!(%address, "module removed");
    }

    fn on_cleared(&self) {
        info!("registry cleared");
    }

    fn on_halted(&self, reason: &str) {
        error!(reason, "registry halted");
    }
}

/// Observer keeping every event, for tests and tools
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: parking_lot::Mutex<Vec<RegistryEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RegistryEvent> {
        self.events.lock().clone()
    }

    /// State changes recorded for `address`, in order
    pub fn changes_of(&self, address: &ModuleAddress) -> Vec<StateChange> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                RegistryEvent::StateChanged { address: a, change } if a == address => {
                    Some(*change)
                }
                _ => None,
            })
            .collect()
    }

    fn record(&self, event: RegistryEvent) {
        self.events.lock().push(event);
    }
}

impl RegistryObserver for RecordingObserver {
    fn on_module_created(&self, address: &ModuleAddress) {
        self.record(RegistryEvent::ModuleCreated {
            address: address.clone(),
        });
    }

    fn on_state_changed(&self, address: &ModuleAddress, change: &StateChange) {
        self.record(RegistryEvent::StateChanged {
            address: address.clone(),
            change: *change,
        });
    }

    fn on_module_removed(&self, address: &ModuleAddress) {
        self.record(RegistryEvent::ModuleRemoved {
            address: address.clone(),
        });
    }

    fn on_cleared(&self) {
        self.record(RegistryEvent::Cleared);
    }

    fn on_halted(&self, reason: &str) {
        self.record(RegistryEvent::Halted {
            reason: reason.to_string(),
        });
    }
}

/// Registered observers
#[derive(Default)]
pub struct Observers {
    observers: RwLock<Vec<Arc<dyn RegistryObserver>>>,
}

impl Observers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, observer: Arc<dyn RegistryObserver>) {
        self.observers.write().push(observer);
    }

    pub fn len(&self) -> usize {
        self.observers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.read().is_empty()
    }

    /// Deliver `event`; must not be called with a module lock held
    pub fn emit(&self, event: &RegistryEvent) {
        // Snapshot so observers may register further observers
        let observers = self.observers.read().clone();
        for observer in observers {
            match event {
                RegistryEvent::ModuleCreated { address } => observer.on_module_created(address),
                RegistryEvent::StateChanged { address, change } => {
                    observer.on_state_changed(address, change)
                }
                RegistryEvent::ModuleRemoved { address } => observer.on_module_removed(address),
                RegistryEvent::Cleared => observer.on_cleared(),
                RegistryEvent::Halted { reason } => observer.on_halted(reason),
            }
        }
    }

    pub fn emit_all(&self, events: impl IntoIterator<Item = RegistryEvent>) {
        for event in events {
            self.emit(&event);
        }
    }
}

impl std::fmt::Debug for Observers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observers")
            .field("count", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::LoadingState;

    #[test]
    fn test_recording_observer() {
        let observers = Observers::new();
        let recorder = Arc::new(RecordingObserver::new());
        observers.add(recorder.clone());
        observers.add(Arc::new(TracingObserver));

        let address = ModuleAddress::new("m.xml").unwrap();
        let change = StateChange::Loading {
            from: LoadingState::Undefined,
            to: LoadingState::Loading,
        };
        observers.emit_all([
            RegistryEvent::ModuleCreated {
                address: address.clone(),
            },
            RegistryEvent::StateChanged {
                address: address.clone(),
                change,
            },
        ]);

        assert_eq!(recorder.events().len(), 2);
        assert_eq!(recorder.changes_of(&address), vec![change]);
        assert_eq!(recorder.events()[0].address(), Some(&address));
    }
}
