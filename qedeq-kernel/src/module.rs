//! Module entity
//!
//! One [`Module`] exists per address. Its mutable data sits behind a
//! `parking_lot::Mutex` that is only held for short, non-recursive sections;
//! all writes go through a [`ModuleWriter`], which checks transitions
//! against the state tables and queues a [`RegistryEvent`] for each change.
//! The queued events are delivered once the lock is released.

use crate::diagnostics::{Diagnostic, DiagnosticList};
use crate::events::{Observers, RegistryEvent};
use crate::service::ServiceKind;
use crate::state::{
    DependencyState, LoadingState, LogicState, ModuleState, ResetReason, StateChange, StateError,
};
use parking_lot::{Mutex, MutexGuard};
use qedeq_logic::{ModuleAddress, ModuleDocument};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Labeled edge to a required module
#[derive(Clone)]
pub struct ModuleReference {
    pub label: String,
    pub module: Arc<Module>,
}

impl ModuleReference {
    pub fn address(&self) -> &ModuleAddress {
        self.module.address()
    }
}

impl fmt::Debug for ModuleReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.label, self.module.address())
    }
}

#[derive(Debug, Default)]
pub struct ModuleData {
    document: Option<Arc<ModuleDocument>>,
    state: ModuleState,
    required: Vec<ModuleReference>,
    // one entry per incoming edge
    dependents: Vec<ModuleAddress>,
    errors: HashMap<ServiceKind, DiagnosticList>,
    warnings: HashMap<ServiceKind, DiagnosticList>,
    // registry epoch of the last terminal write per axis
    loading_epoch: u64,
    dependency_epoch: u64,
    load_failure: Option<String>,
}

pub struct Module {
    address: ModuleAddress,
    data: Mutex<ModuleData>,
}

impl Module {
    pub(crate) fn new(address: ModuleAddress) -> Self {
        Self {
            address,
            data: Mutex::new(ModuleData::default()),
        }
    }

    pub fn address(&self) -> &ModuleAddress {
        &self.address
    }

    pub fn state(&self) -> ModuleState {
        self.data.lock().state
    }

    pub fn loading_state(&self) -> LoadingState {
        self.state().loading
    }

    pub fn dependency_state(&self) -> DependencyState {
        self.state().dependency
    }

    pub fn logic_state(&self) -> LogicState {
        self.state().logic
    }

    pub fn document(&self) -> Option<Arc<ModuleDocument>> {
        self.data.lock().document.clone()
    }

    pub fn required(&self) -> Vec<ModuleReference> {
        self.data.lock().required.clone()
    }

    pub fn dependents(&self) -> Vec<ModuleAddress> {
        self.data.lock().dependents.clone()
    }

    pub fn errors(&self, service: ServiceKind) -> DiagnosticList {
        self.data
            .lock()
            .errors
            .get(&service)
            .cloned()
            .unwrap_or_default()
    }

    pub fn warnings(&self, service: ServiceKind) -> DiagnosticList {
        self.data
            .lock()
            .warnings
            .get(&service)
            .cloned()
            .unwrap_or_default()
    }

    /// Errors of all services, in service order
    pub fn all_errors(&self) -> DiagnosticList {
        let data = self.data.lock();
        ServiceKind::ALL
            .iter()
            .filter_map(|service| data.errors.get(service))
            .flat_map(|list| list.iter().cloned())
            .collect()
    }

    /// Detach the outgoing edges, leaving everything else in place
    pub(crate) fn take_required(&self) -> Vec<ModuleReference> {
        std::mem::take(&mut self.data.lock().required)
    }

    pub(crate) fn try_lock(&self) -> Option<MutexGuard<'_, ModuleData>> {
        self.data.try_lock()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ModuleData> {
        self.data.lock()
    }

    /// Run `f` on the locked data, then deliver the queued events
    pub(crate) fn update_locked<R>(
        &self,
        mut guard: MutexGuard<'_, ModuleData>,
        observers: &Observers,
        f: impl FnOnce(&mut ModuleWriter<'_>) -> R,
    ) -> R {
        let mut writer = ModuleWriter {
            address: &self.address,
            data: &mut *guard,
            events: Vec::new(),
        };
        let result = f(&mut writer);
        let events = std::mem::take(&mut writer.events);
        drop(guard);
        observers.emit_all(events);
        result
    }

    pub(crate) fn update<R>(
        &self,
        observers: &Observers,
        f: impl FnOnce(&mut ModuleWriter<'_>) -> R,
    ) -> R {
        self.update_locked(self.data.lock(), observers, f)
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("address", &self.address)
            .field("state", &self.state())
            .finish()
    }
}

/// Write access to locked module data
pub struct ModuleWriter<'a> {
    address: &'a ModuleAddress,
    data: &'a mut ModuleData,
    events: Vec<RegistryEvent>,
}

impl ModuleWriter<'_> {
    pub fn address(&self) -> &ModuleAddress {
        self.address
    }

    pub fn state(&self) -> ModuleState {
        self.data.state
    }

    pub fn document(&self) -> Option<Arc<ModuleDocument>> {
        self.data.document.clone()
    }

    pub fn required(&self) -> &[ModuleReference] {
        &self.data.required
    }

    pub fn dependents(&self) -> &[ModuleAddress] {
        &self.data.dependents
    }

    pub fn loading_epoch(&self) -> u64 {
        self.data.loading_epoch
    }

    pub fn dependency_epoch(&self) -> u64 {
        self.data.dependency_epoch
    }

    pub fn stamp_loading(&mut self, epoch: u64) {
        self.data.loading_epoch = epoch;
    }

    pub fn stamp_dependency(&mut self, epoch: u64) {
        self.data.dependency_epoch = epoch;
    }

    fn changed(&mut self, change: StateChange) {
        self.events.push(RegistryEvent::StateChanged {
            address: self.address.clone(),
            change,
        });
    }

    fn illegal(&self, change: StateChange) -> StateError {
        StateError::IllegalTransition {
            address: self.address.clone(),
            change,
        }
    }

    pub fn set_loading(&mut self, next: LoadingState) -> Result<(), StateError> {
        let from = self.data.state.loading;
        let change = StateChange::Loading { from, to: next };
        if !from.can_transition_to(next) {
            return Err(self.illegal(change));
        }
        self.data.state.loading = next;
        if next == LoadingState::Undefined {
            self.data.document = None;
            self.data.load_failure = None;
            self.data.errors.remove(&ServiceKind::LoadModule);
        }
        self.changed(change);
        Ok(())
    }

    /// Reason of the last failed load
    pub fn load_failure(&self) -> Option<&str> {
        self.data.load_failure.as_deref()
    }

    pub fn set_load_failure(&mut self, message: String) {
        self.data.load_failure = Some(message);
    }

    pub fn set_document(&mut self, document: Arc<ModuleDocument>) {
        self.data.document = Some(document);
    }

    pub fn set_dependency(&mut self, next: DependencyState) -> Result<(), StateError> {
        let from = self.data.state.dependency;
        let change = StateChange::Dependency { from, to: next };
        if !from.can_transition_to(next) {
            return Err(self.illegal(change));
        }
        self.data.state.dependency = next;
        self.changed(change);
        Ok(())
    }

    /// Send the dependency axis back to `Undefined`
    ///
    /// Outgoing edges are returned to the caller, which must remove the
    /// matching back-references from the targets.
    pub fn reset_dependency(
        &mut self,
        reason: ResetReason,
    ) -> Result<Vec<ModuleReference>, StateError> {
        let from = self.data.state.dependency;
        if !from.can_reset(reason) {
            return Err(StateError::IllegalReset {
                address: self.address.clone(),
                state: from,
                reason,
            });
        }
        self.data.state.dependency = DependencyState::Undefined;
        self.data.errors.remove(&ServiceKind::LoadRequiredModules);
        self.changed(StateChange::Dependency {
            from,
            to: DependencyState::Undefined,
        });
        Ok(std::mem::take(&mut self.data.required))
    }

    pub fn set_logic(&mut self, next: LogicState) -> Result<(), StateError> {
        let from = self.data.state.logic;
        let change = StateChange::Logic { from, to: next };
        if !from.can_transition_to(next) {
            return Err(self.illegal(change));
        }
        self.data.state.logic = next;
        if next == LogicState::Unchecked {
            self.data.errors.remove(&ServiceKind::WellFormedCheck);
            self.data.warnings.remove(&ServiceKind::WellFormedCheck);
        }
        self.changed(change);
        Ok(())
    }

    pub fn add_required(&mut self, label: impl Into<String>, module: Arc<Module>) {
        self.data.required.push(ModuleReference {
            label: label.into(),
            module,
        });
    }

    /// Drop every edge to `address`, returning how many there were
    pub fn remove_required_to(&mut self, address: &ModuleAddress) -> usize {
        let before = self.data.required.len();
        self.data.required.retain(|r| r.address() != address);
        before - self.data.required.len()
    }

    pub fn add_dependent(&mut self, address: ModuleAddress) {
        self.data.dependents.push(address);
    }

    /// Remove one back-reference from `address`
    pub fn remove_dependent(&mut self, address: &ModuleAddress) -> bool {
        match self.data.dependents.iter().position(|a| a == address) {
            Some(index) => {
                self.data.dependents.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn remove_all_dependents(&mut self, address: &ModuleAddress) -> usize {
        let before = self.data.dependents.len();
        self.data.dependents.retain(|a| a != address);
        before - self.data.dependents.len()
    }

    pub fn set_errors(&mut self, service: ServiceKind, errors: DiagnosticList) {
        if errors.is_empty() {
            self.data.errors.remove(&service);
        } else {
            self.data.errors.insert(service, errors);
        }
    }

    pub fn add_error(&mut self, service: ServiceKind, diagnostic: Diagnostic) {
        self.data.errors.entry(service).or_default().push(diagnostic);
    }

    pub fn set_warnings(&mut self, service: ServiceKind, warnings: DiagnosticList) {
        if warnings.is_empty() {
            self.data.warnings.remove(&service);
        } else {
            self.data.warnings.insert(service, warnings);
        }
    }

    /// Drop everything, including edges; used when the module is discarded
    pub(crate) fn discard(&mut self) -> Vec<ModuleReference> {
        self.data.document = None;
        self.data.dependents.clear();
        self.data.errors.clear();
        self.data.warnings.clear();
        std::mem::take(&mut self.data.required)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RecordingObserver;

    fn module(address: &str) -> Module {
        Module::new(ModuleAddress::new(address).unwrap())
    }

    #[test]
    fn test_transitions_emit_after_unlock() {
        let observers = Observers::new();
        let recorder = Arc::new(RecordingObserver::new());
        observers.add(recorder.clone());

        let m = module("a.xml");
        m.update(&observers, |w| {
            w.set_loading(LoadingState::Loading)?;
            w.set_loading(LoadingState::Loaded)
        })
        .unwrap();

        assert_eq!(m.loading_state(), LoadingState::Loaded);
        assert_eq!(recorder.changes_of(m.address()).len(), 2);
    }

    #[test]
    fn test_illegal_transition_keeps_state() {
        let observers = Observers::new();
        let m = module("a.xml");
        let result = m.update(&observers, |w| w.set_dependency(DependencyState::RequiredLoaded));
        assert!(matches!(result, Err(StateError::IllegalTransition { .. })));
        assert_eq!(m.dependency_state(), DependencyState::Undefined);
    }

    #[test]
    fn test_dependents_are_a_multiset() {
        let observers = Observers::new();
        let m = module("b.xml");
        let a = ModuleAddress::new("a.xml").unwrap();
        m.update(&observers, |w| {
            w.add_dependent(a.clone());
            w.add_dependent(a.clone());
            assert!(w.remove_dependent(&a));
        });
        assert_eq!(m.dependents(), vec![a]);
    }

    #[test]
    fn test_reset_clears_dependency_errors() {
        let observers = Observers::new();
        let m = module("a.xml");
        let target = Arc::new(module("b.xml"));
        m.update(&observers, |w| -> Result<(), StateError> {
            w.set_dependency(DependencyState::LoadingImports)?;
            w.set_dependency(DependencyState::ImportsFailed)?;
            w.add_required("b", target.clone());
            w.add_error(
                ServiceKind::LoadRequiredModules,
                Diagnostic::new(
                    crate::diagnostics::KernelErrorCode::ImportUnreachable,
                    "b",
                    qedeq_logic::ModuleContext::new(w.address().clone()),
                ),
            );
            let edges = w.reset_dependency(ResetReason::Retry)?;
            assert_eq!(edges.len(), 1);
            Ok(())
        })
        .unwrap();
        assert!(m.errors(ServiceKind::LoadRequiredModules).is_empty());
        assert!(m.required().is_empty());
    }
}
