//! Module registry
//!
//! The registry is the one place where modules live: one [`Module`] per
//! address, created lazily on first reference. It owns the loader, the
//! observers and the process manager, and it guards the dependency graph.
//! Edge writes hold the graph lock shared and touch one module at a time;
//! unregistration, `clear` and the symmetry check hold it exclusively. A
//! failed symmetry check halts the registry for good.

use crate::config::KernelConfig;
use crate::events::{Observers, RegistryEvent, RegistryObserver, TracingObserver};
use crate::loader::ModuleLoader;
use crate::module::{Module, ModuleReference};
use crate::resolver::{DependencyResolver, ResolveError};
use crate::service::{
    CallContext, ProcessSnapshot, ServiceProcess, ServiceProcessManager, ServiceResult,
};
use crate::state::{LogicState, ResetReason};
use crate::wellformed::{WellFormedError, WellFormedService};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use qedeq_logic::ModuleAddress;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("registry halted: {reason}")]
    Halted { reason: String },

    #[error("dependency graph asymmetric between {from} and {to}: {message}")]
    SymmetryViolated {
        from: ModuleAddress,
        to: ModuleAddress,
        message: String,
    },
}

pub struct ModuleRegistry {
    config: KernelConfig,
    loader: Arc<dyn ModuleLoader>,
    modules: DashMap<ModuleAddress, Arc<Module>>,
    graph: RwLock<()>,
    halted: AtomicBool,
    halt_reason: Mutex<Option<String>>,
    epoch: AtomicU64,
    observers: Observers,
    processes: ServiceProcessManager,
}

impl ModuleRegistry {
    pub fn new(config: KernelConfig, loader: Arc<dyn ModuleLoader>) -> Self {
        let observers = Observers::new();
        observers.add(Arc::new(TracingObserver));
        Self {
            config,
            loader,
            modules: DashMap::new(),
            graph: RwLock::new(()),
            halted: AtomicBool::new(false),
            halt_reason: Mutex::new(None),
            epoch: AtomicU64::new(0),
            observers,
            processes: ServiceProcessManager::new(),
        }
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn loader(&self) -> &dyn ModuleLoader {
        self.loader.as_ref()
    }

    pub fn processes(&self) -> &ServiceProcessManager {
        &self.processes
    }

    pub fn observers(&self) -> &Observers {
        &self.observers
    }

    pub fn add_observer(&self, observer: Arc<dyn RegistryObserver>) {
        self.observers.add(observer);
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    fn ensure_running(&self) -> Result<(), RegistryError> {
        if self.is_halted() {
            let reason = self
                .halt_reason
                .lock()
                .clone()
                .unwrap_or_else(|| "unknown".to_string());
            return Err(RegistryError::Halted { reason });
        }
        Ok(())
    }

    fn halt(&self, reason: String) {
        error!(%reason, "halting module registry");
        self.halt_reason.lock().get_or_insert_with(|| reason.clone());
        self.halted.store(true, Ordering::SeqCst);
        self.processes.interrupt_all();
        self.observers.emit(&RegistryEvent::Halted { reason });
    }

    pub(crate) fn next_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Module for `address`, created if missing
    pub fn get_or_create(&self, address: &ModuleAddress) -> Result<Arc<Module>, RegistryError> {
        self.ensure_running()?;
        Ok(self.module_entry(address))
    }

    pub(crate) fn module_entry(&self, address: &ModuleAddress) -> Arc<Module> {
        let (module, created) = match self.modules.entry(address.clone()) {
            Entry::Occupied(entry) => (entry.get().clone(), false),
            Entry::Vacant(entry) => {
                let module = Arc::new(Module::new(address.clone()));
                entry.insert(module.clone());
                (module, true)
            }
        };
        if created {
            self.observers.emit(&RegistryEvent::ModuleCreated {
                address: address.clone(),
            });
        }
        module
    }

    pub fn get(&self, address: &ModuleAddress) -> Option<Arc<Module>> {
        self.modules.get(address).map(|entry| entry.value().clone())
    }

    /// All registered modules, sorted by address
    pub fn modules(&self) -> Vec<Arc<Module>> {
        let mut modules: Vec<_> = self
            .modules
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        modules.sort_by(|a, b| a.address().cmp(b.address()));
        modules
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Run `f` as one edge write
    pub(crate) fn edit_graph<R>(&self, f: impl FnOnce() -> R) -> R {
        let _graph = self.graph.read();
        f()
    }

    /// Record the edge `from -> to`; false if either end was unregistered meanwhile
    pub(crate) fn add_edge(
        &self,
        ctx: &CallContext<'_>,
        from: &Arc<Module>,
        label: &str,
        to: &Arc<Module>,
    ) -> bool {
        self.edit_graph(|| {
            if !self.is_registered(from) || !self.is_registered(to) {
                debug!(
                    from = %from.address(),
                    to = %to.address(),
                    "edge to unregistered module dropped"
                );
                return false;
            }
            ctx.update(from, |w| w.add_required(label, to.clone()));
            ctx.update(to, |w| w.add_dependent(from.address().clone()));
            true
        })
    }

    pub(crate) fn is_registered(&self, module: &Arc<Module>) -> bool {
        self.get(module.address())
            .map_or(false, |registered| Arc::ptr_eq(&registered, module))
    }

    /// Remove the back-references matching `edges`; call inside [`edit_graph`](Self::edit_graph)
    pub(crate) fn unlink(&self, ctx: &CallContext<'_>, from: &ModuleAddress, edges: Vec<ModuleReference>) {
        for edge in edges {
            ctx.update(&edge.module, |w| {
                if !w.remove_dependent(from) {
                    warn!(%from, to = %w.address(), "back-reference already gone");
                }
            });
        }
    }

    /// Unregister a module, invalidating everything that depends on it
    pub fn remove(&self, address: &ModuleAddress) -> Result<bool, RegistryError> {
        self.ensure_running()?;
        let dependents = {
            // unregistering and unlinking is one step for the symmetry check
            let _graph = self.graph.write();
            let Some((_, module)) = self.modules.remove(address) else {
                return Ok(false);
            };
            let (edges, dependents) = module.update(&self.observers, |w| {
                let dependents = w.dependents().to_vec();
                (w.discard(), dependents)
            });
            for edge in edges {
                edge.module
                    .update(&self.observers, |w| w.remove_all_dependents(address));
            }
            for dependent in &dependents {
                if let Some(dependent) = self.get(dependent) {
                    dependent.update(&self.observers, |w| w.remove_required_to(address));
                }
            }
            dependents
        };
        self.observers.emit(&RegistryEvent::ModuleRemoved {
            address: address.clone(),
        });

        let invalidated = self.invalidate(dependents);
        info!(%address, invalidated, "module removed");
        Ok(true)
    }

    /// Reset the given modules and, transitively, their dependents
    fn invalidate(&self, start: Vec<ModuleAddress>) -> usize {
        let mut queue = start;
        let mut seen = HashSet::new();
        while let Some(address) = queue.pop() {
            if !seen.insert(address.clone()) {
                continue;
            }
            let Some(module) = self.get(&address) else {
                continue;
            };
            let dependents = self.edit_graph(|| {
                let reset = module.update(&self.observers, |w| {
                    let state = w.state();
                    if !state.dependency.can_reset(ResetReason::Invalidated) {
                        return None;
                    }
                    let edges = w.reset_dependency(ResetReason::Invalidated).ok()?;
                    if matches!(
                        state.logic,
                        LogicState::WellFormed
                            | LogicState::NotWellFormed
                            | LogicState::ExternalCheckingFailed
                    ) {
                        if let Err(error) = w.set_logic(LogicState::Unchecked) {
                            warn!(%error, "logic reset rejected");
                        }
                    }
                    Some((edges, w.dependents().to_vec()))
                });
                let (edges, dependents) = reset?;
                for edge in edges {
                    edge.module
                        .update(&self.observers, |w| w.remove_dependent(&address));
                }
                Some(dependents)
            });
            if let Some(dependents) = dependents {
                queue.extend(dependents);
            }
        }
        seen.len()
    }

    /// Forget every module
    pub fn clear(&self) {
        let _graph = self.graph.write();
        let modules = self.modules();
        self.modules.clear();
        for module in modules {
            // drop edges so that cycles of Arcs go away
            module.update(&self.observers, |w| drop(w.discard()));
        }
        self.observers.emit(&RegistryEvent::Cleared);
    }

    /// Interrupt running processes and forget every module
    pub fn shutdown(&self) {
        let interrupted = self.processes.interrupt_all();
        info!(interrupted, "shutting down module registry");
        self.clear();
    }

    /// Verify that every edge has its back-reference and vice versa
    pub fn check_dependency_symmetry(&self) -> Result<(), RegistryError> {
        self.ensure_running()?;
        let result = {
            let _graph = self.graph.write();
            self.find_asymmetry()
        };
        if let Err(error) = &result {
            self.halt(error.to_string());
        }
        result
    }

    fn find_asymmetry(&self) -> Result<(), RegistryError> {
        let modules = self.modules();
        for module in &modules {
            let mut counts: HashMap<&ModuleAddress, usize> = HashMap::new();
            let required = module.required();
            for edge in &required {
                *counts.entry(edge.address()).or_insert(0) += 1;
                if !self.is_registered(&edge.module) {
                    return Err(RegistryError::SymmetryViolated {
                        from: module.address().clone(),
                        to: edge.address().clone(),
                        message: format!("edge `{}` points to an unregistered module", edge.label),
                    });
                }
            }
            for (target, count) in counts {
                let back = self
                    .get(target)
                    .map(|target| {
                        target
                            .dependents()
                            .iter()
                            .filter(|a| *a == module.address())
                            .count()
                    })
                    .unwrap_or(0);
                if back != count {
                    return Err(RegistryError::SymmetryViolated {
                        from: module.address().clone(),
                        to: target.clone(),
                        message: format!("{count} edges but {back} back-references"),
                    });
                }
            }
        }

        for module in &modules {
            let mut counts: HashMap<ModuleAddress, usize> = HashMap::new();
            for dependent in module.dependents() {
                *counts.entry(dependent).or_insert(0) += 1;
            }
            for (dependent, count) in counts {
                let forward = self
                    .get(&dependent)
                    .map(|dependent| {
                        dependent
                            .required()
                            .iter()
                            .filter(|edge| edge.address() == module.address())
                            .count()
                    })
                    .unwrap_or(0);
                if forward != count {
                    return Err(RegistryError::SymmetryViolated {
                        from: dependent,
                        to: module.address().clone(),
                        message: format!("{count} back-references but {forward} edges"),
                    });
                }
            }
        }
        Ok(())
    }

    /// Resolve `address` in a process of its own
    pub fn resolve(&self, address: &ModuleAddress) -> Result<(), ResolveError> {
        self.ensure_running()?;
        let process = self.processes.create(format!("resolve {address}"));
        let result = self.resolve_in(&process, address);
        process.finish(service_result(&result));
        result
    }

    /// Resolve `address` within `process`
    pub fn resolve_in(
        &self,
        process: &ServiceProcess,
        address: &ModuleAddress,
    ) -> Result<(), ResolveError> {
        self.ensure_running()?;
        let ctx = CallContext::new(process, &self.observers, self.config.max_call_depth);
        let result = DependencyResolver::new(self).resolve(&ctx, address);
        if self.config.check_symmetry {
            self.check_dependency_symmetry()?;
        }
        result
    }

    /// Check `address` for well-formedness in a process of its own
    pub fn check_well_formed(&self, address: &ModuleAddress) -> Result<(), WellFormedError> {
        self.ensure_running()?;
        let process = self.processes.create(format!("check {address}"));
        let result = self.check_well_formed_in(&process, address);
        process.finish(match &result {
            Ok(()) => ServiceResult::Ok,
            Err(WellFormedError::Interrupted) => ServiceResult::Interrupted,
            Err(error) => ServiceResult::Failed(error.to_string()),
        });
        result
    }

    pub fn check_well_formed_in(
        &self,
        process: &ServiceProcess,
        address: &ModuleAddress,
    ) -> Result<(), WellFormedError> {
        self.ensure_running()?;
        let ctx = CallContext::new(process, &self.observers, self.config.max_call_depth);
        WellFormedService::new(self).check(&ctx, address)
    }

    /// Running processes blocked longer than the configured threshold
    pub fn stalled_processes(&self) -> Vec<ProcessSnapshot> {
        self.processes.stalled(self.config.stall_threshold())
    }
}

fn service_result(result: &Result<(), ResolveError>) -> ServiceResult {
    match result {
        Ok(()) => ServiceResult::Ok,
        Err(ResolveError::Interrupted) => ServiceResult::Interrupted,
        Err(error) => ServiceResult::Failed(error.to_string()),
    }
}

impl Drop for ModuleRegistry {
    fn drop(&mut self) {
        // edges hold their targets; release them one module at a time
        for entry in self.modules.iter() {
            drop(entry.value().take_required());
        }
    }
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("modules", &self.modules.len())
            .field("halted", &self.is_halted())
            .field("observers", &self.observers)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RecordingObserver;
    use crate::loader::InMemoryLoader;
    use crate::state::DependencyState;
    use qedeq_logic::DocumentBuilder;

    fn address(name: &str) -> ModuleAddress {
        ModuleAddress::new(name).unwrap()
    }

    fn registry(loader: InMemoryLoader) -> ModuleRegistry {
        ModuleRegistry::new(KernelConfig::default(), Arc::new(loader))
    }

    #[test]
    fn test_one_module_per_address() {
        let registry = registry(InMemoryLoader::new());
        let recorder = Arc::new(RecordingObserver::new());
        registry.add_observer(recorder.clone());

        let a = registry.get_or_create(&address("a.xml")).unwrap();
        let again = registry.get_or_create(&address("a.xml")).unwrap();
        assert!(Arc::ptr_eq(&a, &again));
        assert_eq!(registry.len(), 1);
        assert_eq!(recorder.events().len(), 1);
    }

    #[test]
    fn test_remove_invalidates_dependents() {
        let loader = InMemoryLoader::new()
            .with("a.xml", DocumentBuilder::new("A").import("b", "b.xml").build())
            .unwrap()
            .with("b.xml", DocumentBuilder::new("B").build())
            .unwrap();
        let registry = registry(loader);
        registry.resolve(&address("a.xml")).unwrap();

        let a = registry.get(&address("a.xml")).unwrap();
        assert_eq!(a.dependency_state(), DependencyState::RequiredLoaded);
        assert!(registry.remove(&address("b.xml")).unwrap());
        assert!(!registry.remove(&address("b.xml")).unwrap());

        assert_eq!(a.dependency_state(), DependencyState::Undefined);
        assert!(a.required().is_empty());
        registry.check_dependency_symmetry().unwrap();

        // resolves again, b is created anew
        registry.resolve(&address("a.xml")).unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_clear_and_shutdown() {
        let loader = InMemoryLoader::new()
            .with("a.xml", DocumentBuilder::new("A").import("a", "a.xml").build())
            .unwrap();
        let registry = registry(loader);
        let a = registry.get_or_create(&address("a.xml")).unwrap();
        assert!(registry.resolve(&address("a.xml")).is_err());
        assert_eq!(a.required().len(), 1);

        registry.shutdown();
        assert!(registry.is_empty());
        assert!(a.required().is_empty());
        assert!(a.dependents().is_empty());
    }

    #[test]
    fn test_halt_on_asymmetry() {
        let registry = registry(InMemoryLoader::new());
        let recorder = Arc::new(RecordingObserver::new());
        registry.add_observer(recorder.clone());
        let a = registry.get_or_create(&address("a.xml")).unwrap();
        let b = registry.get_or_create(&address("b.xml")).unwrap();

        // forward edge without back-reference
        a.update(registry.observers(), |w| w.add_required("b", b.clone()));
        let error = registry.check_dependency_symmetry().unwrap_err();
        assert!(matches!(error, RegistryError::SymmetryViolated { .. }));
        assert!(registry.is_halted());
        assert!(matches!(
            registry.get_or_create(&address("c.xml")),
            Err(RegistryError::Halted { .. })
        ));
        assert!(matches!(
            registry.resolve(&address("a.xml")),
            Err(ResolveError::Registry(RegistryError::Halted { .. }))
        ));
        assert!(recorder
            .events()
            .iter()
            .any(|event| matches!(event, RegistryEvent::Halted { .. })));
    }
}
