//! Dependency resolution tests for the QEDEQ kernel

use qedeq_kernel::{
    DependencyState, InMemoryLoader, KernelConfig, KernelErrorCode, LoadingState, LogicState,
    ModuleRegistry, RecordingObserver, RegistryEvent, ResolveError, ServiceKind, StateChange,
};
use qedeq_logic::{DocumentBuilder, ModuleAddress};
use std::sync::Arc;

fn address(name: &str) -> ModuleAddress {
    ModuleAddress::new(name).unwrap()
}

fn setup(loader: InMemoryLoader) -> (Arc<InMemoryLoader>, ModuleRegistry) {
    let loader = Arc::new(loader);
    let registry = ModuleRegistry::new(KernelConfig::default(), loader.clone());
    (loader, registry)
}

/// `sample/qedeq_sample_091.xml` .. `099`, each importing the next, 099 importing 091
fn nine_cycle() -> InMemoryLoader {
    let loader = InMemoryLoader::new();
    for i in 91..=99 {
        let next = if i == 99 { 91 } else { i + 1 };
        let document = DocumentBuilder::new(format!("Sample {i}"))
            .import(format!("sample{next:03}"), format!("qedeq_sample_{next:03}.xml"))
            .build();
        loader.insert(address(&format!("sample/qedeq_sample_{i:03}.xml")), document);
    }
    loader
}

/// `m0.xml` .. `m{n-1}.xml`, each importing the next
fn chain(n: usize) -> InMemoryLoader {
    let loader = InMemoryLoader::new();
    for i in 0..n {
        let mut builder = DocumentBuilder::new(format!("Chain {i}"));
        if i + 1 < n {
            builder = builder.import(format!("m{}", i + 1), format!("m{}.xml", i + 1));
        }
        loader.insert(address(&format!("m{i}.xml")), builder.build());
    }
    loader
}

fn failed_diagnostics(result: Result<(), ResolveError>) -> qedeq_kernel::DiagnosticList {
    match result {
        Err(ResolveError::Failed { diagnostics, .. }) => diagnostics,
        other => panic!("Expected failed resolution, got {other:?}"),
    }
}

#[test]
fn test_independent_module_resolves() {
    let loader = InMemoryLoader::new()
        .with("a.xml", DocumentBuilder::new("A").build())
        .unwrap();
    let (_, registry) = setup(loader);

    registry.resolve(&address("a.xml")).unwrap();
    let a = registry.get(&address("a.xml")).unwrap();
    assert_eq!(a.loading_state(), LoadingState::Loaded);
    assert_eq!(a.dependency_state(), DependencyState::RequiredLoaded);
    assert!(a.all_errors().is_empty());
}

#[test]
fn test_self_import_fails_on_every_attempt() {
    let loader = InMemoryLoader::new()
        .with("self.xml", DocumentBuilder::new("Self").import("me", "self.xml").build())
        .unwrap();
    let (_, registry) = setup(loader);
    let root = address("self.xml");

    for _ in 0..3 {
        let diagnostics = failed_diagnostics(registry.resolve(&root));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics.count(KernelErrorCode::RecursiveImportForbidden), 1);

        let module = registry.get(&root).unwrap();
        assert_eq!(module.dependency_state(), DependencyState::RequiredFailed);
        assert_eq!(module.errors(ServiceKind::LoadRequiredModules), diagnostics);
        // one edge, one back-reference, even after retries
        assert_eq!(module.required().len(), 1);
        assert_eq!(module.dependents(), vec![root.clone()]);
    }
    registry.check_dependency_symmetry().unwrap();
}

#[test]
fn test_nine_cycle_reported_once_at_root() {
    let (_, registry) = setup(nine_cycle());
    let root = address("sample/qedeq_sample_091.xml");

    let diagnostics = failed_diagnostics(registry.resolve(&root));
    assert_eq!(diagnostics.count(KernelErrorCode::RecursiveImportForbidden), 1);
    let cycle = diagnostics
        .iter()
        .find(|d| d.is(KernelErrorCode::RecursiveImportForbidden))
        .unwrap();
    let expected = (92..=99)
        .chain(std::iter::once(91))
        .map(|i| format!("`sample{i:03}`"))
        .collect::<Vec<_>>()
        .join(" -> ");
    assert!(cycle.message.ends_with(&expected), "{}", cycle.message);
    assert_eq!(cycle.context.location.to_string(), "header/import[0]");

    let mut recursive = 0;
    for module in registry.modules() {
        assert_eq!(module.dependency_state(), DependencyState::RequiredFailed);
        let errors = module.errors(ServiceKind::LoadRequiredModules);
        recursive += errors.count(KernelErrorCode::RecursiveImportForbidden);
        if module.address() != &root {
            assert_eq!(errors.codes(), vec![KernelErrorCode::ImportOfModuleFailed.code()]);
        }
    }
    assert_eq!(recursive, 1);
    assert_eq!(registry.len(), 9);
}

#[test]
fn test_nine_cycle_entered_in_the_middle() {
    let (_, registry) = setup(nine_cycle());
    let entry = address("sample/qedeq_sample_095.xml");

    let diagnostics = failed_diagnostics(registry.resolve(&entry));
    assert_eq!(diagnostics.count(KernelErrorCode::RecursiveImportForbidden), 1);
    // the cycle root is the module the pass started from
    let root = address("sample/qedeq_sample_091.xml");
    let errors = registry.get(&root).unwrap().errors(ServiceKind::LoadRequiredModules);
    assert!(!errors.contains(KernelErrorCode::RecursiveImportForbidden));
}

#[test]
fn test_diamond_loads_shared_module_once() {
    let loader = InMemoryLoader::new()
        .with(
            "top.xml",
            DocumentBuilder::new("Top")
                .import("left", "left.xml")
                .import("right", "right.xml")
                .build(),
        )
        .unwrap()
        .with("left.xml", DocumentBuilder::new("Left").import("base", "base.xml").build())
        .unwrap()
        .with("right.xml", DocumentBuilder::new("Right").import("base", "base.xml").build())
        .unwrap()
        .with("base.xml", DocumentBuilder::new("Base").build())
        .unwrap();
    let (loader, registry) = setup(loader);

    registry.resolve(&address("top.xml")).unwrap();
    assert_eq!(loader.load_count(&address("base.xml")), 1);
    assert_eq!(loader.total_loads(), 4);

    let base = registry.get(&address("base.xml")).unwrap();
    let mut dependents = base.dependents();
    dependents.sort();
    assert_eq!(dependents, vec![address("left.xml"), address("right.xml")]);

    // resolved modules are not loaded again
    registry.resolve(&address("top.xml")).unwrap();
    assert_eq!(loader.total_loads(), 4);
}

#[test]
fn test_missing_import_is_unreachable() {
    let loader = InMemoryLoader::new()
        .with("a.xml", DocumentBuilder::new("A").import("gone", "gone.xml").build())
        .unwrap()
        .with("b.xml", DocumentBuilder::new("B").import("a", "a.xml").build())
        .unwrap();
    let (_, registry) = setup(loader);

    let diagnostics = failed_diagnostics(registry.resolve(&address("b.xml")));
    assert_eq!(diagnostics.codes(), vec![KernelErrorCode::ImportOfModuleFailed.code()]);
    assert!(diagnostics.iter().next().unwrap().message.contains("a/gone"));

    let a = registry.get(&address("a.xml")).unwrap();
    let errors = a.errors(ServiceKind::LoadRequiredModules);
    assert_eq!(errors.codes(), vec![KernelErrorCode::ImportUnreachable.code()]);
    let gone = registry.get(&address("gone.xml")).unwrap();
    assert_eq!(gone.loading_state(), LoadingState::LoadingFailed);
    assert_eq!(gone.errors(ServiceKind::LoadModule).len(), 1);
    // no edge to a module that never loaded
    assert!(a.required().is_empty());
}

#[test]
fn test_missing_root() {
    let (_, registry) = setup(InMemoryLoader::new());
    let diagnostics = failed_diagnostics(registry.resolve(&address("nothing.xml")));
    assert_eq!(diagnostics.codes(), vec![KernelErrorCode::ModuleLoadFailed.code()]);
}

#[test]
fn test_repaired_module_resolves_on_retry() {
    let loader = InMemoryLoader::new()
        .with("a.xml", DocumentBuilder::new("A").import("b", "b.xml").build())
        .unwrap();
    let (loader, registry) = setup(loader);
    assert!(registry.resolve(&address("a.xml")).is_err());

    loader.insert(address("b.xml"), DocumentBuilder::new("B").build());
    registry.resolve(&address("a.xml")).unwrap();
    let a = registry.get(&address("a.xml")).unwrap();
    assert!(a.all_errors().is_empty());
    assert_eq!(a.required().len(), 1);
}

#[test]
fn test_transitions_are_observed() {
    let loader = InMemoryLoader::new()
        .with("a.xml", DocumentBuilder::new("A").build())
        .unwrap();
    let (_, registry) = setup(loader);
    let recorder = Arc::new(RecordingObserver::new());
    registry.add_observer(recorder.clone());

    registry.resolve(&address("a.xml")).unwrap();
    let changes = recorder.changes_of(&address("a.xml"));
    assert!(changes.contains(&StateChange::Dependency {
        from: DependencyState::LoadingRequired,
        to: DependencyState::RequiredLoaded,
    }));
    assert!(matches!(
        recorder.events().first(),
        Some(RegistryEvent::ModuleCreated { .. })
    ));
}

#[test]
fn test_processes_are_recorded() {
    let loader = InMemoryLoader::new()
        .with("a.xml", DocumentBuilder::new("A").build())
        .unwrap();
    let (_, registry) = setup(loader);
    registry.resolve(&address("a.xml")).unwrap();

    let snapshots = registry.processes().snapshots();
    assert_eq!(snapshots.len(), 1);
    assert!(registry.processes().running().is_empty());
    assert!(registry.stalled_processes().is_empty());
    let json = registry.processes().export_json().unwrap();
    assert!(json.contains("resolve a.xml"));
}

#[test]
fn test_long_import_chain_resolves() {
    let (loader, registry) = setup(chain(600));

    registry.resolve(&address("m0.xml")).unwrap();
    assert_eq!(registry.len(), 600);
    for module in registry.modules() {
        assert_eq!(module.dependency_state(), DependencyState::RequiredLoaded);
    }
    assert_eq!(loader.load_count(&address("m599.xml")), 1);
    registry.check_dependency_symmetry().unwrap();

    registry.check_well_formed(&address("m0.xml")).unwrap();
    let last = registry.get(&address("m599.xml")).unwrap();
    assert_eq!(last.logic_state(), LogicState::WellFormed);
    assert_eq!(registry.processes().snapshots().len(), 2);
    assert!(registry.processes().running().is_empty());
}

#[test]
fn test_chain_beyond_call_depth_fails() {
    let config = KernelConfig {
        max_call_depth: 16,
        ..KernelConfig::default()
    };
    let registry = ModuleRegistry::new(config, Arc::new(chain(40)));

    let diagnostics = failed_diagnostics(registry.resolve(&address("m0.xml")));
    assert_eq!(diagnostics.codes(), vec![31210]);
    let message = &diagnostics.iter().next().unwrap().message;
    assert!(message.contains("call depth 16 exceeded"), "{message}");
    registry.check_dependency_symmetry().unwrap();
    assert!(registry.processes().running().is_empty());
}
