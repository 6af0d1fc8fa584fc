//! Concurrent resolution and cancellation tests for the QEDEQ kernel

use parking_lot::Mutex;
use qedeq_kernel::{
    CancellationToken, DependencyState, InMemoryLoader, KernelConfig, LoadError, ModuleLoader,
    ModuleRegistry, ResolveError, ServiceKind, ServiceResult,
};
use qedeq_logic::{DocumentBuilder, ModuleAddress, ModuleDocument};
use std::collections::BTreeMap;
use std::sync::Arc;

fn address(name: &str) -> ModuleAddress {
    ModuleAddress::new(name).unwrap()
}

/// Two overlapping graphs: a ring of five, a diamond hanging off it, and a
/// module with a missing import
fn corpus() -> InMemoryLoader {
    let loader = InMemoryLoader::new();
    for i in 0..5 {
        let next = (i + 1) % 5;
        let mut builder = DocumentBuilder::new(format!("Ring {i}"))
            .import(format!("ring{next}"), format!("ring{next}.xml"));
        if i == 2 {
            builder = builder.import("top", "top.xml");
        }
        loader.insert(address(&format!("ring{i}.xml")), builder.build());
    }
    let documents = [
        ("top.xml", vec![("left", "left.xml"), ("right", "right.xml")]),
        ("left.xml", vec![("base", "base.xml")]),
        ("right.xml", vec![("base", "base.xml"), ("broken", "broken.xml")]),
        ("broken.xml", vec![("missing", "missing.xml")]),
        ("base.xml", vec![]),
        ("entry.xml", vec![("ring", "ring0.xml"), ("top", "top.xml")]),
    ];
    for (name, imports) in documents {
        let mut builder = DocumentBuilder::new(name);
        for (label, location) in imports {
            builder = builder.import(label, location);
        }
        loader.insert(address(name), builder.build());
    }
    loader
}

type Outcome = BTreeMap<String, (DependencyState, Vec<i32>)>;

fn outcome(registry: &ModuleRegistry) -> Outcome {
    registry
        .modules()
        .into_iter()
        .map(|module| {
            let mut codes = module.errors(ServiceKind::LoadRequiredModules).codes();
            codes.extend(module.errors(ServiceKind::LoadModule).codes());
            (
                module.address().to_string(),
                (module.dependency_state(), codes),
            )
        })
        .collect()
}

fn sequential(roots: &[&str]) -> Outcome {
    let registry = ModuleRegistry::new(KernelConfig::default(), Arc::new(corpus()));
    for root in roots {
        let _ = registry.resolve(&address(root));
    }
    outcome(&registry)
}

#[test]
fn test_concurrent_resolution_matches_sequential() {
    let expected = sequential(&["entry.xml"]);

    for _ in 0..20 {
        let registry = ModuleRegistry::new(KernelConfig::default(), Arc::new(corpus()));
        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    let _ = registry.resolve(&address("entry.xml"));
                });
            }
        });
        registry.check_dependency_symmetry().unwrap();
        assert_eq!(outcome(&registry), expected);
        assert!(registry.processes().running().is_empty());
    }
}

#[test]
fn test_overlapping_roots_leave_consistent_registry() {
    let roots = ["ring0.xml", "top.xml", "entry.xml", "ring3.xml"];
    let expected = sequential(&roots);

    for _ in 0..20 {
        let registry = ModuleRegistry::new(KernelConfig::default(), Arc::new(corpus()));
        std::thread::scope(|scope| {
            for root in roots {
                let registry = &registry;
                scope.spawn(move || {
                    let _ = registry.resolve(&address(root));
                });
            }
        });
        registry.check_dependency_symmetry().unwrap();
        for module in registry.modules() {
            assert!(!module.dependency_state().is_in_progress());
        }

        // failures are retried, so replaying the sequence converges
        for root in roots {
            let _ = registry.resolve(&address(root));
        }
        assert_eq!(outcome(&registry), expected);
    }
}

#[test]
fn test_distinct_roots_match_sequential() {
    // acyclic part of the corpus, sharing right, base and broken
    let roots = ["top.xml", "right.xml", "left.xml"];
    let expected = sequential(&roots);

    for _ in 0..50 {
        let registry = ModuleRegistry::new(KernelConfig::default(), Arc::new(corpus()));
        std::thread::scope(|scope| {
            for root in roots {
                let registry = &registry;
                scope.spawn(move || {
                    let _ = registry.resolve(&address(root));
                });
            }
        });
        registry.check_dependency_symmetry().unwrap();
        assert_eq!(outcome(&registry), expected);
    }
}

#[test]
fn test_remove_during_symmetry_checks() {
    for _ in 0..100 {
        let loader = InMemoryLoader::new()
            .with("a.xml", DocumentBuilder::new("A").import("b", "b.xml").build())
            .unwrap()
            .with("b.xml", DocumentBuilder::new("B").build())
            .unwrap();
        let registry = ModuleRegistry::new(KernelConfig::default(), Arc::new(loader));
        let a = address("a.xml");
        let b = address("b.xml");
        registry.resolve(&a).unwrap();

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for _ in 0..50 {
                    let _ = registry.remove(&b);
                    let _ = registry.resolve(&a);
                }
            });
            scope.spawn(|| {
                for _ in 0..50 {
                    let _ = registry.remove(&b);
                }
            });
            scope.spawn(|| {
                for _ in 0..50 {
                    let _ = registry.check_dependency_symmetry();
                }
            });
        });

        assert!(!registry.is_halted());
        registry.check_dependency_symmetry().unwrap();
        registry.remove(&b).unwrap();
        registry.resolve(&a).unwrap();
        assert_eq!(registry.get(&a).unwrap().required().len(), 1);
    }
}

#[test]
fn test_same_root_from_many_threads() {
    let loader = Arc::new(corpus());
    let registry = ModuleRegistry::new(KernelConfig::default(), loader.clone());
    let results: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| scope.spawn(|| registry.resolve(&address("top.xml"))))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    for result in &results {
        let diagnostics = result.as_ref().unwrap_err().diagnostics().unwrap();
        assert_eq!(diagnostics.codes(), vec![31210]);
    }
    // loading happens under the module lock, once per module
    assert_eq!(loader.load_count(&address("base.xml")), 1);
    assert_eq!(loader.load_count(&address("top.xml")), 1);
    registry.check_dependency_symmetry().unwrap();
}

/// Loader requesting cancellation when a given module is loaded
struct CancellingLoader {
    inner: InMemoryLoader,
    trigger: ModuleAddress,
    token: Mutex<Option<CancellationToken>>,
}

impl ModuleLoader for CancellingLoader {
    fn load(&self, address: &ModuleAddress) -> Result<ModuleDocument, LoadError> {
        if address == &self.trigger {
            if let Some(token) = self.token.lock().take() {
                token.request();
            }
        }
        self.inner.load(address)
    }
}

#[test]
fn test_interrupted_resolution_converges() {
    let expected = sequential(&["entry.xml"]);

    let loader = Arc::new(CancellingLoader {
        inner: corpus(),
        trigger: address("base.xml"),
        token: Mutex::new(None),
    });
    let registry = ModuleRegistry::new(KernelConfig::default(), loader.clone());
    let process = registry.processes().create("interrupted");
    *loader.token.lock() = Some(process.token().clone());

    let result = registry.resolve_in(&process, &address("entry.xml"));
    assert!(matches!(result, Err(ResolveError::Interrupted)));
    assert!(process.token().is_acknowledged());
    assert_eq!(process.call_depth(), 0);
    process.finish(ServiceResult::Interrupted);

    registry.check_dependency_symmetry().unwrap();
    for module in registry.modules() {
        assert!(
            !module.dependency_state().is_in_progress(),
            "{} left in {}",
            module.address(),
            module.dependency_state()
        );
    }

    let _ = registry.resolve(&address("entry.xml"));
    assert_eq!(outcome(&registry), expected);
}

#[test]
fn test_shutdown_interrupts_running_processes() {
    let registry = ModuleRegistry::new(KernelConfig::default(), Arc::new(corpus()));
    let process = registry.processes().create("idle");
    registry.shutdown();

    assert!(process.token().is_requested());
    assert!(registry.is_empty());
    let result = registry.resolve_in(&process, &address("base.xml"));
    assert!(matches!(result, Err(ResolveError::Interrupted)));
}
