//! QEDEQ
//!
//! Facade over the workspace crates: the logic vocabulary, the formula
//! checker and the module kernel, plus logging bootstrap for embedders.

pub use qedeq_checker as checker;
pub use qedeq_kernel as kernel;
pub use qedeq_logic as logic;

pub use qedeq_checker::{check_formula, check_term, LogicDiagnostics, LogicErrorCode};
pub use qedeq_kernel::{
    InMemoryLoader, KernelConfig, ModuleLoader, ModuleRegistry, ResolveError, WellFormedError,
};
pub use qedeq_logic::{parse_element, DocumentBuilder, LogicElement, ModuleAddress};

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

/// Install a `tracing` subscriber writing to stderr
pub fn init_tracing(verbose: bool) -> Result<()> {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))?;

    Ok(())
}

/// Registry configured from an optional TOML file
pub fn open_registry(
    config: Option<&Path>,
    loader: Arc<dyn ModuleLoader>,
) -> Result<ModuleRegistry> {
    let config = match config {
        Some(path) => KernelConfig::from_file(path)?,
        None => KernelConfig::default(),
    };
    tracing::debug!(?config, "opening module registry");
    Ok(ModuleRegistry::new(config, loader))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn address(name: &str) -> ModuleAddress {
        ModuleAddress::new(name).unwrap()
    }

    #[test]
    fn test_registry_from_config_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("kernel.toml");
        std::fs::write(&path, "identity_operator = \"eq\"\ncheck_symmetry = true\n").unwrap();

        let loader = InMemoryLoader::new()
            .with(
                "logic.xml",
                DocumentBuilder::new("Logic")
                    .initial_predicate("def_eq", "eq", 2)
                    .axiom(
                        "reflexivity",
                        parse_element("(FORALL (VAR x) (PREDCON eq (VAR x) (VAR x)))").unwrap(),
                    )
                    .build(),
            )
            .unwrap();
        let registry = open_registry(Some(&path), Arc::new(loader)).unwrap();
        assert_eq!(registry.config().identity_operator, "eq");
        registry.check_well_formed(&address("logic.xml")).unwrap();
    }

    #[test]
    fn test_bad_config_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("kernel.toml");
        std::fs::write(&path, "class_operator = \"\"\n").unwrap();
        assert!(open_registry(Some(&path), Arc::new(InMemoryLoader::new())).is_err());
    }

    #[test]
    fn test_default_registry_resolves() {
        let loader = InMemoryLoader::new()
            .with("a.xml", DocumentBuilder::new("A").import("a", "a.xml").build())
            .unwrap();
        let registry = open_registry(None, Arc::new(loader)).unwrap();
        let error = registry.resolve(&address("a.xml")).unwrap_err();
        assert!(matches!(error, ResolveError::Failed { .. }));
    }

    #[test]
    fn test_tracing_installs_once() {
        init_tracing(true).unwrap();
        assert!(init_tracing(false).is_err());
    }
}
