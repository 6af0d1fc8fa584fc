//! Existence checker of one module
//!
//! Grows while the well-formedness service walks a document: every
//! definition adds its constant. Constants of required modules are visible
//! under `label.name`, where `label` is the import label.

use crate::config::KernelConfig;
use qedeq_logic::{
    DefaultExistenceChecker, ExistenceChecker, FunctionKey, ModuleDocument, NodeKind, PredicateKey,
};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct ModuleExistenceChecker {
    local: DefaultExistenceChecker,
    imports: Vec<(String, Arc<ModuleExistenceChecker>)>,
    // `label.name` of an imported identity operator
    imported_identity: Option<String>,
}

impl ModuleExistenceChecker {
    pub fn new(config: &KernelConfig) -> Self {
        Self {
            local: DefaultExistenceChecker::with_operator_names(
                config.identity_operator.clone(),
                config.class_operator.clone(),
            ),
            imports: Vec::new(),
            imported_identity: None,
        }
    }

    /// Checker holding every definition of an already checked document
    pub fn from_document(
        config: &KernelConfig,
        document: &ModuleDocument,
        imports: Vec<(String, Arc<ModuleExistenceChecker>)>,
    ) -> Self {
        let mut checker = Self::new(config);
        for (label, imported) in imports {
            checker.add_import(label, imported);
        }
        for node in document.nodes() {
            match &node.node.kind {
                NodeKind::InitialPredicateDefinition { name, arity, .. }
                | NodeKind::PredicateDefinition { name, arity, .. } => {
                    checker.define_predicate(name, *arity);
                }
                NodeKind::InitialFunctionDefinition { name, arity, .. }
                | NodeKind::FunctionDefinition { name, arity, .. } => {
                    checker.define_function(name, *arity);
                }
                _ => {}
            }
        }
        checker
    }

    pub fn add_import(&mut self, label: impl Into<String>, checker: Arc<ModuleExistenceChecker>) {
        let label = label.into();
        if self.imported_identity.is_none() && checker.identity_operator_exists() {
            self.imported_identity = Some(format!("{label}.{}", checker.identity_operator()));
        }
        self.imports.push((label, checker));
    }

    /// Define a predicate constant; false if it existed already
    pub fn define_predicate(&mut self, name: &str, arity: usize) -> bool {
        self.local.add_predicate(PredicateKey::new(name, arity))
    }

    /// Define a function constant; false if it existed already
    pub fn define_function(&mut self, name: &str, arity: usize) -> bool {
        self.local.add_function(FunctionKey::new(name, arity))
    }

    fn imported<'s>(&'s self, name: &'s str) -> Option<(&'s ModuleExistenceChecker, &'s str)> {
        let (label, rest) = name.split_once('.')?;
        self.imports
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, checker)| (checker.as_ref(), rest))
    }
}

impl ExistenceChecker for ModuleExistenceChecker {
    fn predicate_exists(&self, name: &str, arity: usize) -> bool {
        self.local.predicate_exists(name, arity)
            || self
                .imported(name)
                .map_or(false, |(checker, rest)| checker.predicate_exists(rest, arity))
    }

    fn function_exists(&self, name: &str, arity: usize) -> bool {
        self.local.function_exists(name, arity)
            || self
                .imported(name)
                .map_or(false, |(checker, rest)| checker.function_exists(rest, arity))
    }

    fn class_operator_exists(&self) -> bool {
        self.local.class_operator_exists()
            || self
                .imports
                .iter()
                .any(|(_, checker)| checker.class_operator_exists())
    }

    fn identity_operator_exists(&self) -> bool {
        self.local.identity_operator_exists() || self.imported_identity.is_some()
    }

    fn identity_operator(&self) -> &str {
        if self.local.identity_operator_exists() {
            return self.local.identity_operator();
        }
        self.imported_identity
            .as_deref()
            .unwrap_or_else(|| self.local.identity_operator())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qedeq_logic::{DocumentBuilder, LogicElement};

    #[test]
    fn test_definitions_grow_the_checker() {
        let mut checker = ModuleExistenceChecker::new(&KernelConfig::default());
        assert!(!checker.identity_operator_exists());
        assert!(checker.define_predicate("in", 2));
        assert!(!checker.define_predicate("in", 2));
        assert!(checker.predicate_exists("in", 2));

        checker.define_predicate("equal", 2);
        assert!(checker.identity_operator_exists());
        assert_eq!(checker.identity_operator(), "equal");
        checker.define_function("class", 1);
        assert!(checker.class_operator_exists());
    }

    #[test]
    fn test_imported_names_use_labels() {
        let config = KernelConfig::default();
        let base = DocumentBuilder::new("Base")
            .initial_predicate("def_equal", "equal", 2)
            .initial_function("def_empty", "empty", 0)
            .axiom("ax", LogicElement::predicate_variable("A", vec![]))
            .build();
        let base = Arc::new(ModuleExistenceChecker::from_document(&config, &base, Vec::new()));

        let mut checker = ModuleExistenceChecker::new(&config);
        checker.add_import("base", base);
        assert!(checker.predicate_exists("base.equal", 2));
        assert!(checker.function_exists("base.empty", 0));
        assert!(!checker.function_exists("empty", 0));
        assert!(!checker.function_exists("other.empty", 0));
        assert!(checker.identity_operator_exists());
        assert_eq!(checker.identity_operator(), "base.equal");
        assert!(!checker.class_operator_exists());
    }

    #[test]
    fn test_nested_labels() {
        let config = KernelConfig::default();
        let mut inner = ModuleExistenceChecker::new(&config);
        inner.define_predicate("in", 2);
        let mut middle = ModuleExistenceChecker::new(&config);
        middle.add_import("sets", Arc::new(inner));
        let mut outer = ModuleExistenceChecker::new(&config);
        outer.add_import("logic", Arc::new(middle));

        assert!(outer.predicate_exists("logic.sets.in", 2));
        assert!(!outer.predicate_exists("logic.in", 2));
    }

    #[test]
    fn test_lookup_with_built_name() {
        let config = KernelConfig::default();
        let mut base = ModuleExistenceChecker::new(&config);
        base.define_function("union", 2);
        let mut checker = ModuleExistenceChecker::new(&config);
        checker.add_import("sets", Arc::new(base));

        for (label, expected) in [("sets", true), ("logic", false)] {
            let name = format!("{label}.union");
            assert_eq!(checker.function_exists(&name, 2), expected);
        }
    }
}
