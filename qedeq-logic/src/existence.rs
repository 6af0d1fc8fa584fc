//! Existence capability
//!
//! The checker does not know which constants a document defines. It asks an
//! [`ExistenceChecker`], which answers for predicates and functions by name
//! and arity, for the class operator and for the identity operator.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Default name of the identity (equality) predicate
pub const IDENTITY_OPERATOR: &str = "equal";

/// Default name of the class operator function
pub const CLASS_OPERATOR: &str = "class";

/// Predicate constant identified by name and number of arguments
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PredicateKey {
    pub name: String,
    pub arity: usize,
}

impl PredicateKey {
    pub fn new(name: impl Into<String>, arity: usize) -> Self {
        Self {
            name: name.into(),
            arity,
        }
    }
}

impl fmt::Display for PredicateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.arity)
    }
}

/// Function constant identified by name and number of arguments
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FunctionKey {
    pub name: String,
    pub arity: usize,
}

impl FunctionKey {
    pub fn new(name: impl Into<String>, arity: usize) -> Self {
        Self {
            name: name.into(),
            arity,
        }
    }
}

impl fmt::Display for FunctionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.arity)
    }
}

/// Capability answering which operators are currently defined
pub trait ExistenceChecker {
    fn predicate_exists(&self, name: &str, arity: usize) -> bool;

    fn function_exists(&self, name: &str, arity: usize) -> bool;

    fn class_operator_exists(&self) -> bool;

    fn identity_operator_exists(&self) -> bool;

    /// Name under which the identity operator is (or will be) referenced
    fn identity_operator(&self) -> &str;

    fn predicate_key_exists(&self, key: &PredicateKey) -> bool {
        self.predicate_exists(&key.name, key.arity)
    }

    fn function_key_exists(&self, key: &FunctionKey) -> bool {
        self.function_exists(&key.name, key.arity)
    }
}

impl<T: ExistenceChecker + ?Sized> ExistenceChecker for &T {
    fn predicate_exists(&self, name: &str, arity: usize) -> bool {
        (**self).predicate_exists(name, arity)
    }

    fn function_exists(&self, name: &str, arity: usize) -> bool {
        (**self).function_exists(name, arity)
    }

    fn class_operator_exists(&self) -> bool {
        (**self).class_operator_exists()
    }

    fn identity_operator_exists(&self) -> bool {
        (**self).identity_operator_exists()
    }

    fn identity_operator(&self) -> &str {
        (**self).identity_operator()
    }
}

/// Set based existence checker
///
/// Defining the identity operator name with arity 2 also marks the identity
/// operator as defined; defining the class operator name marks the class
/// operator as defined.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultExistenceChecker {
    predicates: HashSet<PredicateKey>,
    functions: HashSet<FunctionKey>,
    identity_operator: String,
    class_operator: String,
    identity_defined: bool,
    class_defined: bool,
}

impl Default for DefaultExistenceChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl DefaultExistenceChecker {
    /// Nothing defined
    pub fn new() -> Self {
        Self::with_operator_names(IDENTITY_OPERATOR, CLASS_OPERATOR)
    }

    pub fn with_operator_names(identity: impl Into<String>, class: impl Into<String>) -> Self {
        Self {
            predicates: HashSet::new(),
            functions: HashSet::new(),
            identity_operator: identity.into(),
            class_operator: class.into(),
            identity_defined: false,
            class_defined: false,
        }
    }

    /// Identity and class operator defined, no other constants
    pub fn with_basics() -> Self {
        let mut checker = Self::new();
        let identity = checker.identity_operator.clone();
        let class = checker.class_operator.clone();
        checker.add_predicate(PredicateKey::new(identity, 2));
        checker.add_function(FunctionKey::new(class, 1));
        checker
    }

    pub fn add_predicate(&mut self, key: PredicateKey) -> bool {
        if key.name == self.identity_operator && key.arity == 2 {
            self.identity_defined = true;
        }
        self.predicates.insert(key)
    }

    pub fn add_function(&mut self, key: FunctionKey) -> bool {
        if key.name == self.class_operator {
            self.class_defined = true;
        }
        self.functions.insert(key)
    }

    pub fn set_class_operator_defined(&mut self, defined: bool) {
        self.class_defined = defined;
    }

    pub fn clear(&mut self) {
        self.predicates.clear();
        self.functions.clear();
        self.identity_defined = false;
        self.class_defined = false;
    }

    pub fn predicates(&self) -> impl Iterator<Item = &PredicateKey> {
        self.predicates.iter()
    }

    pub fn functions(&self) -> impl Iterator<Item = &FunctionKey> {
        self.functions.iter()
    }

    pub fn class_operator(&self) -> &str {
        &self.class_operator
    }
}

impl ExistenceChecker for DefaultExistenceChecker {
    fn predicate_exists(&self, name: &str, arity: usize) -> bool {
        self.predicates.contains(&PredicateKey::new(name, arity))
    }

    fn function_exists(&self, name: &str, arity: usize) -> bool {
        self.functions.contains(&FunctionKey::new(name, arity))
    }

    fn class_operator_exists(&self) -> bool {
        self.class_defined
    }

    fn identity_operator_exists(&self) -> bool {
        self.identity_defined
    }

    fn identity_operator(&self) -> &str {
        &self.identity_operator
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_checker() {
        let checker = DefaultExistenceChecker::new();
        assert!(!checker.predicate_exists("in", 2));
        assert!(!checker.identity_operator_exists());
        assert!(!checker.class_operator_exists());
        assert_eq!(checker.identity_operator(), IDENTITY_OPERATOR);
    }

    #[test]
    fn test_arity_matters() {
        let mut checker = DefaultExistenceChecker::new();
        checker.add_predicate(PredicateKey::new("in", 2));
        assert!(checker.predicate_exists("in", 2));
        assert!(!checker.predicate_exists("in", 1));
        assert!(checker.predicate_key_exists(&PredicateKey::new("in", 2)));
    }

    #[test]
    fn test_operators_marked_by_definition() {
        let mut checker = DefaultExistenceChecker::new();
        checker.add_predicate(PredicateKey::new("equal", 3));
        assert!(!checker.identity_operator_exists());
        checker.add_predicate(PredicateKey::new("equal", 2));
        assert!(checker.identity_operator_exists());
        checker.add_function(FunctionKey::new("class", 1));
        assert!(checker.class_operator_exists());

        let basics = DefaultExistenceChecker::with_basics();
        assert!(basics.identity_operator_exists());
        assert!(basics.class_operator_exists());
    }

    #[test]
    fn test_reference_impl() {
        fn defined(checker: impl ExistenceChecker) -> bool {
            checker.identity_operator_exists()
        }
        let checker = DefaultExistenceChecker::with_basics();
        assert!(defined(&checker));
    }
}
