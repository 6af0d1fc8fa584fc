//! Free and bound subject variables
//!
//! Both walks follow the same grammar: subject variables are free where they
//! occur, and a binder (`FORALL`, `EXISTS`, `EXISTSU`, `CLASS`) turns its
//! first argument from free into bound for the remaining arguments.

use im::OrdSet;
use qedeq_logic::{LogicElement, Operator};

/// Set of subject variable names
pub type VariableSet = OrdSet<String>;

/// Free and bound variables of one subtree
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariableSets {
    pub free: VariableSet,
    pub bound: VariableSet,
}

impl VariableSets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn free_variable(name: &str) -> Self {
        Self {
            free: OrdSet::unit(name.to_string()),
            bound: OrdSet::new(),
        }
    }

    pub fn union(mut self, other: VariableSets) -> Self {
        self.free = self.free.union(other.free);
        self.bound = self.bound.union(other.bound);
        self
    }

    /// Apply a binder for `variable` to the sets of its scope
    pub fn bind(mut self, variable: &str) -> Self {
        self.free.remove(variable);
        self.bound.insert(variable.to_string());
        self
    }

    /// Variables occurring free and bound at once
    pub fn clashes(&self) -> VariableSet {
        self.free.clone().intersection(self.bound.clone())
    }
}

/// Name of a well-shaped subject variable node
pub fn subject_variable_name(element: &LogicElement) -> Option<&str> {
    let list = element.as_list()?;
    if list.known_operator() != Some(Operator::SubjectVariable) || list.len() != 1 {
        return None;
    }
    list.first_atom().filter(|name| !name.is_empty())
}

pub fn free_variables(element: &LogicElement) -> VariableSet {
    variables(element).free
}

pub fn bound_variables(element: &LogicElement) -> VariableSet {
    variables(element).bound
}

/// Free and bound variables in one walk
pub fn variables(element: &LogicElement) -> VariableSets {
    let list = match element {
        LogicElement::Atom(_) => return VariableSets::new(),
        LogicElement::List(list) => list,
    };

    match list.known_operator() {
        Some(Operator::SubjectVariable) => match subject_variable_name(element) {
            Some(name) => VariableSets::free_variable(name),
            None => VariableSets::new(),
        },
        Some(op) if op.is_binder() => {
            let scope = list
                .elements
                .iter()
                .skip(1)
                .map(variables)
                .fold(VariableSets::new(), VariableSets::union);
            match list.get(0).and_then(subject_variable_name) {
                Some(name) => scope.bind(name),
                None => scope,
            }
        }
        _ => list
            .elements
            .iter()
            .map(variables)
            .fold(VariableSets::new(), VariableSets::union),
    }
}
