//! Logic AST
//!
//! Formulas and terms share one tree shape: an element is either an atom
//! holding text or a list holding an operator tag and ordered children.
//! The tag is kept as text so that unknown operators survive construction and
//! can be reported by the checker instead of being rejected up front.

use crate::operator::Operator;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Formula or term node
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogicElement {
    Atom(String),
    List(ElementList),
}

/// List node: operator tag plus arguments
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ElementList {
    pub operator: String,
    pub elements: Vec<LogicElement>,
}

impl ElementList {
    pub fn new(operator: impl Into<String>, elements: Vec<LogicElement>) -> Self {
        Self {
            operator: operator.into(),
            elements,
        }
    }

    /// Known operator of this list, if the tag is recognized
    pub fn known_operator(&self) -> Option<Operator> {
        Operator::from_tag(&self.operator)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&LogicElement> {
        self.elements.get(index)
    }

    /// Content of the first argument when it is an atom
    pub fn first_atom(&self) -> Option<&str> {
        match self.elements.first() {
            Some(LogicElement::Atom(text)) => Some(text.as_str()),
            _ => None,
        }
    }
}

impl LogicElement {
    pub fn atom(text: impl Into<String>) -> Self {
        LogicElement::Atom(text.into())
    }

    pub fn list(operator: impl Into<String>, elements: Vec<LogicElement>) -> Self {
        LogicElement::List(ElementList::new(operator, elements))
    }

    pub fn op(operator: Operator, elements: Vec<LogicElement>) -> Self {
        LogicElement::list(operator.tag(), elements)
    }

    pub fn is_atom(&self) -> bool {
        matches!(self, LogicElement::Atom(_))
    }

    pub fn is_list(&self) -> bool {
        matches!(self, LogicElement::List(_))
    }

    pub fn as_atom(&self) -> Option<&str> {
        match self {
            LogicElement::Atom(text) => Some(text.as_str()),
            LogicElement::List(_) => None,
        }
    }

    pub fn as_list(&self) -> Option<&ElementList> {
        match self {
            LogicElement::Atom(_) => None,
            LogicElement::List(list) => Some(list),
        }
    }

    /// Operator of a list node whose tag is recognized
    pub fn operator(&self) -> Option<Operator> {
        self.as_list().and_then(ElementList::known_operator)
    }

    pub fn is_subject_variable(&self) -> bool {
        self.operator() == Some(Operator::SubjectVariable)
    }

    /// Number of nodes in this tree
    pub fn node_count(&self) -> usize {
        match self {
            LogicElement::Atom(_) => 1,
            LogicElement::List(list) => {
                1 + list.elements.iter().map(LogicElement::node_count).sum::<usize>()
            }
        }
    }

    // Constructors for the common node shapes

    pub fn subject_variable(name: &str) -> Self {
        Self::op(Operator::SubjectVariable, vec![Self::atom(name)])
    }

    pub fn predicate_variable(name: &str, arguments: Vec<LogicElement>) -> Self {
        Self::op(Operator::PredicateVariable, prepend_atom(name, arguments))
    }

    pub fn predicate_constant(name: &str, arguments: Vec<LogicElement>) -> Self {
        Self::op(Operator::PredicateConstant, prepend_atom(name, arguments))
    }

    pub fn function_variable(name: &str, arguments: Vec<LogicElement>) -> Self {
        Self::op(Operator::FunctionVariable, prepend_atom(name, arguments))
    }

    pub fn function_constant(name: &str, arguments: Vec<LogicElement>) -> Self {
        Self::op(Operator::FunctionConstant, prepend_atom(name, arguments))
    }

    pub fn and(elements: Vec<LogicElement>) -> Self {
        Self::op(Operator::And, elements)
    }

    pub fn or(elements: Vec<LogicElement>) -> Self {
        Self::op(Operator::Or, elements)
    }

    pub fn implication(premise: LogicElement, conclusion: LogicElement) -> Self {
        Self::op(Operator::Implication, vec![premise, conclusion])
    }

    pub fn not(element: LogicElement) -> Self {
        Self::op(Operator::Negation, vec![element])
    }

    pub fn for_all(variable: &str, formula: LogicElement) -> Self {
        Self::op(Operator::ForAll, vec![Self::subject_variable(variable), formula])
    }

    pub fn exists(variable: &str, formula: LogicElement) -> Self {
        Self::op(Operator::Exists, vec![Self::subject_variable(variable), formula])
    }

    pub fn class(variable: &str, formula: LogicElement) -> Self {
        Self::op(Operator::Class, vec![Self::subject_variable(variable), formula])
    }
}

fn prepend_atom(name: &str, arguments: Vec<LogicElement>) -> Vec<LogicElement> {
    let mut elements = Vec::with_capacity(arguments.len() + 1);
    elements.push(LogicElement::atom(name));
    elements.extend(arguments);
    elements
}

impl fmt::Display for LogicElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&crate::sexp::print_element(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors() {
        let formula = LogicElement::for_all(
            "x",
            LogicElement::predicate_variable("\\phi", vec![LogicElement::subject_variable("x")]),
        );
        assert_eq!(formula.operator(), Some(Operator::ForAll));
        let list = formula.as_list().unwrap();
        assert_eq!(list.len(), 2);
        assert!(list.get(0).unwrap().is_subject_variable());
        assert_eq!(formula.node_count(), 7);
    }

    #[test]
    fn test_unknown_tag_is_kept() {
        let element = LogicElement::list("XOR", vec![]);
        assert_eq!(element.operator(), None);
        assert_eq!(element.as_list().unwrap().operator, "XOR");
    }

    #[test]
    fn test_first_atom() {
        let element = LogicElement::predicate_constant("in", vec![]);
        assert_eq!(element.as_list().unwrap().first_atom(), Some("in"));
        let empty = LogicElement::op(Operator::PredicateVariable, vec![]);
        assert_eq!(empty.as_list().unwrap().first_atom(), None);
    }
}
