//! QEDEQ logic
//!
//! Shared vocabulary of the QEDEQ kernel: module addresses, the logic AST
//! used for formulas and terms, the module document structure, locations
//! inside documents and the existence capability consulted by the checker.

pub mod address;
pub mod context;
pub mod document;
pub mod element;
pub mod error;
pub mod existence;
pub mod operator;
pub mod sexp;

// Re-export core types
pub use address::ModuleAddress;
pub use context::{LocationPath, ModuleContext, PathSegment};
pub use document::{
    Chapter, DocumentBuilder, Header, ImportSpec, ModuleDocument, Node, NodeKind, NodeRef, Section,
};
pub use element::{ElementList, LogicElement};
pub use error::{LogicError, Result};
pub use existence::{
    DefaultExistenceChecker, ExistenceChecker, FunctionKey, PredicateKey, CLASS_OPERATOR,
    IDENTITY_OPERATOR,
};
pub use operator::{Operator, OperatorKind};
pub use sexp::{parse_element, parse_elements, print_element, print_element_pretty};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reexports() {
        let element = parse_element("(NOT (PREDVAR A))").unwrap();
        assert_eq!(element.operator(), Some(Operator::Negation));
        assert_eq!(element.to_string(), "(NOT (PREDVAR \"A\"))");
    }
}
