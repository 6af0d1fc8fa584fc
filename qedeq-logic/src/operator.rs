//! Operator tags of the logic AST
//!
//! Every list node of a [`LogicElement`](crate::LogicElement) carries an
//! operator tag. The tag decides whether the node is a formula or a term and
//! which argument shape the checker expects.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Position a node may occupy in the AST
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperatorKind {
    Formula,
    Term,
}

/// Known operator tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Operator {
    And,
    Or,
    Implication,
    Equivalence,
    Negation,
    ForAll,
    Exists,
    ExistsUnique,
    PredicateVariable,
    PredicateConstant,
    SubjectVariable,
    FunctionVariable,
    FunctionConstant,
    Class,
}

impl Operator {
    /// All known operators, in tag order
    pub const ALL: [Operator; 14] = [
        Operator::And,
        Operator::Or,
        Operator::Implication,
        Operator::Equivalence,
        Operator::Negation,
        Operator::ForAll,
        Operator::Exists,
        Operator::ExistsUnique,
        Operator::PredicateVariable,
        Operator::PredicateConstant,
        Operator::SubjectVariable,
        Operator::FunctionVariable,
        Operator::FunctionConstant,
        Operator::Class,
    ];

    /// The tag as it appears in documents
    pub fn tag(self) -> &'static str {
        match self {
            Operator::And => "AND",
            Operator::Or => "OR",
            Operator::Implication => "IMPL",
            Operator::Equivalence => "EQUI",
            Operator::Negation => "NOT",
            Operator::ForAll => "FORALL",
            Operator::Exists => "EXISTS",
            Operator::ExistsUnique => "EXISTSU",
            Operator::PredicateVariable => "PREDVAR",
            Operator::PredicateConstant => "PREDCON",
            Operator::SubjectVariable => "VAR",
            Operator::FunctionVariable => "FUNVAR",
            Operator::FunctionConstant => "FUNCON",
            Operator::Class => "CLASS",
        }
    }

    /// Look up an operator by its tag
    pub fn from_tag(tag: &str) -> Option<Self> {
        OPERATORS_BY_TAG.get(tag).copied()
    }

    pub fn kind(self) -> OperatorKind {
        match self {
            Operator::SubjectVariable
            | Operator::FunctionVariable
            | Operator::FunctionConstant
            | Operator::Class => OperatorKind::Term,
            _ => OperatorKind::Formula,
        }
    }

    /// Quantifiers and the class term bind their first argument
    pub fn is_binder(self) -> bool {
        matches!(
            self,
            Operator::ForAll | Operator::Exists | Operator::ExistsUnique | Operator::Class
        )
    }

    pub fn is_quantifier(self) -> bool {
        matches!(self, Operator::ForAll | Operator::Exists | Operator::ExistsUnique)
    }

    /// Connectives taking two or more formulas
    pub fn is_multi_connective(self) -> bool {
        matches!(self, Operator::And | Operator::Or | Operator::Equivalence)
    }
}

static OPERATORS_BY_TAG: Lazy<HashMap<&'static str, Operator>> = Lazy::new(|| {
    let mut map: HashMap<&'static str, Operator> =
        Operator::ALL.iter().map(|op| (op.tag(), *op)).collect();
    // Older documents spell subject variables out
    map.insert("SUBJVAR", Operator::SubjectVariable);
    map
});

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_round_trip() {
        for op in Operator::ALL {
            assert_eq!(Operator::from_tag(op.tag()), Some(op));
        }
        assert_eq!(Operator::from_tag("SUBJVAR"), Some(Operator::SubjectVariable));
        assert_eq!(Operator::from_tag("XOR"), None);
    }

    #[test]
    fn test_kinds() {
        assert_eq!(Operator::Class.kind(), OperatorKind::Term);
        assert_eq!(Operator::ForAll.kind(), OperatorKind::Formula);
        assert!(Operator::Class.is_binder());
        assert!(!Operator::Class.is_quantifier());
        assert!(Operator::Equivalence.is_multi_connective());
        assert!(!Operator::Implication.is_multi_connective());
    }
}
