//! Diagnostics produced by the well-formedness checker
//!
//! Every problem found in a formula or term becomes a [`LogicDiagnostic`]
//! carrying a numeric code, a message, the offending element and its
//! location. The checker collects them in [`LogicDiagnostics`] and never
//! stops at the first one.

use qedeq_logic::{LogicElement, ModuleContext};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes of the formula and term checker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(i32)]
pub enum LogicErrorCode {
    ListExpected = 30410,
    AtomContentMustNotBeEmpty = 30440,
    FirstArgumentMustBeAnAtom = 30460,
    MoreThanOneArgumentExpected = 30470,
    ExactlyOneArgumentExpected = 30480,
    ExactlyTwoArgumentsExpected = 30490,
    ExactlyTwoOrThreeArgumentsExpected = 30500,
    SubjectVariableExpected = 30530,
    SubjectVariableAlreadyBoundInFormula = 30540,
    FreeSubjectVariableAlreadyBound = 30550,
    BoundSubjectVariableAlreadyFree = 30560,
    UnknownPredicateConstant = 30590,
    UnknownLogicalOperator = 30600,
    UnknownTermOperator = 30620,
    UnknownFunctionConstant = 30680,
    EqualityPredicateNotYetDefined = 30690,
    ClassOperatorStillUnknown = 30700,
    ExactlyTwoArgumentsForClassExpected = 30710,
    AtLeastOneArgumentExpected = 30720,
    IdentityOperatorTwoArgumentsExpected = 30730,
}

impl LogicErrorCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Fixed part of the message
    pub fn text(self) -> &'static str {
        match self {
            LogicErrorCode::ListExpected => "a list was expected, but an atom was found",
            LogicErrorCode::AtomContentMustNotBeEmpty => "atom content must not be empty",
            LogicErrorCode::FirstArgumentMustBeAnAtom => "first argument must be an atom",
            LogicErrorCode::MoreThanOneArgumentExpected => "more than one argument expected",
            LogicErrorCode::ExactlyOneArgumentExpected => "exactly one argument expected",
            LogicErrorCode::ExactlyTwoArgumentsExpected => "exactly two arguments expected",
            LogicErrorCode::ExactlyTwoOrThreeArgumentsExpected => {
                "exactly two or three arguments expected"
            }
            LogicErrorCode::SubjectVariableExpected => "subject variable expected",
            LogicErrorCode::SubjectVariableAlreadyBoundInFormula => {
                "subject variable is already bound in the formula"
            }
            LogicErrorCode::FreeSubjectVariableAlreadyBound => {
                "free subject variable is already bound in a previous argument"
            }
            LogicErrorCode::BoundSubjectVariableAlreadyFree => {
                "bound subject variable already occurs free in a previous argument"
            }
            LogicErrorCode::UnknownPredicateConstant => "unknown predicate constant",
            LogicErrorCode::UnknownLogicalOperator => "unknown logical operator",
            LogicErrorCode::UnknownTermOperator => "unknown term operator",
            LogicErrorCode::UnknownFunctionConstant => "unknown function constant",
            LogicErrorCode::EqualityPredicateNotYetDefined => {
                "the equality predicate is not yet defined"
            }
            LogicErrorCode::ClassOperatorStillUnknown => "the class operator is still unknown",
            LogicErrorCode::ExactlyTwoArgumentsForClassExpected => {
                "a class term needs exactly two arguments"
            }
            LogicErrorCode::AtLeastOneArgumentExpected => "at least one argument expected",
            LogicErrorCode::IdentityOperatorTwoArgumentsExpected => {
                "the identity operator takes exactly two arguments"
            }
        }
    }
}

impl fmt::Display for LogicErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// One problem found in a formula or term
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicDiagnostic {
    pub code: LogicErrorCode,
    pub message: String,
    pub element: LogicElement,
    pub context: ModuleContext,
}

impl LogicDiagnostic {
    pub fn new(code: LogicErrorCode, element: &LogicElement, context: &ModuleContext) -> Self {
        Self {
            code,
            message: code.text().to_string(),
            element: element.clone(),
            context: context.clone(),
        }
    }

    /// Append detail to the fixed message
    pub fn with_detail(mut self, detail: impl fmt::Display) -> Self {
        self.message = format!("{}: {}", self.message, detail);
        self
    }
}

impl fmt::Display for LogicDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} at {}", self.code, self.message, self.context)
    }
}

/// Collected diagnostics of one checker run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicDiagnostics {
    errors: Vec<LogicDiagnostic>,
}

impl LogicDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&mut self, diagnostic: LogicDiagnostic) {
        self.errors.push(diagnostic);
    }

    pub fn extend(&mut self, other: LogicDiagnostics) {
        self.errors.extend(other.errors);
    }

    pub fn errors(&self) -> &[LogicDiagnostic] {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Codes in reporting order
    pub fn codes(&self) -> Vec<i32> {
        self.errors.iter().map(|error| error.code.code()).collect()
    }

    pub fn contains(&self, code: LogicErrorCode) -> bool {
        self.errors.iter().any(|error| error.code == code)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, LogicDiagnostic> {
        self.errors.iter()
    }

    pub fn into_vec(self) -> Vec<LogicDiagnostic> {
        self.errors
    }
}

impl IntoIterator for LogicDiagnostics {
    type Item = LogicDiagnostic;
    type IntoIter = std::vec::IntoIter<LogicDiagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qedeq_logic::ModuleAddress;

    fn test_context() -> ModuleContext {
        ModuleContext::new(ModuleAddress::new("test/module.xml").unwrap())
    }

    #[test]
    fn test_reporter() {
        let mut diagnostics = LogicDiagnostics::new();
        assert!(!diagnostics.has_errors());

        let element = LogicElement::predicate_constant("in", vec![]);
        diagnostics.report(
            LogicDiagnostic::new(LogicErrorCode::UnknownPredicateConstant, &element, &test_context())
                .with_detail("in/0"),
        );

        assert!(diagnostics.has_errors());
        assert_eq!(diagnostics.codes(), vec![30590]);
        assert!(diagnostics.contains(LogicErrorCode::UnknownPredicateConstant));
        assert_eq!(
            diagnostics.errors()[0].to_string(),
            "[30590] unknown predicate constant: in/0 at test/module.xml"
        );
    }

    #[test]
    fn test_code_values() {
        assert_eq!(LogicErrorCode::AtLeastOneArgumentExpected.code(), 30720);
        assert_eq!(LogicErrorCode::UnknownPredicateConstant.code(), 30590);
    }

    #[test]
    fn test_serialization() {
        let element = LogicElement::atom("x");
        let diagnostic = LogicDiagnostic::new(LogicErrorCode::ListExpected, &element, &test_context());
        let json = serde_json::to_string(&diagnostic).unwrap();
        let back: LogicDiagnostic = serde_json::from_str(&json).unwrap();
        assert_eq!(back, diagnostic);
    }
}
