//! QEDEQ formula checker
//!
//! Checks formulas and terms for well-formedness: operator arities, the
//! shape of identifying atoms, existence of predicate and function
//! constants, and the scoping rule that no subject variable occurs both free
//! and bound. All problems are collected; checking never stops at the first.

pub mod checker;
pub mod error_reporting;
pub mod variables;

pub use checker::{Cancellation, FormulaChecker, Interrupted};
pub use error_reporting::{LogicDiagnostic, LogicDiagnostics, LogicErrorCode};
pub use variables::{bound_variables, free_variables, variables, VariableSet, VariableSets};

use qedeq_logic::{ExistenceChecker, LogicElement, ModuleContext};

/// Check a formula without cancellation
pub fn check_formula(
    element: &LogicElement,
    context: &ModuleContext,
    existence: &dyn ExistenceChecker,
) -> LogicDiagnostics {
    // No cancellation source, so this cannot be interrupted
    FormulaChecker::new(existence)
        .check_formula(element, context)
        .unwrap_or_default()
}

/// Check a term without cancellation
pub fn check_term(
    element: &LogicElement,
    context: &ModuleContext,
    existence: &dyn ExistenceChecker,
) -> LogicDiagnostics {
    FormulaChecker::new(existence)
        .check_term(element, context)
        .unwrap_or_default()
}
