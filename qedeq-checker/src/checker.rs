//! Recursive well-formedness checker for formulas and terms

use crate::error_reporting::{LogicDiagnostic, LogicDiagnostics, LogicErrorCode};
use crate::variables::{subject_variable_name, VariableSets};
use qedeq_logic::{
    ElementList, ExistenceChecker, LogicElement, ModuleContext, Operator, OperatorKind, PathSegment,
};
use thiserror::Error;
use tracing::trace;

/// Cooperative cancellation as seen by the checker
pub trait Cancellation {
    /// True once cancellation was requested; implementations may record
    /// that the request has been seen
    fn is_cancelled(&self) -> bool;
}

/// Checking stopped because cancellation was requested
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("checking was interrupted")]
pub struct Interrupted;

/// Checker configured with an existence capability and optional cancellation
pub struct FormulaChecker<'a> {
    existence: &'a dyn ExistenceChecker,
    cancellation: Option<&'a dyn Cancellation>,
}

impl<'a> FormulaChecker<'a> {
    pub fn new(existence: &'a dyn ExistenceChecker) -> Self {
        Self {
            existence,
            cancellation: None,
        }
    }

    pub fn with_cancellation(mut self, cancellation: &'a dyn Cancellation) -> Self {
        self.cancellation = Some(cancellation);
        self
    }

    /// Check `element` as a formula located at `context`
    pub fn check_formula(
        &self,
        element: &LogicElement,
        context: &ModuleContext,
    ) -> Result<LogicDiagnostics, Interrupted> {
        let mut run = CheckRun::new(self, context);
        run.formula(element)?;
        Ok(run.diagnostics)
    }

    /// Check `element` as a term located at `context`
    pub fn check_term(
        &self,
        element: &LogicElement,
        context: &ModuleContext,
    ) -> Result<LogicDiagnostics, Interrupted> {
        let mut run = CheckRun::new(self, context);
        run.term(element)?;
        Ok(run.diagnostics)
    }
}

/// State of one traversal
struct CheckRun<'c, 'a> {
    checker: &'c FormulaChecker<'a>,
    context: ModuleContext,
    diagnostics: LogicDiagnostics,
}

type Visit = Result<VariableSets, Interrupted>;

impl<'c, 'a> CheckRun<'c, 'a> {
    fn new(checker: &'c FormulaChecker<'a>, context: &ModuleContext) -> Self {
        Self {
            checker,
            context: context.clone(),
            diagnostics: LogicDiagnostics::new(),
        }
    }

    fn checkpoint(&self) -> Result<(), Interrupted> {
        match self.checker.cancellation {
            Some(cancellation) if cancellation.is_cancelled() => Err(Interrupted),
            _ => Ok(()),
        }
    }

    fn report(&mut self, code: LogicErrorCode, element: &LogicElement) {
        trace!(code = code.code(), context = %self.context, "logic diagnostic");
        self.diagnostics
            .report(LogicDiagnostic::new(code, element, &self.context));
    }

    fn report_detail(&mut self, code: LogicErrorCode, element: &LogicElement, detail: String) {
        trace!(code = code.code(), context = %self.context, "logic diagnostic");
        self.diagnostics
            .report(LogicDiagnostic::new(code, element, &self.context).with_detail(detail));
    }

    /// Run `visit` on child `index` with the location extended
    fn child<F>(&mut self, index: usize, element: &LogicElement, visit: F) -> Visit
    where
        F: FnOnce(&mut Self, &LogicElement) -> Visit,
    {
        self.context.push(PathSegment::Element(index));
        let result = visit(self, element);
        self.context.pop();
        result
    }

    fn formula(&mut self, element: &LogicElement) -> Visit {
        self.checkpoint()?;
        let list = match element {
            LogicElement::Atom(_) => {
                self.report(LogicErrorCode::ListExpected, element);
                return Ok(VariableSets::new());
            }
            LogicElement::List(list) => list,
        };

        match list.known_operator() {
            Some(op) if op.is_multi_connective() => {
                if list.len() < 2 {
                    self.report(LogicErrorCode::MoreThanOneArgumentExpected, element);
                }
                self.formula_arguments(list, 0)
            }
            Some(Operator::Implication) => {
                if list.len() != 2 {
                    self.report(LogicErrorCode::ExactlyTwoArgumentsExpected, element);
                }
                self.formula_arguments(list, 0)
            }
            Some(Operator::Negation) => {
                if list.len() != 1 {
                    self.report(LogicErrorCode::ExactlyOneArgumentExpected, element);
                }
                self.formula_arguments(list, 0)
            }
            Some(op) if op.is_quantifier() => self.quantifier(element, list),
            Some(Operator::PredicateVariable) => self.predicate(element, list, false),
            Some(Operator::PredicateConstant) => self.predicate(element, list, true),
            Some(op) => {
                debug_assert_eq!(op.kind(), OperatorKind::Term);
                self.report_detail(
                    LogicErrorCode::UnknownLogicalOperator,
                    element,
                    format!("term operator {op} in formula position"),
                );
                Ok(VariableSets::new())
            }
            None => {
                self.report_detail(
                    LogicErrorCode::UnknownLogicalOperator,
                    element,
                    list.operator.clone(),
                );
                Ok(VariableSets::new())
            }
        }
    }

    fn term(&mut self, element: &LogicElement) -> Visit {
        self.checkpoint()?;
        let list = match element {
            LogicElement::Atom(_) => {
                self.report(LogicErrorCode::ListExpected, element);
                return Ok(VariableSets::new());
            }
            LogicElement::List(list) => list,
        };

        match list.known_operator() {
            Some(Operator::SubjectVariable) => self.subject_variable(element, list),
            Some(Operator::FunctionVariable) => self.function(element, list, false),
            Some(Operator::FunctionConstant) => self.function(element, list, true),
            Some(Operator::Class) => self.class(element, list),
            Some(op) => {
                self.report_detail(
                    LogicErrorCode::UnknownTermOperator,
                    element,
                    format!("formula operator {op} in term position"),
                );
                Ok(VariableSets::new())
            }
            None => {
                self.report_detail(
                    LogicErrorCode::UnknownTermOperator,
                    element,
                    list.operator.clone(),
                );
                Ok(VariableSets::new())
            }
        }
    }

    fn subject_variable(&mut self, element: &LogicElement, list: &ElementList) -> Visit {
        if list.len() != 1 {
            self.report(LogicErrorCode::ExactlyOneArgumentExpected, element);
            return Ok(VariableSets::new());
        }
        match self.identifying_atom(element, list) {
            Some(name) => Ok(VariableSets::free_variable(name)),
            None => Ok(VariableSets::new()),
        }
    }

    /// Validate the first argument as a non-empty atom and return it
    fn identifying_atom<'e>(
        &mut self,
        element: &'e LogicElement,
        list: &'e ElementList,
    ) -> Option<&'e str> {
        match list.get(0) {
            None => {
                self.report(LogicErrorCode::AtLeastOneArgumentExpected, element);
                None
            }
            Some(LogicElement::List(_)) => {
                self.report(LogicErrorCode::FirstArgumentMustBeAnAtom, element);
                None
            }
            Some(LogicElement::Atom(name)) if name.trim().is_empty() => {
                self.report(LogicErrorCode::AtomContentMustNotBeEmpty, element);
                None
            }
            Some(LogicElement::Atom(name)) => Some(name.as_str()),
        }
    }

    fn predicate(&mut self, element: &LogicElement, list: &ElementList, constant: bool) -> Visit {
        let name = self.identifying_atom(element, list);
        let arity = list.len().saturating_sub(1);
        let sets = self.term_arguments(list, 1)?;

        if constant {
            if let Some(name) = name {
                let existence = self.checker.existence;
                if name == existence.identity_operator() {
                    if !existence.identity_operator_exists() {
                        self.report_detail(
                            LogicErrorCode::EqualityPredicateNotYetDefined,
                            element,
                            name.to_string(),
                        );
                    } else if arity != 2 {
                        self.report_detail(
                            LogicErrorCode::IdentityOperatorTwoArgumentsExpected,
                            element,
                            format!("{name} with {arity} arguments"),
                        );
                    }
                } else if !existence.predicate_exists(name, arity) {
                    self.report_detail(
                        LogicErrorCode::UnknownPredicateConstant,
                        element,
                        format!("{name}/{arity}"),
                    );
                }
            }
        }
        Ok(sets)
    }

    fn function(&mut self, element: &LogicElement, list: &ElementList, constant: bool) -> Visit {
        let name = self.identifying_atom(element, list);
        let arity = list.len().saturating_sub(1);
        if !constant && !list.is_empty() && arity == 0 {
            // A function variable without arguments would be a subject variable
            self.report(LogicErrorCode::MoreThanOneArgumentExpected, element);
        }
        let sets = self.term_arguments(list, 1)?;

        if constant {
            if let Some(name) = name {
                if !self.checker.existence.function_exists(name, arity) {
                    self.report_detail(
                        LogicErrorCode::UnknownFunctionConstant,
                        element,
                        format!("{name}/{arity}"),
                    );
                }
            }
        }
        Ok(sets)
    }

    fn quantifier(&mut self, element: &LogicElement, list: &ElementList) -> Visit {
        if list.len() != 2 && list.len() != 3 {
            self.report(LogicErrorCode::ExactlyTwoOrThreeArgumentsExpected, element);
        }
        self.binder(list)
    }

    fn class(&mut self, element: &LogicElement, list: &ElementList) -> Visit {
        if list.len() != 2 {
            self.report(LogicErrorCode::ExactlyTwoArgumentsForClassExpected, element);
        }
        if !self.checker.existence.class_operator_exists() {
            self.report(LogicErrorCode::ClassOperatorStillUnknown, element);
        }
        self.binder(list)
    }

    /// First argument a subject variable, the others formulas in its scope
    fn binder(&mut self, list: &ElementList) -> Visit {
        let Some(first) = list.get(0) else {
            return Ok(VariableSets::new());
        };

        let variable = if first.is_subject_variable() {
            self.child(0, first, |run, e| run.term(e))?;
            subject_variable_name(first)
        } else {
            self.context.push(PathSegment::Element(0));
            self.report(LogicErrorCode::SubjectVariableExpected, first);
            self.context.pop();
            None
        };

        let mut scope = Vec::with_capacity(list.len().saturating_sub(1));
        for (index, argument) in list.elements.iter().enumerate().skip(1) {
            let sets = self.child(index, argument, |run, e| run.formula(e))?;
            if let Some(variable) = variable {
                if sets.bound.contains(variable) {
                    self.context.push(PathSegment::Element(index));
                    self.report_detail(
                        LogicErrorCode::SubjectVariableAlreadyBoundInFormula,
                        argument,
                        variable.to_string(),
                    );
                    self.context.pop();
                }
            }
            scope.push((index, argument, sets));
        }

        // The bound variable itself may be shared by restriction and formula
        let combined = self.merge_siblings(scope.into_iter().map(|(index, argument, sets)| {
            let sets = match variable {
                Some(variable) => VariableSets {
                    free: sets.free.without(variable),
                    bound: sets.bound.without(variable),
                },
                None => sets,
            };
            (index, argument, sets)
        }));

        Ok(match variable {
            Some(variable) => combined.bind(variable),
            None => combined,
        })
    }

    fn formula_arguments(&mut self, list: &ElementList, start: usize) -> Visit {
        let mut children = Vec::with_capacity(list.len());
        for (index, argument) in list.elements.iter().enumerate().skip(start) {
            let sets = self.child(index, argument, |run, e| run.formula(e))?;
            children.push((index, argument, sets));
        }
        Ok(self.merge_siblings(children.into_iter()))
    }

    fn term_arguments(&mut self, list: &ElementList, start: usize) -> Visit {
        let mut children = Vec::with_capacity(list.len());
        for (index, argument) in list.elements.iter().enumerate().skip(start) {
            let sets = self.child(index, argument, |run, e| run.term(e))?;
            children.push((index, argument, sets));
        }
        Ok(self.merge_siblings(children.into_iter()))
    }

    /// Union sibling sets, reporting variables free in one sibling and bound
    /// in another
    fn merge_siblings<'e, I>(&mut self, children: I) -> VariableSets
    where
        I: Iterator<Item = (usize, &'e LogicElement, VariableSets)>,
    {
        let mut merged = VariableSets::new();
        for (index, argument, sets) in children {
            let newly_free_but_bound = sets.free.clone().intersection(merged.bound.clone());
            let newly_bound_but_free = sets.bound.clone().intersection(merged.free.clone());
            if !newly_free_but_bound.is_empty() || !newly_bound_but_free.is_empty() {
                self.context.push(PathSegment::Element(index));
                for variable in newly_free_but_bound.iter() {
                    self.report_detail(
                        LogicErrorCode::FreeSubjectVariableAlreadyBound,
                        argument,
                        variable.clone(),
                    );
                }
                for variable in newly_bound_but_free.iter() {
                    self.report_detail(
                        LogicErrorCode::BoundSubjectVariableAlreadyFree,
                        argument,
                        variable.clone(),
                    );
                }
                self.context.pop();
            }
            merged = merged.union(sets);
        }
        merged
    }
}
