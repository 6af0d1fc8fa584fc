//! Structured diagnostics shared by resolver and well-formedness service

use qedeq_checker::LogicDiagnostic;
use qedeq_logic::{LogicElement, ModuleContext};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes raised by the kernel itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum KernelErrorCode {
    RecursiveImportForbidden = 31200,
    ImportOfModuleFailed = 31210,
    ImportUnreachable = 31220,
    ModuleLoadFailed = 31230,
    RequiredModuleNotWellFormed = 31300,
    PredicateAlreadyDefined = 31310,
    FunctionAlreadyDefined = 31320,
}

impl KernelErrorCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn text(self) -> &'static str {
        match self {
            KernelErrorCode::RecursiveImportForbidden => "recursive import forbidden",
            KernelErrorCode::ImportOfModuleFailed => "import of module failed",
            KernelErrorCode::ImportUnreachable => "imported module could not be loaded",
            KernelErrorCode::ModuleLoadFailed => "module could not be loaded",
            KernelErrorCode::RequiredModuleNotWellFormed => "required module is not well formed",
            KernelErrorCode::PredicateAlreadyDefined => "predicate constant already defined",
            KernelErrorCode::FunctionAlreadyDefined => "function constant already defined",
        }
    }
}

/// One problem found in a module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub code: i32,
    pub message: String,
    pub element: Option<LogicElement>,
    pub context: ModuleContext,
    pub reference_context: Option<ModuleContext>,
}

impl Diagnostic {
    pub fn new(code: KernelErrorCode, message: impl fmt::Display, context: ModuleContext) -> Self {
        Self {
            code: code.code(),
            message: format!("{}: {}", code.text(), message),
            element: None,
            context,
            reference_context: None,
        }
    }

    /// Point at a second location, usually inside another module
    pub fn with_reference(mut self, reference: ModuleContext) -> Self {
        self.reference_context = Some(reference);
        self
    }

    pub fn with_element(mut self, element: LogicElement) -> Self {
        self.element = Some(element);
        self
    }

    pub fn is(&self, code: KernelErrorCode) -> bool {
        self.code == code.code()
    }
}

impl From<LogicDiagnostic> for Diagnostic {
    fn from(diagnostic: LogicDiagnostic) -> Self {
        Self {
            code: diagnostic.code.code(),
            message: diagnostic.message,
            element: Some(diagnostic.element),
            context: diagnostic.context,
            reference_context: None,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} at {}", self.code, self.message, self.context)?;
        if let Some(reference) = &self.reference_context {
            write!(f, " (see {reference})")?;
        }
        Ok(())
    }
}

/// Ordered diagnostics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticList {
    diagnostics: Vec<Diagnostic>,
}

impl DiagnosticList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    pub fn extend(&mut self, other: impl IntoIterator<Item = Diagnostic>) {
        self.diagnostics.extend(other);
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Diagnostic> {
        self.diagnostics.iter()
    }

    pub fn codes(&self) -> Vec<i32> {
        self.diagnostics.iter().map(|d| d.code).collect()
    }

    /// Number of diagnostics with `code`
    pub fn count(&self, code: KernelErrorCode) -> usize {
        self.diagnostics.iter().filter(|d| d.is(code)).count()
    }

    pub fn contains(&self, code: KernelErrorCode) -> bool {
        self.count(code) > 0
    }

    /// Diagnostics raised against `address`
    pub fn for_module<'a>(
        &'a self,
        address: &'a qedeq_logic::ModuleAddress,
    ) -> impl Iterator<Item = &'a Diagnostic> + 'a {
        self.diagnostics
            .iter()
            .filter(move |d| &d.context.address == address)
    }
}

impl IntoIterator for DiagnosticList {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.diagnostics.into_iter()
    }
}

impl<'a> IntoIterator for &'a DiagnosticList {
    type Item = &'a Diagnostic;
    type IntoIter = std::slice::Iter<'a, Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.diagnostics.iter()
    }
}

impl FromIterator<Diagnostic> for DiagnosticList {
    fn from_iter<I: IntoIterator<Item = Diagnostic>>(iter: I) -> Self {
        Self {
            diagnostics: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for DiagnosticList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for diagnostic in &self.diagnostics {
            writeln!(f, "{diagnostic}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qedeq_checker::LogicErrorCode;
    use qedeq_logic::{ModuleAddress, PathSegment};

    fn context(address: &str) -> ModuleContext {
        ModuleContext::new(ModuleAddress::new(address).unwrap())
    }

    #[test]
    fn test_kernel_diagnostic() {
        let diagnostic = Diagnostic::new(
            KernelErrorCode::ImportUnreachable,
            "label `base`",
            context("a/main.xml").child(PathSegment::Header),
        )
        .with_reference(context("a/base.xml"));

        assert_eq!(diagnostic.code, 31220);
        assert!(diagnostic.is(KernelErrorCode::ImportUnreachable));
        assert_eq!(
            diagnostic.to_string(),
            "[31220] imported module could not be loaded: label `base` at a/main.xml#header (see a/base.xml)"
        );
    }

    #[test]
    fn test_from_logic_diagnostic() {
        let element = LogicElement::atom("x");
        let logic = LogicDiagnostic::new(LogicErrorCode::ListExpected, &element, &context("m.xml"));
        let diagnostic = Diagnostic::from(logic);
        assert_eq!(diagnostic.code, 30410);
        assert_eq!(diagnostic.element, Some(element));
    }

    #[test]
    fn test_list_counts() {
        let list: DiagnosticList = [
            Diagnostic::new(KernelErrorCode::ImportOfModuleFailed, "a", context("a.xml")),
            Diagnostic::new(KernelErrorCode::ImportOfModuleFailed, "b", context("b.xml")),
            Diagnostic::new(KernelErrorCode::RecursiveImportForbidden, "c", context("a.xml")),
        ]
        .into_iter()
        .collect();

        assert_eq!(list.len(), 3);
        assert_eq!(list.count(KernelErrorCode::ImportOfModuleFailed), 2);
        assert!(!list.contains(KernelErrorCode::ModuleLoadFailed));
        let a = ModuleAddress::new("a.xml").unwrap();
        assert_eq!(list.for_module(&a).count(), 2);
    }
}
