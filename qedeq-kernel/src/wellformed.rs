//! Well-formedness service
//!
//! Checks every formula and term of a resolved module. The modules it
//! requires are visited first, in post-order of the import graph, so a
//! module's verdict only depends on verdicts already computed. For each
//! module the required verdicts are consulted (logic state
//! `ExternalChecking`); then the document is walked in order
//! (`InternalChecking`) with a [`ModuleExistenceChecker`] that learns each
//! definition after checking it.

use crate::diagnostics::{Diagnostic, DiagnosticList, KernelErrorCode};
use crate::existence::ModuleExistenceChecker;
use crate::module::Module;
use crate::registry::{ModuleRegistry, RegistryError};
use crate::resolver::{DependencyResolver, ResolveError};
use crate::service::{CallContext, CallError, CallGuard, ServiceKind, ServiceResult};
use crate::state::{DependencyState, LogicState, StateError};
use qedeq_checker::{FormulaChecker, Interrupted, LogicDiagnostics};
use qedeq_logic::{
    ExistenceChecker, ModuleAddress, ModuleContext, ModuleDocument, NodeKind, PathSegment,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum WellFormedError {
    #[error("{address} has unresolved dependencies ({state})")]
    NotRequiredLoaded {
        address: ModuleAddress,
        state: DependencyState,
        diagnostics: DiagnosticList,
    },

    #[error("{address} is not well formed: {} errors", .diagnostics.len())]
    NotWellFormed {
        address: ModuleAddress,
        diagnostics: DiagnosticList,
    },

    #[error("checking was interrupted")]
    Interrupted,

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl WellFormedError {
    pub fn diagnostics(&self) -> Option<&DiagnosticList> {
        match self {
            WellFormedError::NotRequiredLoaded { diagnostics, .. }
            | WellFormedError::NotWellFormed { diagnostics, .. } => Some(diagnostics),
            _ => None,
        }
    }
}

impl From<Interrupted> for WellFormedError {
    fn from(_: Interrupted) -> Self {
        WellFormedError::Interrupted
    }
}

/// Result of checking one module
#[derive(Clone)]
enum Verdict {
    WellFormed(Arc<ModuleExistenceChecker>),
    Failed,
}

enum Claim {
    Owned,
    Shadow,
    Settled,
}

pub struct WellFormedService<'r> {
    registry: &'r ModuleRegistry,
}

impl<'r> WellFormedService<'r> {
    pub fn new(registry: &'r ModuleRegistry) -> Self {
        Self { registry }
    }

    /// Resolve `address`, then check it and everything it requires
    pub fn check(&self, ctx: &CallContext<'_>, address: &ModuleAddress) -> Result<(), WellFormedError> {
        let module = self.registry.get_or_create(address)?;
        match DependencyResolver::new(self.registry).resolve(ctx, address) {
            Ok(()) => {}
            Err(ResolveError::Interrupted) => return Err(WellFormedError::Interrupted),
            Err(ResolveError::Registry(error)) => return Err(error.into()),
            Err(ResolveError::Failed { diagnostics, .. }) => {
                return Err(WellFormedError::NotRequiredLoaded {
                    address: address.clone(),
                    state: module.dependency_state(),
                    diagnostics,
                })
            }
        }

        let mut pass = CheckPass {
            registry: self.registry,
            ctx,
            verdicts: HashMap::new(),
            results: HashMap::new(),
        };
        let verdict = match pass.run(&module) {
            Ok(verdict) => verdict,
            Err(CallError::Interrupted(_)) => return Err(WellFormedError::Interrupted),
            Err(error @ CallError::DepthExceeded { .. }) => {
                warn!(%address, %error, "well-formedness check aborted");
                Verdict::Failed
            }
        };

        match verdict {
            Verdict::WellFormed(_) => {
                info!(%address, modules = pass.verdicts.len(), "module is well formed");
                Ok(())
            }
            Verdict::Failed => {
                let diagnostics = pass
                    .results
                    .remove(address)
                    .unwrap_or_else(|| module.errors(ServiceKind::WellFormedCheck));
                Err(WellFormedError::NotWellFormed {
                    address: address.clone(),
                    diagnostics,
                })
            }
        }
    }
}

struct CheckPass<'p, 'c> {
    registry: &'p ModuleRegistry,
    ctx: &'p CallContext<'c>,
    verdicts: HashMap<ModuleAddress, Verdict>,
    results: HashMap<ModuleAddress, DiagnosticList>,
}

impl CheckPass<'_, '_> {
    fn run(&mut self, root: &Arc<Module>) -> Result<Verdict, CallError> {
        for module in self.order(root)? {
            self.visit(&module)?;
        }
        Ok(self
            .verdicts
            .get(root.address())
            .cloned()
            .unwrap_or(Verdict::Failed))
    }

    /// `root` and its required modules, every module after those it requires
    fn order(&self, root: &Arc<Module>) -> Result<Vec<Arc<Module>>, Interrupted> {
        let mut order = Vec::new();
        let mut seen = HashSet::new();
        let mut work = vec![(root.clone(), false)];
        while let Some((module, expanded)) = work.pop() {
            if expanded {
                order.push(module);
                continue;
            }
            self.ctx.checkpoint()?;
            if !seen.insert(module.address().clone()) {
                continue;
            }
            let required = module.required();
            work.push((module, true));
            work.extend(required.into_iter().rev().map(|edge| (edge.module, false)));
        }
        Ok(order)
    }

    fn visit(&mut self, module: &Arc<Module>) -> Result<(), CallError> {
        self.ctx.checkpoint()?;
        let address = module.address().clone();
        let call = self.ctx.enter(ServiceKind::WellFormedCheck, &address)?;
        match self.visit_entered(module, &call) {
            Ok(verdict) => {
                call.finish(match verdict {
                    Verdict::WellFormed(_) => ServiceResult::Ok,
                    Verdict::Failed => ServiceResult::Failed(format!("{address} is not well formed")),
                });
                self.verdicts.insert(address, verdict);
                Ok(())
            }
            Err(error) => {
                call.finish(match &error {
                    CallError::Interrupted(_) => ServiceResult::Interrupted,
                    error => ServiceResult::Failed(error.to_string()),
                });
                Err(error)
            }
        }
    }

    fn claim(&self, module: &Module) -> Result<Claim, StateError> {
        self.ctx.update(module, |w| match w.state().logic {
            LogicState::WellFormed => Ok(Claim::Settled),
            LogicState::ExternalChecking | LogicState::InternalChecking => Ok(Claim::Shadow),
            state => {
                if state.is_failed() {
                    w.set_logic(LogicState::Unchecked)?;
                }
                w.set_logic(LogicState::ExternalChecking)?;
                Ok(Claim::Owned)
            }
        })
    }

    fn visit_entered(&mut self, module: &Arc<Module>, call: &CallGuard<'_>) -> Result<Verdict, CallError> {
        let address = module.address().clone();
        let (Some(document), DependencyState::RequiredLoaded) =
            (module.document(), module.dependency_state())
        else {
            debug!(%address, "module not resolved, skipping check");
            return Ok(Verdict::Failed);
        };

        let owned = match self.claim(module) {
            Ok(Claim::Owned) => true,
            Ok(Claim::Shadow) => false,
            Ok(Claim::Settled) => {
                let Ok(imports) = self.required_checkers(module, &document, call) else {
                    return Ok(Verdict::Failed);
                };
                let checker =
                    ModuleExistenceChecker::from_document(self.registry.config(), &document, imports);
                return Ok(Verdict::WellFormed(Arc::new(checker)));
            }
            Err(error) => {
                warn!(%address, %error, "logic transition rejected");
                return Ok(Verdict::Failed);
            }
        };

        let outcome = self.check_owned(module, &document, owned, call);
        if outcome.is_err() && owned {
            // interrupted, nothing is kept
            if let Err(error) = self.ctx.update(module, |w| w.set_logic(LogicState::Unchecked)) {
                warn!(%address, %error, "rollback rejected");
            }
        }
        outcome
    }

    fn check_owned(
        &mut self,
        module: &Arc<Module>,
        document: &ModuleDocument,
        owned: bool,
        call: &CallGuard<'_>,
    ) -> Result<Verdict, CallError> {
        let address = module.address().clone();
        let imports = match self.required_checkers(module, document, call) {
            Ok(imports) => imports,
            Err(diagnostics) => {
                if owned {
                    self.write(module, diagnostics.clone(), LogicState::ExternalCheckingFailed);
                }
                self.results.insert(address, diagnostics);
                return Ok(Verdict::Failed);
            }
        };
        if owned {
            self.write(module, DiagnosticList::new(), LogicState::InternalChecking);
        }

        let mut checker = ModuleExistenceChecker::new(self.registry.config());
        for (label, imported) in imports {
            checker.add_import(label, imported);
        }
        let diagnostics = self.check_nodes(&address, document, &mut checker, call)?;

        let verdict = if diagnostics.is_empty() {
            Verdict::WellFormed(Arc::new(checker))
        } else {
            warn!(%address, errors = diagnostics.len(), "module is not well formed");
            Verdict::Failed
        };
        if owned {
            let next = match verdict {
                Verdict::WellFormed(_) => LogicState::WellFormed,
                Verdict::Failed => LogicState::NotWellFormed,
            };
            self.write(module, diagnostics.clone(), next);
        }
        self.results.insert(address, diagnostics);
        Ok(verdict)
    }

    /// Checkers of all required modules, or the diagnostics for those that failed
    fn required_checkers(
        &self,
        module: &Arc<Module>,
        document: &ModuleDocument,
        call: &CallGuard<'_>,
    ) -> Result<Vec<(String, Arc<ModuleExistenceChecker>)>, DiagnosticList> {
        let context = ModuleContext::new(module.address().clone());
        let required = module.required();
        let count = required.len().max(1) as f64;
        let mut checkers = Vec::with_capacity(required.len());
        let mut diagnostics = DiagnosticList::new();

        for (position, edge) in required.iter().enumerate() {
            call.set_progress(
                20.0 * position as f64 / count,
                format_args!("checking required module {}", edge.label),
            );
            match self.verdicts.get(edge.address()) {
                Some(Verdict::WellFormed(checker)) => {
                    checkers.push((edge.label.clone(), checker.clone()))
                }
                // failed, or not checked before its dependent because of a cycle
                Some(Verdict::Failed) | None => {
                    let index = document
                        .imports()
                        .iter()
                        .position(|spec| spec.label == edge.label)
                        .unwrap_or(position);
                    diagnostics.push(
                        Diagnostic::new(
                            KernelErrorCode::RequiredModuleNotWellFormed,
                            format!("`{}`", edge.label),
                            context
                                .child(PathSegment::Header)
                                .child(PathSegment::Import(index)),
                        )
                        .with_reference(ModuleContext::new(edge.address().clone())),
                    );
                }
            }
        }
        if diagnostics.is_empty() {
            Ok(checkers)
        } else {
            Err(diagnostics)
        }
    }

    fn check_nodes(
        &self,
        address: &ModuleAddress,
        document: &ModuleDocument,
        existence: &mut ModuleExistenceChecker,
        call: &CallGuard<'_>,
    ) -> Result<DiagnosticList, Interrupted> {
        let mut diagnostics = DiagnosticList::new();
        let count = document.node_count().max(1) as f64;

        for (position, node) in document.nodes().enumerate() {
            call.set_progress(
                20.0 + 80.0 * position as f64 / count,
                format_args!("checking {} {}", node.node.kind.kind_name(), node.node.id),
            );
            let context = ModuleContext::at(address.clone(), node.location());
            let field = |name: &str| context.child(PathSegment::Field(name.to_string()));
            let found = {
                let checker = FormulaChecker::new(&*existence).with_cancellation(self.ctx.token());
                match &node.node.kind {
                    NodeKind::Axiom { formula } | NodeKind::Proposition { formula } => {
                        checker.check_formula(formula, &field("formula"))?
                    }
                    NodeKind::PredicateDefinition { formula, .. } => {
                        checker.check_formula(formula, &field("formula"))?
                    }
                    NodeKind::FunctionDefinition { term, .. } => {
                        checker.check_term(term, &field("term"))?
                    }
                    _ => LogicDiagnostics::new(),
                }
            };
            diagnostics.extend(found.into_vec().into_iter().map(Diagnostic::from));

            match &node.node.kind {
                NodeKind::InitialPredicateDefinition { name, arity, .. }
                | NodeKind::PredicateDefinition { name, arity, .. } => {
                    if existence.predicate_exists(name, *arity) {
                        diagnostics.push(Diagnostic::new(
                            KernelErrorCode::PredicateAlreadyDefined,
                            format!("{name}/{arity}"),
                            field("name"),
                        ));
                    } else {
                        existence.define_predicate(name, *arity);
                    }
                }
                NodeKind::InitialFunctionDefinition { name, arity, .. }
                | NodeKind::FunctionDefinition { name, arity, .. } => {
                    if existence.function_exists(name, *arity) {
                        diagnostics.push(Diagnostic::new(
                            KernelErrorCode::FunctionAlreadyDefined,
                            format!("{name}/{arity}"),
                            field("name"),
                        ));
                    } else {
                        existence.define_function(name, *arity);
                    }
                }
                _ => {}
            }
        }
        Ok(diagnostics)
    }

    fn write(&self, module: &Module, diagnostics: DiagnosticList, next: LogicState) {
        let result = self.ctx.update(module, |w| {
            w.set_errors(ServiceKind::WellFormedCheck, diagnostics);
            w.set_logic(next)
        });
        if let Err(error) = result {
            warn!(address = %module.address(), %error, "logic transition rejected");
        }
    }
}
