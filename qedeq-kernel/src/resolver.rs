//! Dependency resolver
//!
//! Resolving a module loads its document, then the documents of its imports,
//! and finally resolves every import the same way. Each top-level call is one
//! *pass*. A pass keeps a stack of frames for the modules it is currently
//! inside, each with the label it was entered by, and a memo of modules it
//! already finished, so every module is visited at most once per pass. The
//! stack lives on the heap; import chains of any length are walked in a loop.
//!
//! Cycles are found when an import points back into the stack. The cycle is
//! reported once, as `RecursiveImportForbidden` at the module the back edge
//! points to, with every label of the cycle in order. The modules on the way
//! report `ImportOfModuleFailed` for their import on the cycle. Any other
//! failure travels upwards as `ImportOfModuleFailed`, its message chaining
//! the labels down to the original cause.
//!
//! A module is *owned* by the pass that moved its dependency state out of
//! `Undefined`; only the owner writes its state, edges and errors. A pass
//! meeting a module owned by another process computes the outcome on its
//! own without writing anything, so no process ever waits for another
//! process' resolution.

use crate::diagnostics::{Diagnostic, DiagnosticList, KernelErrorCode};
use crate::loader::LoadError;
use crate::module::{Module, ModuleReference};
use crate::registry::{ModuleRegistry, RegistryError};
use crate::service::{CallContext, CallError, CallGuard, ServiceKind, ServiceResult};
use crate::state::{DependencyState, LoadingState, LogicState, ResetReason, StateError};
use qedeq_checker::Interrupted;
use qedeq_logic::{ModuleAddress, ModuleContext, ModuleDocument, PathSegment};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("resolution of {address} failed with {} errors", .diagnostics.len())]
    Failed {
        address: ModuleAddress,
        diagnostics: DiagnosticList,
    },

    #[error("resolution was interrupted")]
    Interrupted,

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl ResolveError {
    /// Diagnostics of the requested module, empty unless resolution failed
    pub fn diagnostics(&self) -> Option<&DiagnosticList> {
        match self {
            ResolveError::Failed { diagnostics, .. } => Some(diagnostics),
            _ => None,
        }
    }
}

impl From<Interrupted> for ResolveError {
    fn from(_: Interrupted) -> Self {
        ResolveError::Interrupted
    }
}

/// Cycle that is still open, its root being on the stack
#[derive(Debug, Clone)]
struct OpenCycle {
    root: ModuleAddress,
    // labels from the module holding this outcome down to the back edge
    tail: Vec<String>,
}

/// What a visited module means for the modules above it
#[derive(Debug, Clone, Default)]
struct Outcome {
    /// Failed for reasons other than open cycles
    cause: Option<String>,
    cycles: Vec<OpenCycle>,
}

impl Outcome {
    fn loaded() -> Self {
        Self::default()
    }

    fn failed(cause: impl Into<String>) -> Self {
        Self {
            cause: Some(cause.into()),
            cycles: Vec::new(),
        }
    }

    fn is_loaded(&self) -> bool {
        self.cause.is_none() && self.cycles.is_empty()
    }
}

/// Diagnostics and outcome collected while visiting one module
#[derive(Default)]
struct Findings {
    diagnostics: DiagnosticList,
    cause: Option<String>,
    cycles: Vec<OpenCycle>,
}

impl Findings {
    /// Record a diagnostic that makes the module fail
    fn fail(&mut self, diagnostic: Diagnostic, cause: String) {
        self.diagnostics.push(diagnostic);
        self.cause.get_or_insert(cause);
    }
}

enum Claim {
    /// This pass writes the module
    Owned,
    /// Another process is working on the module
    Shadow,
    /// Resolved already
    Loaded,
}

pub struct DependencyResolver<'r> {
    registry: &'r ModuleRegistry,
}

impl<'r> DependencyResolver<'r> {
    pub fn new(registry: &'r ModuleRegistry) -> Self {
        Self { registry }
    }

    /// Resolve `address` and its transitive imports
    pub fn resolve(&self, ctx: &CallContext<'_>, address: &ModuleAddress) -> Result<(), ResolveError> {
        let module = self.registry.get_or_create(address)?;
        let mut pass = Pass {
            registry: self.registry,
            ctx,
            start: self.registry.next_epoch(),
            stack: Vec::new(),
            memo: HashMap::new(),
            loads: HashMap::new(),
            results: HashMap::new(),
        };

        if let Err(failure) = pass.ensure_loaded(&module) {
            return match failure {
                LoadFailure::Interrupted => Err(ResolveError::Interrupted),
                LoadFailure::Failed(_) => Err(ResolveError::Failed {
                    address: address.clone(),
                    diagnostics: module.errors(ServiceKind::LoadModule),
                }),
            };
        }

        let label = address.name().to_string();
        let outcome = match pass.run(&module, &label) {
            Ok(outcome) => outcome,
            Err(CallError::Interrupted(_)) => return Err(ResolveError::Interrupted),
            Err(CallError::DepthExceeded { max }) => {
                Outcome::failed(format!("call depth {max} exceeded"))
            }
        };

        info!(
            %address,
            modules = pass.memo.len(),
            loaded = outcome.is_loaded(),
            "dependency pass finished"
        );
        if outcome.is_loaded() {
            Ok(())
        } else {
            let diagnostics = pass
                .results
                .remove(address)
                .unwrap_or_else(|| module.errors(ServiceKind::LoadRequiredModules));
            Err(ResolveError::Failed {
                address: address.clone(),
                diagnostics,
            })
        }
    }
}

enum LoadFailure {
    Failed(String),
    Interrupted,
}

struct Pass<'p, 'c> {
    registry: &'p ModuleRegistry,
    ctx: &'p CallContext<'c>,
    start: u64,
    // modules currently entered, innermost last
    stack: Vec<Frame<'c>>,
    memo: HashMap<ModuleAddress, Outcome>,
    loads: HashMap<ModuleAddress, Result<(), String>>,
    // diagnostics computed per module, written or not
    results: HashMap<ModuleAddress, DiagnosticList>,
}

/// Loaded import waiting for the required phase
#[derive(Clone)]
struct PendingImport {
    index: usize,
    label: String,
    target: Arc<Module>,
}

/// Module whose required phase is running
struct Frame<'c> {
    module: Arc<Module>,
    address: ModuleAddress,
    // label the module was entered by
    label: String,
    owned: bool,
    call: CallGuard<'c>,
    context: ModuleContext,
    findings: Findings,
    pending: Vec<PendingImport>,
    next: usize,
    current: Option<PendingImport>,
}

impl Frame<'_> {
    /// Move on to the next import, if any is left
    fn advance(&mut self) -> Option<PendingImport> {
        let import = self.pending.get(self.next)?.clone();
        let count = self.pending.len() as f64;
        self.call.set_progress(
            50.0 + 50.0 * self.next as f64 / count,
            format_args!("resolving import {}", import.label),
        );
        self.next += 1;
        self.current = Some(import.clone());
        Some(import)
    }

    /// The current import points back into the stack
    fn record_cycle(&mut self, self_import: bool) {
        let Some(import) = self.current.take() else {
            return;
        };
        let target = import.target.address();
        let import_context = import_context(&self.context, import.index);
        let reference = ModuleContext::new(target.clone());
        if self_import {
            let message = format!("`{}`", import.label);
            self.findings.fail(
                Diagnostic::new(KernelErrorCode::RecursiveImportForbidden, &message, import_context)
                    .with_reference(reference),
                format!("recursive import {message}"),
            );
        } else {
            self.findings.diagnostics.push(
                Diagnostic::new(
                    KernelErrorCode::ImportOfModuleFailed,
                    format!("{}: recursive import of {}", import.label, target),
                    import_context,
                )
                .with_reference(reference),
            );
            self.findings.cycles.push(OpenCycle {
                root: target.clone(),
                tail: vec![import.label],
            });
        }
    }

    /// Take over the outcome of the current import
    fn absorb(&mut self, child: Outcome) {
        let Some(import) = self.current.take() else {
            return;
        };
        let target = import.target.address();
        let import_context = import_context(&self.context, import.index);
        let reference = ModuleContext::new(target.clone());

        let mut on_cycle: Option<ModuleAddress> = None;
        for cycle in child.cycles {
            let mut labels = Vec::with_capacity(cycle.tail.len() + 1);
            labels.push(import.label.clone());
            labels.extend(cycle.tail);
            if cycle.root == self.address {
                let message = labels
                    .iter()
                    .map(|label| format!("`{label}`"))
                    .collect::<Vec<_>>()
                    .join(" -> ");
                self.findings.fail(
                    Diagnostic::new(
                        KernelErrorCode::RecursiveImportForbidden,
                        &message,
                        import_context.clone(),
                    )
                    .with_reference(reference.clone()),
                    format!("recursive import {message}"),
                );
            } else {
                on_cycle.get_or_insert_with(|| cycle.root.clone());
                self.findings.cycles.push(OpenCycle {
                    root: cycle.root,
                    tail: labels,
                });
            }
        }

        // one diagnostic per failing branch
        if let Some(child_cause) = &child.cause {
            let message = format!("{}/{}", import.label, child_cause);
            self.findings.fail(
                Diagnostic::new(KernelErrorCode::ImportOfModuleFailed, &message, import_context)
                    .with_reference(reference),
                message,
            );
        } else if let Some(root) = on_cycle {
            self.findings.diagnostics.push(
                Diagnostic::new(
                    KernelErrorCode::ImportOfModuleFailed,
                    format!("{}: recursive import of {}", import.label, root),
                    import_context,
                )
                .with_reference(reference),
            );
        }
    }
}

impl<'p, 'c> Pass<'p, 'c> {
    /// Make sure the document of `module` is loaded, at most one attempt per pass
    fn ensure_loaded(&mut self, module: &Module) -> Result<Arc<ModuleDocument>, LoadFailure> {
        let address = module.address().clone();
        if let Some(Err(message)) = self.loads.get(&address) {
            return Err(LoadFailure::Failed(message.clone()));
        }
        if let Some(document) = module.document() {
            if module.loading_state() == LoadingState::Loaded {
                return Ok(document);
            }
        }

        let call = match self.ctx.enter(ServiceKind::LoadModule, &address) {
            Ok(call) => call,
            Err(CallError::Interrupted(_)) => return Err(LoadFailure::Interrupted),
            Err(error @ CallError::DepthExceeded { .. }) => {
                return Err(LoadFailure::Failed(error.to_string()))
            }
        };

        let registry = self.registry;
        let start = self.start;
        let result = self.ctx.update(module, |w| -> Result<Result<Arc<ModuleDocument>, String>, StateError> {
            match w.state().loading {
                LoadingState::Loaded => {
                    if let Some(document) = w.document() {
                        return Ok(Ok(document));
                    }
                    w.set_loading(LoadingState::Undefined)?;
                }
                LoadingState::LoadingFailed if w.loading_epoch() > start => {
                    // failed concurrently within this pass' lifetime
                    let message = w
                        .load_failure()
                        .unwrap_or("loading failed in another process")
                        .to_string();
                    return Ok(Err(message));
                }
                LoadingState::LoadingFailed => w.set_loading(LoadingState::Undefined)?,
                LoadingState::Undefined => {}
                LoadingState::Loading => {
                    return Ok(Err("module is loading".to_string()));
                }
            }

            w.set_loading(LoadingState::Loading)?;
            let loaded = registry.loader().load(w.address());
            w.stamp_loading(registry.next_epoch());
            match loaded {
                Ok(document) => {
                    let document = Arc::new(document);
                    w.set_document(document.clone());
                    w.set_loading(LoadingState::Loaded)?;
                    Ok(Ok(document))
                }
                Err(error) => {
                    let message = load_error_message(&error);
                    w.set_loading(LoadingState::LoadingFailed)?;
                    w.set_load_failure(message.clone());
                    w.add_error(
                        ServiceKind::LoadModule,
                        Diagnostic::new(
                            KernelErrorCode::ModuleLoadFailed,
                            &message,
                            ModuleContext::new(w.address().clone()),
                        ),
                    );
                    Ok(Err(message))
                }
            }
        });

        let result = match result {
            Ok(result) => result,
            Err(error) => {
                warn!(%address, %error, "loading transition rejected");
                Err(error.to_string())
            }
        };
        match &result {
            Ok(_) => call.finish(ServiceResult::Ok),
            Err(message) => {
                warn!(%address, %message, "module could not be loaded");
                call.finish(ServiceResult::Failed(message.clone()));
            }
        }
        self.loads
            .insert(address, result.as_ref().map(|_| ()).map_err(Clone::clone));
        result.map_err(LoadFailure::Failed)
    }

    fn claim(&self, module: &Module) -> Result<Claim, StateError> {
        let start = self.start;
        let ctx = self.ctx;
        let registry = self.registry;
        registry.edit_graph(|| {
            let (claim, old_edges) = ctx.update(module, |w| {
                let state = w.state();
                let mut old_edges: Vec<ModuleReference> = Vec::new();
                match state.dependency {
                    DependencyState::RequiredLoaded => return Ok((Claim::Loaded, old_edges)),
                    // failed after this pass began; recompute, cycles depend on the stack
                    DependencyState::RequiredFailed if w.dependency_epoch() > start => {
                        return Ok((Claim::Shadow, old_edges))
                    }
                    DependencyState::RequiredFailed => {
                        old_edges = w.reset_dependency(ResetReason::Retry)?;
                    }
                    DependencyState::Undefined => {}
                    _ => return Ok((Claim::Shadow, old_edges)),
                }
                if state.logic.is_failed() {
                    w.set_logic(LogicState::Unchecked)?;
                }
                w.set_dependency(DependencyState::LoadingImports)?;
                Ok::<_, StateError>((Claim::Owned, old_edges))
            })?;
            registry.unlink(ctx, module.address(), old_edges);
            Ok(claim)
        })
    }

    /// Resolve `root` and everything below it; owned modules are rolled back
    /// when the pass is interrupted
    fn run(&mut self, root: &Arc<Module>, label: &str) -> Result<Outcome, CallError> {
        let result = self.walk(root, label);
        if result.is_err() {
            while let Some(frame) = self.stack.pop() {
                if frame.owned {
                    self.roll_back(&frame.module);
                }
            }
        }
        result
    }

    fn walk(&mut self, root: &Arc<Module>, label: &str) -> Result<Outcome, CallError> {
        if let Some(outcome) = self.open(root, label)? {
            return Ok(outcome);
        }
        while let Some(mut frame) = self.stack.pop() {
            let Some(import) = frame.advance() else {
                let outcome = self.close(frame);
                match self.stack.last_mut() {
                    Some(parent) => parent.absorb(outcome),
                    None => return Ok(outcome),
                }
                continue;
            };
            self.stack.push(frame);
            self.ctx.checkpoint()?;
            if let Some(outcome) = self.descend(&import)? {
                if let Some(top) = self.stack.last_mut() {
                    top.absorb(outcome);
                }
            }
        }
        Ok(Outcome::loaded())
    }

    /// Follow `import` of the innermost module. Returns the outcome when it
    /// is known right away, `None` when a cycle was recorded or the target
    /// was entered.
    fn descend(&mut self, import: &PendingImport) -> Result<Option<Outcome>, CallError> {
        let target = import.target.address();
        if let Some(depth) = self.stack.iter().position(|frame| &frame.address == target) {
            debug!(
                label = %import.label,
                path = %self.stack[depth..]
                    .iter()
                    .map(|frame| frame.label.as_str())
                    .collect::<Vec<_>>()
                    .join("/"),
                "recursive import found"
            );
            let self_import = depth + 1 == self.stack.len();
            if let Some(top) = self.stack.last_mut() {
                top.record_cycle(self_import);
            }
            return Ok(None);
        }

        if let Some(outcome) = self.memo.get(target) {
            return Ok(Some(self.reopen(outcome)));
        }
        match self.open(&import.target, &import.label) {
            Ok(opened) => Ok(opened),
            Err(CallError::DepthExceeded { max }) => {
                Ok(Some(Outcome::failed(format!("call depth {max} exceeded"))))
            }
            Err(error) => Err(error),
        }
    }

    /// Enter `module`: claim it and load its imports. A frame is pushed
    /// unless the outcome is known already.
    fn open(&mut self, module: &Arc<Module>, label: &str) -> Result<Option<Outcome>, CallError> {
        self.ctx.checkpoint()?;
        let address = module.address().clone();
        let call = self.ctx.enter(ServiceKind::LoadRequiredModules, &address)?;

        let owned = match self.claim(module) {
            Ok(Claim::Owned) => true,
            Ok(Claim::Shadow) => {
                debug!(%address, "module owned by another process, computing outcome only");
                false
            }
            Ok(Claim::Loaded) => {
                call.finish(ServiceResult::Ok);
                return Ok(Some(Outcome::loaded()));
            }
            Err(error) => {
                warn!(%address, %error, "dependency transition rejected");
                call.finish(ServiceResult::Failed(error.to_string()));
                return Ok(Some(Outcome::failed(error.to_string())));
            }
        };

        let context = ModuleContext::new(address.clone());
        let (findings, pending) = match self.load_imports(module, &context, owned, &call) {
            Ok(loaded) => loaded,
            Err(error) => {
                if owned {
                    self.roll_back(module);
                }
                return Err(error);
            }
        };
        if owned {
            let next = if findings.diagnostics.is_empty() {
                DependencyState::ImportsLoaded
            } else {
                DependencyState::ImportsFailed
            };
            self.transition(module, next);
            self.transition(module, DependencyState::LoadingRequired);
        }

        self.stack.push(Frame {
            module: module.clone(),
            address,
            label: label.to_string(),
            owned,
            call,
            context,
            findings,
            pending,
            next: 0,
            current: None,
        });
        Ok(None)
    }

    /// Undo an owned module after interruption
    fn roll_back(&self, module: &Module) {
        let ctx = self.ctx;
        let registry = self.registry;
        registry.edit_graph(|| {
            match ctx.update(module, |w| w.reset_dependency(ResetReason::Interrupted)) {
                Ok(edges) => registry.unlink(ctx, module.address(), edges),
                Err(error) => warn!(address = %module.address(), %error, "rollback rejected"),
            }
        });
    }

    /// Locate and load every import of `module`
    fn load_imports(
        &mut self,
        module: &Arc<Module>,
        context: &ModuleContext,
        owned: bool,
        call: &CallGuard<'_>,
    ) -> Result<(Findings, Vec<PendingImport>), CallError> {
        let address = module.address();
        let mut findings = Findings::default();
        let imports = module
            .document()
            .map(|document| document.imports().to_vec())
            .unwrap_or_default();
        let count = imports.len().max(1) as f64;

        let mut pending = Vec::with_capacity(imports.len());
        for (index, spec) in imports.iter().enumerate() {
            self.ctx.checkpoint()?;
            call.set_progress(
                50.0 * index as f64 / count,
                format_args!("loading import {}", spec.label),
            );
            let import_context = import_context(context, index);

            let target = match self.registry.loader().locate(address, spec) {
                Ok(target) => self.registry.module_entry(&target),
                Err(error) => {
                    let message = format!("{}: {}", spec.label, load_error_message(&error));
                    findings.fail(
                        Diagnostic::new(KernelErrorCode::ImportUnreachable, &message, import_context),
                        message,
                    );
                    continue;
                }
            };
            let reason = match self.ensure_loaded(&target) {
                Ok(_) => {
                    if owned && !self.registry.add_edge(self.ctx, module, &spec.label, &target) {
                        format!("{} was unregistered", target.address())
                    } else {
                        pending.push(PendingImport {
                            index,
                            label: spec.label.clone(),
                            target,
                        });
                        continue;
                    }
                }
                Err(LoadFailure::Interrupted) => return Err(Interrupted.into()),
                Err(LoadFailure::Failed(reason)) => reason,
            };
            let message = format!("{}: {}", spec.label, reason);
            findings.fail(
                Diagnostic::new(KernelErrorCode::ImportUnreachable, &message, import_context)
                    .with_reference(ModuleContext::new(target.address().clone())),
                message,
            );
        }
        Ok((findings, pending))
    }

    /// Leave the innermost module, writing its result when owned
    fn close(&mut self, frame: Frame<'c>) -> Outcome {
        let Frame {
            module,
            address,
            label,
            owned,
            call,
            context,
            mut findings,
            pending,
            ..
        } = frame;
        if owned {
            let registry = self.registry;
            let ctx = self.ctx;
            registry.edit_graph(|| {
                // targets unregistered after they were linked
                for import in pending
                    .iter()
                    .filter(|import| !registry.is_registered(&import.target))
                {
                    let target = import.target.address();
                    let message = format!("{}: {} was unregistered", import.label, target);
                    findings.fail(
                        Diagnostic::new(
                            KernelErrorCode::ImportUnreachable,
                            &message,
                            import_context(&context, import.index),
                        )
                        .with_reference(ModuleContext::new(target.clone())),
                        message,
                    );
                }
                let loaded = findings.cause.is_none() && findings.cycles.is_empty();
                let epoch = registry.next_epoch();
                let written = findings.diagnostics.clone();
                let result = ctx.update(&module, |w| {
                    w.set_errors(ServiceKind::LoadRequiredModules, written);
                    w.stamp_dependency(epoch);
                    w.set_dependency(if loaded {
                        DependencyState::RequiredLoaded
                    } else {
                        DependencyState::RequiredFailed
                    })
                });
                if let Err(error) = result {
                    warn!(%address, %error, "dependency transition rejected");
                }
            });
        }
        let Findings {
            diagnostics,
            cause,
            cycles,
        } = findings;
        let outcome = Outcome { cause, cycles };
        if outcome.is_loaded() {
            call.finish(ServiceResult::Ok);
        } else {
            warn!(%address, %label, errors = diagnostics.len(), "required modules failed");
            call.finish(ServiceResult::Failed(format!("dependencies of {address} failed")));
        }
        self.results.insert(address.clone(), diagnostics);
        self.memo.insert(address, outcome.clone());
        outcome
    }

    /// Memoized outcome seen from the current stack; cycles closed meanwhile
    /// count as ordinary failures
    fn reopen(&self, outcome: &Outcome) -> Outcome {
        let mut reopened = Outcome {
            cause: outcome.cause.clone(),
            cycles: Vec::new(),
        };
        for cycle in &outcome.cycles {
            if self.stack.iter().any(|frame| frame.address == cycle.root) {
                reopened.cycles.push(cycle.clone());
            } else {
                reopened
                    .cause
                    .get_or_insert_with(|| format!("recursive import of {}", cycle.root));
            }
        }
        reopened
    }

    fn transition(&self, module: &Module, next: DependencyState) {
        if let Err(error) = self.ctx.update(module, |w| w.set_dependency(next)) {
            warn!(address = %module.address(), %error, "dependency transition rejected");
        }
    }
}

fn import_context(context: &ModuleContext, index: usize) -> ModuleContext {
    context
        .child(PathSegment::Header)
        .child(PathSegment::Import(index))
}

fn load_error_message(error: &LoadError) -> String {
    match error {
        LoadError::Other(error) => format!("{error:#}"),
        error => error.to_string(),
    }
}
