//! QEDEQ kernel
//!
//! Registry of modules and the services working on them: the dependency
//! resolver, which loads a module and everything it imports while detecting
//! import cycles, and the well-formedness service. Services run inside
//! service processes that can be observed, blocked and interrupted.

pub mod cancel;
pub mod config;
pub mod diagnostics;
pub mod events;
pub mod existence;
pub mod loader;
pub mod module;
pub mod registry;
pub mod resolver;
pub mod service;
pub mod state;
pub mod wellformed;

// Re-export core types
pub use cancel::CancellationToken;
pub use config::{ConfigError, KernelConfig};
pub use diagnostics::{Diagnostic, DiagnosticList, KernelErrorCode};
pub use events::{RecordingObserver, RegistryEvent, RegistryObserver, TracingObserver};
pub use existence::ModuleExistenceChecker;
pub use loader::{InMemoryLoader, LoadError, ModuleLoader};
pub use module::{Module, ModuleReference};
pub use registry::{ModuleRegistry, RegistryError};
pub use resolver::{DependencyResolver, ResolveError};
pub use service::{
    CallContext, CallError, CallSnapshot, ProcessSnapshot, ServiceCall, ServiceKind,
    ServiceProcess, ServiceProcessManager, ServiceResult,
};
pub use state::{
    DependencyState, LoadingState, LogicState, ModuleState, ResetReason, StateChange, StateError,
};
pub use wellformed::{WellFormedError, WellFormedService};
