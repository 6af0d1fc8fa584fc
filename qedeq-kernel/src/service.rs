//! Service processes and calls
//!
//! A [`ServiceProcess`] is one thread of control working for the kernel. It
//! owns a stack of nested [`ServiceCall`]s, each call being one service
//! executed against one module. Resolver and well-formedness service receive
//! a [`CallContext`] and use it to open nested calls, to wait for module
//! locks (the call counts as paused and the process as blocked meanwhile) and
//! to poll for cancellation.

use crate::cancel::CancellationToken;
use crate::events::Observers;
use crate::module::{Module, ModuleData, ModuleWriter};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use qedeq_checker::Interrupted;
use qedeq_logic::ModuleAddress;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Write as _};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

/// Services the kernel runs against modules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ServiceKind {
    LoadModule,
    LoadRequiredModules,
    WellFormedCheck,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 3] = [
        ServiceKind::LoadModule,
        ServiceKind::LoadRequiredModules,
        ServiceKind::WellFormedCheck,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ServiceKind::LoadModule => "load module",
            ServiceKind::LoadRequiredModules => "load required modules",
            ServiceKind::WellFormedCheck => "well-formedness check",
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Terminal result of a call or process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceResult {
    Ok,
    Interrupted,
    Failed(String),
}

impl ServiceResult {
    pub fn is_ok(&self) -> bool {
        matches!(self, ServiceResult::Ok)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    #[error(transparent)]
    Interrupted(#[from] Interrupted),

    #[error("maximum call depth {max} exceeded")]
    DepthExceeded { max: usize },
}

#[derive(Debug)]
struct CallState {
    end: Option<DateTime<Utc>>,
    active: Duration,
    // None while paused
    running_since: Option<DateTime<Utc>>,
    percent: f64,
    action: String,
    result: Option<ServiceResult>,
}

/// One execution of a service against a module
#[derive(Debug)]
pub struct ServiceCall {
    id: Uuid,
    service: ServiceKind,
    module: ModuleAddress,
    parent: Option<Uuid>,
    process: Uuid,
    begin: DateTime<Utc>,
    blocked: Arc<AtomicBool>,
    state: Mutex<CallState>,
}

impl ServiceCall {
    fn new(
        service: ServiceKind,
        module: ModuleAddress,
        parent: Option<Uuid>,
        process: &ServiceProcess,
    ) -> Self {
        let begin = Utc::now();
        Self {
            id: Uuid::new_v4(),
            service,
            module,
            parent,
            process: process.id,
            begin,
            blocked: process.blocked.clone(),
            state: Mutex::new(CallState {
                end: None,
                active: Duration::zero(),
                running_since: Some(begin),
                percent: 0.0,
                action: String::new(),
                result: None,
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn service(&self) -> ServiceKind {
        self.service
    }

    pub fn module(&self) -> &ModuleAddress {
        &self.module
    }

    pub fn parent(&self) -> Option<Uuid> {
        self.parent
    }

    pub fn process(&self) -> Uuid {
        self.process
    }

    pub fn begin(&self) -> DateTime<Utc> {
        self.begin
    }

    pub fn end(&self) -> Option<DateTime<Utc>> {
        self.state.lock().end
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().running_since.is_none()
    }

    /// Stop the clock; the owning process counts as blocked
    pub fn pause(&self) {
        let mut state = self.state.lock();
        if let Some(since) = state.running_since.take() {
            state.active = state.active + (Utc::now() - since);
        }
        self.blocked.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        let mut state = self.state.lock();
        if state.running_since.is_none() && state.end.is_none() {
            state.running_since = Some(Utc::now());
        }
        self.blocked.store(false, Ordering::SeqCst);
    }

    /// Record progress; `action` is written into the existing buffer
    pub fn set_progress(&self, percent: f64, action: fmt::Arguments<'_>) {
        let mut state = self.state.lock();
        state.percent = percent.clamp(0.0, 100.0);
        state.action.clear();
        let _ = state.action.write_fmt(action);
    }

    pub fn percent(&self) -> f64 {
        self.state.lock().percent
    }

    pub fn action(&self) -> String {
        self.state.lock().action.clone()
    }

    /// Time spent running, paused intervals excluded
    pub fn active_duration(&self) -> Duration {
        let state = self.state.lock();
        match state.running_since {
            Some(since) => state.active + (state.end.unwrap_or_else(Utc::now) - since),
            None => state.active,
        }
    }

    pub fn result(&self) -> Option<ServiceResult> {
        self.state.lock().result.clone()
    }

    /// Record the terminal result; later calls keep the first one
    pub fn finish(&self, result: ServiceResult) {
        let mut state = self.state.lock();
        if state.result.is_some() {
            return;
        }
        let now = Utc::now();
        if let Some(since) = state.running_since.take() {
            state.active = state.active + (now - since);
        }
        if result.is_ok() {
            state.percent = 100.0;
        }
        state.end = Some(now);
        state.result = Some(result);
    }

    pub fn snapshot(&self) -> CallSnapshot {
        let active_ms = self.active_duration().num_milliseconds();
        let state = self.state.lock();
        CallSnapshot {
            id: self.id,
            service: self.service,
            module: self.module.clone(),
            parent: self.parent,
            begin: self.begin,
            end: state.end,
            active_ms,
            percent: state.percent,
            action: state.action.clone(),
            paused: state.running_since.is_none() && state.end.is_none(),
            result: state.result.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSnapshot {
    pub id: Uuid,
    pub service: ServiceKind,
    pub module: ModuleAddress,
    pub parent: Option<Uuid>,
    pub begin: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub active_ms: i64,
    pub percent: f64,
    pub action: String,
    pub paused: bool,
    pub result: Option<ServiceResult>,
}

#[derive(Debug, Default)]
struct ProcessState {
    finished: Option<DateTime<Utc>>,
    result: Option<ServiceResult>,
    blocked_since: Option<DateTime<Utc>>,
    calls_started: usize,
}

/// Logical worker owning a stack of nested calls
#[derive(Debug)]
pub struct ServiceProcess {
    id: Uuid,
    name: String,
    started: DateTime<Utc>,
    stack: Mutex<Vec<Arc<ServiceCall>>>,
    blocked: Arc<AtomicBool>,
    token: CancellationToken,
    state: Mutex<ProcessState>,
}

impl ServiceProcess {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            started: Utc::now(),
            stack: Mutex::new(Vec::new()),
            blocked: Arc::new(AtomicBool::new(false)),
            token: CancellationToken::new(),
            state: Mutex::new(ProcessState::default()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn started(&self) -> DateTime<Utc> {
        self.started
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Ask the process to stop at its next checkpoint
    pub fn interrupt(&self) {
        debug!(process = %self.id, name = %self.name, "interrupt requested");
        self.token.request();
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked.load(Ordering::SeqCst)
    }

    /// How long the process has been waiting, if it is
    pub fn blocked_for(&self) -> Option<Duration> {
        if !self.is_blocked() {
            return None;
        }
        self.state.lock().blocked_since.map(|since| Utc::now() - since)
    }

    fn set_blocked(&self, blocked: bool) {
        self.blocked.store(blocked, Ordering::SeqCst);
        self.state.lock().blocked_since = blocked.then(Utc::now);
    }

    pub fn current_call(&self) -> Option<Arc<ServiceCall>> {
        self.stack.lock().last().cloned()
    }

    pub fn call_depth(&self) -> usize {
        self.stack.lock().len()
    }

    pub fn calls_started(&self) -> usize {
        self.state.lock().calls_started
    }

    pub fn is_finished(&self) -> bool {
        self.state.lock().result.is_some()
    }

    pub fn result(&self) -> Option<ServiceResult> {
        self.state.lock().result.clone()
    }

    pub fn finish(&self, result: ServiceResult) {
        let mut state = self.state.lock();
        if state.result.is_none() {
            state.finished = Some(Utc::now());
            state.result = Some(result);
        }
    }

    fn push(&self, call: Arc<ServiceCall>) {
        self.stack.lock().push(call);
        self.state.lock().calls_started += 1;
    }

    fn pop(&self, id: Uuid) {
        let mut stack = self.stack.lock();
        match stack.iter().rposition(|call| call.id == id) {
            Some(index) => {
                // calls above were abandoned without their guard
                stack.truncate(index);
            }
            None => warn!(process = %self.id, call = %id, "call missing from stack"),
        }
    }

    pub fn snapshot(&self) -> ProcessSnapshot {
        let calls = self.stack.lock().iter().map(|call| call.snapshot()).collect();
        let state = self.state.lock();
        ProcessSnapshot {
            id: self.id,
            name: self.name.clone(),
            started: self.started,
            finished: state.finished,
            blocked: self.is_blocked(),
            cancellation_requested: self.token.is_requested(),
            result: state.result.clone(),
            calls_started: state.calls_started,
            calls,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessSnapshot {
    pub id: Uuid,
    pub name: String,
    pub started: DateTime<Utc>,
    pub finished: Option<DateTime<Utc>>,
    pub blocked: bool,
    pub cancellation_requested: bool,
    pub result: Option<ServiceResult>,
    pub calls_started: usize,
    pub calls: Vec<CallSnapshot>,
}

/// Handle threaded through resolver and services
pub struct CallContext<'a> {
    process: &'a ServiceProcess,
    observers: &'a Observers,
    max_depth: usize,
}

impl<'a> CallContext<'a> {
    pub fn new(process: &'a ServiceProcess, observers: &'a Observers, max_depth: usize) -> Self {
        Self {
            process,
            observers,
            max_depth,
        }
    }

    pub fn process(&self) -> &ServiceProcess {
        self.process
    }

    pub fn token(&self) -> &CancellationToken {
        &self.process.token
    }

    pub fn observers(&self) -> &Observers {
        self.observers
    }

    /// Fail with [`Interrupted`] once cancellation was requested
    pub fn checkpoint(&self) -> Result<(), Interrupted> {
        if self.process.token.is_requested() {
            self.process.token.acknowledge();
            return Err(Interrupted);
        }
        Ok(())
    }

    /// Open a nested call; it ends when the guard is finished or dropped
    pub fn enter(
        &self,
        service: ServiceKind,
        module: &ModuleAddress,
    ) -> Result<CallGuard<'a>, CallError> {
        self.checkpoint()?;
        let depth = self.process.call_depth();
        if depth >= self.max_depth {
            return Err(CallError::DepthExceeded {
                max: self.max_depth,
            });
        }
        let parent = self.process.current_call().map(|call| call.id);
        let call = Arc::new(ServiceCall::new(service, module.clone(), parent, self.process));
        self.process.push(call.clone());
        Ok(CallGuard {
            process: self.process,
            call,
        })
    }

    /// Lock a module; waiting counts as a pause of the current call
    pub fn lock_module<'m>(&self, module: &'m Module) -> MutexGuard<'m, ModuleData> {
        if let Some(guard) = module.try_lock() {
            return guard;
        }
        let call = self.process.current_call();
        if let Some(call) = &call {
            call.pause();
        }
        self.process.set_blocked(true);
        let guard = module.lock();
        self.process.set_blocked(false);
        if let Some(call) = &call {
            call.resume();
        }
        guard
    }

    /// Lock `module`, write through `f`, and publish the resulting events
    pub fn update<R>(&self, module: &Module, f: impl FnOnce(&mut ModuleWriter<'_>) -> R) -> R {
        let guard = self.lock_module(module);
        module.update_locked(guard, self.observers, f)
    }
}

/// Open call; pops itself from the process stack when dropped
pub struct CallGuard<'a> {
    process: &'a ServiceProcess,
    call: Arc<ServiceCall>,
}

impl CallGuard<'_> {
    pub fn call(&self) -> &ServiceCall {
        &self.call
    }

    pub fn set_progress(&self, percent: f64, action: fmt::Arguments<'_>) {
        self.call.set_progress(percent, action);
    }

    pub fn finish(self, result: ServiceResult) {
        self.call.finish(result);
    }
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        if self.call.result().is_none() {
            let result = if self.process.token.is_requested() {
                ServiceResult::Interrupted
            } else {
                ServiceResult::Failed("call abandoned".to_string())
            };
            self.call.finish(result);
        }
        self.process.pop(self.call.id);
    }
}

/// Creates and tracks service processes
#[derive(Debug, Default)]
pub struct ServiceProcessManager {
    processes: DashMap<Uuid, Arc<ServiceProcess>>,
}

impl ServiceProcessManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, name: impl Into<String>) -> Arc<ServiceProcess> {
        let process = Arc::new(ServiceProcess::new(name));
        self.processes.insert(process.id, process.clone());
        process
    }

    pub fn get(&self, id: Uuid) -> Option<Arc<ServiceProcess>> {
        self.processes.get(&id).map(|entry| entry.value().clone())
    }

    /// Snapshots ordered by start time
    pub fn snapshots(&self) -> Vec<ProcessSnapshot> {
        let mut snapshots: Vec<_> = self
            .processes
            .iter()
            .map(|entry| entry.value().snapshot())
            .collect();
        snapshots.sort_by_key(|snapshot| snapshot.started);
        snapshots
    }

    pub fn running(&self) -> Vec<Arc<ServiceProcess>> {
        self.processes
            .iter()
            .filter(|entry| !entry.value().is_finished())
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Running processes blocked for at least `threshold`
    pub fn stalled(&self, threshold: Duration) -> Vec<ProcessSnapshot> {
        self.running()
            .into_iter()
            .filter(|process| {
                process
                    .blocked_for()
                    .map_or(false, |blocked| blocked >= threshold)
            })
            .map(|process| process.snapshot())
            .collect()
    }

    pub fn interrupt_all(&self) -> usize {
        let running = self.running();
        for process in &running {
            process.interrupt();
        }
        running.len()
    }

    /// Forget finished processes
    pub fn prune_finished(&self) -> usize {
        let before = self.processes.len();
        self.processes.retain(|_, process| !process.is_finished());
        before - self.processes.len()
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    pub fn export_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.snapshots())
    }
}
