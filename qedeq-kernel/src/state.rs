//! Module state machine
//!
//! A module moves along three independent axes: loading of its document,
//! resolution of its required modules, and the logical check. Each axis is
//! an enum with one transition table; everything that changes a state goes
//! through `can_transition_to`, so an illegal move is always a
//! [`StateError`] and never a silent overwrite.

use qedeq_logic::ModuleAddress;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoadingState {
    Undefined,
    Loading,
    Loaded,
    LoadingFailed,
}

impl LoadingState {
    pub fn can_transition_to(self, next: LoadingState) -> bool {
        use LoadingState::*;
        matches!(
            (self, next),
            (Undefined, Loading)
                | (Loading, Loaded)
                | (Loading, LoadingFailed)
                // retry after failure, or invalidation
                | (LoadingFailed, Undefined)
                | (Loaded, Undefined)
        )
    }

    pub fn is_failed(self) -> bool {
        self == LoadingState::LoadingFailed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DependencyState {
    Undefined,
    LoadingImports,
    ImportsLoaded,
    ImportsFailed,
    LoadingRequired,
    RequiredLoaded,
    RequiredFailed,
}

/// Why a dependency state goes back to `Undefined`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResetReason {
    /// New pass over a module that failed before
    Retry,
    /// A required module was unregistered or reset
    Invalidated,
    /// The pass working on the module was cancelled
    Interrupted,
}

impl DependencyState {
    pub fn can_transition_to(self, next: DependencyState) -> bool {
        use DependencyState::*;
        matches!(
            (self, next),
            (Undefined, LoadingImports)
                | (LoadingImports, ImportsLoaded)
                | (LoadingImports, ImportsFailed)
                | (ImportsLoaded, LoadingRequired)
                | (ImportsFailed, LoadingRequired)
                | (LoadingRequired, RequiredLoaded)
                | (LoadingRequired, RequiredFailed)
        )
    }

    /// Transition table for the way back to `Undefined`
    pub fn can_reset(self, reason: ResetReason) -> bool {
        use DependencyState::*;
        match reason {
            ResetReason::Retry => matches!(self, ImportsFailed | RequiredFailed),
            ResetReason::Invalidated => {
                matches!(self, ImportsFailed | RequiredFailed | RequiredLoaded)
            }
            ResetReason::Interrupted => {
                matches!(self, LoadingImports | ImportsLoaded | ImportsFailed | LoadingRequired)
            }
        }
    }

    pub fn is_failed(self) -> bool {
        matches!(self, DependencyState::ImportsFailed | DependencyState::RequiredFailed)
    }

    pub fn is_in_progress(self) -> bool {
        matches!(
            self,
            DependencyState::LoadingImports
                | DependencyState::ImportsLoaded
                | DependencyState::ImportsFailed
                | DependencyState::LoadingRequired
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogicState {
    Unchecked,
    ExternalChecking,
    ExternalCheckingFailed,
    InternalChecking,
    WellFormed,
    NotWellFormed,
}

impl LogicState {
    pub fn can_transition_to(self, next: LogicState) -> bool {
        use LogicState::*;
        matches!(
            (self, next),
            (Unchecked, ExternalChecking)
                | (ExternalChecking, ExternalCheckingFailed)
                | (ExternalChecking, InternalChecking)
                | (InternalChecking, WellFormed)
                | (InternalChecking, NotWellFormed)
                // interrupted, retried or invalidated
                | (ExternalChecking, Unchecked)
                | (InternalChecking, Unchecked)
                | (ExternalCheckingFailed, Unchecked)
                | (NotWellFormed, Unchecked)
                | (WellFormed, Unchecked)
        )
    }

    pub fn is_failed(self) -> bool {
        matches!(self, LogicState::ExternalCheckingFailed | LogicState::NotWellFormed)
    }
}

macro_rules! display_as_debug {
    ($($ty:ty),*) => {$(
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Debug::fmt(self, f)
            }
        }
    )*};
}

display_as_debug!(LoadingState, DependencyState, LogicState, ResetReason);

/// The three axes at one instant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleState {
    pub loading: LoadingState,
    pub dependency: DependencyState,
    pub logic: LogicState,
}

impl Default for ModuleState {
    fn default() -> Self {
        Self {
            loading: LoadingState::Undefined,
            dependency: DependencyState::Undefined,
            logic: LogicState::Unchecked,
        }
    }
}

/// State change on one axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateChange {
    Loading { from: LoadingState, to: LoadingState },
    Dependency { from: DependencyState, to: DependencyState },
    Logic { from: LogicState, to: LogicState },
}

impl fmt::Display for StateChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateChange::Loading { from, to } => write!(f, "loading {from} -> {to}"),
            StateChange::Dependency { from, to } => write!(f, "dependency {from} -> {to}"),
            StateChange::Logic { from, to } => write!(f, "logic {from} -> {to}"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("illegal transition for {address}: {change}")]
    IllegalTransition {
        address: ModuleAddress,
        change: StateChange,
    },

    #[error("illegal {reason} reset of {address} in dependency state {state}")]
    IllegalReset {
        address: ModuleAddress,
        state: DependencyState,
        reason: ResetReason,
    },
}
