//! Cooperative cancellation

use qedeq_checker::Cancellation;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cancellation request shared between a process and whoever interrupts it
///
/// The requester calls [`request`](Self::request); the running process polls
/// at its checkpoints and confirms with [`acknowledge`](Self::acknowledge)
/// once it has started to unwind.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<TokenState>,
}

#[derive(Debug, Default)]
struct TokenState {
    requested: AtomicBool,
    acknowledged: AtomicBool,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.inner.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.inner.requested.load(Ordering::SeqCst)
    }

    pub fn acknowledge(&self) {
        if self.is_requested() {
            self.inner.acknowledged.store(true, Ordering::SeqCst);
        }
    }

    pub fn is_acknowledged(&self) -> bool {
        self.inner.acknowledged.load(Ordering::SeqCst)
    }
}

impl Cancellation for CancellationToken {
    fn is_cancelled(&self) -> bool {
        if self.is_requested() {
            self.acknowledge();
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake() {
        let token = CancellationToken::new();
        let requester = token.clone();
        assert!(!token.is_cancelled());

        token.acknowledge();
        assert!(!token.is_acknowledged());

        requester.request();
        assert!(requester.is_requested());
        assert!(!requester.is_acknowledged());
        assert!(token.is_cancelled());
        assert!(requester.is_acknowledged());
    }
}
