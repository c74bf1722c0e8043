//! Graceful shutdown support via a shared atomic flag

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Stop request shared between signal handlers and the pipeline.
///
/// Once set it stays set. The scheduler stops admitting new pages; in-flight
/// fetches and pending exports still complete.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if shutdown was requested
    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Request shutdown. Returns whether it had already been requested.
    ///
    /// Only touches an atomic, so it is safe to call from a signal handler.
    pub fn request(&self) -> bool {
        self.0.swap(true, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let flag = ShutdownFlag::new();
        let other = flag.clone();
        assert!(!other.is_requested());
        assert!(!flag.request());
        assert!(other.is_requested());
        // Second request reports the earlier one
        assert!(other.request());
    }
}
