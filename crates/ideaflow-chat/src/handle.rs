//! A cloneable handle for cancelling an in-flight exchange from external code.

use parking_lot::Mutex;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tokio_util::sync::CancellationToken;

/// A cloneable handle for cancelling an in-flight exchange.
///
/// All fields are `Arc`-wrapped, so cloning is cheap.
#[derive(Clone)]
pub struct ExchangeHandle {
    pub(crate) cancel: Arc<Mutex<CancellationToken>>,
    pub(crate) is_running: Arc<AtomicBool>,
}

impl Default for ExchangeHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ExchangeHandle {
    pub fn new() -> Self {
        Self {
            cancel: Arc::new(Mutex::new(CancellationToken::new())),
            is_running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Mark an exchange as started and return a fresh token for it.
    pub(crate) fn begin(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.cancel.lock() = token.clone();
        self.is_running.store(true, Ordering::Release);
        token
    }

    /// Mark the exchange as finished.
    pub(crate) fn finish(&self) {
        self.is_running.store(false, Ordering::Release);
    }

    /// Cancel the current exchange. The stream is released and no further
    /// updates are delivered for it.
    pub fn cancel(&self) {
        self.cancel.lock().cancel();
    }

    /// Whether an exchange is currently running.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_hits_current_token_only() {
        let handle = ExchangeHandle::new();
        let first = handle.begin();
        handle.cancel();
        assert!(first.is_cancelled());

        let second = handle.begin();
        assert!(!second.is_cancelled());
        handle.cancel();
        assert!(second.is_cancelled());
    }

    #[test]
    fn test_running_flag_follows_begin_and_finish() {
        let handle = ExchangeHandle::new();
        assert!(!handle.is_running());

        let observer = handle.clone();
        handle.begin();
        assert!(observer.is_running());

        handle.finish();
        assert!(!observer.is_running());
    }
}
