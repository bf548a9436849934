use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared stop/error pair crossing worker boundaries.
///
/// Both flags are monotonic: set at most once for the process lifetime and
/// never cleared. Workers poll them cooperatively (before each retrieval,
/// during cooldown, between sweeps); nothing is ever force-cancelled.
#[derive(Debug, Default)]
pub struct Signals {
    stop: AtomicBool,
    error: AtomicBool,
}

impl Signals {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn request_stop(&self) {
        if !self.stop.swap(true, Ordering::SeqCst) {
            tracing::info!("stop signal raised");
        }
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn raise_error(&self) {
        if !self.error.swap(true, Ordering::SeqCst) {
            tracing::debug!("error signal raised");
        }
    }

    pub fn error_raised(&self) -> bool {
        self.error.load(Ordering::SeqCst)
    }
}
