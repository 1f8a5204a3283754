//! Cooperative cancellation for in-flight operations

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A shareable flag that asks a running encrypt or decrypt to stop.
///
/// The engine checks it before every chunk; a set flag ends the operation
/// with [`ErrorKind::Cancelled`](crate::error::ErrorKind::Cancelled).
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
