//! Cooperative cancellation, checked between ICP iterations, BVH-traversal
//! chunks, and volume-integration chunks (see spec §5).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{BowlVolumeError, Result};

/// A cheaply-clonable cancellation handle shared between the caller and the
/// pipeline. Cancelling is one-directional: once cancelled, a token never
/// un-cancels.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Returns `Err(BowlVolumeError::Cancelled)` if the token has been
    /// cancelled, otherwise `Ok(())`. Call at each cooperative checkpoint.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(BowlVolumeError::Cancelled)
        } else {
            Ok(())
        }
    }
}
