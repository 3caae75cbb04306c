use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{MaskError, Result};

/// Cooperative cancellation flag shared between a caller and a running pipeline.
///
/// Clones observe the same flag. The clustering loop checks it between
/// iterations and the pipeline checks it between mask passes.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Returns `Err(MaskError::Cancelled)` once [`cancel`](Self::cancel) has been called.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(MaskError::Cancelled)
        } else {
            Ok(())
        }
    }
}
