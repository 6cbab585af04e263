use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::EngineError;

/// Cooperative cancellation shared between a training job and its caller.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    raised: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.raised.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.raised.load(Ordering::Relaxed)
    }

    pub fn check(&self, stage: &'static str) -> Result<(), EngineError> {
        if self.is_cancelled() {
            return Err(EngineError::Cancelled { stage });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::CancelFlag;
    use crate::error::EngineError;

    #[test]
    fn clones_share_state() {
        let flag = CancelFlag::new();
        let other = flag.clone();
        assert!(flag.check("test").is_ok());
        other.cancel();
        assert!(matches!(
            flag.check("boosting"),
            Err(EngineError::Cancelled { stage: "boosting" })
        ));
    }
}
