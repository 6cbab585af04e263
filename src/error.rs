use thiserror::Error;

/// Fewer completed fixtures than this cannot produce a model.
pub const MIN_TRAINING_ROWS: usize = 5;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(
        "insufficient completed fixtures to train a model: {available} usable, at least {required} required"
    )]
    InsufficientData { available: usize, required: usize },

    #[error("training cancelled during {stage}")]
    Cancelled { stage: &'static str },

    #[error("data store error: {0:#}")]
    Store(#[from] anyhow::Error),

    #[error("artifact serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    pub fn insufficient(available: usize) -> Self {
        EngineError::InsufficientData {
            available,
            required: MIN_TRAINING_ROWS,
        }
    }
}
