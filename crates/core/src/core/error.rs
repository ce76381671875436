use std::io;

use thiserror::Error;

/// Errors surfaced by the feedback loop.
///
/// The first four variants are caller-correctable conditions; none of them
/// leave the graph or the current policy in a partially-updated state.
#[derive(Debug, Error)]
pub enum LoopError {
    #[error("rating {0} is outside the accepted range 1-5")]
    InvalidRating(i64),

    #[error("unknown interaction: {0}")]
    UnknownInteraction(String),

    #[error("not enough rated interactions to train (have {have}, need {need})")]
    InsufficientData { have: usize, need: usize },

    #[error("a training run is already in progress")]
    TrainingInProgress,

    #[error("policy version {0} not found")]
    UnknownPolicy(u64),

    #[error("storage error: {0}")]
    Storage(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl LoopError {
    /// Stable machine-readable code for transport layers.
    pub fn code(&self) -> &'static str {
        match self {
            LoopError::InvalidRating(_) => "invalid_rating",
            LoopError::UnknownInteraction(_) => "unknown_interaction",
            LoopError::InsufficientData { .. } => "insufficient_data",
            LoopError::TrainingInProgress => "training_in_progress",
            LoopError::UnknownPolicy(_) => "unknown_policy",
            LoopError::Storage(_) => "storage",
            LoopError::Serde(_) => "serialization",
        }
    }
}

pub type Result<T> = std::result::Result<T, LoopError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_distinct_for_domain_errors() {
        let errs = [
            LoopError::InvalidRating(0),
            LoopError::UnknownInteraction("x".to_string()),
            LoopError::InsufficientData { have: 1, need: 5 },
            LoopError::TrainingInProgress,
        ];
        let mut codes: Vec<&str> = errs.iter().map(|e| e.code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), 4);
    }

    #[test]
    fn insufficient_data_message_names_counts() {
        let e = LoopError::InsufficientData { have: 2, need: 5 };
        assert_eq!(
            e.to_string(),
            "not enough rated interactions to train (have 2, need 5)"
        );
    }
}
