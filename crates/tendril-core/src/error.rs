use thiserror::Error;

pub type Result<T> = std::result::Result<T, LoopError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoopError {
    #[error("event loop did not go idle within {limit} turns")]
    TurnLimitExceeded { limit: usize },
}

impl LoopError {
    /// The turn budget that was exhausted.
    #[must_use]
    pub fn limit(&self) -> usize {
        match self {
            Self::TurnLimitExceeded { limit } => *limit,
        }
    }
}
