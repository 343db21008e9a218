//! Error types for domain entity construction and encoding.

/// Errors raised while building or encoding domain entities.
#[derive(Debug, thiserror::Error)]
pub enum TypeError {
    #[error("allocation and destination must have equal length: {allocations} != {destinations}")]
    AllocationDestinationMismatch {
        allocations: usize,
        destinations: usize,
    },

    #[error("channel must have at least two participants, got {0}")]
    TooFewParticipants(usize),

    #[error("canonical encoding failed: {0}")]
    Encoding(String),
}

/// Result type for entity operations.
pub type TypeResult<T> = Result<T, TypeError>;
