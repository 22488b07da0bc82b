use thiserror::Error;

/// Why a block or chain failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("block at position {expected} carries index {found}")]
    IndexMismatch { expected: u64, found: u64 },

    #[error("block {index}: prev_hash does not match predecessor hash")]
    PrevHashMismatch { index: u64 },

    #[error("block {index}: stored hash does not match recomputed hash")]
    HashMismatch { index: u64 },

    #[error("block {index}: hash has fewer than {difficulty} leading zeros")]
    InsufficientDifficulty { index: u64, difficulty: usize },

    #[error("genesis block must have index 0 and an empty prev_hash")]
    MalformedGenesis,
}

impl ValidationError {
    /// Chain position of the block that failed.
    pub fn index(&self) -> u64 {
        match self {
            ValidationError::IndexMismatch { expected, .. } => *expected,
            ValidationError::PrevHashMismatch { index }
            | ValidationError::HashMismatch { index }
            | ValidationError::InsufficientDifficulty { index, .. } => *index,
            ValidationError::MalformedGenesis => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PeerError {
    #[error("peer address must not be empty")]
    EmptyAddress,
}
