//! Block and chain validity rules.
//!
//! Hashes are always recomputed from the block fields; a stored `hash` is never
//! trusted on its own.

use crate::constants::GENESIS_PREV_HASH;
use crate::error::ValidationError;
use crate::pow::meets_difficulty;
use crate::Block;

/// Checks `candidate` as the direct successor of `predecessor`.
///
/// Order: index continuity, prev_hash linkage, hash correctness, difficulty.
/// The first failing check is reported.
pub fn check_block(
    candidate: &Block,
    predecessor: &Block,
    difficulty: usize,
) -> Result<(), ValidationError> {
    let expected = predecessor.index + 1;
    if candidate.index != expected {
        return Err(ValidationError::IndexMismatch {
            expected,
            found: candidate.index,
        });
    }
    if candidate.prev_hash != predecessor.hash {
        return Err(ValidationError::PrevHashMismatch {
            index: candidate.index,
        });
    }
    if candidate.compute_hash() != candidate.hash {
        return Err(ValidationError::HashMismatch {
            index: candidate.index,
        });
    }
    if !meets_difficulty(&candidate.hash, difficulty) {
        return Err(ValidationError::InsufficientDifficulty {
            index: candidate.index,
            difficulty,
        });
    }
    Ok(())
}

pub fn is_block_valid(candidate: &Block, predecessor: &Block, difficulty: usize) -> bool {
    check_block(candidate, predecessor, difficulty).is_ok()
}

/// Genesis is checked for shape and internal hash correctness only.
pub fn check_genesis(genesis: &Block) -> Result<(), ValidationError> {
    if genesis.index != 0 || genesis.prev_hash != GENESIS_PREV_HASH {
        return Err(ValidationError::MalformedGenesis);
    }
    if genesis.compute_hash() != genesis.hash {
        return Err(ValidationError::HashMismatch { index: 0 });
    }
    Ok(())
}

/// Validates a whole chain. An empty chain is trivially valid.
pub fn check_chain(chain: &[Block], difficulty: usize) -> Result<(), ValidationError> {
    let Some(genesis) = chain.first() else {
        return Ok(());
    };
    check_genesis(genesis)?;
    chain
        .windows(2)
        .try_for_each(|pair| check_block(&pair[1], &pair[0], difficulty))
}

pub fn is_chain_valid(chain: &[Block], difficulty: usize) -> bool {
    check_chain(chain, difficulty).is_ok()
}
