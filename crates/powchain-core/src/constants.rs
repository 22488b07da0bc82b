/// Leading `'0'` hex characters a block hash needs unless the node is configured otherwise.
pub const DEFAULT_DIFFICULTY: usize = 4;
pub const HASH_HEX_SIZE: usize = 64;
pub const GENESIS_PREV_HASH: &str = "";
