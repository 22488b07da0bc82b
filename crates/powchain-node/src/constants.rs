pub(crate) const DEFAULT_LISTEN: &str = "127.0.0.1:8080";
pub(crate) const DEFAULT_DATA_DIR: &str = "./data";
pub(crate) const DEFAULT_SYNC_INTERVAL_SECS: u64 = 10;
pub(crate) const DEFAULT_PEER_TIMEOUT_MS: u64 = 5_000;
pub(crate) const DEFAULT_MAX_BROADCASTS: usize = 8;
/// Notifications buffered per subscriber before it starts lagging.
pub(crate) const SUBSCRIBER_CAPACITY: usize = 64;
