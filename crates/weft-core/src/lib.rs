pub mod config;
pub mod error;
pub mod execution;
pub mod traits;
pub mod types;
pub mod workflow;

pub use config::AppConfig;
pub use error::{ErrorKind, Result, WeftError};
pub use execution::*;
pub use types::*;
pub use workflow::*;

/// Prefix of trigger-input keys that are visible to the engine only.
pub const RESERVED_PREFIX: &str = "__";

/// Hidden trigger-input key carrying the requesting user's id.
pub const USER_ID_KEY: &str = "__user_id__";

/// Whether a variable-bag key belongs to the reserved namespace.
pub fn is_reserved_key(key: &str) -> bool {
    key.starts_with(RESERVED_PREFIX)
}

/// Copy of `map` with every reserved key removed.
pub fn strip_reserved(map: &serde_json::Map<String, serde_json::Value>) -> serde_json::Map<String, serde_json::Value> {
    map.iter()
        .filter(|(k, _)| !is_reserved_key(k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}
