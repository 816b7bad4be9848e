//! Directory adapter: the thin layer between this runtime and the
//! external coordinator tree that acts as the service directory.
//!
//! Schema: `<namespace>/<interface>/providers/<host:port>`, where the
//! parents are persistent and each provider leaf is scoped to the
//! session that created it.

use serde::{Deserialize, Serialize};
use serde_inline_default::serde_inline_default;

mod directory;
pub use directory::{Directory, DirectorySession, NodeMode, RetryPolicy};

mod memory;
pub use memory::MemoryDirectory;

mod registration;
pub use registration::ServiceRegistry;

mod discovery;
pub use discovery::ServiceDiscovery;

/// Adapter configuration shared by registry and discovery.
#[serde_inline_default]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Root of the directory tree this runtime works under.
    #[serde_inline_default("/jg-rpc".to_string())]
    pub namespace: String,
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        serde_json::from_value(serde_json::Value::Object(serde_json::Map::default())).unwrap()
    }
}
