//! Client configuration via `corelink.toml`
//!
//! One flat file holds every tunable of the proxy layer. A default
//! `corelink.toml` is written on first use; to change settings, edit the file
//! and reconnect.

use corelink_core::{CommsError, CommsResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Config file name looked up in the client's working directory.
pub const CONFIG_FILE_NAME: &str = "corelink.toml";

/// Client configuration loaded from `corelink.toml`.
///
/// # Example
///
/// ```toml
/// strict_redelivery_ordering = false
/// dispatch_threads = 4
/// dispatch_queue_depth = 1024
/// chunking_threshold_bytes = 1024000
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Notify consumers when a transaction they received under rolls back.
    #[serde(default)]
    pub strict_redelivery_ordering: bool,
    /// Wait for a reply to every transacted send, not only to
    /// non-transacted reliable ones.
    #[serde(default)]
    pub exchange_transacted_sends: bool,
    /// Worker threads delivering remote events to listeners.
    #[serde(default = "default_dispatch_threads")]
    pub dispatch_threads: usize,
    /// Remote events that may wait for a dispatch worker.
    #[serde(default = "default_dispatch_queue_depth")]
    pub dispatch_queue_depth: usize,
    /// Messages of at least this many bytes are sent one slice per frame.
    #[serde(default = "default_chunking_threshold_bytes")]
    pub chunking_threshold_bytes: usize,
}

fn default_dispatch_threads() -> usize {
    4
}

fn default_dispatch_queue_depth() -> usize {
    1024
}

fn default_chunking_threshold_bytes() -> usize {
    1_024_000
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            strict_redelivery_ordering: false,
            exchange_transacted_sends: false,
            dispatch_threads: default_dispatch_threads(),
            dispatch_queue_depth: default_dispatch_queue_depth(),
            chunking_threshold_bytes: default_chunking_threshold_bytes(),
        }
    }
}

impl ClientConfig {
    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# corelink client configuration
#
# Notify consumers when a transaction they received under rolls back, so
# their read-ahead buffers are discarded and redelivery keeps its order.
strict_redelivery_ordering = false

# Wait for the peer to acknowledge every transacted send (default: false).
# Transacted sends are otherwise fire-and-forget; failures surface at commit.
exchange_transacted_sends = false

# Worker threads delivering messages and exceptions to listeners.
dispatch_threads = 4

# Remote events allowed to wait for a worker before delivery is refused.
dispatch_queue_depth = 1024

# Messages of at least this size are sent as one frame per slice.
chunking_threshold_bytes = 1024000
"#
    }

    /// Check the values are usable.
    ///
    /// # Errors
    ///
    /// Returns `NotPossibleInCurrentConfiguration` naming the first bad field.
    pub fn validate(&self) -> CommsResult<()> {
        if self.dispatch_threads == 0 {
            return Err(CommsError::NotPossibleInCurrentConfiguration(
                "dispatch_threads in corelink.toml must be at least 1".to_string(),
            ));
        }
        if self.dispatch_queue_depth == 0 {
            return Err(CommsError::NotPossibleInCurrentConfiguration(
                "dispatch_queue_depth in corelink.toml must be at least 1".to_string(),
            ));
        }
        if self.chunking_threshold_bytes == 0 {
            return Err(CommsError::NotPossibleInCurrentConfiguration(
                "chunking_threshold_bytes in corelink.toml must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> CommsResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CommsError::Resource(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: ClientConfig = toml::from_str(&content).map_err(|e| {
            CommsError::NotPossibleInCurrentConfiguration(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    ///
    /// Returns `Ok(())` whether the file was created or already existed.
    pub fn write_default_if_missing(path: &Path) -> CommsResult<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                CommsError::Resource(format!(
                    "Failed to write default config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> CommsResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| CommsError::Resource(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            CommsError::Resource(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }
}
