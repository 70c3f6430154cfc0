//! Guest configuration handed over by the host at initialization.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::retry::RetryPolicy;

fn default_log_level() -> String {
    "info".to_string()
}

/// Settings the host passes to the init export as a JSON string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuestConfig {
    /// Host version string, informational only.
    pub version: Option<String>,
    /// Fallback filter for [`crate::logging::init`] when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Default policy for [`crate::fetch::fetch_bytes_with_retry`] callers.
    pub retry: RetryPolicy,
}

impl Default for GuestConfig {
    fn default() -> Self {
        Self {
            version: None,
            log_level: default_log_level(),
            retry: RetryPolicy::default(),
        }
    }
}

impl GuestConfig {
    /// Parse the init arguments. Blank input yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `raw` is not a JSON object of the
    /// expected shape.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(raw).map_err(|e| Error::InvalidConfig(e.to_string()))
    }
}
