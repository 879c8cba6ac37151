//! Configuration file loading.

use std::path::Path;

use anyhow::{Context, Result};
use discovery_core::DiscoveryConfig;

/// Load a `DiscoveryConfig` from a JSON file.
///
/// Omitted optional fields take their defaults. The result is not validated
/// here; `DiscoveryService::start` does that.
pub fn load_config(path: &Path) -> Result<DiscoveryConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: DiscoveryConfig = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    Ok(config)
}
