//! Configuration
//!
//! Loaded from a TOML file; every knob has a default so the client runs
//! with no configuration at all.

use crate::client::identity::DuidType;
use crate::telemetry::LogConfig;
use crate::{Error, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Stateful (address allocation) when true, stateless otherwise
    pub allocate_address: bool,
    /// Use a per-client DUID and IAID 0 instead of the shared identity
    pub privacy_required: bool,
    /// Override the ORO contents process-wide
    pub requested_options: Option<Vec<u16>>,
    /// Algorithm for the process-wide DUID
    pub duid_type: DuidType,
    /// Grace threshold for honoring pre-sleep renew/rebind timers
    pub wake_skew_secs: u32,
    pub log: LogConfig,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            allocate_address: true,
            privacy_required: false,
            requested_options: None,
            duid_type: DuidType::default(),
            wake_skew_secs: 30,
            log: LogConfig::default(),
        }
    }
}

/// Load configuration from a TOML file
pub fn load<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(Error::Io)?;
    let config: Config = toml::from_str(&content).map_err(|e| Error::Config(e.to_string()))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.allocate_address);
        assert!(!config.privacy_required);
        assert_eq!(config.wake_skew_secs, 30);
        assert_eq!(config.duid_type, DuidType::LinkLayerTime);
        assert!(config.requested_options.is_none());
    }

    #[test]
    fn test_parse_full() {
        let config: Config = toml::from_str(
            r#"
            allocate_address = false
            privacy_required = true
            requested_options = [23, 24]
            duid_type = "link-layer"
            wake_skew_secs = 60

            [log]
            level = "debug"
            format = "json"
            "#,
        )
        .unwrap();
        assert!(!config.allocate_address);
        assert!(config.privacy_required);
        assert_eq!(config.requested_options, Some(vec![23, 24]));
        assert_eq!(config.duid_type, DuidType::LinkLayer);
        assert_eq!(config.wake_skew_secs, 60);
        assert_eq!(config.log.level, "debug");
    }
}
