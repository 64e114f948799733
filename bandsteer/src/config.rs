// Configuration file parser

//! Configuration file parsing and validation
//!
//! This module handles loading the daemon's TOML configuration file and
//! validating the steering tunables before they reach the engine.

use crate::types::Config;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Upper bound on BTM candidate list entries
pub const MAX_BTM_NEIGHBORS: usize = 32;

/// Load configuration from TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;

    let config: Config = toml::from_str(&contents).context("Failed to parse config file")?;

    validate_config(&config)?;
    Ok(config)
}

/// Validate configuration values
fn validate_config(config: &Config) -> Result<()> {
    if config.general.dump_path.is_empty() {
        anyhow::bail!("dump_path cannot be empty");
    }

    let steering = &config.steering;
    if steering.report_interval_secs == 0 {
        anyhow::bail!("report_interval_secs must be > 0");
    }

    if steering.btm_rate_limit_secs == 0 {
        anyhow::bail!("btm_rate_limit_secs must be > 0");
    }

    if steering.rrm_validity_secs == 0 {
        anyhow::bail!("rrm_validity_secs must be > 0");
    }

    if steering.btm_max_neighbors == 0 || steering.btm_max_neighbors > MAX_BTM_NEIGHBORS {
        anyhow::bail!(
            "btm_max_neighbors must be within 1..={}, got {}",
            MAX_BTM_NEIGHBORS,
            steering.btm_max_neighbors
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_config() {
        let file = write_config(
            r#"
[general]
log_level = "debug"
dump_path = "/tmp/bandsteer.dump"

[steering]
report_interval_secs = 30
btm_max_neighbors = 4
"#,
        );

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.general.dump_path, "/tmp/bandsteer.dump");
        assert_eq!(config.steering.report_interval_secs, 30);
        assert_eq!(config.steering.btm_max_neighbors, 4);

        // Unset values fall back to defaults
        assert_eq!(config.steering.btm_rate_limit_secs, 3);
        assert_eq!(config.steering.deauth_delay_secs, 10);
        assert_eq!(config.steering.rrm_validity_secs, 15);
    }

    #[test]
    fn test_load_empty_config() {
        let file = write_config("");
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.general.dump_path, "/run/bandsteer/dump");
        assert_eq!(config.steering.report_interval_secs, 60);
    }

    #[test]
    fn test_load_config_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn test_load_config_malformed() {
        let file = write_config("[steering]\nreport_interval_secs = \"soon\"\n");
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn test_validate_config() {
        let config = Config::default();
        assert!(validate_config(&config).is_ok());

        // Zero report interval
        let mut bad_config = config.clone();
        bad_config.steering.report_interval_secs = 0;
        assert!(validate_config(&bad_config).is_err());

        // Zero BTM rate limit
        let mut bad_config = config.clone();
        bad_config.steering.btm_rate_limit_secs = 0;
        assert!(validate_config(&bad_config).is_err());

        // Zero RRM validity
        let mut bad_config = config.clone();
        bad_config.steering.rrm_validity_secs = 0;
        assert!(validate_config(&bad_config).is_err());

        // Empty dump path
        let mut bad_config = config.clone();
        bad_config.general.dump_path = "".to_string();
        assert!(validate_config(&bad_config).is_err());
    }

    #[test]
    fn test_validate_config_neighbor_bounds() {
        let mut config = Config::default();

        config.steering.btm_max_neighbors = 0;
        assert!(validate_config(&config).is_err());

        config.steering.btm_max_neighbors = 1;
        assert!(validate_config(&config).is_ok());

        config.steering.btm_max_neighbors = MAX_BTM_NEIGHBORS;
        assert!(validate_config(&config).is_ok());

        config.steering.btm_max_neighbors = MAX_BTM_NEIGHBORS + 1;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_zero_deauth_delay_allowed() {
        // Deauth right away, without waiting for BTM
        let mut config = Config::default();
        config.steering.deauth_delay_secs = 0;
        assert!(validate_config(&config).is_ok());
    }
}
