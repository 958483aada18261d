//! # Configuration Module
//!
//! Loads run settings from environment variables (and a `.env` file when one
//! exists). Command-line flags are applied on top in `main.rs`.

use anyhow::{Context, Result};
use safra_sim::SimConfig;
use std::env;
use std::time::Duration;

// =============================================================================
// CONFIGURATION STRUCT
// =============================================================================
/// Settings for one invocation of the simulator.
#[derive(Debug, Clone)]
pub struct Config {
    /// Capacity of each node's distance mailbox
    pub mailbox_capacity: usize,

    /// Capacity of each node's token mailbox
    pub token_capacity: usize,

    /// How long a run may go without a protocol step before it is reported as stalled
    pub stall_timeout: Duration,

    /// Keep the ordered protocol trace
    pub record_trace: bool,

    /// Log level for the application
    pub log_level: String,
}

// =============================================================================
// DEFAULT IMPLEMENTATION
// =============================================================================
impl Default for Config {
    fn default() -> Self {
        let sim = SimConfig::default();
        Self {
            mailbox_capacity: sim.mailbox_capacity,
            token_capacity: sim.token_capacity,
            stall_timeout: sim.stall_timeout,
            record_trace: sim.record_trace,
            log_level: "info".to_string(),
        }
    }
}

// =============================================================================
// CONFIGURATION LOADING
// =============================================================================
impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Example
    /// ```ignore
    /// let config = Config::from_env()?;
    /// println!("mailbox capacity: {}", config.mailbox_capacity);
    /// ```
    pub fn from_env() -> Result<Self> {
        // Load .env file if it exists (silently ignore if not found)
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Config::default();

        if let Some(val) = lookup("SAFRA_MAILBOX_CAPACITY") {
            config.mailbox_capacity = val
                .parse()
                .context("SAFRA_MAILBOX_CAPACITY must be a valid positive integer")?;
        }

        if let Some(val) = lookup("SAFRA_TOKEN_CAPACITY") {
            config.token_capacity = val
                .parse()
                .context("SAFRA_TOKEN_CAPACITY must be a valid positive integer")?;
        }

        // Durations use humantime syntax: "30s", "2m", "1m 30s"
        if let Some(val) = lookup("SAFRA_STALL_TIMEOUT") {
            config.stall_timeout = humantime::parse_duration(&val)
                .context("SAFRA_STALL_TIMEOUT must be a duration such as 30s or 2m")?;
        }

        if let Some(val) = lookup("SAFRA_RECORD_TRACE") {
            config.record_trace = val
                .parse()
                .context("SAFRA_RECORD_TRACE must be true or false")?;
        }

        if let Some(val) = lookup("RUST_LOG") {
            config.log_level = val;
        }

        Ok(config)
    }

    /// Validate the configuration before any node task is spawned.
    pub fn validate(&self) -> Result<()> {
        if self.mailbox_capacity == 0 {
            anyhow::bail!("SAFRA_MAILBOX_CAPACITY must be at least 1");
        }

        if self.token_capacity == 0 {
            anyhow::bail!("SAFRA_TOKEN_CAPACITY must be at least 1");
        }

        if self.stall_timeout.is_zero() {
            anyhow::bail!("SAFRA_STALL_TIMEOUT must be greater than zero");
        }

        Ok(())
    }

    /// Library configuration for a run
    pub fn sim_config(&self) -> SimConfig {
        SimConfig::default()
            .with_mailbox_capacity(self.mailbox_capacity)
            .with_token_capacity(self.token_capacity)
            .with_stall_timeout(self.stall_timeout)
            .with_trace(self.record_trace)
    }
}

// =============================================================================
// UNIT TESTS
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.mailbox_capacity, 64);
        assert_eq!(config.token_capacity, 5);
        assert_eq!(config.stall_timeout, Duration::from_secs(30));
        assert!(config.record_trace);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_config_validation_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides_from_lookup() {
        let config = Config::from_lookup(lookup(&[
            ("SAFRA_MAILBOX_CAPACITY", "8"),
            ("SAFRA_STALL_TIMEOUT", "1m 30s"),
            ("SAFRA_RECORD_TRACE", "false"),
        ]))
        .unwrap();

        assert_eq!(config.mailbox_capacity, 8);
        assert_eq!(config.token_capacity, 5);
        assert_eq!(config.stall_timeout, Duration::from_secs(90));
        assert!(!config.record_trace);

        let sim = config.sim_config();
        assert_eq!(sim.mailbox_capacity, 8);
        assert!(!sim.record_trace);
    }

    #[test]
    fn test_bad_number_is_reported() {
        let err = Config::from_lookup(lookup(&[("SAFRA_TOKEN_CAPACITY", "many")])).unwrap_err();
        assert!(err.to_string().contains("SAFRA_TOKEN_CAPACITY"));
    }

    #[test]
    fn test_config_validation_zero_capacity() {
        let mut config = Config::default();
        config.mailbox_capacity = 0; // Invalid: must be at least 1
        assert!(config.validate().is_err());
    }
}
