//! Configuration management for the gateway guard service.
//!
//! This module handles loading and managing application configuration
//! from environment variables and configuration files.

use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use std::env;

use crate::models::Config;

/// Load configuration from a config file and environment variables
pub fn load_config() -> Result<Config, ConfigError> {
    let config_file = env::var("CONFIG_FILE").unwrap_or_else(|_| "config/default.toml".to_string());

    let config = ConfigBuilder::builder()
        .add_source(File::with_name(&config_file).required(false))
        .add_source(Environment::default())
        .set_default("server.host", "127.0.0.1")?
        .set_default("server.port", 8080)?
        .set_default("redis.url", "redis://127.0.0.1:6379")?
        .set_default("redis.pool_size", 10)?
        .set_default("rate_limit.default_limit", 100)?
        .set_default("rate_limit.burst_size", 0)?
        .set_default("rate_limit.window_seconds", 60)?
        .set_default("store_policy.fail_open", true)?
        .set_default("store_policy.timeout_ms", 200)?
        .set_default("threat.retention_hours", 24)?
        .set_default("threat.max_events", 100_000)?
        .set_default("threat.top_ips", 10)?
        .set_default("maintenance.enabled", true)?
        .set_default("maintenance.interval_seconds", 60)?
        .build()?;

    config.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_config_file() {
        env::set_var("CONFIG_FILE", "config/nonexistent.toml");
        let config = load_config().unwrap();
        assert_eq!(config.rate_limit.default_limit, 100);
        assert_eq!(config.rate_limit.window_seconds, 60);
        assert!(config.store_policy.fail_open);
        assert!(config.endpoint_limits.is_empty());
        assert_eq!(config.threat.thresholds.medium, 50);
    }
}
