use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Rate limit configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Default rate limit (requests per window)
    pub default_limit: u32,
    /// Burst tolerance on top of the limit
    pub burst_size: u32,
    /// Time window in seconds
    pub window_seconds: u32,
}

/// Per-endpoint rate limit override
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointLimit {
    /// Rate limit (requests per window)
    pub limit: u32,
    /// Time window in seconds
    pub window_seconds: u32,
}

/// Redis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL
    pub url: String,
    /// Redis connection pool size
    pub pool_size: u32,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Shared admin token checked on mutating admin routes.
    /// Provisioned by the external authentication service.
    #[serde(default)]
    pub admin_token: Option<String>,
}

/// Behavior when the shared counter store is unreachable
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorePolicyConfig {
    /// Allow requests during a store outage (fail-open) or deny them (fail-closed)
    pub fail_open: bool,
    /// Timeout for a single store call in milliseconds
    pub timeout_ms: u64,
}

/// Thresholds mapping total threat volume to a threat level
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatThresholds {
    /// Totals below this are minimal
    pub low: u64,
    /// Totals below this are low
    pub medium: u64,
    /// Totals below this are medium, at or above it high
    pub high: u64,
}

impl Default for ThreatThresholds {
    fn default() -> Self {
        Self {
            low: 10,
            medium: 50,
            high: 200,
        }
    }
}

/// Threat event retention and analysis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatConfig {
    /// How long recorded events are retained, in hours
    pub retention_hours: u64,
    /// Hard cap on the in-memory event log
    pub max_events: usize,
    /// Number of offender IPs reported by the analyzer
    pub top_ips: usize,
    /// Threat level thresholds
    #[serde(default)]
    pub thresholds: ThreatThresholds,
}

/// Background maintenance configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    /// Whether the periodic sweeper runs
    pub enabled: bool,
    /// Sweep interval in seconds
    pub interval_seconds: u32,
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Redis configuration
    pub redis: RedisConfig,
    /// Default rate limit configuration
    pub rate_limit: RateLimitConfig,
    /// Per-endpoint overrides keyed by path pattern
    #[serde(default)]
    pub endpoint_limits: HashMap<String, EndpointLimit>,
    /// Store outage policy
    #[serde(default = "default_store_policy")]
    pub store_policy: StorePolicyConfig,
    /// Threat pipeline configuration
    #[serde(default = "default_threat_config")]
    pub threat: ThreatConfig,
    /// Background maintenance configuration
    #[serde(default = "default_maintenance_config")]
    pub maintenance: MaintenanceConfig,
}

fn default_store_policy() -> StorePolicyConfig {
    StorePolicyConfig {
        fail_open: true,
        timeout_ms: 200,
    }
}

fn default_threat_config() -> ThreatConfig {
    ThreatConfig {
        retention_hours: 24,
        max_events: 100_000,
        top_ips: 10,
        thresholds: ThreatThresholds::default(),
    }
}

fn default_maintenance_config() -> MaintenanceConfig {
    MaintenanceConfig {
        enabled: true,
        interval_seconds: 60,
    }
}

impl Config {
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        dotenv::dotenv().ok();

        Ok(Self {
            server: ServerConfig {
                host: std::env::var("SERVER_HOST")?,
                port: std::env::var("SERVER_PORT")?.parse()?,
                admin_token: std::env::var("ADMIN_TOKEN").ok(),
            },
            redis: RedisConfig {
                url: std::env::var("REDIS_URL")?,
                pool_size: std::env::var("REDIS_POOL_SIZE")?.parse()?,
            },
            rate_limit: RateLimitConfig {
                default_limit: std::env::var("RATE_LIMIT_DEFAULT")?.parse()?,
                burst_size: std::env::var("RATE_LIMIT_BURST")?.parse()?,
                window_seconds: std::env::var("RATE_LIMIT_WINDOW")?.parse()?,
            },
            endpoint_limits: HashMap::new(),
            store_policy: StorePolicyConfig {
                fail_open: std::env::var("STORE_FAIL_OPEN")?.parse()?,
                timeout_ms: std::env::var("STORE_TIMEOUT_MS")?.parse()?,
            },
            threat: ThreatConfig {
                retention_hours: std::env::var("THREAT_RETENTION_HOURS")?.parse()?,
                max_events: std::env::var("THREAT_MAX_EVENTS")?.parse()?,
                top_ips: std::env::var("THREAT_TOP_IPS")?.parse()?,
                thresholds: ThreatThresholds {
                    low: std::env::var("THREAT_LEVEL_LOW")?.parse()?,
                    medium: std::env::var("THREAT_LEVEL_MEDIUM")?.parse()?,
                    high: std::env::var("THREAT_LEVEL_HIGH")?.parse()?,
                },
            },
            maintenance: MaintenanceConfig {
                enabled: std::env::var("MAINTENANCE_ENABLED")?.parse()?,
                interval_seconds: std::env::var("MAINTENANCE_INTERVAL_SECS")?.parse()?,
            },
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                admin_token: None,
            },
            redis: RedisConfig {
                url: "redis://127.0.0.1:6379".to_string(),
                pool_size: 10,
            },
            rate_limit: RateLimitConfig {
                default_limit: 100,
                burst_size: 0,
                window_seconds: 60,
            },
            endpoint_limits: HashMap::new(),
            store_policy: default_store_policy(),
            threat: default_threat_config(),
            maintenance: default_maintenance_config(),
        }
    }
}
