//! Configuration management for Tollgate.
//!
//! Settings are layered, each source overriding the previous one:
//! 1. Built-in defaults
//! 2. An optional YAML file
//! 3. `TOLLGATE__*` environment variables (`TOLLGATE__LIMITER__RATE=5`)
//!
//! Command line flags are applied on top by the binary.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::ratelimit::RateLimiterConfig;

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "TOLLGATE";

/// Main configuration for the Tollgate service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TollgateConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub limiter: LimiterSettings,
}

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// Rate limiting configuration.
///
/// Zero values mean "use the store default".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LimiterSettings {
    /// Tokens added per second
    #[serde(default)]
    pub rate: f64,

    /// Maximum bucket capacity
    #[serde(default)]
    pub burst: u32,

    /// Idle time in seconds after which a visitor is evictable
    #[serde(default)]
    pub expires_in_secs: u64,

    /// Seconds between reclaim passes; 0 uses the expiry window
    #[serde(default)]
    pub reclaim_interval_secs: u64,

    /// Soft cap on tracked identifiers
    #[serde(default)]
    pub max_visitors: Option<usize>,
}

impl LimiterSettings {
    /// Convert to the store configuration.
    pub fn to_limiter_config(&self) -> RateLimiterConfig {
        RateLimiterConfig {
            rate: self.rate,
            burst: self.burst,
            expires_in: Duration::from_secs(self.expires_in_secs),
            max_visitors: self.max_visitors,
        }
    }

    pub fn reclaim_interval(&self) -> Duration {
        Duration::from_secs(self.reclaim_interval_secs)
    }
}

impl TollgateConfig {
    /// Load configuration from an optional file plus the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Yaml));
        }
        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Load configuration from a YAML string, ignoring the environment.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?
            .try_deserialize()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TollgateError;

    #[test]
    fn test_defaults() {
        let config = TollgateConfig::default();
        assert_eq!(config.server.listen_addr, "127.0.0.1:8080".parse::<SocketAddr>().unwrap());
        assert_eq!(config.limiter.to_limiter_config(), RateLimiterConfig::default());
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
server:
  listen_addr: "0.0.0.0:9000"
limiter:
  rate: 1.5
  burst: 3
  expires_in_secs: 120
  max_visitors: 10000
"#;
        let config = TollgateConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.server.listen_addr, "0.0.0.0:9000".parse::<SocketAddr>().unwrap());

        let limiter = config.limiter.to_limiter_config();
        assert_eq!(limiter.rate, 1.5);
        assert_eq!(limiter.burst, 3);
        assert_eq!(limiter.expires_in, Duration::from_secs(120));
        assert_eq!(limiter.max_visitors, Some(10000));
        assert_eq!(config.limiter.reclaim_interval(), Duration::ZERO);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = TollgateConfig::from_yaml("limiter:\n  burst: 7\n").unwrap();
        assert_eq!(config.server, ServerConfig::default());
        assert_eq!(config.limiter.burst, 7);
        assert_eq!(config.limiter.rate, 0.0);
    }

    #[test]
    fn test_load_layers_environment_over_file() {
        let path = std::env::temp_dir().join(format!("tollgate-{}.yaml", std::process::id()));
        std::fs::write(
            &path,
            "server:\n  listen_addr: \"0.0.0.0:9000\"\nlimiter:\n  rate: 2.5\n  burst: 4\n",
        )
        .unwrap();

        std::env::set_var("TOLLGATE__LIMITER__BURST", "9");
        std::env::set_var("TOLLGATE__LIMITER__EXPIRES_IN_SECS", "45");
        let loaded = TollgateConfig::load(Some(&path));
        std::env::remove_var("TOLLGATE__LIMITER__BURST");
        std::env::remove_var("TOLLGATE__LIMITER__EXPIRES_IN_SECS");
        std::fs::remove_file(&path).unwrap();

        let config = loaded.unwrap();
        assert_eq!(config.server.listen_addr, "0.0.0.0:9000".parse::<SocketAddr>().unwrap());
        assert_eq!(config.limiter.rate, 2.5);
        assert_eq!(config.limiter.burst, 9);
        assert_eq!(config.limiter.expires_in_secs, 45);
    }

    #[test]
    fn test_invalid_yaml_is_settings_error() {
        let err = TollgateConfig::from_yaml("server:\n  listen_addr: not-an-address\n")
            .unwrap_err();
        assert!(matches!(err, TollgateError::Settings(_)));
    }
}
