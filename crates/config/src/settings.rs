//! Process-wide configuration, loaded once at startup (spec.md §6
//! "Environment"). Every knob listed there gets a typed, documented,
//! `#[serde(default)]` home here.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    #[default]
    Development,
    Staging,
    Production,
}

impl RuntimeEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, RuntimeEnvironment::Production)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_enabled: bool,
    pub cors_origins: Vec<String>,
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "0.0.0.0".to_string(),
            port: 8080,
            cors_enabled: true,
            cors_origins: vec!["*".to_string()],
            request_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub directory: String,
    pub max_context: u32,
    pub num_threads: u32,
    pub num_gpu_layers: u32,
    /// Substitutes the real child-process engine client with a deterministic
    /// mock (spec.md §9 dynamic-dispatch note).
    pub use_mock_engine: bool,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        ModelsConfig {
            directory: "./models".to_string(),
            max_context: 4096,
            num_threads: 4,
            num_gpu_layers: 0,
            use_mock_engine: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_instances: usize,
    pub load_timeout_secs: u64,
    pub health_poll_initial_backoff_ms: u64,
    pub health_poll_max_backoff_ms: u64,
    pub port_range_start: u16,
    pub port_range_end: u16,
    pub port_select_retries: u32,
    pub eviction_drain_timeout_secs: u64,
    pub shutdown_grace_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            max_instances: 3,
            load_timeout_secs: 120,
            health_poll_initial_backoff_ms: 100,
            health_poll_max_backoff_ms: 2000,
            port_range_start: 49152,
            port_range_end: 65535,
            port_select_retries: 20,
            eviction_drain_timeout_secs: 30,
            shutdown_grace_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseCacheConfig {
    pub max_entries: usize,
    pub ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for ResponseCacheConfig {
    fn default() -> Self {
        ResponseCacheConfig { max_entries: 1000, ttl_secs: 3600, sweep_interval_secs: 900 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralRateLimitConfig {
    pub requests_per_interval: u32,
    pub interval_secs: u64,
    pub burst: u32,
    pub max_buckets: usize,
    pub idle_sweep_interval_secs: u64,
    pub idle_ttl_secs: u64,
}

impl Default for GeneralRateLimitConfig {
    fn default() -> Self {
        GeneralRateLimitConfig {
            requests_per_interval: 60,
            interval_secs: 60,
            burst: 10,
            max_buckets: 10_000,
            idle_sweep_interval_secs: 300,
            idle_ttl_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceLimitConfig {
    pub per_ip_cap: usize,
    pub global_cap: usize,
}

impl Default for InferenceLimitConfig {
    fn default() -> Self {
        InferenceLimitConfig { per_ip_cap: 2, global_cap: 3 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RateLimitConfig {
    pub general: GeneralRateLimitConfig,
    pub inference: InferenceLimitConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    pub enabled: bool,
    pub announce_interval_secs: u64,
    pub broadcast_port: u16,
    pub ttl_multiplier: u32,
    pub node_id: Option<String>,
}

impl Default for PeerConfig {
    fn default() -> Self {
        PeerConfig {
            enabled: false,
            announce_interval_secs: 10,
            broadcast_port: 7331,
            ttl_multiplier: 3,
            node_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub require_auth: bool,
    pub allow_guest: bool,
    pub public_paths: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        AuthConfig {
            require_auth: false,
            allow_guest: true,
            public_paths: vec!["/health".into(), "/ready".into(), "/livez".into(), "/readyz".into(), "/metrics".into()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub log_json: bool,
    pub metrics_enabled: bool,
    pub metrics_port: u16,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        ObservabilityConfig {
            log_level: "info".to_string(),
            log_json: false,
            metrics_enabled: true,
            metrics_port: 9090,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub environment: RuntimeEnvironment,
    pub server: ServerConfig,
    pub models: ModelsConfig,
    pub cache: CacheConfig,
    pub response_cache: ResponseCacheConfig,
    pub rate_limit: RateLimitConfig,
    pub peer: PeerConfig,
    pub auth: AuthConfig,
    pub observability: ObservabilityConfig,
}

impl Settings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.port_range_start >= self.cache.port_range_end {
            return Err(ConfigError::InvalidValue {
                field: "cache.port_range_start".into(),
                message: "must be less than cache.port_range_end".into(),
            });
        }
        if self.cache.max_instances == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cache.max_instances".into(),
                message: "must be at least 1".into(),
            });
        }
        if self.rate_limit.inference.per_ip_cap == 0 || self.rate_limit.inference.global_cap == 0 {
            return Err(ConfigError::InvalidValue {
                field: "rate_limit.inference".into(),
                message: "caps must be at least 1".into(),
            });
        }
        if self.rate_limit.inference.per_ip_cap > self.rate_limit.inference.global_cap {
            return Err(ConfigError::InvalidValue {
                field: "rate_limit.inference.per_ip_cap".into(),
                message: "must not exceed global_cap".into(),
            });
        }
        if self.auth.require_auth && self.auth.allow_guest && self.environment.is_production() {
            tracing::warn!("require_auth and allow_guest are both set in production");
        }
        Ok(())
    }
}

/// Loads layered configuration: `config/default.{yaml,...}`, an optional
/// `config/{env}.{yaml,...}`, then `GATEWAY__`-prefixed environment
/// variables (`__` as the nesting separator), validated after
/// deserialization. Mirrors the teacher's `load_settings`.
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    use config::{Config, Environment, File};

    let mut builder = Config::builder();
    builder = builder.add_source(File::with_name("config/default").required(false));
    if let Some(env_name) = env {
        builder = builder.add_source(File::with_name(&format!("config/{}", env_name)).required(false));
    }
    builder = builder.add_source(Environment::with_prefix("GATEWAY").separator("__").try_parsing(true));

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;
    settings.validate()?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn rejects_inverted_port_range() {
        let mut settings = Settings::default();
        settings.cache.port_range_start = 60000;
        settings.cache.port_range_end = 50000;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn rejects_per_ip_cap_above_global() {
        let mut settings = Settings::default();
        settings.rate_limit.inference.per_ip_cap = 5;
        settings.rate_limit.inference.global_cap = 3;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn rejects_zero_max_instances() {
        let mut settings = Settings::default();
        settings.cache.max_instances = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn load_settings_falls_back_to_defaults_without_files_or_env() {
        let settings = load_settings(None).expect("should load from defaults alone");
        assert_eq!(settings.server.port, 8080);
    }
}
