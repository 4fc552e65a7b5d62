//! Layered configuration loading and validation for the inference gateway.

pub mod error;
pub mod settings;

pub use error::ConfigError;
pub use settings::{
    load_settings, AuthConfig, CacheConfig, GeneralRateLimitConfig, InferenceLimitConfig,
    ModelsConfig, ObservabilityConfig, PeerConfig, RateLimitConfig, ResponseCacheConfig,
    RuntimeEnvironment, ServerConfig, Settings,
};
