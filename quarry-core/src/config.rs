use std::env;

use crate::errors::{ConfigError, QuarryError};

/// Runtime environment used by the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    fn from_str(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            "staging" | "stage" => Environment::Staging,
            _ => Environment::Development,
        }
    }
}

impl Default for Environment {
    fn default() -> Self {
        Environment::Development
    }
}

/// Global configuration shared across the services.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub environment: Environment,
    pub node_name: String,
    pub http_bind: Option<String>,
}

impl CoreConfig {
    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = env::var("QUARRY_ENV")
            .map(|raw| Environment::from_str(&raw))
            .unwrap_or_default();

        let node_name =
            env::var("QUARRY_NODE_NAME").unwrap_or_else(|_| "quarry-node".to_string());
        let http_bind = env::var("QUARRY_HTTP_BIND").ok();

        Ok(Self {
            environment,
            node_name,
            http_bind,
        })
    }

    /// Whether the service is running in production.
    pub fn is_production(&self) -> bool {
        matches!(self.environment, Environment::Production)
    }
}

/// Helper that loads config and converts to the canonical Quarry error type.
pub fn load_core_config() -> Result<CoreConfig, QuarryError> {
    Ok(CoreConfig::from_env()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_default_environment() {
        std::env::remove_var("QUARRY_ENV");
        let cfg = CoreConfig::from_env().expect("config should load");
        assert_eq!(cfg.environment, Environment::Development);
        assert_eq!(cfg.node_name, "quarry-node");
    }
}
