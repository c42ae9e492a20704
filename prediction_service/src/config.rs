use std::{net::SocketAddr, path::PathBuf};

use thiserror::Error;

pub const DEFAULT_MODEL_FILE: &str = "lin_reg.bin";
pub const DEFAULT_MONGODB_ADDRESS: &str = "mongodb://127.0.0.1:27017";
pub const DEFAULT_EVIDENTLY_SERVICE: &str = "http://127.0.0.1:5000";
pub const DEFAULT_PORT: u16 = 9696;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid PORT value {0:?}")]
    InvalidPort(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub model_file: PathBuf,
    pub mongodb_address: String,
    pub evidently_address: String,
    /// Reported in streaming envelopes; the bundle's run id is used when unset.
    pub model_version: Option<String>,
    pub port: u16,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let port = match lookup("PORT") {
            Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidPort(raw))?,
            None => DEFAULT_PORT,
        };

        Ok(Self {
            model_file: lookup("MODEL_FILE").unwrap_or_else(|| DEFAULT_MODEL_FILE.to_string()).into(),
            mongodb_address: lookup("MONGODB_ADDRESS").unwrap_or_else(|| DEFAULT_MONGODB_ADDRESS.to_string()),
            evidently_address: lookup("EVIDENTLY_SERVICE").unwrap_or_else(|| DEFAULT_EVIDENTLY_SERVICE.to_string()),
            model_version: lookup("MODEL_VERSION").filter(|v| !v.is_empty()),
            port,
        })
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let cfg = ServiceConfig::from_lookup(|_| None).unwrap();
        assert_eq!(cfg.model_file, PathBuf::from("lin_reg.bin"));
        assert_eq!(cfg.mongodb_address, "mongodb://127.0.0.1:27017");
        assert_eq!(cfg.evidently_address, "http://127.0.0.1:5000");
        assert_eq!(cfg.model_version, None);
        assert_eq!(cfg.bind_addr().port(), 9696);
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("MODEL_FILE", "/models/bundle.bin"),
            ("MONGODB_ADDRESS", "mongodb://mongo:27017"),
            ("EVIDENTLY_SERVICE", "http://evidently:8085"),
            ("MODEL_VERSION", "123"),
            ("PORT", "8080"),
        ]
        .into_iter()
        .collect();

        let cfg = ServiceConfig::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(cfg.model_file, PathBuf::from("/models/bundle.bin"));
        assert_eq!(cfg.evidently_address, "http://evidently:8085");
        assert_eq!(cfg.model_version.as_deref(), Some("123"));
        assert_eq!(cfg.port, 8080);
    }

    #[test]
    fn test_bad_port() {
        let err = ServiceConfig::from_lookup(|k| (k == "PORT").then(|| "http".to_string())).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPort(ref v) if v == "http"));
    }
}
