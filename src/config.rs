//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration file (config/local.toml)
//! 3. Environment variables (override)
//!
//! The drop radius and the compression threshold are hard product rules and
//! deliberately not configurable; see `geo::DROP_RADIUS_M` and
//! `upload::COMPRESSION_THRESHOLD_BYTES`.

use serde::Deserialize;

/// Main engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    pub identity: IdentityConfig,
    pub document_store: DocumentStoreConfig,
    pub blob_store: BlobStoreConfig,
    pub location: LocationConfig,
    pub logging: LoggingConfig,
}

/// Authenticated caller identity
///
/// Stamped onto every persisted document and uploaded object; the backend
/// access policies reject writes whose `userId` does not match the caller.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    /// Authenticated user id
    pub user_id: String,
    /// Installation device id
    pub device_id: String,
}

/// Remote document store (REST) configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DocumentStoreConfig {
    /// Base URL, e.g. "https://store.example.com/v1"
    pub base_url: String,
    /// Collection holding pin documents (e.g. "pins")
    pub collection: String,
    /// Bearer token for the authenticated caller
    pub auth_token: String,
    /// Request timeout in seconds
    pub timeout_seconds: u64,
}

/// Blob storage configuration (Cloudflare R2 / S3-compatible)
#[derive(Debug, Clone, Deserialize)]
pub struct BlobStoreConfig {
    /// Cloudflare account ID
    pub account_id: String,
    /// R2 access key ID
    pub access_key_id: String,
    /// R2 secret access key
    pub secret_access_key: String,
    /// Bucket holding video objects
    pub bucket: String,
    /// Public URL base (Custom Domain), e.g. "https://media.example.com"
    pub public_url: String,
}

/// Location timing configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LocationConfig {
    /// A fix older than this is treated as "location unknown" (default: 30)
    pub fix_staleness_seconds: u64,
    /// Give up on a one-shot fix request after this long (default: 15)
    pub one_shot_timeout_seconds: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

impl EngineConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (PINDROP_*)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, crate::error::EngineError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            // Start with default values
            .set_default("document_store.collection", "pins")?
            .set_default("document_store.timeout_seconds", 30)?
            .set_default("location.fix_staleness_seconds", 30)?
            .set_default("location.one_shot_timeout_seconds", 15)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            // Load from config/default.toml if it exists
            .add_source(File::with_name("config/default").required(false))
            // Load from config/local.toml if it exists (overrides default)
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables (PINDROP_*)
            .add_source(
                Environment::with_prefix("PINDROP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| crate::error::EngineError::Config(e.to_string()))?;

        let engine_config: Self = config
            .try_deserialize()
            .map_err(|e| crate::error::EngineError::Config(e.to_string()))?;
        engine_config.validate()?;
        Ok(engine_config)
    }

    pub(crate) fn validate(&self) -> Result<(), crate::error::EngineError> {
        if self.identity.user_id.trim().is_empty() {
            return Err(crate::error::EngineError::Config(
                "identity.user_id must not be empty".to_string(),
            ));
        }

        if self.identity.device_id.trim().is_empty() {
            return Err(crate::error::EngineError::Config(
                "identity.device_id must not be empty".to_string(),
            ));
        }

        url::Url::parse(&self.document_store.base_url).map_err(|e| {
            crate::error::EngineError::Config(format!(
                "document_store.base_url is not a valid URL: {}",
                e
            ))
        })?;

        if self.blob_store.bucket.trim().is_empty() {
            return Err(crate::error::EngineError::Config(
                "blob_store.bucket must not be empty".to_string(),
            ));
        }

        url::Url::parse(&self.blob_store.public_url).map_err(|e| {
            crate::error::EngineError::Config(format!(
                "blob_store.public_url is not a valid URL: {}",
                e
            ))
        })?;

        if self.location.fix_staleness_seconds == 0 {
            return Err(crate::error::EngineError::Config(
                "location.fix_staleness_seconds must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Staleness window as a std Duration
    pub fn fix_staleness(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.location.fix_staleness_seconds)
    }

    /// One-shot fix timeout as a std Duration
    pub fn one_shot_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.location.one_shot_timeout_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> EngineConfig {
        EngineConfig {
            identity: IdentityConfig {
                user_id: "user-1".to_string(),
                device_id: "device-1".to_string(),
            },
            document_store: DocumentStoreConfig {
                base_url: "https://store.example.com/v1".to_string(),
                collection: "pins".to_string(),
                auth_token: "token".to_string(),
                timeout_seconds: 30,
            },
            blob_store: BlobStoreConfig {
                account_id: "account".to_string(),
                access_key_id: "access-key".to_string(),
                secret_access_key: "secret-key".to_string(),
                bucket: "videos".to_string(),
                public_url: "https://media.example.com".to_string(),
            },
            location: LocationConfig {
                fix_staleness_seconds: 30,
                one_shot_timeout_seconds: 15,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }

    #[test]
    fn validate_accepts_complete_config() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_user_id() {
        let mut config = valid_config();
        config.identity.user_id = "  ".to_string();

        let error = config
            .validate()
            .expect_err("blank user id must fail validation");
        assert!(matches!(
            error,
            crate::error::EngineError::Config(message)
                if message.contains("identity.user_id")
        ));
    }

    #[test]
    fn validate_rejects_malformed_store_url() {
        let mut config = valid_config();
        config.document_store.base_url = "not a url".to_string();

        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_staleness_window() {
        let mut config = valid_config();
        config.location.fix_staleness_seconds = 0;

        assert!(config.validate().is_err());
    }
}
