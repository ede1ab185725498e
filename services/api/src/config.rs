//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Which conversation store the environment asks for, in fallback order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres(String),
    Mongo { uri: String, database: String },
    Memory,
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub log_level: Level,
    pub app_name: String,
    pub database_url: Option<String>,
    pub mongodb_uri: Option<String>,
    pub mongodb_database: String,
    pub openai_api_key: Option<String>,
    pub chat_model: String,
    pub gemini_api_key: Option<String>,
    pub gemini_api_base: String,
    pub analysis_model: String,
    pub image_model: String,
    pub blob_root: PathBuf,
    /// When unset, image URLs are derived from the request's forwarded headers.
    pub public_base_url: Option<String>,
    pub max_upload_bytes: usize,
    pub max_image_edge: u32,
    pub job_retention: Duration,
    pub job_sweep_interval: Duration,
    pub cors_origin: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], 8080)),
            log_level: Level::INFO,
            app_name: "photo_levelup".to_string(),
            database_url: None,
            mongodb_uri: None,
            mongodb_database: "photo_coach".to_string(),
            openai_api_key: None,
            chat_model: "gpt-4o".to_string(),
            gemini_api_key: None,
            gemini_api_base: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            analysis_model: "gemini-2.5-flash".to_string(),
            image_model: "gemini-2.5-flash-image".to_string(),
            blob_root: PathBuf::from("./data/blobs"),
            public_base_url: None,
            max_upload_bytes: 20 * 1024 * 1024,
            max_image_edge: 1024,
            job_retention: Duration::from_secs(3600),
            job_sweep_interval: Duration::from_secs(300),
            cors_origin: "http://localhost:3000".to_string(),
        }
    }
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        let defaults = Self::default();

        // --- Load Server Settings ---
        let bind_address = match non_empty_var("BIND_ADDRESS") {
            Some(raw) => raw.parse::<SocketAddr>().map_err(|e| {
                ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
            })?,
            None => defaults.bind_address,
        };

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Load Storage Settings ---
        let database_url = non_empty_var("DATABASE_URL");
        let mongodb_uri = non_empty_var("MONGODB_URI");
        let blob_root = non_empty_var("BLOB_ROOT")
            .map(PathBuf::from)
            .unwrap_or(defaults.blob_root);

        // --- Load API Keys (as optional) ---
        let openai_api_key = non_empty_var("OPENAI_API_KEY");
        let gemini_api_key = non_empty_var("GEMINI_API_KEY");

        let gemini_api_base = non_empty_var("GEMINI_API_BASE")
            .map(|base| base.trim_end_matches('/').to_string())
            .unwrap_or(defaults.gemini_api_base);

        Ok(Self {
            bind_address,
            log_level,
            app_name: non_empty_var("APP_NAME").unwrap_or(defaults.app_name),
            database_url,
            mongodb_uri,
            mongodb_database: non_empty_var("MONGODB_DATABASE")
                .unwrap_or(defaults.mongodb_database),
            openai_api_key,
            chat_model: non_empty_var("CHAT_MODEL").unwrap_or(defaults.chat_model),
            gemini_api_key,
            gemini_api_base,
            analysis_model: non_empty_var("ANALYSIS_MODEL").unwrap_or(defaults.analysis_model),
            image_model: non_empty_var("IMAGE_MODEL").unwrap_or(defaults.image_model),
            blob_root,
            public_base_url: non_empty_var("PUBLIC_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string()),
            max_upload_bytes: parse_var("MAX_UPLOAD_BYTES")?.unwrap_or(defaults.max_upload_bytes),
            max_image_edge: parse_var("MAX_IMAGE_EDGE")?.unwrap_or(defaults.max_image_edge),
            job_retention: positive_secs(
                "JOB_RETENTION_SECS",
                parse_var("JOB_RETENTION_SECS")?,
                defaults.job_retention,
            )?,
            job_sweep_interval: positive_secs(
                "JOB_SWEEP_INTERVAL_SECS",
                parse_var("JOB_SWEEP_INTERVAL_SECS")?,
                defaults.job_sweep_interval,
            )?,
            cors_origin: non_empty_var("CORS_ORIGIN").unwrap_or(defaults.cors_origin),
        })
    }

    /// The Gemini key; the vision and generation adapters cannot start without it.
    pub fn require_gemini_api_key(&self) -> Result<&str, ConfigError> {
        require(&self.gemini_api_key, "GEMINI_API_KEY")
    }

    pub fn require_openai_api_key(&self) -> Result<&str, ConfigError> {
        require(&self.openai_api_key, "OPENAI_API_KEY")
    }

    /// PostgreSQL wins over MongoDB; with neither configured, state lives in memory.
    pub fn store_backends(&self) -> Vec<StoreBackend> {
        let mut backends = Vec::new();
        if let Some(url) = &self.database_url {
            backends.push(StoreBackend::Postgres(url.clone()));
        }
        if let Some(uri) = &self.mongodb_uri {
            backends.push(StoreBackend::Mongo {
                uri: uri.clone(),
                database: self.mongodb_database.clone(),
            });
        }
        backends.push(StoreBackend::Memory);
        backends
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_var<T>(name: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    non_empty_var(name)
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string()))
        })
        .transpose()
}

fn require<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str, ConfigError> {
    value
        .as_deref()
        .ok_or_else(|| ConfigError::MissingVar(name.to_string()))
}

/// Job periods must be non-zero.
fn positive_secs(
    name: &str,
    value: Option<u64>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match value {
        None => Ok(default),
        Some(0) => Err(ConfigError::InvalidValue(
            name.to_string(),
            "must be greater than zero".to_string(),
        )),
        Some(secs) => Ok(Duration::from_secs(secs)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backends_fall_back_in_order() {
        let mut config = Config::default();
        assert_eq!(config.store_backends(), vec![StoreBackend::Memory]);

        config.mongodb_uri = Some("mongodb://localhost".to_string());
        config.database_url = Some("postgres://localhost/photo".to_string());
        assert_eq!(
            config.store_backends(),
            vec![
                StoreBackend::Postgres("postgres://localhost/photo".to_string()),
                StoreBackend::Mongo {
                    uri: "mongodb://localhost".to_string(),
                    database: "photo_coach".to_string(),
                },
                StoreBackend::Memory,
            ]
        );
    }

    #[test]
    fn job_periods_must_be_positive() {
        let default = Duration::from_secs(300);
        assert_eq!(
            positive_secs("JOB_SWEEP_INTERVAL_SECS", None, default).unwrap(),
            default
        );
        assert_eq!(
            positive_secs("JOB_SWEEP_INTERVAL_SECS", Some(30), default).unwrap(),
            Duration::from_secs(30)
        );

        let err = positive_secs("JOB_RETENTION_SECS", Some(0), default).unwrap_err();
        assert!(matches!(
            &err,
            ConfigError::InvalidValue(name, _) if name == "JOB_RETENTION_SECS"
        ));
    }

    #[test]
    fn missing_model_keys_name_the_variable() {
        let mut config = Config::default();
        let err = config.require_gemini_api_key().unwrap_err();
        assert!(matches!(&err, ConfigError::MissingVar(name) if name == "GEMINI_API_KEY"));
        assert!(matches!(
            config.require_openai_api_key(),
            Err(ConfigError::MissingVar(name)) if name == "OPENAI_API_KEY"
        ));

        config.openai_api_key = Some("sk-test".to_string());
        assert_eq!(config.require_openai_api_key().unwrap(), "sk-test");
    }
}
