//! Pipeline and service configuration.
//!
//! All settings come from environment variables with production defaults;
//! the builder methods exist for embedding and tests.

use std::env;
use std::time::Duration;
use thiserror::Error;

use crate::scheduler::job::{BackoffPolicy, DEFAULT_BACKOFF_DELAY_MS, DEFAULT_MAX_ATTEMPTS};

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration for the whole verification service.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    // Backing stores
    /// Redis connection URL.
    pub redis_url: String,
    /// PostgreSQL connection URL.
    pub database_url: String,

    // LLM settings
    /// Chat-completions endpoint base URL.
    pub llm_api_base: String,
    /// API key for the LLM endpoint.
    pub llm_api_key: String,
    /// Model used by all agents.
    pub llm_model: String,

    // Search settings
    /// Search API base URL.
    pub search_api_base: String,
    /// Search API key.
    pub search_api_key: String,
    /// Number of sources fetched per claim.
    pub search_results: usize,

    // Vector index (optional)
    /// Vector index base URL; the index stage is skipped when unset.
    pub vector_api_base: Option<String>,
    /// Vector index API key.
    pub vector_api_key: Option<String>,

    // Queue and workers
    /// Maximum outstanding jobs.
    pub max_queue_size: usize,
    /// Worker pool concurrency.
    pub worker_concurrency: usize,
    /// Store-level job deadline.
    pub job_timeout: Duration,
    /// Default attempt budget per job.
    pub default_max_attempts: u32,
    /// Default retry backoff.
    pub default_backoff: BackoffPolicy,

    // Cache and shutdown
    /// Hot-cache TTL for verified claims.
    pub cache_ttl: Duration,
    /// Grace period for in-flight jobs during shutdown.
    pub shutdown_grace: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            database_url: String::new(),
            llm_api_base: String::new(),
            llm_api_key: String::new(),
            llm_model: "gemini-2.0-flash".to_string(),
            search_api_base: "https://api.exa.ai".to_string(),
            search_api_key: String::new(),
            search_results: 5,
            vector_api_base: None,
            vector_api_key: None,
            max_queue_size: 1000,
            worker_concurrency: 2,
            job_timeout: Duration::from_millis(300_000),
            default_max_attempts: DEFAULT_MAX_ATTEMPTS,
            default_backoff: BackoffPolicy::exponential(DEFAULT_BACKOFF_DELAY_MS),
            cache_ttl: Duration::from_secs(24 * 60 * 60),
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

fn required(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

impl PipelineConfig {
    /// Loads the configuration from the environment.
    ///
    /// Required: `DATABASE_URL`, `LLM_API_BASE`, `LLM_API_KEY`,
    /// `SEARCH_API_KEY`. Everything else falls back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let config = Self {
            redis_url: env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            database_url: required("DATABASE_URL")?,
            llm_api_base: required("LLM_API_BASE")?,
            llm_api_key: required("LLM_API_KEY")?,
            llm_model: env::var("LLM_MODEL").unwrap_or(defaults.llm_model),
            search_api_base: env::var("SEARCH_API_BASE").unwrap_or(defaults.search_api_base),
            search_api_key: required("SEARCH_API_KEY")?,
            search_results: parse_env("SEARCH_NUM_RESULTS", defaults.search_results)?,
            vector_api_base: env::var("VECTOR_API_BASE").ok(),
            vector_api_key: env::var("VECTOR_API_KEY").ok(),
            max_queue_size: parse_env("MAX_QUEUE_SIZE", defaults.max_queue_size)?,
            worker_concurrency: parse_env("WORKER_CONCURRENCY", defaults.worker_concurrency)?,
            job_timeout: Duration::from_millis(parse_env(
                "JOB_TIMEOUT",
                defaults.job_timeout.as_millis() as u64,
            )?),
            default_max_attempts: parse_env("JOB_MAX_ATTEMPTS", defaults.default_max_attempts)?,
            default_backoff: BackoffPolicy::exponential(parse_env(
                "JOB_BACKOFF_DELAY_MS",
                DEFAULT_BACKOFF_DELAY_MS,
            )?),
            cache_ttl: Duration::from_secs(parse_env(
                "CLAIM_CACHE_TTL_SECS",
                defaults.cache_ttl.as_secs(),
            )?),
            shutdown_grace: Duration::from_secs(parse_env(
                "SHUTDOWN_GRACE_SECS",
                defaults.shutdown_grace.as_secs(),
            )?),
        };

        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_queue_size == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_queue_size must be positive".to_string(),
            ));
        }
        if self.worker_concurrency == 0 || self.worker_concurrency > 10 {
            return Err(ConfigError::ValidationFailed(
                "worker_concurrency must be between 1 and 10".to_string(),
            ));
        }
        if self.search_results == 0 {
            return Err(ConfigError::ValidationFailed(
                "search_results must be positive".to_string(),
            ));
        }
        if self.vector_api_base.is_some() && self.vector_api_key.is_none() {
            return Err(ConfigError::ValidationFailed(
                "VECTOR_API_KEY is required when VECTOR_API_BASE is set".to_string(),
            ));
        }
        Ok(())
    }

    /// Sets the worker concurrency.
    pub fn with_worker_concurrency(mut self, concurrency: usize) -> Self {
        self.worker_concurrency = concurrency;
        self
    }

    /// Sets the outstanding-job bound.
    pub fn with_max_queue_size(mut self, max: usize) -> Self {
        self.max_queue_size = max;
        self
    }

    /// Sets the hot-cache TTL.
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Sets the job deadline.
    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_queue_size, 1000);
        assert_eq!(config.worker_concurrency, 2);
        assert_eq!(config.job_timeout, Duration::from_millis(300_000));
        assert_eq!(config.default_max_attempts, 3);
        assert_eq!(config.cache_ttl, Duration::from_secs(86_400));
        assert_eq!(config.search_results, 5);
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let config = PipelineConfig::default().with_max_queue_size(0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationFailed(_))
        ));
    }

    #[test]
    fn test_validate_bounds_concurrency() {
        let config = PipelineConfig::default().with_worker_concurrency(11);
        assert!(config.validate().is_err());

        let config = PipelineConfig::default().with_worker_concurrency(10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_vector_key_pairing() {
        let mut config = PipelineConfig::default();
        config.vector_api_base = Some("https://index.example".to_string());
        assert!(config.validate().is_err());

        config.vector_api_key = Some("key".to_string());
        assert!(config.validate().is_ok());
    }
}
