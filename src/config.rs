//! Process configuration, read from environment variables (optionally
//! preloaded from a `.env` file).

use std::str::FromStr;
use std::time::Duration;

use crate::messaging::IngestConfig;
use crate::service::{DEFAULT_CACHE_TTL, DEFAULT_PRELOAD_PAGE_SIZE};
use crate::store::DEFAULT_OPERATION_TIMEOUT;
use crate::utils::RetryConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} has invalid value {value:?}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub app_name: String,
    pub app_version: String,
    pub http: HttpConfig,
    pub postgres: PostgresConfig,
    pub redis: RedisConfig,
    pub kafka: KafkaConfig,
    pub ingest: IngestConfig,
    pub preload_concurrency: usize,
    pub preload_page_size: usize,
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
    /// Deadline applied to each lookup request
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub url: String,
    pub max_connections: u32,
    /// Fixed bound on every store operation
    pub operation_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
    pub ttl: Duration,
    pub operation_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
    pub topic: String,
    pub group_id: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        Ok(Self {
            app_name: env.string("APP_NAME", "order-service"),
            app_version: env.string("APP_VERSION", env!("CARGO_PKG_VERSION")),
            http: HttpConfig {
                host: env.string("HTTP_HOST", "0.0.0.0"),
                port: env.parse("HTTP_PORT", 8080)?,
                request_timeout: env.millis("HTTP_REQUEST_TIMEOUT_MS", Duration::from_millis(3000))?,
            },
            postgres: PostgresConfig {
                url: env.required("DATABASE_URL")?,
                max_connections: env.parse("DB_MAX_CONNECTIONS", 10)?,
                operation_timeout: env.millis("STORE_TIMEOUT_MS", DEFAULT_OPERATION_TIMEOUT)?,
            },
            redis: RedisConfig {
                url: env.string("REDIS_URL", "redis://127.0.0.1:6379/0"),
                ttl: env.secs("CACHE_TTL_SECS", DEFAULT_CACHE_TTL)?,
                operation_timeout: env.millis("CACHE_TIMEOUT_MS", Duration::from_millis(250))?,
            },
            kafka: KafkaConfig {
                brokers: env.string("KAFKA_BROKERS", "127.0.0.1:9092"),
                topic: env.string("KAFKA_TOPIC", "orders"),
                group_id: env.string("KAFKA_GROUP_ID", "order-service"),
            },
            ingest: IngestConfig {
                queue_capacity: env.parse("INGEST_QUEUE_CAPACITY", 64)?,
                workers: env.parse("INGEST_WORKERS", 4)?,
                retry: RetryConfig::for_ingest(),
            },
            preload_concurrency: env.parse("PRELOAD_CONCURRENCY", 16)?,
            preload_page_size: env.parse("PRELOAD_PAGE_SIZE", DEFAULT_PRELOAD_PAGE_SIZE)?,
        })
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.trim().is_empty())
    }

    fn string(&self, name: &str, default: &str) -> String {
        self.get(name).unwrap_or_else(|| default.to_string())
    }

    fn required(&self, name: &'static str) -> Result<String, ConfigError> {
        self.get(name).ok_or(ConfigError::Missing(name))
    }

    fn parse<T: FromStr>(&self, name: &'static str, default: T) -> Result<T, ConfigError> {
        match self.get(name) {
            None => Ok(default),
            Some(value) => value
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid { name, value }),
        }
    }

    /// Durations must be non-zero; a zero deadline fails every operation.
    fn millis(&self, name: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        self.positive(name, default.as_millis() as u64).map(Duration::from_millis)
    }

    fn secs(&self, name: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        self.positive(name, default.as_secs()).map(Duration::from_secs)
    }

    fn positive(&self, name: &'static str, default: u64) -> Result<u64, ConfigError> {
        match self.parse(name, default)? {
            0 => Err(ConfigError::Invalid {
                name,
                value: "0".to_string(),
            }),
            n => Ok(n),
        }
    }
}
