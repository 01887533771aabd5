//! Configuration layer: typed settings with layered precedence (defaults → file → env).

use std::{num::NonZeroUsize, path::Path, str::FromStr};

use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "scopecache";
const ENV_PREFIX: &str = "SCOPECACHE";
const DEFAULT_KEY_PREFIX: &str = "scopecache_";
const DEFAULT_MEMORY_CAPACITY: usize = 1000;
const DEFAULT_CONSUME_BATCH_LIMIT: usize = 100;
const DEFAULT_PAGE_SIZE: usize = 30;
const DEFAULT_MAX_PAGE_SIZE: usize = 100;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub cache: CacheSettings,
    pub pagination: PaginationSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub key_prefix: String,
    pub memory_capacity: NonZeroUsize,
    pub consume_batch_limit: NonZeroUsize,
}

#[derive(Debug, Clone)]
pub struct PaginationSettings {
    pub default_page_size: NonZeroUsize,
    pub max_page_size: NonZeroUsize,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings from `config/default.*`, `scopecache.*`, an optional explicit
/// file, and `SCOPECACHE__SECTION__KEY` environment variables, later sources
/// taking precedence.
pub fn load(config_file: Option<&Path>) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = config_file {
        builder = builder.add_source(File::from(path).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let raw: RawSettings = builder.build()?.try_deserialize()?;
    Settings::from_raw(raw)
}

impl Default for Settings {
    fn default() -> Self {
        // Built-in defaults always validate.
        Self {
            cache: CacheSettings {
                enabled: true,
                key_prefix: DEFAULT_KEY_PREFIX.to_string(),
                memory_capacity: NonZeroUsize::new(DEFAULT_MEMORY_CAPACITY)
                    .unwrap_or(NonZeroUsize::MIN),
                consume_batch_limit: NonZeroUsize::new(DEFAULT_CONSUME_BATCH_LIMIT)
                    .unwrap_or(NonZeroUsize::MIN),
            },
            pagination: PaginationSettings {
                default_page_size: NonZeroUsize::new(DEFAULT_PAGE_SIZE)
                    .unwrap_or(NonZeroUsize::MIN),
                max_page_size: NonZeroUsize::new(DEFAULT_MAX_PAGE_SIZE)
                    .unwrap_or(NonZeroUsize::MIN),
            },
            logging: LoggingSettings {
                level: LevelFilter::INFO,
                format: LogFormat::Compact,
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    cache: RawCacheSettings,
    pagination: RawPaginationSettings,
    logging: RawLoggingSettings,
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            cache,
            pagination,
            logging,
        } = raw;

        Ok(Self {
            cache: build_cache_settings(cache)?,
            pagination: build_pagination_settings(pagination)?,
            logging: build_logging_settings(logging)?,
        })
    }
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let key_prefix = cache
        .key_prefix
        .unwrap_or_else(|| DEFAULT_KEY_PREFIX.to_string());
    if key_prefix.chars().any(char::is_whitespace) {
        return Err(LoadError::invalid(
            "cache.key_prefix",
            "must not contain whitespace",
        ));
    }

    Ok(CacheSettings {
        enabled: cache.enabled.unwrap_or(true),
        key_prefix,
        memory_capacity: non_zero(
            cache.memory_capacity.unwrap_or(DEFAULT_MEMORY_CAPACITY),
            "cache.memory_capacity",
        )?,
        consume_batch_limit: non_zero(
            cache
                .consume_batch_limit
                .unwrap_or(DEFAULT_CONSUME_BATCH_LIMIT),
            "cache.consume_batch_limit",
        )?,
    })
}

fn build_pagination_settings(
    pagination: RawPaginationSettings,
) -> Result<PaginationSettings, LoadError> {
    let default_page_size = non_zero(
        pagination.default_page_size.unwrap_or(DEFAULT_PAGE_SIZE),
        "pagination.default_page_size",
    )?;
    let max_page_size = non_zero(
        pagination.max_page_size.unwrap_or(DEFAULT_MAX_PAGE_SIZE),
        "pagination.max_page_size",
    )?;

    if default_page_size > max_page_size {
        return Err(LoadError::invalid(
            "pagination.default_page_size",
            format!("must not exceed pagination.max_page_size ({max_page_size})"),
        ));
    }

    Ok(PaginationSettings {
        default_page_size,
        max_page_size,
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    key_prefix: Option<String>,
    memory_capacity: Option<usize>,
    consume_batch_limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPaginationSettings {
    default_page_size: Option<usize>,
    max_page_size: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

fn non_zero(value: usize, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    NonZeroUsize::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}
