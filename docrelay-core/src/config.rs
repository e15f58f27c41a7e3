//! Configuration for a store service.
//!
//! Settings come from a TOML file, every table and field of which is optional, and
//! are then overridden by `DOCRELAY_*` environment variables:
//!
//! ```toml
//! topic = "mongo-store"
//! backend = "mongodb"
//! serialize_result = false
//! use_db_as_topic_suffix = false
//!
//! [mongo]
//! url = "mongodb://localhost:27017/"
//!
//! [store.replace]
//! upsert = true
//!
//! [logging]
//! level = "info"
//! ```

use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};

use crate::error::{StoreError, StoreResult};

/// Topic served when none is configured.
pub const DEFAULT_TOPIC: &str = "mongo-store";
/// Server contacted when none is configured.
pub const DEFAULT_MONGO_URL: &str = "mongodb://localhost:27017/";
/// Database used when neither the configuration nor the URL names one.
pub const DEFAULT_DATABASE: &str = "test";

/// Main configuration structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Base topic the command patterns are registered under.
    pub topic: String,
    /// Which backend serves the commands.
    pub backend: BackendKind,
    /// Encode every result for the wire before replying.
    pub serialize_result: bool,
    /// Serve `<topic>.<database>` instead of `<topic>`.
    pub use_db_as_topic_suffix: bool,
    /// MongoDB connection settings.
    pub mongo: MongoConfig,
    /// Per-command option defaults.
    pub store: StoreSettings,
    /// Logging configuration.
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Mongodb,
    Memory,
}

impl std::str::FromStr for BackendKind {
    type Err = StoreError;

    fn from_str(s: &str) -> StoreResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mongodb" | "mongo" => Ok(BackendKind::Mongodb),
            "memory" => Ok(BackendKind::Memory),
            other => Err(StoreError::Configuration(format!("unknown backend `{other}`"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MongoConfig {
    /// Connection string.
    pub url: String,
    /// Database to work in. Falls back to the database named in `url`.
    pub database: Option<String>,
    /// Driver settings.
    pub options: MongoOptions,
}

/// Driver settings passed through to the MongoDB client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MongoOptions {
    pub app_name: Option<String>,
    pub max_pool_size: Option<u32>,
    pub min_pool_size: Option<u32>,
    pub connect_timeout_ms: Option<u64>,
    pub server_selection_timeout_ms: Option<u64>,
}

impl MongoOptions {
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }

    pub fn server_selection_timeout(&self) -> Option<Duration> {
        self.server_selection_timeout_ms.map(Duration::from_millis)
    }
}

/// Default `upsert` behaviour per command, used when a request does not say.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub update: UpsertDefault,
    pub update_by_id: UpsertDefault,
    pub replace: UpsertDefault,
    pub replace_by_id: UpsertDefault,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpsertDefault {
    pub upsert: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or `EnvFilter` directive (trace, debug, info, warn, error).
    pub level: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            topic: DEFAULT_TOPIC.to_string(),
            backend: BackendKind::default(),
            serialize_result: false,
            use_db_as_topic_suffix: false,
            mongo: MongoConfig::default(),
            store: StoreSettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for MongoConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_MONGO_URL.to_string(),
            database: None,
            options: MongoOptions::default(),
        }
    }
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            update: UpsertDefault { upsert: false },
            update_by_id: UpsertDefault { upsert: false },
            replace: UpsertDefault { upsert: true },
            replace_by_id: UpsertDefault { upsert: false },
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl MongoConfig {
    /// The database commands run against: the configured one, else the one named in
    /// the URL path, else [`DEFAULT_DATABASE`].
    pub fn database_name(&self) -> String {
        self.database
            .clone()
            .filter(|db| !db.is_empty())
            .or_else(|| database_from_url(&self.url))
            .unwrap_or_else(|| DEFAULT_DATABASE.to_string())
    }
}

fn database_from_url(url: &str) -> Option<String> {
    let (_, rest) = url.split_once("://")?;
    let (_, path) = rest.split_once('/')?;
    let db = path.split('?').next().unwrap_or_default();

    (!db.is_empty()).then(|| db.to_string())
}

impl StoreConfig {
    /// Loads `path` if given, then applies environment overrides and validates.
    pub fn load(path: Option<&Path>) -> StoreResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        config.apply_overrides(std::env::vars())?;
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> StoreResult<Self> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            StoreError::Configuration(format!(
                "Failed to read config file {}: {e}",
                path.as_ref().display()
            ))
        })?;

        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> StoreResult<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Applies `DOCRELAY_*` overrides from `vars`; other variables are ignored.
    pub fn apply_overrides<I, K, V>(&mut self, vars: I) -> StoreResult<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        for (key, value) in vars {
            let value = value.into();
            match key.as_ref() {
                "DOCRELAY_TOPIC" => self.topic = value,
                "DOCRELAY_BACKEND" => self.backend = value.parse()?,
                "DOCRELAY_MONGO_URL" => self.mongo.url = value,
                "DOCRELAY_MONGO_DATABASE" => self.mongo.database = Some(value),
                "DOCRELAY_SERIALIZE_RESULT" => {
                    self.serialize_result = parse_flag("DOCRELAY_SERIALIZE_RESULT", &value)?
                }
                "DOCRELAY_USE_DB_AS_TOPIC_SUFFIX" => {
                    self.use_db_as_topic_suffix =
                        parse_flag("DOCRELAY_USE_DB_AS_TOPIC_SUFFIX", &value)?
                }
                "DOCRELAY_LOG_LEVEL" => self.logging.level = value,
                _ => {}
            }
        }

        Ok(())
    }

    /// Validate configuration values.
    pub fn validate(&self) -> StoreResult<()> {
        if self.topic.trim().is_empty() {
            return Err(StoreError::Configuration("topic must not be empty".into()));
        }

        if self.backend == BackendKind::Mongodb && !self.mongo.url.contains("://") {
            return Err(StoreError::Configuration(format!(
                "invalid MongoDB url `{}`",
                self.mongo.url
            )));
        }

        if let (Some(min), Some(max)) = (
            self.mongo.options.min_pool_size,
            self.mongo.options.max_pool_size,
        ) {
            if min > max {
                return Err(StoreError::Configuration(format!(
                    "min_pool_size ({min}) exceeds max_pool_size ({max})"
                )));
            }
        }

        if self.logging.level.trim().is_empty() {
            return Err(StoreError::Configuration("log level must not be empty".into()));
        }

        Ok(())
    }

    /// The topic commands are served under, given the database in use.
    pub fn effective_topic(&self) -> String {
        if self.use_db_as_topic_suffix {
            format!("{}.{}", self.topic, self.mongo.database_name())
        } else {
            self.topic.clone()
        }
    }
}

fn parse_flag(name: &str, value: &str) -> StoreResult<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(StoreError::Configuration(format!(
            "{name} must be a boolean, got `{value}`"
        ))),
    }
}
