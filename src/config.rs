//! Pipeline configuration bundles.
//!
//! Values arrive already resolved: the binary reads an optional TOML file and
//! overlays environment variables, the library only consumes the result.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::etl::load::DailyPolicy;
use crate::etl::pipeline::EmptyBatchPolicy;
use crate::etl::schema::Schema;
use crate::etl::traits::SchemaError;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("Invalid schema: {0}")]
    Schema(#[from] SchemaError),
}

/// Connection parameters for the relational store.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub driver: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    /// Store name; a file path for `sqlite`
    pub database: String,
    /// Full connection URL, overrides every other field when set
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            driver: "sqlite".to_string(),
            host: "localhost".to_string(),
            port: 0,
            user: String::new(),
            password: None,
            database: "orders.db".to_string(),
            url: None,
            max_connections: 4,
        }
    }
}

impl SourceConfig {
    pub fn connection_url(&self) -> String {
        if let Some(url) = &self.url {
            return url.clone();
        }
        if self.driver == "sqlite" {
            return format!("sqlite://{}?mode=ro", self.database);
        }
        let credentials = match (&self.user, &self.password) {
            (user, _) if user.is_empty() => String::new(),
            (user, Some(password)) => format!("{}:{}@", user, password),
            (user, None) => format!("{}@", user),
        };
        format!(
            "{}://{}{}:{}/{}",
            self.driver, credentials, self.host, self.port, self.database
        )
    }
}

impl fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceConfig")
            .field("driver", &self.driver)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("database", &self.database)
            .field("url", &self.url.as_ref().map(|_| "***"))
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

/// Parameters for the artifact sink.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    pub account: String,
    pub access_key: Option<String>,
    pub container: String,
    /// Local directory that holds containers for the directory sink
    pub root: PathBuf,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            account: String::new(),
            access_key: None,
            container: "etl-results".to_string(),
            root: PathBuf::from("artifacts"),
        }
    }
}

impl fmt::Debug for SinkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinkConfig")
            .field("account", &self.account)
            .field("access_key", &self.access_key.as_ref().map(|_| "***"))
            .field("container", &self.container)
            .field("root", &self.root)
            .finish()
    }
}

/// How default artifact names are built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactConfig {
    pub prefix: String,
    pub daily_policy: DailyPolicy,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            prefix: "sales_summary".to_string(),
            daily_policy: DailyPolicy::Overwrite,
        }
    }
}

/// Everything one pipeline needs.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub source: SourceConfig,
    pub sink: SinkConfig,
    pub schema: Schema,
    pub artifact: ArtifactConfig,
    pub empty_batch: EmptyBatchPolicy,
}

impl PipelineConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.schema.validate()?;
        if self.sink.container.trim().is_empty() {
            return Err(ConfigError::Invalid("sink.container must not be empty".to_string()));
        }
        if self.artifact.prefix.trim().is_empty() {
            return Err(ConfigError::Invalid("artifact.prefix must not be empty".to_string()));
        }
        if !self.source.connection_url().starts_with("sqlite:") {
            return Err(ConfigError::Invalid(format!(
                "source driver '{}' is not supported, expected a sqlite: URL",
                self.source.driver
            )));
        }
        if self.source.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "source.max_connections must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
