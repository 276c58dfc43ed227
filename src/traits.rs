use crate::etl::query::SelectQuery;
use crate::model::Row;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Failed to connect to data source: {0}")]
    Connection(String),
    #[error("Query execution failed: {0}")]
    Query(String),
    #[error("Failed to decode column '{column}': {message}")]
    Decode { column: String, message: String },
}

impl From<sqlx::Error> for SourceError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Configuration(_) => SourceError::Connection(e.to_string()),
            other => SourceError::Query(other.to_string()),
        }
    }
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Artifact name '{0}' is not valid for this sink")]
    InvalidName(String),
    #[error("Sink rejected the write: {0}")]
    Rejected(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A relational store that can execute a read query.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Returns a short identifier for logs (e.g., "sqlite", "memory").
    fn source_id(&self) -> &str;

    /// Executes the query and returns rows as column-typed records.
    async fn fetch(&self, query: &SelectQuery) -> Result<Vec<Row>, SourceError>;
}

/// A named container that durably stores byte blobs, overwriting by name.
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    /// Returns the container this sink writes into.
    fn container(&self) -> &str;

    /// Stores `bytes` under `name`, replacing any existing artifact.
    async fn put(&self, name: &str, bytes: Vec<u8>) -> Result<(), SinkError>;
}
