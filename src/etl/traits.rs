//! Core traits and types for the staged ETL contract.
//!
//! This module defines the foundational architecture of a pipeline run:
//! - The three-method capability interface via [`EtlJob`]
//! - Per-stage data products ([`TransformOutput`], [`LoadReceipt`])
//! - Standardized error types for each stage boundary

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::Serialize;
use thiserror::Error;

use crate::etl::query::{QueryError, SelectQuery};
use crate::model::{RawRecordSet, SummaryRecordSet};
use crate::traits::{SinkError, SourceError};

// ============================================================================
// Job Trait
// ============================================================================

/// Extract, transform and load, expressed as one capability interface.
///
/// The orchestrator in [`crate::etl::pipeline`] only talks to this trait, so
/// any concrete job (a different table, a different sink) plugs in without
/// touching the run semantics.
///
/// # Ownership
///
/// Each stage owns the record set it produced until it hands it on:
/// `transform` takes the raw set by value, `load` only borrows the summary
/// so that a failed publish never loses it.
///
/// # Errors
///
/// Every method returns an explicit `Result`. Implementations must not
/// panic on bad data; the orchestrator turns each `Err` into a failed stage
/// outcome and keeps going.
///
/// # Examples
///
/// ```ignore
/// struct NightlySales { /* source, sink, schema */ }
///
/// #[async_trait]
/// impl EtlJob for NightlySales {
///     async fn extract(&self, query: Option<&SelectQuery>) -> Result<RawRecordSet, ExtractError> {
///         todo!()
///     }
///     fn transform(&self, raw: RawRecordSet) -> Result<TransformOutput, TransformError> {
///         todo!()
///     }
///     async fn load(&self, summary: &SummaryRecordSet, artifact: Option<&str>) -> Result<LoadReceipt, LoadError> {
///         todo!()
///     }
///     fn job_name(&self) -> &'static str {
///         "nightly_sales"
///     }
/// }
/// ```
#[async_trait]
pub trait EtlJob: Send + Sync {
    /// Reads one bounded batch from the data source.
    ///
    /// `None` means the default "all canonical columns of the canonical
    /// table" query. An empty result is a success, not an error.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError`] if the query references columns outside the
    /// schema or the source cannot be reached or queried.
    async fn extract(&self, query: Option<&SelectQuery>) -> Result<RawRecordSet, ExtractError>;

    /// Cleans, enriches and aggregates a raw batch into group summaries.
    ///
    /// # Errors
    ///
    /// Returns [`TransformError`] if a value cannot be coerced to its
    /// column's type or the schema is inconsistent.
    fn transform(&self, raw: RawRecordSet) -> Result<TransformOutput, TransformError>;

    /// Serializes the summary and publishes it as one named artifact.
    ///
    /// `None` derives the name from the current date. An empty summary
    /// still publishes a header-only artifact.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError`] if encoding fails or the sink rejects the write.
    async fn load(
        &self,
        summary: &SummaryRecordSet,
        artifact: Option<&str>,
    ) -> Result<LoadReceipt, LoadError>;

    /// Summary handed to `load` when there is no transformation output to
    /// publish and the run continues anyway.
    ///
    /// The default has no columns. Jobs that know their layout should return
    /// the header so the artifact keeps its shape.
    fn empty_summary(&self) -> SummaryRecordSet {
        SummaryRecordSet::default()
    }

    /// Returns a human-readable name for this job.
    ///
    /// Used as a span field in logs.
    fn job_name(&self) -> &'static str;
}

// ============================================================================
// Stage Products
// ============================================================================

/// Observability counters gathered while cleaning and aggregating.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TransformReport {
    /// Rows handed to the transformer
    pub input_rows: usize,

    /// Rows removed by the completeness filter
    pub dropped_incomplete: usize,

    /// Per-row ratios left undefined by a zero or non-finite denominator
    pub undefined_ratios: usize,

    /// Groups in the summary
    pub groups: usize,

    /// Earliest and latest normalized dates among kept rows
    pub date_range: Option<(NaiveDateTime, NaiveDateTime)>,
}

impl TransformReport {
    /// Rows that survived cleaning.
    pub fn kept_rows(&self) -> usize {
        self.input_rows - self.dropped_incomplete
    }
}

/// Summary plus the counters that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformOutput {
    pub summary: SummaryRecordSet,
    pub report: TransformReport,
}

/// Confirmation of a published artifact.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadReceipt {
    /// Container the artifact was written to
    pub container: String,

    /// Artifact name within the container
    pub artifact: String,

    /// Number of data rows, header excluded
    pub rows: usize,

    /// Encoded size in bytes
    pub bytes: usize,
}

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during extraction.
#[derive(Error, Debug)]
pub enum ExtractError {
    /// Query references something outside the canonical schema
    #[error("Invalid query: {0}")]
    InvalidQuery(#[from] QueryError),

    /// Connectivity or query execution failure
    #[error("Data source error: {0}")]
    Source(#[from] SourceError),
}

/// Errors that can occur during transformation.
#[derive(Error, Debug)]
pub enum TransformError {
    /// A value could not be coerced to its column's type
    #[error("Row {row}: cannot coerce column '{column}' value '{value}' to {expected}")]
    Coercion {
        row: usize,
        column: String,
        value: String,
        expected: &'static str,
    },

    /// The primary metric overflowed to infinity
    #[error("Row {row}: {metric} is not finite")]
    NonFinite { row: usize, metric: String },

    /// Schema is inconsistent (e.g., a ratio over an unknown field)
    #[error("Invalid schema: {0}")]
    Schema(#[from] SchemaError),
}

/// Errors that can occur during loading.
#[derive(Error, Debug)]
pub enum LoadError {
    /// CSV encoding failed
    #[error("Failed to encode summary: {0}")]
    Encode(String),

    /// Artifact name is empty
    #[error("Artifact name must not be empty")]
    EmptyArtifactName,

    /// The sink rejected the write
    #[error("Publish failed: {0}")]
    Sink(#[from] SinkError),
}

impl From<csv::Error> for LoadError {
    fn from(e: csv::Error) -> Self {
        LoadError::Encode(e.to_string())
    }
}

/// Errors in a [`Schema`](crate::etl::schema::Schema) definition.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    /// Table or column name is not a plain identifier
    #[error("'{0}' is not a valid identifier")]
    InvalidIdentifier(String),

    /// The same name is used for two roles
    #[error("Column '{0}' is declared more than once")]
    DuplicateColumn(String),

    /// A ratio names a field that is not numeric in this schema
    #[error("Ratio '{ratio}' references unknown numeric field '{operand}'")]
    UnknownRatioOperand { ratio: String, operand: String },
}

// ============================================================================
// Tests
// ============================================================================
