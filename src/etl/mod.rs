//! ETL module - the staged batch pipeline.
//!
//! This module provides the building blocks of one pipeline run:
//! - **Traits**: [`EtlJob`], the extract/transform/load capability interface
//! - **Stages**: [`Extractor`], [`Transformer`] and [`Loader`]
//! - **Schema**: canonical column names and derived metrics via [`Schema`]
//! - **Errors**: standardized error types for each stage boundary
//! - **Pipeline**: fail-soft orchestrator via [`pipeline::EtlPipeline`]

pub mod extract;
pub mod job;
pub mod load;
pub mod pipeline;
pub mod query;
pub mod schema;
pub mod traits;
pub mod transform;

// Re-export commonly used types
pub use traits::{
    EtlJob, ExtractError, LoadError, LoadReceipt, SchemaError, TransformError, TransformOutput,
    TransformReport,
};

pub use extract::Extractor;
pub use job::SummaryJob;
pub use load::{encode_csv, ArtifactNaming, Clock, DailyPolicy, FixedClock, Loader, SystemClock};
pub use pipeline::{
    EmptyBatchPolicy, EtlPipeline, PipelineRunResult, PipelineState, RunRequest, RunStats,
    StageStatus,
};
pub use query::{CmpOp, Filter, QueryError, SelectQuery};
pub use schema::{RatioSpec, Schema};
pub use transform::{summary_columns, Aggregation, Transformer};
