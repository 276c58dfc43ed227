//! Pipeline orchestrator.
//!
//! This module provides the [`EtlPipeline`] coordinator that executes the
//! sequential stages (Extract → Transform → Load) of one batch with:
//! - A fixed state sequence `Idle → Extracting → Transforming → Loading → Done`
//! - Fail-soft stages: every stage error becomes a [`StageStatus`], never a panic
//! - A configurable empty-batch short circuit ([`EmptyBatchPolicy`])
//! - Structured logging via `tracing`

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, Span};

use crate::etl::query::SelectQuery;
use crate::etl::traits::EtlJob;
use crate::model::{RawRecordSet, SummaryRecordSet};

// ============================================================================
// Run Types
// ============================================================================

/// Orchestrator states, in the order a run visits them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Extracting,
    Transforming,
    Loading,
    Done,
}

/// Outcome of one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageStatus {
    Succeeded,
    Failed { reason: String },
    /// The stage was never attempted
    NotRun { reason: String },
}

impl StageStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, StageStatus::Succeeded)
    }

    /// Pass/fail label for the human-readable summary.
    pub fn label(&self) -> &'static str {
        match self {
            StageStatus::Succeeded => "Success",
            StageStatus::Failed { .. } => "Failed",
            StageStatus::NotRun { .. } => "Not run",
        }
    }
}

/// What to do when a stage hands on an empty (or no) data product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyBatchPolicy {
    /// Skip downstream stages after an empty or failed stage
    #[default]
    Skip,
    /// Always attempt downstream stages, feeding them an empty set
    Continue,
}

/// Counters and timings of one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunStats {
    /// Rows returned by extraction
    pub rows_extracted: usize,

    /// Rows removed by the completeness filter
    pub rows_dropped: usize,

    /// Per-row ratios left undefined
    pub undefined_ratios: usize,

    /// Groups in the summary
    pub groups: usize,

    /// Published artifact, when the load succeeded
    pub artifact: Option<String>,

    /// Time spent on extraction (milliseconds)
    pub extraction_ms: u64,

    /// Time spent on transformation (milliseconds)
    pub transformation_ms: u64,

    /// Time spent on loading (milliseconds)
    pub load_ms: u64,

    /// Total run time (milliseconds)
    pub total_ms: u64,
}

/// Three-stage outcome record of a single run. Immutable once returned.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineRunResult {
    pub pipeline: String,
    pub extraction: StageStatus,
    pub transformation: StageStatus,
    pub load: StageStatus,
    pub stats: RunStats,
    /// States visited, always starting at `Idle` and ending at `Done`
    pub states: Vec<PipelineState>,
}

impl PipelineRunResult {
    pub fn extraction_ok(&self) -> bool {
        self.extraction.is_ok()
    }

    pub fn transformation_ok(&self) -> bool {
        self.transformation.is_ok()
    }

    pub fn load_ok(&self) -> bool {
        self.load.is_ok()
    }

    pub fn all_ok(&self) -> bool {
        self.extraction_ok() && self.transformation_ok() && self.load_ok()
    }

    /// One `"<Stage>: <label>"` line per stage.
    pub fn summary_lines(&self) -> [String; 3] {
        [
            format!("Extraction: {}", self.extraction.label()),
            format!("Transformation: {}", self.transformation.label()),
            format!("Load: {}", self.load.label()),
        ]
    }
}

impl fmt::Display for PipelineRunResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary_lines().join("\n"))
    }
}

/// Optional parameters of a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunRequest {
    /// Extraction query; `None` selects the whole canonical table
    pub query: Option<SelectQuery>,

    /// Artifact name; `None` derives one from the current date
    pub artifact: Option<String>,
}

impl RunRequest {
    pub fn with_query(mut self, query: SelectQuery) -> Self {
        self.query = Some(query);
        self
    }

    pub fn with_artifact(mut self, artifact: impl Into<String>) -> Self {
        self.artifact = Some(artifact.into());
        self
    }
}

// ============================================================================
// Pipeline Executor
// ============================================================================

/// Sequences one [`EtlJob`] through its three stages.
///
/// Each call to [`EtlPipeline::run`] performs exactly one extraction, at most
/// one transformation and at most one load. Nothing is retried and no state
/// survives between runs, so one pipeline can be shared across tasks and run
/// concurrently.
///
/// # Example
///
/// ```ignore
/// use batch_etl::etl::{EtlPipeline, RunRequest, SummaryJob};
///
/// let pipeline = EtlPipeline::new(job).with_name("nightly_sales");
/// let result = pipeline.run(RunRequest::default()).await;
/// println!("{}", result);
/// ```
pub struct EtlPipeline<J> {
    job: Arc<J>,

    /// Name recorded on logs and in the run result
    name: String,

    /// Whether empty or failed stages short-circuit the run (default: skip)
    empty_batch: EmptyBatchPolicy,
}

impl<J: EtlJob + 'static> EtlPipeline<J> {
    /// Creates a pipeline named after the job, skipping stages on empty input.
    pub fn new(job: J) -> Self {
        let name = job.job_name().to_string();
        Self {
            job: Arc::new(job),
            name,
            empty_batch: EmptyBatchPolicy::Skip,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_empty_batch_policy(mut self, policy: EmptyBatchPolicy) -> Self {
        self.empty_batch = policy;
        self
    }

    pub fn job(&self) -> &J {
        &self.job
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs with the default query and a date-derived artifact name.
    pub async fn run_default(&self) -> PipelineRunResult {
        self.run(RunRequest::default()).await
    }

    /// Executes one batch.
    ///
    /// Always returns a fully populated [`PipelineRunResult`]; stages that
    /// were not attempted are recorded as [`StageStatus::NotRun`].
    #[instrument(skip(self, request), fields(pipeline = %self.name))]
    pub async fn run(&self, request: RunRequest) -> PipelineRunResult {
        let start = Instant::now();
        let mut stats = RunStats::default();
        let mut states = vec![PipelineState::Idle];

        // ====================================================================
        // Stage 1: Extraction
        // ====================================================================

        info!("Starting extraction stage");
        states.push(PipelineState::Extracting);
        let stage_start = Instant::now();

        let (extraction, raw) = match self.job.extract(request.query.as_ref()).await {
            Ok(raw) => {
                stats.rows_extracted = raw.len();
                (StageStatus::Succeeded, Some(raw))
            }
            Err(e) => {
                error!(error = %e, "Extraction stage failed");
                (StageStatus::Failed { reason: e.to_string() }, None)
            }
        };
        stats.extraction_ms = stage_start.elapsed().as_millis() as u64;

        // ====================================================================
        // Stage 2: Transformation
        // ====================================================================

        let (transformation, summary) =
            match self.next_input(raw, RawRecordSet::is_empty, RawRecordSet::empty, "extraction") {
                Ok(raw) => {
                    info!(rows = raw.len(), "Starting transformation stage");
                    states.push(PipelineState::Transforming);
                    let stage_start = Instant::now();

                    // CPU-bound; `raw` moves into the blocking task and is gone after it
                    let job = Arc::clone(&self.job);
                    let span = Span::current();
                    let task = tokio::task::spawn_blocking(move || span.in_scope(|| job.transform(raw)));
                    let outcome = match task.await {
                        Ok(Ok(output)) => {
                            stats.rows_dropped = output.report.dropped_incomplete;
                            stats.undefined_ratios = output.report.undefined_ratios;
                            stats.groups = output.report.groups;
                            (StageStatus::Succeeded, Some(output.summary))
                        }
                        Ok(Err(e)) => {
                            error!(error = %e, "Transformation stage failed");
                            (StageStatus::Failed { reason: e.to_string() }, None)
                        }
                        Err(e) => {
                            error!(error = %e, "Transformation task aborted");
                            let reason = format!("Task join error: {}", e);
                            (StageStatus::Failed { reason }, None)
                        }
                    };
                    stats.transformation_ms = stage_start.elapsed().as_millis() as u64;
                    outcome
                }
                Err(reason) => {
                    info!(reason = %reason, "Skipping transformation stage");
                    (StageStatus::NotRun { reason }, None)
                }
            };

        // ====================================================================
        // Stage 3: Load
        // ====================================================================

        let load = match self.next_input(
            summary,
            SummaryRecordSet::is_empty,
            || self.job.empty_summary(),
            "transformation",
        ) {
            Ok(summary) => {
                info!(groups = summary.len(), "Starting load stage");
                states.push(PipelineState::Loading);
                let stage_start = Instant::now();

                let status = match self.job.load(&summary, request.artifact.as_deref()).await {
                    Ok(receipt) => {
                        stats.artifact = Some(receipt.artifact);
                        StageStatus::Succeeded
                    }
                    Err(e) => {
                        error!(error = %e, groups = summary.len(), "Load stage failed");
                        StageStatus::Failed { reason: e.to_string() }
                    }
                };
                stats.load_ms = stage_start.elapsed().as_millis() as u64;
                status
            }
            Err(reason) => {
                info!(reason = %reason, "Skipping load stage");
                StageStatus::NotRun { reason }
            }
        };

        states.push(PipelineState::Done);
        stats.total_ms = start.elapsed().as_millis() as u64;

        let result = PipelineRunResult {
            pipeline: self.name.clone(),
            extraction,
            transformation,
            load,
            stats,
            states,
        };
        info!(
            extraction = result.extraction_ok(),
            transformation = result.transformation_ok(),
            load = result.load_ok(),
            duration_ms = result.stats.total_ms,
            "Pipeline run finished"
        );
        result
    }

    /// Decides whether the next stage runs, and on what.
    ///
    /// Under [`EmptyBatchPolicy::Continue`] a missing product is replaced by
    /// `fallback()`.
    fn next_input<T>(
        &self,
        product: Option<T>,
        is_empty: fn(&T) -> bool,
        fallback: impl FnOnce() -> T,
        upstream: &str,
    ) -> Result<T, String> {
        match (product, self.empty_batch) {
            (Some(p), EmptyBatchPolicy::Continue) => Ok(p),
            (Some(p), EmptyBatchPolicy::Skip) if !is_empty(&p) => Ok(p),
            (Some(_), EmptyBatchPolicy::Skip) => Err(format!("{} produced no rows", upstream)),
            (None, EmptyBatchPolicy::Continue) => Ok(fallback()),
            (None, EmptyBatchPolicy::Skip) => Err(format!("{} failed", upstream)),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
