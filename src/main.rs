//! batch-etl - run one extract/transform/load batch from the command line.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use batch_etl::etl::{EtlPipeline, Filter, PipelineRunResult, RunRequest, SelectQuery, SummaryJob};
use batch_etl::sinks::{DirectorySink, MemorySink};
use batch_etl::sources::SqliteSource;
use batch_etl::traits::ArtifactSink;
use batch_etl::PipelineConfig;

/// Command-line arguments for batch-etl
#[derive(Parser, Debug)]
#[command(name = "batch-etl")]
#[command(about = "Extract records, aggregate per-group summaries, publish a CSV artifact")]
#[command(version)]
struct Args {
    /// TOML config file; every section is optional
    #[arg(short, long, env = "ETL_CONFIG")]
    config: Option<PathBuf>,

    /// Source connection URL, overrides [source]
    #[arg(long, env = "ETL_DB_URL", hide_env_values = true)]
    db_url: Option<String>,

    /// Source password
    #[arg(long, env = "ETL_DB_PASSWORD", hide_env_values = true)]
    db_password: Option<String>,

    /// Directory holding sink containers
    #[arg(long, env = "ETL_SINK_ROOT")]
    sink_root: Option<PathBuf>,

    /// Sink container name
    #[arg(long, env = "ETL_SINK_CONTAINER")]
    sink_container: Option<String>,

    /// Sink access key
    #[arg(long, env = "ETL_SINK_ACCESS_KEY", hide_env_values = true)]
    sink_access_key: Option<String>,

    /// Extraction filter as `column<op>value`, e.g. `region=North` (repeatable)
    #[arg(short, long = "filter")]
    filters: Vec<Filter>,

    /// Maximum number of rows to extract
    #[arg(long)]
    limit: Option<u64>,

    /// Artifact name; defaults to a date-stamped name
    #[arg(short, long)]
    artifact: Option<String>,

    /// Publish to memory and print the artifact instead of writing it
    #[arg(long)]
    dry_run: bool,

    /// Print the run result as JSON
    #[arg(long)]
    json: bool,

    /// Abort the whole run after this many seconds
    #[arg(long)]
    deadline_secs: Option<u64>,
}

impl Args {
    fn pipeline_config(&self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::load(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            None => PipelineConfig::default(),
        };

        if let Some(url) = &self.db_url {
            config.source.url = Some(url.clone());
        }
        if let Some(password) = &self.db_password {
            config.source.password = Some(password.clone());
        }
        if let Some(root) = &self.sink_root {
            config.sink.root = root.clone();
        }
        if let Some(container) = &self.sink_container {
            config.sink.container = container.clone();
        }
        if let Some(key) = &self.sink_access_key {
            config.sink.access_key = Some(key.clone());
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    fn run_request(&self, config: &PipelineConfig) -> RunRequest {
        let mut request = RunRequest::default();
        if !self.filters.is_empty() || self.limit.is_some() {
            let mut query = SelectQuery::all(&config.schema);
            for filter in &self.filters {
                query = query.with_filter(filter.clone());
            }
            if let Some(limit) = self.limit {
                query = query.with_limit(limit);
            }
            request = request.with_query(query);
        }
        if let Some(artifact) = &self.artifact {
            request = request.with_artifact(artifact.clone());
        }
        request
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "batch_etl=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let config = args.pipeline_config()?;
    info!(config = ?config, "Configuration resolved");

    // Lazy pool: an unreachable database is reported by the extraction stage
    let source = SqliteSource::connect(&config.source).context("Invalid data source URL")?;
    let request = args.run_request(&config);

    let outcome = if args.dry_run {
        let sink = MemorySink::new(config.sink.container.clone());
        let pipeline = build_pipeline(source, sink, &config);
        let outcome = run_with_deadline(&pipeline, request, args.deadline_secs).await;
        if let Some(Some(bytes)) = outcome
            .as_ref()
            .and_then(|r| r.stats.artifact.as_deref())
            .map(|name| pipeline.job().sink().get(name))
        {
            print!("{}", String::from_utf8_lossy(&bytes));
        }
        outcome
    } else {
        let sink = DirectorySink::from_config(&config.sink).context("Invalid sink location")?;
        let pipeline = build_pipeline(source, sink, &config);
        run_with_deadline(&pipeline, request, args.deadline_secs).await
    };

    let Some(result) = outcome else {
        eprintln!("Run aborted: deadline of {}s exceeded", args.deadline_secs.unwrap_or_default());
        return Ok(ExitCode::from(2));
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}", result);
    }

    Ok(if result.all_ok() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

fn build_pipeline<K: ArtifactSink + 'static>(
    source: SqliteSource,
    sink: K,
    config: &PipelineConfig,
) -> EtlPipeline<SummaryJob<SqliteSource, K>> {
    EtlPipeline::new(SummaryJob::with_config(source, sink, config))
        .with_empty_batch_policy(config.empty_batch)
}

/// Runs the pipeline, returning `None` when the deadline expires first.
async fn run_with_deadline<K: ArtifactSink + 'static>(
    pipeline: &EtlPipeline<SummaryJob<SqliteSource, K>>,
    request: RunRequest,
    deadline_secs: Option<u64>,
) -> Option<PipelineRunResult> {
    match deadline_secs {
        Some(secs) => match tokio::time::timeout(Duration::from_secs(secs), pipeline.run(request)).await {
            Ok(result) => Some(result),
            Err(_) => {
                warn!(deadline_secs = secs, "Run exceeded its deadline");
                None
            }
        },
        None => Some(pipeline.run(request).await),
    }
}
