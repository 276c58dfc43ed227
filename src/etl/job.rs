use std::sync::Arc;

use async_trait::async_trait;

use crate::config::PipelineConfig;
use crate::etl::extract::Extractor;
use crate::etl::load::{ArtifactNaming, Clock, Loader};
use crate::etl::query::SelectQuery;
use crate::etl::schema::Schema;
use crate::etl::traits::{
    EtlJob, ExtractError, LoadError, LoadReceipt, TransformError, TransformOutput,
};
use crate::etl::transform::{summary_columns, Transformer};
use crate::model::{RawRecordSet, SummaryRecordSet};
use crate::traits::{ArtifactSink, DataSource};

/// Per-group summary job: one source table in, one CSV artifact out.
pub struct SummaryJob<S, K> {
    extractor: Extractor<S>,
    transformer: Transformer,
    loader: Loader<K>,
}

impl<S: DataSource, K: ArtifactSink> SummaryJob<S, K> {
    pub fn new(source: S, sink: K, schema: Schema, naming: ArtifactNaming) -> Self {
        Self {
            extractor: Extractor::new(source, schema.clone()),
            transformer: Transformer::new(schema),
            loader: Loader::new(sink, naming),
        }
    }

    /// Builds the job from the schema and artifact sections of a config.
    pub fn with_config(source: S, sink: K, config: &PipelineConfig) -> Self {
        Self::new(
            source,
            sink,
            config.schema.clone(),
            ArtifactNaming::new(config.artifact.prefix.clone(), config.artifact.daily_policy),
        )
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.loader = self.loader.with_clock(clock);
        self
    }

    pub fn schema(&self) -> &Schema {
        self.transformer.schema()
    }

    pub fn source(&self) -> &S {
        self.extractor.source()
    }

    pub fn sink(&self) -> &K {
        self.loader.sink()
    }
}

#[async_trait]
impl<S: DataSource, K: ArtifactSink> EtlJob for SummaryJob<S, K> {
    async fn extract(&self, query: Option<&SelectQuery>) -> Result<RawRecordSet, ExtractError> {
        self.extractor.extract(query).await
    }

    fn transform(&self, raw: RawRecordSet) -> Result<TransformOutput, TransformError> {
        self.transformer.transform(raw)
    }

    async fn load(
        &self,
        summary: &SummaryRecordSet,
        artifact: Option<&str>,
    ) -> Result<LoadReceipt, LoadError> {
        self.loader.load(summary, artifact).await
    }

    fn empty_summary(&self) -> SummaryRecordSet {
        SummaryRecordSet {
            columns: summary_columns(self.schema()),
            rows: Vec::new(),
        }
    }

    fn job_name(&self) -> &'static str {
        "group_summary"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::etl::load::{DailyPolicy, FixedClock};
    use crate::etl::pipeline::{EmptyBatchPolicy, EtlPipeline, RunRequest, StageStatus};
    use crate::etl::query::{CmpOp, Filter};
    use crate::model::Row;
    use crate::sinks::MemorySink;
    use crate::sources::MemorySource;
    use chrono::NaiveDate;

    fn order(id: i64, region: &str, quantity: i64, unit_price: f64, active: bool) -> Row {
        Row::new()
            .with("order_id", id)
            .with("order_date", "2024-03-01")
            .with("region", region)
            .with("quantity", quantity)
            .with("unit_price", unit_price)
            .with("is_active", active)
    }

    fn orders() -> Vec<Row> {
        vec![
            order(1, "A", 2, 10.0, true),
            order(2, "A", 4, 10.0, false),
            order(3, "B", 1, 5.0, true),
        ]
    }

    fn pipeline(rows: Vec<Row>) -> EtlPipeline<SummaryJob<MemorySource, MemorySink>> {
        let clock = NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(6, 0, 0)
            .unwrap();
        let job = SummaryJob::new(
            MemorySource::new(rows),
            MemorySink::new("results"),
            Schema::default(),
            ArtifactNaming::new("sales_summary", DailyPolicy::Overwrite),
        )
        .with_clock(Arc::new(FixedClock(clock)));
        EtlPipeline::new(job)
    }

    #[tokio::test]
    async fn test_full_run_publishes_group_summary() {
        let pipeline = pipeline(orders());
        let result = pipeline.run_default().await;

        assert!(result.all_ok(), "{}", result);
        assert_eq!(result.stats.rows_extracted, 3);
        assert_eq!(result.stats.groups, 2);
        assert_eq!(
            result.stats.artifact.as_deref(),
            Some("sales_summary_20240309_results.csv")
        );

        let csv = pipeline
            .job()
            .sink()
            .get("sales_summary_20240309_results.csv")
            .unwrap();
        let text = String::from_utf8(csv).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "region,order_count,total_sales,avg_sales,total_quantity,avg_revenue_per_unit,activation_rate"
        );
        assert_eq!(lines[1], "A,2,60,30,6,10,0.5");
        assert_eq!(lines[2], "B,1,5,5,1,5,1");
        assert_eq!(lines.len(), 3);
    }

    #[tokio::test]
    async fn test_filtered_run() {
        let pipeline = pipeline(orders());
        let query = SelectQuery::all(pipeline.job().schema())
            .with_filter(Filter::new("region", CmpOp::Eq, "B"));
        let result = pipeline
            .run(RunRequest::default().with_query(query).with_artifact("b.csv"))
            .await;

        assert!(result.all_ok());
        assert_eq!(result.stats.rows_extracted, 1);
        assert_eq!(pipeline.job().sink().names(), vec!["b.csv".to_string()]);
    }

    #[tokio::test]
    async fn test_zero_quantity_leaves_ratio_undefined() {
        let pipeline = pipeline(vec![order(1, "A", 0, 10.0, true), order(2, "A", 2, 3.0, true)]);
        let result = pipeline.run(RunRequest::default().with_artifact("z.csv")).await;

        assert!(result.all_ok());
        assert_eq!(result.stats.undefined_ratios, 1);

        let text = String::from_utf8(pipeline.job().sink().get("z.csv").unwrap()).unwrap();
        assert_eq!(text.lines().nth(1), Some("A,2,6,3,2,3,1"));
    }

    #[tokio::test]
    async fn test_bad_value_fails_transformation_only() {
        let mut rows = orders();
        rows[1].insert("quantity", "four");
        let pipeline = pipeline(rows);
        let result = pipeline.run_default().await;

        assert!(result.extraction_ok());
        assert!(matches!(result.transformation, StageStatus::Failed { .. }));
        assert!(matches!(result.load, StageStatus::NotRun { .. }));
        assert!(pipeline.job().sink().names().is_empty());
    }

    #[tokio::test]
    async fn test_failed_transformation_with_continue_writes_header_only() {
        let mut rows = orders();
        rows[0].insert("quantity", "four");
        let pipeline = pipeline(rows).with_empty_batch_policy(EmptyBatchPolicy::Continue);
        pipeline
            .job()
            .sink()
            .put("out.csv", b"region,order_count\nA,1\n".to_vec())
            .await
            .unwrap();

        let result = pipeline.run(RunRequest::default().with_artifact("out.csv")).await;

        assert!(matches!(result.transformation, StageStatus::Failed { .. }));
        assert!(result.load_ok());
        let text = String::from_utf8(pipeline.job().sink().get("out.csv").unwrap()).unwrap();
        assert_eq!(
            text,
            "region,order_count,total_sales,avg_sales,total_quantity,avg_revenue_per_unit,activation_rate\n"
        );
    }

    #[tokio::test]
    async fn test_empty_table_with_continue_writes_header_only() {
        let pipeline = pipeline(vec![]).with_empty_batch_policy(EmptyBatchPolicy::Continue);
        let result = pipeline.run(RunRequest::default().with_artifact("empty.csv")).await;

        assert!(result.all_ok());
        let text = String::from_utf8(pipeline.job().sink().get("empty.csv").unwrap()).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert!(text.starts_with("region,order_count"));
    }
}
