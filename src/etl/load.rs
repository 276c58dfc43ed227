use std::sync::Arc;

use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::etl::traits::{LoadError, LoadReceipt};
use crate::model::SummaryRecordSet;
use crate::traits::ArtifactSink;

/// What a second run on the same day does to the default artifact name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DailyPolicy {
    /// `<prefix>_<YYYYMMDD>_results.csv`, same-day runs replace each other
    #[default]
    Overwrite,
    /// `<prefix>_<YYYYMMDD>_<HHMMSS>_results.csv`, one artifact per run
    PerRun,
}

/// Source of "now" for default artifact names.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// Local wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Always returns the same instant. Useful for reproducible reruns.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDateTime);

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}

/// Derives artifact names from a prefix and the current date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactNaming {
    pub prefix: String,
    pub policy: DailyPolicy,
}

impl ArtifactNaming {
    pub fn new(prefix: impl Into<String>, policy: DailyPolicy) -> Self {
        Self {
            prefix: prefix.into(),
            policy,
        }
    }

    pub fn name_at(&self, now: NaiveDateTime) -> String {
        match self.policy {
            DailyPolicy::Overwrite => {
                format!("{}_{}_results.csv", self.prefix, now.format("%Y%m%d"))
            }
            DailyPolicy::PerRun => format!(
                "{}_{}_results.csv",
                self.prefix,
                now.format("%Y%m%d_%H%M%S")
            ),
        }
    }
}

/// Encodes the summary as comma-delimited UTF-8 text: header, then one line per group.
pub fn encode_csv(summary: &SummaryRecordSet) -> Result<Vec<u8>, LoadError> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    if !summary.columns.is_empty() {
        wtr.write_record(&summary.columns)?;
    }
    for row in &summary.rows {
        wtr.write_record(row.cells())?;
    }
    wtr.into_inner()
        .map_err(|e| LoadError::Encode(e.to_string()))
}

/// Publishes summaries to an [`ArtifactSink`].
pub struct Loader<K> {
    sink: K,
    naming: ArtifactNaming,
    clock: Arc<dyn Clock>,
}

impl<K: ArtifactSink> Loader<K> {
    pub fn new(sink: K, naming: ArtifactNaming) -> Self {
        Self {
            sink,
            naming,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    /// Resolves the artifact name: the explicit one, or a date-stamped default.
    pub fn artifact_name(&self, explicit: Option<&str>) -> Result<String, LoadError> {
        match explicit {
            Some(name) if name.trim().is_empty() => Err(LoadError::EmptyArtifactName),
            Some(name) => Ok(name.to_string()),
            None => Ok(self.naming.name_at(self.clock.now())),
        }
    }

    /// Writes exactly one artifact, overwriting any previous one of the same name.
    #[instrument(skip(self, summary), fields(container = %self.sink.container(), groups = summary.len()))]
    pub async fn load(
        &self,
        summary: &SummaryRecordSet,
        artifact: Option<&str>,
    ) -> Result<LoadReceipt, LoadError> {
        let name = self.artifact_name(artifact)?;
        let bytes = encode_csv(summary)?;
        let size = bytes.len();

        self.sink.put(&name, bytes).await.map_err(|e| {
            warn!(artifact = %name, error = %e, "Publish failed");
            e
        })?;

        info!(artifact = %name, bytes = size, "Load completed");
        Ok(LoadReceipt {
            container: self.sink.container().to_string(),
            artifact: name,
            rows: summary.len(),
            bytes: size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SummaryRow;
    use crate::sinks::MemorySink;
    use crate::traits::SinkError;
    use async_trait::async_trait;
    use chrono::NaiveDate;

    struct QuotaExceededSink;

    #[async_trait]
    impl ArtifactSink for QuotaExceededSink {
        fn container(&self) -> &str {
            "full"
        }

        async fn put(&self, _name: &str, _bytes: Vec<u8>) -> Result<(), SinkError> {
            Err(SinkError::Rejected("quota exceeded".to_string()))
        }
    }

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn summary() -> SummaryRecordSet {
        SummaryRecordSet {
            columns: [
                "region",
                "order_count",
                "total_sales",
                "avg_sales",
                "total_quantity",
                "activation_rate",
            ]
            .map(String::from)
            .to_vec(),
            rows: vec![
                SummaryRow {
                    group: "North".to_string(),
                    count: 3,
                    metric_sum: 0.0,
                    metric_mean: 0.0,
                    quantity_sum: 0.0,
                    ratio_means: vec![],
                    flag_rate: 0.0,
                },
            ],
        }
    }

    #[test]
    fn test_default_names() {
        let naming = ArtifactNaming::new("sales_summary", DailyPolicy::Overwrite);
        assert_eq!(naming.name_at(at(7, 0, 0)), "sales_summary_20240309_results.csv");
        assert_eq!(naming.name_at(at(23, 59, 59)), "sales_summary_20240309_results.csv");

        let naming = ArtifactNaming::new("sales_summary", DailyPolicy::PerRun);
        assert_eq!(
            naming.name_at(at(7, 5, 9)),
            "sales_summary_20240309_070509_results.csv"
        );
    }

    #[test]
    fn test_empty_summary_encodes_header_only() {
        let empty = SummaryRecordSet {
            columns: vec!["region".to_string(), "order_count".to_string()],
            rows: vec![],
        };
        let bytes = encode_csv(&empty).unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), "region,order_count\n");
    }

    #[test]
    fn test_group_keys_are_quoted_when_needed() {
        let mut s = summary();
        s.rows[0].group = "North, East".to_string();
        let text = String::from_utf8(encode_csv(&s).unwrap()).unwrap();
        assert!(text.contains("\"North, East\""));
    }

    #[tokio::test]
    async fn test_load_uses_date_stamped_name() {
        let loader = Loader::new(
            MemorySink::new("results"),
            ArtifactNaming::new("sales_summary", DailyPolicy::Overwrite),
        )
        .with_clock(Arc::new(FixedClock(at(12, 0, 0))));

        let receipt = loader.load(&summary(), None).await.unwrap();
        assert_eq!(receipt.artifact, "sales_summary_20240309_results.csv");
        assert_eq!(receipt.container, "results");
        assert_eq!(receipt.rows, 1);

        let stored = loader.sink().get(&receipt.artifact).unwrap();
        assert_eq!(receipt.bytes, stored.len());
        assert!(String::from_utf8(stored).unwrap().starts_with("region,order_count"));
    }

    #[tokio::test]
    async fn test_same_name_overwrites() {
        let loader = Loader::new(
            MemorySink::new("results"),
            ArtifactNaming::new("x", DailyPolicy::Overwrite),
        );
        loader.load(&summary(), Some("out.csv")).await.unwrap();
        let empty = SummaryRecordSet {
            columns: summary().columns,
            rows: vec![],
        };
        loader.load(&empty, Some("out.csv")).await.unwrap();

        assert_eq!(loader.sink().names(), vec!["out.csv".to_string()]);
        assert_eq!(
            String::from_utf8(loader.sink().get("out.csv").unwrap()).unwrap(),
            "region,order_count,total_sales,avg_sales,total_quantity,activation_rate\n"
        );
    }

    #[tokio::test]
    async fn test_empty_artifact_name_rejected() {
        let loader = Loader::new(MemorySink::new("r"), ArtifactNaming::new("x", DailyPolicy::Overwrite));
        let err = loader.load(&summary(), Some("  ")).await.unwrap_err();
        assert!(matches!(err, LoadError::EmptyArtifactName));
    }

    #[tokio::test]
    async fn test_sink_failure_is_reported() {
        let loader = Loader::new(QuotaExceededSink, ArtifactNaming::new("x", DailyPolicy::Overwrite));
        let err = loader.load(&summary(), None).await.unwrap_err();
        assert!(matches!(err, LoadError::Sink(SinkError::Rejected(_))));
    }
}
