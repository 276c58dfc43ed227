//! Cleaning, enrichment and aggregation of a raw batch.
//!
//! The transformer runs six steps in order:
//! 1. **Completeness filter**: drop rows missing a required field
//! 2. **Normalization**: coerce dates to date/times and metrics to `f64`
//! 3. **Derived ratios**: per-row `numerator / denominator`, undefined on a
//!    zero or non-finite denominator
//! 4. **Group rate**: `flag / cardinality(group)`, computed in two passes
//! 5. **Aggregation**: count, sum and mean per group, sorted by key
//! 6. **Column finalization**: flat, stable column names
//!
//! Any coercion failure fails the whole batch; the orchestrator records it
//! as a failed transformation instead of publishing a partial summary.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use tracing::{info, instrument, warn};

use crate::etl::schema::Schema;
use crate::etl::traits::{TransformError, TransformOutput, TransformReport};
use crate::model::{RawRecordSet, Row, SummaryRecordSet, SummaryRow, Value};

// ============================================================================
// Column Layout
// ============================================================================

/// Reduction applied to a field within a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    Count,
    Sum,
    Mean,
    /// Sum of per-row group rates, i.e. the flagged share of the group
    Rate,
}

/// One aggregate column before flattening, e.g. `(sales, Sum)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateColumn {
    pub source: String,
    pub aggregation: Aggregation,
}

impl AggregateColumn {
    fn new(source: &str, aggregation: Aggregation) -> Self {
        Self {
            source: source.to_string(),
            aggregation,
        }
    }

    /// Flattens the two-level `(field, reduction)` name into one column name.
    pub fn flat_name(&self) -> String {
        match self.aggregation {
            Aggregation::Count => format!("{}_count", self.source),
            Aggregation::Sum => format!("total_{}", self.source),
            Aggregation::Mean => format!("avg_{}", self.source),
            Aggregation::Rate => format!("{}_rate", self.source),
        }
    }
}

/// Aggregates in output order. Matches the field order of [`SummaryRow`].
pub fn summary_layout(schema: &Schema) -> Vec<AggregateColumn> {
    let mut layout = vec![
        AggregateColumn::new(&schema.record_label, Aggregation::Count),
        AggregateColumn::new(&schema.metric_name, Aggregation::Sum),
        AggregateColumn::new(&schema.metric_name, Aggregation::Mean),
        AggregateColumn::new(&schema.quantity_column, Aggregation::Sum),
    ];
    layout.extend(
        schema
            .ratios
            .iter()
            .map(|r| AggregateColumn::new(&r.name, Aggregation::Mean)),
    );
    layout.push(AggregateColumn::new(&schema.flag_label, Aggregation::Rate));
    layout
}

/// Header of the summary: the group column followed by the flat aggregate names.
pub fn summary_columns(schema: &Schema) -> Vec<String> {
    std::iter::once(schema.group_column.clone())
        .chain(summary_layout(schema).iter().map(AggregateColumn::flat_name))
        .collect()
}

// ============================================================================
// Row Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
enum Operand {
    Quantity,
    Price,
    Metric,
    Extra(usize),
}

/// A complete, type-normalized row.
#[derive(Debug, Clone, PartialEq)]
struct CleanRow {
    group: String,
    flag: bool,
    quantity: f64,
    unit_price: f64,
    date: Option<NaiveDateTime>,
    extras: Vec<Option<f64>>,
}

/// A clean row with its primary metric and ratios.
#[derive(Debug, Clone, PartialEq)]
struct EnrichedRow {
    clean: CleanRow,
    metric: f64,
    ratios: Vec<Option<f64>>,
}

impl EnrichedRow {
    fn operand(clean: &CleanRow, metric: f64, operand: Operand) -> Option<f64> {
        match operand {
            Operand::Quantity => Some(clean.quantity),
            Operand::Price => Some(clean.unit_price),
            Operand::Metric => Some(metric),
            Operand::Extra(i) => clean.extras.get(i).copied().flatten(),
        }
    }
}

// ============================================================================
// Transformer
// ============================================================================

/// Turns a [`RawRecordSet`] into a [`SummaryRecordSet`].
#[derive(Debug, Clone)]
pub struct Transformer {
    schema: Schema,
}

impl Transformer {
    pub fn new(schema: Schema) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    #[instrument(skip(self, raw), fields(rows = raw.len()))]
    pub fn transform(&self, raw: RawRecordSet) -> Result<TransformOutput, TransformError> {
        self.schema.validate()?;
        let operands = self.ratio_operands();
        let input_rows = raw.len();

        // Step 1
        let (complete, dropped_incomplete) =
            completeness_filter(raw.rows, &self.schema.required_columns());
        if dropped_incomplete > 0 {
            warn!(dropped = dropped_incomplete, "Dropped rows missing required fields");
        }

        // Step 2
        let clean = complete
            .iter()
            .map(|(index, row)| self.normalize(*index, row))
            .collect::<Result<Vec<_>, _>>()?;

        let date_range = clean
            .iter()
            .filter_map(|r| r.date)
            .fold(None, |range: Option<(NaiveDateTime, NaiveDateTime)>, d| match range {
                Some((lo, hi)) => Some((lo.min(d), hi.max(d))),
                None => Some((d, d)),
            });

        // Step 3
        let mut undefined_ratios = 0;
        let mut enriched = Vec::with_capacity(clean.len());
        for (index, row) in complete.iter().map(|(i, _)| *i).zip(clean) {
            let metric = row.quantity * row.unit_price;
            if !metric.is_finite() {
                return Err(TransformError::NonFinite {
                    row: index,
                    metric: self.schema.metric_name.clone(),
                });
            }
            let ratios: Vec<Option<f64>> = operands
                .iter()
                .map(|&(num, den)| {
                    ratio(
                        EnrichedRow::operand(&row, metric, num),
                        EnrichedRow::operand(&row, metric, den),
                    )
                })
                .collect();
            undefined_ratios += ratios.iter().filter(|r| r.is_none()).count();
            enriched.push(EnrichedRow {
                clean: row,
                metric,
                ratios,
            });
        }
        if undefined_ratios > 0 {
            warn!(undefined = undefined_ratios, "Ratios left undefined by zero denominators");
        }

        // Step 4
        let cardinality = group_cardinality(enriched.iter().map(|r| r.clean.group.as_str()));
        let rates: Vec<f64> = enriched
            .iter()
            .map(|r| group_rate(r.clean.flag, &r.clean.group, &cardinality))
            .collect();

        // Step 5
        let mut groups: BTreeMap<&str, GroupAccumulator> = BTreeMap::new();
        for (row, rate) in enriched.iter().zip(&rates) {
            groups
                .entry(row.clean.group.as_str())
                .or_insert_with(|| GroupAccumulator::new(operands.len()))
                .push(row, *rate);
        }

        // Step 6
        let summary = SummaryRecordSet {
            columns: summary_columns(&self.schema),
            rows: groups
                .into_iter()
                .map(|(group, acc)| acc.finish(group))
                .collect(),
        };

        let report = TransformReport {
            input_rows,
            dropped_incomplete,
            undefined_ratios,
            groups: summary.len(),
            date_range,
        };
        info!(
            input_rows,
            kept_rows = report.kept_rows(),
            groups = report.groups,
            "Transformation completed"
        );
        Ok(TransformOutput { summary, report })
    }

    fn ratio_operands(&self) -> Vec<(Operand, Operand)> {
        let resolve = |name: &str| {
            if name == self.schema.quantity_column {
                Operand::Quantity
            } else if name == self.schema.price_column {
                Operand::Price
            } else if name == self.schema.metric_name {
                Operand::Metric
            } else {
                // validate() guarantees the name is an extra column
                let i = self
                    .schema
                    .extra_numeric_columns
                    .iter()
                    .position(|c| c == name)
                    .unwrap_or_default();
                Operand::Extra(i)
            }
        };
        self.schema
            .ratios
            .iter()
            .map(|r| (resolve(&r.numerator), resolve(&r.denominator)))
            .collect()
    }

    fn normalize(&self, index: usize, row: &Row) -> Result<CleanRow, TransformError> {
        let s = &self.schema;
        let err = |column: &str, expected: &'static str| TransformError::Coercion {
            row: index,
            column: column.to_string(),
            value: row.get(column).map(Value::to_string).unwrap_or_default(),
            expected,
        };
        let required = |column: &str| row.get(column).unwrap_or(&NULL);
        let optional = |column: &str| row.get(column).filter(|v| !v.is_missing());

        let group = group_key(required(&s.group_column))
            .ok_or_else(|| err(&s.group_column, "group key"))?;
        let flag = coerce_flag(required(&s.flag_column))
            .ok_or_else(|| err(&s.flag_column, "flag"))?;
        let quantity = coerce_number(required(&s.quantity_column))
            .ok_or_else(|| err(&s.quantity_column, "number"))?;
        let unit_price = coerce_number(required(&s.price_column))
            .ok_or_else(|| err(&s.price_column, "number"))?;

        let date = match optional(&s.date_column) {
            Some(v) => Some(coerce_datetime(v).ok_or_else(|| err(&s.date_column, "date"))?),
            None => None,
        };
        let extras = s
            .extra_numeric_columns
            .iter()
            .map(|column| match optional(column) {
                Some(v) => coerce_number(v).map(Some).ok_or_else(|| err(column, "number")),
                None => Ok(None),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(CleanRow {
            group,
            flag,
            quantity,
            unit_price,
            date,
            extras,
        })
    }
}

// ============================================================================
// Steps
// ============================================================================

/// Keeps rows with every `required` column present, tagged with their input index.
///
/// Returns the kept rows and the number removed.
pub fn completeness_filter(rows: Vec<Row>, required: &[&str]) -> (Vec<(usize, Row)>, usize) {
    let total = rows.len();
    let kept: Vec<(usize, Row)> = rows
        .into_iter()
        .enumerate()
        .filter(|(_, row)| required.iter().all(|c| !row.is_missing(c)))
        .collect();
    let dropped = total - kept.len();
    (kept, dropped)
}

/// `numerator / denominator`, `None` when either side is missing, the
/// denominator is zero, or the result is not finite.
pub fn ratio(numerator: Option<f64>, denominator: Option<f64>) -> Option<f64> {
    let (n, d) = (numerator?, denominator?);
    if d == 0.0 {
        return None;
    }
    Some(n / d).filter(|r| r.is_finite())
}

/// First pass of the group rate: rows per group key.
pub fn group_cardinality<'a>(groups: impl Iterator<Item = &'a str>) -> HashMap<&'a str, usize> {
    let mut cardinality = HashMap::new();
    for group in groups {
        *cardinality.entry(group).or_insert(0) += 1;
    }
    cardinality
}

/// Second pass of the group rate: `flag / cardinality(group)`.
pub fn group_rate(flag: bool, group: &str, cardinality: &HashMap<&str, usize>) -> f64 {
    match cardinality.get(group) {
        Some(&n) if n > 0 => f64::from(u8::from(flag)) / n as f64,
        _ => 0.0,
    }
}

#[derive(Debug, Clone)]
struct GroupAccumulator {
    count: usize,
    metric_sum: f64,
    quantity_sum: f64,
    ratio_sums: Vec<f64>,
    ratio_counts: Vec<usize>,
    rate_sum: f64,
}

impl GroupAccumulator {
    fn new(ratios: usize) -> Self {
        Self {
            count: 0,
            metric_sum: 0.0,
            quantity_sum: 0.0,
            ratio_sums: vec![0.0; ratios],
            ratio_counts: vec![0; ratios],
            rate_sum: 0.0,
        }
    }

    fn push(&mut self, row: &EnrichedRow, rate: f64) {
        self.count += 1;
        self.metric_sum += row.metric;
        self.quantity_sum += row.clean.quantity;
        for (i, r) in row.ratios.iter().enumerate() {
            if let Some(r) = r {
                self.ratio_sums[i] += r;
                self.ratio_counts[i] += 1;
            }
        }
        self.rate_sum += rate;
    }

    fn finish(self, group: &str) -> SummaryRow {
        SummaryRow {
            group: group.to_string(),
            count: self.count,
            metric_sum: self.metric_sum,
            metric_mean: self.metric_sum / self.count as f64,
            quantity_sum: self.quantity_sum,
            ratio_means: self
                .ratio_sums
                .iter()
                .zip(&self.ratio_counts)
                .map(|(&sum, &n)| (n > 0).then(|| sum / n as f64))
                .collect(),
            flag_rate: self.rate_sum,
        }
    }
}

// ============================================================================
// Coercions
// ============================================================================

static NULL: Value = Value::Null;

/// Group keys compare by their text form, the same form written to the
/// artifact. A column mixing `1` and `"1"` therefore yields a single group.
fn group_key(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Float(f) if f.is_nan() => None,
        other => Some(other.to_string()),
    }
}

fn coerce_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Int(i) => *i as f64,
        Value::Float(f) => *f,
        Value::Bool(b) => f64::from(u8::from(*b)),
        Value::Text(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

fn coerce_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Int(i) => Some(*i != 0),
        Value::Float(f) if !f.is_nan() => Some(*f != 0.0),
        Value::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "t" | "yes" | "y" | "1" => Some(true),
            "false" | "f" | "no" | "n" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];
const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%Y/%m/%d"];

fn coerce_datetime(value: &Value) -> Option<NaiveDateTime> {
    match value {
        Value::DateTime(dt) => Some(*dt),
        Value::Date(d) => d.and_hms_opt(0, 0, 0),
        Value::Text(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.naive_utc());
            }
            DATETIME_FORMATS
                .iter()
                .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
                .or_else(|| {
                    DATE_FORMATS
                        .iter()
                        .find_map(|f| NaiveDate::parse_from_str(s, f).ok())
                        .and_then(|d| d.and_hms_opt(0, 0, 0))
                })
        }
        _ => None,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::etl::schema::RatioSpec;
    use proptest::prelude::*;

    fn order(region: &str, quantity: f64, unit_price: f64, active: bool) -> Row {
        Row::new()
            .with("order_date", "2024-01-15")
            .with("region", region)
            .with("quantity", quantity)
            .with("unit_price", unit_price)
            .with("is_active", active)
    }

    fn transform(rows: Vec<Row>) -> TransformOutput {
        Transformer::new(Schema::default())
            .transform(RawRecordSet::new(rows))
            .unwrap()
    }

    #[test]
    fn test_two_group_aggregation() {
        let output = transform(vec![
            order("A", 1.0, 100.0, true),
            order("B", 1.0, 50.0, false),
            order("A", 2.0, 100.0, true),
            order("A", 3.0, 100.0, false),
            order("B", 3.0, 50.0, true),
        ]);
        let summary = output.summary;
        assert_eq!(summary.group_keys(), vec!["A", "B"]);

        let a = summary.get("A").unwrap();
        assert_eq!(a.count, 3);
        assert_eq!(a.metric_sum, 600.0);
        assert_eq!(a.metric_mean, 200.0);
        assert_eq!(a.quantity_sum, 6.0);
        assert_eq!(a.ratio_means, vec![Some(100.0)]);
        assert!((a.flag_rate - 2.0 / 3.0).abs() < 1e-12);

        let b = summary.get("B").unwrap();
        assert_eq!(b.count, 2);
        assert_eq!(b.metric_sum, 200.0);
        assert_eq!(b.metric_mean, 100.0);
        assert!((b.flag_rate - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_summary_columns_are_flat() {
        let output = transform(vec![order("A", 1.0, 1.0, true)]);
        assert_eq!(
            output.summary.columns,
            vec![
                "region",
                "order_count",
                "total_sales",
                "avg_sales",
                "total_quantity",
                "avg_revenue_per_unit",
                "activation_rate",
            ]
        );
    }

    #[test]
    fn test_incomplete_rows_dropped() {
        let output = transform(vec![
            order("A", 1.0, 10.0, true),
            order("A", 1.0, 10.0, true).with("region", Value::Null),
            Row::new().with("region", "A").with("quantity", 1i64),
            order("B", 2.0, f64::NAN, true),
            order("B", 2.0, 5.0, false),
        ]);
        assert_eq!(output.report.input_rows, 5);
        assert_eq!(output.report.dropped_incomplete, 3);
        assert_eq!(output.summary.get("A").unwrap().count, 1);
        assert_eq!(output.summary.get("B").unwrap().count, 1);
    }

    #[test]
    fn test_group_keys_compare_by_text_form() {
        let output = transform(vec![
            order("1", 1.0, 10.0, true).with("region", 1i64),
            order("1", 2.0, 10.0, false),
            order("2", 1.0, 10.0, true).with("region", true),
        ]);
        assert_eq!(output.summary.group_keys(), vec!["1", "true"]);
        assert_eq!(output.summary.get("1").unwrap().count, 2);
    }

    #[test]
    fn test_missing_date_is_not_required() {
        let mut row = order("A", 1.0, 10.0, true);
        row.insert("order_date", Value::Null);
        let output = transform(vec![row]);
        assert_eq!(output.report.dropped_incomplete, 0);
        assert_eq!(output.summary.len(), 1);
    }

    #[test]
    fn test_zero_denominator_leaves_ratio_undefined() {
        let output = transform(vec![
            order("A", 0.0, 10.0, true),
            order("A", 4.0, 2.5, true),
            order("B", 0.0, 3.0, false),
        ]);
        assert_eq!(output.report.undefined_ratios, 2);

        let a = output.summary.get("A").unwrap();
        assert_eq!(a.count, 2);
        assert_eq!(a.ratio_means, vec![Some(2.5)]);

        let b = output.summary.get("B").unwrap();
        assert_eq!(b.ratio_means, vec![None]);
        assert_eq!(b.metric_sum, 0.0);
    }

    #[test]
    fn test_empty_input_yields_empty_summary() {
        let output = transform(vec![]);
        assert!(output.summary.is_empty());
        assert_eq!(output.summary.columns.len(), 7);
        assert_eq!(output.report, TransformReport::default());
    }

    #[test]
    fn test_uncoercible_value_fails_batch() {
        let transformer = Transformer::new(Schema::default());
        let rows = vec![
            order("A", 1.0, 1.0, true),
            order("A", 1.0, 1.0, true).with("quantity", "lots"),
        ];
        let err = transformer.transform(RawRecordSet::new(rows)).unwrap_err();
        assert!(matches!(
            err,
            TransformError::Coercion { row: 1, ref column, .. } if column == "quantity"
        ));

        let rows = vec![order("A", 1.0, 1.0, true).with("order_date", "yesterday")];
        assert!(transformer.transform(RawRecordSet::new(rows)).is_err());

        let rows = vec![order("A", 1.0, 1.0, true).with("is_active", "maybe")];
        assert!(transformer.transform(RawRecordSet::new(rows)).is_err());
    }

    #[test]
    fn test_text_values_are_coerced() {
        let row = Row::new()
            .with("order_date", "2024-01-15T10:30:00+02:00")
            .with("region", "A")
            .with("quantity", " 3 ")
            .with("unit_price", "2.5")
            .with("is_active", "Yes");
        let output = transform(vec![row]);
        let a = output.summary.get("A").unwrap();
        assert_eq!(a.metric_sum, 7.5);
        assert_eq!(a.flag_rate, 1.0);

        let expected = NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(8, 30, 0)
            .unwrap();
        assert_eq!(output.report.date_range, Some((expected, expected)));
    }

    #[test]
    fn test_extra_columns_feed_ratios() {
        let schema = Schema {
            extra_numeric_columns: vec!["usage".to_string(), "quota".to_string()],
            ratios: vec![RatioSpec::new("utilization", "usage", "quota")],
            ..Schema::default()
        };
        let rows = vec![
            order("A", 1.0, 1.0, true).with("usage", 5i64).with("quota", 10i64),
            order("A", 1.0, 1.0, true).with("usage", 3i64),
            order("A", 1.0, 1.0, true).with("usage", 1i64).with("quota", 0i64),
        ];
        let output = Transformer::new(schema)
            .transform(RawRecordSet::new(rows))
            .unwrap();
        assert_eq!(output.summary.columns[5], "avg_utilization");
        assert_eq!(output.summary.get("A").unwrap().ratio_means, vec![Some(0.5)]);
        assert_eq!(output.report.undefined_ratios, 2);
    }

    #[test]
    fn test_invalid_schema_fails() {
        let schema = Schema {
            ratios: vec![RatioSpec::new("bad", "nope", "quantity")],
            ..Schema::default()
        };
        let err = Transformer::new(schema)
            .transform(RawRecordSet::empty())
            .unwrap_err();
        assert!(matches!(err, TransformError::Schema(_)));
    }

    #[test]
    fn test_overflowing_metric_fails() {
        let rows = vec![order("A", 1e200, 1e200, true)];
        let err = Transformer::new(Schema::default())
            .transform(RawRecordSet::new(rows))
            .unwrap_err();
        assert!(matches!(err, TransformError::NonFinite { row: 0, .. }));
    }

    #[test]
    fn test_group_rate_two_pass() {
        let groups = ["x", "y", "x", "x"];
        let cardinality = group_cardinality(groups.iter().copied());
        assert_eq!(cardinality["x"], 3);
        assert_eq!(cardinality["y"], 1);
        assert!((group_rate(true, "x", &cardinality) - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(group_rate(false, "x", &cardinality), 0.0);
        assert_eq!(group_rate(true, "y", &cardinality), 1.0);
    }

    #[test]
    fn test_ratio_policy() {
        assert_eq!(ratio(Some(10.0), Some(4.0)), Some(2.5));
        assert_eq!(ratio(Some(10.0), Some(0.0)), None);
        assert_eq!(ratio(Some(0.0), Some(-0.0)), None);
        assert_eq!(ratio(None, Some(1.0)), None);
        assert_eq!(ratio(Some(f64::MAX), Some(1e-300)), None);
    }

    fn arb_row() -> impl Strategy<Value = Row> {
        (
            prop::option::of(prop::sample::select(vec!["A", "B", "C"])),
            prop::option::of(0u32..20),
            prop::option::of(0u32..500),
            prop::option::of(any::<bool>()),
        )
            .prop_map(|(region, quantity, price, active)| {
                Row::new()
                    .with("region", region)
                    .with("quantity", quantity.map(i64::from))
                    .with("unit_price", price.map(f64::from))
                    .with("is_active", active)
            })
    }

    proptest! {
        #[test]
        fn prop_completeness_filter(rows in prop::collection::vec(arb_row(), 0..40)) {
            let schema = Schema::default();
            let required = schema.required_columns();
            let total = rows.len();
            let (kept, dropped) = completeness_filter(rows, &required);
            prop_assert_eq!(dropped, total - kept.len());
            for (_, row) in &kept {
                for column in required {
                    prop_assert!(!row.is_missing(column));
                }
            }
        }

        #[test]
        fn prop_group_keys_match_cleaned_input(rows in prop::collection::vec(arb_row(), 0..40)) {
            let schema = Schema::default();
            let (kept, _) = completeness_filter(rows.clone(), &schema.required_columns());
            let mut expected: Vec<String> = kept
                .iter()
                .filter_map(|(_, r)| r.get("region").map(Value::to_string))
                .collect();
            expected.sort();
            expected.dedup();

            let output = transform(rows);
            prop_assert_eq!(output.summary.group_keys(), expected);
        }

        #[test]
        fn prop_order_independent(
            (rows, shuffled) in prop::collection::vec(arb_row(), 0..40)
                .prop_flat_map(|rows| (Just(rows.clone()), Just(rows).prop_shuffle())),
        ) {
            let a = transform(rows).summary;
            let b = transform(shuffled).summary;
            prop_assert_eq!(a.group_keys(), b.group_keys());
            for (x, y) in a.rows.iter().zip(&b.rows) {
                prop_assert_eq!(x.count, y.count);
                prop_assert!((x.metric_sum - y.metric_sum).abs() < 1e-6);
                prop_assert!((x.metric_mean - y.metric_mean).abs() < 1e-6);
                prop_assert!((x.flag_rate - y.flag_rate).abs() < 1e-9);
                for (rx, ry) in x.ratio_means.iter().zip(&y.ratio_means) {
                    match (rx, ry) {
                        (Some(rx), Some(ry)) => prop_assert!((rx - ry).abs() < 1e-6),
                        (None, None) => {}
                        _ => prop_assert!(false, "ratio definedness differs"),
                    }
                }
            }
        }
    }
}
